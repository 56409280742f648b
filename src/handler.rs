//! Request handlers served by the connection bridge.

use std::{future::Future, marker::PhantomData, net::SocketAddr, sync::Arc};

use http::{Request, Response};

use crate::{Body, IntoResponse};

/// Information about the connection a request arrived on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnInfo {
    /// The local address of the connection.
    pub local_addr: SocketAddr,
    /// The remote address of the connection.
    pub remote_addr: SocketAddr,
}

/// Computes the response for one incoming request.
///
/// Returning `None` declines to respond: the connection is closed without
/// writing anything and the client side of the exchange fails.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles the request.
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Option<Response<Body>>;
}

#[async_trait::async_trait]
impl<T: Handler + ?Sized> Handler for Box<T> {
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Option<Response<Body>> {
        self.as_ref().call(req, conn).await
    }
}

#[async_trait::async_trait]
impl<T: Handler + ?Sized> Handler for Arc<T> {
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Option<Response<Body>> {
        self.as_ref().call(req, conn).await
    }
}

/// An async function usable as a [`Handler`].
///
/// Implemented for closures taking no argument, the request, or the request
/// and the [`ConnInfo`]. `In` only disambiguates the arity.
#[async_trait::async_trait]
pub trait FnHandler<In>: Send + Sync + 'static {
    /// Calls the function.
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Response<Body>;
}

#[async_trait::async_trait]
impl<F, Fut, Res> FnHandler<()> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send,
    Res: IntoResponse,
{
    async fn call(&self, _req: Request<Body>, _conn: ConnInfo) -> Response<Body> {
        self().await.into_response()
    }
}

#[async_trait::async_trait]
impl<F, Fut, Res> FnHandler<(Request<Body>,)> for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send,
    Res: IntoResponse,
{
    async fn call(&self, req: Request<Body>, _conn: ConnInfo) -> Response<Body> {
        self(req).await.into_response()
    }
}

#[async_trait::async_trait]
impl<F, Fut, Res> FnHandler<(Request<Body>, ConnInfo)> for F
where
    F: Fn(Request<Body>, ConnInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send,
    Res: IntoResponse,
{
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Response<Body> {
        self(req, conn).await.into_response()
    }
}

/// Returned by [`handler_fn`].
pub struct FnHandlerWrapper<F, In> {
    f: F,
    _mark: PhantomData<fn() -> In>,
}

/// Wraps an async function into a [`Handler`].
///
/// ```
/// use superfetch::{handler_fn, http::Request, Body};
///
/// let hello = handler_fn(|| async { "hello" });
/// let echo = handler_fn(|req: Request<Body>| async move {
///     req.into_body().into_string().await.unwrap_or_default()
/// });
/// ```
pub fn handler_fn<F, In>(f: F) -> FnHandlerWrapper<F, In>
where
    F: FnHandler<In>,
{
    FnHandlerWrapper {
        f,
        _mark: PhantomData,
    }
}

#[async_trait::async_trait]
impl<In, F> Handler for FnHandlerWrapper<F, In>
where
    In: 'static,
    F: FnHandler<In>,
{
    async fn call(&self, req: Request<Body>, conn: ConnInfo) -> Option<Response<Body>> {
        Some(self.f.call(req, conn).await)
    }
}
