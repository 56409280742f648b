//! The server shapes a [`Fetch`](crate::Fetch) can drive, and the single
//! request/response cycle served for each call.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use hyper::{server::conn::Http, service::service_fn};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::{
    error::{ErrorHandlerDeclined, FetchError, Result},
    handler::{handler_fn, ConnInfo, FnHandler, Handler},
    Body,
};

/// What a [`Fetch`](crate::Fetch) sends its requests to.
pub enum Target {
    /// A handler served on a freshly allocated port for every call.
    Handler(Arc<dyn Handler>),
    /// A caller-bound listener, usable for a single exchange.
    Listener(BoundListener),
    /// A recyclable server that counts how often it has been closed.
    Server(Server),
}

impl Target {
    /// Serve `handler` on a fresh port for every call.
    pub fn handler(handler: impl Handler) -> Self {
        Target::Handler(Arc::new(handler))
    }

    /// Serve the async function `f` on a fresh port for every call.
    pub fn handler_fn<F, In>(f: F) -> Self
    where
        F: FnHandler<In>,
        In: 'static,
    {
        Self::handler(handler_fn(f))
    }

    /// Serve `handler` on an already bound listener.
    ///
    /// The listener accepts exactly one connection and is closed after the
    /// first exchange. Returns [`FetchError::PortNotFound`] if the listener
    /// cannot report the port it is bound to.
    pub fn listener(listener: TcpListener, handler: impl Handler) -> Result<Self> {
        let addr = listener
            .local_addr()
            .map_err(|_| FetchError::PortNotFound)?;
        if addr.port() == 0 {
            return Err(FetchError::PortNotFound);
        }

        Ok(Target::Listener(BoundListener {
            addr,
            listener: Mutex::new(Some(listener)),
            handler: Arc::new(handler),
        }))
    }
}

impl From<Server> for Target {
    fn from(server: Server) -> Self {
        Target::Server(server)
    }
}

impl From<&Server> for Target {
    fn from(server: &Server) -> Self {
        Target::Server(server.clone())
    }
}

impl From<Arc<dyn Handler>> for Target {
    fn from(handler: Arc<dyn Handler>) -> Self {
        Target::Handler(handler)
    }
}

/// A listener bound by the caller. See [`Target::listener`].
pub struct BoundListener {
    addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    handler: Arc<dyn Handler>,
}

impl BoundListener {
    /// Returns the address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn take(&self) -> Result<TcpListener> {
        self.listener.lock().take().ok_or(FetchError::ListenerClosed)
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }
}

/// A server that listens on a fresh port for each request and is closed
/// after it.
///
/// Clones share the close counter.
///
/// ```
/// use superfetch::{fetch, RequestInit, Server};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let server = Server::from_fn(|| async { "Hello!" });
///
/// fetch(&server, "/", RequestInit::new())
///     .await
///     .unwrap()
///     .expect_body("Hello!")
///     .unwrap();
/// assert_eq!(server.closed(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    closed: Arc<AtomicUsize>,
}

impl Server {
    /// Create a server for `handler`.
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
            closed: Default::default(),
        }
    }

    /// Create a server for the async function `f`.
    pub fn from_fn<F, In>(f: F) -> Self
    where
        F: FnHandler<In>,
        In: 'static,
    {
        Self::new(handler_fn(f))
    }

    /// Returns how many times this server has been closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    pub(crate) fn close_guard(&self) -> CloseGuard {
        CloseGuard(self.closed.clone())
    }
}

/// Counts a close of the owning [`Server`] when dropped.
pub(crate) struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Accepts one connection on `listener`, serves one request on it with
/// `handler`, and closes both.
pub(crate) async fn serve_once(listener: TcpListener, handler: Arc<dyn Handler>) -> Result<()> {
    let (stream, remote_addr) = listener.accept().await?;
    drop(listener);

    let conn = ConnInfo {
        local_addr: stream.local_addr()?,
        remote_addr,
    };
    tracing::debug!(remote_addr = %conn.remote_addr, "accepted connection");

    let service = service_fn(move |req: hyper::Request<hyper::Body>| {
        let handler = handler.clone();
        async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            match handler.call(req.map(Body::from), conn).await {
                Some(resp) => {
                    tracing::debug!(%method, %path, status = %resp.status(), "send response");
                    Ok(resp.map(hyper::Body::from))
                }
                None => {
                    tracing::warn!(%method, %path, "handler declined to respond");
                    Err(ErrorHandlerDeclined)
                }
            }
        }
    });

    Http::new()
        .http1_only(true)
        .http1_keep_alive(false)
        .serve_connection(stream, service)
        .await?;
    Ok(())
}
