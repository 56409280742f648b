//! Conversions from handler return values into HTTP responses.

use bytes::Bytes;
use http::{
    header::{self, HeaderName, HeaderValue},
    Response, StatusCode,
};
use serde::Serialize;

use crate::Body;

/// Represents a type that can convert into a response.
pub trait IntoResponse: Send {
    /// Consume itself and return [`Response`].
    fn into_response(self) -> Response<Body>;

    /// Wrap an `impl IntoResponse` to add a header.
    ///
    /// Invalid header names or values are ignored.
    fn with_header<K, V>(self, key: K, value: V) -> WithHeader<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        Self: Sized,
    {
        let key = key.try_into().ok();
        let value = value.try_into().ok();

        WithHeader {
            inner: self,
            header: match (key, value) {
                (Some(key), Some(value)) => Some((key, value)),
                _ => None,
            },
        }
    }

    /// Wrap an `impl IntoResponse` to set the `Content-Type` header.
    fn with_content_type(self, content_type: &str) -> WithHeader<Self>
    where
        Self: Sized,
    {
        self.with_header(header::CONTENT_TYPE, content_type)
    }

    /// Wrap an `impl IntoResponse` to set a status code.
    fn with_status(self, status: StatusCode) -> WithStatus<Self>
    where
        Self: Sized,
    {
        WithStatus {
            inner: self,
            status,
        }
    }
}

/// Returned by [`with_header`](IntoResponse::with_header) method.
pub struct WithHeader<T> {
    inner: T,
    header: Option<(HeaderName, HeaderValue)>,
}

impl<T: IntoResponse> IntoResponse for WithHeader<T> {
    fn into_response(self) -> Response<Body> {
        let mut resp = self.inner.into_response();
        if let Some((key, value)) = self.header {
            resp.headers_mut().append(key, value);
        }
        resp
    }
}

/// Returned by [`with_status`](IntoResponse::with_status) method.
pub struct WithStatus<T> {
    inner: T,
    status: StatusCode,
}

impl<T: IntoResponse> IntoResponse for WithStatus<T> {
    fn into_response(self) -> Response<Body> {
        let mut resp = self.inner.into_response();
        *resp.status_mut() = self.status;
        resp
    }
}

impl IntoResponse for Response<Body> {
    fn into_response(self) -> Response<Body> {
        self
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response<Body> {
        Response::new(self.into())
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response<Body> {
        Response::new(self.into())
    }
}

impl IntoResponse for &'static [u8] {
    fn into_response(self) -> Response<Body> {
        Response::new(self.into())
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response<Body> {
        Response::new(self.into())
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response<Body> {
        Response::new(self.into())
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response<Body> {
        Response::new(Body::empty())
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response<Body> {
        ().with_status(self).into_response()
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response<Body> {
        self.1.with_status(self.0).into_response()
    }
}

/// A JSON response.
///
/// Serializes `T` and sets `Content-Type: application/json`. A value that
/// fails to serialize produces a `500 Internal Server Error` carrying the
/// serializer message as plain text.
///
/// ```
/// use superfetch::Json;
///
/// async fn index() -> Json<serde_json::Value> {
///     Json(serde_json::json!({ "greeting": "Hello!" }))
/// }
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize + Send> IntoResponse for Json<T> {
    fn into_response(self) -> Response<Body> {
        match serde_json::to_vec(&self.0) {
            Ok(data) => data
                .with_content_type(mime::APPLICATION_JSON.as_ref())
                .into_response(),
            Err(err) => err
                .to_string()
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
                .with_content_type(mime::TEXT_PLAIN.as_ref())
                .into_response(),
        }
    }
}
