use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{FetchError, Result};

/// A body object for requests and responses.
#[derive(Debug, Default)]
pub struct Body(pub(crate) hyper::Body);

impl From<hyper::Body> for Body {
    fn from(body: hyper::Body) -> Self {
        Body(body)
    }
}

impl From<Body> for hyper::Body {
    fn from(body: Body) -> Self {
        body.0
    }
}

impl From<&'static [u8]> for Body {
    #[inline]
    fn from(data: &'static [u8]) -> Self {
        Self(data.into())
    }
}

impl From<&'static str> for Body {
    #[inline]
    fn from(data: &'static str) -> Self {
        Self(data.into())
    }
}

impl From<Bytes> for Body {
    #[inline]
    fn from(data: Bytes) -> Self {
        Self(data.into())
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self(data.into())
    }
}

impl From<String> for Body {
    #[inline]
    fn from(data: String) -> Self {
        Self(data.into())
    }
}

impl From<()> for Body {
    #[inline]
    fn from(_: ()) -> Self {
        Body::empty()
    }
}

impl Body {
    /// Create a body object from a value serialized as JSON.
    pub fn from_json(value: impl Serialize) -> serde_json::Result<Self> {
        Ok(serde_json::to_vec(&value)?.into())
    }

    /// Create an empty body.
    #[inline]
    pub fn empty() -> Self {
        Self(hyper::Body::empty())
    }

    /// Consumes this body object to return a [`Bytes`] that contains all data.
    pub async fn into_bytes(self) -> Result<Bytes> {
        Ok(hyper::body::to_bytes(self.0).await?)
    }

    /// Consumes this body object to return a [`String`] that contains all data.
    ///
    /// Invalid UTF-8 sequences are replaced with `U+FFFD`.
    pub async fn into_string(self) -> Result<String> {
        let data = self.into_bytes().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Consumes this body object and parses it as JSON.
    ///
    /// A body that is not valid JSON for `T` is [`FetchError::InvalidBody`].
    pub async fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        let data = self.into_bytes().await?;
        serde_json::from_slice(&data).map_err(FetchError::InvalidBody)
    }
}
