//! Content-type based body decoding.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;
use http::{header, HeaderMap};
use serde_json::Value;

use crate::error::{FetchError, Result};

/// A response body decoded according to its `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// `application/json` bodies.
    Json(Value),
    /// Bodies without a content type, or whose media type mentions `text`.
    Text(String),
    /// Everything else.
    Bytes(Bytes),
}

impl Data {
    /// Returns the text if this is a text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the JSON value if this is a JSON body.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the bytes if this is a binary body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Data::Bytes(data) => Some(data),
            _ => None,
        }
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Data::Json(value) => write!(f, "{}", value),
            Data::Text(text) => f.write_str(text),
            Data::Bytes(data) => write!(f, "{:?}", data),
        }
    }
}

/// Decodes `body` according to the `Content-Type` in `headers`.
///
/// The rules are evaluated in order:
///
/// 1. no `Content-Type` decodes as text;
/// 2. exactly `application/json` parses as JSON, so a value with parameters
///    such as `charset` falls through to the later rules;
/// 3. a value containing `text` decodes as text;
/// 4. anything else is kept as raw bytes.
///
/// `request` names the request in the error raised for unparsable JSON.
pub fn decode(request: &str, headers: &HeaderMap, body: &Bytes) -> Result<Data> {
    let content_type = match headers.get(header::CONTENT_TYPE) {
        Some(content_type) => content_type,
        None => return Ok(Data::Text(lossy_text(body))),
    };

    let content_type = String::from_utf8_lossy(content_type.as_bytes());
    let content_type = content_type.trim();

    if content_type == mime::APPLICATION_JSON.as_ref() {
        parse_json(request, body).map(Data::Json)
    } else if content_type.contains("text") {
        Ok(Data::Text(lossy_text(body)))
    } else {
        Ok(Data::Bytes(body.clone()))
    }
}

pub(crate) fn parse_json(request: &str, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|err| FetchError::BodyDecodeFailed {
        request: request.to_string(),
        source: err,
    })
}

pub(crate) fn lossy_text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}
