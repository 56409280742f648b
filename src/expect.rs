//! The expectation chain over a captured response.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::{
    decode::{lossy_text, parse_json, Data},
    error::{AssertionError, FetchError, Result},
};

/// What [`FetchResponse::expect_header`] checks a header against.
#[derive(Debug, Clone)]
pub enum HeaderExpectation {
    /// The header equals this value exactly.
    Value(String),
    /// The header is present and matches this pattern.
    Pattern(Regex),
    /// The header is present and equals these values joined with `,`.
    Values(Vec<String>),
    /// The header is not present.
    Absent,
}

impl Display for HeaderExpectation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HeaderExpectation::Value(value) => f.write_str(value),
            HeaderExpectation::Pattern(re) => write!(f, "/{}/", re),
            HeaderExpectation::Values(values) => f.write_str(&values.join(",")),
            HeaderExpectation::Absent => f.write_str("<absent>"),
        }
    }
}

impl From<&str> for HeaderExpectation {
    fn from(value: &str) -> Self {
        HeaderExpectation::Value(value.to_string())
    }
}

impl From<String> for HeaderExpectation {
    fn from(value: String) -> Self {
        HeaderExpectation::Value(value)
    }
}

impl From<Regex> for HeaderExpectation {
    fn from(re: Regex) -> Self {
        HeaderExpectation::Pattern(re)
    }
}

impl From<Option<&str>> for HeaderExpectation {
    fn from(value: Option<&str>) -> Self {
        value.map_or(HeaderExpectation::Absent, Into::into)
    }
}

impl From<Vec<String>> for HeaderExpectation {
    fn from(values: Vec<String>) -> Self {
        HeaderExpectation::Values(values)
    }
}

impl From<Vec<&str>> for HeaderExpectation {
    fn from(values: Vec<&str>) -> Self {
        HeaderExpectation::Values(values.into_iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderExpectation {
    fn from(values: [&str; N]) -> Self {
        HeaderExpectation::Values(values.iter().map(ToString::to_string).collect())
    }
}

/// What [`FetchResponse::expect_body`] checks the body against.
#[derive(Debug, Clone)]
pub enum BodyExpectation {
    /// The body decodes to this text.
    Text(String),
    /// The body decodes to JSON deep-equal to this value.
    Json(Value),
    /// The raw body equals these bytes.
    Bytes(Bytes),
    /// The body, read as text, matches this pattern.
    Pattern(Regex),
}

impl BodyExpectation {
    fn kind(&self) -> &'static str {
        match self {
            BodyExpectation::Text(_) => "text",
            BodyExpectation::Json(_) => "JSON",
            BodyExpectation::Bytes(_) => "binary",
            BodyExpectation::Pattern(_) => "matching",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            BodyExpectation::Text(text) => Value::String(text.clone()),
            BodyExpectation::Json(value) => value.clone(),
            BodyExpectation::Bytes(data) => json!(&data[..]),
            BodyExpectation::Pattern(re) => Value::String(format!("/{}/", re)),
        }
    }
}

impl Display for BodyExpectation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BodyExpectation::Text(text) => write!(f, "{:?}", text),
            BodyExpectation::Json(value) => write!(f, "{}", value),
            BodyExpectation::Bytes(data) => write!(f, "{:?}", data),
            BodyExpectation::Pattern(re) => write!(f, "/{}/", re),
        }
    }
}

impl From<&str> for BodyExpectation {
    fn from(text: &str) -> Self {
        BodyExpectation::Text(text.to_string())
    }
}

impl From<String> for BodyExpectation {
    fn from(text: String) -> Self {
        BodyExpectation::Text(text)
    }
}

impl From<Value> for BodyExpectation {
    fn from(value: Value) -> Self {
        BodyExpectation::Json(value)
    }
}

impl From<Regex> for BodyExpectation {
    fn from(re: Regex) -> Self {
        BodyExpectation::Pattern(re)
    }
}

impl From<Bytes> for BodyExpectation {
    fn from(data: Bytes) -> Self {
        BodyExpectation::Bytes(data)
    }
}

impl From<Vec<u8>> for BodyExpectation {
    fn from(data: Vec<u8>) -> Self {
        BodyExpectation::Bytes(data.into())
    }
}

impl From<&[u8]> for BodyExpectation {
    fn from(data: &[u8]) -> Self {
        BodyExpectation::Bytes(Bytes::copy_from_slice(data))
    }
}

/// The argument of [`FetchResponse::expect`].
///
/// The conversion decides which check runs: numbers and status codes (alone
/// or paired with a reason phrase) check the status, a `(name, value)` pair
/// checks a header, and everything else checks the body.
///
/// ```
/// use superfetch::Expectation;
///
/// assert!(matches!(Expectation::from(200), Expectation::Status(200, None)));
/// assert!(matches!(
///     Expectation::from(("Content-Type", "text/plain")),
///     Expectation::Header(..)
/// ));
/// assert!(matches!(Expectation::from("hello"), Expectation::Body(..)));
/// ```
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Status code and optional reason phrase.
    Status(u16, Option<String>),
    /// Header name and expected value.
    Header(String, HeaderExpectation),
    /// Expected body.
    Body(BodyExpectation),
}

fn status_code(code: i64) -> u16 {
    u16::try_from(code).unwrap_or(u16::MAX)
}

impl From<u16> for Expectation {
    fn from(code: u16) -> Self {
        Expectation::Status(code, None)
    }
}

impl From<i32> for Expectation {
    fn from(code: i32) -> Self {
        Expectation::Status(status_code(code.into()), None)
    }
}

impl From<StatusCode> for Expectation {
    fn from(status: StatusCode) -> Self {
        Expectation::Status(status.as_u16(), None)
    }
}

impl From<(u16, &str)> for Expectation {
    fn from((code, text): (u16, &str)) -> Self {
        Expectation::Status(code, Some(text.to_string()))
    }
}

impl From<(i32, &str)> for Expectation {
    fn from((code, text): (i32, &str)) -> Self {
        Expectation::Status(status_code(code.into()), Some(text.to_string()))
    }
}

impl From<(StatusCode, &str)> for Expectation {
    fn from((status, text): (StatusCode, &str)) -> Self {
        Expectation::Status(status.as_u16(), Some(text.to_string()))
    }
}

impl<'a, H: Into<HeaderExpectation>> From<(&'a str, H)> for Expectation {
    fn from((name, value): (&'a str, H)) -> Self {
        Expectation::Header(name.to_string(), value.into())
    }
}

impl From<BodyExpectation> for Expectation {
    fn from(body: BodyExpectation) -> Self {
        Expectation::Body(body)
    }
}

macro_rules! impl_body_expectation {
    ($($ty:ty),*) => {
        $(
        impl From<$ty> for Expectation {
            fn from(value: $ty) -> Self {
                Expectation::Body(value.into())
            }
        }
        )*
    };
}

impl_body_expectation!(&str, String, Value, Regex, Bytes, Vec<u8>, &[u8]);

fn header_value(name: &str, value: Value) -> Value {
    let mut headers = Map::new();
    headers.insert(name.to_string(), value);
    json!({ "headers": headers })
}

/// A captured response together with its decoded body.
///
/// Every `expect_*` method re-checks the same captured response, so they can
/// be called any number of times in any order.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) url: String,
    pub(crate) port: u16,
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) data: Data,
}

impl FetchResponse {
    /// Returns the port the request was served on.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the status code.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the reason phrase of the status line.
    ///
    /// Falls back to the canonical reason phrase of the status code, or an
    /// empty string for unknown codes.
    pub fn status_text(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or_default())
    }

    /// Returns the response headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the absolute URL that was requested.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the request method.
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the decoded body.
    #[inline]
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Returns the raw body.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the raw body as text.
    pub fn text(&self) -> String {
        lossy_text(&self.body)
    }

    /// Deserializes the raw body as JSON, whatever its content type.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| FetchError::BodyDecodeFailed {
            request: self.request(),
            source: err,
        })
    }

    /// Returns the header value, joining repeated headers with `", "`.
    pub fn header(&self, name: &str) -> Option<String> {
        let values = self
            .headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    fn request(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn fail(&self, message: String, expected: Value, actual: Value) -> FetchError {
        tracing::debug!(request = %self.request(), %message, "expectation failed");
        AssertionError::new(message, expected, actual).into()
    }

    /// Asserts that the status code equals `code`.
    pub fn expect_status(&self, code: u16) -> Result<&Self> {
        if self.status.as_u16() == code {
            return Ok(self);
        }

        let body = self.text();
        let first_line = body.lines().next().unwrap_or_default();
        let mut message = format!(
            "Request \"{}\" should have status code {} but was {}",
            self.request(),
            code,
            self.status.as_u16()
        );
        if !first_line.is_empty() {
            message.push_str(&format!(" (body was: {})", first_line));
        }

        Err(self.fail(
            message,
            json!({ "status": code.to_string() }),
            json!({ "status": self.status.as_u16().to_string(), "body": body }),
        ))
    }

    /// Asserts that the status code equals `code` and its reason phrase
    /// equals `text`.
    pub fn expect_status_text(&self, code: u16, text: &str) -> Result<&Self> {
        self.expect_status(code)?;
        if self.status_text() == text {
            return Ok(self);
        }

        Err(self.fail(
            format!(
                "Request \"{}\" should have status text {:?} but was {:?}",
                self.request(),
                text,
                self.status_text()
            ),
            json!({ "statusText": text }),
            json!({ "statusText": self.status_text() }),
        ))
    }

    /// Asserts on the header `name`, looked up case-insensitively.
    ///
    /// ```no_run
    /// # async fn check(res: superfetch::FetchResponse) -> superfetch::Result<()> {
    /// use regex::Regex;
    ///
    /// res.expect_header("Content-Type", "text/plain")?
    ///     .expect_header("content-type", Regex::new("text").unwrap())?
    ///     .expect_header("Vary", ["Origin", "Accept"])?
    ///     .expect_header("Tea-Allowed", None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn expect_header(&self, name: &str, value: impl Into<HeaderExpectation>) -> Result<&Self> {
        let expected = value.into();
        let actual = self.header(name);

        let passed = match (&expected, &actual) {
            (HeaderExpectation::Absent, actual) => actual.is_none(),
            (_, None) => false,
            (HeaderExpectation::Value(value), Some(actual)) => value == actual,
            (HeaderExpectation::Pattern(re), Some(actual)) => re.is_match(actual),
            (HeaderExpectation::Values(values), Some(actual)) => &values.join(",") == actual,
        };
        if passed {
            return Ok(self);
        }

        let detail = match (&expected, &actual) {
            (HeaderExpectation::Absent, Some(actual)) => {
                format!("expected it to be absent but was {:?}", actual)
            }
            (_, None) => format!("expected {} but it was absent", expected),
            (_, Some(actual)) => format!("expected {} but was {:?}", expected, actual),
        };
        let name = name.to_ascii_lowercase();

        Err(self.fail(
            format!(
                "Request \"{}\" should have correct header {}: {}",
                self.request(),
                name,
                detail
            ),
            header_value(&name, match &expected {
                HeaderExpectation::Absent => Value::Null,
                expected => Value::String(expected.to_string()),
            }),
            header_value(&name, actual.map_or(Value::Null, Value::String)),
        ))
    }

    /// Asserts that the header `name` is not present.
    pub fn expect_no_header(&self, name: &str) -> Result<&Self> {
        self.expect_header(name, HeaderExpectation::Absent)
    }

    /// Asserts on the decoded body.
    ///
    /// A pattern is matched against the body read as text. Text compares
    /// against text, a JSON string, or the raw bytes of a binary body. JSON
    /// deep-compares, parsing a non-JSON body first. Bytes compare against
    /// the raw body.
    pub fn expect_body(&self, value: impl Into<BodyExpectation>) -> Result<()> {
        let expected = value.into();

        let passed = match (&expected, &self.data) {
            (BodyExpectation::Pattern(re), _) => re.is_match(&self.text()),
            (BodyExpectation::Text(text), Data::Text(actual)) => text == actual,
            (BodyExpectation::Text(text), Data::Json(Value::String(actual))) => text == actual,
            (BodyExpectation::Text(_), Data::Json(_)) => false,
            (BodyExpectation::Text(text), Data::Bytes(actual)) => text.as_bytes() == &actual[..],
            (BodyExpectation::Json(value), Data::Json(actual)) => value == actual,
            (BodyExpectation::Json(Value::String(value)), Data::Text(actual)) => value == actual,
            (BodyExpectation::Json(value), _) => *value == parse_json(&self.request(), &self.body)?,
            (BodyExpectation::Bytes(data), _) => *data == self.body,
        };
        if passed {
            return Ok(());
        }

        let message = match &expected {
            BodyExpectation::Pattern(_) => format!(
                "Request \"{}\" should have body matching {} but was {:?}",
                self.request(),
                expected,
                self.text()
            ),
            _ => format!(
                "Request \"{}\" should have expected {} body {} but was {}",
                self.request(),
                expected.kind(),
                expected,
                self.describe_body()
            ),
        };

        Err(self.fail(
            message,
            json!({ "body": expected.to_value() }),
            json!({ "body": self.body_value() }),
        ))
    }

    /// Runs the check selected by the conversion of `expectation`: a status
    /// code, a `(header, value)` pair, or a body.
    ///
    /// ```no_run
    /// # async fn check(res: superfetch::FetchResponse) -> superfetch::Result<()> {
    /// res.expect(200)?
    ///     .expect(("Content-Type", "text/plain"))?
    ///     .expect("hello")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn expect(&self, expectation: impl Into<Expectation>) -> Result<&Self> {
        match expectation.into() {
            Expectation::Status(code, None) => self.expect_status(code),
            Expectation::Status(code, Some(text)) => self.expect_status_text(code, &text),
            Expectation::Header(name, value) => self.expect_header(&name, value),
            Expectation::Body(body) => self.expect_body(body).map(|_| self),
        }
    }

    fn describe_body(&self) -> String {
        match &self.data {
            Data::Text(text) => format!("{:?}", text),
            data => data.to_string(),
        }
    }

    fn body_value(&self) -> Value {
        match &self.data {
            Data::Json(value) => value.clone(),
            Data::Text(text) => Value::String(text.clone()),
            Data::Bytes(data) => json!(&data[..]),
        }
    }
}
