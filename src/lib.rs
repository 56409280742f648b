//! Superfetch serves a handler on a random local port for exactly one
//! request, sends that request, and lets you assert on the captured
//! response.
//!
//! # Example
//!
//! ```
//! use superfetch::{http::StatusCode, make_fetch, IntoResponse, Target};
//!
//! #[tokio::main]
//! async fn main() -> superfetch::Result<()> {
//!     let fetch = make_fetch(Target::handler_fn(|| async {
//!         "teapot".with_status(StatusCode::IM_A_TEAPOT)
//!     }));
//!
//!     fetch
//!         .get("/status")
//!         .await?
//!         .expect_status(418)?
//!         .expect_body("teapot")?;
//!     Ok(())
//! }
//! ```
//!
//! # Targets
//!
//! A [`Fetch`] drives one of three [`Target`]s:
//!
//! - a [`Handler`], served on a freshly allocated port for every call;
//! - a caller-bound listener, served once and then closed;
//! - a [`Server`], which counts how many times it has been closed.
//!
//! Whatever the outcome, the listener and the connection are closed before
//! [`Fetch::fetch`] returns.
//!
//! # Response bodies
//!
//! The body is decoded according to the `Content-Type` of the response, see
//! [`decode`].

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod body;
mod decode;
mod error;
mod expect;
mod fetch;
mod handler;
mod port;
mod response;
mod server;

pub use async_trait::async_trait;
pub use body::Body;
pub use decode::{decode, Data};
pub use error::{AssertionError, ErrorHandlerDeclined, FetchError, Result};
pub use expect::{BodyExpectation, Expectation, FetchResponse, HeaderExpectation};
pub use fetch::{fetch, make_fetch, Fetch, RequestInit};
pub use handler::{handler_fn, ConnInfo, FnHandler, FnHandlerWrapper, Handler};
pub use http;
pub use hyper;
pub use port::PortAllocator;
pub use response::{IntoResponse, Json, WithHeader, WithStatus};
pub use server::{BoundListener, Server, Target};
