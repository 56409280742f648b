//! The fetch orchestrator.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use http::{
    header::{self, HeaderName, HeaderValue},
    HeaderMap, Method, Uri,
};
use hyper::ext::ReasonPhrase;
use serde::Serialize;
use tracing::{Instrument, Level};

use crate::{
    decode::decode,
    error::{FetchError, Result},
    expect::FetchResponse,
    port::PortAllocator,
    server::{serve_once, Server, Target},
    Body,
};

struct Parts {
    method: Method,
    headers: HeaderMap,
    query: String,
    body: Body,
}

/// Options of a single request, mirroring WHATWG `RequestInit`.
///
/// Errors from the setters are kept and reported when the request is sent.
///
/// ```
/// use superfetch::{http::Method, RequestInit};
///
/// let init = RequestInit::new()
///     .method(Method::POST)
///     .content_type("application/xml")
///     .body("<hello>world</hello>");
/// ```
pub struct RequestInit(Result<Parts>);

impl Default for RequestInit {
    fn default() -> Self {
        Self(Ok(Parts {
            method: Method::GET,
            headers: Default::default(),
            query: Default::default(),
            body: Body::empty(),
        }))
    }
}

impl RequestInit {
    /// Create the options of a `GET` request without headers or body.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(self, method: Method) -> Self {
        Self(self.0.map(|parts| Parts { method, ..parts }))
    }

    /// Appends a header.
    #[must_use]
    pub fn header<K, V>(self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        Self(self.0.and_then(move |mut parts| {
            let key = key
                .try_into()
                .map_err(|_| FetchError::InvalidHeader("invalid header name".to_string()))?;
            let value = value.try_into().map_err(|_| {
                FetchError::InvalidHeader(format!("invalid value for header `{}`", key))
            })?;
            parts.headers.append(key, value);
            Ok(parts)
        }))
    }

    /// Sets the `Content-Type` header.
    #[must_use]
    pub fn content_type(self, content_type: &str) -> Self {
        self.header(header::CONTENT_TYPE, content_type)
    }

    /// Sets the query string from serializable parameters.
    #[must_use]
    pub fn query(self, params: impl Serialize) -> Self {
        Self(self.0.and_then(|parts| {
            Ok(Parts {
                query: serde_urlencoded::to_string(params)?,
                ..parts
            })
        }))
    }

    /// Sets the body.
    #[must_use]
    pub fn body(self, body: impl Into<Body>) -> Self {
        Self(self.0.map(|parts| Parts {
            body: body.into(),
            ..parts
        }))
    }

    /// Sets a JSON body and `Content-Type: application/json`.
    #[must_use]
    pub fn body_json(self, body: &impl Serialize) -> Self {
        Self(self.0.and_then(|parts| {
            Ok(Parts {
                body: Body::from_json(body).map_err(FetchError::InvalidBody)?,
                ..parts
            })
        }))
        .content_type(mime::APPLICATION_JSON.as_ref())
    }
}

/// Sends requests to a [`Target`], one served exchange per call.
///
/// ```
/// use superfetch::{make_fetch, IntoResponse, Target};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let fetch = make_fetch(Target::handler_fn(|| async {
///     "teapot"
///         .with_status(superfetch::http::StatusCode::IM_A_TEAPOT)
///         .with_header("Coffee-Allowed", "No")
/// }));
///
/// fetch
///     .get("/header")
///     .await
///     .unwrap()
///     .expect_header("Coffee-Allowed", "No")
///     .unwrap()
///     .expect_status(418)
///     .unwrap()
///     .expect_header("Tea-Allowed", None)
///     .unwrap()
///     .expect_body("teapot")
///     .unwrap();
/// # });
/// ```
pub struct Fetch {
    target: Target,
    allocator: PortAllocator,
}

/// Create a [`Fetch`] for `target`.
pub fn make_fetch(target: impl Into<Target>) -> Fetch {
    Fetch::new(target)
}

/// Sends one request to `server`, which is closed afterwards.
pub async fn fetch(server: &Server, url: &str, init: RequestInit) -> Result<FetchResponse> {
    make_fetch(server).fetch(url, init).await
}

impl Fetch {
    /// Create a [`Fetch`] for `target` using the default [`PortAllocator`].
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            allocator: PortAllocator::default(),
        }
    }

    /// Sets the allocator used to bind a listener for each call.
    #[must_use]
    pub fn with_allocator(self, allocator: PortAllocator) -> Self {
        Self { allocator, ..self }
    }

    /// Sends a `GET` request to `url`.
    pub async fn get(&self, url: &str) -> Result<FetchResponse> {
        self.fetch(url, RequestInit::new()).await
    }

    /// Serves exactly one request to `url` and returns the captured response.
    ///
    /// `url` is a path (an absolute URL is reduced to its path and query).
    /// The listener and the connection are closed before this returns, on
    /// success and on failure.
    pub async fn fetch(&self, url: &str, init: RequestInit) -> Result<FetchResponse> {
        let parts = init.0?;
        let path = request_path(url, &parts.query);

        let (listener, handler, close_guard) = match &self.target {
            Target::Handler(handler) => (self.allocator.bind_random()?.0, handler.clone(), None),
            Target::Listener(bound) => (bound.take()?, bound.handler(), None),
            Target::Server(server) => (
                self.allocator.bind_random()?.0,
                server.handler(),
                Some(server.close_guard()),
            ),
        };

        let addr = connect_addr(listener.local_addr()?);
        let url = format!("http://{}{}", addr, path);
        let span = tracing::span!(
            Level::INFO,
            "fetch",
            method = %parts.method,
            path = %path,
            port = addr.port(),
        );

        let mut req = http::Request::builder()
            .method(parts.method.clone())
            .uri(url.as_str())
            .body(hyper::Body::from(parts.body))?;
        req.headers_mut().extend(parts.headers);

        let exchange = async {
            let serve = serve_once(listener, handler);
            tokio::pin!(serve);
            let request = send(req);
            tokio::pin!(request);

            // Polling the server first registers the accept before the
            // client connects.
            let mut served = None;
            let fetched = loop {
                tokio::select! {
                    biased;
                    res = &mut serve, if served.is_none() => served = Some(res),
                    res = &mut request => break res,
                }
            };

            if fetched.is_ok() && served.is_none() {
                served = Some(serve.await);
            }
            if let Some(Err(err)) = &served {
                tracing::warn!(error = %err, "serving the request failed");
            }

            let (head, body) = fetched?;
            tracing::info!(status = %head.status, "received response");
            Ok::<_, FetchError>((head, body))
        };
        let result = exchange.instrument(span).await;
        drop(close_guard);
        let (head, body) = result?;

        let data = decode(&format!("{} {}", parts.method, path), &head.headers, &body)?;
        Ok(FetchResponse {
            method: parts.method,
            path,
            url,
            port: addr.port(),
            status: head.status,
            reason: head
                .extensions
                .get::<ReasonPhrase>()
                .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned()),
            headers: head.headers,
            body,
            data,
        })
    }
}

async fn send(req: hyper::Request<hyper::Body>) -> Result<(http::response::Parts, Bytes)> {
    let client = hyper::Client::builder()
        .pool_max_idle_per_host(0)
        .build_http::<hyper::Body>();
    let resp = client.request(req).await?;
    let (head, body) = resp.into_parts();
    Ok((head, hyper::body::to_bytes(body).await?))
}

fn connect_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let ip: IpAddr = match addr {
            SocketAddr::V4(_) => [127, 0, 0, 1].into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        SocketAddr::new(ip, addr.port())
    } else {
        addr
    }
}

fn request_path(url: &str, query: &str) -> String {
    let mut path = match url.parse::<Uri>() {
        Ok(uri) if uri.scheme().is_some() => uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        _ if url.starts_with('/') => url.to_string(),
        _ => format!("/{}", url),
    };

    if !query.is_empty() {
        path.push(if path.contains('?') { '&' } else { '?' });
        path.push_str(query);
    }
    path
}

#[cfg(test)]
mod tests {
    use http::{Request, Response, StatusCode};
    use regex::Regex;
    use serde_json::{json, Value};

    use super::*;
    use crate::{ConnInfo, Handler, IntoResponse, Json};

    fn routes() -> Target {
        Target::handler_fn(|req: Request<Body>| async move {
            match req.uri().path() {
                "/" => "hello".into_response(),
                "/status" => "teapot".with_status(StatusCode::IM_A_TEAPOT).into_response(),
                "/header" => "teapot"
                    .with_status(StatusCode::IM_A_TEAPOT)
                    .with_header("Coffee-Allowed", "No")
                    .into_response(),
                _ => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            }
        })
    }

    fn supertest_server() -> Server {
        Server::from_fn(|req: Request<Body>| async move {
            match req.uri().path() {
                "/hello" => Json(json!({ "greeting": "Hello!" })).into_response(),
                "/text" => "Hello!".into_response(),
                "/echo" => {
                    let content_type = req
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("text/plain")
                        .to_string();
                    let body = req.into_body().into_bytes().await.unwrap_or_default();
                    body.with_content_type(&content_type).into_response()
                }
                "/err" => "Boom!\nLong message\n"
                    .with_status(StatusCode::BAD_REQUEST)
                    .with_content_type("text/plain")
                    .into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        })
    }

    #[test]
    fn paths() {
        assert_eq!(request_path("", ""), "/");
        assert_eq!(request_path("/a", ""), "/a");
        assert_eq!(request_path("a", ""), "/a");
        assert_eq!(request_path("/a?x=1", "y=2"), "/a?x=1&y=2");
        assert_eq!(request_path("http://example.com/b?c=d", ""), "/b?c=d");
        assert_eq!(request_path("/a", "q=1"), "/a?q=1");
    }

    #[tokio::test]
    async fn routes_end_to_end() {
        let fetch = make_fetch(routes());

        fetch
            .get("/")
            .await
            .unwrap()
            .expect_status(200)
            .unwrap()
            .expect("hello")
            .unwrap();

        fetch
            .get("/status")
            .await
            .unwrap()
            .expect("teapot")
            .unwrap()
            .expect_status(418)
            .unwrap();

        fetch
            .get("/header")
            .await
            .unwrap()
            .expect(("Coffee-Allowed", "No"))
            .unwrap()
            .expect_status(418)
            .unwrap()
            .expect_header("Tea-Allowed", None)
            .unwrap()
            .expect_body("teapot")
            .unwrap();

        fetch
            .get("/missing")
            .await
            .unwrap()
            .expect_status(404)
            .unwrap();
    }

    #[tokio::test]
    async fn decodes_by_content_type() {
        let fetch = make_fetch(Target::handler_fn(|req: Request<Body>| async move {
            match req.uri().path() {
                "/json" => Json(json!({ "hello": "world" })).into_response(),
                "/markdown" => "# superfetch".with_content_type("text/markdown").into_response(),
                "/binary" => vec![0u8, 1, 2]
                    .with_content_type("application/octet-stream")
                    .into_response(),
                _ => ().into_response(),
            }
        }));

        let res = fetch.get("/json").await.unwrap();
        assert_eq!(res.data().as_json(), Some(&json!({ "hello": "world" })));
        res.expect(json!({ "hello": "world" })).unwrap();

        let res = fetch.get("/markdown").await.unwrap();
        assert_eq!(res.data().as_text(), Some("# superfetch"));
        res.expect("# superfetch").unwrap();

        let res = fetch.get("/binary").await.unwrap();
        assert_eq!(res.data().as_bytes().map(|b| &b[..]), Some(&[0u8, 1, 2][..]));

        let res = fetch.get("/empty").await.unwrap();
        assert_eq!(res.data().as_text(), Some(""));
        res.expect("").unwrap();
    }

    #[tokio::test]
    async fn reason_phrase_from_status_line() {
        let fetch = make_fetch(Target::handler_fn(|req: Request<Body>| async move {
            let mut resp = "brewing".into_response();
            if req.uri().path() == "/custom" {
                resp.extensions_mut()
                    .insert(ReasonPhrase::from_static(b"Still Brewing"));
            }
            resp
        }));

        let res = fetch.get("/custom").await.unwrap();
        assert_eq!(res.status_text(), "Still Brewing");
        res.expect((200, "Still Brewing")).unwrap();
        assert!(res.expect_status_text(200, "OK").is_err());

        let res = fetch.get("/").await.unwrap();
        assert_eq!(res.status_text(), "OK");
        res.expect_status_text(200, "OK").unwrap();
    }

    #[tokio::test]
    async fn json_with_parameters_is_binary() {
        let fetch = make_fetch(Target::handler_fn(|| async {
            "not json".with_content_type("application/json; charset=utf-8")
        }));
        let res = fetch.get("/").await.unwrap();
        assert_eq!(
            res.data().as_bytes().map(|b| &b[..]),
            Some(&b"not json"[..])
        );
    }

    #[tokio::test]
    async fn invalid_json_body_fails_to_decode() {
        let fetch = make_fetch(Target::handler_fn(|| async {
            "Hello".with_content_type("application/json")
        }));
        let err = fetch.get("/hellotext").await.unwrap_err();
        assert!(matches!(err, FetchError::BodyDecodeFailed { .. }));
        assert!(err
            .to_string()
            .starts_with("Request \"GET /hellotext\" should have JSON body"));
    }

    #[tokio::test]
    async fn each_call_binds_a_new_port() {
        let handler = || async { "hello" };

        let res = make_fetch(Target::handler_fn(handler)).get("/").await.unwrap();
        res.expect("hello").unwrap();

        let res2 = make_fetch(Target::handler_fn(handler)).get("/").await.unwrap();
        res2.expect("hello").unwrap();

        assert_ne!(res.port(), res2.port());
        assert_eq!(res.url(), format!("http://127.0.0.1:{}/", res.port()));
    }

    #[tokio::test]
    async fn concurrent_fetches() {
        let fetch = make_fetch(Target::handler_fn(|req: Request<Body>| async move {
            req.uri().path().to_string()
        }));

        let (a, b, c) = tokio::join!(fetch.get("/a"), fetch.get("/b"), fetch.get("/c"));
        a.unwrap().expect_body("/a").unwrap();
        b.unwrap().expect_body("/b").unwrap();
        c.unwrap().expect_body("/c").unwrap();
    }

    #[tokio::test]
    async fn passes_connection_info() {
        let fetch = make_fetch(Target::handler_fn(
            |_req: Request<Body>, conn: ConnInfo| async move { conn.local_addr.port().to_string() },
        ));
        let res = fetch.get("/").await.unwrap();
        res.expect_body(res.port().to_string()).unwrap();
    }

    #[tokio::test]
    async fn pre_bound_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let fetch = make_fetch(
            Target::listener(listener, crate::handler_fn(|| async { "Hello World" })).unwrap(),
        );
        let res = fetch.get("/").await.unwrap();
        assert_eq!(res.port(), port);
        res.expect("Hello World").unwrap();

        assert!(matches!(
            fetch.get("/").await.unwrap_err(),
            FetchError::ListenerClosed
        ));
        // The listener was closed after the exchange.
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn declined_request_fails() {
        struct Decline;

        #[async_trait::async_trait]
        impl Handler for Decline {
            async fn call(&self, _req: Request<Body>, _conn: ConnInfo) -> Option<Response<Body>> {
                None
            }
        }

        let err = make_fetch(Target::handler(Decline)).get("/").await.unwrap_err();
        assert!(matches!(err, FetchError::Http(_)));
    }

    #[tokio::test]
    async fn custom_allocator() {
        let fetch = make_fetch(Target::handler_fn(|| async { "ok" }))
            .with_allocator(PortAllocator::new().range(40000..=40100));
        let res = fetch.get("/").await.unwrap();
        assert!((40000..=40100).contains(&res.port()));
    }

    #[tokio::test]
    async fn verify_json_request() {
        let server = supertest_server();

        fetch(&server, "/hello", RequestInit::new())
            .await
            .unwrap()
            .expect_status(200)
            .unwrap()
            .expect_header("content-type", "application/json")
            .unwrap()
            .expect_body(json!({ "greeting": "Hello!" }))
            .unwrap();
        assert_eq!(server.closed(), 1);
    }

    #[tokio::test]
    async fn supertest_api() {
        let server = supertest_server();

        fetch(&server, "/hello", RequestInit::new())
            .await
            .unwrap()
            .expect(200)
            .unwrap()
            .expect(("content-type", "application/json"))
            .unwrap()
            .expect(("content-type", Regex::new("json").unwrap()))
            .unwrap()
            .expect(json!({ "greeting": "Hello!" }))
            .unwrap()
            .expect(Regex::new("Hello").unwrap())
            .unwrap();
        assert_eq!(server.closed(), 1);
    }

    #[tokio::test]
    async fn verify_text_request() {
        let server = supertest_server();
        fetch(&server, "/text", RequestInit::new())
            .await
            .unwrap()
            .expect_status(200)
            .unwrap()
            .expect_header("content-type", None)
            .unwrap()
            .expect_body("Hello!")
            .unwrap();
    }

    #[tokio::test]
    async fn failures_still_close_the_server() {
        let server = supertest_server();

        let res = fetch(&server, "/hello", RequestInit::new()).await.unwrap();
        let err = res.expect_status(404).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Request \"GET /hello\" should have status code 404"));
        let err = res.expect_header("content-type", "text/plain").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Request \"GET /hello\" should have correct header content-type"));
        let err = res.expect_body(json!({ "greeting": "Hello2!" })).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Request \"GET /hello\" should have expected JSON body"));
        assert_eq!(server.closed(), 1);

        let err = fetch(&server, "/err", RequestInit::new())
            .await
            .unwrap()
            .expect_status(200)
            .unwrap_err();
        let err = err.as_assertion().unwrap();
        assert_eq!(
            err.message(),
            "Request \"GET /err\" should have status code 200 but was 400 (body was: Boom!)"
        );
        assert_eq!(err.expected(), &json!({ "status": "200" }));
        assert_eq!(
            err.actual(),
            &json!({ "status": "400", "body": "Boom!\nLong message\n" })
        );
        assert_eq!(server.closed(), 2);
    }

    #[tokio::test]
    async fn json_expected_from_text() {
        let server = supertest_server();
        let err = fetch(&server, "/text", RequestInit::new())
            .await
            .unwrap()
            .expect_body(json!({ "message": "hello" }))
            .unwrap_err();
        assert!(err.to_string().starts_with(
            "Request \"GET /text\" should have JSON body but body could not be parsed: "
        ));
    }

    #[tokio::test]
    async fn post_data() {
        let server = supertest_server();
        let fetch = make_fetch(&server);
        let body = "<hello>world</hello>";

        fetch
            .fetch(
                "/echo",
                RequestInit::new()
                    .method(Method::POST)
                    .content_type("application/xml")
                    .body(body),
            )
            .await
            .unwrap()
            .expect_status(200)
            .unwrap()
            .expect_header("content-type", "application/xml")
            .unwrap()
            .expect_body(body.as_bytes())
            .unwrap();
    }

    #[tokio::test]
    async fn post_json_and_query() {
        let fetch = make_fetch(Target::handler_fn(|req: Request<Body>| async move {
            let query = req.uri().query().unwrap_or_default().to_string();
            let body: Value = req.into_body().into_json().await.unwrap_or(Value::Null);
            Json(json!({ "query": query, "body": body }))
        }));

        let res = fetch
            .fetch(
                "/graphql",
                RequestInit::new()
                    .method(Method::POST)
                    .query([("a", "1"), ("b", "two")])
                    .body_json(&json!({ "query": "{hello}" })),
            )
            .await
            .unwrap();
        res.expect_body(json!({ "query": "a=1&b=two", "body": { "query": "{hello}" } }))
            .unwrap();
    }

    #[tokio::test]
    async fn recycle_a_server() {
        let server = supertest_server();
        let fetch = make_fetch(&server);

        for expected in 1..=2 {
            fetch
                .get("/hello")
                .await
                .unwrap()
                .expect_status(200)
                .unwrap()
                .expect_header("content-type", "application/json")
                .unwrap()
                .expect_body(json!({ "greeting": "Hello!" }))
                .unwrap();
            assert_eq!(server.closed(), expected);
        }
    }

    #[tokio::test]
    async fn json_convenience() {
        let server = supertest_server();
        let res = fetch(&server, "/hello", RequestInit::new()).await.unwrap();
        let value: Value = res.expect_status(200).unwrap().json().unwrap();
        assert_eq!(value, json!({ "greeting": "Hello!" }));
        assert_eq!(server.closed(), 1);
    }

    #[tokio::test]
    async fn invalid_header_is_reported() {
        let fetch = make_fetch(Target::handler_fn(|| async { "ok" }));
        let err = fetch
            .fetch("/", RequestInit::new().header("bad header", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeader(_)));
    }
}
