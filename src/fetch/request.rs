use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;

use crate::error::SourceError;

pub type HttpFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, SourceError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    Basic { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub auth: HttpAuth,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            auth: HttpAuth::None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_json_body(self, body: impl Into<String>) -> Self {
        let mut request = self.with_header("content-type", "application/json");
        request.body = Some(body.into());
        request
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport used by every upstream adapter.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("quotewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let HttpAuth::Basic { username, password } = &request.auth {
                builder = builder.basic_auth(username, Some(password));
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|err| {
                if err.is_connect() {
                    SourceError::transport(format!("connection failed: {err}"))
                } else {
                    SourceError::transport(format!("request failed: {err}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
                })
                .collect();
            let body = response.text().await.map_err(|err| {
                SourceError::transport(format!("failed to read response body: {err}"))
            })?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

struct Route {
    method: HttpMethod,
    fragment: String,
    queued: VecDeque<Result<HttpResponse, SourceError>>,
    fixed: Option<Result<HttpResponse, SourceError>>,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.method == request.method && request.url.contains(&self.fragment)
    }

    fn next(&mut self) -> Option<Result<HttpResponse, SourceError>> {
        self.queued.pop_front().or_else(|| self.fixed.clone())
    }
}

/// Deterministic in-process transport.
///
/// Routes are matched in registration order by method and URL fragment. A
/// route serves its queued responses first and then repeats its fixed one.
/// Every request is recorded so callers can count round trips.
#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each response so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Always answer matching requests with `response`.
    pub fn respond(&self, method: HttpMethod, fragment: &str, response: HttpResponse) {
        self.route_mut(method, fragment, |route| route.fixed = Some(Ok(response)));
    }

    /// Answer the next matching request with `response`, ahead of the fixed one.
    pub fn enqueue(&self, method: HttpMethod, fragment: &str, response: HttpResponse) {
        self.route_mut(method, fragment, |route| route.queued.push_back(Ok(response)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Highest number of requests that were awaiting a response at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of recorded requests whose URL contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    fn route_mut(&self, method: HttpMethod, fragment: &str, apply: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let position = routes
            .iter()
            .position(|route| route.method == method && route.fragment == fragment);
        let index = match position {
            Some(index) => index,
            None => {
                routes.push(Route {
                    method,
                    fragment: fragment.to_string(),
                    queued: VecDeque::new(),
                    fixed: None,
                });
                routes.len() - 1
            }
        };
        apply(&mut routes[index]);
    }

    fn answer(&self, request: &HttpRequest) -> Result<HttpResponse, SourceError> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .iter_mut()
            .filter(|route| route.matches(request))
            .find_map(Route::next)
            .unwrap_or_else(|| {
                Err(SourceError::transport(format!(
                    "no scripted response for {:?} {}",
                    request.method, request.url
                )))
            })
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(active, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answer(&request)
        })
    }
}
