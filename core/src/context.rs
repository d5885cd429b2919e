// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Per-request identity and trace propagation.
//!
//! The `trace` middleware runs before anything else and attaches a `RequestContext` to the
//! request extensions.  Later middlewares (such as authentication) enrich that context, and
//! handlers obtain it through its extractor.

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::convert::Infallible;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};

/// Header carrying the request identifier in responses.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Header carrying the trace identifier in requests and responses.
pub static X_TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");

/// Header carrying the caller's span in requests and our span in responses.
pub static X_SPAN_ID: HeaderName = HeaderName::from_static("x-span-id");

/// Header carrying the parent span in responses.
pub static X_PSPAN_ID: HeaderName = HeaderName::from_static("x-pspan-id");

/// Header carrying an explicit session identifier.
pub static X_SESSION_ID: HeaderName = HeaderName::from_static("x-session-id");

tokio::task_local! {
    /// Identifier of the request being served by the current task.
    pub static REQUEST_ID: String;
}

/// Returns the identifier of the request being served by the current task, or an empty string
/// when called outside of a request.
pub fn current_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Identity and tracing information about the request being served.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    /// Identifier of the request, echoed in the response envelope.
    pub request_id: String,

    /// Identifier of the distributed trace this request belongs to.
    pub trace_id: String,

    /// Identifier of the span for this request.
    pub span_id: String,

    /// Identifier of the caller's span, if any.
    pub parent_span_id: String,

    /// Identifier of the authenticated user, if any.
    pub user_id: String,

    /// Name of the authenticated user, if any.
    pub username: String,

    /// Identifier of the session the request was authenticated with, if any.
    pub session_id: String,

    /// Address of the client, as seen through proxies.
    pub client_ip: String,

    /// User agent string sent by the client.
    pub user_agent: String,

    /// HTTP method of the request.
    pub method: String,

    /// Path of the request.
    pub path: String,
}

impl RequestContext {
    /// Returns true if the request carries an authenticated identity.
    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty() || !self.username.is_empty()
    }

    /// Builds the view of this context that is handed to the storage layer.
    pub fn database_context(&self, route: &str) -> DatabaseContext {
        DatabaseContext {
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            route: route.to_owned(),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestContext>().cloned().unwrap_or_default())
    }
}

/// Subset of the request context that model hooks and the storage layer can observe.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatabaseContext {
    /// Identifier of the request.
    pub request_id: String,

    /// Identifier of the trace.
    pub trace_id: String,

    /// Identifier of the authenticated user.
    pub user_id: String,

    /// Name of the authenticated user.
    pub username: String,

    /// Route of the resource being operated on.
    pub route: String,
}

/// Generates a new trace identifier.
fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generates a new span identifier.
fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Returns the value of header `name` if present, valid and non-empty.
fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

/// Determines the address of the client from proxy headers, falling back to the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(forwarded) = header_str(headers, &HeaderName::from_static("x-forwarded-for")) {
        if let Some(ip) = forwarded.split(',').next().and_then(|ip| ip.trim().parse().ok()) {
            return Some(ip);
        }
    }
    if let Some(real_ip) = header_str(headers, &HeaderName::from_static("x-real-ip")) {
        if let Ok(ip) = real_ip.parse() {
            return Some(ip);
        }
    }
    peer.map(|addr| addr.ip())
}

/// Middleware that assigns trace identifiers to the request and echoes them in the response.
pub async fn trace(mut request: Request, next: Next) -> Response {
    let headers = request.headers();
    let trace_id = header_str(headers, &X_TRACE_ID).map(str::to_owned).unwrap_or_else(new_trace_id);
    let parent_span_id = header_str(headers, &X_SPAN_ID).map(str::to_owned).unwrap_or_default();
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0);

    let context = RequestContext {
        request_id: trace_id.clone(),
        trace_id: trace_id.clone(),
        span_id: new_span_id(),
        parent_span_id,
        session_id: header_str(headers, &X_SESSION_ID).map(str::to_owned).unwrap_or_default(),
        client_ip: client_ip(headers, peer).map(|ip| ip.to_string()).unwrap_or_default(),
        user_agent: header_str(headers, &http::header::USER_AGENT)
            .map(str::to_owned)
            .unwrap_or_default(),
        method: request.method().to_string(),
        path: request.uri().path().to_owned(),
        ..Default::default()
    };
    request.extensions_mut().insert(context.clone());

    let mut response = REQUEST_ID.scope(context.request_id.clone(), next.run(request)).await;

    let headers = response.headers_mut();
    for (name, value) in [
        (&X_REQUEST_ID, &context.request_id),
        (&X_TRACE_ID, &context.trace_id),
        (&X_SPAN_ID, &context.span_id),
        (&X_PSPAN_ID, &context.parent_span_id),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name.clone(), value);
        }
    }
    response
}

/// Logger that prefixes every message with the request's identity.
pub struct RequestLogger {
    /// Prefix prepended to every message.
    prefix: String,
}

impl RequestLogger {
    /// Creates a logger for the `phase` of the request described by `ctx`.
    pub fn new(ctx: &RequestContext, phase: &str) -> Self {
        let user = if ctx.username.is_empty() { "-" } else { ctx.username.as_str() };
        Self {
            prefix: format!(
                "[{}] request_id={} trace_id={} user={}",
                phase, ctx.request_id, ctx.trace_id, user
            ),
        }
    }

    /// Returns the prefix prepended to every message.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logs `msg` at debug level.
    pub fn debug(&self, msg: impl Display) {
        log::debug!("{} {}", self.prefix, msg);
    }

    /// Logs `msg` at info level.
    pub fn info(&self, msg: impl Display) {
        log::info!("{} {}", self.prefix, msg);
    }

    /// Logs `msg` at warning level.
    pub fn warn(&self, msg: impl Display) {
        log::warn!("{} {}", self.prefix, msg);
    }

    /// Logs `msg` at error level.
    pub fn error(&self, msg: impl Display) {
        log::error!("{} {}", self.prefix, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    /// Handler that returns the request id seen through the extractor and the task-local.
    async fn echo(ctx: RequestContext) -> String {
        format!("{}|{}|{}|{}", ctx.request_id, current_request_id(), ctx.client_ip, ctx.path)
    }

    fn app() -> Router {
        Router::new().route("/echo", get(echo)).layer(axum::middleware::from_fn(trace))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_trace_propagates_inbound_ids() {
        let request = Request::builder()
            .uri("/echo")
            .header("X-Trace-ID", "trace-1")
            .header("X-Span-ID", "span-0")
            .header("X-Forwarded-For", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        let headers = response.headers().clone();
        assert_eq!("trace-1", headers.get(&X_REQUEST_ID).unwrap());
        assert_eq!("trace-1", headers.get(&X_TRACE_ID).unwrap());
        assert_eq!("span-0", headers.get(&X_PSPAN_ID).unwrap());
        let span = headers.get(&X_SPAN_ID).unwrap().to_str().unwrap().to_owned();
        assert_eq!(16, span.len());
        assert_ne!("span-0", span);

        assert_eq!("trace-1|trace-1|10.0.0.1|/echo", body_string(response).await);
    }

    #[tokio::test]
    async fn test_trace_generates_ids() {
        let request = Request::builder().uri("/echo").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        let request_id =
            response.headers().get(&X_REQUEST_ID).unwrap().to_str().unwrap().to_owned();
        assert_eq!(32, request_id.len());
        assert_eq!("", response.headers().get(&X_PSPAN_ID).unwrap());
        assert_eq!(format!("{}|{}||/echo", request_id, request_id), body_string(response).await);
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.168.1.1:4000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(Some("192.168.1.1".parse().unwrap()), client_ip(&headers, Some(peer)));
        assert_eq!(None, client_ip(&headers, None));

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.3"));
        assert_eq!(Some("172.16.0.3".parse().unwrap()), client_ip(&headers, Some(peer)));

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(Some("172.16.0.3".parse().unwrap()), client_ip(&headers, Some(peer)));

        headers.insert("x-forwarded-for", HeaderValue::from_static("8.8.8.8"));
        assert_eq!(Some("8.8.8.8".parse().unwrap()), client_ip(&headers, Some(peer)));
    }

    #[test]
    fn test_current_request_id_outside_request() {
        assert_eq!("", current_request_id());
    }

    #[test]
    fn test_request_logger_prefix() {
        let ctx = RequestContext {
            request_id: "r".to_owned(),
            trace_id: "t".to_owned(),
            username: "alice".to_owned(),
            ..Default::default()
        };
        assert_eq!(
            "[create] request_id=r trace_id=t user=alice",
            RequestLogger::new(&ctx, "create").prefix()
        );
        assert_eq!(
            "[list] request_id= trace_id= user=-",
            RequestLogger::new(&RequestContext::default(), "list").prefix()
        );
    }
}
