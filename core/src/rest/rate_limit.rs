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

//! Per-client rate limiting with a sliding window.

use crate::config::RateLimitOptions;
use crate::context::{RequestContext, client_ip};
use crate::rest::RestError;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// A process-wide rate limiter keyed by client address.
#[derive(Clone)]
pub struct RateLimiter {
    /// Configuration of the limiter.
    opts: RateLimitOptions,

    /// Times of the accepted requests within the window, per client.
    clients: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Creates a new limiter configured with `opts`.
    pub fn new(opts: RateLimitOptions) -> Self {
        Self { opts, clients: Arc::default() }
    }

    /// Checks whether `client` may issue a request at `now` and accounts for it if so.
    fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut requests = self.clients.entry(client.to_owned()).or_default();
        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) >= self.opts.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.opts.requests as usize {
            return false;
        }
        requests.push_back(now);
        true
    }

    /// Forgets clients that have not issued requests within the window.
    pub fn purge_idle(&self) {
        let now = Instant::now();
        self.clients.retain(|_, requests| {
            requests.back().is_some_and(|last| now.duration_since(*last) < self.opts.window)
        });
    }
}

/// Middleware that rejects requests from clients that exceeded their quota.
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = match request.extensions().get::<RequestContext>() {
        Some(ctx) if !ctx.client_ip.is_empty() => ctx.client_ip.clone(),
        _ => {
            let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0);
            client_ip(request.headers(), peer).map(|ip| ip.to_string()).unwrap_or_default()
        }
    };

    if !limiter.check_at(&client, Instant::now()) {
        log::warn!("Rate limit exceeded for client '{}'", client);
        return RestError::TooManyRequests("Too many requests".to_owned()).into_response();
    }
    next.run(request).await
}
