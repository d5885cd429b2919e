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

//! Circuit breaker that sheds load while the service keeps failing.

use crate::config::CircuitBreakerOptions;
use crate::rest::RestError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Mutable state of the breaker.
#[derive(Default)]
struct BreakerState {
    /// Times of the server failures observed within the window.
    failures: VecDeque<Instant>,

    /// If set, the breaker is open until this time.
    open_until: Option<Instant>,
}

/// A process-wide circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    /// Configuration of the breaker.
    opts: CircuitBreakerOptions,

    /// State shared by all requests.
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Creates a new, closed breaker configured with `opts`.
    pub fn new(opts: CircuitBreakerOptions) -> Self {
        Self { opts, state: Arc::default() }
    }

    /// Returns whether a request arriving at `now` may proceed.
    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.open_until {
            Some(until) if now < until => false,
            Some(_) => {
                log::info!("Circuit breaker closing after cooldown");
                state.open_until = None;
                state.failures.clear();
                true
            }
            None => true,
        }
    }

    /// Records the outcome of a request that completed at `now`.
    fn record_at(&self, now: Instant, failed: bool) {
        if !failed {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.push_back(now);
        while let Some(oldest) = state.failures.front() {
            if now.duration_since(*oldest) > self.opts.window {
                state.failures.pop_front();
            } else {
                break;
            }
        }

        if state.open_until.is_none() && state.failures.len() >= self.opts.threshold as usize {
            log::warn!(
                "Circuit breaker opening for {:?} after {} failures",
                self.opts.cooldown,
                state.failures.len()
            );
            state.open_until = Some(now + self.opts.cooldown);
        }
    }

    /// Returns true if the breaker is currently rejecting requests.
    pub fn is_open(&self) -> bool {
        !self.allow_at(Instant::now())
    }
}

/// Middleware that rejects requests while `breaker` is open.
pub async fn circuit_breaker(
    State(breaker): State<CircuitBreaker>,
    request: Request,
    next: Next,
) -> Response {
    if !breaker.allow_at(Instant::now()) {
        return RestError::ServiceUnavailable("Service temporarily unavailable".to_owned())
            .into_response();
    }

    let response = next.run(request).await;
    breaker.record_at(Instant::now(), response.status().is_server_error());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerOptions {
            enable: true,
            window: Duration::from_secs(10),
            threshold: 3,
            cooldown: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker();
        let start = Instant::now();

        breaker.record_at(start, true);
        breaker.record_at(start + Duration::from_secs(1), false);
        breaker.record_at(start + Duration::from_secs(2), true);
        assert!(breaker.allow_at(start + Duration::from_secs(2)));

        breaker.record_at(start + Duration::from_secs(3), true);
        assert!(!breaker.allow_at(start + Duration::from_secs(4)));
        assert!(!breaker.allow_at(start + Duration::from_secs(32)));
        assert!(breaker.allow_at(start + Duration::from_secs(34)));
        assert!(breaker.allow_at(start + Duration::from_secs(35)));
    }

    #[test]
    fn test_failures_outside_window_are_forgotten() {
        let breaker = breaker();
        let start = Instant::now();

        breaker.record_at(start, true);
        breaker.record_at(start + Duration::from_secs(1), true);
        breaker.record_at(start + Duration::from_secs(20), true);
        assert!(breaker.allow_at(start + Duration::from_secs(20)));
    }
}
