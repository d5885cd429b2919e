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

//! Application context: the process-wide singletons, the registered resources and the server.

use crate::driver::{Resource, ResourceOptions};
use crate::rest;
use crate::service::Service;
use async_trait::async_trait;
use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use log::{error, info, warn};
use restforge_audit::driver::{AuditOptions, AuditRecorder};
use restforge_audit::model::AuditLog;
use restforge_authn::driver::{AuthOptions, AuthnDriver};
use restforge_core::cache::{Cache, CacheOptions, MemoryCache};
use restforge_core::clocks::{Clock, SystemClock};
use restforge_core::config::{Config, ConfigError, ServerOptions};
use restforge_core::context::trace;
use restforge_core::database::Database;
use restforge_core::db::{self, Db, DbError, DbResult, DatabaseOptions};
use restforge_core::driver::DriverError;
use restforge_core::model::Model;
use restforge_core::rest::{
    CircuitBreaker, RateLimiter, circuit_breaker, rate_limit, recovery_layer, request_logger,
};
use restforge_rbac::driver::{Enforcer, RbacOptions};
use restforge_rbac::model::Policy;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

/// Errors that prevent the application from starting or from shutting down cleanly.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The database could not be opened or prepared.
    #[error("{0}")]
    Db(#[from] DbError),

    /// A component failed to initialize.
    #[error("{0}")]
    Driver(#[from] DriverError),

    /// The listening socket failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Result type for this module.
pub type AppResult<T> = Result<T, AppError>;

/// A table that has to exist before serving requests.
#[async_trait]
trait Migration: Send + Sync {
    /// Creates the table if it does not exist yet.
    async fn migrate(&self) -> DbResult<()>;
}

#[async_trait]
impl<M: Model> Migration for Database<M> {
    async fn migrate(&self) -> DbResult<()> {
        Database::migrate(self).await
    }
}

/// The application: shared components plus the resources registered on top of them.
pub struct App {
    /// Configuration the application was built from.
    config: Arc<Config>,

    /// The `server` section of the configuration.
    server: Arc<ServerOptions>,

    /// Connection to the database.
    db: Arc<dyn Db + Send + Sync>,

    /// Source of the current time.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Shared query cache, if enabled.
    cache: Option<Arc<dyn Cache + Send + Sync>>,

    /// Authentication.
    authn: AuthnDriver,

    /// Access control.
    enforcer: Enforcer,

    /// The `rbac` section of the configuration.
    rbac: Arc<RbacOptions>,

    /// Audit of the operations on resources.
    audit: AuditRecorder,

    /// Routes of all registered resources, each under its own name.
    resources: Router,

    /// Names of the registered resources.
    names: Vec<String>,

    /// Tables of the registered resources.
    migrations: Vec<Box<dyn Migration>>,
}

impl App {
    /// Creates the application described by `config`, connecting to its database.
    pub async fn new(config: Config) -> AppResult<Self> {
        config.register::<DatabaseOptions>();
        let db_opts = config.get::<DatabaseOptions>()?;
        let db = db::connect(&db_opts).await?;
        Self::with_db(config, db, Arc::from(SystemClock::default()))
    }

    /// Creates the application described by `config` on top of an already-open database.
    pub fn with_db(
        config: Config,
        db: Arc<dyn Db + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> AppResult<Self> {
        config.register::<AuthOptions>();
        config.register::<RbacOptions>();
        config.register::<AuditOptions>();

        let server = config.get::<ServerOptions>()?;
        let cache_opts = config.get::<CacheOptions>()?;
        let cache: Option<Arc<dyn Cache + Send + Sync>> = if cache_opts.enable {
            Some(Arc::from(MemoryCache::new(&cache_opts)))
        } else {
            None
        };

        let authn = AuthnDriver::new(db.clone(), clock.clone(), config.get::<AuthOptions>()?);
        let enforcer = Enforcer::new(Database::<Policy>::new(db.clone(), clock.clone()));
        let rbac = config.get::<RbacOptions>()?;
        let audit = AuditRecorder::new(
            Database::<AuditLog>::new(db.clone(), clock.clone()),
            clock.clone(),
            config.get::<AuditOptions>()?,
            server.circular_buffer.size_operation_log,
        );

        Ok(Self {
            config: Arc::from(config),
            server,
            db,
            clock,
            cache,
            authn,
            enforcer,
            rbac,
            audit,
            resources: Router::new(),
            names: vec![],
            migrations: vec![],
        })
    }

    /// Returns the configuration, which callers can use to query their own sections.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the authentication driver.
    pub fn authn(&self) -> &AuthnDriver {
        &self.authn
    }

    /// Returns the access control enforcer.
    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Returns the audit recorder.
    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Returns a query builder over the records of type `M`.
    pub fn database<M: Model>(&self) -> Database<M> {
        let db = Database::new(self.db.clone(), self.clock.clone());
        match &self.cache {
            Some(cache) => db.with_cache_backend(cache.clone()),
            None => db,
        }
    }

    /// Mounts the records of type `M` at `/{name}` with the domain logic in `service`.
    ///
    /// Panics if `name` was already registered, which is a programming error.
    pub fn register<M: Model>(
        &mut self,
        name: &str,
        service: Arc<dyn Service<M>>,
        opts: ResourceOptions,
    ) -> Resource<M> {
        assert!(!self.names.iter().any(|n| n == name), "Resource {} registered twice", name);

        let db = self.database::<M>();
        let resource = Resource::new(name, db.clone(), service)
            .with_audit(self.audit.clone())
            .with_options(opts);

        let resources = std::mem::replace(&mut self.resources, Router::new());
        self.resources = resources.nest(&format!("/{}", name), rest::router(resource.clone()));
        self.migrations.push(Box::new(db));
        self.names.push(name.to_owned());
        resource
    }

    /// Prepares the database and starts the background tasks.
    pub async fn init(&self) -> AppResult<()> {
        self.authn.init().await?;
        self.enforcer.init(&self.rbac.roles).await?;
        self.audit.init().await?;
        for migration in &self.migrations {
            migration.migrate().await?;
        }
        self.audit.start().await;

        let unknown = self.config.unknown_sections();
        if !unknown.is_empty() {
            warn!("Ignoring unknown configuration sections: {}", unknown.join(", "));
        }
        info!("Initialized resources: {}", self.names.join(", "));
        Ok(())
    }

    /// Wraps `router` with the protections shared by all endpoints: request logging, rate
    /// limiting and the circuit breaker.
    fn protect(&self, router: Router, limiter: &RateLimiter, breaker: &CircuitBreaker) -> Router {
        let mut router = router.route_layer(from_fn(request_logger));
        if self.server.rate_limit.enable {
            router = router.route_layer(from_fn_with_state(limiter.clone(), rate_limit));
        }
        if self.server.circuit_breaker.enable {
            router = router.route_layer(from_fn_with_state(breaker.clone(), circuit_breaker));
        }
        router
    }

    /// Assembles the router for the whole application.
    ///
    /// Resources require a valid bearer token and, if enabled, access control rules granting the
    /// caller the method on the path relative to the prefix.  The authentication endpoints only
    /// get the shared protections.
    pub fn router(&self) -> Router {
        self.router_with(&RateLimiter::new(self.server.rate_limit.clone()))
    }

    /// Same as `router` but sharing the rate limiter `limiter` with the caller.
    fn router_with(&self, limiter: &RateLimiter) -> Router {
        let breaker = CircuitBreaker::new(self.server.circuit_breaker.clone());

        let authn = restforge_authn::rest::app(self.authn.clone());
        let mut api = self.protect(authn, limiter, &breaker);
        if !self.names.is_empty() {
            let mut guarded = self.protect(self.resources.clone(), limiter, &breaker);
            if self.rbac.enable {
                guarded = guarded.route_layer(from_fn_with_state(
                    self.enforcer.clone(),
                    restforge_rbac::rest::authorize,
                ));
            }
            guarded = guarded.route_layer(from_fn_with_state(
                self.authn.clone(),
                restforge_authn::rest::require_auth,
            ));
            api = api.merge(guarded);
        }

        let prefix = self.server.prefix.trim_end_matches('/');
        let mut app = if prefix.is_empty() { api } else { Router::new().nest(prefix, api) };

        if !self.server.mode.is_production() {
            app = app.layer(CorsLayer::very_permissive());
        }
        app.layer(TimeoutLayer::new(self.server.write_timeout))
            .layer(recovery_layer())
            .layer(from_fn(trace))
    }

    /// Initializes the application and serves it until a termination signal arrives.
    ///
    /// On termination, stops accepting connections, waits for in-flight requests for up to the
    /// configured shutdown timeout, writes pending audit entries and closes the database.
    pub async fn serve(self) -> AppResult<()> {
        self.init().await?;

        let limiter = RateLimiter::new(self.server.rate_limit.clone());
        let app = self.router_with(&limiter);
        let purger = tokio::spawn({
            let limiter = limiter.clone();
            let window = self.server.rate_limit.window.max(std::time::Duration::from_secs(1));
            async move {
                let mut interval = tokio::time::interval(window * 10);
                loop {
                    interval.tick().await;
                    limiter.purge_idle();
                }
            }
        });

        let addr = format!("{}:{}", self.server.listen, self.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on {} (mode {:?})", addr, self.server.mode);

        let stopping = Arc::new(Notify::new());
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal(stopping.clone()));
        let grace = self.server.shutdown_timeout;
        let result = tokio::select! {
            result = server.into_future() => result,
            () = async {
                stopping.notified().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!("In-flight requests did not finish within {:?}", grace);
                Ok(())
            }
        };
        purger.abort();

        self.audit.close().await;
        self.db.close().await;
        info!("Server stopped");
        result.map_err(AppError::from)
    }
}

/// Waits for Ctrl-C or SIGTERM and then wakes up whoever waits on `stopping`.
async fn shutdown_signal(stopping: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received; shutting down"),
        () = terminate => info!("SIGTERM received; shutting down"),
    }
    stopping.notify_one();
}
