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

//! Generic abstraction to access different database systems.
//!
//! The facilities in this module provide an abstraction over different database systems such as
//! PostgreSQL and SQLite.  The PostgreSQL backend is for production use and the SQLite backend is
//! primarily intended to support unit tests.
//!
//! Queries are built at runtime by the `database` module, so the executors here only know how to
//! run a statement with a list of positional `SqlArg`s and how to extract plain columns from the
//! results.

use crate::config::Section;
use crate::model::ModelError;
use async_trait::async_trait;
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Database errors.  Any unexpected errors that come from the database are classified as
/// `BackendError`, but errors we know about have more specific types.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbError {
    /// Indicates that a request to create an entry failed because it already exists.
    #[error("Already exists")]
    AlreadyExists,

    /// Catch-all error type for unexpected database errors.
    #[error("Database error: {0}")]
    BackendError(String),

    /// Indicates a failure processing the data that already exists in the database.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// Indicates that a query was rejected before reaching the database, such as when it refers
    /// to a column name that is not allowed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Indicates that a requested entry does not exist.
    #[error("Entity not found")]
    NotFound,

    /// Indicates that the database is not available (maybe because of too many active concurrent
    /// connections).
    #[error("Unavailable")]
    Unavailable,
}

impl From<ModelError> for DbError {
    fn from(e: ModelError) -> Self {
        DbError::DataIntegrityError(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::DataIntegrityError(e.to_string())
    }
}

/// Result type for this module.
pub type DbResult<T> = Result<T, DbError>;

/// The SQL flavor spoken by an executor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Dialect {
    /// PostgreSQL: `$n` placeholders and `JSONB` documents.
    Postgres,

    /// SQLite: `?` placeholders and `TEXT` documents queried with `json_extract`.
    Sqlite,
}

/// A positional argument to bind to a dynamically-built statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlArg {
    /// The SQL `NULL` value.
    Null,

    /// A 64-bit integer.
    Int(i64),

    /// A double-precision float.
    Real(f64),

    /// A string.
    Text(String),
}

/// Binds all `args` to a `sqlx::query` in order.
macro_rules! bind_args [
    ( $query:expr, $args:expr ) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                SqlArg::Null => query.bind(None::<String>),
                SqlArg::Int(i) => query.bind(*i),
                SqlArg::Real(f) => query.bind(*f),
                SqlArg::Text(s) => query.bind(s.clone()),
            };
        }
        query
    }}
];

/// A database executor that can talk to multiple database implementations.
///
/// Users of this type do not need to destructure it: the methods below dispatch to the right
/// backend.  Note that this can wrap an executor that talks directly to a pool or to an open
/// transaction.
pub enum Executor {
    /// A PostgreSQL executor.
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresExecutor),

    /// A SQLite executor.
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteExecutor),
}

impl Executor {
    /// Returns the SQL dialect understood by this executor.
    pub fn dialect(&self) -> Dialect {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(_) => Dialect::Postgres,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Runs `sql` with `args` and returns the number of affected rows.
    pub async fn execute(&mut self, sql: &str, args: &[SqlArg]) -> DbResult<u64> {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let result = query.execute(ex.conn()).await.map_err(postgres::map_sqlx_error)?;
                Ok(result.rows_affected())
            }

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let result = query.execute(ex.conn()).await.map_err(sqlite::map_sqlx_error)?;
                Ok(result.rows_affected())
            }
        }
    }

    /// Runs `sql` with `args` and returns the textual `column` of every returned row.
    pub async fn fetch_strings(
        &mut self,
        sql: &str,
        args: &[SqlArg],
        column: &str,
    ) -> DbResult<Vec<String>> {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let rows = query.fetch_all(ex.conn()).await.map_err(postgres::map_sqlx_error)?;
                rows.iter()
                    .map(|row| row.try_get::<String, _>(column).map_err(postgres::map_sqlx_error))
                    .collect()
            }

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let rows = query.fetch_all(ex.conn()).await.map_err(sqlite::map_sqlx_error)?;
                rows.iter()
                    .map(|row| row.try_get::<String, _>(column).map_err(sqlite::map_sqlx_error))
                    .collect()
            }
        }
    }

    /// Runs `sql` with `args`, which must return exactly one row, and returns its integer
    /// `column`.
    pub async fn fetch_i64(&mut self, sql: &str, args: &[SqlArg], column: &str) -> DbResult<i64> {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let row = query.fetch_one(ex.conn()).await.map_err(postgres::map_sqlx_error)?;
                row.try_get::<i64, _>(column).map_err(postgres::map_sqlx_error)
            }

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(ex) => {
                let query = bind_args!(sqlx::query(sql), args);
                let row = query.fetch_one(ex.conn()).await.map_err(sqlite::map_sqlx_error)?;
                row.try_get::<i64, _>(column).map_err(sqlite::map_sqlx_error)
            }
        }
    }
}

/// A wrapper for a database executor backed by an open transaction.
pub struct TxExecutor(Executor);

impl TxExecutor {
    /// Returns the executor wrapped by this transaction.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    pub fn ex(&mut self) -> &mut Executor {
        &mut self.0
    }

    /// Commits the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self.0 {
            #[cfg(feature = "postgres")]
            Executor::Postgres(e) => e.commit().await,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(e) => e.commit().await,
        }
    }
}

/// Abstraction over the database connection.
#[async_trait]
pub trait Db {
    /// Obtains an executor for direct access to the pool.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    async fn ex(&self) -> DbResult<Executor>;

    /// Begins a transaction.
    ///
    /// It is the responsibility of the caller to call `commit` on the returned executor.  Otherwise
    /// the transaction is rolled back on drop.
    async fn begin(&self) -> DbResult<TxExecutor>;

    /// Closes all connections to the database.
    async fn close(&self);
}

/// Database backends that can be selected via configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// PostgreSQL.
    #[default]
    Postgres,

    /// SQLite.
    Sqlite,
}

/// Default value for the `max_retries` configuration property.
const DEFAULT_MAX_RETRIES: u16 = 60;

/// Configuration for the `database` section.
#[derive(Clone, Derivative, Deserialize, Serialize)]
#[derivative(Debug, PartialEq)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Which backend to connect to.
    pub backend: Backend,

    /// Connection string for the SQLite backend, such as `:memory:` or a file path.
    pub path: String,

    /// Host to connect to.
    pub host: String,

    /// Port to connect to (typically 5432).
    pub port: u16,

    /// Database name to connect to.
    pub name: String,

    /// Username to establish the connection with.
    pub username: String,

    /// Password to establish the connection with.
    #[derivative(Debug = "ignore")]
    pub password: String,

    /// Minimum number of connections to keep open against the database.
    pub min_connections: u32,

    /// Maximum number of connections to allow against the database.  Zero means the driver's
    /// default.
    pub max_connections: u32,

    /// Maximum number of attempts to retry a connection operation when the database does not seem
    /// to be available.
    pub max_retries: u16,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: ":memory:".to_owned(),
            host: "localhost".to_owned(),
            port: 5432,
            name: String::default(),
            username: String::default(),
            password: String::default(),
            min_connections: 0,
            max_connections: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Section for DatabaseOptions {
    const NAME: &'static str = "database";
}

/// Opens the database described by `opts`.
///
/// Connections to PostgreSQL are established lazily; SQLite databases are opened right away.
pub async fn connect(opts: &DatabaseOptions) -> DbResult<Arc<dyn Db + Send + Sync>> {
    match opts.backend {
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Arc::from(postgres::PostgresDb::connect(opts)?)),

        #[cfg(feature = "sqlite")]
        Backend::Sqlite => Ok(Arc::from(sqlite::connect(&opts.path).await?)),

        #[allow(unreachable_patterns)]
        backend => {
            Err(DbError::BackendError(format!("Support for {:?} was not compiled in", backend)))
        }
    }
}

/// Macros to help instantiate tests for multiple database systems.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    pub use paste::paste;

    /// Instantiates the `module::name` test for the database configured by `setup`.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_one_test [
        ( $name:ident, $setup:expr, $module:path $(, #[$extra:meta] )? ) => {
            #[tokio::test]
            $(#[$extra])?
            async fn $name() {
                $crate::db::testutils::paste! {
                    $module :: [< $name >]($setup).await;
                }
            }
        }
    ];

    pub use generate_one_test;

    /// Instantiates a collection of tests for a specific database system.
    ///
    /// The database implementation to run the tests against is determined by the `setup`
    /// expression, which needs to return a database object.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_tests [
        ( #[$extra:meta], $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module, #[$extra]);
            )+
        };

        ( $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module);
            )+
        };
    ];

    pub use generate_tests;
}
