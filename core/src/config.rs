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

//! Application configuration.
//!
//! The configuration is a tree of named sections loaded from a file (INI, YAML, JSON or TOML) and
//! overridable through environment variables.  Typed views of the sections are obtained via
//! `Config::get` once they have been declared with `Config::register`.

use crate::env::{format_duration, get_optional_raw_var, parse_duration};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration errors.  These are fatal when they happen during startup.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    /// The configuration source could not be read or parsed.
    #[error("Cannot load configuration: {0}")]
    LoadError(String),

    /// A section contains values that do not match its schema.
    #[error("Invalid configuration in section '{0}': {1}")]
    InvalidSection(&'static str, String),

    /// A section was requested without being registered first.
    #[error("Configuration section '{0}' is not registered")]
    Unregistered(&'static str),
}

/// Result type for this module.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A typed view over one configuration section.
pub trait Section: Default + DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Name of the section in the configuration tree, which is also the prefix of the
    /// environment variables that override it.
    const NAME: &'static str;
}

/// Converts a dotted key path into the name of the environment variable that overrides it.
pub fn env_var_name(path: &str) -> String {
    path.replace(['.', '-'], "_").to_uppercase()
}

/// Converts the string `raw` into a value of the same kind as `template`.
///
/// Strings that cannot be coerced are kept as they are so that deserialization reports a
/// meaningful error later on.
fn coerce(template: &Value, raw: &str) -> Value {
    match template {
        Value::Bool(_) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Value::Bool(true),
            "false" | "0" | "no" | "off" => Value::Bool(false),
            _ => Value::String(raw.to_owned()),
        },
        Value::Number(_) => {
            let raw = raw.trim();
            if let Ok(i) = raw.parse::<i64>() {
                Value::from(i)
            } else if let Ok(u) = raw.parse::<u64>() {
                Value::from(u)
            } else if let Ok(f) = raw.parse::<f64>() {
                Value::from(f)
            } else {
                Value::String(raw.to_owned())
            }
        }
        Value::Array(items) => {
            let item_template = items.first().cloned().unwrap_or(Value::String(String::new()));
            Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| coerce(&item_template, s))
                    .collect(),
            )
        }
        Value::Null => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned())),
        Value::String(_) | Value::Object(_) => Value::String(raw.to_owned()),
    }
}

/// Merges `layer` onto `base`, coercing string leaves to the kind of value they replace.
fn merge(base: &mut Value, layer: &Value) {
    if let (Value::Object(base), Value::Object(layer)) = (&mut *base, layer) {
        for (key, value) in layer {
            match base.get_mut(key) {
                Some(existing) => merge(existing, value),
                None => {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        return;
    }

    *base = match layer {
        Value::String(raw)
            if matches!(base, Value::Bool(_) | Value::Number(_) | Value::Array(_)) =>
        {
            coerce(base, raw)
        }
        layer => layer.clone(),
    };
}

/// Applies environment variable overrides to every leaf of `value` whose path is `path`.
fn overlay_env(value: &mut Value, path: &str) -> Result<(), String> {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields.iter_mut() {
                overlay_env(field, &format!("{}.{}", path, key))?;
            }
        }
        leaf => {
            if let Some(raw) = get_optional_raw_var::<String>(&env_var_name(path))? {
                *leaf = coerce(leaf, &raw);
            }
        }
    }
    Ok(())
}

/// The whole application configuration.
pub struct Config {
    /// Raw tree of sections as loaded from the source.  Unknown sections are kept here.
    raw: Map<String, Value>,

    /// Names of the sections that have been declared.
    registered: Mutex<HashSet<&'static str>>,

    /// Sections that have already been decoded, keyed by their type.
    decoded: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_map(Map::default())
    }
}

impl Config {
    /// Creates a configuration from a raw tree of sections.
    fn from_map(raw: Map<String, Value>) -> Self {
        let config = Self {
            raw,
            registered: Mutex::new(HashSet::default()),
            decoded: Mutex::new(HashMap::default()),
        };
        config.register::<ServerOptions>();
        config.register::<crate::db::DatabaseOptions>();
        config.register::<crate::cache::CacheOptions>();
        config
    }

    /// Creates a configuration from an in-memory JSON `value`, which must be an object whose
    /// keys are section names.
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        match value {
            Value::Object(raw) => Ok(Self::from_map(raw)),
            Value::Null => Ok(Self::default()),
            _ => Err(ConfigError::LoadError("Top-level configuration must be a map".to_owned())),
        }
    }

    /// Loads the configuration from the file at `path`, whose format is determined by its
    /// extension.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let value = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize::<Value>())
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_value(value)
    }

    /// Declares the section `T` so that it can later be queried with `get`.
    pub fn register<T: Section>(&self) {
        self.registered.lock().unwrap().insert(T::NAME);
    }

    /// Returns the names of the sections present in the source that nobody has registered.
    pub fn unknown_sections(&self) -> Vec<String> {
        let registered = self.registered.lock().unwrap();
        let mut unknown = self
            .raw
            .keys()
            .filter(|k| !registered.contains(k.as_str()))
            .cloned()
            .collect::<Vec<String>>();
        unknown.sort();
        unknown
    }

    /// Decodes the section `T` by overlaying its defaults, the loaded values and the environment.
    fn decode<T: Section>(&self) -> ConfigResult<T> {
        let invalid = |e: String| ConfigError::InvalidSection(T::NAME, e);

        let mut value = serde_json::to_value(T::default()).map_err(|e| invalid(e.to_string()))?;
        if let Some(layer) = self.raw.get(T::NAME) {
            merge(&mut value, layer);
        }
        overlay_env(&mut value, T::NAME).map_err(invalid)?;
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    /// Returns the section `T`, decoding it on first use.
    pub fn get<T: Section>(&self) -> ConfigResult<Arc<T>> {
        if !self.registered.lock().unwrap().contains(T::NAME) {
            return Err(ConfigError::Unregistered(T::NAME));
        }

        let mut decoded = self.decoded.lock().unwrap();
        if let Some(section) = decoded.get(&TypeId::of::<T>()) {
            if let Ok(section) = Arc::clone(section).downcast::<T>() {
                return Ok(section);
            }
        }

        let section = Arc::new(self.decode::<T>()?);
        decoded.insert(TypeId::of::<T>(), section.clone());
        Ok(section)
    }
}

/// Serde helpers to represent `Duration`s as strings such as `30s` or `15m`.
pub mod duration {
    use super::*;
    use serde::{Deserializer, Serializer};

    /// Serializes `d` in its most compact unit.
    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    /// Deserializes a duration from a string with a unit suffix or from a number of seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            /// Plain number of seconds.
            Seconds(u64),
            /// Number with a unit suffix.
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(s) => Ok(Duration::from_secs(s)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Run mode of the application.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Production.
    Prod,

    /// Staging.
    Stg,

    /// Pre-production.
    Pre,

    /// Automated tests.
    Test,

    /// Shared development environment.
    #[default]
    Dev,

    /// A developer's machine.
    Local,
}

impl Mode {
    /// Returns true if this mode serves real traffic.
    pub fn is_production(self) -> bool {
        matches!(self, Mode::Prod | Mode::Pre)
    }
}

/// Settings for the audit ring buffer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CircularBufferOptions {
    /// Maximum number of audit records held in memory before the oldest ones are overwritten.
    pub size_operation_log: usize,
}

impl Default for CircularBufferOptions {
    fn default() -> Self {
        Self { size_operation_log: 10000 }
    }
}

/// Settings for the circuit breaker middleware.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    /// Whether the breaker is installed at all.
    pub enable: bool,

    /// Window over which server failures are counted.
    #[serde(with = "duration")]
    pub window: Duration,

    /// Number of server failures within `window` that opens the breaker.
    pub threshold: u32,

    /// Time the breaker stays open before letting requests through again.
    #[serde(with = "duration")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            enable: true,
            window: Duration::from_secs(60),
            threshold: 50,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Settings for the per-client rate limiter.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RateLimitOptions {
    /// Whether the limiter is installed at all.
    pub enable: bool,

    /// Maximum number of requests a single client can issue within `window`.
    pub requests: u32,

    /// Length of the sliding window.
    #[serde(with = "duration")]
    pub window: Duration,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self { enable: false, requests: 100, window: Duration::from_secs(1) }
    }
}

/// Configuration for the `server` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Address to listen on.
    pub listen: String,

    /// Port to listen on.
    pub port: u16,

    /// Run mode.
    pub mode: Mode,

    /// Path prefix under which all routes are mounted.
    pub prefix: String,

    /// Maximum time to receive a request body.
    #[serde(with = "duration")]
    pub read_timeout: Duration,

    /// Maximum time to produce a response.
    #[serde(with = "duration")]
    pub write_timeout: Duration,

    /// Maximum time to wait for in-flight requests on shutdown.
    #[serde(with = "duration")]
    pub shutdown_timeout: Duration,

    /// Audit ring buffer settings.
    pub circular_buffer: CircularBufferOptions,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerOptions,

    /// Rate limiter settings.
    pub rate_limit: RateLimitOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_owned(),
            port: 8080,
            mode: Mode::default(),
            prefix: "/api".to_owned(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            circular_buffer: CircularBufferOptions::default(),
            circuit_breaker: CircuitBreakerOptions::default(),
            rate_limit: RateLimitOptions::default(),
        }
    }
}

impl Section for ServerOptions {
    const NAME: &'static str = "server";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    #[serde(default)]
    struct Custom {
        names: Vec<String>,
        limit: u32,
        #[serde(with = "duration")]
        ttl: Duration,
    }

    impl Default for Custom {
        fn default() -> Self {
            Self { names: vec!["a".to_owned()], limit: 3, ttl: Duration::from_secs(60) }
        }
    }

    impl Section for Custom {
        const NAME: &'static str = "custom";
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!("SERVER_PORT", env_var_name("server.port"));
        assert_eq!(
            "SERVER_CIRCULAR_BUFFER_SIZE_OPERATION_LOG",
            env_var_name("server.circular_buffer.size_operation_log")
        );
    }

    #[test]
    fn test_defaults_without_source() {
        temp_env::with_vars_unset(["SERVER_PORT", "SERVER_MODE"], || {
            let config = Config::default();
            assert_eq!(ServerOptions::default(), *config.get::<ServerOptions>().unwrap());
        });
    }

    #[test]
    fn test_unregistered_section() {
        let config = Config::default();
        assert_eq!(ConfigError::Unregistered("custom"), config.get::<Custom>().unwrap_err());
    }

    #[test]
    fn test_file_values_overlay_defaults() {
        temp_env::with_vars_unset(["CUSTOM_NAMES", "CUSTOM_LIMIT", "CUSTOM_TTL"], || {
            let config = Config::from_value(json!({
                "custom": {"limit": "7", "ttl": "2h"},
                "otel": {"endpoint": "http://collector"},
            }))
            .unwrap();
            config.register::<Custom>();

            let custom = config.get::<Custom>().unwrap();
            assert_eq!(
                Custom {
                    names: vec!["a".to_owned()],
                    limit: 7,
                    ttl: Duration::from_secs(2 * 3600)
                },
                *custom
            );
            assert_eq!(vec!["otel".to_owned()], config.unknown_sections());
        });
    }

    #[test]
    fn test_env_overrides_file() {
        temp_env::with_vars(
            [
                ("CUSTOM_NAMES", Some("x, y,z")),
                ("CUSTOM_LIMIT", Some("11")),
                ("CUSTOM_TTL", None),
            ],
            || {
                let config = Config::from_value(json!({"custom": {"limit": 5}})).unwrap();
                config.register::<Custom>();

                let custom = config.get::<Custom>().unwrap();
                assert_eq!(vec!["x", "y", "z"], custom.names);
                assert_eq!(11, custom.limit);
                assert_eq!(Duration::from_secs(60), custom.ttl);
            },
        );
    }

    #[test]
    fn test_nested_env_override() {
        temp_env::with_vars(
            [
                ("SERVER_CIRCULAR_BUFFER_SIZE_OPERATION_LOG", Some("42")),
                ("SERVER_RATE_LIMIT_ENABLE", Some("true")),
                ("SERVER_MODE", Some("prod")),
            ],
            || {
                let config = Config::default();
                let server = config.get::<ServerOptions>().unwrap();
                assert_eq!(42, server.circular_buffer.size_operation_log);
                assert!(server.rate_limit.enable);
                assert_eq!(Mode::Prod, server.mode);
                assert!(server.mode.is_production());
            },
        );
    }

    #[test]
    fn test_invalid_value() {
        temp_env::with_var("CUSTOM_LIMIT", Some("many"), || {
            let config = Config::default();
            config.register::<Custom>();
            match config.get::<Custom>() {
                Err(ConfigError::InvalidSection("custom", _)) => (),
                e => panic!("Unexpected result {:?}", e),
            }
        });
    }

    #[test]
    fn test_sections_are_memoized() {
        temp_env::with_var_unset("SERVER_PORT", || {
            let config = Config::default();
            let first = config.get::<ServerOptions>().unwrap();
            let second = config.get::<ServerOptions>().unwrap();
            assert!(Arc::ptr_eq(&first, &second));
        });
    }

    #[test]
    fn test_from_file_yaml() {
        let dir = std::env::temp_dir().join(format!("restforge-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("app.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server:\n  port: 9090\n  prefix: /v1\n").unwrap();
        drop(file);

        temp_env::with_vars_unset(["SERVER_PORT", "SERVER_PREFIX"], || {
            let config = Config::from_file(&path).unwrap();
            let server = config.get::<ServerOptions>().unwrap();
            assert_eq!(9090, server.port);
            assert_eq!("/v1", server.prefix);
        });

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_file_missing() {
        match Config::from_file(Path::new("/nonexistent/app.yaml")) {
            Err(ConfigError::LoadError(_)) => (),
            Ok(_) => panic!("Load should have failed"),
            Err(e) => panic!("Unexpected error {:?}", e),
        }
    }
}
