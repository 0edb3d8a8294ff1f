//! Worker options passed from the parent through the environment.
//!
//! The parent serializes the options as one JSON object into an environment
//! variable before spawning the worker:
//!
//! ```
//! use worker_fetch::control::WorkerOptions;
//!
//! let options = WorkerOptions::from_json(r#"{"name":"ssr","entry":"./entry-server"}"#).unwrap();
//! assert_eq!(options.name, "ssr");
//! assert_eq!(options.entry.as_deref(), Some("./entry-server"));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Environment variable read by [`WorkerOptions::from_env`].
pub const WORKER_ENVIRONMENT_VAR: &str = "WORKER_ENVIRONMENT";

fn default_name() -> String {
    "worker".to_string()
}

/// Options a worker is started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Environment name, used in logs and in the ready line.
    #[serde(default = "default_name")]
    pub name: String,
    /// Default entry key for requests that do not name one, see
    /// [`ServerBuilder::default_entry`](crate::ServerBuilder::default_entry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Project root, for development workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Pipe path to listen on; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<String>,
    /// Everything else the parent sent, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: default_name(),
            entry: None,
            root: None,
            pipe: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl WorkerOptions {
    /// Read options from [`WORKER_ENVIRONMENT_VAR`].
    pub fn from_env() -> Result<Self> {
        Self::from_env_var(WORKER_ENVIRONMENT_VAR)
    }

    /// Read options from the named environment variable.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] if the variable is unset or not unicode,
    /// [`BridgeError::Json`] if it does not hold a JSON object.
    pub fn from_env_var(name: &str) -> Result<Self> {
        let raw = std::env::var(name)
            .map_err(|e| BridgeError::Config(format!("{}: {}", name, e)))?;
        Self::from_json(&raw)
    }

    /// Parse options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize for handing to a child process.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
