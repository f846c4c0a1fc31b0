//! File-based configuration for the lock manager.
//!
//! A config file is TOML with two optional tables:
//!
//! ```toml
//! [logging]
//! level = "rangelock.escalator=debug,info"
//!
//! [locktree]
//! max_lock_memory = "64MiB"
//! escalation = "background"
//! escalation_wait_ms = 100
//! ```
//!
//! Anything left out falls back to the lock manager's defaults.

mod logging;

pub use logging::{init_tracing, LoggingConfig};

use rangelock_manager::{EscalationMode, LockManagerOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// A byte size which supports both raw byte counts and human-friendly suffixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => rangelock_manager::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Overrides for [`LockManagerOptions`]; unset fields keep the defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocktreeConfig {
    /// Ceiling on memory used by granted locks across all locktrees.
    #[serde(default)]
    pub max_lock_memory: Option<ByteSize>,

    /// How long the transaction layer waits for a conflicting lock.
    #[serde(default)]
    pub lock_wait_time_ms: Option<u64>,

    #[serde(default)]
    pub escalation: Option<EscalationMode>,

    /// Longest a caller waits on the background escalator per request.
    #[serde(default)]
    pub escalation_wait_ms: Option<u64>,
}

impl LocktreeConfig {
    pub fn manager_options(&self) -> LockManagerOptions {
        let mut options = LockManagerOptions::default();
        if let Some(max) = self.max_lock_memory {
            options.max_lock_memory = max.0;
        }
        if let Some(ms) = self.lock_wait_time_ms {
            options.lock_wait_time = Duration::from_millis(ms);
        }
        if let Some(mode) = self.escalation {
            options.escalation = mode;
        }
        if let Some(ms) = self.escalation_wait_ms {
            options.escalation_wait = Duration::from_millis(ms);
        }
        options
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lock_memory == Some(ByteSize(0)) {
            return Err(ConfigError::Invalid {
                field: "locktree.max_lock_memory",
                message: "must be greater than zero".to_owned(),
            });
        }
        if self.escalation_wait_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "locktree.escalation_wait_ms",
                message: "must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangelockConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub locktree: LocktreeConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line; keep only
        // the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redacts quoted and backticked values so parse errors never echo config
/// contents.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    static BACKTICKED_RE: OnceLock<regex::Regex> = OnceLock::new();

    let quoted = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    let out = quoted.replace_all(message, r#""<redacted>""#);

    // Only the value before `, expected` is user input; the expected part
    // names schema items.
    let boundary = out.find(", expected").unwrap_or(out.len());
    let backticked = BACKTICKED_RE.get_or_init(|| {
        regex::Regex::new(r"`[^`]*`").expect("backtick regex should compile")
    });
    let head = backticked.replace_all(&out[..boundary], "`<redacted>`");
    format!("{head}{}", &out[boundary..])
}

impl RangelockConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(
            target: "rangelock.config",
            path = %path.display(),
            "loaded config"
        );
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: RangelockConfig = toml::from_str(text)?;
        config.locktree.validate()?;
        Ok(config)
    }

    pub fn manager_options(&self) -> LockManagerOptions {
        self.locktree.manager_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_redacts_user_values_but_keeps_expectations() {
        let message = r#"invalid type: string "hunter2", expected u64"#;
        assert_eq!(
            sanitize_toml_error_message(message),
            r#"invalid type: string "<redacted>", expected u64"#
        );

        let message = "unknown field `secret_knob`, expected one of `max_lock_memory`";
        assert_eq!(
            sanitize_toml_error_message(message),
            "unknown field `<redacted>`, expected one of `max_lock_memory`"
        );
    }

    #[test]
    fn sanitizer_handles_escaped_quotes() {
        let message = r#"invalid value: string "a\"b", expected a size"#;
        assert_eq!(
            sanitize_toml_error_message(message),
            r#"invalid value: string "<redacted>", expected a size"#
        );
    }

    #[test]
    fn empty_overrides_keep_manager_defaults() {
        assert_eq!(
            LocktreeConfig::default().manager_options(),
            LockManagerOptions::default()
        );
    }
}
