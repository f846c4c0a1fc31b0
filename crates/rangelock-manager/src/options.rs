use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

pub const DEFAULT_MAX_LOCK_MEMORY: u64 = 64 * MB;
pub const DEFAULT_LOCK_WAIT_TIME: Duration = Duration::from_millis(4_000);
/// Upper bound on how long a caller of `run_escalation` waits for the
/// background escalator.
pub const DEFAULT_ESCALATION_WAIT: Duration = Duration::from_millis(100);
/// Escalation waits at least this long land in the "long wait" bucket.
pub const LONG_ESCALATION_WAIT: Duration = Duration::from_secs(1);

/// Where escalation passes run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// A dedicated escalator thread runs passes; callers wait a bounded time.
    #[default]
    Background,
    /// Passes run on the calling thread, under the manager lock.
    Inline,
}

/// Construction-time settings of a [`crate::LockManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockManagerOptions {
    pub max_lock_memory: u64,
    pub lock_wait_time: Duration,
    pub escalation: EscalationMode,
    pub escalation_wait: Duration,
}

impl Default for LockManagerOptions {
    fn default() -> Self {
        Self {
            max_lock_memory: DEFAULT_MAX_LOCK_MEMORY,
            lock_wait_time: DEFAULT_LOCK_WAIT_TIME,
            escalation: EscalationMode::default(),
            escalation_wait: DEFAULT_ESCALATION_WAIT,
        }
    }
}

impl LockManagerOptions {
    pub fn with_max_lock_memory(mut self, bytes: u64) -> Self {
        self.max_lock_memory = bytes;
        self
    }

    pub fn with_escalation(mut self, mode: EscalationMode) -> Self {
        self.escalation = mode;
        self
    }

    pub fn with_escalation_wait(mut self, wait: Duration) -> Self {
        self.escalation_wait = wait;
        self
    }

    pub fn with_lock_wait_time(mut self, wait: Duration) -> Self {
        self.lock_wait_time = wait;
        self
    }
}

/// Parses a byte count such as `1048576`, `512k`, `64MiB` or `1 GB`.
///
/// Suffixes are case-insensitive and always binary (`1k == 1024`).
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("byte size must not be empty".to_owned());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("byte size `{trimmed}` must start with a number"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|err| format!("invalid byte size `{trimmed}`: {err}"))?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KB,
        "m" | "mb" | "mib" => MB,
        "g" | "gb" | "gib" => GB,
        "t" | "tb" | "tib" => GB * 1024,
        other => return Err(format!("unknown byte size suffix `{other}`")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size `{trimmed}` overflows u64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_byte_size("1048576"), Ok(MB));
        assert_eq!(parse_byte_size("512k"), Ok(512 * KB));
        assert_eq!(parse_byte_size("64MiB"), Ok(64 * MB));
        assert_eq!(parse_byte_size(" 2 GB "), Ok(2 * GB));
        assert_eq!(parse_byte_size("10b"), Ok(10));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("MB").is_err());
        assert!(parse_byte_size("12 parsecs").is_err());
        assert!(parse_byte_size("99999999999999999999").is_err());
        assert!(parse_byte_size("18446744073709551615t").is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = LockManagerOptions::default();
        assert_eq!(options.max_lock_memory, 64 * MB);
        assert_eq!(options.escalation, EscalationMode::Background);
        assert_eq!(options.escalation_wait, Duration::from_millis(100));
    }
}
