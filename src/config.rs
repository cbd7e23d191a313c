//! Runtime configuration options.
//!
//! Two tri-state options influence the I/O strategy. Each can come from the
//! environment or be set programmatically; bands and datasets capture a
//! [`Config`] at construction time.
//!
//! - `RAWGRID_ONE_BIG_READ`: truthy forces the direct I/O path, falsy
//!   disables it, unset leaves the decision to the scanline heuristic.
//! - `RAWGRID_CHECK_FILE_SIZE`: truthy forces the pre-open file size check,
//!   falsy disables it, unset leaves the decision to the layout heuristic.

use std::env;

/// Environment variable overriding the direct-I/O decision.
pub const ENV_ONE_BIG_READ: &str = "RAWGRID_ONE_BIG_READ";

/// Environment variable overriding the pre-open file size check.
pub const ENV_CHECK_FILE_SIZE: &str = "RAWGRID_CHECK_FILE_SIZE";

/// Captured option values. `None` means "unset, use the heuristic".
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Direct-I/O override.
    pub one_big_read: Option<bool>,
    /// File-size-check override.
    pub check_file_size: Option<bool>,
}

impl Config {
    /// Reads both options from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            one_big_read: env_bool(ENV_ONE_BIG_READ),
            check_file_size: env_bool(ENV_CHECK_FILE_SIZE),
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| parse_bool(&v))
}

/// Interprets an option value as a boolean. `1`, `true`, `yes` and `on`
/// (case-insensitive) are truthy; any other present value is falsy.
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("Yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("NO"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_default_is_unset() {
        let config = Config::default();
        assert!(config.one_big_read.is_none());
        assert!(config.check_file_size.is_none());
    }
}
