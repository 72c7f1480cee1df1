use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Stream the logger writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard error (the `env_logger` default)
    Stderr,
    /// Standard output
    Stdout,
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::Stderr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_log_target_parsing() {
        assert_eq!(LogTarget::from_str("stdout").unwrap(), LogTarget::Stdout);
        assert_eq!(LogTarget::from_str("stderr").unwrap(), LogTarget::Stderr);
        assert!(LogTarget::from_str("syslog").is_err());
        assert_eq!(LogTarget::Stdout.to_string(), "stdout");
    }
}
