//! Environment variable helpers
//!
//! Each reader has a pure `parse_*` counterpart so the parsing rules can be
//! tested without touching the process environment.

use std::str::FromStr;
use tracing::warn;

/// Read a non-empty, trimmed variable
pub fn env_string(name: &str) -> Option<String> {
    parse_string(std::env::var(name).ok().as_deref())
}

/// Read a boolean toggle, falling back to `default` when unset or unparsable
pub fn env_flag(name: &str, default: bool) -> bool {
    let raw = std::env::var(name).ok();
    match parse_flag(raw.as_deref()) {
        Some(v) => v,
        None => {
            if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
                warn!(
                    variable = name,
                    value = %raw,
                    default,
                    "Unrecognised boolean, using default"
                );
            }
            default
        }
    }
}

/// Read and parse a variable; unset or unparsable values yield `None`
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    let parsed = parse_value(Some(&raw));
    if parsed.is_none() {
        warn!(variable = name, value = %raw, "Ignoring unparsable value");
    }
    parsed
}

pub fn parse_string(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off` in any case
pub fn parse_flag(raw: Option<&str>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_value<T: FromStr>(raw: Option<&str>) -> Option<T> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(Some("TRUE")), Some(true));
        assert_eq!(parse_flag(Some(" off ")), Some(false));
        assert_eq!(parse_flag(Some("1")), Some(true));
        assert_eq!(parse_flag(Some("maybe")), None);
        assert_eq!(parse_flag(None), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<usize>(Some(" 4 ")), Some(4));
        assert_eq!(parse_value::<usize>(Some("four")), None);
        assert_eq!(parse_value::<u64>(Some("")), None);
    }

    #[test]
    fn test_parse_string_drops_blank() {
        assert_eq!(parse_string(Some("  ")), None);
        assert_eq!(parse_string(Some(" us-east-1 ")), Some("us-east-1".to_string()));
    }

    #[test]
    fn test_unset_variable_uses_default() {
        assert!(env_flag("MORNING_SNAPSHOT_SURELY_UNSET_FLAG", true));
        assert_eq!(env_parse::<u32>("MORNING_SNAPSHOT_SURELY_UNSET_NUMBER"), None);
    }
}
