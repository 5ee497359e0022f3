//! Flag > environment > default resolution shared by the portal and dashboard
//! binaries.

use std::env;

/// A non-blank flag wins, then a non-blank `env_key`, then `default`.
pub fn resolve_value(flag: &str, env_key: &str, default: &str) -> String {
    pick(flag, env::var(env_key).ok().as_deref(), default)
}

pub fn env_true(key: &str) -> bool {
    env::var(key).map(|value| is_truthy(&value)).unwrap_or(false)
}

pub fn env_false(key: &str) -> bool {
    env::var(key).map(|value| is_falsy(&value)).unwrap_or(false)
}

fn pick(flag: &str, env_value: Option<&str>, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    match env_value {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_env_beats_default() {
        assert_eq!(pick("ws://flag", Some("ws://env"), "ws://default"), "ws://flag");
        assert_eq!(pick("  ", Some("ws://env"), "ws://default"), "ws://env");
        assert_eq!(pick("", Some(" "), "ws://default"), "ws://default");
        assert_eq!(pick("", None, "ws://default"), "ws://default");
    }

    #[test]
    fn truthiness_is_case_insensitive() {
        assert!(is_truthy(" YES "));
        assert!(is_truthy("on"));
        assert!(!is_truthy("off"));
        assert!(is_falsy("False"));
        assert!(is_falsy("0"));
        assert!(!is_falsy("maybe"));
    }
}
