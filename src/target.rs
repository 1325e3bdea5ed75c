//! Acquisition targets.
//!
//! A target is the fully-qualified domain name to register. Names are
//! trimmed and lower-cased on construction so the same domain given twice
//! (config file plus `--domain`) is only chased once.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DropcatchError, Result};

/// A domain name to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Normalise and validate a domain name.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();

        if name.is_empty() {
            return Err(DropcatchError::InvalidTarget("empty domain name".to_string()));
        }
        if name.chars().any(|c| c.is_whitespace()) {
            return Err(DropcatchError::InvalidTarget(format!("'{}' contains whitespace", raw)));
        }
        if !name.contains('.') {
            return Err(DropcatchError::InvalidTarget(format!("'{}' has no top-level domain", raw)));
        }
        if name.split('.').any(str::is_empty) {
            return Err(DropcatchError::InvalidTarget(format!("'{}' has an empty label", raw)));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse every name, dropping duplicates while keeping first-seen order.
pub fn collect_targets<I, S>(names: I) -> Result<Vec<Target>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut targets: Vec<Target> = Vec::new();
    for name in names {
        let target = Target::parse(name.as_ref())?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let target = Target::parse("  Example.SE ").unwrap();
        assert_eq!(target.as_str(), "example.se");
    }

    #[test]
    fn test_parse_strips_trailing_dot() {
        let target = Target::parse("example.nu.").unwrap();
        assert_eq!(target.to_string(), "example.nu");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Target::parse("   "), Err(DropcatchError::InvalidTarget(_))));
    }

    #[test]
    fn test_parse_rejects_missing_tld() {
        assert!(Target::parse("localhost").is_err());
    }

    #[test]
    fn test_parse_rejects_inner_whitespace() {
        assert!(Target::parse("exa mple.se").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_label() {
        assert!(Target::parse("example..se").is_err());
    }

    #[test]
    fn test_collect_targets_dedupes_in_order() {
        let targets = collect_targets(["b.se", "a.se", "B.SE", "c.nu"]).unwrap();
        let names: Vec<&str> = targets.iter().map(Target::as_str).collect();
        assert_eq!(names, vec!["b.se", "a.se", "c.nu"]);
    }

    #[test]
    fn test_collect_targets_propagates_invalid() {
        assert!(collect_targets(["good.se", ""]).is_err());
    }
}
