//! Host allow-list enforcement.
//!
//! Decides whether a connection may proceed to a target host. The policy is
//! built once from configuration and never changes afterwards.

use crate::config::AccessConfig;

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Host ends with one of the configured suffixes.
    Allowed,
    /// No host could be determined for the request.
    HostMissing,
    /// Host is not on the allow-list.
    Forbidden,
}

/// Suffix-based allow-list.
///
/// Comparison is literal and case-sensitive: `.mobage.jp` does not match
/// `GAME.MOBAGE.JP`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    suffixes: Vec<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(config.allowed_suffixes.iter().cloned())
    }

    /// Check a resolved host (or its absence).
    pub fn check(&self, host: Option<&str>) -> AccessDecision {
        match host {
            None => AccessDecision::HostMissing,
            Some(host) if self.is_allowed(host) => AccessDecision::Allowed,
            Some(_) => AccessDecision::Forbidden,
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}
