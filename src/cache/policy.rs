//! Per-route caching policy: which strategy, which store, how long.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use super::request::HttpRequest;
use super::storage::StoreClass;
use crate::config::{PatternConfig, PolicyConfig};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How a request is satisfied from network vs. cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Strategy {
  CacheFirst,
  #[default]
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkOnly,
  CacheOnly,
}

impl Strategy {
  pub fn as_str(self) -> &'static str {
    match self {
      Strategy::CacheFirst => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::StaleWhileRevalidate => "stale-while-revalidate",
      Strategy::NetworkOnly => "network-only",
      Strategy::CacheOnly => "cache-only",
    }
  }
}

/// Parses kebab, snake or camel case names. Unknown names fall back to
/// network-first.
impl From<&str> for Strategy {
  fn from(name: &str) -> Self {
    let normalized: String = name
      .chars()
      .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
      .collect::<String>()
      .to_lowercase();

    match normalized.as_str() {
      "cachefirst" => Strategy::CacheFirst,
      "networkfirst" => Strategy::NetworkFirst,
      "stalewhilerevalidate" => Strategy::StaleWhileRevalidate,
      "networkonly" => Strategy::NetworkOnly,
      "cacheonly" => Strategy::CacheOnly,
      _ => {
        tracing::warn!(strategy = name, "Unknown strategy, using network-first");
        Strategy::NetworkFirst
      }
    }
  }
}

impl From<String> for Strategy {
  fn from(name: String) -> Self {
    Strategy::from(name.as_str())
  }
}

impl std::fmt::Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// URL matcher, applied to the full URL string.
#[derive(Debug, Clone)]
pub enum UrlPattern {
  Contains(String),
  Regex(Regex),
}

impl UrlPattern {
  pub fn contains(needle: &str) -> Self {
    UrlPattern::Contains(needle.to_string())
  }

  pub fn regex(pattern: &str) -> Result<Self> {
    Regex::new(pattern)
      .map(UrlPattern::Regex)
      .map_err(|e| eyre!("Invalid URL pattern '{}': {}", pattern, e))
  }

  pub fn matches(&self, url: &str) -> bool {
    match self {
      UrlPattern::Contains(needle) => url.contains(needle.as_str()),
      UrlPattern::Regex(re) => re.is_match(url),
    }
  }
}

impl std::fmt::Display for UrlPattern {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      UrlPattern::Contains(needle) => write!(f, "contains {}", needle),
      UrlPattern::Regex(re) => write!(f, "/{}/", re.as_str()),
    }
  }
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
  pub pattern: UrlPattern,
  pub strategy: Strategy,
  pub store: StoreClass,
  pub max_age: Duration,
}

impl PolicyRule {
  pub fn new(pattern: UrlPattern, strategy: Strategy, store: StoreClass, max_age: Duration) -> Self {
    Self {
      pattern,
      strategy,
      store,
      max_age,
    }
  }

  fn from_config(config: &PolicyConfig) -> Result<Self> {
    let pattern = match &config.pattern {
      PatternConfig::Contains(needle) => UrlPattern::contains(needle),
      PatternConfig::Regex(re) => UrlPattern::regex(re)?,
    };

    Ok(Self::new(
      pattern,
      config.strategy,
      config.store,
      Duration::from_millis(config.max_age_ms),
    ))
  }
}

/// Ordered rules, first match wins, with a catch-all default.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  rules: Vec<PolicyRule>,
  default: PolicyRule,
}

impl PolicyTable {
  pub fn new(rules: Vec<PolicyRule>, default: PolicyRule) -> Self {
    Self { rules, default }
  }

  /// Catch-all applied when nothing else matches.
  pub fn default_rule() -> PolicyRule {
    PolicyRule::new(
      UrlPattern::contains(""),
      Strategy::NetworkFirst,
      StoreClass::Dynamic,
      5 * MINUTE,
    )
  }

  /// The table shipped with the back office.
  pub fn builtin() -> Result<Self> {
    let re = UrlPattern::regex;

    let rules = vec![
      PolicyRule::new(
        re(r"fonts\.(googleapis|gstatic)\.com")?,
        Strategy::CacheFirst,
        StoreClass::Static,
        365 * DAY,
      ),
      PolicyRule::new(
        UrlPattern::contains("/auth/v1/"),
        Strategy::NetworkOnly,
        StoreClass::Api,
        Duration::ZERO,
      ),
      PolicyRule::new(
        UrlPattern::contains("/storage/v1/object/"),
        Strategy::CacheFirst,
        StoreClass::Images,
        30 * DAY,
      ),
      PolicyRule::new(
        UrlPattern::contains("/rest/v1/"),
        Strategy::NetworkFirst,
        StoreClass::Api,
        5 * MINUTE,
      ),
      PolicyRule::new(
        re(r"\.(png|jpe?g|gif|webp|svg|ico|avif)(\?.*)?$")?,
        Strategy::CacheFirst,
        StoreClass::Images,
        30 * DAY,
      ),
      PolicyRule::new(
        re(r"\.(js|css|woff2?|ttf|eot)(\?.*)?$")?,
        Strategy::CacheFirst,
        StoreClass::Static,
        7 * DAY,
      ),
      PolicyRule::new(
        UrlPattern::contains("/properties"),
        Strategy::StaleWhileRevalidate,
        StoreClass::Dynamic,
        HOUR,
      ),
    ];

    Ok(Self::new(rules, Self::default_rule()))
  }

  /// Compile configured rules, using the built-in rules when none are
  /// given. Bad patterns fail here, never in `resolve`.
  pub fn from_config(rules: Option<&[PolicyConfig]>, default: Option<&PolicyConfig>) -> Result<Self> {
    let rules = match rules {
      Some(rules) => rules
        .iter()
        .map(PolicyRule::from_config)
        .collect::<Result<Vec<_>>>()?,
      None => Self::builtin()?.rules,
    };
    let default = match default {
      Some(config) => PolicyRule::from_config(config)?,
      None => Self::default_rule(),
    };
    Ok(Self::new(rules, default))
  }

  /// Pick the rule for a request. Always returns a rule.
  pub fn resolve(&self, request: &HttpRequest) -> &PolicyRule {
    let url = request.url.as_str();
    self
      .rules
      .iter()
      .find(|rule| rule.pattern.matches(url))
      .unwrap_or(&self.default)
  }

  pub fn rules(&self) -> &[PolicyRule] {
    &self.rules
  }

  /// The catch-all rule of this table.
  pub fn resolve_default(&self) -> &PolicyRule {
    &self.default
  }
}
