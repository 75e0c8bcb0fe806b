//! Exclusion rules and network condition checks
//!
//! Rules run in a fixed order and the first one that excludes a key wins.
//! A rule only ever says "do not preload"; nothing here can force a fetch.

use crate::{Candidate, ResourceKey};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Context passed to every exclusion rule
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyContext<'a> {
    /// Resource currently displayed
    pub current: Option<&'a ResourceKey>,
    /// Element the request came from, if any
    pub candidate: Option<&'a Candidate>,
    /// Containers scoping the request; `None` disables the container check
    pub containers: Option<&'a [String]>,
}

/// A single exclusion predicate
pub trait ExclusionRule: Send + Sync {
    /// Rule name, reported when it rejects a key
    fn name(&self) -> &'static str;

    /// Returns `true` if the key must not be preloaded
    fn excludes(&self, key: &ResourceKey, ctx: &PolicyContext<'_>) -> bool;
}

/// Ordered list of exclusion rules
#[derive(Clone, Default)]
pub struct ExclusionPolicy {
    rules: Vec<Arc<dyn ExclusionRule>>,
}

impl ExclusionPolicy {
    /// Create an empty policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Default pipeline: ignore marker, ignore list, cross origin,
    /// containers, then same-as-current
    pub fn standard(origin: Option<Url>, ignore: &[String]) -> Self {
        let mut policy = Self::new()
            .with_rule(IgnoreMarker)
            .with_rule(IgnoreRule::patterns(ignore.iter().cloned()));

        if let Some(origin) = origin {
            policy = policy.with_rule(CrossOrigin::new(&origin));
        }

        policy.with_rule(OutsideContainers).with_rule(SameAsCurrent)
    }

    /// Append a rule
    pub fn with_rule(mut self, rule: impl ExclusionRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Append a shared rule
    pub fn push(&mut self, rule: Arc<dyn ExclusionRule>) {
        self.rules.push(rule);
    }

    /// Name of the first rule that excludes the key
    pub fn first_match(&self, key: &ResourceKey, ctx: &PolicyContext<'_>) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.excludes(key, ctx))
            .map(|rule| rule.name())
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the policy has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for ExclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| rule.name()))
            .finish()
    }
}

/// Explicit ignore rules.
///
/// A pattern ending in `*` matches by prefix, anything else must match
/// exactly. An optional predicate covers whatever patterns cannot express.
#[derive(Clone, Default)]
pub struct IgnoreRule {
    exact: Vec<String>,
    prefixes: Vec<String>,
    predicate: Option<Arc<dyn Fn(&ResourceKey) -> bool + Send + Sync>>,
}

impl IgnoreRule {
    /// Build from patterns
    pub fn patterns(patterns: impl IntoIterator<Item = String>) -> Self {
        let mut rule = Self::default();
        for pattern in patterns {
            match pattern.strip_suffix('*') {
                Some(prefix) => rule.prefixes.push(prefix.to_string()),
                None => rule.exact.push(pattern),
            }
        }
        rule
    }

    /// Build from a predicate
    pub fn from_fn(predicate: impl Fn(&ResourceKey) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Some(Arc::new(predicate)),
            ..Self::default()
        }
    }
}

impl ExclusionRule for IgnoreRule {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn excludes(&self, key: &ResourceKey, _ctx: &PolicyContext<'_>) -> bool {
        let url = key.as_str();
        self.exact.iter().any(|exact| exact == url)
            || self.prefixes.iter().any(|prefix| url.starts_with(prefix.as_str()))
            || self.predicate.as_ref().is_some_and(|predicate| predicate(key))
    }
}

/// Rejects elements carrying the ignore marker
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreMarker;

impl ExclusionRule for IgnoreMarker {
    fn name(&self) -> &'static str {
        "ignore-marker"
    }

    fn excludes(&self, _key: &ResourceKey, ctx: &PolicyContext<'_>) -> bool {
        ctx.candidate.is_some_and(|candidate| candidate.ignored)
    }
}

/// Rejects the resource that is currently displayed
#[derive(Debug, Clone, Copy, Default)]
pub struct SameAsCurrent;

impl ExclusionRule for SameAsCurrent {
    fn name(&self) -> &'static str {
        "same-as-current"
    }

    fn excludes(&self, key: &ResourceKey, ctx: &PolicyContext<'_>) -> bool {
        ctx.current == Some(key)
    }
}

/// Rejects keys on a different origin.
///
/// Keys that do not parse as absolute URLs are rejected too, since their
/// origin cannot be established.
#[derive(Debug, Clone)]
pub struct CrossOrigin {
    origin: url::Origin,
}

impl CrossOrigin {
    /// Allow only the origin of `base`
    pub fn new(base: &Url) -> Self {
        Self {
            origin: base.origin(),
        }
    }
}

impl ExclusionRule for CrossOrigin {
    fn name(&self) -> &'static str {
        "cross-origin"
    }

    fn excludes(&self, key: &ResourceKey, _ctx: &PolicyContext<'_>) -> bool {
        match Url::parse(key.as_str()) {
            Ok(url) => url.origin() != self.origin,
            Err(_) => true,
        }
    }
}

/// Rejects elements found outside the configured containers
#[derive(Debug, Clone, Copy, Default)]
pub struct OutsideContainers;

impl ExclusionRule for OutsideContainers {
    fn name(&self) -> &'static str {
        "outside-containers"
    }

    fn excludes(&self, _key: &ResourceKey, ctx: &PolicyContext<'_>) -> bool {
        let (Some(candidate), Some(containers)) = (ctx.candidate, ctx.containers) else {
            return false;
        };
        match &candidate.container {
            Some(container) => !containers.iter().any(|c| c == container),
            None => true,
        }
    }
}

/// Network check consulted before every new preload.
///
/// Returning `false` suppresses new submissions; work already queued or
/// running is not affected.
pub trait NetworkCondition: Send + Sync {
    /// Check if the connection allows background fetching
    fn allows_preload(&self) -> bool;
}

/// Condition that always allows preloading
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl NetworkCondition for AlwaysOnline {
    fn allows_preload(&self) -> bool {
        true
    }
}

/// Connection hints reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// User asked for reduced data usage
    pub save_data: bool,
    /// Effective connection type (`slow-2g`, `2g`, `3g`, `4g`)
    pub effective_type: Option<String>,
}

impl ConnectionInfo {
    /// Create connection info from host hints
    pub fn new(save_data: bool, effective_type: Option<&str>) -> Self {
        Self {
            save_data,
            effective_type: effective_type.map(str::to_string),
        }
    }
}

impl NetworkCondition for ConnectionInfo {
    fn allows_preload(&self) -> bool {
        if self.save_data {
            return false;
        }
        !self
            .effective_type
            .as_deref()
            .is_some_and(|kind| kind.ends_with("2g"))
    }
}
