//! Core type definitions shared by the queue, coordinator and triggers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Normalized identifier of a fetchable resource (canonical URL).
///
/// Equality is exact string equality. Normalizing the URL is the caller's
/// job; the key only makes it cheap to clone and hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Create a key from an already normalized URL
    pub fn new(url: impl AsRef<str>) -> Self {
        Self(Arc::from(url.as_ref()))
    }

    /// Borrow the underlying URL
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:?})", &*self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for ResourceKey {
    fn from(url: String) -> Self {
        Self(Arc::from(url))
    }
}

impl From<&String> for ResourceKey {
    fn from(url: &String) -> Self {
        Self::new(url)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ResourceKey::from)
    }
}

/// Scheduling class of a preload request.
///
/// Only two classes exist: user intent (hover, touch, focus) runs as
/// `High`, everything passive (visibility, batch, initial page) as `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// User-intent triggered
    High,
    /// Passive/background triggered
    #[default]
    Low,
}

impl Priority {
    /// Check if this is the high class
    pub fn is_high(self) -> bool {
        matches!(self, Priority::High)
    }

    /// Get priority name as string
    pub fn name(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

impl From<bool> for Priority {
    fn from(high: bool) -> Self {
        if high {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fetched resource: the resolved key plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Key the page was fetched for
    pub key: ResourceKey,
    /// Response status reported by the transport
    pub status: u16,
    /// Raw response body
    pub payload: Bytes,
}

impl Page {
    /// Create a page with a 200 status
    pub fn new(key: impl Into<ResourceKey>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            status: 200,
            payload: payload.into(),
        }
    }

    /// Set the response status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload interpreted as UTF-8, if it is valid
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Options accepted by every preload entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadOptions {
    /// Scheduling class
    pub priority: Priority,
}

impl PreloadOptions {
    /// Options for a user-intent request
    pub fn high() -> Self {
        Self {
            priority: Priority::High,
        }
    }

    /// Options for a passive request
    pub fn low() -> Self {
        Self {
            priority: Priority::Low,
        }
    }
}

impl From<Priority> for PreloadOptions {
    fn from(priority: Priority) -> Self {
        Self { priority }
    }
}
