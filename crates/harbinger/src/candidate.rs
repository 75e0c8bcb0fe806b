//! Link elements that may be preloaded

use crate::ResourceKey;
use std::fmt;

/// Opaque handle for an element owned by the host document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A link element the host found in its document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Element handle
    pub id: ElementId,
    /// Normalized link target
    pub key: ResourceKey,
    /// Container selector the element was found under
    pub container: Option<String>,
    /// Element carries an explicit ignore marker
    pub ignored: bool,
    /// Element is marked for batch preloading
    pub marked: bool,
}

impl Candidate {
    /// Create a candidate for a link
    pub fn new(id: u64, key: impl Into<ResourceKey>) -> Self {
        Self {
            id: ElementId(id),
            key: key.into(),
            container: None,
            ignored: false,
            marked: false,
        }
    }

    /// Set the enclosing container
    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Mark the element as ignored
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Mark the element for batch preloading
    pub fn marked(mut self) -> Self {
        self.marked = true;
        self
    }
}

/// Host document query interface.
///
/// Stands in for the selector queries the host runs against its document.
pub trait CandidateSource: Send + Sync {
    /// Links found under any of the given containers
    fn links(&self, containers: &[String]) -> Vec<Candidate>;

    /// Links marked for batch preloading
    fn marked(&self) -> Vec<Candidate>;
}
