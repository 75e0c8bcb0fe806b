//! Speculative Page Preloading
//!
//! This crate decides which pages to fetch before the user navigates to
//! them, based on:
//! - Sustained link visibility (debounced)
//! - Attention signals: hover, touch and focus
//! - Explicitly marked links and the current page
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Preloader                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Visibility Tracker ──(low)──┐                               │
//! │  Attention Trigger ──(high)──┼──> Preload Coordinator        │
//! │  Marked links ──────(low)────┘         │                     │
//! │                                        ↓                     │
//! │         cached? ─> pending? ─> excluded? ─> degraded?        │
//! │                                        │                     │
//! │  ┌─────────────────────────────────────↓────────────────┐   │
//! │  │                  Task Queue                           │   │
//! │  │   High: [hovered, focused]        FIFO               │   │
//! │  │   Low:  [visible, marked]         FIFO               │   │
//! │  │   Active: <= concurrency limit                        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache, transport, hooks and document access are injected as traits,
//! so the engine itself holds no global state.

mod attention;
mod cache;
mod candidate;
mod config;
mod coordinator;
mod error;
mod hooks;
mod policy;
mod preloader;
mod queue;
mod types;
mod visibility;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attention::{
    AttentionTrigger, DevicePointer, InteractionEvent, InteractionKind, PointerCapabilities,
};
pub use cache::{Cache, CacheStats, MemoryCache};
pub use candidate::{Candidate, CandidateSource, ElementId};
pub use config::{PreloadConfig, VisibilityConfig};
pub use coordinator::{
    CoordinatorBuilder, CoordinatorStats, Fetcher, Preload, PreloadCoordinator, PreloadFuture,
    PreloadInput, PreloadOutput, SkipReason,
};
pub use error::{ConfigError, PreloadError, Result};
pub use hooks::{ChannelHooks, HookEmitter, HookEvent, NoopHooks, TracingHooks};
pub use policy::{
    AlwaysOnline, ConnectionInfo, CrossOrigin, ExclusionPolicy, ExclusionRule, IgnoreMarker,
    IgnoreRule, NetworkCondition, OutsideContainers, PolicyContext, SameAsCurrent,
};
pub use preloader::{HostServices, Preloader};
pub use queue::{ActiveSlot, Admission, QueueStats, TaskQueue};
pub use types::{Page, Priority, PreloadOptions, ResourceKey};
pub use visibility::{IntersectionEntry, ObservationSource, VisibilityTracker};

/// Default number of preloads allowed to run at once
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Cache, Fetcher, HookEmitter, Page, Preload, PreloadConfig, PreloadCoordinator,
        PreloadError, PreloadOptions, Preloader, Priority, ResourceKey, Result,
    };
}
