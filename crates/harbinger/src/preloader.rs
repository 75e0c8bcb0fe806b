//! Lifecycle facade wiring the triggers to the coordinator

use crate::{
    AttentionTrigger, CandidateSource, InteractionEvent, IntersectionEntry, ObservationSource,
    PointerCapabilities, Preload, PreloadCoordinator, PreloadFuture, PreloadOptions,
    ResourceKey, VisibilityTracker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Host-side collaborators the triggers need
pub struct HostServices {
    /// Document link queries
    pub candidates: Arc<dyn CandidateSource>,
    /// Viewport observation
    pub observer: Arc<dyn ObservationSource>,
    /// Device pointer capabilities
    pub pointer: Arc<dyn PointerCapabilities>,
}

/// Preloading engine as seen by the host.
///
/// Owns the visibility tracker and attention trigger and forwards host
/// lifecycle events to them.
pub struct Preloader {
    coordinator: PreloadCoordinator,
    attention: AttentionTrigger,
    visibility: Option<VisibilityTracker>,
    candidates: Arc<dyn CandidateSource>,
    mounted: AtomicBool,
}

impl Preloader {
    /// Create a preloader around a coordinator
    pub fn new(coordinator: PreloadCoordinator, services: HostServices) -> Self {
        let visibility = coordinator.config().visibility.enabled.then(|| {
            VisibilityTracker::new(
                coordinator.clone(),
                services.observer.clone(),
                services.candidates.clone(),
            )
        });
        let attention = AttentionTrigger::new(coordinator.clone(), services.pointer);

        Self {
            coordinator,
            attention,
            visibility,
            candidates: services.candidates,
            mounted: AtomicBool::new(false),
        }
    }

    /// Start preloading for the current document.
    ///
    /// Queues marked links, starts visibility tracking when enabled and
    /// preloads the current resource when configured to.
    pub fn mount(&self) {
        if self.mounted.swap(true, Ordering::SeqCst) {
            return;
        }

        let batch = self.preload_batch();
        if let Some(tracker) = &self.visibility {
            tracker.start();
        }
        if self.coordinator.config().initial_resource_preload {
            self.coordinator.preload_current();
        }

        info!(
            "Preloader mounted ({} marked links, visibility {})",
            batch.len(),
            if self.visibility.is_some() { "on" } else { "off" }
        );
    }

    /// Stop tracking and forget pending preloads
    pub fn unmount(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tracker) = &self.visibility {
            tracker.stop();
        }
        self.coordinator.clear();
        info!("Preloader unmounted");
    }

    /// Handle navigation to a new resource
    pub fn on_page_view(&self, current: impl Into<ResourceKey>) {
        let current = current.into();
        debug!("Page view: {}", current);
        self.coordinator.set_current(current);

        if !self.is_mounted() {
            return;
        }
        self.preload_batch();
        if let Some(tracker) = &self.visibility {
            tracker.rescan();
        }
    }

    /// Queue every marked link at low priority
    pub fn preload_batch(&self) -> Vec<Preload> {
        self.candidates
            .marked()
            .iter()
            .map(|candidate| {
                self.coordinator
                    .schedule_element(candidate, PreloadOptions::low(), None)
            })
            .collect()
    }

    /// Forward a link interaction
    pub async fn on_interaction(&self, event: &InteractionEvent) -> Option<Preload> {
        if !self.is_mounted() {
            return None;
        }
        self.attention.handle(event).await
    }

    /// Forward an intersection change
    pub fn on_intersection(&self, entry: IntersectionEntry) {
        if let Some(tracker) = &self.visibility {
            tracker.on_intersection(entry);
        }
    }

    /// Pending preload a navigation to `key` can reuse
    pub fn pending_for(&self, key: &ResourceKey) -> Option<PreloadFuture> {
        self.coordinator.pending(key)
    }

    /// Check if the preloader is mounted
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Coordinator in use
    pub fn coordinator(&self) -> &PreloadCoordinator {
        &self.coordinator
    }

    /// Visibility tracker, if enabled
    pub fn visibility(&self) -> Option<&VisibilityTracker> {
        self.visibility.as_ref()
    }
}
