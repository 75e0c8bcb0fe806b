//! Viewport-driven preloading
//!
//! Links that stay on screen for the configured delay are preloaded at low
//! priority. Leaving the viewport before the delay cancels the pending timer,
//! and an element that fired is not observed again until the next rescan.

use crate::{
    Candidate, CandidateSource, ElementId, Preload, PreloadCoordinator, PreloadOptions,
    ResourceKey,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Host viewport observation service
pub trait ObservationSource: Send + Sync {
    /// Start reporting intersections for an element
    fn observe(&self, element: ElementId);

    /// Stop reporting intersections for an element
    fn unobserve(&self, element: ElementId);

    /// Stop reporting for every element
    fn disconnect(&self);
}

/// Intersection change reported by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    /// Element whose visibility changed
    pub element: ElementId,
    /// Visible fraction of the element
    pub ratio: f32,
}

impl IntersectionEntry {
    /// Create an entry
    pub fn new(element: ElementId, ratio: f32) -> Self {
        Self { element, ratio }
    }
}

struct Watched {
    candidate: Candidate,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct TrackerInner {
    coordinator: PreloadCoordinator,
    source: Arc<dyn ObservationSource>,
    candidates: Arc<dyn CandidateSource>,
    threshold: f32,
    delay: Duration,
    containers: Vec<String>,
    watched: DashMap<ElementId, Watched>,
    generation: AtomicU64,
    running: AtomicBool,
}

/// Debounced visibility tracker.
///
/// Per element the states are: observed but not visible, visible with a
/// pending timer, and eligible. Eligible elements are dropped from the
/// tracker and unobserved until the next rescan.
#[derive(Clone)]
pub struct VisibilityTracker {
    inner: Arc<TrackerInner>,
}

impl VisibilityTracker {
    /// Create a tracker using the coordinator's visibility settings
    pub fn new(
        coordinator: PreloadCoordinator,
        source: Arc<dyn ObservationSource>,
        candidates: Arc<dyn CandidateSource>,
    ) -> Self {
        let visibility = coordinator.config().visibility.clone();

        Self {
            inner: Arc::new(TrackerInner {
                threshold: visibility.threshold,
                delay: visibility.delay(),
                containers: visibility.containers,
                coordinator,
                source,
                candidates,
                watched: DashMap::new(),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Start observing the current document
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.rescan();
    }

    /// Forget every element and observe the document afresh.
    ///
    /// Pending timers are cancelled and elements that already fired become
    /// observable again. Returns the number of observed elements.
    pub fn rescan(&self) -> usize {
        if !self.is_running() {
            return 0;
        }

        let inner = &self.inner;
        self.forget_all();

        for candidate in inner.candidates.links(&inner.containers) {
            if inner.watched.contains_key(&candidate.id) {
                continue;
            }
            if let Some(rule) = inner
                .coordinator
                .excluded_by(&candidate, Some(inner.containers.as_slice()))
            {
                trace!("Not observing {} ({}): rule '{}'", candidate.id, candidate.key, rule);
                continue;
            }

            let element = candidate.id;
            inner.watched.insert(
                element,
                Watched {
                    candidate,
                    generation: 0,
                    timer: None,
                },
            );
            inner.source.observe(element);
        }

        debug!("Observing {} links", inner.watched.len());
        inner.watched.len()
    }

    /// Feed an intersection change from the host
    pub fn on_intersection(&self, entry: IntersectionEntry) {
        if !self.is_running() {
            return;
        }

        let intersecting = entry.ratio > 0.0 && entry.ratio >= self.inner.threshold;
        let Some(mut watched) = self.inner.watched.get_mut(&entry.element) else {
            return;
        };

        if intersecting {
            if watched.timer.is_some() {
                return;
            }
            let generation = self.next_generation();
            watched.generation = generation;
            watched.timer = Some(self.arm(entry.element, generation));
            trace!("{} visible, timer armed", entry.element);
        } else {
            if let Some(timer) = watched.timer.take() {
                timer.abort();
                trace!("{} left the viewport, timer cancelled", entry.element);
            }
            watched.generation = self.next_generation();
        }
    }

    /// Stop observing and cancel every pending timer
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.forget_all();
        self.inner.source.disconnect();
    }

    /// Check if the tracker is running
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Check if an element is still observed
    pub fn is_watching(&self, element: ElementId) -> bool {
        self.inner.watched.contains_key(&element)
    }

    /// Number of observed elements
    pub fn watched_count(&self) -> usize {
        self.inner.watched.len()
    }

    /// Cancel timers and unobserve every tracked element
    fn forget_all(&self) {
        let elements: Vec<ElementId> = self
            .inner
            .watched
            .iter_mut()
            .map(|mut entry| {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                *entry.key()
            })
            .collect();

        for element in elements {
            self.inner.watched.remove(&element);
            self.inner.source.unobserve(element);
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn arm(&self, element: ElementId, generation: u64) -> JoinHandle<()> {
        let tracker = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(tracker, element, generation);
        })
    }
}

/// Timer expiry: schedule the element if it never left the viewport
fn fire(tracker: Weak<TrackerInner>, element: ElementId, generation: u64) -> Option<Preload> {
    let inner = tracker.upgrade()?;
    if !inner.running.load(Ordering::SeqCst) {
        return None;
    }

    let (_, watched) = inner
        .watched
        .remove_if(&element, |_, watched| watched.generation == generation)?;
    inner.source.unobserve(element);

    let key: &ResourceKey = &watched.candidate.key;
    debug!("{} stayed visible, preloading {}", element, key);

    Some(inner.coordinator.schedule_element(
        &watched.candidate,
        PreloadOptions::low(),
        Some(inner.containers.as_slice()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeObservationSource, ScriptedFetcher, StaticCandidates};
    use crate::{MemoryCache, PreloadConfig};

    struct Harness {
        tracker: VisibilityTracker,
        source: Arc<FakeObservationSource>,
        fetcher: Arc<ScriptedFetcher>,
    }

    fn harness(candidates: Vec<Candidate>) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::new());
        for candidate in &candidates {
            fetcher.page(candidate.key.clone(), "page");
        }

        let coordinator = PreloadCoordinator::builder(PreloadConfig::default())
            .cache(Arc::new(MemoryCache::new()))
            .fetcher(fetcher.clone())
            .current("https://example.com/")
            .build()
            .unwrap();
        let source = Arc::new(FakeObservationSource::new());
        let tracker = VisibilityTracker::new(
            coordinator,
            source.clone(),
            Arc::new(StaticCandidates::new(candidates)),
        );

        Harness {
            tracker,
            source,
            fetcher,
        }
    }

    fn link(id: u64, path: &str) -> Candidate {
        Candidate::new(id, format!("https://example.com{}", path)).in_container("body")
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_visit_does_not_preload() {
        let h = harness(vec![link(1, "/a")]);
        h.tracker.start();
        assert!(h.source.is_observed(ElementId(1)));

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 0.0));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(h.fetcher.total_calls(), 0);
        assert!(h.tracker.is_watching(ElementId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_visibility_preloads_once() {
        let h = harness(vec![link(1, "/a")]);
        h.tracker.start();

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 0.5));
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(h.fetcher.total_calls(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fetcher.calls(&ResourceKey::from("https://example.com/a")), 1);
        assert!(!h.source.is_observed(ElementId(1)));
        assert!(!h.tracker.is_watching(ElementId(1)));

        // Further reports for a fired element are ignored
        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.fetcher.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentry_restarts_the_delay() {
        let h = harness(vec![link(1, "/a")]);
        h.tracker.start();

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        tokio::time::sleep(Duration::from_millis(400)).await;
        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 0.0));
        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.fetcher.total_calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.fetcher.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_below_threshold_is_not_visible() {
        let h = harness(vec![link(1, "/a")]);
        h.tracker.start();

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 0.1));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_links_are_not_observed() {
        let h = harness(vec![
            link(1, "/"),
            link(2, "/a").ignored(),
            Candidate::new(3, "https://example.com/b").in_container("footer"),
            link(4, "/c"),
        ]);
        h.tracker.start();

        assert_eq!(h.tracker.watched_count(), 1);
        assert!(h.source.is_observed(ElementId(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_resets_timers_and_fired_elements() {
        let h = harness(vec![link(1, "/a"), link(2, "/b")]);
        h.tracker.start();

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!h.source.is_observed(ElementId(1)));

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(2), 1.0));
        assert_eq!(h.tracker.rescan(), 2);
        assert!(h.source.is_observed(ElementId(1)));

        // The timer armed before the rescan no longer fires
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.fetcher.calls(&ResourceKey::from("https://example.com/b")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timers() {
        let h = harness(vec![link(1, "/a")]);
        h.tracker.start();

        h.tracker.on_intersection(IntersectionEntry::new(ElementId(1), 1.0));
        h.tracker.stop();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(h.fetcher.total_calls(), 0);
        assert!(h.source.is_disconnected());
        assert_eq!(h.tracker.rescan(), 0);
    }
}
