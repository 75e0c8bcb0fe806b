//! Fake collaborators for tests
//!
//! Available to this crate's tests and, through the `testing` feature, to
//! downstream crates.

use crate::{
    Candidate, CandidateSource, ElementId, Fetcher, HookEmitter, HookEvent, ObservationSource,
    Page, PreloadError, ResourceKey, Result,
};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Fetcher answering from a script of canned responses.
///
/// Unknown keys fail with a transport error. While paused, every fetch
/// records its start and then waits for [`ScriptedFetcher::resume`].
#[derive(Debug)]
pub struct ScriptedFetcher {
    responses: DashMap<ResourceKey, Result<Page>>,
    calls: DashMap<ResourceKey, usize>,
    order: Mutex<Vec<ResourceKey>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    paused: watch::Sender<bool>,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    /// Create a fetcher with no responses
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            responses: DashMap::new(),
            calls: DashMap::new(),
            order: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            paused,
        }
    }

    /// Answer `key` with a 200 page
    pub fn page(&self, key: impl Into<ResourceKey>, body: impl Into<Bytes>) {
        let key = key.into();
        self.responses
            .insert(key.clone(), Ok(Page::new(key, body)));
    }

    /// Answer `key` with a prepared page
    pub fn respond(&self, key: impl Into<ResourceKey>, page: Page) {
        self.responses.insert(key.into(), Ok(page));
    }

    /// Fail `key`
    pub fn fail(&self, key: impl Into<ResourceKey>, error: PreloadError) {
        self.responses.insert(key.into(), Err(error));
    }

    /// Hold every fetch until resumed
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Release held fetches
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Fetches started for a key
    pub fn calls(&self, key: &ResourceKey) -> usize {
        self.calls.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Fetches started in total
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Keys in the order their fetches started
    pub fn order(&self) -> Vec<ResourceKey> {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of fetches seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, key: &ResourceKey) -> Result<Page> {
        *self.calls.entry(key.clone()).or_insert(0) += 1;
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let mut paused = self.paused.subscribe();
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                break;
            }
        }
        // Give other jobs a chance to overlap with this one
        tokio::task::yield_now().await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.responses.get(key) {
            Some(response) => response.value().clone(),
            None => Err(PreloadError::Transport(format!("no route to {}", key))),
        }
    }
}

/// Hook emitter recording every event
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in emission order
    pub fn events(&self) -> Vec<HookEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event names in emission order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(HookEvent::name).collect()
    }
}

#[async_trait::async_trait]
impl HookEmitter for RecordingHooks {
    async fn notify(&self, event: HookEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Observation source tracking which elements are observed
#[derive(Debug, Default)]
pub struct FakeObservationSource {
    observed: Mutex<HashSet<ElementId>>,
    disconnected: AtomicBool,
}

impl FakeObservationSource {
    /// Create a source observing nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an element is observed
    pub fn is_observed(&self, element: ElementId) -> bool {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&element)
    }

    /// Check if the source was disconnected
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl ObservationSource for FakeObservationSource {
    fn observe(&self, element: ElementId) {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(element);
    }

    fn unobserve(&self, element: ElementId) {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&element);
    }

    fn disconnect(&self) {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Document with a fixed set of links.
///
/// `links` returns every link regardless of container; scoping is left to
/// the exclusion policy.
#[derive(Debug, Default)]
pub struct StaticCandidates {
    links: Mutex<Vec<Candidate>>,
}

impl StaticCandidates {
    /// Create a document with the given links
    pub fn new(links: Vec<Candidate>) -> Self {
        Self {
            links: Mutex::new(links),
        }
    }

    /// Add a link, as if the document changed
    pub fn push(&self, link: Candidate) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(link);
    }
}

impl CandidateSource for StaticCandidates {
    fn links(&self, _containers: &[String]) -> Vec<Candidate> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn marked(&self) -> Vec<Candidate> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|link| link.marked)
            .cloned()
            .collect()
    }
}
