//! Shared fakes for integration tests
#![allow(dead_code)]

use dashmap::DashMap;
use harbinger::{
    Cache, Candidate, CandidateSource, ElementId, Fetcher, MemoryCache, ObservationSource, Page,
    PreloadConfig, PreloadCoordinator, PreloadError, ResourceKey, Result,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fetcher that takes `latency` per request and serves every key under
/// `/ok`; anything else fails.
pub struct SlowFetcher {
    latency: Duration,
    calls: DashMap<ResourceKey, usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls
            .get(&ResourceKey::from(key))
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, key: &ResourceKey) -> Result<Page> {
        *self.calls.entry(key.clone()).or_insert(0) += 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if key.as_str().contains("/ok") {
            Ok(Page::new(key.clone(), format!("<html>{}</html>", key)))
        } else {
            Err(PreloadError::Transport(format!("connection refused: {}", key)))
        }
    }
}

#[derive(Default)]
pub struct Document {
    links: Vec<Candidate>,
    observed: Mutex<HashSet<ElementId>>,
}

impl Document {
    pub fn new(links: Vec<Candidate>) -> Self {
        Self {
            links,
            observed: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_observed(&self, element: ElementId) -> bool {
        self.observed.lock().unwrap().contains(&element)
    }
}

impl CandidateSource for Document {
    fn links(&self, containers: &[String]) -> Vec<Candidate> {
        self.links
            .iter()
            .filter(|link| {
                link.container
                    .as_ref()
                    .is_some_and(|c| containers.contains(c))
            })
            .cloned()
            .collect()
    }

    fn marked(&self) -> Vec<Candidate> {
        self.links.iter().filter(|link| link.marked).cloned().collect()
    }
}

impl ObservationSource for Document {
    fn observe(&self, element: ElementId) {
        self.observed.lock().unwrap().insert(element);
    }

    fn unobserve(&self, element: ElementId) {
        self.observed.lock().unwrap().remove(&element);
    }

    fn disconnect(&self) {
        self.observed.lock().unwrap().clear();
    }
}

pub fn coordinator(
    config: PreloadConfig,
    fetcher: Arc<SlowFetcher>,
) -> (PreloadCoordinator, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let coordinator = PreloadCoordinator::builder(config)
        .cache(cache.clone() as Arc<dyn Cache>)
        .fetcher(fetcher)
        .current("https://site.test/")
        .build()
        .unwrap();
    (coordinator, cache)
}
