//! Preload coordinator deciding which keys to fetch and when
//!
//! Every request goes through the same synchronous decision:
//!
//! 1. cached pages are returned as-is, the queue is not touched;
//! 2. a key with a pending preload returns that same shared future;
//! 3. exclusion rules, then the network check, may skip the key;
//! 4. otherwise a shared future is stored and its work is queued.
//!
//! The queued work is the only thing driving the fetch. Callers merely
//! wait on the shared result, so dropping every handle does not abort it.

use crate::{
    Admission, AlwaysOnline, Cache, Candidate, ConfigError, ExclusionPolicy, HookEmitter, HookEvent,
    NetworkCondition, NoopHooks, Page, PolicyContext, PreloadConfig, PreloadError,
    PreloadOptions, Priority, QueueStats, ResourceKey, Result, TaskQueue,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Shared result of a queued or running preload
pub type PreloadFuture = Shared<BoxFuture<'static, Result<Page>>>;

/// Transport collaborator
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a resource.
    ///
    /// Fails on transport errors and on recognized server error signals.
    async fn fetch(&self, key: &ResourceKey) -> Result<Page>;
}

/// Why a request did not produce a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An exclusion rule matched
    Excluded(&'static str),
    /// The network condition check suppressed new preloads
    DegradedNetwork,
    /// There is no current resource to preload
    NoCurrentResource,
}

/// Immediate answer to a preload request
#[derive(Clone)]
pub enum Preload {
    /// The page was already cached
    Cached(Page),
    /// A fetch is queued or running; every request for the key shares it
    Pending(PreloadFuture),
    /// The request was rejected by policy
    Skipped(SkipReason),
}

impl Preload {
    /// Wait for the outcome. Skipped requests resolve to `None`.
    pub async fn resolve(self) -> Result<Option<Page>> {
        match self {
            Preload::Cached(page) => Ok(Some(page)),
            Preload::Pending(future) => future.await.map(Some),
            Preload::Skipped(_) => Ok(None),
        }
    }

    /// Shared future, if a fetch is pending
    pub fn future(&self) -> Option<&PreloadFuture> {
        match self {
            Preload::Pending(future) => Some(future),
            _ => None,
        }
    }

    /// Check if this handle shares its fetch with `other`
    pub fn same_fetch(&self, other: &Preload) -> bool {
        match (self.future(), other.future()) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Check if a fetch is pending
    pub fn is_pending(&self) -> bool {
        matches!(self, Preload::Pending(_))
    }

    /// Check if the page came from the cache
    pub fn is_cached(&self) -> bool {
        matches!(self, Preload::Cached(_))
    }

    /// Skip reason, if the request was rejected
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Preload::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Debug for Preload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preload::Cached(page) => f.debug_tuple("Cached").field(&page.key).finish(),
            Preload::Pending(_) => f.write_str("Pending"),
            Preload::Skipped(reason) => f.debug_tuple("Skipped").field(reason).finish(),
        }
    }
}

/// Input accepted at the embedding boundary
#[derive(Debug, Clone)]
pub enum PreloadInput {
    /// One resource
    Single(ResourceKey),
    /// Several resources, resolved independently
    Many(Vec<ResourceKey>),
    /// A link element; element-aware rules apply
    Element(Candidate),
}

impl From<ResourceKey> for PreloadInput {
    fn from(key: ResourceKey) -> Self {
        PreloadInput::Single(key)
    }
}

impl From<&str> for PreloadInput {
    fn from(url: &str) -> Self {
        PreloadInput::Single(ResourceKey::from(url))
    }
}

impl From<Vec<ResourceKey>> for PreloadInput {
    fn from(keys: Vec<ResourceKey>) -> Self {
        PreloadInput::Many(keys)
    }
}

impl From<Vec<&str>> for PreloadInput {
    fn from(urls: Vec<&str>) -> Self {
        PreloadInput::Many(urls.into_iter().map(ResourceKey::from).collect())
    }
}

impl From<Candidate> for PreloadInput {
    fn from(candidate: Candidate) -> Self {
        PreloadInput::Element(candidate)
    }
}

/// Output matching the shape of a [`PreloadInput`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadOutput {
    /// Result for a single key or element
    Single(Option<Page>),
    /// Per-key results in input order; failures are `None`
    Many(Vec<Option<Page>>),
}

impl PreloadOutput {
    /// Flatten into a list of results
    pub fn into_vec(self) -> Vec<Option<Page>> {
        match self {
            PreloadOutput::Single(page) => vec![page],
            PreloadOutput::Many(pages) => pages,
        }
    }
}

/// Coordinator statistics
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Queue statistics
    pub queue: QueueStats,
    /// Keys with a pending preload
    pub pending: usize,
}

/// Builder for [`PreloadCoordinator`]
pub struct CoordinatorBuilder {
    config: PreloadConfig,
    cache: Option<Arc<dyn Cache>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    policy: Option<ExclusionPolicy>,
    origin: Option<Url>,
    network: Arc<dyn NetworkCondition>,
    hooks: Arc<dyn HookEmitter>,
    current: Option<ResourceKey>,
}

impl CoordinatorBuilder {
    fn new(config: PreloadConfig) -> Self {
        Self {
            config,
            cache: None,
            fetcher: None,
            policy: None,
            origin: None,
            network: Arc::new(AlwaysOnline),
            hooks: Arc::new(NoopHooks),
            current: None,
        }
    }

    /// Set the page cache
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the transport
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the default exclusion pipeline
    pub fn policy(mut self, policy: ExclusionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Restrict the default pipeline to this origin
    pub fn origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set the network condition check
    pub fn network(mut self, network: Arc<dyn NetworkCondition>) -> Self {
        self.network = network;
        self
    }

    /// Set the hook emitter
    pub fn hooks(mut self, hooks: Arc<dyn HookEmitter>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the resource currently displayed
    pub fn current(mut self, key: impl Into<ResourceKey>) -> Self {
        self.current = Some(key.into());
        self
    }

    /// Build the coordinator
    pub fn build(self) -> std::result::Result<PreloadCoordinator, ConfigError> {
        self.config.validate()?;

        let cache = self.cache.ok_or(ConfigError::MissingCollaborator("cache"))?;
        let fetcher = self
            .fetcher
            .ok_or(ConfigError::MissingCollaborator("fetcher"))?;
        let policy = match self.policy {
            Some(policy) => policy,
            None => ExclusionPolicy::standard(self.origin, &self.config.ignore),
        };

        Ok(PreloadCoordinator {
            queue: TaskQueue::new(self.config.concurrency_limit),
            config: Arc::new(self.config),
            cache,
            fetcher,
            policy,
            network: self.network,
            hooks: self.hooks,
            pending: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            current: Arc::new(RwLock::new(self.current)),
        })
    }
}

/// Orchestrates cache checks, deduplication, policy and queueing.
///
/// Cloning is cheap; clones share the queue and the pending map. Separate
/// coordinators built independently never interfere with each other.
#[derive(Clone)]
pub struct PreloadCoordinator {
    config: Arc<PreloadConfig>,
    queue: TaskQueue,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn Fetcher>,
    policy: ExclusionPolicy,
    network: Arc<dyn NetworkCondition>,
    hooks: Arc<dyn HookEmitter>,
    pending: Arc<DashMap<ResourceKey, PreloadFuture>>,
    /// Futures owned by queued or running jobs; `clear` leaves these alone
    in_flight: Arc<DashMap<ResourceKey, PreloadFuture>>,
    current: Arc<RwLock<Option<ResourceKey>>>,
}

impl PreloadCoordinator {
    /// Start building a coordinator
    pub fn builder(config: PreloadConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// Decide on a key and queue it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: impl Into<ResourceKey>, options: PreloadOptions) -> Preload {
        self.decide(key.into(), options.priority, Some((None, None)))
    }

    /// Decide on a link element, applying element-aware rules.
    ///
    /// `containers` enables the container check when given.
    pub fn schedule_element(
        &self,
        candidate: &Candidate,
        options: PreloadOptions,
        containers: Option<&[String]>,
    ) -> Preload {
        self.decide(
            candidate.key.clone(),
            options.priority,
            Some((Some(candidate), containers)),
        )
    }

    /// Name of the exclusion rule rejecting an element, if any.
    ///
    /// Only consults the rules; cache and network state are ignored.
    pub fn excluded_by(
        &self,
        candidate: &Candidate,
        containers: Option<&[String]>,
    ) -> Option<&'static str> {
        let current = self.current();
        let ctx = PolicyContext {
            current: current.as_ref(),
            candidate: Some(candidate),
            containers,
        };
        self.policy.first_match(&candidate.key, &ctx)
    }

    /// Preload a single key and wait for it
    pub async fn preload(
        &self,
        key: impl Into<ResourceKey>,
        options: PreloadOptions,
    ) -> Result<Option<Page>> {
        self.schedule(key, options).resolve().await
    }

    /// Preload several keys. Each resolves on its own; failures become `None`.
    pub async fn preload_many<I, K>(&self, keys: I, options: PreloadOptions) -> Vec<Option<Page>>
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        // Queue everything before waiting so priorities apply to the whole batch
        let handles: Vec<(ResourceKey, Preload)> = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let handle = self.schedule(key.clone(), options);
                (key, handle)
            })
            .collect();

        future::join_all(handles.into_iter().map(|(key, handle)| async move {
            match handle.resolve().await {
                Ok(page) => page,
                Err(e) => {
                    debug!("Batch preload of {} failed: {}", key, e);
                    None
                }
            }
        }))
        .await
    }

    /// Preload whatever the embedding environment passed in
    pub async fn preload_input(
        &self,
        input: impl Into<PreloadInput>,
        options: PreloadOptions,
    ) -> Result<PreloadOutput> {
        match input.into() {
            PreloadInput::Single(key) => self.preload(key, options).await.map(PreloadOutput::Single),
            PreloadInput::Element(candidate) => self
                .schedule_element(&candidate, options, None)
                .resolve()
                .await
                .map(PreloadOutput::Single),
            PreloadInput::Many(keys) => Ok(PreloadOutput::Many(
                self.preload_many(keys, options).await,
            )),
        }
    }

    /// Preload the resource currently displayed.
    ///
    /// Skips the exclusion rules, which would reject the current resource,
    /// but still honors the cache, deduplication and network checks.
    pub fn preload_current(&self) -> Preload {
        match self.current() {
            Some(key) => self.decide(key, Priority::Low, None),
            None => Preload::Skipped(SkipReason::NoCurrentResource),
        }
    }

    /// Shared future of a pending preload, for navigation to reuse
    pub fn pending(&self, key: &ResourceKey) -> Option<PreloadFuture> {
        self.pending.get(key).map(|entry| entry.value().clone())
    }

    /// Check if a preload is pending for the key
    pub fn is_pending(&self, key: &ResourceKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of pending preloads
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget every pending preload.
    ///
    /// Queued and running work still completes. A later request for one of
    /// those keys joins the live job instead of starting another.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Set the resource currently displayed
    pub fn set_current(&self, key: impl Into<ResourceKey>) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(key.into());
    }

    /// Resource currently displayed
    pub fn current(&self) -> Option<ResourceKey> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Configuration in use
    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    /// Queue used for scheduling
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Hook emitter in use
    pub fn hooks(&self) -> &Arc<dyn HookEmitter> {
        &self.hooks
    }

    /// Get coordinator statistics
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            queue: self.queue.stats(),
            pending: self.pending.len(),
        }
    }

    /// `screening` is `None` to bypass the exclusion rules, otherwise the
    /// element and container scope for the rule context.
    fn decide(
        &self,
        key: ResourceKey,
        priority: Priority,
        screening: Option<(Option<&Candidate>, Option<&[String]>)>,
    ) -> Preload {
        if self.cache.has(&key) {
            if let Some(page) = self.cache.get(&key) {
                debug!("Preload of {} served from cache", key);
                return Preload::Cached(page);
            }
        }

        if let Some(existing) = self.pending(&key) {
            if priority.is_high() {
                // Promote the queued job; its own work is kept
                self.queue.add(key.clone(), || async {}, priority);
            }
            return Preload::Pending(existing);
        }

        if let Some((candidate, containers)) = screening {
            let current = self.current();
            let ctx = PolicyContext {
                current: current.as_ref(),
                candidate,
                containers,
            };
            if let Some(rule) = self.policy.first_match(&key, &ctx) {
                debug!("Preload of {} skipped by rule '{}'", key, rule);
                return Preload::Skipped(SkipReason::Excluded(rule));
            }
        }

        if !self.network.allows_preload() {
            debug!("Preload of {} skipped on degraded network", key);
            return Preload::Skipped(SkipReason::DegradedNetwork);
        }

        self.submit(key, priority)
    }

    fn submit(&self, key: ResourceKey, priority: Priority) -> Preload {
        let (tx, rx) = oneshot::channel::<Result<Page>>();
        let future: PreloadFuture = rx
            .map(|received| received.unwrap_or_else(|_| Err(PreloadError::Cancelled)))
            .boxed()
            .shared();

        match self.in_flight.entry(key.clone()) {
            // Still queued or running, e.g. after `clear`
            Entry::Occupied(entry) => {
                // Holding the entry keeps the job's cleanup out until the
                // pending map is consistent again
                let live = self
                    .pending
                    .entry(key.clone())
                    .or_insert_with(|| entry.get().clone())
                    .clone();
                drop(entry);
                debug!("Rejoining live preload of {}", key);
                if priority.is_high() {
                    self.queue.add(key, || async {}, priority);
                }
                return Preload::Pending(live);
            }
            Entry::Vacant(entry) => {
                entry.insert(future.clone());
            }
        }
        self.pending.insert(key.clone(), future.clone());

        let guard = PendingGuard {
            pending: self.pending.clone(),
            in_flight: self.in_flight.clone(),
            key: key.clone(),
            future: future.clone(),
        };
        let fetcher = self.fetcher.clone();
        let cache = self.cache.clone();
        let hooks = self.hooks.clone();
        let job_key = key.clone();

        let admission = self.queue.add_with_slot(
            key.clone(),
            move |slot| async move {
                let result = run_preload(&job_key, fetcher.as_ref(), cache.as_ref(), hooks.as_ref())
                    .await;
                // Free the key in the queue first, so a request racing the
                // cleanup below still finds this future
                slot.release();
                drop(guard);
                let _ = tx.send(result);
            },
            priority,
        );
        if admission != Admission::Queued {
            warn!(
                "Preload of {} not queued ({:?}), key held outside the coordinator",
                key, admission
            );
        }

        Preload::Pending(future)
    }
}

impl fmt::Debug for PreloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadCoordinator")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("pending", &self.pending.len())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Removes a key's entries once its job settles or is dropped unrun.
///
/// Only removes the entries it created, so a newer preload of the same key
/// is left alone.
struct PendingGuard {
    pending: Arc<DashMap<ResourceKey, PreloadFuture>>,
    in_flight: Arc<DashMap<ResourceKey, PreloadFuture>>,
    key: ResourceKey,
    future: PreloadFuture,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.key, |_, existing| existing.ptr_eq(&self.future));
        self.pending
            .remove_if(&self.key, |_, existing| existing.ptr_eq(&self.future));
    }
}

/// The unit of work queued for a key
async fn run_preload(
    key: &ResourceKey,
    fetcher: &dyn Fetcher,
    cache: &dyn Cache,
    hooks: &dyn HookEmitter,
) -> Result<Page> {
    debug!("Fetching {}", key);

    match fetcher.fetch(key).await.and_then(|page| validate(key, page)) {
        Ok(page) => {
            cache.set(key.clone(), page.clone());
            info!("Preloaded {} ({} bytes)", key, page.len());
            hooks
                .notify(HookEvent::PagePreloaded {
                    key: key.clone(),
                    page: page.clone(),
                })
                .await;
            Ok(page)
        }
        Err(error) => {
            warn!("Preload of {} failed: {}", key, error);
            if let PreloadError::ServerError { status, .. } = &error {
                hooks
                    .notify(HookEvent::ServerError {
                        key: key.clone(),
                        status: *status,
                    })
                    .await;
            }
            hooks
                .notify(HookEvent::PreloadFailed {
                    key: key.clone(),
                    error: error.clone(),
                })
                .await;
            Err(error)
        }
    }
}

/// Minimal shape check on a fetched page.
///
/// Transports built on this crate already fail on 5xx; the status check
/// catches custom [`Fetcher`]s that hand back error pages as `Ok`.
fn validate(key: &ResourceKey, page: Page) -> Result<Page> {
    if page.status >= 500 {
        return Err(PreloadError::ServerError {
            key: key.clone(),
            status: page.status,
        });
    }
    if page.is_empty() {
        return Err(PreloadError::MalformedResult {
            key: key.clone(),
            reason: "empty payload".into(),
        });
    }
    Ok(page)
}
