//! Hook notifications emitted by the engine

use crate::{Page, PreloadError, ResourceKey};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

/// Event announced through a [`HookEmitter`]
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// A page was fetched and stored in the cache
    PagePreloaded { key: ResourceKey, page: Page },
    /// A preload failed; the page will be fetched normally on navigation
    PreloadFailed { key: ResourceKey, error: PreloadError },
    /// The server answered with an error signal
    ServerError { key: ResourceKey, status: u16 },
    /// A link was hovered on a hover-capable device
    LinkHover { key: ResourceKey },
}

impl HookEvent {
    /// Hook name as registered by the host
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::PagePreloaded { .. } => "page:preload",
            HookEvent::PreloadFailed { .. } => "page:preload-failed",
            HookEvent::ServerError { .. } => "fetch:error",
            HookEvent::LinkHover { .. } => "link:hover",
        }
    }

    /// Key the event refers to
    pub fn key(&self) -> &ResourceKey {
        match self {
            HookEvent::PagePreloaded { key, .. }
            | HookEvent::PreloadFailed { key, .. }
            | HookEvent::ServerError { key, .. }
            | HookEvent::LinkHover { key } => key,
        }
    }
}

/// Host hook mechanism
#[async_trait::async_trait]
pub trait HookEmitter: Send + Sync {
    /// Announce an event. Completes once the host's handlers have run.
    async fn notify(&self, event: HookEvent);
}

/// Emitter that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait::async_trait]
impl HookEmitter for NoopHooks {
    async fn notify(&self, event: HookEvent) {
        trace!("hook {} for {} ignored", event.name(), event.key());
    }
}

/// Emitter that logs every event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

#[async_trait::async_trait]
impl HookEmitter for TracingHooks {
    async fn notify(&self, event: HookEvent) {
        match &event {
            HookEvent::PagePreloaded { key, page } => {
                info!("Preloaded {} ({} bytes)", key, page.len());
            }
            HookEvent::PreloadFailed { key, error } => {
                warn!("Preload of {} failed: {}", key, error);
            }
            HookEvent::ServerError { key, status } => {
                warn!("Server error {} while preloading {}", status, key);
            }
            HookEvent::LinkHover { key } => {
                trace!("Link hovered: {}", key);
            }
        }
    }
}

/// Emitter forwarding events into a channel
#[derive(Debug, Clone)]
pub struct ChannelHooks {
    tx: mpsc::UnboundedSender<HookEvent>,
}

impl ChannelHooks {
    /// Create an emitter and the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HookEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl HookEmitter for ChannelHooks {
    async fn notify(&self, event: HookEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_hooks_forward() {
        let (hooks, mut rx) = ChannelHooks::new();
        let key = ResourceKey::from("https://example.com/a");

        hooks.notify(HookEvent::LinkHover { key: key.clone() }).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "link:hover");
        assert_eq!(event.key(), &key);
    }

    #[tokio::test]
    async fn test_channel_hooks_without_receiver() {
        let (hooks, rx) = ChannelHooks::new();
        drop(rx);

        hooks
            .notify(HookEvent::ServerError {
                key: ResourceKey::from("https://example.com/a"),
                status: 500,
            })
            .await;
    }
}
