//! Immediate preloading on user attention signals

use crate::{
    Candidate, ElementId, HookEvent, Preload, PreloadCoordinator, PreloadOptions,
};
use std::sync::Arc;
use tracing::trace;

/// Kind of interaction reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// Pointer entered a link
    Hover,
    /// Touch started on a link
    Touch,
    /// Link received keyboard focus
    Focus,
}

/// Interaction on a link element
#[derive(Debug, Clone)]
pub struct InteractionEvent {
    /// Interaction kind
    pub kind: InteractionKind,
    /// Element the event was dispatched to
    pub target: ElementId,
    /// Link the interaction resolved to
    pub candidate: Candidate,
}

impl InteractionEvent {
    /// Create an event dispatched directly to the link
    pub fn new(kind: InteractionKind, candidate: Candidate) -> Self {
        Self {
            kind,
            target: candidate.id,
            candidate,
        }
    }

    /// Set the element the event was dispatched to
    pub fn with_target(mut self, target: ElementId) -> Self {
        self.target = target;
        self
    }
}

/// Pointer capabilities of the host device
pub trait PointerCapabilities: Send + Sync {
    /// Check if the primary pointer can hover
    fn supports_hover(&self) -> bool;
}

/// Primary pointer of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePointer {
    /// Mouse or trackpad
    Fine,
    /// Touch screen
    Coarse,
}

impl PointerCapabilities for DevicePointer {
    fn supports_hover(&self) -> bool {
        matches!(self, DevicePointer::Fine)
    }
}

/// Maps interactions to high-priority preloads.
///
/// Hover only counts on hover-capable devices and only when dispatched to
/// the link itself, not a descendant. Touch only counts where hover is
/// unavailable, so a device never triggers twice for one gesture. Focus
/// always counts.
#[derive(Clone)]
pub struct AttentionTrigger {
    coordinator: PreloadCoordinator,
    pointer: Arc<dyn PointerCapabilities>,
    hover_enabled: bool,
}

impl AttentionTrigger {
    /// Create a trigger using the coordinator's hover setting
    pub fn new(coordinator: PreloadCoordinator, pointer: Arc<dyn PointerCapabilities>) -> Self {
        let hover_enabled = coordinator.config().hover_trigger_enabled;
        Self {
            coordinator,
            pointer,
            hover_enabled,
        }
    }

    /// Check if an interaction would trigger a preload
    pub fn accepts(&self, event: &InteractionEvent) -> bool {
        match event.kind {
            InteractionKind::Hover => {
                self.hover_enabled
                    && self.pointer.supports_hover()
                    && event.target == event.candidate.id
            }
            InteractionKind::Touch => !self.pointer.supports_hover(),
            InteractionKind::Focus => true,
        }
    }

    /// Handle an interaction. Returns `None` if it was ignored.
    pub async fn handle(&self, event: &InteractionEvent) -> Option<Preload> {
        if !self.accepts(event) {
            trace!("Ignoring {:?} on {}", event.kind, event.target);
            return None;
        }

        if event.kind == InteractionKind::Hover {
            self.coordinator
                .hooks()
                .notify(HookEvent::LinkHover {
                    key: event.candidate.key.clone(),
                })
                .await;
        }

        Some(
            self.coordinator
                .schedule_element(&event.candidate, PreloadOptions::high(), None),
        )
    }
}
