//! Functional components
//!
//! A component is a piece of behavior owned by exactly one node. It is
//! installed after its owner exists, updated after its owner's hook each
//! frame (in install order), and released no later than its owner's
//! disposal. Release is plain `Drop`: uninstalling removes the tree's handle
//! and the component is dropped once any in-flight update finishes with it.

use crate::foundation::collections::{ComponentId, NodeId};
use crate::scene::node::{HookError, UpdateContext};
use parking_lot::Mutex;
use std::sync::Arc;

/// Component capability
pub trait FunctionalComponent: Send {
    /// Name used in rejection errors and logs
    fn name(&self) -> &str;

    /// Veto installation on `owner`
    fn accepts_owner(&self, _owner: NodeId) -> Result<(), String> {
        Ok(())
    }

    /// Called once, after both filters accepted and before the first update
    ///
    /// Runs with no tree lock held, so the hook may query or mutate the tree.
    fn on_installed(&mut self, _owner: NodeId, _id: ComponentId) {}

    /// Per-frame update, run after the owner's hook allowed propagation
    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<(), HookError>;
}

pub(crate) type SharedComponent = Arc<Mutex<Box<dyn FunctionalComponent>>>;

/// Installed component as stored on its owner
#[derive(Clone)]
pub(crate) struct ComponentSlot {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) component: SharedComponent,
}
