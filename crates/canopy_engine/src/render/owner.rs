//! Drawable owners and registration filters

use crate::foundation::collections::DrawOperationId;
use crate::foundation::math::Vec2;
use crate::render::backend::GraphicsBackend;
use crate::render::operation::DrawOperation;
use crate::scene::DrawGate;

/// Where an operation lands in this frame's draw queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    /// Lower priorities are drawn first (bottom-most)
    pub priority: i32,
    /// Offset passed to the draw step
    pub offset: Vec2,
}

impl Contribution {
    /// Contribution at `priority` with no offset
    pub fn at(priority: i32) -> Self {
        Self {
            priority,
            offset: Vec2::zeros(),
        }
    }

    /// Replace the offset
    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }
}

/// The entity a draw operation draws on behalf of
///
/// Asked once per frame whether (and where) its operation should be drawn.
pub trait DrawableOwner: Send + Sync + 'static {
    /// Contribution for `operation` this frame, or `None` to sit the frame out
    fn contribute(&self, operation: DrawOperationId) -> Option<Contribution>;
}

/// A node's draw gate: drawn at priority 0 while the node is in a ready scene
impl DrawableOwner for DrawGate {
    fn contribute(&self, _operation: DrawOperationId) -> Option<Contribution> {
        self.is_open().then(|| Contribution::at(0))
    }
}

/// Node-owned drawable with its own priority and offset
#[derive(Debug, Clone)]
pub struct GatedOwner {
    gate: DrawGate,
    contribution: Contribution,
}

impl GatedOwner {
    /// Draw at `priority` whenever `gate` is open
    pub fn new(gate: DrawGate, priority: i32) -> Self {
        Self {
            gate,
            contribution: Contribution::at(priority),
        }
    }

    /// Replace the offset
    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.contribution.offset = offset;
        self
    }
}

impl DrawableOwner for GatedOwner {
    fn contribute(&self, _operation: DrawOperationId) -> Option<Contribution> {
        self.gate.is_open().then_some(self.contribution)
    }
}

/// Owner that always contributes the same way (overlays, backgrounds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticOwner(pub Contribution);

impl StaticOwner {
    /// Always drawn at `priority`
    pub fn at(priority: i32) -> Self {
        Self(Contribution::at(priority))
    }
}

impl DrawableOwner for StaticOwner {
    fn contribute(&self, _operation: DrawOperationId) -> Option<Contribution> {
        Some(self.0)
    }
}

impl<F> DrawableOwner for F
where
    F: Fn(DrawOperationId) -> Option<Contribution> + Send + Sync + 'static,
{
    fn contribute(&self, operation: DrawOperationId) -> Option<Contribution> {
        self(operation)
    }
}

/// Veto hook consulted before an operation is registered
pub trait RegistrationFilter<B: GraphicsBackend>: Send + Sync {
    /// Accept or refuse `operation`, with a reason
    fn accept(&self, operation: &dyn DrawOperation<B>) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::HandleMap;

    fn some_id() -> DrawOperationId {
        let mut map: HandleMap<DrawOperationId, ()> = HandleMap::with_key();
        map.insert(())
    }

    #[test]
    fn test_gated_owner_follows_gate() {
        let gate = DrawGate::new();
        let owner = GatedOwner::new(gate.clone(), 5).with_offset(Vec2::new(1.0, 2.0));
        assert_eq!(owner.contribute(some_id()), None);

        gate.set(true);
        let contribution = owner.contribute(some_id()).unwrap();
        assert_eq!(contribution.priority, 5);
        assert_eq!(contribution.offset, Vec2::new(1.0, 2.0));
    }

    #[test]
    fn test_closure_owner() {
        let owner = |_id: DrawOperationId| Some(Contribution::at(-3));
        assert_eq!(owner.contribute(some_id()).map(|c| c.priority), Some(-3));
    }
}
