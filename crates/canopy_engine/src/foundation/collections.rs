//! Specialized collection types
//!
//! Every long-lived object in the runtime is addressed by a generation-checked
//! key: a slot index plus a generation counter. A key whose slot was freed (and
//! possibly reused) no longer resolves, so liveness is a deterministic lookup
//! rather than a question of when some owner happened to drop.

pub use slotmap::{Key, SlotMap};

slotmap::new_key_type! {
    /// Handle to a node in a [`SceneTree`](crate::scene::SceneTree)
    pub struct NodeId;

    /// Handle to a scene root in a [`SceneTree`](crate::scene::SceneTree)
    pub struct SceneId;

    /// Handle to a functional component installed on a node
    pub struct ComponentId;

    /// Handle to a draw operation registered with a render registry
    pub struct DrawOperationId;

    /// Handle to a record scheduled on a time wheel
    pub struct CallId;

    /// Handle to an observer registration
    pub struct SubscriptionId;
}

/// Handle-based map keyed by one of the runtime's key types
pub type HandleMap<K, T> = SlotMap<K, T>;
