//! Tree protocol errors

use crate::foundation::collections::{ComponentId, NodeId, SceneId};
use crate::scene::node::ParentRef;
use std::fmt;
use thiserror::Error;

/// One side of a rejected pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntity {
    /// A node
    Node(NodeId),
    /// A scene root
    Scene(SceneId),
    /// A component, named since it has no id until installed
    Component(String),
}

impl From<ParentRef> for TreeEntity {
    fn from(parent: ParentRef) -> Self {
        match parent {
            ParentRef::Node(node) => Self::Node(node),
            ParentRef::Scene(scene) => Self::Scene(scene),
        }
    }
}

impl fmt::Display for TreeEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(node) => write!(f, "node {node:?}"),
            Self::Scene(scene) => write!(f, "scene {scene:?}"),
            Self::Component(name) => write!(f, "component '{name}'"),
        }
    }
}

/// Errors raised by the attach/detach/install protocol
///
/// Every variant is a protocol violation or a rejection; none is retried and
/// none leaves the tree partially mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The node handle is stale or was never issued by this tree
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The scene handle is stale or was never issued by this tree
    #[error("Unknown scene {0:?}")]
    UnknownScene(SceneId),

    /// The component handle is stale or was never issued by this tree
    #[error("Unknown component {0:?}")]
    UnknownComponent(ComponentId),

    /// The node already occupies its parent slot
    #[error("Node {node:?} is already attached to {parent}")]
    AlreadyAttached {
        /// Node being attached
        node: NodeId,
        /// Its current parent
        parent: ParentRef,
    },

    /// Detach of a node that has no parent
    #[error("Node {0:?} is not attached")]
    NotAttached(NodeId),

    /// The prospective parent is the child itself or one of its descendants
    #[error("Attaching {child:?} under {parent:?} would create a cycle")]
    CyclicAttachment {
        /// Node being attached
        child: NodeId,
        /// Prospective parent
        parent: NodeId,
    },

    /// A filter vetoed the pairing
    #[error("{subject} rejected {other}: {reason}")]
    Rejected {
        /// Side whose filter said no
        subject: TreeEntity,
        /// The other side of the pairing
        other: TreeEntity,
        /// Reason given by the filter
        reason: String,
    },

    /// The component is installed on a different node
    #[error("Component {component:?} is not owned by node {node:?}")]
    NotOwner {
        /// Node named by the caller
        node: NodeId,
        /// Component named by the caller
        component: ComponentId,
    },
}
