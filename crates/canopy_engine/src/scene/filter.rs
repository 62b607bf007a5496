//! Attachment filters
//!
//! Filters are consulted while the tree is locked for the mutation they
//! judge, so they receive handles only and must not call back into the tree.

use crate::foundation::collections::NodeId;
use crate::scene::component::FunctionalComponent;
use crate::scene::node::ParentRef;

/// Veto hooks for attach and install operations
///
/// Every method defaults to accepting. A rejection carries a human-readable
/// reason that ends up in [`TreeError::Rejected`](crate::scene::TreeError::Rejected).
pub trait AttachmentFilter: Send + Sync {
    /// Node `child` is about to be attached under `parent`
    fn accept_parent(&self, _child: NodeId, _parent: ParentRef) -> Result<(), String> {
        Ok(())
    }

    /// `child` is about to become a child of the filtered node or scene
    fn accept_child(&self, _parent: ParentRef, _child: NodeId) -> Result<(), String> {
        Ok(())
    }

    /// `component` is about to be installed on node `owner`
    fn accept_component(&self, _owner: NodeId, _component: &dyn FunctionalComponent) -> Result<(), String> {
        Ok(())
    }
}

/// Filter that refuses components by name
#[derive(Debug, Clone, Default)]
pub struct DenyComponents {
    names: Vec<String>,
}

impl DenyComponents {
    /// Refuse components whose name is in `names`
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl AttachmentFilter for DenyComponents {
    fn accept_component(&self, _owner: NodeId, component: &dyn FunctionalComponent) -> Result<(), String> {
        if self.names.iter().any(|name| name == component.name()) {
            Err(format!("'{}' components are not allowed here", component.name()))
        } else {
            Ok(())
        }
    }
}

/// Filter that only lets a node be attached directly to a scene
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneRootOnly;

impl AttachmentFilter for SceneRootOnly {
    fn accept_parent(&self, _child: NodeId, parent: ParentRef) -> Result<(), String> {
        match parent {
            ParentRef::Scene(_) => Ok(()),
            ParentRef::Node(_) => Err("node may only be attached to a scene".to_string()),
        }
    }
}

/// Filter that refuses every child
#[derive(Debug, Clone, Copy, Default)]
pub struct Leaf;

impl AttachmentFilter for Leaf {
    fn accept_child(&self, _parent: ParentRef, _child: NodeId) -> Result<(), String> {
        Err("leaf nodes cannot have children".to_string())
    }
}
