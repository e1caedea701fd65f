//! Node scaffolding
//!
//! A node is a network namespace named after the node.

use crate::error::Result;
use crate::wireless::{NodeId, RadioEngine};
use tracing::{debug, info};

/// An emulated host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
}

impl Node {
    /// Create the node's namespace
    pub fn create<E: RadioEngine>(engine: &mut E, name: &str) -> Result<Self> {
        engine.create_namespace(name)?;
        info!(node = name, "node created");
        Ok(Self {
            id: NodeId::new(name),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    /// Stop every process in the node's namespace, then delete it
    ///
    /// Works on a bare name so that nodes of an earlier run can be removed.
    pub fn destroy<E: RadioEngine>(engine: &mut E, name: &str) -> Result<()> {
        for pid in engine.namespace_pids(name)? {
            debug!(node = name, pid, "stopping process");
            engine.terminate_process(pid)?;
        }
        engine.delete_namespace(name)?;
        info!(node = name, "node destroyed");
        Ok(())
    }
}
