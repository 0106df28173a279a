//! Open-patch container.

use std::fmt;

use crate::graph::object::{Node, ObjectKind};
use crate::graph::schedule::Schedule;

/// Handle to an open patch. Ids are assigned monotonically and never
/// reused within an engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(pub(crate) u32);

impl PatchId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One open patch: its objects, compiled signal schedule, and the outlet
/// buffer pool the schedule writes into.
#[derive(Debug)]
pub(crate) struct Patch {
    pub name: String,
    pub nodes: Vec<Node>,
    pub schedule: Schedule,
    /// Signal outlet buffers, indexed by the schedule's pool slots.
    pub pool: Vec<Vec<f32>>,
    /// Array names declared by this patch, unregistered on close.
    pub array_names: Vec<String>,
}

impl Patch {
    /// Names this patch contributes as bus endpoints, for registration
    /// and unregistration: `(name, is_receive)`.
    pub(crate) fn endpoint_names(&self) -> impl Iterator<Item = (&str, bool)> {
        self.nodes.iter().filter_map(|node| match &node.kind {
            ObjectKind::Receive { name } => Some((name.as_str(), true)),
            ObjectKind::Send { name } => Some((name.as_str(), false)),
            _ => None,
        })
    }
}
