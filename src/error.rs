use crate::graph::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// An attach that would have made a node its own ancestor.
///
/// Raised before any link state is touched, so both nodes are left exactly
/// as they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("attaching {leaf} under {trunk} would create a cycle")]
pub struct CycleError {
    pub trunk: NodeId,
    pub leaf: NodeId,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("node {0} no longer exists")]
    StaleNode(NodeId),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("type already defined: {0}")]
    DuplicateType(String),

    #[error("invalid field key: {0:?}")]
    InvalidKey(String),

    #[error("key pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("node {0} is not a reactive container")]
    NotAContainer(NodeId),
}

impl GraphError {
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle(_))
    }
}
