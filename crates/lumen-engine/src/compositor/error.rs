use lumen_expr::ExprError;

use super::backend::BackendError;

/// Errors raised by graph construction, topology resolution and rendering.
#[derive(thiserror::Error, Debug)]
pub enum CompositorError {
    #[error("node {consumer:?} input {input:?} refers to unknown output {target:?}")]
    UnresolvedLink {
        consumer: String,
        input: String,
        target: String,
    },
    #[error("a node named {0:?} already exists")]
    DuplicateNode(String),
    #[error("no node named {0:?}")]
    UnknownNode(String),
    #[error("node {node:?} has no pin {pin:?}")]
    UnknownPin { node: String, pin: String },
    #[error("graph contains a cycle without a feedback break: {}", .0.join(" -> "))]
    CyclicGraph(Vec<String>),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("output {node}.{pin} resolved to an invalid size {width}x{height}")]
    InvalidSize {
        node: String,
        pin: String,
        width: f64,
        height: f64,
    },
    #[error("texture pool exhausted ({limit} textures)")]
    PoolExhausted { limit: usize },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("node {node:?} failed to render")]
    Node {
        node: String,
        #[source]
        source: BackendError,
    },
}

impl CompositorError {
    /// Structural errors invalidate the graph; the others only affect one frame.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CompositorError::UnresolvedLink { .. }
                | CompositorError::DuplicateNode(_)
                | CompositorError::UnknownNode(_)
                | CompositorError::UnknownPin { .. }
                | CompositorError::CyclicGraph(_)
                | CompositorError::Expr(_)
        )
    }
}
