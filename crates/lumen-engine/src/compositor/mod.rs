//! Render-graph compositor.
//!
//! A [`Compositor`] owns a tree of pass [`Node`]s, orders them by their links
//! and runs them once per frame through a [`Backend`], drawing render
//! targets from a [`TexturePool`].
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`backend`] | `Backend` contract, bindings, render targets |
//! | [`texture`] | `TextureDesc` pool key, `TextureParams` |
//! | [`pool`] | `TexturePool` |
//! | [`node`] | `Node`, pins, scene/filter/texture/group kinds |
//! | [`schedule`] | link resolution and ordering |
//! | [`graph`] | `Compositor`, per-frame execution |
//! | [`desc`], [`builder`] | JSON description and graph construction |
//! | [`headless`] | CPU backend for tests and dry runs |

pub mod backend;
pub mod builder;
pub mod desc;
pub mod error;
pub mod graph;
pub mod headless;
pub mod node;
pub mod pool;
pub mod schedule;
pub mod texture;

pub use backend::{
    Attachment, AttachmentPoint, Backend, BackendError, Binding, BindingValue, Defines, RenderTarget, ShaderProgram,
};
pub use builder::{
    build_compositor, load_graph_file, BuildContext, BuildError, Built, ShaderLibrary, TextureLoad, TextureLoader,
    TexturePath,
};
pub use desc::GraphDesc;
pub use error::CompositorError;
pub use graph::{Compositor, CompositorConfig, FrameStats};
pub use node::{
    FilterPass, GroupNode, Node, NodeKind, OutputDesc, PinRef, SceneRenderer, TextureSource, Uniform, TEXTURE_PIN,
};
pub use pool::TexturePool;
pub use schedule::ExecutionPlan;
pub use texture::{FilterMode, TextureDesc, TextureFormat, TextureParams, WrapMode};
