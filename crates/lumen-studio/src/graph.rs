//! Graph loading and construction shared by the viewer and dry runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use lumen_engine::compositor::{
    build_compositor, load_graph_file, Backend, BuildContext, Compositor, GraphDesc, ShaderLibrary, TextureLoader,
};

use crate::scene::{self, SceneClock};

/// Built-in filters, available to graphs as `#source(name)`.
pub fn shader_library() -> ShaderLibrary {
    ShaderLibrary::new()
        .with("bright", include_str!("../assets/shaders/bright.wgsl"))
        .with("blur", include_str!("../assets/shaders/blur.wgsl"))
        .with("trail", include_str!("../assets/shaders/trail.wgsl"))
        .with("composite", include_str!("../assets/shaders/composite.wgsl"))
}

/// A parsed graph description and the directory its textures live in.
#[derive(Debug, Clone)]
pub struct GraphSource {
    pub desc: GraphDesc,
    pub texture_root: PathBuf,
}

impl GraphSource {
    /// Loads `path`; textures resolve against `textures`, or the graph's
    /// directory when `None`.
    pub fn load(path: &Path, textures: Option<PathBuf>) -> Result<Self> {
        let desc = load_graph_file(path).with_context(|| format!("failed to load graph {}", path.display()))?;
        let texture_root = textures.unwrap_or_else(|| {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        info!("loaded {} ({} nodes)", path.display(), desc.nodes.len());
        Ok(Self { desc, texture_root })
    }
}

/// Builds a compositor for `source` on `backend`.
pub fn build<B: Backend + 'static>(
    source: &GraphSource,
    backend: &mut B,
    loader: &mut dyn TextureLoader<B>,
    clock: &SceneClock,
) -> Result<Compositor<B>> {
    let mut ctx = BuildContext::new(backend)
        .with_shaders(shader_library())
        .with_loader(loader)
        .with_texture_root(source.texture_root.clone())
        .with_scene_factory(scene::factory(clock.clone()));
    let built = build_compositor(&source.desc, &mut ctx).context("failed to build the compositor graph")?;

    let failed = built.failed_loads().count();
    if failed > 0 {
        warn!("{failed} of {} textures failed to load; their inputs read blank", built.texture_loads.len());
    }
    Ok(built.compositor)
}
