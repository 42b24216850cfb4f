//! Windowed presentation of a graph on the wgpu backend.

use anyhow::Result;
use log::{error, warn};
use lumen_engine::compositor::{Compositor, CompositorError, FrameStats};
use lumen_engine::core::{App, AppControl, FrameCtx};
use lumen_engine::device::Gpu;
use lumen_engine::render::{ImageTextureLoader, WgpuBackend};
use winit::event::WindowEvent;
use winit::window::WindowId;

use crate::graph::{self, GraphSource};
use crate::scene::SceneClock;

struct Live {
    backend: WgpuBackend,
    compositor: Compositor<WgpuBackend>,
}

pub struct Viewer {
    source: GraphSource,
    clock: SceneClock,
    live: Option<Live>,
}

impl Viewer {
    pub fn new(source: GraphSource) -> Self {
        Self {
            source,
            clock: SceneClock::default(),
            live: None,
        }
    }

    fn build(&self, gpu: &Gpu<'_>) -> Result<Live> {
        let mut backend = gpu.create_backend();
        let mut loader = ImageTextureLoader::new();
        let compositor = graph::build(&self.source, &mut backend, &mut loader, &self.clock)?;
        Ok(Live { backend, compositor })
    }
}

impl App for Viewer {
    fn on_gpu_ready(&mut self, _window_id: WindowId, gpu: &Gpu<'_>) -> AppControl {
        match self.build(gpu) {
            Ok(live) => {
                self.live = Some(live);
                AppControl::Continue
            }
            Err(err) => {
                error!("{err:#}");
                AppControl::Exit
            }
        }
    }

    fn on_window_event(&mut self, _window_id: WindowId, event: &WindowEvent) -> AppControl {
        if let WindowEvent::CloseRequested = event {
            if let Some(mut live) = self.live.take() {
                live.compositor.dispose(&mut live.backend);
            }
        }
        AppControl::Continue
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let Some(live) = self.live.as_mut() else {
            return AppControl::Exit;
        };
        self.clock.set(ctx.time.elapsed as f32);

        let mut outcome = Outcome::Present;
        let surface = ctx.render_offscreen(|_gpu, view, viewport| {
            live.backend.begin_frame(Some(view.clone()), viewport);
            outcome = Outcome::of(live.compositor.render(&mut live.backend));
            if outcome == Outcome::Present {
                Some(live.backend.finish_frame().into_iter().collect())
            } else {
                live.backend.discard_frame();
                None
            }
        });

        if surface == AppControl::Exit || outcome == Outcome::Stop {
            AppControl::Exit
        } else {
            AppControl::Continue
        }
    }
}

/// What happens to the surface image after the compositor ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Present,
    /// The frame rolled back; the last presented image stays up.
    Skip,
    /// The graph can never render.
    Stop,
}

impl Outcome {
    fn of(result: Result<FrameStats, CompositorError>) -> Self {
        match result {
            Ok(_) => Outcome::Present,
            Err(err) if err.is_structural() => {
                error!("graph is not renderable: {err}");
                Outcome::Stop
            }
            Err(err) => {
                warn!("frame skipped: {err}");
                Outcome::Skip
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_engine::compositor::BackendError;

    #[test]
    fn only_successful_frames_are_presented() {
        assert_eq!(Outcome::of(Ok(FrameStats::default())), Outcome::Present);

        let draw = CompositorError::Node {
            node: "trail".into(),
            source: BackendError::Draw("lost".into()),
        };
        assert_eq!(Outcome::of(Err(draw)), Outcome::Skip);
        assert_eq!(Outcome::of(Err(CompositorError::PoolExhausted { limit: 4 })), Outcome::Skip);
        assert_eq!(Outcome::of(Err(CompositorError::CyclicGraph(vec!["a".into()]))), Outcome::Stop);
    }
}
