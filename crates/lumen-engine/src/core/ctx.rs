use winit::window::{Window, WindowId};

use crate::coords::Viewport;
use crate::device::{Gpu, SurfaceErrorAction};
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl<'a> WindowCtx<'a> {
    /// Logical size and scale factor of the window.
    pub fn viewport(&self) -> Viewport {
        let size = self.window.inner_size();
        Viewport::from_physical(size.width, size.height, self.window.scale_factor() as f32)
    }
}

/// Per-frame context passed to [`super::App::on_frame`].
///
/// `'a` is the callback duration, `'w` the window borrow carried by `Gpu<'w>`.
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    pub gpu: &'a mut Gpu<'w>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl<'a, 'w> FrameCtx<'a, 'w> {
    /// Acquires the surface image, lets `record` encode work against its
    /// view, then submits the returned command buffers and presents.
    ///
    /// When `record` returns `None` the image is dropped unpresented and the
    /// previously presented frame stays on screen.
    ///
    /// Surface errors skip the frame (after reconfiguring when possible);
    /// a fatal surface error returns [`AppControl::Exit`].
    pub fn render_offscreen<F>(&mut self, record: F) -> AppControl
    where
        F: FnOnce(&Gpu<'w>, &wgpu::TextureView, Viewport) -> Option<Vec<wgpu::CommandBuffer>>,
    {
        let size = self.gpu.size();
        if size.width == 0 || size.height == 0 {
            return AppControl::Continue;
        }

        let dpr = self.window.window.scale_factor() as f32;
        let frame = match self.gpu.begin_frame(dpr) {
            Ok(f) => f,
            Err(err) => {
                return match self.gpu.handle_surface_error(err) {
                    SurfaceErrorAction::Fatal => AppControl::Exit,
                    _ => AppControl::Continue,
                };
            }
        };

        let Some(commands) = record(&*self.gpu, &frame.view, frame.viewport) else {
            drop(frame);
            return AppControl::Continue;
        };

        self.window.window.pre_present_notify();
        self.gpu.present(frame, commands);
        AppControl::Continue
    }
}
