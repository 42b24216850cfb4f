use crate::compositor::backend::{Backend, BackendError, RenderTarget};
use crate::coords::Viewport;

/// Scene + camera collaborator drawn by scene passes.
pub trait SceneRenderer<B: Backend> {
    fn render(
        &mut self,
        backend: &mut B,
        target: &RenderTarget<'_, B::Texture>,
        viewport: &Viewport,
    ) -> Result<(), BackendError>;
}

/// Renders a scene into the node's attachments.
pub struct ScenePass<B: Backend> {
    renderer: Box<dyn SceneRenderer<B>>,
}

impl<B: Backend> ScenePass<B> {
    pub fn new(renderer: Box<dyn SceneRenderer<B>>) -> Self {
        Self { renderer }
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn SceneRenderer<B>>) {
        self.renderer = renderer;
    }

    pub(crate) fn render(
        &mut self,
        backend: &mut B,
        target: &RenderTarget<'_, B::Texture>,
        viewport: &Viewport,
    ) -> Result<(), BackendError> {
        backend.clear_target(target)?;
        self.renderer.render(backend, target, viewport)
    }
}
