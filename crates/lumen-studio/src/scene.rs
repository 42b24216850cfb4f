//! Procedural scene used for `"type": "scene"` nodes.

use std::cell::Cell;
use std::rc::Rc;

use lumen_engine::compositor::{Backend, BackendError, Binding, Defines, RenderTarget, SceneRenderer};
use lumen_engine::coords::Viewport;

pub const SCENE_SHADER: &str = include_str!("../assets/shaders/scene.wgsl");

/// Animation time shared between the host loop and every scene node.
#[derive(Debug, Clone, Default)]
pub struct SceneClock(Rc<Cell<f32>>);

impl SceneClock {
    pub fn set(&self, seconds: f32) {
        self.0.set(seconds);
    }

    pub fn get(&self) -> f32 {
        self.0.get()
    }
}

/// Draws [`SCENE_SHADER`] with `time` and `aspect` uniforms. The program is
/// compiled on first use.
pub struct ProceduralScene<B: Backend> {
    label: String,
    clock: SceneClock,
    program: Option<B::Program>,
}

impl<B: Backend> ProceduralScene<B> {
    pub fn new(label: impl Into<String>, clock: SceneClock) -> Self {
        Self {
            label: label.into(),
            clock,
            program: None,
        }
    }
}

impl<B: Backend> SceneRenderer<B> for ProceduralScene<B> {
    fn render(
        &mut self,
        backend: &mut B,
        target: &RenderTarget<'_, B::Texture>,
        viewport: &Viewport,
    ) -> Result<(), BackendError> {
        let mut program = match self.program.take() {
            Some(program) => program,
            None => backend.create_program(&self.label, SCENE_SHADER, &Defines::new())?,
        };

        let aspect = viewport.width / viewport.height.max(1.0);
        let bindings = [Binding::float("time", self.clock.get()), Binding::float("aspect", aspect)];
        let result = backend.draw_fullscreen(&mut program, &bindings, target);
        self.program = Some(program);
        result
    }
}

/// Scene factory for [`lumen_engine::compositor::BuildContext::with_scene_factory`].
pub fn factory<B: Backend + 'static>(clock: SceneClock) -> impl FnMut(&str) -> Box<dyn SceneRenderer<B>> {
    move |name: &str| Box::new(ProceduralScene::<B>::new(name, clock.clone())) as Box<dyn SceneRenderer<B>>
}
