use log::debug;
use lumen_expr::CompiledExpr;

use crate::compositor::backend::{Backend, BackendError, Binding, BindingValue, Defines, RenderTarget, ShaderProgram};
use crate::coords::Viewport;

/// A named value bound to a filter program alongside its input textures.
#[derive(Debug, Clone, PartialEq)]
pub enum Uniform<T> {
    Float(f32),
    Vector(Vec<f32>),
    /// An external texture (not a graph input).
    Texture(T),
    /// Re-evaluated every frame against the unscaled viewport.
    Expr(CompiledExpr),
}

/// Full-screen shader pass.
pub struct FilterPass<B: Backend> {
    fragment: String,
    defines: Defines,
    program: Option<B::Program>,
    dirty: bool,
    parameters: Vec<(String, Uniform<B::Texture>)>,
}

impl<B: Backend> FilterPass<B> {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            defines: Defines::new(),
            program: None,
            dirty: true,
            parameters: Vec::new(),
        }
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn defines(&self) -> &Defines {
        &self.defines
    }

    pub fn program(&self) -> Option<&B::Program> {
        self.program.as_ref()
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: Uniform<B::Texture>) {
        let name = name.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Uniform<B::Texture>> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if self.defines.get(&name) != Some(&value) {
            self.defines.insert(name, value);
            self.dirty = true;
        }
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        let removed = self.defines.remove(name).is_some();
        self.dirty |= removed;
        removed
    }

    /// Compiles the program if it is missing or its defines changed.
    pub fn compile(&mut self, backend: &mut B, label: &str) -> Result<&B::Program, BackendError> {
        if self.dirty || self.program.is_none() {
            debug!("compiling filter program {label:?} ({} defines)", self.defines.len());
            self.program = Some(backend.create_program(label, &self.fragment, &self.defines)?);
            self.dirty = false;
        }
        self.program
            .as_ref()
            .ok_or_else(|| BackendError::Program(format!("{label}: program missing after compile")))
    }

    pub(crate) fn render(
        &mut self,
        backend: &mut B,
        label: &str,
        inputs: &[(String, B::Texture)],
        target: &RenderTarget<'_, B::Texture>,
        viewport: &Viewport,
    ) -> Result<(), BackendError> {
        self.compile(backend, label)?;
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| BackendError::Program(format!("{label}: not compiled")))?;

        // Parameters a define compiled out are not bound.
        let vars = viewport.vars(1.0);
        let evaluated: Vec<Option<f32>> = self
            .parameters
            .iter()
            .map(|(name, v)| {
                program.has_input(name).then(|| match v {
                    Uniform::Expr(e) => e.eval(&vars) as f32,
                    _ => 0.0,
                })
            })
            .collect();

        let mut bindings: Vec<Binding<'_, B::Texture>> =
            Vec::with_capacity(inputs.len() + self.parameters.len());
        for (pin, texture) in inputs {
            bindings.push(Binding::texture(pin, texture));
        }
        for ((name, value), expr_value) in self.parameters.iter().zip(&evaluated) {
            let Some(expr_value) = expr_value else {
                continue;
            };
            let value = match value {
                Uniform::Float(v) => BindingValue::Float(*v),
                Uniform::Vector(v) => BindingValue::Vector(v),
                Uniform::Texture(t) => BindingValue::Texture(t),
                Uniform::Expr(_) => BindingValue::Float(*expr_value),
            };
            bindings.push(Binding { name, value });
        }

        let program = self
            .program
            .as_mut()
            .ok_or_else(|| BackendError::Program(format!("{label}: not compiled")))?;
        backend.draw_fullscreen(program, &bindings, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::headless::HeadlessBackend;

    const TRAIL: &str = r#"
struct Params { gain: f32, decay: f32 };
@group(0) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: FullscreenOut) -> @location(0) vec4<f32> {
#ifdef SHARP
    return vec4<f32>(1.0);
#else
    return vec4<f32>(params.gain * params.decay);
#endif
}
"#;

    fn draw(pass: &mut FilterPass<HeadlessBackend>, b: &mut HeadlessBackend) {
        let viewport = b.viewport();
        pass.render(b, "trail", &[], &RenderTarget::Screen, &viewport).unwrap();
    }

    #[test]
    fn undeclared_parameters_are_not_bound() {
        let mut b = HeadlessBackend::new(Viewport::new(64.0, 64.0, 1.0));
        let mut pass = FilterPass::new(TRAIL);
        pass.set_parameter("gain", Uniform::Float(2.0));
        pass.set_parameter("decay", Uniform::Float(0.5));
        pass.set_parameter("stray", Uniform::Float(1.0));

        draw(&mut pass, &mut b);
        let d = b.last_draw("trail").unwrap();
        assert_eq!(d.float("gain"), Some(2.0));
        assert_eq!(d.float("decay"), Some(0.5));
        assert_eq!(d.float("stray"), None);

        pass.define("SHARP", "");
        draw(&mut pass, &mut b);
        let d = b.last_draw("trail").unwrap();
        assert_eq!(d.float("gain"), None);
        assert_eq!(d.float("decay"), None);
    }
}
