use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{presets::Preset, Result, VizError};

mod backend;
mod compile;
mod uniform;
#[cfg(feature = "gpu")]
mod wgpu_backend;

pub use backend::{DrawRecord, Frame, GpuBackend, HeadlessBackend, HeadlessProgram};
pub use compile::{
    compile_stage, link, CompiledStage, LinkedProgram, UniformBlock, UniformLocation,
};
pub use uniform::{UniformKind, UniformValue};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{WgpuBackend, WgpuProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

struct BoundProgram<P> {
    program: P,
    preset_id: String,
    locations: HashMap<String, UniformLocation>,
    staging: Vec<u8>,
}

/// Owns the single program bound to a rendering surface and the uniform
/// values staged for its next draw.
///
/// Uniform writes land in a CPU-side copy of the uniform block which is
/// uploaded whole right before each draw, so a draw never sees a partially
/// updated set.
pub struct ShaderBinder<B: GpuBackend> {
    backend: B,
    bound: Option<BoundProgram<B::Program>>,
}

impl<B: GpuBackend> ShaderBinder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            bound: None,
        }
    }

    /// Compiles and links `preset`, then replaces the bound program.
    ///
    /// On any failure the previously bound program stays bound and keeps its
    /// staged uniforms.
    pub fn compile(&mut self, preset: &Preset) -> Result<()> {
        let vertex = compile_stage(ShaderStage::Vertex, &preset.shader.vertex)?;
        let fragment = compile_stage(ShaderStage::Fragment, &preset.shader.fragment)?;
        let linked = link(vertex, fragment)?;
        let program = self.backend.create_program(&linked)?;

        let block = linked.uniforms();
        let mut staging = vec![0; block.map_or(0, |block| block.size as usize)];
        let mut locations = HashMap::new();
        for (name, decl) in &preset.uniforms {
            let Some(location) = block.and_then(|block| block.members.get(name)) else {
                tracing::debug!(preset = %preset.id, uniform = %name, "uniform not referenced by shader");
                continue;
            };
            if location.kind != decl.kind() {
                tracing::debug!(
                    preset = %preset.id,
                    uniform = %name,
                    declared = %decl.kind(),
                    shader = %location.kind,
                    "uniform type differs from shader, skipping"
                );
                continue;
            }
            write_value(&mut staging, *location, &decl.value);
            locations.insert(name.clone(), *location);
        }

        tracing::info!(preset = %preset.id, uniforms = locations.len(), "compiled shader program");
        // Assigning drops, and so releases, the previous program.
        self.bound = Some(BoundProgram {
            program,
            preset_id: preset.id.clone(),
            locations,
            staging,
        });
        Ok(())
    }

    /// Stages `value` for the next draw. Unknown names and mismatched kinds
    /// are ignored.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(bound) = self.bound.as_mut() else {
            return;
        };
        match bound.locations.get(name) {
            Some(location) if location.kind == value.kind() => {
                write_value(&mut bound.staging, *location, &value);
            }
            _ => tracing::trace!(uniform = name, "ignoring unresolved uniform"),
        }
    }

    /// Draws once with the bound program and the staged uniforms.
    pub fn render(&mut self) -> Result<()> {
        let bound = self.bound.as_ref().ok_or(VizError::NoProgramBound)?;
        self.backend.draw(&bound.program, &bound.staging)
    }

    /// Releases the bound program and its uniform cache. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(bound) = self.bound.take() {
            tracing::debug!(preset = %bound.preset_id, "released shader program");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn bound_preset(&self) -> Option<&str> {
        self.bound.as_ref().map(|bound| bound.preset_id.as_str())
    }

    pub fn program(&self) -> Option<&B::Program> {
        self.bound.as_ref().map(|bound| &bound.program)
    }

    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.bound
            .as_ref()
            .and_then(|bound| bound.locations.get(name).copied())
    }

    /// Resolved uniform names, sorted.
    pub fn uniform_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .bound
            .iter()
            .flat_map(|bound| bound.locations.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }

    /// The value currently staged for `name`.
    pub fn staged(&self, name: &str) -> Option<UniformValue> {
        let bound = self.bound.as_ref()?;
        let location = bound.locations.get(name)?;
        let start = location.offset as usize;
        let bytes = bound.staging.get(start..start + location.kind.byte_size())?;
        let components: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        UniformValue::from_components(location.kind, &components)
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        self.backend.read_frame()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn write_value(staging: &mut [u8], location: UniformLocation, value: &UniformValue) {
    let bytes: &[u8] = bytemuck::cast_slice(value.components());
    let start = location.offset as usize;
    if let Some(slot) = staging.get_mut(start..start + bytes.len()) {
        slot.copy_from_slice(bytes);
    }
}

impl<B: GpuBackend + fmt::Debug> fmt::Debug for ShaderBinder<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBinder")
            .field("backend", &self.backend)
            .field("bound", &self.bound_preset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{builtin_presets, UniformDecl};

    fn preset(id: &str) -> Preset {
        builtin_presets()
            .into_iter()
            .find(|preset| preset.id == id)
            .unwrap()
    }

    fn binder() -> ShaderBinder<HeadlessBackend> {
        ShaderBinder::new(HeadlessBackend::new(32, 32))
    }

    #[test]
    fn render_before_compile_fails() {
        let mut binder = binder();
        assert!(matches!(binder.render(), Err(VizError::NoProgramBound)));
        assert!(!binder.is_bound());
    }

    #[test]
    fn compile_caches_declared_locations_and_defaults() {
        let mut binder = binder();
        binder.compile(&preset("bass-gradient")).unwrap();

        assert_eq!(binder.uniform_names(), vec!["bass", "high", "mid", "time"]);
        assert_eq!(binder.location("mid").unwrap().offset, 4);
        assert_eq!(binder.staged("bass"), Some(UniformValue::Scalar(0.0)));
    }

    #[test]
    fn declared_but_unreferenced_uniforms_are_skipped() {
        let mut binder = binder();
        let mut noise = preset("noise-pattern");
        noise
            .uniforms
            .insert("glow".into(), UniformDecl::new(UniformValue::Scalar(1.0)));
        binder.compile(&noise).unwrap();

        assert_eq!(binder.uniform_names(), vec!["bass", "time"]);
        assert!(binder.location("glow").is_none());
    }

    #[test]
    fn set_uniform_writes_the_next_draw() {
        let mut binder = binder();
        binder.compile(&preset("bass-gradient")).unwrap();
        binder.set_uniform("bass", UniformValue::Scalar(128.0));
        binder.set_uniform("time", UniformValue::Scalar(2.5));
        binder.render().unwrap();

        let draw = binder.backend().last_draw().unwrap();
        let values: Vec<f32> = draw
            .uniforms
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        assert_eq!(values, vec![128.0, 0.0, 0.0, 2.5]);
    }

    #[test]
    fn unknown_or_mistyped_uniforms_are_ignored() {
        let mut binder = binder();
        binder.set_uniform("bass", UniformValue::Scalar(1.0));

        binder.compile(&preset("bass-gradient")).unwrap();
        let before = binder.uniform_names().len();
        binder.set_uniform("nope", UniformValue::Scalar(9.0));
        binder.set_uniform("bass", UniformValue::Vec2([1.0, 2.0]));

        assert_eq!(binder.uniform_names().len(), before);
        assert!(binder.location("nope").is_none());
        assert_eq!(binder.staged("bass"), Some(UniformValue::Scalar(0.0)));
    }

    #[test]
    fn recompiling_releases_the_previous_program() {
        let mut binder = binder();
        binder.compile(&preset("bass-gradient")).unwrap();
        let first = binder.program().unwrap().id();
        binder.compile(&preset("particle-wave")).unwrap();
        binder.render().unwrap();

        let drawn = binder.backend().last_draw().unwrap().program;
        assert_ne!(drawn, first);
        assert_eq!(Some(drawn), binder.program().map(HeadlessProgram::id));
        assert_eq!(binder.backend().live_programs(), 1);
        assert_eq!(binder.bound_preset(), Some("particle-wave"));
    }

    #[test]
    fn failed_compile_keeps_the_bound_program() {
        let mut binder = binder();
        binder.compile(&preset("bass-gradient")).unwrap();
        binder.set_uniform("bass", UniformValue::Scalar(42.0));
        let bound = binder.program().unwrap().id();

        let mut broken = preset("particle-wave");
        broken.shader.fragment = "@fragment fn fs_main( {".into();
        assert!(matches!(
            binder.compile(&broken),
            Err(VizError::CompileError {
                stage: ShaderStage::Fragment,
                ..
            })
        ));

        binder.backend_mut().reject_next_program("driver said no");
        assert!(matches!(
            binder.compile(&preset("particle-wave")),
            Err(VizError::LinkError { .. })
        ));

        assert_eq!(binder.program().unwrap().id(), bound);
        assert_eq!(binder.staged("bass"), Some(UniformValue::Scalar(42.0)));
        assert_eq!(binder.backend().live_programs(), 1);
        binder.render().unwrap();
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut binder = binder();
        binder.compile(&preset("bass-gradient")).unwrap();
        binder.destroy();
        assert!(!binder.is_bound());
        assert_eq!(binder.backend().live_programs(), 0);

        binder.destroy();
        assert!(!binder.is_bound());
        assert!(binder.uniform_names().is_empty());
        assert!(matches!(binder.render(), Err(VizError::NoProgramBound)));
    }
}
