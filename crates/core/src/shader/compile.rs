use std::{collections::BTreeMap, error::Error as StdError};

use naga::{
    valid::{Capabilities, ValidationFlags, Validator},
    AddressSpace, Binding, Handle, Module, ResourceBinding, Scalar, Type, TypeInner, VectorSize,
};

use super::{ShaderStage, UniformKind};
use crate::{Result, VizError};

/// Byte offset and shape of one named member of the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    pub offset: u32,
    pub kind: UniformKind,
}

/// Reflected layout of the `@group(0) @binding(0)` uniform struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub size: u32,
    pub members: BTreeMap<String, UniformLocation>,
}

/// One parsed and validated stage.
#[derive(Debug)]
pub struct CompiledStage {
    stage: ShaderStage,
    source: String,
    entry_point: String,
    module: Module,
}

impl CompiledStage {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// A vertex and fragment stage whose interfaces agree.
#[derive(Debug)]
pub struct LinkedProgram {
    vertex: CompiledStage,
    fragment: CompiledStage,
    uniforms: Option<UniformBlock>,
}

impl LinkedProgram {
    pub fn vertex(&self) -> &CompiledStage {
        &self.vertex
    }

    pub fn fragment(&self) -> &CompiledStage {
        &self.fragment
    }

    pub fn uniforms(&self) -> Option<&UniformBlock> {
        self.uniforms.as_ref()
    }
}

/// Parses and validates one WGSL stage. The module must expose an entry
/// point for `stage`; the first one found is used.
pub fn compile_stage(stage: ShaderStage, source: &str) -> Result<CompiledStage> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| VizError::CompileError {
        stage,
        log: err.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| VizError::CompileError {
            stage,
            log: error_chain(&err),
        })?;

    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry_point = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == wanted)
        .map(|entry| entry.name.clone())
        .ok_or_else(|| VizError::CompileError {
            stage,
            log: format!("no @{stage} entry point found"),
        })?;

    Ok(CompiledStage {
        stage,
        source: source.to_string(),
        entry_point,
        module,
    })
}

/// Checks that the fragment stage only reads what the vertex stage writes
/// and that both stages agree on the uniform block.
pub fn link(vertex: CompiledStage, fragment: CompiledStage) -> Result<LinkedProgram> {
    let outputs = vertex_outputs(&vertex);
    for (location, inner) in fragment_inputs(&fragment) {
        match outputs.get(&location) {
            None => {
                return Err(link_error(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                )))
            }
            Some(written) if *written != inner => {
                return Err(link_error(format!(
                    "@location({location}) has type {written:?} in the vertex stage but {inner:?} in the fragment stage"
                )))
            }
            Some(_) => {}
        }
    }

    let vertex_block = uniform_block(&vertex.module).map_err(link_error)?;
    let fragment_block = uniform_block(&fragment.module).map_err(link_error)?;
    let uniforms = match (vertex_block, fragment_block) {
        (Some(a), Some(b)) if a != b => {
            return Err(link_error(
                "the uniform block is declared differently in the vertex and fragment stages",
            ))
        }
        (a, b) => a.or(b),
    };

    Ok(LinkedProgram {
        vertex,
        fragment,
        uniforms,
    })
}

fn link_error(log: impl Into<String>) -> VizError {
    VizError::LinkError { log: log.into() }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut log = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !log.ends_with(&text) {
            log.push_str(": ");
            log.push_str(&text);
        }
        source = cause.source();
    }
    log
}

fn entry_function(stage: &CompiledStage) -> Option<&naga::Function> {
    stage
        .module
        .entry_points
        .iter()
        .find(|entry| entry.name == stage.entry_point)
        .map(|entry| &entry.function)
}

fn vertex_outputs(stage: &CompiledStage) -> BTreeMap<u32, TypeInner> {
    let mut locations = BTreeMap::new();
    if let Some(result) = entry_function(stage).and_then(|function| function.result.as_ref()) {
        collect_locations(&stage.module, result.ty, result.binding.as_ref(), &mut locations);
    }
    locations
}

fn fragment_inputs(stage: &CompiledStage) -> BTreeMap<u32, TypeInner> {
    let mut locations = BTreeMap::new();
    if let Some(function) = entry_function(stage) {
        for argument in &function.arguments {
            collect_locations(
                &stage.module,
                argument.ty,
                argument.binding.as_ref(),
                &mut locations,
            );
        }
    }
    locations
}

fn collect_locations(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut BTreeMap<u32, TypeInner>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.insert(*location, module.types[ty].inner.clone());
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

/// Finds the single supported resource: a uniform struct at group 0,
/// binding 0. Any other resource binding is rejected.
fn uniform_block(module: &Module) -> std::result::Result<Option<UniformBlock>, String> {
    let mut block = None;
    for (_, var) in module.global_variables.iter() {
        let name = var.name.as_deref().unwrap_or("<unnamed>");
        match var.space {
            AddressSpace::Uniform => {}
            AddressSpace::Storage { .. } | AddressSpace::Handle | AddressSpace::PushConstant => {
                return Err(format!(
                    "resource `{name}` is not supported; only a uniform struct at @group(0) @binding(0) is"
                ))
            }
            _ => continue,
        }

        if var.binding != Some(ResourceBinding { group: 0, binding: 0 }) {
            return Err(format!(
                "uniform `{name}` must be bound at @group(0) @binding(0)"
            ));
        }
        if block.is_some() {
            return Err("only one uniform block is supported".into());
        }

        let TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
            return Err(format!("uniform `{name}` must be a struct"));
        };
        let members = members
            .iter()
            .filter_map(|member| {
                let kind = uniform_kind(&module.types[member.ty].inner)?;
                let name = member.name.clone()?;
                Some((
                    name,
                    UniformLocation {
                        offset: member.offset,
                        kind,
                    },
                ))
            })
            .collect();
        block = Some(UniformBlock {
            size: *span,
            members,
        });
    }
    Ok(block)
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) if *scalar == Scalar::F32 => Some(UniformKind::Float),
        TypeInner::Vector { size, scalar } if *scalar == Scalar::F32 => Some(match size {
            VectorSize::Bi => UniformKind::Vec2,
            VectorSize::Tri => UniformKind::Vec3,
            VectorSize::Quad => UniformKind::Vec4,
        }),
        _ => None,
    }
}
