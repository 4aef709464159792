//! WGSL front end shared by every graphics context.
//!
//! Stages are parsed and validated with naga so a broken source is caught
//! with a readable diagnostic before any device work happens. Linking checks
//! that the two stages agree on their interface and produces the reflection
//! used to look up attributes and uniforms by name.

use std::collections::HashMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, Function, Module, ShaderStage, TypeInner};

use super::context::UniformLocation;
use crate::error::{GpuError, Stage};

/// One parsed and validated shader stage.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    stage: Stage,
    source: String,
    entry_point: String,
    inputs: Vec<(Option<String>, u32)>,
    outputs: Vec<u32>,
    uniforms: Vec<(String, UniformLocation)>,
}

impl CompiledStage {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// Reflection of a linked vertex/fragment pair.
#[derive(Debug, Clone)]
pub struct ProgramLayout {
    vertex: CompiledStage,
    fragment: CompiledStage,
    attributes: HashMap<String, u32>,
    uniforms: HashMap<String, UniformLocation>,
}

impl ProgramLayout {
    pub fn vertex(&self) -> &CompiledStage {
        &self.vertex
    }

    pub fn fragment(&self) -> &CompiledStage {
        &self.fragment
    }

    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes.get(name).copied()
    }

    pub fn uniform(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }

    pub fn attribute_locations(&self) -> Vec<u32> {
        self.attributes.values().copied().collect()
    }

    /// Every uniform location, sorted by group then binding.
    pub fn uniform_locations(&self) -> Vec<UniformLocation> {
        let mut locations: Vec<_> = self.uniforms.values().copied().collect();
        locations.sort_by_key(|loc| (loc.group, loc.binding));
        locations
    }
}

fn naga_stage(stage: Stage) -> ShaderStage {
    match stage {
        Stage::Vertex => ShaderStage::Vertex,
        Stage::Fragment => ShaderStage::Fragment,
    }
}

/// Parses and validates `source` as the given stage.
pub fn compile(stage: Stage, source: &str) -> Result<CompiledStage, GpuError> {
    let compile_error = |diagnostic: String| GpuError::Compile { stage, diagnostic };

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage(stage))
        .ok_or_else(|| compile_error(format!("no @{} entry point", stage)))?;

    Ok(CompiledStage {
        stage,
        source: source.to_string(),
        entry_point: entry.name.clone(),
        inputs: entry_inputs(&module, &entry.function),
        outputs: entry_outputs(&module, &entry.function),
        uniforms: uniforms(&module),
    })
}

/// Checks that `vertex` feeds `fragment` and merges their reflection.
pub fn link(vertex: CompiledStage, fragment: CompiledStage) -> Result<ProgramLayout, GpuError> {
    if vertex.stage != Stage::Vertex || fragment.stage != Stage::Fragment {
        return Err(GpuError::Link(format!(
            "expected a vertex and a fragment stage, got {} and {}",
            vertex.stage, fragment.stage
        )));
    }

    for (name, location) in &fragment.inputs {
        if !vertex.outputs.contains(location) {
            return Err(GpuError::Link(format!(
                "fragment input `{}` at location {} is not written by the vertex stage",
                name.as_deref().unwrap_or("<unnamed>"),
                location
            )));
        }
    }

    let mut uniforms: HashMap<String, UniformLocation> = HashMap::new();
    for (name, location) in vertex.uniforms.iter().chain(fragment.uniforms.iter()) {
        if let Some(existing) = uniforms.get(name) {
            if existing != location {
                return Err(GpuError::Link(format!(
                    "uniform `{}` is bound at group {} binding {} in one stage and group {} binding {} in the other",
                    name, existing.group, existing.binding, location.group, location.binding
                )));
            }
            continue;
        }
        if let Some((other, _)) = uniforms.iter().find(|(_, loc)| *loc == location) {
            return Err(GpuError::Link(format!(
                "uniforms `{}` and `{}` share group {} binding {}",
                other, name, location.group, location.binding
            )));
        }
        uniforms.insert(name.clone(), *location);
    }

    let attributes = vertex
        .inputs
        .iter()
        .filter_map(|(name, location)| name.clone().map(|name| (name, *location)))
        .collect();

    Ok(ProgramLayout {
        vertex,
        fragment,
        attributes,
        uniforms,
    })
}

fn location_of(binding: &Option<Binding>) -> Option<u32> {
    match binding {
        Some(Binding::Location { location, .. }) => Some(*location),
        _ => None,
    }
}

/// Locations of an entry point's arguments, looking through struct arguments.
fn entry_inputs(module: &Module, function: &Function) -> Vec<(Option<String>, u32)> {
    let mut inputs = Vec::new();
    for arg in &function.arguments {
        if let Some(location) = location_of(&arg.binding) {
            inputs.push((arg.name.clone(), location));
        } else if let TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
            inputs.extend(
                members
                    .iter()
                    .filter_map(|m| location_of(&m.binding).map(|loc| (m.name.clone(), loc))),
            );
        }
    }
    inputs
}

fn entry_outputs(module: &Module, function: &Function) -> Vec<u32> {
    let Some(result) = &function.result else {
        return Vec::new();
    };
    if let Some(location) = location_of(&result.binding) {
        return vec![location];
    }
    match &module.types[result.ty].inner {
        TypeInner::Struct { members, .. } => members
            .iter()
            .filter_map(|m| location_of(&m.binding))
            .collect(),
        _ => Vec::new(),
    }
}

fn uniforms(module: &Module) -> Vec<(String, UniformLocation)> {
    module
        .global_variables
        .iter()
        .filter(|(_, var)| var.space == AddressSpace::Uniform)
        .filter_map(|(_, var)| {
            let name = var.name.clone()?;
            let binding = var.binding.as_ref()?;
            Some((
                name,
                UniformLocation {
                    group: binding.group,
                    binding: binding.binding,
                },
            ))
        })
        .collect()
}
