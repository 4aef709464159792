//! Fixed shader program of the graphics stress run and its one-time setup.

use super::context::{BufferId, GraphicsContext, ProgramId, UniformLocation};
use crate::error::{GpuError, Stage};

pub const POSITION_ATTRIBUTE: &str = "a_position";
pub const TIME_UNIFORM: &str = "u_time";

/// Two triangles as a strip covering the whole viewport.
pub const FULLSCREEN_QUAD: [[f32; 2]; 4] = [[-1.0, 1.0], [-1.0, -1.0], [1.0, 1.0], [1.0, -1.0]];

pub const VERTEX_SHADER: &str = r#"
@vertex
fn vs_main(@location(0) a_position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(a_position, 0.0, 1.0);
}
"#;

/// Three layered Julia sets per pixel, rotated by the time uniform and
/// perturbed with extra trigonometry to keep every shader core busy.
pub const FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0)
var<uniform> u_time: f32;

fn cmult(a: vec2<f32>, b: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(a.x * b.x - a.y * b.y, a.x * b.y + a.y * b.x);
}

fn cpow(z: vec2<f32>, n: i32) -> vec2<f32> {
    var result = z;
    for (var i = 0; i < 20; i++) {
        if (i >= n - 1) {
            break;
        }
        result = cmult(result, z);
    }
    return result;
}

fn julia(start: vec2<f32>, c: vec2<f32>, max_iter: i32) -> f32 {
    var z = start;
    var escape = 0.0;
    let rotation = vec2<f32>(cos(u_time * 0.1), sin(u_time * 0.1));
    for (var i = 0; i < 2000; i++) {
        if (i >= max_iter) {
            break;
        }
        z = cmult(cpow(z, 3), rotation) + c;
        z += 0.1 * vec2<f32>(sin(z.x * 5.0 + u_time), cos(z.y * 5.0 + u_time));
        if (length(z) > 2.0) {
            escape = f32(i) - log2(log2(dot(z, z))) + 4.0;
            break;
        }
    }
    return escape;
}

fn palette(escape: f32, rates: vec3<f32>, t: f32) -> vec3<f32> {
    return sin(escape * rates + vec3<f32>(t, t + 2.094, t + 4.188)) * 0.5 + vec3<f32>(0.5);
}

@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = (frag_coord.xy - vec2<f32>(320.0, 240.0)) / 320.0;

    let escape1 = julia(uv, vec2<f32>(0.285, 0.01), 1500);
    let escape2 = julia(uv * 1.5, vec2<f32>(-0.4, 0.6), 1500);
    let escape3 = julia(uv * 0.75, vec2<f32>(0.285, -0.01), 1500);

    let t = u_time * 0.1;
    let color1 = palette(escape1, vec3<f32>(0.1, 0.15, 0.2), t);
    let color2 = palette(escape2, vec3<f32>(0.12, 0.17, 0.22), t);
    let color3 = palette(escape3, vec3<f32>(0.14, 0.19, 0.24), t);

    var color = color1 * 0.4 + color2 * 0.3 + color3 * 0.3;
    color *= vec3<f32>(
        sin(uv.x * 10.0 + u_time) * 0.1 + 0.9,
        cos(uv.y * 10.0 + u_time) * 0.1 + 0.9,
        sin((uv.x + uv.y) * 10.0 + u_time) * 0.1 + 0.9,
    );
    return vec4<f32>(color, 1.0);
}
"#;

/// Handles produced by [`initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramBindings {
    pub program: ProgramId,
    pub position: u32,
    pub time: UniformLocation,
    pub vertex_buffer: BufferId,
    pub vertex_count: u32,
}

/// Compiles and links the built-in program and uploads the full-screen quad.
pub fn initialize(ctx: &mut dyn GraphicsContext) -> Result<ProgramBindings, GpuError> {
    initialize_with(ctx, VERTEX_SHADER, FRAGMENT_SHADER)
}

/// Same as [`initialize`] with caller-supplied stage sources. The sources
/// must expose `a_position` and `u_time`.
pub fn initialize_with(
    ctx: &mut dyn GraphicsContext,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<ProgramBindings, GpuError> {
    let vertex = ctx.compile_shader(Stage::Vertex, vertex_source)?;
    let fragment = match ctx.compile_shader(Stage::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(err) => {
            ctx.delete_shader(vertex);
            return Err(err);
        }
    };
    let program = ctx.link_program(vertex, fragment)?;

    match bind_inputs(ctx, program) {
        Ok((position, time, vertex_buffer)) => Ok(ProgramBindings {
            program,
            position,
            time,
            vertex_buffer,
            vertex_count: FULLSCREEN_QUAD.len() as u32,
        }),
        Err(err) => {
            ctx.delete_program(program);
            Err(err)
        }
    }
}

fn bind_inputs(
    ctx: &mut dyn GraphicsContext,
    program: ProgramId,
) -> Result<(u32, UniformLocation, BufferId), GpuError> {
    let position = ctx
        .attribute_location(program, POSITION_ATTRIBUTE)
        .ok_or_else(|| GpuError::MissingBinding(POSITION_ATTRIBUTE.to_string()))?;
    let time = ctx
        .uniform_location(program, TIME_UNIFORM)
        .ok_or_else(|| GpuError::MissingBinding(TIME_UNIFORM.to_string()))?;
    let buffer = ctx.create_vertex_buffer(program, position, &FULLSCREEN_QUAD)?;
    Ok((position, time, buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{Call, RecordingContext};

    const NO_TIME_FRAGMENT: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    #[test]
    fn initialize_resolves_every_handle() {
        let mut ctx = RecordingContext::new();
        let bindings = initialize(&mut ctx).unwrap();
        assert_eq!(bindings.position, 0);
        assert_eq!(bindings.time, UniformLocation { group: 0, binding: 0 });
        assert_eq!(bindings.vertex_count, 4);
    }

    #[test]
    fn malformed_fragment_is_a_compile_error() {
        let mut ctx = RecordingContext::new();
        let log = ctx.log();
        let broken = FRAGMENT_SHADER.replace("let uv =", "let uv = =");

        let err = initialize_with(&mut ctx, VERTEX_SHADER, &broken).unwrap_err();

        assert!(matches!(err, GpuError::Compile { stage: Stage::Fragment, .. }));
        assert!(matches!(log.lock().as_slice(), [Call::DeleteShader(_)]));
    }

    #[test]
    fn missing_time_uniform_releases_the_program() {
        let mut ctx = RecordingContext::new();
        let log = ctx.log();

        let err = initialize_with(&mut ctx, VERTEX_SHADER, NO_TIME_FRAGMENT).unwrap_err();

        assert_eq!(err, GpuError::MissingBinding(TIME_UNIFORM.to_string()));
        assert!(matches!(log.lock().as_slice(), [Call::DeleteProgram(_)]));
    }

    #[test]
    fn quad_covers_the_viewport() {
        for corner in [[-1.0, 1.0], [-1.0, -1.0], [1.0, 1.0], [1.0, -1.0]] {
            assert!(FULLSCREEN_QUAD.contains(&corner));
        }
    }
}
