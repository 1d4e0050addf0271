use std::collections::BTreeMap;

use super::{AudioResponse, Preset, ShaderPair, UniformDecl};
use crate::shader::UniformValue;

/// Full-screen triangle shared by every built-in preset.
pub const FULLSCREEN_VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    var output: VertexOutput;
    output.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, y);
    return output;
}
"#;

const BASS_GRADIENT_FRAGMENT: &str = r#"
struct Uniforms {
    bass: f32,
    mid: f32,
    high: f32,
    time: f32,
};

@group(0) @binding(0) var<uniform> u: Uniforms;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(u.bass / 255.0, u.mid / 255.0, u.high / 255.0, 1.0);
}
"#;

const NOISE_FRAGMENT: &str = r#"
struct Uniforms {
    bass: f32,
    time: f32,
};

@group(0) @binding(0) var<uniform> u: Uniforms;

fn random(st: vec2<f32>) -> f32 {
    return fract(sin(dot(st, vec2<f32>(12.9898, 78.233))) * 43758.5453123);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let st = frag.xy / vec2<f32>(512.0);
    let noise = random(st + vec2<f32>(u.time * 0.001));
    let bass = u.bass / 255.0;
    return vec4<f32>(noise * bass, noise * 0.5, noise, 1.0);
}
"#;

const PARTICLE_WAVE_FRAGMENT: &str = r#"
struct Uniforms {
    bass: f32,
    mid: f32,
    high: f32,
    time: f32,
};

@group(0) @binding(0) var<uniform> u: Uniforms;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let dist = length(uv - vec2<f32>(0.5));
    let wave = sin(dist * 20.0 - u.time * 10.0) * 0.5 + 0.5;
    let color = wave * (u.mid / 255.0);
    return vec4<f32>(color, color * 0.8, color * 0.6, 1.0);
}
"#;

fn band_uniform() -> UniformDecl {
    UniformDecl::ranged(UniformValue::Scalar(0.0), 0.0, 255.0)
}

fn audio_uniforms(names: &[&str]) -> BTreeMap<String, UniformDecl> {
    let mut uniforms: BTreeMap<String, UniformDecl> = names
        .iter()
        .map(|name| (name.to_string(), band_uniform()))
        .collect();
    uniforms.insert("time".into(), UniformDecl::new(UniformValue::Scalar(0.0)));
    uniforms
}

fn builtin(
    id: &str,
    name: &str,
    description: &str,
    fragment: &str,
    uniforms: BTreeMap<String, UniformDecl>,
    audio: AudioResponse,
    tags: &[&str],
) -> Preset {
    Preset {
        id: id.into(),
        name: name.into(),
        description: Some(description.into()),
        author: "VisuaLive".into(),
        shader: ShaderPair {
            vertex: FULLSCREEN_VERTEX.into(),
            fragment: fragment.into(),
        },
        uniforms,
        audio_responsive: audio,
        thumbnail: None,
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        created_at: 0,
    }
}

/// The catalog every store starts from.
pub fn builtin_presets() -> Vec<Preset> {
    vec![
        builtin(
            "bass-gradient",
            "Bass Gradient",
            "Responsive color gradient driven by bass frequencies",
            BASS_GRADIENT_FRAGMENT,
            audio_uniforms(&["bass", "mid", "high"]),
            AudioResponse::new(1.0, 0.5, 0.3),
            &["gradient", "bass", "reactive"],
        ),
        builtin(
            "noise-pattern",
            "Noise Pattern",
            "Perlin-like noise with bass intensity",
            NOISE_FRAGMENT,
            audio_uniforms(&["bass"]),
            AudioResponse::new(1.0, 0.0, 0.0),
            &["noise", "procedural"],
        ),
        builtin(
            "particle-wave",
            "Particle Wave",
            "Oscillating particle effect with audio sync",
            PARTICLE_WAVE_FRAGMENT,
            audio_uniforms(&["bass", "mid", "high"]),
            AudioResponse::new(0.8, 0.6, 0.4),
            &["particles", "wave", "animation"],
        ),
    ]
}
