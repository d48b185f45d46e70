/// Vertex stage shared by the stock filters: position at location 0, texture
/// coordinate of input 0 at location 1. Input `i` gets its own at location `1 + i`.
pub const PASSTHROUGH_VERTEX: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

/// Samples input 0 unchanged. Inputs bind as texture `2 * i`, sampler `2 * i + 1`.
pub const PASSTHROUGH_FRAGMENT: &str = r#"
@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(input_texture, input_sampler, uv);
}
"#;
