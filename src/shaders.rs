//! GLSL sources for the hybrid transparency passes.
//!
//! All shaders target GLSL 4.30 core (shader storage buffers, compute,
//! atomics). Pass sources pull in two named strings:
//!
//! | Name                                | Contents                                  |
//! |-------------------------------------|-------------------------------------------|
//! | `/transparency/hybrid_definitions`  | k-table sizes and binding points, generated from the Rust constants |
//! | `/transparency/hybrid.glsl`         | packing, tail resolve and composition helpers ([`HYBRID_COMMON_SRC`]) |
//!
//! When shaders are loaded from a directory, files are looked up by the
//! `*_FILE` names below and `hybrid.glsl` replaces the embedded helpers.

use crate::hybrid::{
    ACCUMULATION_TEXTURE_UNIT, CORE_TEXTURE_UNIT, DEPTH_COMPLEXITY_BINDING, DEPTH_KTAB_BINDING,
    OPAQUE_TEXTURE_UNIT, VISIBILITY_KTAB_BINDING, VISIBILITY_WORKGROUP_SIZE,
};
use crate::kernel::{ABUFFER_SIZE, VISIBILITY_KTAB_SIZE};
use crate::shader::NamedStrings;

/// Include name of the generated definitions.
pub const DEFINITIONS_NAME: &str = "/transparency/hybrid_definitions";
/// Include name of the shared helpers.
pub const COMMON_NAME: &str = "/transparency/hybrid.glsl";

/// File name of the shared helpers in a shader directory.
pub const COMMON_FILE: &str = "hybrid.glsl";
/// File name of the opaque fragment stage.
pub const OPAQUE_FILE: &str = "hybrid_opaque.frag";
/// File name of the depth k-table capture fragment stage.
pub const DEPTH_KTAB_FILE: &str = "hybrid_depthktab.frag";
/// File name of the visibility resolve compute stage.
pub const VISIBILITY_KTAB_FILE: &str = "hybrid_visibilityktab.comp";
/// File name of the color accumulation fragment stage.
pub const COLOR_FILE: &str = "hybrid_color.frag";
/// File name of the composition fragment stage.
pub const POST_FILE: &str = "hybrid_post.frag";

/// The generated definitions string.
#[must_use]
pub fn definitions() -> String {
    format!(
        "#define ABUFFER_SIZE {ABUFFER_SIZE}\n\
         #define VISIBILITY_KTAB_SIZE {VISIBILITY_KTAB_SIZE}\n\
         #define DEPTH_KTAB_BINDING {DEPTH_KTAB_BINDING}\n\
         #define VISIBILITY_KTAB_BINDING {VISIBILITY_KTAB_BINDING}\n\
         #define DEPTH_COMPLEXITY_BINDING {DEPTH_COMPLEXITY_BINDING}\n\
         #define VISIBILITY_WORKGROUP_SIZE {VISIBILITY_WORKGROUP_SIZE}\n\
         #define OPAQUE_TEXTURE_UNIT {OPAQUE_TEXTURE_UNIT}\n\
         #define CORE_TEXTURE_UNIT {CORE_TEXTURE_UNIT}\n\
         #define ACCUMULATION_TEXTURE_UNIT {ACCUMULATION_TEXTURE_UNIT}\n"
    )
}

/// Named strings for the pass sources, with `common` as the shared helpers.
#[must_use]
pub fn named_strings(common: &str) -> NamedStrings {
    let mut named = NamedStrings::new();
    named.insert(DEFINITIONS_NAME, definitions());
    named.insert(COMMON_NAME, common);
    named
}

/// Shared helpers. Mirrors `kernel.rs` operation for operation.
pub const HYBRID_COMMON_SRC: &str = r"const uint KTAB_EMPTY = 0xFFFFFFFFu;

// 24-bit depth above 8-bit alpha, so unsigned order is depth order.
// Depth tops out one below 2^24 - 1 so no fragment packs to KTAB_EMPTY.
uint packDepthAlpha(float depth, float alpha) {
    uint d = uint(clamp(depth, 0.0, 1.0) * 16777214.0 + 0.5);
    uint a = uint(clamp(alpha, 0.0, 1.0) * 255.0 + 0.5);
    return (d << 8u) | a;
}

float unpackAlpha(uint entry) {
    return entry == KTAB_EMPTY ? 0.0 : float(entry & 0xFFu) / 255.0;
}

int pixelIndex(ivec2 coord, ivec2 size) {
    return coord.y * size.x + coord.x;
}

// Fragments beyond the k-table, averaged by alpha weight.
vec4 resolveTail(vec4 accumulation, uint complexity) {
    uint count = complexity > uint(ABUFFER_SIZE) ? complexity - uint(ABUFFER_SIZE) : 0u;
    if (count == 0u || accumulation.a <= 0.0) {
        return vec4(0.0);
    }
    vec3 average = accumulation.rgb / accumulation.a;
    float n = float(count);
    float alpha = 1.0 - pow(max(1.0 - accumulation.a / n, 0.0), n);
    return vec4(average * alpha, alpha);
}

vec4 compose(vec4 opaque, vec4 core, vec4 tail) {
    vec4 transparent = core + tail * (1.0 - core.a);
    return vec4(transparent.rgb + opaque.rgb * (1.0 - transparent.a), 1.0);
}
";

/// A vertex stage compatible with every geometry pass.
///
/// | Location | Attribute  |
/// |----------|------------|
/// | `0`      | `a_vertex` (`vec3`) |
/// | `1`      | `a_normal` (`vec3`) |
///
/// Callers with their own vertex stage must declare the same
/// `viewprojectionmatrix`/`normalmatrix` uniforms and keep `gl_Position`
/// invariant: the capture and color passes match fragments by depth.
pub const DEFAULT_VERTEX_SRC: &str = r"#version 430 core

layout(location = 0) in vec3 a_vertex;
layout(location = 1) in vec3 a_normal;

uniform mat4 viewprojectionmatrix;
uniform mat3 normalmatrix;

out vec3 v_normal;

invariant gl_Position;

void main() {
    v_normal = normalmatrix * a_normal;
    gl_Position = viewprojectionmatrix * vec4(a_vertex, 1.0);
}
";

/// Opaque pass: writes the geometry color with full alpha.
///
/// # Uniforms
///
/// | Name    | Type   | Description             |
/// |---------|--------|-------------------------|
/// | `color` | `vec4` | set by the draw callback |
pub const OPAQUE_FRAGMENT_SRC: &str = r"#version 430 core

uniform vec4 color;

layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vec4(color.rgb, 1.0);
}
";

/// Depth capture pass: inserts the fragment into its pixel's depth k-table.
///
/// The insertion is an `atomicMin` chain; after all fragments ran, each
/// pixel holds its `ABUFFER_SIZE` nearest fragments in ascending order no
/// matter which order they arrived in.
pub const DEPTH_KTAB_FRAGMENT_SRC: &str = r#"#version 430 core

#include "/transparency/hybrid_definitions"
#include "/transparency/hybrid.glsl"

layout(early_fragment_tests) in;

layout(std430, binding = DEPTH_KTAB_BINDING) coherent buffer DepthKTab {
    uint depthKTab[];
};

uniform ivec2 screenSize;
uniform vec4 color;

void main() {
    int base = pixelIndex(ivec2(gl_FragCoord.xy), screenSize) * ABUFFER_SIZE;
    uint value = packDepthAlpha(gl_FragCoord.z, color.a);

    for (int i = 0; i < ABUFFER_SIZE; ++i) {
        uint previous = atomicMin(depthKTab[base + i], value);
        if (previous == KTAB_EMPTY) {
            break;
        }
        value = max(previous, value);
    }
}
"#;

/// Visibility resolve pass: one invocation per pixel.
///
/// Slot 0 is always 1. Slot `i + 1` is the transmittance left after the
/// first `i + 1` k-table entries: `1 - acc_i` with
/// `acc_i = acc_(i-1) + a_i * (1 - acc_(i-1))`.
///
/// # Uniforms
///
/// | Name        | Type  | Description          |
/// |-------------|-------|----------------------|
/// | `dimension` | `int` | pixel count `w * h`  |
pub const VISIBILITY_KTAB_COMPUTE_SRC: &str = r#"#version 430 core

#include "/transparency/hybrid_definitions"
#include "/transparency/hybrid.glsl"

layout(local_size_x = VISIBILITY_WORKGROUP_SIZE) in;

layout(std430, binding = DEPTH_KTAB_BINDING) readonly buffer DepthKTab {
    uint depthKTab[];
};

layout(std430, binding = VISIBILITY_KTAB_BINDING) writeonly buffer VisibilityKTab {
    float visibilityKTab[];
};

uniform int dimension;

void main() {
    int pixel = int(gl_GlobalInvocationID.x);
    if (pixel >= dimension) {
        return;
    }

    int depthBase = pixel * ABUFFER_SIZE;
    int visibilityBase = pixel * VISIBILITY_KTAB_SIZE;

    float accumulated = 0.0;
    visibilityKTab[visibilityBase] = 1.0;
    for (int i = 0; i < ABUFFER_SIZE; ++i) {
        float alpha = unpackAlpha(depthKTab[depthBase + i]);
        accumulated = accumulated + alpha * (1.0 - accumulated);
        visibilityKTab[visibilityBase + i + 1] = 1.0 - accumulated;
    }
}
"#;

/// Color accumulation pass.
///
/// Fragments found in the depth k-table go to the core target weighted by
/// their slot's visibility; the rest are summed into the accumulation
/// target. Both outputs are premultiplied and blended additively, so
/// arrival order doesn't matter.
///
/// A fragment claims its slot by swapping the entry back to `KTAB_EMPTY`.
/// Fragments with equal depth and alpha therefore take one slot each, and
/// any beyond the table fall through to the accumulation target.
pub const COLOR_FRAGMENT_SRC: &str = r#"#version 430 core

#include "/transparency/hybrid_definitions"
#include "/transparency/hybrid.glsl"

layout(early_fragment_tests) in;

layout(std430, binding = DEPTH_KTAB_BINDING) coherent buffer DepthKTab {
    uint depthKTab[];
};

layout(std430, binding = VISIBILITY_KTAB_BINDING) readonly buffer VisibilityKTab {
    float visibilityKTab[];
};

layout(std430, binding = DEPTH_COMPLEXITY_BINDING) buffer DepthComplexity {
    uint depthComplexity[];
};

uniform ivec2 screenSize;
uniform vec4 color;

layout(location = 0) out vec4 coreColor;
layout(location = 1) out vec4 accumulationColor;

void main() {
    int pixel = pixelIndex(ivec2(gl_FragCoord.xy), screenSize);
    atomicAdd(depthComplexity[pixel], 1u);

    uint value = packDepthAlpha(gl_FragCoord.z, color.a);
    int slot = ABUFFER_SIZE;
    for (int i = 0; i < ABUFFER_SIZE; ++i) {
        if (atomicCompSwap(depthKTab[pixel * ABUFFER_SIZE + i], value, KTAB_EMPTY) == value) {
            slot = i;
            break;
        }
    }

    vec4 premultiplied = vec4(color.rgb * color.a, color.a);
    if (slot < ABUFFER_SIZE) {
        coreColor = premultiplied * visibilityKTab[pixel * VISIBILITY_KTAB_SIZE + slot];
        accumulationColor = vec4(0.0);
    } else {
        coreColor = vec4(0.0);
        accumulationColor = premultiplied;
    }
}
"#;

/// Full-viewport triangle strip generated from `gl_VertexID`; needs no
/// vertex attributes.
pub const SCREEN_QUAD_VERTEX_SRC: &str = r"#version 430 core

out vec2 v_uv;

void main() {
    vec2 corner = vec2(float(gl_VertexID & 1), float((gl_VertexID >> 1) & 1));
    v_uv = corner;
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Composition pass: core and resolved tail over the opaque image.
///
/// # Uniforms
///
/// | Name                 | Type        | Description                   |
/// |----------------------|-------------|-------------------------------|
/// | `screenSize`         | `ivec2`     | viewport size in pixels       |
/// | `opaqueBuffer`       | `sampler2D` | unit `OPAQUE_TEXTURE_UNIT`    |
/// | `coreBuffer`         | `sampler2D` | unit `CORE_TEXTURE_UNIT`      |
/// | `accumulationBuffer` | `sampler2D` | unit `ACCUMULATION_TEXTURE_UNIT` |
pub const POST_FRAGMENT_SRC: &str = r#"#version 430 core

#include "/transparency/hybrid_definitions"
#include "/transparency/hybrid.glsl"

layout(std430, binding = DEPTH_COMPLEXITY_BINDING) readonly buffer DepthComplexity {
    uint depthComplexity[];
};

uniform ivec2 screenSize;
uniform sampler2D opaqueBuffer;
uniform sampler2D coreBuffer;
uniform sampler2D accumulationBuffer;

in vec2 v_uv;

layout(location = 0) out vec4 fragColor;

void main() {
    ivec2 coord = ivec2(gl_FragCoord.xy);
    vec4 opaque = texelFetch(opaqueBuffer, coord, 0);
    vec4 core = texelFetch(coreBuffer, coord, 0);
    vec4 accumulation = texelFetch(accumulationBuffer, coord, 0);
    uint complexity = depthComplexity[pixelIndex(coord, screenSize)];

    fragColor = compose(opaque, core, resolveTail(accumulation, complexity));
}
"#;
