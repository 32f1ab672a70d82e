//! CPU mirror of the per-pixel GPU kernels.
//!
//! Every function here computes exactly what the matching GLSL in
//! [`shaders`](crate::shaders) computes for one pixel, in `f32`. The GPU path
//! additionally quantizes the core target to 8 bits per channel.
//!
//! The k-table stores each fragment as a packed `u32`: depth in the high 24
//! bits, alpha in the low 8. Unsigned order is therefore depth order, which
//! lets the capture pass keep the nearest fragments with nothing but
//! `atomicMin`.

use glam::Vec4;

/// Fragments per pixel kept by the depth k-table (`k`).
pub const ABUFFER_SIZE: usize = 4;

/// Entries per pixel in the visibility k-table: one per slot plus the base
/// term.
pub const VISIBILITY_KTAB_SIZE: usize = ABUFFER_SIZE + 1;

/// Sentinel of an unused depth k-table slot (maximum representable depth).
pub const EMPTY_ENTRY: u32 = u32::MAX;

/// Largest packed depth. One below `2^24 - 1` so that no fragment packs to
/// [`EMPTY_ENTRY`].
const DEPTH_SCALE: f32 = 16_777_214.0;

/// One pixel's depth k-table.
pub type DepthKTab = [u32; ABUFFER_SIZE];

/// One pixel's visibility k-table.
pub type VisibilityKTab = [f32; VISIBILITY_KTAB_SIZE];

/// A translucent fragment that passed the opaque depth test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Window-space depth in `[0, 1]`.
    pub depth: f32,
    /// Straight (non-premultiplied) color.
    pub color: Vec4,
}

impl Fragment {
    /// Create a fragment.
    #[must_use]
    pub fn new(depth: f32, color: Vec4) -> Self {
        Self { depth, color }
    }

    /// The fragment's packed k-table entry.
    #[must_use]
    pub fn packed(&self) -> u32 {
        pack_depth_alpha(self.depth, self.color.w)
    }

    /// Color with rgb premultiplied by alpha.
    #[must_use]
    pub fn premultiplied(&self) -> Vec4 {
        (self.color.truncate() * self.color.w).extend(self.color.w)
    }
}

/// Pack depth and alpha into a k-table entry.
#[must_use]
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pack_depth_alpha(depth: f32, alpha: f32) -> u32 {
    let depth = (depth.clamp(0.0, 1.0) * DEPTH_SCALE + 0.5) as u32;
    let alpha = (alpha.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    (depth << 8) | alpha
}

/// Alpha of a k-table entry; `0` for an empty slot.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn unpack_alpha(entry: u32) -> f32 {
    if entry == EMPTY_ENTRY {
        0.0
    } else {
        (entry & 0xff) as f32 / 255.0
    }
}

/// Depth of a k-table entry; `None` for an empty slot.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn unpack_depth(entry: u32) -> Option<f32> {
    (entry != EMPTY_ENTRY).then(|| (entry >> 8) as f32 / DEPTH_SCALE)
}

/// An empty depth k-table.
#[must_use]
pub fn empty_ktab() -> DepthKTab {
    [EMPTY_ENTRY; ABUFFER_SIZE]
}

/// Insert a packed fragment, keeping the `k` smallest entries ascending.
///
/// Each step is an `atomicMin` on the GPU: the slot keeps the smaller value
/// and the larger one moves on to the next slot. The result doesn't depend
/// on insertion order.
pub fn insert_fragment(ktab: &mut DepthKTab, value: u32) {
    let mut value = value;
    for slot in ktab.iter_mut() {
        let previous = *slot;
        *slot = previous.min(value);
        if previous == EMPTY_ENTRY {
            break;
        }
        value = previous.max(value);
    }
}

/// Visibility factors for the given per-slot alphas.
///
/// `factors[0]` is `1`. For `i` in `1..=k`, `factors[i] = 1 - acc_(i-1)`
/// where `acc_0 = a_0` and `acc_i = acc_(i-1) + a_i * (1 - acc_(i-1))`.
#[must_use]
pub fn visibility_factors(alphas: [f32; ABUFFER_SIZE]) -> VisibilityKTab {
    let mut factors = [0.0; VISIBILITY_KTAB_SIZE];
    factors[0] = 1.0;
    let mut accumulated = 0.0;
    for (i, alpha) in alphas.into_iter().enumerate() {
        accumulated += alpha * (1.0 - accumulated);
        factors[i + 1] = 1.0 - accumulated;
    }
    factors
}

/// The visibility resolve kernel for one pixel.
#[must_use]
pub fn resolve_visibility(ktab: &DepthKTab) -> VisibilityKTab {
    visibility_factors(ktab.map(unpack_alpha))
}

/// Front-to-back "over" compositing of premultiplied layers.
///
/// `acc_0 = src_0`, `acc_i = acc_(i-1) + src_i * (1 - acc_(i-1).a)`.
#[must_use]
pub fn composite_front_to_back(layers: &[Vec4]) -> Vec4 {
    layers
        .iter()
        .fold(Vec4::ZERO, |acc, &src| acc + src * (1.0 - acc.w))
}

/// The color pass for one fragment: `(core, accumulation)` contributions.
///
/// A fragment present in the k-table claims the first matching slot (it is
/// reset to [`EMPTY_ENTRY`], an `atomicCompSwap` on the GPU) and contributes
/// to the core weighted by that slot's visibility. Any other fragment,
/// including a duplicate whose slots are all claimed, goes to the
/// accumulation target unweighted.
#[must_use]
pub fn shade_fragment(
    fragment: &Fragment,
    ktab: &mut DepthKTab,
    visibility: &VisibilityKTab,
) -> (Vec4, Vec4) {
    let value = fragment.packed();
    let premultiplied = fragment.premultiplied();
    match ktab.iter().position(|&entry| entry == value) {
        Some(slot) => {
            ktab[slot] = EMPTY_ENTRY;
            (premultiplied * visibility[slot], Vec4::ZERO)
        }
        None => (Vec4::ZERO, premultiplied),
    }
}

/// Resolve the accumulated tail into a premultiplied color.
///
/// `complexity` counts every fragment at the pixel; the first `k` of them
/// are in the core. The tail's color is the alpha-weighted average, and its
/// coverage is that of `n` layers of the average alpha.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]
pub fn resolve_tail(accumulation: Vec4, complexity: u32) -> Vec4 {
    let count = complexity.saturating_sub(ABUFFER_SIZE as u32);
    if count == 0 || accumulation.w <= 0.0 {
        return Vec4::ZERO;
    }
    let average = accumulation.truncate() / accumulation.w;
    let n = count as f32;
    let alpha = 1.0 - (1.0 - accumulation.w / n).max(0.0).powi(count as i32);
    (average * alpha).extend(alpha)
}

/// Composite core and tail over the opaque color. The result is opaque.
#[must_use]
pub fn compose(opaque: Vec4, core: Vec4, tail: Vec4) -> Vec4 {
    let transparent = core + tail * (1.0 - core.w);
    (transparent.truncate() + opaque.truncate() * (1.0 - transparent.w)).extend(1.0)
}

/// Run every pass for a single pixel.
///
/// `opaque` is the opaque pass result and `fragments` the translucent
/// fragments that survived its depth test, in submission order.
#[must_use]
pub fn render_pixel(opaque: Vec4, fragments: &[Fragment]) -> Vec4 {
    let mut ktab = empty_ktab();
    for fragment in fragments {
        insert_fragment(&mut ktab, fragment.packed());
    }

    let visibility = resolve_visibility(&ktab);

    let (core, accumulation) = fragments.iter().fold(
        (Vec4::ZERO, Vec4::ZERO),
        |(core, accumulation), fragment| {
            let (c, a) = shade_fragment(fragment, &mut ktab, &visibility);
            (core + c, accumulation + a)
        },
    );
    let complexity = u32::try_from(fragments.len()).unwrap_or(u32::MAX);

    compose(opaque, core, resolve_tail(accumulation, complexity))
}
