//! Per-resolution GPU resources of the hybrid pipeline.

use std::rc::Rc;

use crate::device::{Attachment, BufferUsage, Device, TextureFormat};
use crate::error::Result;
use crate::hybrid::{DEPTH_COMPLEXITY_BINDING, DEPTH_KTAB_BINDING, VISIBILITY_KTAB_BINDING};
use crate::kernel::{ABUFFER_SIZE, EMPTY_ENTRY, VISIBILITY_KTAB_SIZE};

/// Number of pixels of a `width` x `height` target.
#[must_use]
pub fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Host-side fill arrays for the per-frame storage resets.
///
/// Owned per pipeline instance and reused across frames; only their length
/// follows the resolution.
#[derive(Debug, Default)]
struct Scratch {
    depth_ktab: Vec<u32>,
    visibility_ktab: Vec<f32>,
    depth_complexity: Vec<u32>,
}

fn refill<T: Copy>(buffer: &mut Vec<T>, len: usize, value: T) -> &[T] {
    buffer.clear();
    buffer.resize(len, value);
    buffer
}

/// Frame targets, the shared depth buffer, the three storage buffers and the
/// framebuffers grouping them.
///
/// Every object is created once. [`resize`](Self::resize) re-specifies
/// storage in place, so handles (and framebuffer attachments referencing
/// them) stay valid across resolution changes.
pub struct FrameResources<D: Device> {
    device: Rc<D>,

    /// Depth shared by the opaque, capture and color passes.
    depth_buffer: D::Renderbuffer,
    /// RGBA8 result of the opaque pass.
    opaque_buffer: D::Texture,
    /// RGBA8 blend of the k nearest translucent fragments.
    core_buffer: D::Texture,
    /// RGBA32F sum of the remaining translucent fragments.
    accumulation_buffer: D::Texture,
    /// RGBA8 composited output.
    color_buffer: D::Texture,

    depth_ktab: D::Buffer,
    visibility_ktab: D::Buffer,
    depth_complexity: D::Buffer,

    /// Opaque target + depth.
    prepass_fbo: D::Framebuffer,
    /// Core and accumulation targets + depth.
    color_fbo: D::Framebuffer,
    /// Final color target.
    composition_fbo: D::Framebuffer,

    /// Attribute-less vertex array for the screen-aligned quad.
    quad: D::VertexArray,

    scratch: Scratch,
    size: Option<(u32, u32)>,
}

impl<D: Device> FrameResources<D> {
    /// Create every object and wire up the framebuffers. Storage is
    /// allocated by the first [`resize`](Self::resize).
    ///
    /// # Errors
    ///
    /// Fails if the driver refuses to create an object.
    pub fn new(device: &Rc<D>) -> Result<Self> {
        let depth_buffer = device.create_renderbuffer()?;
        let opaque_buffer = device.create_texture()?;
        let core_buffer = device.create_texture()?;
        let accumulation_buffer = device.create_texture()?;
        let color_buffer = device.create_texture()?;

        let depth_ktab = device.create_buffer()?;
        let visibility_ktab = device.create_buffer()?;
        let depth_complexity = device.create_buffer()?;

        let prepass_fbo = device.create_framebuffer()?;
        device.attach_texture_2d(prepass_fbo, Attachment::Color(0), opaque_buffer);
        device.attach_renderbuffer(prepass_fbo, Attachment::Depth, depth_buffer);

        let color_fbo = device.create_framebuffer()?;
        device.attach_texture_2d(color_fbo, Attachment::Color(0), core_buffer);
        device.attach_texture_2d(color_fbo, Attachment::Color(1), accumulation_buffer);
        device.attach_renderbuffer(color_fbo, Attachment::Depth, depth_buffer);
        device.set_draw_buffers(color_fbo, &[Attachment::Color(0), Attachment::Color(1)]);

        let composition_fbo = device.create_framebuffer()?;
        device.attach_texture_2d(composition_fbo, Attachment::Color(0), color_buffer);
        device.set_draw_buffers(composition_fbo, &[Attachment::Color(0)]);

        let quad = device.create_vertex_array()?;

        Ok(Self {
            device: Rc::clone(device),
            depth_buffer,
            opaque_buffer,
            core_buffer,
            accumulation_buffer,
            color_buffer,
            depth_ktab,
            visibility_ktab,
            depth_complexity,
            prepass_fbo,
            color_fbo,
            composition_fbo,
            quad,
            scratch: Scratch::default(),
            size: None,
        })
    }

    /// Reallocate every per-resolution resource for `width` x `height`.
    ///
    /// Targets and the depth buffer get new storage under the same handles;
    /// the storage buffers are reset to their per-frame initial contents at
    /// the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("resizing hybrid transparency targets to {width}x{height}");
        let device = &self.device;

        device.renderbuffer_depth_storage(self.depth_buffer, width, height);
        device.texture_image_2d(self.opaque_buffer, TextureFormat::Rgba8, width, height);
        device.texture_image_2d(self.color_buffer, TextureFormat::Rgba8, width, height);
        device.texture_image_2d(self.accumulation_buffer, TextureFormat::Rgba32F, width, height);
        device.texture_image_2d(self.core_buffer, TextureFormat::Rgba8, width, height);

        let pixels = pixel_count(width, height);
        self.reset_depth_ktab(pixels);
        self.reset_visibility_ktab(pixels);
        self.reset_depth_complexity(pixels);

        self.size = Some((width, height));
    }

    /// Fill the depth k-table with `pixels * k` empty entries and bind it.
    pub fn reset_depth_ktab(&mut self, pixels: usize) {
        let data = refill(&mut self.scratch.depth_ktab, pixels * ABUFFER_SIZE, EMPTY_ENTRY);
        self.device
            .buffer_data(self.depth_ktab, bytemuck::cast_slice(data), BufferUsage::DynamicDraw);
        self.device
            .bind_storage_buffer(DEPTH_KTAB_BINDING, Some(self.depth_ktab));
    }

    /// Fill the visibility k-table with `pixels * (k + 1)` zeros and bind it.
    pub fn reset_visibility_ktab(&mut self, pixels: usize) {
        let data = refill(
            &mut self.scratch.visibility_ktab,
            pixels * VISIBILITY_KTAB_SIZE,
            0.0,
        );
        self.device.buffer_data(
            self.visibility_ktab,
            bytemuck::cast_slice(data),
            BufferUsage::DynamicDraw,
        );
        self.device
            .bind_storage_buffer(VISIBILITY_KTAB_BINDING, Some(self.visibility_ktab));
    }

    /// Fill the depth-complexity buffer with `pixels` zeros and bind it.
    pub fn reset_depth_complexity(&mut self, pixels: usize) {
        let data = refill(&mut self.scratch.depth_complexity, pixels, 0);
        self.device.buffer_data(
            self.depth_complexity,
            bytemuck::cast_slice(data),
            BufferUsage::DynamicDraw,
        );
        self.device
            .bind_storage_buffer(DEPTH_COMPLEXITY_BINDING, Some(self.depth_complexity));
    }

    /// Size of the last [`resize`](Self::resize), if any.
    #[must_use]
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// The shared depth renderbuffer.
    #[must_use]
    pub fn depth_buffer(&self) -> D::Renderbuffer {
        self.depth_buffer
    }

    /// The opaque pass target.
    #[must_use]
    pub fn opaque_buffer(&self) -> D::Texture {
        self.opaque_buffer
    }

    /// The core (k nearest fragments) target.
    #[must_use]
    pub fn core_buffer(&self) -> D::Texture {
        self.core_buffer
    }

    /// The tail accumulation target.
    #[must_use]
    pub fn accumulation_buffer(&self) -> D::Texture {
        self.accumulation_buffer
    }

    /// The composited output target.
    #[must_use]
    pub fn color_buffer(&self) -> D::Texture {
        self.color_buffer
    }

    /// The depth k-table storage buffer.
    #[must_use]
    pub fn depth_ktab(&self) -> D::Buffer {
        self.depth_ktab
    }

    /// The visibility k-table storage buffer.
    #[must_use]
    pub fn visibility_ktab(&self) -> D::Buffer {
        self.visibility_ktab
    }

    /// The depth-complexity storage buffer.
    #[must_use]
    pub fn depth_complexity(&self) -> D::Buffer {
        self.depth_complexity
    }

    /// Framebuffer of the opaque and capture passes.
    #[must_use]
    pub fn prepass_fbo(&self) -> D::Framebuffer {
        self.prepass_fbo
    }

    /// Framebuffer of the color accumulation pass.
    #[must_use]
    pub fn color_fbo(&self) -> D::Framebuffer {
        self.color_fbo
    }

    /// Framebuffer of the composition pass.
    #[must_use]
    pub fn composition_fbo(&self) -> D::Framebuffer {
        self.composition_fbo
    }

    /// Vertex array for the screen-aligned quad.
    #[must_use]
    pub fn quad(&self) -> D::VertexArray {
        self.quad
    }
}

impl<D: Device> Drop for FrameResources<D> {
    fn drop(&mut self) {
        let device = &self.device;
        device.delete_framebuffer(self.prepass_fbo);
        device.delete_framebuffer(self.color_fbo);
        device.delete_framebuffer(self.composition_fbo);
        device.delete_vertex_array(self.quad);
        device.delete_buffer(self.depth_ktab);
        device.delete_buffer(self.visibility_ktab);
        device.delete_buffer(self.depth_complexity);
        device.delete_texture(self.opaque_buffer);
        device.delete_texture(self.core_buffer);
        device.delete_texture(self.accumulation_buffer);
        device.delete_texture(self.color_buffer);
        device.delete_renderbuffer(self.depth_buffer);
    }
}
