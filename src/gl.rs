//! [`Device`] implementation over OpenGL via [glow].
//!
//! Requires an OpenGL 4.3 core context (shader storage buffers, compute
//! shaders and `glMemoryBarrier`).
//!
//! [glow]: https://docs.rs/glow

use std::cell::Cell;
use std::sync::Arc;

use glam::Vec4;
use glow::{HasContext, PixelPackData, PixelUnpackData};

use crate::device::{
    Attachment, Barrier, BlendFactor, BufferUsage, Capability, ClearMask, Device, Primitive,
    ShaderStage, TextureFormat, UniformValue,
};
use crate::error::{Error, GlErrorCode, Result};

/// Convert a `u32` to the `i32` GL size parameters expect, saturating at
/// `i32::MAX`.
fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// GL enum values passed where the API expects a signed internal format.
#[expect(clippy::cast_possible_wrap)]
const fn gl_enum_i32(value: u32) -> i32 {
    value as i32
}

fn resource_error(kind: &'static str) -> impl FnOnce(String) -> Error {
    move |reason| Error::ResourceCreation { kind, reason }
}

fn shader_type(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        ShaderStage::Compute => glow::COMPUTE_SHADER,
    }
}

fn attachment_point(attachment: Attachment) -> u32 {
    match attachment {
        Attachment::Color(index) => glow::COLOR_ATTACHMENT0 + index,
        Attachment::Depth => glow::DEPTH_ATTACHMENT,
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
    }
}

fn capability(capability: Capability) -> u32 {
    match capability {
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::Blend => glow::BLEND,
    }
}

fn barrier_bits(barrier: Barrier) -> u32 {
    let mut bits = 0;
    if barrier.contains(Barrier::SHADER_STORAGE) {
        bits |= glow::SHADER_STORAGE_BARRIER_BIT;
    }
    if barrier.contains(Barrier::TEXTURE_FETCH) {
        bits |= glow::TEXTURE_FETCH_BARRIER_BIT;
    }
    if barrier.contains(Barrier::FRAMEBUFFER) {
        bits |= glow::FRAMEBUFFER_BARRIER_BIT;
    }
    bits
}

/// An OpenGL context wrapped as a [`Device`].
///
/// Tracks the framebuffer bound for drawing so that setup calls that need a
/// temporary binding (attachments, draw buffers, read-back) can restore it.
pub struct GlowDevice {
    gl: Arc<glow::Context>,
    bound_framebuffer: Cell<Option<glow::Framebuffer>>,
}

impl GlowDevice {
    /// Wrap a GL context.
    ///
    /// # Safety
    ///
    /// The context must be current on the calling thread, support OpenGL
    /// 4.3, and stay current for as long as this device or any object
    /// created through it is alive.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Self {
        Self {
            gl,
            bound_framebuffer: Cell::new(None),
        }
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    fn with_framebuffer(&self, framebuffer: glow::Framebuffer, f: impl FnOnce(&glow::Context)) {
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            f(&self.gl);
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, self.bound_framebuffer.get());
        }
    }

    fn compile(&self, shader: glow::Shader, stage: ShaderStage, source: &str) -> Result<()> {
        let gl = &self.gl;
        unsafe {
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                return Err(Error::ShaderCompile {
                    stage,
                    log: gl.get_shader_info_log(shader),
                });
            }
        }
        Ok(())
    }
}

impl Device for GlowDevice {
    type Shader = glow::Shader;
    type Program = glow::Program;
    type UniformLocation = glow::UniformLocation;
    type Texture = glow::Texture;
    type Renderbuffer = glow::Renderbuffer;
    type Framebuffer = glow::Framebuffer;
    type Buffer = glow::Buffer;
    type VertexArray = glow::VertexArray;

    fn create_shader(&self, stage: ShaderStage, source: &str) -> Result<Self::Shader> {
        let shader =
            unsafe { self.gl.create_shader(shader_type(stage)) }.map_err(resource_error("shader"))?;
        if let Err(err) = self.compile(shader, stage, source) {
            unsafe { self.gl.delete_shader(shader) };
            return Err(err);
        }
        Ok(shader)
    }

    fn recompile_shader(&self, shader: Self::Shader, stage: ShaderStage, source: &str) -> Result<()> {
        self.compile(shader, stage, source)
    }

    fn delete_shader(&self, shader: Self::Shader) {
        unsafe { self.gl.delete_shader(shader) };
    }

    fn create_program(&self) -> Result<Self::Program> {
        unsafe { self.gl.create_program() }.map_err(resource_error("program"))
    }

    fn attach_shader(&self, program: Self::Program, shader: Self::Shader) {
        unsafe { self.gl.attach_shader(program, shader) };
    }

    fn detach_shader(&self, program: Self::Program, shader: Self::Shader) {
        unsafe { self.gl.detach_shader(program, shader) };
    }

    fn link_program(&self, program: Self::Program) -> Result<()> {
        let gl = &self.gl;
        unsafe {
            gl.link_program(program);
            if !gl.get_program_link_status(program) {
                return Err(Error::ProgramLink(gl.get_program_info_log(program)));
            }
        }
        Ok(())
    }

    fn use_program(&self, program: Option<Self::Program>) {
        unsafe { self.gl.use_program(program) };
    }

    fn delete_program(&self, program: Self::Program) {
        unsafe { self.gl.delete_program(program) };
    }

    fn uniform_location(&self, program: Self::Program, name: &str) -> Option<Self::UniformLocation> {
        unsafe { self.gl.get_uniform_location(program, name) }
    }

    fn set_uniform(&self, program: Self::Program, location: &Self::UniformLocation, value: UniformValue) {
        let gl = &self.gl;
        let location = Some(location);
        unsafe {
            gl.use_program(Some(program));
            match value {
                UniformValue::Int(v) => gl.uniform_1_i32(location, v),
                UniformValue::Float(v) => gl.uniform_1_f32(location, v),
                UniformValue::IVec2(v) => gl.uniform_2_i32(location, v.x, v.y),
                UniformValue::Vec4(v) => gl.uniform_4_f32(location, v.x, v.y, v.z, v.w),
                UniformValue::Mat3(m) => {
                    gl.uniform_matrix_3_f32_slice(location, false, &m.to_cols_array());
                }
                UniformValue::Mat4(m) => {
                    gl.uniform_matrix_4_f32_slice(location, false, &m.to_cols_array());
                }
            }
        }
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        unsafe { self.gl.dispatch_compute(x, y, z) };
    }

    fn create_texture(&self) -> Result<Self::Texture> {
        unsafe { self.gl.create_texture() }.map_err(resource_error("texture"))
    }

    fn texture_image_2d(&self, texture: Self::Texture, format: TextureFormat, width: u32, height: u32) {
        let gl = &self.gl;
        let (internal, ty) = match format {
            TextureFormat::Rgba8 => (glow::RGBA8, glow::UNSIGNED_BYTE),
            TextureFormat::Rgba32F => (glow::RGBA32F, glow::FLOAT),
        };
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                gl_enum_i32(internal),
                gl_size(width),
                gl_size(height),
                0,
                glow::RGBA,
                ty,
                PixelUnpackData::Slice(None),
            );
            // Targets are only ever fetched per texel; no mipmaps.
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                gl_enum_i32(glow::NEAREST),
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                gl_enum_i32(glow::NEAREST),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn bind_texture_unit(&self, unit: u32, texture: Option<Self::Texture>) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, texture);
            self.gl.active_texture(glow::TEXTURE0);
        }
    }

    fn delete_texture(&self, texture: Self::Texture) {
        unsafe { self.gl.delete_texture(texture) };
    }

    fn create_renderbuffer(&self) -> Result<Self::Renderbuffer> {
        unsafe { self.gl.create_renderbuffer() }.map_err(resource_error("renderbuffer"))
    }

    fn renderbuffer_depth_storage(&self, renderbuffer: Self::Renderbuffer, width: u32, height: u32) {
        unsafe {
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT24,
                gl_size(width),
                gl_size(height),
            );
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        }
    }

    fn delete_renderbuffer(&self, renderbuffer: Self::Renderbuffer) {
        unsafe { self.gl.delete_renderbuffer(renderbuffer) };
    }

    fn create_framebuffer(&self) -> Result<Self::Framebuffer> {
        unsafe { self.gl.create_framebuffer() }.map_err(resource_error("framebuffer"))
    }

    fn bind_framebuffer(&self, framebuffer: Option<Self::Framebuffer>) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer) };
        self.bound_framebuffer.set(framebuffer);
    }

    fn attach_texture_2d(&self, framebuffer: Self::Framebuffer, attachment: Attachment, texture: Self::Texture) {
        self.with_framebuffer(framebuffer, |gl| unsafe {
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                attachment_point(attachment),
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
        });
    }

    fn attach_renderbuffer(
        &self,
        framebuffer: Self::Framebuffer,
        attachment: Attachment,
        renderbuffer: Self::Renderbuffer,
    ) {
        self.with_framebuffer(framebuffer, |gl| unsafe {
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                attachment_point(attachment),
                glow::RENDERBUFFER,
                Some(renderbuffer),
            );
        });
    }

    fn set_draw_buffers(&self, framebuffer: Self::Framebuffer, attachments: &[Attachment]) {
        let buffers: Vec<u32> = if attachments.is_empty() {
            vec![glow::NONE]
        } else {
            attachments.iter().copied().map(attachment_point).collect()
        };
        self.with_framebuffer(framebuffer, |gl| unsafe { gl.draw_buffers(&buffers) });
    }

    fn clear(&self, mask: ClearMask) {
        let mut bits = 0;
        if mask.contains(ClearMask::COLOR) {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if mask.contains(ClearMask::DEPTH) {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        unsafe {
            self.gl.clear_color(0.0, 0.0, 0.0, 0.0);
            self.gl.clear_depth_f32(1.0);
            self.gl.clear(bits);
        }
    }

    fn clear_color_buffer(&self, draw_buffer: u32, color: Vec4) {
        unsafe {
            self.gl
                .clear_buffer_f32_slice(glow::COLOR, draw_buffer, &color.to_array());
        }
    }

    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer) {
        unsafe { self.gl.delete_framebuffer(framebuffer) };
    }

    fn create_buffer(&self) -> Result<Self::Buffer> {
        unsafe { self.gl.create_buffer() }.map_err(resource_error("buffer"))
    }

    fn buffer_data(&self, buffer: Self::Buffer, data: &[u8], usage: BufferUsage) {
        let usage = match usage {
            BufferUsage::DynamicDraw => glow::DYNAMIC_DRAW,
            BufferUsage::StaticDraw => glow::STATIC_DRAW,
        };
        unsafe {
            self.gl.bind_buffer(glow::SHADER_STORAGE_BUFFER, Some(buffer));
            self.gl
                .buffer_data_u8_slice(glow::SHADER_STORAGE_BUFFER, data, usage);
            self.gl.bind_buffer(glow::SHADER_STORAGE_BUFFER, None);
        }
    }

    fn bind_storage_buffer(&self, slot: u32, buffer: Option<Self::Buffer>) {
        unsafe {
            self.gl
                .bind_buffer_base(glow::SHADER_STORAGE_BUFFER, slot, buffer);
        }
    }

    fn delete_buffer(&self, buffer: Self::Buffer) {
        unsafe { self.gl.delete_buffer(buffer) };
    }

    fn create_vertex_array(&self) -> Result<Self::VertexArray> {
        unsafe { self.gl.create_vertex_array() }.map_err(resource_error("vertex array"))
    }

    fn draw_arrays(&self, vertex_array: Self::VertexArray, primitive: Primitive, first: u32, count: u32) {
        let mode = match primitive {
            Primitive::Triangles => glow::TRIANGLES,
            Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        };
        unsafe {
            self.gl.bind_vertex_array(Some(vertex_array));
            self.gl.draw_arrays(mode, gl_size(first), gl_size(count));
            self.gl.bind_vertex_array(None);
        }
    }

    fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        unsafe { self.gl.delete_vertex_array(vertex_array) };
    }

    fn viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        unsafe { self.gl.viewport(x, y, gl_size(width), gl_size(height)) };
    }

    fn set_capability(&self, cap: Capability, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(capability(cap));
            } else {
                self.gl.disable(capability(cap));
            }
        }
    }

    fn depth_mask(&self, enabled: bool) {
        unsafe { self.gl.depth_mask(enabled) };
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        unsafe { self.gl.blend_func(blend_factor(src), blend_factor(dst)) };
    }

    fn memory_barrier(&self, barrier: Barrier) {
        unsafe { self.gl.memory_barrier(barrier_bits(barrier)) };
    }

    fn error(&self) -> Option<GlErrorCode> {
        GlErrorCode::from_raw(unsafe { self.gl.get_error() })
    }

    fn read_pixels_rgba8(&self, framebuffer: Self::Framebuffer, width: u32, height: u32) -> Vec<u8> {
        let len = width as usize * height as usize * TextureFormat::Rgba8.texel_size();
        let mut pixels = vec![0; len];
        unsafe {
            self.gl
                .bind_framebuffer(glow::READ_FRAMEBUFFER, Some(framebuffer));
            self.gl.read_buffer(glow::COLOR_ATTACHMENT0);
            self.gl.read_pixels(
                0,
                0,
                gl_size(width),
                gl_size(height),
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelPackData::Slice(Some(&mut pixels)),
            );
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
        }
        pixels
    }
}

/// Route driver debug messages (`KHR_debug`) to the `log` facade.
///
/// Must be called before the context is shared, since installing the
/// callback needs exclusive access. With `synchronous` set, messages are
/// emitted on the thread and inside the call that caused them, which makes
/// them attributable at the cost of throughput.
///
/// # Safety
///
/// The context must be current on the calling thread and support OpenGL 4.3
/// or `KHR_debug`.
pub unsafe fn setup_debug_output(gl: &mut glow::Context, synchronous: bool) {
    unsafe {
        gl.enable(glow::DEBUG_OUTPUT);
        if synchronous {
            gl.enable(glow::DEBUG_OUTPUT_SYNCHRONOUS);
        } else {
            gl.disable(glow::DEBUG_OUTPUT_SYNCHRONOUS);
        }
        gl.debug_message_callback(log_debug_message);
    }
    log::debug!("GL debug output enabled (synchronous: {synchronous})");
}

fn log_debug_message(source: u32, kind: u32, id: u32, severity: u32, message: &str) {
    let level = match severity {
        glow::DEBUG_SEVERITY_HIGH => log::Level::Error,
        glow::DEBUG_SEVERITY_MEDIUM => log::Level::Warn,
        glow::DEBUG_SEVERITY_LOW => log::Level::Info,
        _ => log::Level::Debug,
    };
    let level = if kind == glow::DEBUG_TYPE_ERROR {
        log::Level::Error
    } else {
        level
    };
    log::log!(
        target: "hybrid_oit_glow::gl",
        level,
        "[{} {}] {id:#x}: {message}",
        debug_source_name(source),
        debug_type_name(kind),
    );
}

fn debug_source_name(source: u32) -> &'static str {
    match source {
        glow::DEBUG_SOURCE_API => "api",
        glow::DEBUG_SOURCE_WINDOW_SYSTEM => "window-system",
        glow::DEBUG_SOURCE_SHADER_COMPILER => "shader-compiler",
        glow::DEBUG_SOURCE_THIRD_PARTY => "third-party",
        glow::DEBUG_SOURCE_APPLICATION => "application",
        _ => "other",
    }
}

fn debug_type_name(kind: u32) -> &'static str {
    match kind {
        glow::DEBUG_TYPE_ERROR => "error",
        glow::DEBUG_TYPE_DEPRECATED_BEHAVIOR => "deprecated",
        glow::DEBUG_TYPE_UNDEFINED_BEHAVIOR => "undefined",
        glow::DEBUG_TYPE_PORTABILITY => "portability",
        glow::DEBUG_TYPE_PERFORMANCE => "performance",
        glow::DEBUG_TYPE_MARKER => "marker",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_size_saturates() {
        assert_eq!(gl_size(640), 640);
        assert_eq!(gl_size(u32::MAX), i32::MAX);
    }

    #[test]
    fn barrier_bits_combine() {
        assert_eq!(
            barrier_bits(Barrier::SHADER_STORAGE),
            glow::SHADER_STORAGE_BARRIER_BIT
        );
        assert_eq!(
            barrier_bits(Barrier::SHADER_STORAGE | Barrier::FRAMEBUFFER),
            glow::SHADER_STORAGE_BARRIER_BIT | glow::FRAMEBUFFER_BARRIER_BIT
        );
    }

    #[test]
    fn attachment_points_offset_from_color0() {
        assert_eq!(attachment_point(Attachment::Color(1)), glow::COLOR_ATTACHMENT1);
        assert_eq!(attachment_point(Attachment::Depth), glow::DEPTH_ATTACHMENT);
    }
}
