//! The narrow contract the pipeline needs from the native graphics API.
//!
//! [`Device`] is deliberately close to the underlying calls: every method maps
//! onto one or two native commands. Object handles are plain copyable values;
//! their lifetime is managed by the owning wrapper (`Shader`, `Program`,
//! `FrameResources`), which calls the matching `delete_*` on drop.

use std::fmt;
use std::hash::Hash;

use bitflags::bitflags;
use glam::{IVec2, Mat3, Mat4, Vec4};

use crate::error::{GlErrorCode, Result};

/// Programmable pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Geometry stage.
    Geometry,
    /// Fragment stage.
    Fragment,
    /// Compute stage.
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

/// Internal format of a 2D frame target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA.
    Rgba8,
    /// 32-bit float RGBA.
    Rgba32F,
}

impl TextureFormat {
    /// Bytes per texel.
    #[must_use]
    pub fn texel_size(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba32F => 16,
        }
    }
}

/// Framebuffer attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Color attachment `n`.
    Color(u32),
    /// The depth attachment.
    Depth,
}

/// Fixed-function state toggled by the passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Depth testing.
    DepthTest,
    /// Color blending.
    Blend,
}

/// Blend factors used by the passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// `GL_ONE`
    One,
    /// `GL_SRC_ALPHA`
    SrcAlpha,
    /// `GL_ONE_MINUS_SRC_ALPHA`
    OneMinusSrcAlpha,
}

/// Usage hint for buffer uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Rewritten every frame, read by the GPU.
    DynamicDraw,
    /// Written once.
    StaticDraw,
}

/// Primitive topology for non-indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Independent triangles.
    Triangles,
    /// Triangle strip.
    TriangleStrip,
}

bitflags! {
    /// Buffers cleared by [`Device::clear`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMask: u8 {
        /// Every enabled color draw buffer.
        const COLOR = 1;
        /// The depth attachment.
        const DEPTH = 1 << 1;
    }
}

bitflags! {
    /// Memory barrier bits accepted by [`Device::memory_barrier`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Barrier: u8 {
        /// Shader storage writes become visible to later shader storage reads.
        const SHADER_STORAGE = 1;
        /// Image/texture fetches see earlier writes.
        const TEXTURE_FETCH = 1 << 1;
        /// Framebuffer reads and writes are ordered after earlier writes.
        const FRAMEBUFFER = 1 << 2;
    }
}

/// A value uploaded to a program uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// `int` or sampler unit.
    Int(i32),
    /// `float`
    Float(f32),
    /// `ivec2`
    IVec2(IVec2),
    /// `vec4`
    Vec4(Vec4),
    /// `mat3`, column major.
    Mat3(Mat3),
    /// `mat4`, column major.
    Mat4(Mat4),
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<IVec2> for UniformValue {
    fn from(value: IVec2) -> Self {
        Self::IVec2(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        Self::Vec4(value)
    }
}

impl From<Mat3> for UniformValue {
    fn from(value: Mat3) -> Self {
        Self::Mat3(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value)
    }
}

/// Handle bound shared by every native object type.
pub trait Handle: Copy + Eq + Hash + fmt::Debug + 'static {}

impl<T: Copy + Eq + Hash + fmt::Debug + 'static> Handle for T {}

/// Native graphics API operations used by the transparency pipeline.
///
/// Framebuffer operations without an explicit framebuffer argument act on
/// the framebuffer most recently passed to [`bind_framebuffer`]. Setup
/// operations that take a framebuffer argument must leave that binding
/// unchanged.
///
/// [`bind_framebuffer`]: Device::bind_framebuffer
pub trait Device: 'static {
    /// Compiled shader stage.
    type Shader: Handle;
    /// Program object.
    type Program: Handle;
    /// Resolved uniform location.
    type UniformLocation: Clone + fmt::Debug + 'static;
    /// 2D texture.
    type Texture: Handle;
    /// Renderbuffer.
    type Renderbuffer: Handle;
    /// Framebuffer object.
    type Framebuffer: Handle;
    /// Buffer object.
    type Buffer: Handle;
    /// Vertex array object.
    type VertexArray: Handle;

    /// Creates and compiles a shader stage.
    fn create_shader(&self, stage: ShaderStage, source: &str) -> Result<Self::Shader>;
    /// Replaces a shader's source and recompiles it in place.
    fn recompile_shader(&self, shader: Self::Shader, stage: ShaderStage, source: &str)
        -> Result<()>;
    /// Deletes a shader stage.
    fn delete_shader(&self, shader: Self::Shader);

    /// Creates an empty program.
    fn create_program(&self) -> Result<Self::Program>;
    /// Attaches a stage to a program.
    fn attach_shader(&self, program: Self::Program, shader: Self::Shader);
    /// Detaches a stage from a program.
    fn detach_shader(&self, program: Self::Program, shader: Self::Shader);
    /// Links a program, returning the info log on failure.
    fn link_program(&self, program: Self::Program) -> Result<()>;
    /// Makes a program current, or unbinds with `None`.
    fn use_program(&self, program: Option<Self::Program>);
    /// Deletes a program.
    fn delete_program(&self, program: Self::Program);
    /// Looks up a uniform. `None` for unknown or optimized-out names.
    fn uniform_location(&self, program: Self::Program, name: &str)
        -> Option<Self::UniformLocation>;
    /// Uploads a uniform value to `program`.
    fn set_uniform(
        &self,
        program: Self::Program,
        location: &Self::UniformLocation,
        value: UniformValue,
    );
    /// Dispatches the current compute program.
    fn dispatch_compute(&self, x: u32, y: u32, z: u32);

    /// Creates a 2D texture without storage.
    fn create_texture(&self) -> Result<Self::Texture>;
    /// (Re)specifies a texture's storage, discarding its contents.
    fn texture_image_2d(&self, texture: Self::Texture, format: TextureFormat, width: u32, height: u32);
    /// Binds a texture to texture unit `unit`, or unbinds with `None`.
    fn bind_texture_unit(&self, unit: u32, texture: Option<Self::Texture>);
    /// Deletes a texture.
    fn delete_texture(&self, texture: Self::Texture);

    /// Creates a renderbuffer without storage.
    fn create_renderbuffer(&self) -> Result<Self::Renderbuffer>;
    /// (Re)specifies depth-only storage for a renderbuffer.
    fn renderbuffer_depth_storage(&self, renderbuffer: Self::Renderbuffer, width: u32, height: u32);
    /// Deletes a renderbuffer.
    fn delete_renderbuffer(&self, renderbuffer: Self::Renderbuffer);

    /// Creates a framebuffer object.
    fn create_framebuffer(&self) -> Result<Self::Framebuffer>;
    /// Binds a framebuffer for drawing, or the default framebuffer with `None`.
    fn bind_framebuffer(&self, framebuffer: Option<Self::Framebuffer>);
    /// Attaches a texture's level 0 to `framebuffer`.
    fn attach_texture_2d(&self, framebuffer: Self::Framebuffer, attachment: Attachment, texture: Self::Texture);
    /// Attaches a renderbuffer to `framebuffer`.
    fn attach_renderbuffer(
        &self,
        framebuffer: Self::Framebuffer,
        attachment: Attachment,
        renderbuffer: Self::Renderbuffer,
    );
    /// Selects the color draw buffers; an empty slice disables color writes.
    fn set_draw_buffers(&self, framebuffer: Self::Framebuffer, attachments: &[Attachment]);
    /// Clears the bound framebuffer. Color clears use transparent black.
    fn clear(&self, mask: ClearMask);
    /// Clears a single color draw buffer of the bound framebuffer.
    fn clear_color_buffer(&self, draw_buffer: u32, color: Vec4);
    /// Deletes a framebuffer.
    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer);

    /// Creates a buffer object.
    fn create_buffer(&self) -> Result<Self::Buffer>;
    /// Replaces a shader storage buffer's data store.
    fn buffer_data(&self, buffer: Self::Buffer, data: &[u8], usage: BufferUsage);
    /// Binds a buffer to an indexed shader storage binding point.
    fn bind_storage_buffer(&self, slot: u32, buffer: Option<Self::Buffer>);
    /// Deletes a buffer object.
    fn delete_buffer(&self, buffer: Self::Buffer);

    /// Creates a vertex array object.
    fn create_vertex_array(&self) -> Result<Self::VertexArray>;
    /// Draws `count` vertices from `vertex_array` with the current program.
    fn draw_arrays(&self, vertex_array: Self::VertexArray, primitive: Primitive, first: u32, count: u32);
    /// Deletes a vertex array object.
    fn delete_vertex_array(&self, vertex_array: Self::VertexArray);

    /// Sets the viewport rectangle.
    fn viewport(&self, x: i32, y: i32, width: u32, height: u32);
    /// Enables or disables a capability.
    fn set_capability(&self, capability: Capability, enabled: bool);
    /// Enables or disables depth writes.
    fn depth_mask(&self, enabled: bool);
    /// Sets the blend function.
    fn blend_func(&self, src: BlendFactor, dst: BlendFactor);
    /// Orders memory accesses across pipeline stages.
    fn memory_barrier(&self, barrier: Barrier);

    /// Pops the next queued native error, if any.
    fn error(&self) -> Option<GlErrorCode>;
    /// Reads color attachment 0 of `framebuffer` as bottom-up RGBA8 rows.
    fn read_pixels_rgba8(&self, framebuffer: Self::Framebuffer, width: u32, height: u32) -> Vec<u8>;
}
