//! A [`Device`] that records the command stream instead of talking to a GPU.
//!
//! Keeps enough state (object storage sizes, buffer contents, bindings,
//! fixed-function toggles) for tests to assert on what a frame did.

use std::cell::RefCell;

use glam::Vec4;
use rustc_hash::FxHashMap;

use crate::device::{
    Attachment, Barrier, BlendFactor, BufferUsage, Capability, ClearMask, Device, Primitive,
    ShaderStage, TextureFormat, UniformValue,
};
use crate::error::{Error, GlErrorCode, Result};

/// One recorded state-changing call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Viewport(u32, u32),
    BindFramebuffer(Option<u32>),
    DrawBuffers(u32, Vec<Attachment>),
    Clear(ClearMask),
    ClearColor(u32, Vec4),
    Capability(Capability, bool),
    DepthMask(bool),
    BlendFunc(BlendFactor, BlendFactor),
    UseProgram(Option<u32>),
    Uniform(u32, String, UniformValue),
    BufferData(u32, usize),
    BindStorage(u32, Option<u32>),
    Dispatch(u32, u32, u32),
    MemoryBarrier(Barrier),
    BindTextureUnit(u32, Option<u32>),
    DrawArrays(Primitive, u32, u32),
    Marker(String),
}

#[derive(Debug, Default)]
pub struct ProgramRecord {
    pub shaders: Vec<u32>,
    pub links: u32,
    pub uniforms: FxHashMap<String, UniformValue>,
}

#[derive(Debug, Default)]
pub struct FramebufferRecord {
    pub textures: Vec<(Attachment, u32)>,
    pub renderbuffers: Vec<(Attachment, u32)>,
    pub draw_buffers: Vec<Attachment>,
}

#[derive(Debug)]
pub struct State {
    next_id: u32,
    pub commands: Vec<Command>,
    pub shader_sources: FxHashMap<u32, String>,
    pub programs: FxHashMap<u32, ProgramRecord>,
    pub textures: FxHashMap<u32, Option<(TextureFormat, u32, u32)>>,
    pub renderbuffers: FxHashMap<u32, Option<(u32, u32)>>,
    pub framebuffers: FxHashMap<u32, FramebufferRecord>,
    pub buffers: FxHashMap<u32, Vec<u8>>,
    pub storage_bindings: FxHashMap<u32, Option<u32>>,
    pub texture_units: FxHashMap<u32, Option<u32>>,
    pub bound_framebuffer: Option<u32>,
    pub current_program: Option<u32>,
    pub depth_test: bool,
    pub blend: bool,
    pub depth_mask: bool,
    pub blend_func: Option<(BlendFactor, BlendFactor)>,
    pub pending_errors: Vec<GlErrorCode>,
    /// Shader sources containing this marker fail to compile.
    pub fail_compile_marker: Option<String>,
    pub fail_link: bool,
    pub deleted: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            commands: Vec::new(),
            shader_sources: FxHashMap::default(),
            programs: FxHashMap::default(),
            textures: FxHashMap::default(),
            renderbuffers: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            buffers: FxHashMap::default(),
            storage_bindings: FxHashMap::default(),
            texture_units: FxHashMap::default(),
            bound_framebuffer: None,
            current_program: None,
            depth_test: false,
            blend: false,
            depth_mask: true,
            blend_func: None,
            pending_errors: Vec::new(),
            fail_compile_marker: None,
            fail_link: false,
            deleted: 0,
        }
    }
}

impl State {
    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Debug, Default)]
pub struct RecordingDevice {
    pub state: RefCell<State>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn mark(&self, label: impl Into<String>) {
        self.record(Command::Marker(label.into()));
    }

    pub fn buffer_u32(&self, buffer: u32) -> Vec<u32> {
        self.state.borrow().buffers[&buffer]
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    pub fn buffer_f32(&self, buffer: u32) -> Vec<f32> {
        self.buffer_u32(buffer).into_iter().map(f32::from_bits).collect()
    }

    /// Overwrite a buffer's contents, as a GPU pass writing into it would.
    pub fn scribble(&self, buffer: u32, value: u8) {
        if let Some(data) = self.state.borrow_mut().buffers.get_mut(&buffer) {
            data.fill(value);
        }
    }

    fn record(&self, command: Command) {
        self.state.borrow_mut().commands.push(command);
    }
}

impl Device for RecordingDevice {
    type Shader = u32;
    type Program = u32;
    type UniformLocation = String;
    type Texture = u32;
    type Renderbuffer = u32;
    type Framebuffer = u32;
    type Buffer = u32;
    type VertexArray = u32;

    fn create_shader(&self, stage: ShaderStage, source: &str) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        if let Some(marker) = &state.fail_compile_marker {
            if source.contains(marker.as_str()) {
                return Err(Error::ShaderCompile {
                    stage,
                    log: format!("found {marker}"),
                });
            }
        }
        let id = state.id();
        state.shader_sources.insert(id, source.to_owned());
        Ok(id)
    }

    fn recompile_shader(&self, shader: u32, stage: ShaderStage, source: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(marker) = &state.fail_compile_marker {
            if source.contains(marker.as_str()) {
                return Err(Error::ShaderCompile {
                    stage,
                    log: format!("found {marker}"),
                });
            }
        }
        state.shader_sources.insert(shader, source.to_owned());
        Ok(())
    }

    fn delete_shader(&self, shader: u32) {
        let mut state = self.state.borrow_mut();
        state.shader_sources.remove(&shader);
        state.deleted += 1;
    }

    fn create_program(&self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state.programs.insert(id, ProgramRecord::default());
        Ok(id)
    }

    fn attach_shader(&self, program: u32, shader: u32) {
        if let Some(record) = self.state.borrow_mut().programs.get_mut(&program) {
            record.shaders.push(shader);
        }
    }

    fn detach_shader(&self, program: u32, shader: u32) {
        if let Some(record) = self.state.borrow_mut().programs.get_mut(&program) {
            record.shaders.retain(|&s| s != shader);
        }
    }

    fn link_program(&self, program: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_link {
            return Err(Error::ProgramLink("link refused".into()));
        }
        if let Some(record) = state.programs.get_mut(&program) {
            record.links += 1;
        }
        Ok(())
    }

    fn use_program(&self, program: Option<u32>) {
        self.state.borrow_mut().current_program = program;
        self.record(Command::UseProgram(program));
    }

    fn delete_program(&self, program: u32) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program);
        state.deleted += 1;
    }

    fn uniform_location(&self, _program: u32, name: &str) -> Option<String> {
        Some(name.to_owned())
    }

    fn set_uniform(&self, program: u32, location: &String, value: UniformValue) {
        if let Some(record) = self.state.borrow_mut().programs.get_mut(&program) {
            record.uniforms.insert(location.clone(), value);
        }
        self.record(Command::Uniform(program, location.clone(), value));
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch(x, y, z));
    }

    fn create_texture(&self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state.textures.insert(id, None);
        Ok(id)
    }

    fn texture_image_2d(&self, texture: u32, format: TextureFormat, width: u32, height: u32) {
        self.state
            .borrow_mut()
            .textures
            .insert(texture, Some((format, width, height)));
    }

    fn bind_texture_unit(&self, unit: u32, texture: Option<u32>) {
        self.state.borrow_mut().texture_units.insert(unit, texture);
        self.record(Command::BindTextureUnit(unit, texture));
    }

    fn delete_texture(&self, texture: u32) {
        let mut state = self.state.borrow_mut();
        state.textures.remove(&texture);
        state.deleted += 1;
    }

    fn create_renderbuffer(&self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state.renderbuffers.insert(id, None);
        Ok(id)
    }

    fn renderbuffer_depth_storage(&self, renderbuffer: u32, width: u32, height: u32) {
        self.state
            .borrow_mut()
            .renderbuffers
            .insert(renderbuffer, Some((width, height)));
    }

    fn delete_renderbuffer(&self, renderbuffer: u32) {
        let mut state = self.state.borrow_mut();
        state.renderbuffers.remove(&renderbuffer);
        state.deleted += 1;
    }

    fn create_framebuffer(&self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state.framebuffers.insert(id, FramebufferRecord::default());
        Ok(id)
    }

    fn bind_framebuffer(&self, framebuffer: Option<u32>) {
        self.state.borrow_mut().bound_framebuffer = framebuffer;
        self.record(Command::BindFramebuffer(framebuffer));
    }

    fn attach_texture_2d(&self, framebuffer: u32, attachment: Attachment, texture: u32) {
        if let Some(record) = self.state.borrow_mut().framebuffers.get_mut(&framebuffer) {
            record.textures.push((attachment, texture));
        }
    }

    fn attach_renderbuffer(&self, framebuffer: u32, attachment: Attachment, renderbuffer: u32) {
        if let Some(record) = self.state.borrow_mut().framebuffers.get_mut(&framebuffer) {
            record.renderbuffers.push((attachment, renderbuffer));
        }
    }

    fn set_draw_buffers(&self, framebuffer: u32, attachments: &[Attachment]) {
        if let Some(record) = self.state.borrow_mut().framebuffers.get_mut(&framebuffer) {
            record.draw_buffers = attachments.to_vec();
        }
        self.record(Command::DrawBuffers(framebuffer, attachments.to_vec()));
    }

    fn clear(&self, mask: ClearMask) {
        self.record(Command::Clear(mask));
    }

    fn clear_color_buffer(&self, draw_buffer: u32, color: Vec4) {
        self.record(Command::ClearColor(draw_buffer, color));
    }

    fn delete_framebuffer(&self, framebuffer: u32) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&framebuffer);
        state.deleted += 1;
    }

    fn create_buffer(&self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        let id = state.id();
        state.buffers.insert(id, Vec::new());
        Ok(id)
    }

    fn buffer_data(&self, buffer: u32, data: &[u8], _usage: BufferUsage) {
        self.state.borrow_mut().buffers.insert(buffer, data.to_vec());
        self.record(Command::BufferData(buffer, data.len()));
    }

    fn bind_storage_buffer(&self, slot: u32, buffer: Option<u32>) {
        self.state.borrow_mut().storage_bindings.insert(slot, buffer);
        self.record(Command::BindStorage(slot, buffer));
    }

    fn delete_buffer(&self, buffer: u32) {
        let mut state = self.state.borrow_mut();
        state.buffers.remove(&buffer);
        state.deleted += 1;
    }

    fn create_vertex_array(&self) -> Result<u32> {
        Ok(self.state.borrow_mut().id())
    }

    fn draw_arrays(&self, _vertex_array: u32, primitive: Primitive, first: u32, count: u32) {
        self.record(Command::DrawArrays(primitive, first, count));
    }

    fn delete_vertex_array(&self, _vertex_array: u32) {
        self.state.borrow_mut().deleted += 1;
    }

    fn viewport(&self, _x: i32, _y: i32, width: u32, height: u32) {
        self.record(Command::Viewport(width, height));
    }

    fn set_capability(&self, capability: Capability, enabled: bool) {
        {
            let mut state = self.state.borrow_mut();
            match capability {
                Capability::DepthTest => state.depth_test = enabled,
                Capability::Blend => state.blend = enabled,
            }
        }
        self.record(Command::Capability(capability, enabled));
    }

    fn depth_mask(&self, enabled: bool) {
        self.state.borrow_mut().depth_mask = enabled;
        self.record(Command::DepthMask(enabled));
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        self.state.borrow_mut().blend_func = Some((src, dst));
        self.record(Command::BlendFunc(src, dst));
    }

    fn memory_barrier(&self, barrier: Barrier) {
        self.record(Command::MemoryBarrier(barrier));
    }

    fn error(&self) -> Option<GlErrorCode> {
        let mut state = self.state.borrow_mut();
        if state.pending_errors.is_empty() {
            None
        } else {
            Some(state.pending_errors.remove(0))
        }
    }

    fn read_pixels_rgba8(&self, _framebuffer: u32, width: u32, height: u32) -> Vec<u8> {
        // Bottom row red, everything else black, so row flips are observable.
        let mut pixels = vec![0; width as usize * height as usize * 4];
        for texel in pixels.chunks_exact_mut(4).take(width as usize) {
            texel.copy_from_slice(&[255, 0, 0, 255]);
        }
        pixels
    }
}
