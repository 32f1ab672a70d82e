//! Program objects: attached stages, lazy relinking and cached uniforms.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::device::{Device, UniformValue};
use crate::error::Result;
use crate::notify::{ChangeListener, Listeners};
use crate::shader::Shader;

/// A linked GPU program.
///
/// The program listens to every attached [`Shader`]: when a shader's source
/// changes the program is marked dirty and relinked on its next use, and the
/// program's own listeners are told. Uniform locations are looked up once
/// per link and cached.
pub struct Program<D: Device> {
    device: Rc<D>,
    handle: D::Program,
    shaders: RefCell<Vec<Rc<Shader<D>>>>,
    dirty: Cell<bool>,
    uniforms: RefCell<FxHashMap<String, Option<D::UniformLocation>>>,
    listeners: Listeners,
    this: Weak<Self>,
}

impl<D: Device> Program<D> {
    /// Create an empty program.
    ///
    /// # Errors
    ///
    /// Fails if the driver refuses to create the program object.
    pub fn new(device: &Rc<D>) -> Result<Rc<Self>> {
        let handle = device.create_program()?;
        Ok(Rc::new_cyclic(|this| Self {
            device: Rc::clone(device),
            handle,
            shaders: RefCell::new(Vec::new()),
            dirty: Cell::new(true),
            uniforms: RefCell::new(FxHashMap::default()),
            listeners: Listeners::new(),
            this: this.clone(),
        }))
    }

    /// Create a program from `shaders` and link it.
    ///
    /// # Errors
    ///
    /// Fails on program creation or link errors.
    pub fn with_shaders(device: &Rc<D>, shaders: &[&Rc<Shader<D>>]) -> Result<Rc<Self>> {
        let program = Self::new(device)?;
        for shader in shaders {
            program.attach(shader);
        }
        program.link()?;
        Ok(program)
    }

    fn as_listener(&self) -> Weak<dyn ChangeListener> {
        self.this.clone()
    }

    /// Attach a shader stage. The program relinks on its next use.
    pub fn attach(&self, shader: &Rc<Shader<D>>) {
        self.device.attach_shader(self.handle, shader.handle());
        shader.register_listener(self.as_listener());
        self.shaders.borrow_mut().push(Rc::clone(shader));
        self.invalidate();
    }

    /// Detach a shader stage. Returns whether it was attached.
    pub fn detach(&self, shader: &Rc<Shader<D>>) -> bool {
        let removed = {
            let mut shaders = self.shaders.borrow_mut();
            let before = shaders.len();
            shaders.retain(|attached| !Rc::ptr_eq(attached, shader));
            shaders.len() != before
        };
        if removed {
            self.device.detach_shader(self.handle, shader.handle());
            shader.deregister_listener(&self.as_listener());
            self.invalidate();
        }
        removed
    }

    /// Number of attached stages.
    #[must_use]
    pub fn shader_count(&self) -> usize {
        self.shaders.borrow().len()
    }

    /// Link the program now.
    ///
    /// Clears the dirty flag even on failure, so a broken program is not
    /// relinked every frame; the next shader change retries.
    ///
    /// # Errors
    ///
    /// Returns the driver's link log on failure.
    pub fn link(&self) -> Result<()> {
        self.dirty.set(false);
        self.uniforms.borrow_mut().clear();
        self.device.link_program(self.handle)
    }

    /// Whether the program will relink on its next use.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    fn ensure_linked(&self) {
        if self.dirty.get() {
            if let Err(err) = self.link() {
                log::error!("relinking program {:?}: {err}", self.handle);
            }
        }
    }

    /// Make this program current, relinking first if a stage changed.
    pub fn use_program(&self) {
        self.ensure_linked();
        self.device.use_program(Some(self.handle));
    }

    /// Unbind whatever program is current.
    pub fn release(&self) {
        self.device.use_program(None);
    }

    /// Set a uniform by name.
    ///
    /// Names the driver doesn't know (including uniforms optimized out of
    /// the stage) are ignored.
    pub fn set_uniform(&self, name: &str, value: impl Into<UniformValue>) {
        self.ensure_linked();
        let location = {
            let mut uniforms = self.uniforms.borrow_mut();
            if let Some(cached) = uniforms.get(name) {
                cached.clone()
            } else {
                let location = self.device.uniform_location(self.handle, name);
                if location.is_none() {
                    log::trace!("program {:?} has no active uniform {name:?}", self.handle);
                }
                uniforms.insert(name.to_owned(), location.clone());
                location
            }
        };
        if let Some(location) = location {
            self.device
                .set_uniform(self.handle, &location, value.into());
        }
    }

    /// Make this (compute) program current and dispatch it.
    pub fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        self.use_program();
        self.device.dispatch_compute(x, y, z);
    }

    /// The native handle.
    #[must_use]
    pub fn handle(&self) -> D::Program {
        self.handle
    }

    /// Register a listener notified whenever the program is invalidated.
    pub fn register_listener(&self, listener: Weak<dyn ChangeListener>) {
        self.listeners.register(listener);
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn deregister_listener(&self, listener: &Weak<dyn ChangeListener>) -> bool {
        self.listeners.deregister(listener)
    }

    fn invalidate(&self) {
        self.dirty.set(true);
        self.listeners.notify();
    }
}

impl<D: Device> ChangeListener for Program<D> {
    fn on_changed(&self) {
        self.invalidate();
    }
}

impl<D: Device> fmt::Debug for Program<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.handle)
            .field("shaders", &self.shaders.borrow().len())
            .field("dirty", &self.dirty.get())
            .finish_non_exhaustive()
    }
}

impl<D: Device> Drop for Program<D> {
    fn drop(&mut self) {
        let listener = self.as_listener();
        for shader in self.shaders.borrow_mut().drain(..) {
            shader.deregister_listener(&listener);
            self.device.detach_shader(self.handle, shader.handle());
        }
        self.device.delete_program(self.handle);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use glam::IVec2;

    use super::*;
    use crate::device::ShaderStage;
    use crate::recording::{Command, RecordingDevice};
    use crate::shader::NamedStrings;

    fn shader(device: &Rc<RecordingDevice>, stage: ShaderStage, source: &str) -> Rc<Shader<RecordingDevice>> {
        Shader::from_source(device, stage, source, &NamedStrings::new()).unwrap()
    }

    #[derive(Default)]
    struct Invalidations(Cell<u32>);

    impl ChangeListener for Invalidations {
        fn on_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn with_shaders_links_once_and_registers_with_each_stage() {
        let device = Rc::new(RecordingDevice::new());
        let vs = shader(&device, ShaderStage::Vertex, "vs");
        let fs = shader(&device, ShaderStage::Fragment, "fs");

        let program = Program::with_shaders(&device, &[&vs, &fs]).unwrap();

        assert!(!program.is_dirty());
        assert_eq!(vs.listener_count(), 1);
        assert_eq!(fs.listener_count(), 1);
        let state = device.state.borrow();
        let record = &state.programs[&program.handle()];
        assert_eq!(record.links, 1);
        assert_eq!(record.shaders, vec![vs.handle(), fs.handle()]);
    }

    #[test]
    fn shader_change_relinks_on_next_use_and_notifies() {
        let device = Rc::new(RecordingDevice::new());
        let vs = shader(&device, ShaderStage::Vertex, "vs");
        let program = Program::with_shaders(&device, &[&vs]).unwrap();
        let counter = Rc::new(Invalidations::default());
        let listener: Rc<dyn ChangeListener> = counter.clone();
        program.register_listener(Rc::downgrade(&listener));

        vs.set_source("vs v2", &NamedStrings::new()).unwrap();
        assert!(program.is_dirty());
        assert_eq!(counter.0.get(), 1);

        program.use_program();
        assert!(!program.is_dirty());
        assert_eq!(device.state.borrow().programs[&program.handle()].links, 2);
    }

    #[test]
    fn failed_recompile_leaves_program_clean() {
        let device = Rc::new(RecordingDevice::new());
        let vs = shader(&device, ShaderStage::Vertex, "vs");
        let program = Program::with_shaders(&device, &[&vs]).unwrap();
        device.state.borrow_mut().fail_compile_marker = Some("broken".into());

        assert!(vs.set_source("broken", &NamedStrings::new()).is_err());
        assert!(!program.is_dirty());
    }

    #[test]
    fn dropping_program_deregisters_from_shaders() {
        let device = Rc::new(RecordingDevice::new());
        let vs = shader(&device, ShaderStage::Vertex, "vs");
        let program = Program::with_shaders(&device, &[&vs]).unwrap();
        let handle = program.handle();

        drop(program);

        assert_eq!(vs.listener_count(), 0);
        assert!(!device.state.borrow().programs.contains_key(&handle));
    }

    #[test]
    fn detach_stops_listening() {
        let device = Rc::new(RecordingDevice::new());
        let vs = shader(&device, ShaderStage::Vertex, "vs");
        let program = Program::with_shaders(&device, &[&vs]).unwrap();

        assert!(program.detach(&vs));
        assert!(!program.detach(&vs));
        assert_eq!(vs.listener_count(), 0);
        assert_eq!(program.shader_count(), 0);
        assert!(program.is_dirty());
    }

    #[test]
    fn set_uniform_uploads_to_the_program() {
        let device = Rc::new(RecordingDevice::new());
        let program = Program::with_shaders(&device, &[]).unwrap();

        program.set_uniform("screenSize", IVec2::new(4, 3));
        program.set_uniform("screenSize", IVec2::new(8, 6));

        let state = device.state.borrow();
        assert_eq!(
            state.programs[&program.handle()].uniforms["screenSize"],
            UniformValue::IVec2(IVec2::new(8, 6))
        );
    }

    #[test]
    fn dispatch_uses_program_first() {
        let device = Rc::new(RecordingDevice::new());
        let program = Program::with_shaders(&device, &[]).unwrap();
        device.clear_commands();

        program.dispatch_compute(3, 1, 1);

        assert_eq!(
            device.commands(),
            vec![
                Command::UseProgram(Some(program.handle())),
                Command::Dispatch(3, 1, 1),
            ]
        );
    }
}
