//! The hybrid transparency pipeline.
//!
//! A frame runs five passes:
//!
//! 1. **Opaque**: opaque geometry into the opaque target and the shared
//!    depth buffer.
//! 2. **Depth capture**: translucent geometry, depth-tested but not
//!    depth-written, keeps the `k` nearest fragments per pixel in the depth
//!    k-table.
//! 3. **Visibility resolve** (compute): turns each pixel's k-table into
//!    per-slot transmittance factors.
//! 4. **Color accumulation**: translucent geometry again; k-table fragments
//!    are weighted by their factor into the core target, the rest are
//!    summed into the accumulation target. Every fragment bumps the pixel's
//!    depth complexity.
//! 5. **Composition**: core, averaged tail and opaque image are combined in
//!    a full-screen pass.
//!
//! Storage written by one pass and read by the next is fenced with a shader
//! storage barrier after the capture, resolve and color passes.

use std::path::PathBuf;
use std::rc::Rc;

use glam::{IVec2, Vec4};

use crate::camera::Camera;
use crate::device::{
    Attachment, Barrier, BlendFactor, Capability, ClearMask, Device, Primitive, ShaderStage,
};
use crate::error::{self, Result};
use crate::program::Program;
use crate::resources::{pixel_count, FrameResources};
use crate::shader::{read_source, NamedStrings, Shader};
use crate::shaders;

/// Storage binding of the depth k-table.
pub const DEPTH_KTAB_BINDING: u32 = 0;
/// Storage binding of the visibility k-table.
pub const VISIBILITY_KTAB_BINDING: u32 = 1;
/// Storage binding of the depth-complexity counters.
pub const DEPTH_COMPLEXITY_BINDING: u32 = 2;

/// Texture unit of the opaque target during composition.
pub const OPAQUE_TEXTURE_UNIT: u32 = 0;
/// Texture unit of the core target during composition.
pub const CORE_TEXTURE_UNIT: u32 = 1;
/// Texture unit of the accumulation target during composition.
pub const ACCUMULATION_TEXTURE_UNIT: u32 = 2;

/// Invocations per visibility resolve workgroup.
pub const VISIBILITY_WORKGROUP_SIZE: u32 = 32;

/// Workgroups needed to resolve `pixels` pixels, one invocation each.
#[must_use]
pub fn workgroup_count(pixels: u32) -> u32 {
    pixels.div_ceil(VISIBILITY_WORKGROUP_SIZE)
}

/// Saturating conversion for values uploaded as GLSL `int`s.
fn gl_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Where the pass shaders come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShaderSource {
    /// The sources compiled into the crate (see [`shaders`]).
    #[default]
    Embedded,
    /// A directory holding the `*_FILE` names from [`shaders`]. Enables
    /// [`HybridAlgorithm::reload_shaders`].
    Directory(PathBuf),
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridConfig {
    /// Where the pass shaders are loaded from.
    pub shader_source: ShaderSource,
    /// Clear color of the opaque target. Its alpha is ignored by
    /// composition.
    pub opaque_clear_color: Vec4,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            shader_source: ShaderSource::Embedded,
            opaque_clear_color: Vec4::ONE,
        }
    }
}

/// The five programs a frame runs.
pub struct HybridPrograms<D: Device> {
    /// Opaque pass.
    pub opaque: Rc<Program<D>>,
    /// Depth k-table capture pass.
    pub depth_ktab: Rc<Program<D>>,
    /// Visibility resolve compute pass.
    pub visibility_ktab: Rc<Program<D>>,
    /// Color accumulation pass.
    pub color: Rc<Program<D>>,
    /// Composition pass.
    pub post: Rc<Program<D>>,
}

/// Pipeline-owned shader stages, kept for reloading.
struct PassShaders<D: Device> {
    opaque: Rc<Shader<D>>,
    depth_ktab: Rc<Shader<D>>,
    visibility_ktab: Rc<Shader<D>>,
    color: Rc<Shader<D>>,
    post: Rc<Shader<D>>,
}

impl<D: Device> PassShaders<D> {
    fn files(&self) -> [(&Rc<Shader<D>>, &'static str); 5] {
        [
            (&self.opaque, shaders::OPAQUE_FILE),
            (&self.depth_ktab, shaders::DEPTH_KTAB_FILE),
            (&self.visibility_ktab, shaders::VISIBILITY_KTAB_FILE),
            (&self.color, shaders::COLOR_FILE),
            (&self.post, shaders::POST_FILE),
        ]
    }
}

fn load_named_strings(source: &ShaderSource) -> Result<NamedStrings> {
    Ok(match source {
        ShaderSource::Embedded => shaders::named_strings(shaders::HYBRID_COMMON_SRC),
        ShaderSource::Directory(dir) => {
            shaders::named_strings(&read_source(&dir.join(shaders::COMMON_FILE))?)
        }
    })
}

fn load_stage<D: Device>(
    device: &Rc<D>,
    source: &ShaderSource,
    named: &NamedStrings,
    stage: ShaderStage,
    file: &str,
    embedded: &str,
) -> Result<Rc<Shader<D>>> {
    match source {
        ShaderSource::Embedded => Shader::from_source(device, stage, embedded, named),
        ShaderSource::Directory(dir) => Shader::from_file(device, stage, dir.join(file), named),
    }
}

/// Hybrid order-independent transparency.
///
/// Translucent geometry is drawn twice per frame and needs no sorting: the
/// `k` nearest layers of every pixel are blended exactly, anything behind
/// them is approximated by an alpha-weighted average.
///
/// # Example
///
/// ```no_run
/// # use std::rc::Rc;
/// # use hybrid_oit_glow::device::{Device, ShaderStage};
/// # use hybrid_oit_glow::shaders::DEFAULT_VERTEX_SRC;
/// # use hybrid_oit_glow::{HybridAlgorithm, HybridConfig, NamedStrings, PerspectiveCamera, Program, Shader};
/// # fn example<D: Device>(device: Rc<D>) -> hybrid_oit_glow::Result<()> {
/// let vertex = Shader::from_source(&device, ShaderStage::Vertex, DEFAULT_VERTEX_SRC, &NamedStrings::new())?;
/// let mut hybrid = HybridAlgorithm::initialize(device, HybridConfig::default(), &vertex, None)?;
/// let mut camera = PerspectiveCamera::default();
///
/// hybrid.resize(800, 600);
/// hybrid.draw(
///     |_program: &Program<D>| {
///         // Issue the scene's draw calls against the active program.
///     },
///     &mut camera,
///     800,
///     600,
/// );
/// # Ok(())
/// # }
/// ```
pub struct HybridAlgorithm<D: Device> {
    device: Rc<D>,
    config: HybridConfig,
    shaders: PassShaders<D>,
    programs: HybridPrograms<D>,
    resources: FrameResources<D>,
}

impl<D: Device> HybridAlgorithm<D> {
    /// Build the pass programs around the caller's geometry stages and
    /// create the frame resources.
    ///
    /// The opaque, capture and color programs use `vertex_shader` (and
    /// `geometry_shader`, if any); the resolve and composition programs
    /// bring their own stages. Storage is allocated by the first
    /// [`resize`](Self::resize) or [`draw`](Self::draw).
    ///
    /// # Errors
    ///
    /// Fails if a shader can't be loaded or compiled, a program doesn't
    /// link, or an object can't be created.
    pub fn initialize(
        device: Rc<D>,
        config: HybridConfig,
        vertex_shader: &Rc<Shader<D>>,
        geometry_shader: Option<&Rc<Shader<D>>>,
    ) -> Result<Self> {
        log::debug!("initializing hybrid transparency from {:?}", config.shader_source);
        let named = load_named_strings(&config.shader_source)?;
        let load = |stage, file, embedded| {
            load_stage(&device, &config.shader_source, &named, stage, file, embedded)
        };

        let shaders = PassShaders {
            opaque: load(
                ShaderStage::Fragment,
                shaders::OPAQUE_FILE,
                shaders::OPAQUE_FRAGMENT_SRC,
            )?,
            depth_ktab: load(
                ShaderStage::Fragment,
                shaders::DEPTH_KTAB_FILE,
                shaders::DEPTH_KTAB_FRAGMENT_SRC,
            )?,
            visibility_ktab: load(
                ShaderStage::Compute,
                shaders::VISIBILITY_KTAB_FILE,
                shaders::VISIBILITY_KTAB_COMPUTE_SRC,
            )?,
            color: load(
                ShaderStage::Fragment,
                shaders::COLOR_FILE,
                shaders::COLOR_FRAGMENT_SRC,
            )?,
            post: load(
                ShaderStage::Fragment,
                shaders::POST_FILE,
                shaders::POST_FRAGMENT_SRC,
            )?,
        };
        let screen_quad = Shader::from_source(
            &device,
            ShaderStage::Vertex,
            shaders::SCREEN_QUAD_VERTEX_SRC,
            &named,
        )?;

        let geometry_program = |fragment: &Rc<Shader<D>>| {
            let mut stages = vec![vertex_shader];
            stages.extend(geometry_shader);
            stages.push(fragment);
            Program::with_shaders(&device, &stages)
        };

        let programs = HybridPrograms {
            opaque: geometry_program(&shaders.opaque)?,
            depth_ktab: geometry_program(&shaders.depth_ktab)?,
            visibility_ktab: Program::with_shaders(&device, &[&shaders.visibility_ktab])?,
            color: geometry_program(&shaders.color)?,
            post: Program::with_shaders(&device, &[&screen_quad, &shaders.post])?,
        };

        let resources = FrameResources::new(&device)?;
        error::check(&*device, "HybridAlgorithm::initialize");

        Ok(Self {
            device,
            config,
            shaders,
            programs,
            resources,
        })
    }

    /// Reallocate the frame targets and storage for `width` x `height`.
    ///
    /// Keeps every resource's identity; calling it again with the same size
    /// is harmless.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.resources.resize(width, height);
        error::check(&*self.device, "HybridAlgorithm::resize");
    }

    /// Render one frame into the composited color target.
    ///
    /// `draw_function` is called once for the opaque, depth capture and
    /// color passes with the active program; it must issue the scene's
    /// geometry and leave viewport, depth and blend state alone. Per-object
    /// uniforms such as `color` are the callback's business. A size
    /// differing from the last [`resize`](Self::resize) resizes first;
    /// zero-area frames are skipped.
    pub fn draw<F, C>(&mut self, mut draw_function: F, camera: &mut C, width: u32, height: u32)
    where
        F: FnMut(&Program<D>),
        C: Camera + ?Sized,
    {
        if width == 0 || height == 0 {
            log::debug!("skipping empty {width}x{height} hybrid transparency frame");
            return;
        }
        if self.resources.size() != Some((width, height)) {
            self.resize(width, height);
        }

        let pixels = pixel_count(width, height);
        let screen_size = IVec2::new(gl_int(width), gl_int(height));

        self.device.viewport(0, 0, width, height);
        camera.set_viewport(width, height);
        let view_projection = camera.view_projection();
        let normal = camera.normal();

        let device = &*self.device;
        let resources = &mut self.resources;
        let programs = &self.programs;

        log::trace!("hybrid transparency: opaque pass");
        device.bind_framebuffer(Some(resources.prepass_fbo()));
        device.set_draw_buffers(resources.prepass_fbo(), &[Attachment::Color(0)]);
        device.clear(ClearMask::DEPTH);
        device.clear_color_buffer(0, self.config.opaque_clear_color);
        device.set_capability(Capability::DepthTest, true);
        device.set_capability(Capability::Blend, false);

        programs.opaque.use_program();
        programs.opaque.set_uniform("viewprojectionmatrix", view_projection);
        programs.opaque.set_uniform("normalmatrix", normal);
        draw_function(&programs.opaque);

        log::trace!("hybrid transparency: depth k-table pass");
        device.set_draw_buffers(resources.prepass_fbo(), &[]);
        device.depth_mask(false);
        resources.reset_depth_ktab(pixels);

        programs.depth_ktab.use_program();
        programs.depth_ktab.set_uniform("viewprojectionmatrix", view_projection);
        programs.depth_ktab.set_uniform("normalmatrix", normal);
        programs.depth_ktab.set_uniform("screenSize", screen_size);
        draw_function(&programs.depth_ktab);

        device.depth_mask(true);
        device.bind_framebuffer(None);
        device.memory_barrier(Barrier::SHADER_STORAGE);

        log::trace!("hybrid transparency: visibility k-table pass");
        resources.reset_visibility_ktab(pixels);
        let dimension = width.saturating_mul(height);
        programs.visibility_ktab.use_program();
        programs.visibility_ktab.set_uniform("dimension", gl_int(dimension));
        programs
            .visibility_ktab
            .dispatch_compute(workgroup_count(dimension), 1, 1);
        device.memory_barrier(Barrier::SHADER_STORAGE);

        log::trace!("hybrid transparency: color pass");
        device.bind_framebuffer(Some(resources.color_fbo()));
        device.clear_color_buffer(0, Vec4::ZERO);
        device.clear_color_buffer(1, Vec4::ZERO);
        device.set_capability(Capability::Blend, true);
        device.blend_func(BlendFactor::One, BlendFactor::One);
        device.depth_mask(false);
        resources.reset_depth_complexity(pixels);

        programs.color.use_program();
        programs.color.set_uniform("viewprojectionmatrix", view_projection);
        programs.color.set_uniform("normalmatrix", normal);
        programs.color.set_uniform("screenSize", screen_size);
        draw_function(&programs.color);

        device.depth_mask(true);
        device.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        device.set_capability(Capability::Blend, false);
        device.bind_framebuffer(None);
        device.memory_barrier(Barrier::SHADER_STORAGE);

        log::trace!("hybrid transparency: composition pass");
        device.bind_framebuffer(Some(resources.composition_fbo()));
        device.clear(ClearMask::COLOR);
        device.bind_texture_unit(OPAQUE_TEXTURE_UNIT, Some(resources.opaque_buffer()));
        device.bind_texture_unit(CORE_TEXTURE_UNIT, Some(resources.core_buffer()));
        device.bind_texture_unit(ACCUMULATION_TEXTURE_UNIT, Some(resources.accumulation_buffer()));

        programs.post.use_program();
        programs.post.set_uniform("screenSize", screen_size);
        programs.post.set_uniform("opaqueBuffer", gl_int(OPAQUE_TEXTURE_UNIT));
        programs.post.set_uniform("coreBuffer", gl_int(CORE_TEXTURE_UNIT));
        programs
            .post
            .set_uniform("accumulationBuffer", gl_int(ACCUMULATION_TEXTURE_UNIT));
        device.draw_arrays(resources.quad(), Primitive::TriangleStrip, 0, 4);

        device.bind_texture_unit(OPAQUE_TEXTURE_UNIT, None);
        device.bind_texture_unit(CORE_TEXTURE_UNIT, None);
        device.bind_texture_unit(ACCUMULATION_TEXTURE_UNIT, None);
        device.bind_framebuffer(None);

        error::check(device, "HybridAlgorithm::draw");
    }

    /// Re-read the pass shaders from the configured directory.
    ///
    /// Programs using a changed stage relink on their next use. Does nothing
    /// for embedded shaders.
    ///
    /// # Errors
    ///
    /// Fails if a file can't be read or doesn't compile. Stages reloaded
    /// before the failing one keep their new source.
    pub fn reload_shaders(&self) -> Result<()> {
        let ShaderSource::Directory(dir) = &self.config.shader_source else {
            return Ok(());
        };
        log::debug!("reloading hybrid transparency shaders from {}", dir.display());
        let named = load_named_strings(&self.config.shader_source)?;
        for (shader, file) in self.shaders.files() {
            shader.set_source(&read_source(&dir.join(file))?, &named)?;
        }
        Ok(())
    }

    /// The composited color target.
    #[must_use]
    pub fn color_buffer(&self) -> D::Texture {
        self.resources.color_buffer()
    }

    /// Read the composited color target back, top row first.
    ///
    /// `None` before the first resize.
    #[must_use]
    pub fn read_color(&self) -> Option<image::RgbaImage> {
        let (width, height) = self.resources.size()?;
        let pixels = self
            .device
            .read_pixels_rgba8(self.resources.composition_fbo(), width, height);
        let mut image = image::RgbaImage::from_raw(width, height, pixels)?;
        image::imageops::flip_vertical_in_place(&mut image);
        Some(image)
    }

    /// The pass programs, e.g. for setting caller-side uniforms.
    #[must_use]
    pub fn programs(&self) -> &HybridPrograms<D> {
        &self.programs
    }

    /// The frame resources.
    #[must_use]
    pub fn resources(&self) -> &FrameResources<D> {
        &self.resources
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &HybridConfig {
        &self.config
    }
}
