// SPDX-License-Identifier: CEPL-1.0
//! OpenGL 3.3+ backend built on glow and glutin.
//!
//! One backend drives one window surface; every swapchain handle renders to
//! it. With an external context the caller owns the surface and presents it
//! themselves.
#![deny(unsafe_op_in_unsafe_fn)]

mod convert;

use std::collections::HashMap;
use std::ffi::CString;
use std::num::NonZeroU32;

use anyhow::{anyhow, bail, Context, Result};
use glow::HasContext as _;
use prism_render::{
    Backend, BufferDesc, ClearDesc, ClearFlags, Command, DrawDesc, Frame, HandleId, HandleTable,
    Msaa, PassTarget, PipelineDesc, RenderSize, SamplerDesc, Settings, ShaderStage, TextureDesc,
    TextureEditDesc, TextureOrigin, TextureRegion, TextureSize, VsyncMode,
    COLOR_ATTACHMENT_COUNT,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, info, trace};

use glutin::{
    config::ConfigTemplateBuilder,
    context::{
        ContextApi, ContextAttributesBuilder, NotCurrentContext, PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};

struct WindowTarget {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
}

struct GlBuffer {
    id: glow::Buffer,
    target: u32,
}

struct GlTexture {
    id: glow::Texture,
    target: u32,
    /// Multisampled storage rendered into; `id` receives the resolve.
    renderbuffer: Option<glow::Renderbuffer>,
}

pub struct GlBackend {
    window: Option<WindowTarget>,
    gl: glow::Context,
    vao: glow::VertexArray,
    resolve_fb: glow::Framebuffer,
    buffers: HashMap<HandleId, GlBuffer>,
    textures: HashMap<HandleId, GlTexture>,
    samplers: HashMap<HandleId, glow::Sampler>,
    programs: HashMap<HandleId, glow::Program>,
    framebuffers: HashMap<HandleId, glow::Framebuffer>,
}

fn nonzero(value: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(value.max(1)).ok_or_else(|| anyhow!("zero surface extent"))
}

fn compile_shader(gl: &glow::Context, stage: ShaderStage, source: &str) -> Result<glow::Shader> {
    unsafe {
        let shader = gl
            .create_shader(convert::shader_stage(stage))
            .map_err(anyhow::Error::msg)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            bail!("GL {stage:?} compile: {log}");
        }
        Ok(shader)
    }
}

fn link_program(gl: &glow::Context, stages: &[(ShaderStage, &str)]) -> Result<glow::Program> {
    let mut shaders = Vec::with_capacity(stages.len());
    for (stage, source) in stages {
        match compile_shader(gl, *stage, source) {
            Ok(shader) => shaders.push(shader),
            Err(err) => {
                for shader in shaders {
                    unsafe { gl.delete_shader(shader) };
                }
                return Err(err);
            }
        }
    }

    unsafe {
        let program = gl.create_program().map_err(anyhow::Error::msg)?;
        for shader in &shaders {
            gl.attach_shader(program, *shader);
        }
        gl.link_program(program);
        let linked = gl.get_program_link_status(program);
        for shader in shaders {
            gl.detach_shader(program, shader);
            gl.delete_shader(shader);
        }
        if !linked {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            bail!("GL link: {log}");
        }
        Ok(program)
    }
}

/// 1D textures are stored as one-row 2D textures.
fn texture_target(size: TextureSize) -> u32 {
    match size.dimensions() {
        3 => glow::TEXTURE_3D,
        _ => glow::TEXTURE_2D,
    }
}

impl GlBackend {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: RenderSize,
        settings: &Settings,
    ) -> Result<(WindowTarget, glow::Context)> {
        let mut template = ConfigTemplateBuilder::new();
        if settings.msaa != Msaa::None {
            template = template.with_multisampling(settings.msaa.samples() as u8);
        }
        let mut configs =
            unsafe { display.find_configs(template.build()) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GL configs"))?;
        let w = nonzero(size.width)?;
        let h = nonzero(size.height)?;

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(window_handle, w, h);
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;
        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(window_handle));
        let not_current: NotCurrentContext =
            unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| match CString::new(s) {
                Ok(name) => display.get_proc_address(&name) as *const _,
                Err(_) => std::ptr::null(),
            })
        };

        let interval = match settings.vsync {
            VsyncMode::On => SwapInterval::Wait(nonzero(1)?),
            VsyncMode::Off => SwapInterval::DontWait,
        };
        if let Err(err) = surface.set_swap_interval(&context, interval) {
            debug!("swap interval not applied: {err}");
        }

        Ok((WindowTarget { context, surface }, gl))
    }

    /// Creates a context and window surface for `window`.
    pub fn new(
        window: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &Settings,
    ) -> Result<Self> {
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let dh = display_handle
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;
        let (target, gl) = Self::make_current(&display, wh, size, settings)?;
        Self::with_window(Some(target), gl)
    }

    /// Wraps a context the caller already made current.
    pub fn from_context(gl: glow::Context) -> Result<Self> {
        Self::with_window(None, gl)
    }

    fn with_window(window: Option<WindowTarget>, gl: glow::Context) -> Result<Self> {
        let (vao, resolve_fb) = unsafe {
            let vao = gl.create_vertex_array().map_err(anyhow::Error::msg)?;
            let resolve_fb = gl.create_framebuffer().map_err(anyhow::Error::msg)?;
            gl.bind_vertex_array(Some(vao));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            gl.enable(glow::CULL_FACE);
            gl.front_face(glow::CCW);
            gl.cull_face(glow::BACK);
            (vao, resolve_fb)
        };
        let version = gl.version();
        info!(
            "GL {}.{} ({})",
            version.major, version.minor, version.vendor_info
        );

        Ok(Self {
            window,
            gl,
            vao,
            resolve_fb,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
        })
    }

    fn check(&self, what: &str) -> Result<()> {
        let err = unsafe { self.gl.get_error() };
        if err != glow::NO_ERROR {
            bail!("GL error 0x{err:04x} after {what}");
        }
        Ok(())
    }

    fn buffer(&self, id: HandleId) -> Result<&GlBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| anyhow!("no GL buffer for {id:?}"))
    }

    fn texture(&self, id: HandleId) -> Result<&GlTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| anyhow!("no GL texture for {id:?}"))
    }

    fn sampler(&self, id: HandleId) -> Result<glow::Sampler> {
        self.samplers
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("no GL sampler for {id:?}"))
    }

    fn program(&self, id: HandleId) -> Result<glow::Program> {
        self.programs
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("no GL program for {id:?}"))
    }

    fn buffer_new(&mut self, handle: HandleId, desc: &BufferDesc<'_>) -> Result<()> {
        let target = convert::buffer_target(desc.kind);
        let usage = convert::usage(desc.usage);
        let gl = &self.gl;
        let id = unsafe {
            let id = gl.create_buffer().map_err(anyhow::Error::msg)?;
            gl.bind_buffer(target, Some(id));
            match desc.data.as_deref() {
                Some(data) if data.len() == desc.size => gl.buffer_data_u8_slice(target, data, usage),
                Some(data) => {
                    gl.buffer_data_size(target, desc.size as i32, usage);
                    gl.buffer_sub_data_u8_slice(target, 0, data);
                }
                None => gl.buffer_data_size(target, desc.size as i32, usage),
            }
            id
        };
        self.buffers.insert(handle, GlBuffer { id, target });
        self.check("buffer creation")
    }

    fn texture_new(&mut self, handle: HandleId, desc: &TextureDesc<'_>) -> Result<()> {
        let (internal, format, ty) = convert::pixel_format(desc.format);
        let size = desc.size;
        let target = texture_target(size);
        let (w, h, d) = (
            size.width as i32,
            size.height.max(1) as i32,
            size.depth.max(1) as i32,
        );
        let data = desc.data.as_deref();
        let gl = &self.gl;

        let (id, renderbuffer) = unsafe {
            let id = gl.create_texture().map_err(anyhow::Error::msg)?;
            gl.bind_texture(target, Some(id));
            gl.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, 0);
            if target == glow::TEXTURE_3D {
                gl.tex_storage_3d(target, 1, internal, w, h, d);
                if let Some(bytes) = data {
                    gl.tex_sub_image_3d(
                        target,
                        0,
                        0,
                        0,
                        0,
                        w,
                        h,
                        d,
                        format,
                        ty,
                        glow::PixelUnpackData::Slice(Some(bytes)),
                    );
                }
            } else {
                gl.tex_storage_2d(target, 1, internal, w, h);
                if let Some(bytes) = data {
                    gl.tex_sub_image_2d(
                        target,
                        0,
                        0,
                        0,
                        w,
                        h,
                        format,
                        ty,
                        glow::PixelUnpackData::Slice(Some(bytes)),
                    );
                }
            }
            gl.bind_texture(target, None);

            let renderbuffer = if desc.render_target && desc.msaa != Msaa::None {
                let rb = gl.create_renderbuffer().map_err(anyhow::Error::msg)?;
                gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
                gl.renderbuffer_storage_multisample(
                    glow::RENDERBUFFER,
                    desc.msaa.samples() as i32,
                    internal,
                    w,
                    h,
                );
                gl.bind_renderbuffer(glow::RENDERBUFFER, None);
                Some(rb)
            } else {
                None
            };
            (id, renderbuffer)
        };

        self.textures.insert(
            handle,
            GlTexture {
                id,
                target,
                renderbuffer,
            },
        );
        self.check("texture creation")
    }

    fn sampler_new(&mut self, handle: HandleId, desc: &SamplerDesc) -> Result<()> {
        let gl = &self.gl;
        let sampler = unsafe {
            let s = gl.create_sampler().map_err(anyhow::Error::msg)?;
            let filter = convert::filter(desc.filter);
            gl.sampler_parameter_i32(s, glow::TEXTURE_MIN_FILTER, filter);
            gl.sampler_parameter_i32(s, glow::TEXTURE_MAG_FILTER, filter);
            gl.sampler_parameter_i32(s, glow::TEXTURE_WRAP_S, convert::tex_mode(desc.u));
            gl.sampler_parameter_i32(s, glow::TEXTURE_WRAP_T, convert::tex_mode(desc.v));
            gl.sampler_parameter_i32(s, glow::TEXTURE_WRAP_R, convert::tex_mode(desc.w));
            let mode = match desc.compare {
                prism_render::Compare::Never => glow::NONE,
                _ => glow::COMPARE_REF_TO_TEXTURE,
            };
            gl.sampler_parameter_i32(s, glow::TEXTURE_COMPARE_MODE, mode as i32);
            gl.sampler_parameter_i32(
                s,
                glow::TEXTURE_COMPARE_FUNC,
                convert::compare(desc.compare),
            );
            gl.sampler_parameter_f32_slice(s, glow::TEXTURE_BORDER_COLOR, &desc.border);
            s
        };
        self.samplers.insert(handle, sampler);
        self.check("sampler creation")
    }

    fn pass_offscreen_new(&mut self, frame: &Frame<'_>, handle: HandleId) -> Result<()> {
        let Some(PassTarget::Offscreen(desc)) = frame.handles.pass(handle).map(|p| p.target)
        else {
            bail!("{handle:?} is not an offscreen pass");
        };

        let mut attachments = Vec::with_capacity(COLOR_ATTACHMENT_COUNT + 1);
        for (i, color) in desc.color.iter().enumerate() {
            if let Some(color) = color {
                attachments.push((glow::COLOR_ATTACHMENT0 + i as u32, color.id()));
            }
        }
        if let Some(depth) = desc.depth_stencil {
            let attachment = match frame.handles.texture(depth.id()).map(|t| t.format) {
                Some(prism_render::PixelFormat::D32) => glow::DEPTH_ATTACHMENT,
                _ => glow::DEPTH_STENCIL_ATTACHMENT,
            };
            attachments.push((attachment, depth.id()));
        }

        let gl = &self.gl;
        let fb = unsafe {
            let fb = gl.create_framebuffer().map_err(anyhow::Error::msg)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fb));
            fb
        };
        let mut draw_buffers = Vec::with_capacity(COLOR_ATTACHMENT_COUNT);
        for (attachment, texture) in attachments {
            let native = self.texture(texture)?;
            unsafe {
                match native.renderbuffer {
                    Some(rb) => gl.framebuffer_renderbuffer(
                        glow::FRAMEBUFFER,
                        attachment,
                        glow::RENDERBUFFER,
                        Some(rb),
                    ),
                    None => gl.framebuffer_texture_2d(
                        glow::FRAMEBUFFER,
                        attachment,
                        native.target,
                        Some(native.id),
                        0,
                    ),
                }
            }
            if attachment < glow::COLOR_ATTACHMENT0 + COLOR_ATTACHMENT_COUNT as u32
                && attachment >= glow::COLOR_ATTACHMENT0
            {
                draw_buffers.push(attachment);
            }
        }

        let status = unsafe {
            if draw_buffers.is_empty() {
                gl.draw_buffers(&[glow::NONE]);
            } else {
                gl.draw_buffers(&draw_buffers);
            }
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            status
        };
        self.framebuffers.insert(handle, fb);
        if status != glow::FRAMEBUFFER_COMPLETE {
            bail!("offscreen framebuffer incomplete: 0x{status:04x}");
        }
        self.check("framebuffer creation")
    }

    fn pass_begin(&mut self, frame: &Frame<'_>, handle: HandleId) -> Result<()> {
        let pass = frame
            .handles
            .pass(handle)
            .ok_or_else(|| anyhow!("begin of unknown pass {handle:?}"))?;
        let (fb, size) = match pass.target {
            PassTarget::Swapchain(swapchain) => (
                None,
                frame
                    .handles
                    .swapchain_size(swapchain.id())
                    .unwrap_or_default(),
            ),
            PassTarget::Offscreen(_) => (self.framebuffers.get(&handle).copied(), pass.size),
        };
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, fb);
            self.gl
                .viewport(0, 0, size.width as i32, size.height as i32);
            self.gl.disable(glow::SCISSOR_TEST);
        }
        self.check("pass begin")
    }

    /// Copies multisampled attachments into their textures.
    fn pass_end(&mut self, frame: &Frame<'_>, handle: HandleId) -> Result<()> {
        let Some(pass) = frame.handles.pass(handle) else {
            return Ok(());
        };
        let PassTarget::Offscreen(desc) = pass.target else {
            return Ok(());
        };
        let Some(&fb) = self.framebuffers.get(&handle) else {
            return Ok(());
        };
        let (w, h) = (pass.size.width as i32, pass.size.height as i32);
        let gl = &self.gl;

        for (i, color) in desc.color.iter().enumerate() {
            let Some(color) = color else { continue };
            let native = self.texture(color.id())?;
            if native.renderbuffer.is_none() {
                continue;
            }
            unsafe {
                gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(fb));
                gl.read_buffer(glow::COLOR_ATTACHMENT0 + i as u32);
                gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(self.resolve_fb));
                gl.framebuffer_texture_2d(
                    glow::DRAW_FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0,
                    native.target,
                    Some(native.id),
                    0,
                );
                gl.draw_buffers(&[glow::COLOR_ATTACHMENT0]);
                gl.blit_framebuffer(
                    0,
                    0,
                    w,
                    h,
                    0,
                    0,
                    w,
                    h,
                    glow::COLOR_BUFFER_BIT,
                    glow::NEAREST,
                );
                gl.framebuffer_texture_2d(
                    glow::DRAW_FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0,
                    native.target,
                    None,
                    0,
                );
            }
        }

        if let Some(depth) = desc.depth_stencil {
            let native = self.texture(depth.id())?;
            if native.renderbuffer.is_some() {
                unsafe {
                    gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(fb));
                    gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(self.resolve_fb));
                    gl.framebuffer_texture_2d(
                        glow::DRAW_FRAMEBUFFER,
                        glow::DEPTH_STENCIL_ATTACHMENT,
                        native.target,
                        Some(native.id),
                        0,
                    );
                    gl.blit_framebuffer(
                        0,
                        0,
                        w,
                        h,
                        0,
                        0,
                        w,
                        h,
                        glow::DEPTH_BUFFER_BIT | glow::STENCIL_BUFFER_BIT,
                        glow::NEAREST,
                    );
                    gl.framebuffer_texture_2d(
                        glow::DRAW_FRAMEBUFFER,
                        glow::DEPTH_STENCIL_ATTACHMENT,
                        native.target,
                        None,
                        0,
                    );
                }
            }
        }

        unsafe { gl.bind_framebuffer(glow::FRAMEBUFFER, None) };
        self.check("msaa resolve")
    }

    fn clear(&self, desc: &ClearDesc) -> Result<()> {
        let gl = &self.gl;
        let mut bits = 0;
        unsafe {
            if desc.flags.contains(ClearFlags::COLOR) {
                let [r, g, b, a] = desc.color;
                gl.clear_color(r, g, b, a);
                bits |= glow::COLOR_BUFFER_BIT;
            }
            if desc.flags.contains(ClearFlags::DEPTH) {
                gl.depth_mask(true);
                gl.clear_depth_f32(desc.depth);
                gl.clear_stencil(desc.stencil as i32);
                bits |= glow::DEPTH_BUFFER_BIT | glow::STENCIL_BUFFER_BIT;
            }
            gl.clear(bits);
        }
        self.check("clear")
    }

    fn use_pipeline(&self, desc: &PipelineDesc) -> Result<()> {
        let gl = &self.gl;
        unsafe {
            if desc.cull {
                gl.enable(glow::CULL_FACE);
                gl.cull_face(convert::face(desc.cull_face));
                gl.front_face(convert::orientation(desc.cull_front));
            } else {
                gl.disable(glow::CULL_FACE);
            }

            if desc.blend {
                gl.enable(glow::BLEND);
                gl.blend_func_separate(
                    convert::blend(desc.src_rgb),
                    convert::blend(desc.dst_rgb),
                    convert::blend(desc.src_alpha),
                    convert::blend(desc.dst_alpha),
                );
                gl.blend_equation_separate(
                    convert::blend_eq(desc.eq_rgb),
                    convert::blend_eq(desc.eq_alpha),
                );
            } else {
                gl.disable(glow::BLEND);
            }

            if desc.depth {
                gl.enable(glow::DEPTH_TEST);
            } else {
                gl.disable(glow::DEPTH_TEST);
            }

            if desc.scissor {
                gl.enable(glow::SCISSOR_TEST);
            } else {
                gl.disable(glow::SCISSOR_TEST);
            }
        }
        self.check("pipeline state")
    }

    fn texture_write(&self, frame: &Frame<'_>, handle: HandleId, desc: &TextureEditDesc<'_>) -> Result<()> {
        let info = frame
            .handles
            .texture(handle)
            .ok_or_else(|| anyhow!("write to unknown texture {handle:?}"))?;
        let native = self.texture(handle)?;
        let (_, format, ty) = convert::pixel_format(info.format);
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(native.target, Some(native.id));
            if native.target == glow::TEXTURE_3D {
                gl.tex_sub_image_3d(
                    native.target,
                    0,
                    desc.x as i32,
                    desc.y as i32,
                    desc.z as i32,
                    desc.width as i32,
                    desc.height.max(1) as i32,
                    desc.depth.max(1) as i32,
                    format,
                    ty,
                    glow::PixelUnpackData::Slice(Some(&*desc.bytes)),
                );
            } else {
                gl.tex_sub_image_2d(
                    native.target,
                    0,
                    desc.x as i32,
                    desc.y as i32,
                    desc.width as i32,
                    desc.height.max(1) as i32,
                    format,
                    ty,
                    glow::PixelUnpackData::Slice(Some(&*desc.bytes)),
                );
            }
            gl.bind_texture(native.target, None);
        }
        self.check("texture write")
    }

    fn texture_bind(
        &self,
        frame: &Frame<'_>,
        handle: HandleId,
        shader: ShaderStage,
        slot: u32,
        sampler: HandleId,
    ) -> Result<()> {
        if shader == ShaderStage::Compute {
            bail!("texture binds for compute shaders are not supported by the GL backend");
        }
        let native = self.texture(handle)?;
        // a failed cached sampler leaves the texture on default sampling
        let sampler = match frame.handles.get(sampler) {
            Some(record) if !record.is_failed() => Some(self.sampler(sampler)?),
            _ => None,
        };
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + slot);
            self.gl.bind_texture(native.target, Some(native.id));
            self.gl.bind_sampler(slot, sampler);
        }
        self.check("texture bind")
    }

    fn draw(&self, desc: &DrawDesc) -> Result<()> {
        let gl = &self.gl;
        unsafe {
            gl.bind_vertex_array(Some(self.vao));
        }
        for (i, input) in desc.vertex_buffers.iter().enumerate() {
            let index = i as u32;
            let Some(input) = input else {
                unsafe { gl.disable_vertex_attrib_array(index) };
                continue;
            };
            let buffer = self.buffer(input.buffer.id())?;
            unsafe {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer.id));
                gl.vertex_attrib_pointer_f32(
                    index,
                    input.element.components() as i32,
                    convert::element_type(input.element),
                    input.element.normalized(),
                    input.stride as i32,
                    input.offset as i32,
                );
                gl.enable_vertex_attrib_array(index);
            }
        }

        let primitive = convert::primitive(desc.primitive);
        let count = desc.elements_count as i32;
        let instances = desc.instances_count as i32;
        match desc.index_buffer {
            Some(index) => {
                let buffer = self.buffer(index.id())?;
                let ty = desc.index_type();
                let offset = (desc.base_element as usize * ty.size()) as i32;
                let gl_ty = convert::element_type(ty);
                unsafe {
                    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer.id));
                    if desc.instances_count > 1 {
                        gl.draw_elements_instanced(primitive, count, gl_ty, offset, instances);
                    } else {
                        gl.draw_elements(primitive, count, gl_ty, offset);
                    }
                }
            }
            None => unsafe {
                let first = desc.base_element as i32;
                if desc.instances_count > 1 {
                    gl.draw_arrays_instanced(primitive, first, count, instances);
                } else {
                    gl.draw_arrays(primitive, first, count);
                }
            },
        }
        self.check("draw")
    }

    fn destroy(&mut self, handle: HandleId) {
        let gl = &self.gl;
        unsafe {
            if let Some(buffer) = self.buffers.remove(&handle) {
                gl.delete_buffer(buffer.id);
            }
            if let Some(texture) = self.textures.remove(&handle) {
                gl.delete_texture(texture.id);
                if let Some(rb) = texture.renderbuffer {
                    gl.delete_renderbuffer(rb);
                }
            }
            if let Some(sampler) = self.samplers.remove(&handle) {
                gl.delete_sampler(sampler);
            }
            if let Some(program) = self.programs.remove(&handle) {
                gl.delete_program(program);
            }
            if let Some(fb) = self.framebuffers.remove(&handle) {
                gl.delete_framebuffer(fb);
            }
        }
    }
}

impl Backend for GlBackend {
    fn name(&self) -> &'static str {
        "gl"
    }

    fn texture_origin(&self) -> TextureOrigin {
        TextureOrigin::BottomLeft
    }

    fn execute(&mut self, frame: &Frame<'_>, command: &Command<'_>) -> Result<()> {
        trace!(kind = ?command.kind(), "gl execute");
        match command {
            Command::SwapchainNew { .. }
            | Command::PassSwapchainNew { .. }
            | Command::PipelineNew { .. }
            | Command::Marker { .. } => Ok(()),
            Command::SwapchainResize { size, .. } => {
                if let Some(window) = &self.window {
                    if size.width > 0 && size.height > 0 {
                        window.surface.resize(
                            &window.context,
                            nonzero(size.width)?,
                            nonzero(size.height)?,
                        );
                    }
                }
                Ok(())
            }
            Command::PassOffscreenNew { handle, .. } => self.pass_offscreen_new(frame, *handle),
            Command::BufferNew { handle, desc } => self.buffer_new(*handle, desc),
            Command::TextureNew { handle, desc } => self.texture_new(*handle, desc),
            Command::SamplerNew { handle, desc } => self.sampler_new(*handle, desc),
            Command::ProgramNew { handle, desc } => {
                let mut stages = vec![
                    (ShaderStage::Vertex, &*desc.vertex),
                    (ShaderStage::Pixel, &*desc.pixel),
                ];
                if let Some(geometry) = &desc.geometry {
                    stages.push((ShaderStage::Geometry, &**geometry));
                }
                let program = link_program(&self.gl, &stages)?;
                self.programs.insert(*handle, program);
                Ok(())
            }
            Command::ComputeNew { handle, desc } => {
                let program = link_program(&self.gl, &[(ShaderStage::Compute, &*desc.compute)])?;
                self.programs.insert(*handle, program);
                Ok(())
            }
            Command::SwapchainFree { handle }
            | Command::PassFree { handle }
            | Command::BufferFree { handle }
            | Command::TextureFree { handle }
            | Command::SamplerFree { handle }
            | Command::ProgramFree { handle }
            | Command::ComputeFree { handle }
            | Command::PipelineFree { handle } => {
                self.destroy(*handle);
                Ok(())
            }
            Command::PassBegin { handle } => self.pass_begin(frame, *handle),
            Command::PassEnd { handle } => self.pass_end(frame, *handle),
            Command::PassClear { desc } => self.clear(desc),
            Command::UsePipeline { pipeline } => {
                let desc = frame
                    .handles
                    .pipeline(*pipeline)
                    .ok_or_else(|| anyhow!("unknown pipeline {pipeline:?}"))?;
                self.use_pipeline(desc)
            }
            Command::UseProgram { program } => {
                let program = self.program(*program)?;
                unsafe { self.gl.use_program(Some(program)) };
                self.check("use program")
            }
            Command::Scissor {
                x,
                y,
                width,
                height,
            } => {
                unsafe { self.gl.scissor(*x, *y, *width, *height) };
                Ok(())
            }
            Command::BufferWrite {
                handle,
                offset,
                bytes,
            } => {
                let buffer = self.buffer(*handle)?;
                unsafe {
                    self.gl.bind_buffer(buffer.target, Some(buffer.id));
                    self.gl
                        .buffer_sub_data_u8_slice(buffer.target, *offset as i32, bytes);
                }
                self.check("buffer write")
            }
            Command::TextureWrite { handle, desc } => self.texture_write(frame, *handle, desc),
            Command::BufferBind { handle, slot, .. } => {
                let buffer = self.buffer(*handle)?;
                unsafe {
                    self.gl
                        .bind_buffer_base(buffer.target, *slot, Some(buffer.id));
                }
                self.check("buffer bind")
            }
            Command::TextureBind {
                handle,
                shader,
                slot,
                cached,
                ..
            } => {
                let sampler = cached.ok_or_else(|| anyhow!("texture bind without a sampler"))?;
                self.texture_bind(frame, *handle, *shader, *slot, sampler)
            }
            Command::SamplerBind { handle, slot, .. } => {
                let sampler = self.sampler(*handle)?;
                unsafe { self.gl.bind_sampler(*slot, Some(sampler)) };
                self.check("sampler bind")
            }
            Command::Draw { desc } => self.draw(desc),
        }
    }

    fn read_buffer(
        &mut self,
        _handles: &HandleTable,
        buffer: HandleId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        let native = self.buffer(buffer)?;
        unsafe {
            self.gl.bind_buffer(native.target, Some(native.id));
            self.gl
                .get_buffer_sub_data(native.target, offset as i32, out);
        }
        self.check("buffer read")
    }

    fn read_texture(
        &mut self,
        handles: &HandleTable,
        texture: HandleId,
        region: &TextureRegion,
        out: &mut [u8],
    ) -> Result<()> {
        let info = handles
            .texture(texture)
            .ok_or_else(|| anyhow!("read of unknown texture {texture:?}"))?;
        let native = self.texture(texture)?;
        let (_, format, ty) = convert::pixel_format(info.format);
        let bpp = info.format.bytes_per_pixel();

        let mut texels = vec![0u8; info.size.texel_count() * bpp];
        unsafe {
            self.gl.bind_texture(native.target, Some(native.id));
            self.gl.get_tex_image(
                native.target,
                0,
                format,
                ty,
                glow::PixelPackData::Slice(Some(texels.as_mut_slice())),
            );
            self.gl.bind_texture(native.target, None);
        }
        let mut dst = 0;
        for (start, len) in region.byte_rows(info.size, bpp) {
            out[dst..dst + len].copy_from_slice(&texels[start..start + len]);
            dst += len;
        }
        self.check("texture read")
    }

    fn present(&mut self, _handles: &HandleTable, _swapchain: HandleId, settings: &Settings) -> Result<()> {
        match &self.window {
            Some(window) if !settings.external_context => window
                .surface
                .swap_buffers(&window.context)
                .context("swap_buffers"),
            _ => {
                trace!("external context, caller presents");
                Ok(())
            }
        }
    }

    fn check_program(&mut self, stage: ShaderStage, source: &str) -> Result<()> {
        let shader = compile_shader(&self.gl, stage, source)?;
        unsafe { self.gl.delete_shader(shader) };
        Ok(())
    }
}
