// SPDX-License-Identifier: CEPL-1.0
//! The public device: one lock around the engine, one method per API call.

use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::backend::Backend;
use crate::command::Command;
use crate::engine::Engine;
use crate::error::{RenderError, Result};
use crate::handle::{
    Buffer, BufferInfo, Compute, HandleData, HandleKind, Pass, PassInfo, PassTarget, Pipeline,
    Program, Sampler, Swapchain, Texture, TextureInfo, TypedHandle,
};
use crate::list::CommandList;
use crate::settings::Settings;
use crate::types::{
    Access, BufferDesc, BufferKind, ClearDesc, ComputeDesc, DrawDesc, PassOffscreenDesc,
    PipelineDesc, ProgramDesc, RenderSize, SamplerDesc, ShaderStage, TextureDesc,
    TextureEditDesc, TextureOrigin, TextureRegion, TextureSize, Usage,
};

/// A backend plus everything needed to feed it commands.
///
/// All methods take `&self` and serialize on one internal mutex, so a
/// device can be shared between threads that record passes.
pub struct Device<B: Backend> {
    inner: Mutex<Engine<B>>,
}

impl<B: Backend> Device<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        info!(
            backend = backend.name(),
            deferred = settings.defer_api_calls,
            "device created"
        );
        Self {
            inner: Mutex::new(Engine::new(backend, settings)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Engine<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs outstanding commands, frees cached samplers and hands the
    /// backend back. Handles the caller never freed are reported and leaked.
    pub fn dispose(self) -> B {
        let mut engine = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        engine.shutdown();
        info!(backend = engine.backend.name(), "device disposed");
        engine.backend
    }

    pub fn name(&self) -> &'static str {
        self.lock().backend.name()
    }

    pub fn texture_origin(&self) -> TextureOrigin {
        self.lock().backend.texture_origin()
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings
    }

    /// Runs `f` against the backend with the device lock held.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.lock().backend)
    }

    /// Takes an extra reference; each one needs its own matching free.
    pub fn handle_ref<H: TypedHandle>(&self, handle: H) -> Result<()> {
        let engine = self.lock();
        engine.expect(handle.into(), H::KIND)?;
        engine.handles.retain(handle.into());
        Ok(())
    }

    /// Current reference count, or `None` once the handle is gone.
    pub fn ref_count<H: TypedHandle>(&self, handle: H) -> Option<u32> {
        let engine = self.lock();
        let count = engine
            .expect(handle.into(), H::KIND)
            .ok()
            .map(|record| record.ref_count());
        count
    }

    /// True when the backend failed to build the handle's native object.
    pub fn is_failed<H: TypedHandle>(&self, handle: H) -> bool {
        let engine = self.lock();
        let failed = engine
            .expect(handle.into(), H::KIND)
            .is_ok_and(|record| record.is_failed());
        failed
    }

    pub fn live_handles(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn queued_commands(&self) -> usize {
        self.lock().queued()
    }

    /// Descriptions held by the sampler cache, most recently used first.
    /// The cached samplers themselves stay private to the device.
    pub fn cached_samplers(&self) -> Vec<SamplerDesc> {
        self.lock()
            .samplers
            .entries()
            .map(|(desc, _)| *desc)
            .collect()
    }

    // Swapchains

    pub fn swapchain_new(&self, width: u32, height: u32) -> Swapchain {
        let mut engine = self.lock();
        let handle = engine.create(HandleData::Swapchain(RenderSize { width, height }));
        engine.process(Command::SwapchainNew { handle });
        Swapchain(handle)
    }

    pub fn swapchain_free(&self, swapchain: Swapchain) -> Result<()> {
        self.free(swapchain)
    }

    /// Resizes the swapchain. The new size is visible once the command
    /// has run, so passes queued earlier still see the old one.
    pub fn swapchain_resize(&self, swapchain: Swapchain, width: u32, height: u32) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(swapchain.id(), HandleKind::Swapchain)?;
        engine.process(Command::SwapchainResize {
            handle: swapchain.id(),
            size: RenderSize { width, height },
        });
        Ok(())
    }

    /// Runs every queued command, then shows the swapchain's back buffer.
    pub fn swapchain_present(&self, swapchain: Swapchain) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(swapchain.id(), HandleKind::Swapchain)?;
        engine.drain();
        let engine = &mut *engine;
        engine
            .backend
            .present(&engine.handles, swapchain.id(), &engine.settings)?;
        Ok(())
    }

    /// Runs every queued command.
    pub fn flush(&self) {
        self.lock().drain();
    }

    // Resources

    pub fn buffer_new(&self, desc: BufferDesc<'_>) -> Result<Buffer> {
        let mut desc = desc;
        if desc.size == 0 {
            desc.size = desc.data.as_ref().map_or(0, |data| data.len());
        }
        validate_access(desc.usage, desc.access)?;
        if desc.size == 0 {
            return Err(RenderError::InvalidDesc("buffer has no size"));
        }
        if desc.usage == Usage::Static && desc.data.is_none() {
            return Err(RenderError::InvalidDesc("static buffer needs initial data"));
        }
        if desc.kind == BufferKind::Uniform && desc.size % 16 != 0 {
            return Err(RenderError::InvalidDesc(
                "uniform buffer size must be a multiple of 16",
            ));
        }
        if desc.data.as_ref().is_some_and(|data| data.len() > desc.size) {
            return Err(RenderError::InvalidDesc("initial data larger than buffer"));
        }

        let mut engine = self.lock();
        let handle = engine.create(HandleData::Buffer(BufferInfo {
            kind: desc.kind,
            usage: desc.usage,
            access: desc.access,
            size: desc.size,
        }));
        engine.process(Command::BufferNew { handle, desc });
        Ok(Buffer(handle))
    }

    pub fn buffer_free(&self, buffer: Buffer) -> Result<()> {
        self.free(buffer)
    }

    pub fn texture_new(&self, desc: TextureDesc<'_>) -> Result<Texture> {
        if desc.size.width == 0 {
            return Err(RenderError::InvalidDesc("texture needs a width"));
        }
        validate_access(desc.usage, desc.access)?;
        if desc.usage == Usage::Static && !desc.render_target && desc.data.is_none() {
            return Err(RenderError::InvalidDesc("static texture needs initial data"));
        }
        let expected = desc.size.texel_count() * desc.format.bytes_per_pixel();
        if desc.data.as_ref().is_some_and(|data| data.len() < expected) {
            return Err(RenderError::InvalidDesc("texture data smaller than its extent"));
        }

        let mut engine = self.lock();
        let handle = engine.create(HandleData::Texture(TextureInfo {
            size: desc.size,
            format: desc.format,
            usage: desc.usage,
            access: desc.access,
            render_target: desc.render_target,
            msaa: desc.msaa,
            sampler: desc.sampler,
        }));
        engine.process(Command::TextureNew { handle, desc });
        Ok(Texture(handle))
    }

    pub fn texture_free(&self, texture: Texture) -> Result<()> {
        self.free(texture)
    }

    pub fn texture_size(&self, texture: Texture) -> Result<TextureSize> {
        let engine = self.lock();
        engine.expect(texture.id(), HandleKind::Texture)?;
        let size = engine.handles.texture(texture.id()).map(|info| info.size);
        size.ok_or(RenderError::StaleHandle {
            kind: HandleKind::Texture,
        })
    }

    /// Creates a sampler outside the cache. The caller owns it.
    pub fn sampler_new(&self, desc: SamplerDesc) -> Sampler {
        let mut engine = self.lock();
        let handle = engine.create(HandleData::Sampler(desc));
        engine.process(Command::SamplerNew { handle, desc });
        Sampler(handle)
    }

    pub fn sampler_free(&self, sampler: Sampler) -> Result<()> {
        self.free(sampler)
    }

    pub fn program_check(&self, stage: ShaderStage, source: &str) -> Result<()> {
        self.lock()
            .backend
            .check_program(stage, source)
            .map_err(|err| RenderError::ShaderCheck(format!("{err:#}")))
    }

    /// Creates a program. Compile errors are logged when the command runs
    /// and leave a handle that reports [`Device::is_failed`].
    pub fn program_new(&self, desc: ProgramDesc<'_>) -> Result<Program> {
        if desc.vertex.is_empty() || desc.pixel.is_empty() {
            return Err(RenderError::InvalidDesc(
                "program needs vertex and pixel sources",
            ));
        }
        let mut engine = self.lock();
        let handle = engine.create(HandleData::Program);
        engine.process(Command::ProgramNew { handle, desc });
        Ok(Program(handle))
    }

    pub fn program_free(&self, program: Program) -> Result<()> {
        self.free(program)
    }

    pub fn compute_new(&self, desc: ComputeDesc<'_>) -> Result<Compute> {
        if desc.compute.is_empty() {
            return Err(RenderError::InvalidDesc("compute program needs a source"));
        }
        let mut engine = self.lock();
        let handle = engine.create(HandleData::Compute);
        engine.process(Command::ComputeNew { handle, desc });
        Ok(Compute(handle))
    }

    pub fn compute_free(&self, compute: Compute) -> Result<()> {
        self.free(compute)
    }

    pub fn pipeline_new(&self, desc: PipelineDesc) -> Pipeline {
        let mut engine = self.lock();
        let handle = engine.create(HandleData::Pipeline(desc));
        engine.process(Command::PipelineNew { handle, desc });
        Pipeline(handle)
    }

    pub fn pipeline_free(&self, pipeline: Pipeline) -> Result<()> {
        self.free(pipeline)
    }

    // Passes

    pub fn pass_swapchain_new(&self, swapchain: Swapchain) -> Result<Pass> {
        let mut engine = self.lock();
        engine.expect(swapchain.id(), HandleKind::Swapchain)?;
        let size = engine
            .handles
            .swapchain_size(swapchain.id())
            .unwrap_or_default();
        let handle = engine.create(HandleData::Pass(PassInfo {
            target: PassTarget::Swapchain(swapchain),
            size,
            list: CommandList::new(),
            recording: false,
        }));
        engine.process(Command::PassSwapchainNew {
            handle,
            swapchain: swapchain.id(),
        });
        Ok(Pass(handle))
    }

    /// Creates a pass rendering into textures. All attachments must share
    /// one size and one MSAA mode. The pass keeps them alive until it is
    /// freed.
    pub fn pass_offscreen_new(&self, desc: PassOffscreenDesc) -> Result<Pass> {
        let mut engine = self.lock();
        let mut shape = None;
        for texture in desc.attachments() {
            engine.expect(texture.id(), HandleKind::Texture)?;
            let Some(info) = engine.handles.texture(texture.id()) else {
                continue;
            };
            let this = (info.size.width, info.size.height, info.msaa);
            match shape {
                None => shape = Some(this),
                Some((w, h, _)) if (w, h) != (this.0, this.1) => {
                    return Err(RenderError::InvalidDesc(
                        "offscreen attachments differ in size",
                    ))
                }
                Some((_, _, msaa)) if msaa != this.2 => {
                    return Err(RenderError::InvalidDesc(
                        "offscreen attachments differ in msaa mode",
                    ))
                }
                Some(_) => {}
            }
        }
        let Some((width, height, _)) = shape else {
            return Err(RenderError::InvalidDesc(
                "offscreen pass needs at least one attachment",
            ));
        };

        let handle = engine.create(HandleData::Pass(PassInfo {
            target: PassTarget::Offscreen(desc),
            size: RenderSize { width, height },
            list: CommandList::new(),
            recording: false,
        }));
        engine.process(Command::PassOffscreenNew { handle, desc });
        Ok(Pass(handle))
    }

    pub fn pass_free(&self, pass: Pass) -> Result<()> {
        self.free(pass)
    }

    pub fn pass_size(&self, pass: Pass) -> Result<RenderSize> {
        let engine = self.lock();
        engine.expect(pass.id(), HandleKind::Pass)?;
        let size = engine.handles.pass_size(pass.id());
        size.ok_or(RenderError::StaleHandle {
            kind: HandleKind::Swapchain,
        })
    }

    /// Starts recording. Everything recorded until [`Device::pass_end`]
    /// runs back to back in recording order.
    pub fn pass_begin(&self, pass: Pass) -> Result<()> {
        self.lock().pass_begin(pass.id())
    }

    /// Stops recording and either runs the pass now or queues it behind
    /// everything already queued.
    pub fn pass_end(&self, pass: Pass) -> Result<()> {
        self.lock().pass_end(pass.id())
    }

    pub fn clear(&self, pass: Pass, desc: ClearDesc) -> Result<()> {
        self.lock().record(pass.id(), Command::PassClear { desc })
    }

    pub fn use_pipeline(&self, pass: Pass, pipeline: Pipeline) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(pipeline.id(), HandleKind::Pipeline)?;
        engine.record(
            pass.id(),
            Command::UsePipeline {
                pipeline: pipeline.id(),
            },
        )
    }

    pub fn use_program(&self, pass: Pass, program: Program) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(program.id(), HandleKind::Program)?;
        engine.record(
            pass.id(),
            Command::UseProgram {
                program: program.id(),
            },
        )
    }

    pub fn scissor(&self, pass: Pass, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        self.lock().record(
            pass.id(),
            Command::Scissor {
                x,
                y,
                width,
                height,
            },
        )
    }

    /// Records a buffer update. The bytes are copied before returning.
    pub fn buffer_write(&self, pass: Pass, buffer: Buffer, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut engine = self.lock();
        engine.check_recording(pass.id())?;
        engine.expect(buffer.id(), HandleKind::Buffer)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let size = engine.handles.buffer(buffer.id()).map_or(0, |info| info.size);
        if offset.saturating_add(bytes.len()) > size {
            return Err(RenderError::InvalidDesc("write past the end of the buffer"));
        }
        engine.record(
            pass.id(),
            Command::BufferWrite {
                handle: buffer.id(),
                offset,
                bytes: Cow::Borrowed(bytes),
            },
        )
    }

    /// Records a texture region update. The bytes are copied before
    /// returning.
    pub fn texture_write(&self, pass: Pass, texture: Texture, desc: TextureEditDesc<'_>) -> Result<()> {
        let mut engine = self.lock();
        engine.check_recording(pass.id())?;
        engine.expect(texture.id(), HandleKind::Texture)?;
        if desc.bytes.is_empty() {
            return Ok(());
        }
        if let Some(info) = engine.handles.texture(texture.id()) {
            check_region(info, &desc.region(), desc.bytes.len())?;
        }
        engine.record(
            pass.id(),
            Command::TextureWrite {
                handle: texture.id(),
                desc,
            },
        )
    }

    /// Reads buffer contents back right away, whatever the defer mode.
    /// Creation and writes still waiting in the queue are not flushed first.
    pub fn buffer_read(&self, buffer: Buffer, offset: usize, out: &mut [u8]) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(buffer.id(), HandleKind::Buffer)?;
        if out.is_empty() {
            return Ok(());
        }
        let size = engine.handles.buffer(buffer.id()).map_or(0, |info| info.size);
        if offset.saturating_add(out.len()) > size {
            return Err(RenderError::InvalidDesc("read past the end of the buffer"));
        }
        let engine = &mut *engine;
        engine
            .backend
            .read_buffer(&engine.handles, buffer.id(), offset, out)?;
        Ok(())
    }

    /// Reads a texture region back right away, whatever the defer mode.
    pub fn texture_read(&self, texture: Texture, region: TextureRegion, out: &mut [u8]) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(texture.id(), HandleKind::Texture)?;
        if out.is_empty() {
            return Ok(());
        }
        if let Some(info) = engine.handles.texture(texture.id()) {
            check_region(info, &region, out.len())?;
        }
        let engine = &mut *engine;
        engine
            .backend
            .read_texture(&engine.handles, texture.id(), &region, out)?;
        Ok(())
    }

    /// Binds a uniform or compute buffer to a shader slot.
    pub fn buffer_bind(&self, pass: Pass, buffer: Buffer, shader: ShaderStage, slot: u32) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(buffer.id(), HandleKind::Buffer)?;
        let bindable = engine
            .handles
            .buffer(buffer.id())
            .is_some_and(|info| matches!(info.kind, BufferKind::Uniform | BufferKind::Compute));
        if !bindable {
            return Err(RenderError::InvalidDesc(
                "only uniform and compute buffers bind to slots",
            ));
        }
        engine.record(
            pass.id(),
            Command::BufferBind {
                handle: buffer.id(),
                shader,
                slot,
            },
        )
    }

    /// Binds a texture with the sampler from its creation descriptor.
    pub fn texture_bind(&self, pass: Pass, texture: Texture, shader: ShaderStage, slot: u32) -> Result<()> {
        let desc = {
            let engine = self.lock();
            engine.expect(texture.id(), HandleKind::Texture)?;
            engine
                .handles
                .texture(texture.id())
                .map(|info| info.sampler)
                .unwrap_or_default()
        };
        self.texture_sampler_bind(pass, texture, shader, slot, desc)
    }

    /// Binds a texture with an explicit sampler description. The sampler is
    /// taken from the cache when the bind runs.
    pub fn texture_sampler_bind(
        &self,
        pass: Pass,
        texture: Texture,
        shader: ShaderStage,
        slot: u32,
        sampler: SamplerDesc,
    ) -> Result<()> {
        let mut engine = self.lock();
        engine.check_recording(pass.id())?;
        engine.expect(texture.id(), HandleKind::Texture)?;
        engine.record(
            pass.id(),
            Command::TextureBind {
                handle: texture.id(),
                shader,
                slot,
                sampler,
                cached: None,
            },
        )
    }

    pub fn sampler_bind(&self, pass: Pass, sampler: Sampler, shader: ShaderStage, slot: u32) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(sampler.id(), HandleKind::Sampler)?;
        engine.record(
            pass.id(),
            Command::SamplerBind {
                handle: sampler.id(),
                shader,
                slot,
            },
        )
    }

    pub fn draw(&self, pass: Pass, desc: DrawDesc) -> Result<()> {
        let mut engine = self.lock();
        for input in desc.vertex_buffers.iter().flatten() {
            engine.expect(input.buffer.id(), HandleKind::Buffer)?;
        }
        if let Some(index) = desc.index_buffer {
            engine.expect(index.id(), HandleKind::Buffer)?;
        }
        engine.record(pass.id(), Command::Draw { desc })
    }

    /// Records a marker inside a pass.
    pub fn pass_marker(&self, pass: Pass, value: u64) -> Result<()> {
        self.lock().record(pass.id(), Command::Marker { value })
    }

    /// Issues a marker on the device queue.
    pub fn marker(&self, value: u64) {
        self.lock().process(Command::Marker { value });
    }

    fn free<H: TypedHandle>(&self, handle: H) -> Result<()> {
        let mut engine = self.lock();
        engine.expect(handle.into(), H::KIND)?;
        debug!(kind = ?H::KIND, handle = ?handle.into(), "free");
        engine.process(Command::free(H::KIND, handle.into()));
        Ok(())
    }
}

fn validate_access(usage: Usage, access: Access) -> Result<()> {
    if usage == Usage::Dynamic && access == Access::None {
        return Err(RenderError::InvalidDesc(
            "dynamic resource without cpu access",
        ));
    }
    Ok(())
}

fn check_region(info: &TextureInfo, region: &TextureRegion, bytes: usize) -> Result<()> {
    let size = info.size;
    let fits = |offset: u32, extent: u32, limit: u32| {
        let limit = limit.max(1);
        offset.checked_add(extent.max(1)).is_some_and(|end| end <= limit)
    };
    if !(fits(region.x, region.width, size.width)
        && fits(region.y, region.height, size.height)
        && fits(region.z, region.depth, size.depth))
    {
        return Err(RenderError::InvalidDesc("region outside the texture"));
    }
    if bytes < region.byte_len(info.format.bytes_per_pixel()) {
        return Err(RenderError::InvalidDesc("texel buffer smaller than the region"));
    }
    Ok(())
}
