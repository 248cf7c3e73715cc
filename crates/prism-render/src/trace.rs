// SPDX-License-Identifier: CEPL-1.0
//! Headless backend that keeps a log of what it was asked to do.
//!
//! It mirrors buffer and texture contents in memory so reads, writes and
//! deferred copies can be checked without a GPU, and counts live native
//! objects per kind.

use std::collections::HashMap;

use anyhow::{anyhow, bail, ensure, Result};
use tracing::trace;

use crate::backend::{Backend, Frame};
use crate::command::{Command, CommandKind};
use crate::handle::{HandleId, HandleKind, HandleTable};
use crate::settings::Settings;
use crate::types::{ShaderStage, TextureOrigin, TextureRegion};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub kind: CommandKind,
    pub handle: Option<HandleId>,
    pub marker: Option<u64>,
}

#[derive(Default)]
pub struct TraceBackend {
    entries: Vec<TraceEntry>,
    live: HashMap<HandleId, HandleKind>,
    peak_samplers: usize,
    buffers: HashMap<HandleId, Vec<u8>>,
    textures: HashMap<HandleId, Vec<u8>>,
    presents: usize,
    fail_programs: bool,
}

impl TraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every program and compute creation fail, as a compiler would
    /// on bad source.
    pub fn failing_programs(mut self) -> Self {
        self.fail_programs = true;
        self
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }

    pub fn markers(&self) -> Vec<u64> {
        self.entries.iter().filter_map(|e| e.marker).collect()
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear_entries(&mut self) {
        self.entries.clear();
    }

    pub fn live(&self, kind: HandleKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.live.contains_key(&id)
    }

    /// Highest number of samplers that existed at the same time.
    pub fn peak_samplers(&self) -> usize {
        self.peak_samplers
    }

    pub fn buffer_contents(&self, id: HandleId) -> Option<&[u8]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    pub fn presents(&self) -> usize {
        self.presents
    }

    fn create(&mut self, id: HandleId, kind: HandleKind) {
        self.live.insert(id, kind);
        if kind == HandleKind::Sampler {
            self.peak_samplers = self.peak_samplers.max(self.live(HandleKind::Sampler));
        }
    }

    fn destroy(&mut self, id: HandleId) -> Result<()> {
        self.buffers.remove(&id);
        self.textures.remove(&id);
        self.live
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("destroying {id:?} which does not exist"))
    }

    fn require(&self, id: HandleId) -> Result<()> {
        ensure!(self.live.contains_key(&id), "{id:?} has no native object");
        Ok(())
    }
}

impl Backend for TraceBackend {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn texture_origin(&self) -> TextureOrigin {
        TextureOrigin::TopLeft
    }

    fn execute(&mut self, frame: &Frame<'_>, command: &Command<'_>) -> Result<()> {
        trace!(kind = ?command.kind(), "trace backend");
        match command {
            Command::SwapchainNew { handle } => self.create(*handle, HandleKind::Swapchain),
            Command::PassSwapchainNew { handle, swapchain } => {
                self.require(*swapchain)?;
                self.create(*handle, HandleKind::Pass);
            }
            Command::PassOffscreenNew { handle, desc } => {
                for texture in desc.attachments() {
                    self.require(texture.id())?;
                }
                self.create(*handle, HandleKind::Pass);
            }
            Command::BufferNew { handle, desc } => {
                let mut bytes = vec![0; desc.size];
                if let Some(data) = &desc.data {
                    bytes[..data.len()].copy_from_slice(data);
                }
                self.buffers.insert(*handle, bytes);
                self.create(*handle, HandleKind::Buffer);
            }
            Command::TextureNew { handle, desc } => {
                let len = desc.size.texel_count() * desc.format.bytes_per_pixel();
                let mut bytes = vec![0; len];
                if let Some(data) = &desc.data {
                    bytes.copy_from_slice(&data[..len]);
                }
                self.textures.insert(*handle, bytes);
                self.create(*handle, HandleKind::Texture);
            }
            Command::SamplerNew { handle, .. } => self.create(*handle, HandleKind::Sampler),
            Command::ProgramNew { handle, desc } => {
                if self.fail_programs {
                    bail!("vertex shader compile error in {} bytes", desc.vertex.len());
                }
                self.create(*handle, HandleKind::Program);
            }
            Command::ComputeNew { handle, .. } => {
                if self.fail_programs {
                    bail!("compute shader compile error");
                }
                self.create(*handle, HandleKind::Compute);
            }
            Command::PipelineNew { handle, .. } => self.create(*handle, HandleKind::Pipeline),
            Command::SwapchainFree { handle }
            | Command::PassFree { handle }
            | Command::BufferFree { handle }
            | Command::TextureFree { handle }
            | Command::SamplerFree { handle }
            | Command::ProgramFree { handle }
            | Command::ComputeFree { handle }
            | Command::PipelineFree { handle } => {
                // failed creations never made it into `live`
                if frame.handles.get(*handle).is_some_and(|r| !r.is_failed()) {
                    self.destroy(*handle)?;
                }
            }
            Command::SwapchainResize { handle, .. } | Command::PassBegin { handle } => {
                self.require(*handle)?
            }
            Command::PassEnd { handle } => {
                ensure!(
                    frame.state.current_pass == Some(*handle),
                    "pass end without matching begin"
                );
            }
            Command::UsePipeline { pipeline } => self.require(*pipeline)?,
            Command::UseProgram { program } => self.require(*program)?,
            Command::BufferWrite {
                handle,
                offset,
                bytes,
            } => {
                let buffer = self
                    .buffers
                    .get_mut(handle)
                    .ok_or_else(|| anyhow!("write to missing buffer {handle:?}"))?;
                let end = offset + bytes.len();
                ensure!(end <= buffer.len(), "write past end of buffer");
                buffer[*offset..end].copy_from_slice(bytes);
            }
            Command::TextureWrite { handle, desc } => {
                let info = frame
                    .handles
                    .texture(*handle)
                    .ok_or_else(|| anyhow!("write to missing texture {handle:?}"))?;
                let texels = self
                    .textures
                    .get_mut(handle)
                    .ok_or_else(|| anyhow!("texture {handle:?} has no storage"))?;
                let mut src = 0;
                let rows = desc.region().byte_rows(info.size, info.format.bytes_per_pixel());
                for (start, len) in rows {
                    texels[start..start + len].copy_from_slice(&desc.bytes[src..src + len]);
                    src += len;
                }
            }
            Command::BufferBind { handle, .. } | Command::SamplerBind { handle, .. } => {
                self.require(*handle)?
            }
            Command::TextureBind { handle, cached, .. } => {
                self.require(*handle)?;
                self.require(cached.ok_or_else(|| anyhow!("texture bind without a sampler"))?)?;
            }
            Command::Draw { desc } => {
                for input in desc.vertex_buffers.iter().flatten() {
                    self.require(input.buffer.id())?;
                }
                if let Some(index) = desc.index_buffer {
                    self.require(index.id())?;
                }
            }
            Command::PassClear { .. } | Command::Scissor { .. } | Command::Marker { .. } => {}
        }

        self.entries.push(TraceEntry {
            kind: command.kind(),
            handle: command.handle(),
            marker: match command {
                Command::Marker { value } => Some(*value),
                _ => None,
            },
        });
        Ok(())
    }

    fn read_buffer(
        &mut self,
        _handles: &HandleTable,
        buffer: HandleId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        let bytes = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| anyhow!("read from missing buffer {buffer:?}"))?;
        let end = offset + out.len();
        ensure!(end <= bytes.len(), "read past end of buffer");
        out.copy_from_slice(&bytes[offset..end]);
        self.entries.push(TraceEntry {
            kind: CommandKind::BufferRead,
            handle: Some(buffer),
            marker: None,
        });
        Ok(())
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
            .ok_or_else(|| anyhow!("read from missing texture {texture:?}"))?;
        let texels = self
            .textures
            .get(&texture)
            .ok_or_else(|| anyhow!("texture {texture:?} has no storage"))?;
        let mut dst = 0;
        for (start, len) in region.byte_rows(info.size, info.format.bytes_per_pixel()) {
            out[dst..dst + len].copy_from_slice(&texels[start..start + len]);
            dst += len;
        }
        self.entries.push(TraceEntry {
            kind: CommandKind::TextureRead,
            handle: Some(texture),
            marker: None,
        });
        Ok(())
    }

    fn present(&mut self, _handles: &HandleTable, swapchain: HandleId, _settings: &Settings) -> Result<()> {
        self.require(swapchain)?;
        self.presents += 1;
        Ok(())
    }

    fn check_program(&mut self, stage: ShaderStage, source: &str) -> Result<()> {
        ensure!(!source.trim().is_empty(), "{stage:?} shader source is empty");
        ensure!(!self.fail_programs, "{stage:?} shader rejected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleData;
    use crate::settings::Settings;
    use crate::backend::ExecState;

    #[test]
    fn free_of_unknown_object_is_an_error() {
        let mut handles = HandleTable::new();
        let id = handles.insert(HandleData::Program);
        let state = ExecState::default();
        let settings = Settings::default();
        let frame = Frame {
            handles: &handles,
            state: &state,
            settings: &settings,
        };
        let mut backend = TraceBackend::new();
        assert!(backend
            .execute(&frame, &Command::ProgramFree { handle: id })
            .is_err());
        backend
            .execute(&frame, &Command::ProgramNew { handle: id, desc: Default::default() })
            .expect("create");
        assert_eq!(backend.live(HandleKind::Program), 1);
        backend
            .execute(&frame, &Command::ProgramFree { handle: id })
            .expect("destroy");
        assert_eq!(backend.live(HandleKind::Program), 0);
        assert_eq!(backend.count(CommandKind::ProgramFree), 1);
    }
}
