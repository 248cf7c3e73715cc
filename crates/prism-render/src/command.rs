// SPDX-License-Identifier: CEPL-1.0
//! The closed set of operations a backend executes.
//!
//! Payload bytes are `Cow`: the device hands borrowed caller memory to the
//! backend when it runs a command on the spot and converts to owned memory
//! with [`Command::into_owned`] whenever the command is queued.

use std::borrow::Cow;

use crate::handle::{HandleId, HandleKind};
use crate::types::{
    BufferDesc, ClearDesc, ComputeDesc, DrawDesc, PassOffscreenDesc, PipelineDesc, ProgramDesc,
    RenderSize, SamplerDesc, ShaderStage, TextureDesc, TextureEditDesc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SwapchainNew,
    SwapchainFree,
    SwapchainResize,
    PassSwapchainNew,
    PassOffscreenNew,
    PassFree,
    BufferNew,
    BufferFree,
    TextureNew,
    TextureFree,
    SamplerNew,
    SamplerFree,
    ProgramNew,
    ProgramFree,
    ComputeNew,
    ComputeFree,
    PipelineNew,
    PipelineFree,
    PassBegin,
    PassEnd,
    PassClear,
    UsePipeline,
    UseProgram,
    Scissor,
    BufferWrite,
    TextureWrite,
    BufferRead,
    TextureRead,
    BufferBind,
    TextureBind,
    SamplerBind,
    Draw,
    Marker,
}

#[derive(Clone, Debug)]
pub enum Command<'a> {
    SwapchainNew {
        handle: HandleId,
    },
    SwapchainFree {
        handle: HandleId,
    },
    SwapchainResize {
        handle: HandleId,
        size: RenderSize,
    },
    PassSwapchainNew {
        handle: HandleId,
        swapchain: HandleId,
    },
    PassOffscreenNew {
        handle: HandleId,
        desc: PassOffscreenDesc,
    },
    PassFree {
        handle: HandleId,
    },
    BufferNew {
        handle: HandleId,
        desc: BufferDesc<'a>,
    },
    BufferFree {
        handle: HandleId,
    },
    TextureNew {
        handle: HandleId,
        desc: TextureDesc<'a>,
    },
    TextureFree {
        handle: HandleId,
    },
    SamplerNew {
        handle: HandleId,
        desc: SamplerDesc,
    },
    SamplerFree {
        handle: HandleId,
    },
    ProgramNew {
        handle: HandleId,
        desc: ProgramDesc<'a>,
    },
    ProgramFree {
        handle: HandleId,
    },
    ComputeNew {
        handle: HandleId,
        desc: ComputeDesc<'a>,
    },
    ComputeFree {
        handle: HandleId,
    },
    PipelineNew {
        handle: HandleId,
        desc: PipelineDesc,
    },
    PipelineFree {
        handle: HandleId,
    },
    PassBegin {
        handle: HandleId,
    },
    PassEnd {
        handle: HandleId,
    },
    PassClear {
        desc: ClearDesc,
    },
    UsePipeline {
        pipeline: HandleId,
    },
    UseProgram {
        program: HandleId,
    },
    Scissor {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    BufferWrite {
        handle: HandleId,
        offset: usize,
        bytes: Cow<'a, [u8]>,
    },
    TextureWrite {
        handle: HandleId,
        desc: TextureEditDesc<'a>,
    },
    BufferBind {
        handle: HandleId,
        shader: ShaderStage,
        slot: u32,
    },
    /// Binds a texture together with a sampler from the cache. The cache is
    /// consulted when the command runs, and `cached` is filled in with the
    /// resulting sampler just before the backend sees the command.
    TextureBind {
        handle: HandleId,
        shader: ShaderStage,
        slot: u32,
        sampler: SamplerDesc,
        cached: Option<HandleId>,
    },
    SamplerBind {
        handle: HandleId,
        shader: ShaderStage,
        slot: u32,
    },
    Draw {
        desc: DrawDesc,
    },
    /// No-op carrying a caller-chosen value, for ordering checks and
    /// debugger breadcrumbs.
    Marker {
        value: u64,
    },
}

impl<'a> Command<'a> {
    /// The free command for a handle of the given kind.
    pub fn free(kind: HandleKind, handle: HandleId) -> Command<'static> {
        match kind {
            HandleKind::Swapchain => Command::SwapchainFree { handle },
            HandleKind::Pass => Command::PassFree { handle },
            HandleKind::Buffer => Command::BufferFree { handle },
            HandleKind::Texture => Command::TextureFree { handle },
            HandleKind::Sampler => Command::SamplerFree { handle },
            HandleKind::Program => Command::ProgramFree { handle },
            HandleKind::Compute => Command::ComputeFree { handle },
            HandleKind::Pipeline => Command::PipelineFree { handle },
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SwapchainNew { .. } => CommandKind::SwapchainNew,
            Command::SwapchainFree { .. } => CommandKind::SwapchainFree,
            Command::SwapchainResize { .. } => CommandKind::SwapchainResize,
            Command::PassSwapchainNew { .. } => CommandKind::PassSwapchainNew,
            Command::PassOffscreenNew { .. } => CommandKind::PassOffscreenNew,
            Command::PassFree { .. } => CommandKind::PassFree,
            Command::BufferNew { .. } => CommandKind::BufferNew,
            Command::BufferFree { .. } => CommandKind::BufferFree,
            Command::TextureNew { .. } => CommandKind::TextureNew,
            Command::TextureFree { .. } => CommandKind::TextureFree,
            Command::SamplerNew { .. } => CommandKind::SamplerNew,
            Command::SamplerFree { .. } => CommandKind::SamplerFree,
            Command::ProgramNew { .. } => CommandKind::ProgramNew,
            Command::ProgramFree { .. } => CommandKind::ProgramFree,
            Command::ComputeNew { .. } => CommandKind::ComputeNew,
            Command::ComputeFree { .. } => CommandKind::ComputeFree,
            Command::PipelineNew { .. } => CommandKind::PipelineNew,
            Command::PipelineFree { .. } => CommandKind::PipelineFree,
            Command::PassBegin { .. } => CommandKind::PassBegin,
            Command::PassEnd { .. } => CommandKind::PassEnd,
            Command::PassClear { .. } => CommandKind::PassClear,
            Command::UsePipeline { .. } => CommandKind::UsePipeline,
            Command::UseProgram { .. } => CommandKind::UseProgram,
            Command::Scissor { .. } => CommandKind::Scissor,
            Command::BufferWrite { .. } => CommandKind::BufferWrite,
            Command::TextureWrite { .. } => CommandKind::TextureWrite,
            Command::BufferBind { .. } => CommandKind::BufferBind,
            Command::TextureBind { .. } => CommandKind::TextureBind,
            Command::SamplerBind { .. } => CommandKind::SamplerBind,
            Command::Draw { .. } => CommandKind::Draw,
            Command::Marker { .. } => CommandKind::Marker,
        }
    }

    /// The handle the command creates, destroys or operates on, if any.
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Command::SwapchainNew { handle }
            | Command::SwapchainFree { handle }
            | Command::SwapchainResize { handle, .. }
            | Command::PassSwapchainNew { handle, .. }
            | Command::PassOffscreenNew { handle, .. }
            | Command::PassFree { handle }
            | Command::BufferNew { handle, .. }
            | Command::BufferFree { handle }
            | Command::TextureNew { handle, .. }
            | Command::TextureFree { handle }
            | Command::SamplerNew { handle, .. }
            | Command::SamplerFree { handle }
            | Command::ProgramNew { handle, .. }
            | Command::ProgramFree { handle }
            | Command::ComputeNew { handle, .. }
            | Command::ComputeFree { handle }
            | Command::PipelineNew { handle, .. }
            | Command::PipelineFree { handle }
            | Command::PassBegin { handle }
            | Command::PassEnd { handle }
            | Command::BufferWrite { handle, .. }
            | Command::TextureWrite { handle, .. }
            | Command::BufferBind { handle, .. }
            | Command::TextureBind { handle, .. }
            | Command::SamplerBind { handle, .. } => Some(*handle),
            Command::UsePipeline { pipeline } => Some(*pipeline),
            Command::UseProgram { program } => Some(*program),
            Command::PassClear { .. }
            | Command::Scissor { .. }
            | Command::Draw { .. }
            | Command::Marker { .. } => None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(
            self.kind(),
            CommandKind::SwapchainFree
                | CommandKind::PassFree
                | CommandKind::BufferFree
                | CommandKind::TextureFree
                | CommandKind::SamplerFree
                | CommandKind::ProgramFree
                | CommandKind::ComputeFree
                | CommandKind::PipelineFree
        )
    }

    pub fn is_new(&self) -> bool {
        matches!(
            self.kind(),
            CommandKind::SwapchainNew
                | CommandKind::PassSwapchainNew
                | CommandKind::PassOffscreenNew
                | CommandKind::BufferNew
                | CommandKind::TextureNew
                | CommandKind::SamplerNew
                | CommandKind::ProgramNew
                | CommandKind::ComputeNew
                | CommandKind::PipelineNew
        )
    }

    /// Deep-copies every caller-provided byte so the command can wait in a
    /// list past the end of the call that issued it.
    pub fn into_owned(self) -> Command<'static> {
        match self {
            Command::BufferNew { handle, desc } => Command::BufferNew {
                handle,
                desc: desc.into_owned(),
            },
            Command::TextureNew { handle, desc } => Command::TextureNew {
                handle,
                desc: desc.into_owned(),
            },
            Command::ProgramNew { handle, desc } => Command::ProgramNew {
                handle,
                desc: desc.into_owned(),
            },
            Command::ComputeNew { handle, desc } => Command::ComputeNew {
                handle,
                desc: desc.into_owned(),
            },
            Command::BufferWrite {
                handle,
                offset,
                bytes,
            } => Command::BufferWrite {
                handle,
                offset,
                bytes: Cow::Owned(bytes.into_owned()),
            },
            Command::TextureWrite { handle, desc } => Command::TextureWrite {
                handle,
                desc: desc.into_owned(),
            },
            Command::SwapchainNew { handle } => Command::SwapchainNew { handle },
            Command::SwapchainFree { handle } => Command::SwapchainFree { handle },
            Command::SwapchainResize { handle, size } => Command::SwapchainResize { handle, size },
            Command::PassSwapchainNew { handle, swapchain } => {
                Command::PassSwapchainNew { handle, swapchain }
            }
            Command::PassOffscreenNew { handle, desc } => Command::PassOffscreenNew { handle, desc },
            Command::PassFree { handle } => Command::PassFree { handle },
            Command::BufferFree { handle } => Command::BufferFree { handle },
            Command::TextureFree { handle } => Command::TextureFree { handle },
            Command::SamplerNew { handle, desc } => Command::SamplerNew { handle, desc },
            Command::SamplerFree { handle } => Command::SamplerFree { handle },
            Command::ProgramFree { handle } => Command::ProgramFree { handle },
            Command::ComputeFree { handle } => Command::ComputeFree { handle },
            Command::PipelineNew { handle, desc } => Command::PipelineNew { handle, desc },
            Command::PipelineFree { handle } => Command::PipelineFree { handle },
            Command::PassBegin { handle } => Command::PassBegin { handle },
            Command::PassEnd { handle } => Command::PassEnd { handle },
            Command::PassClear { desc } => Command::PassClear { desc },
            Command::UsePipeline { pipeline } => Command::UsePipeline { pipeline },
            Command::UseProgram { program } => Command::UseProgram { program },
            Command::Scissor {
                x,
                y,
                width,
                height,
            } => Command::Scissor {
                x,
                y,
                width,
                height,
            },
            Command::BufferBind {
                handle,
                shader,
                slot,
            } => Command::BufferBind {
                handle,
                shader,
                slot,
            },
            Command::TextureBind {
                handle,
                shader,
                slot,
                sampler,
                cached,
            } => Command::TextureBind {
                handle,
                shader,
                slot,
                sampler,
                cached,
            },
            Command::SamplerBind {
                handle,
                shader,
                slot,
            } => Command::SamplerBind {
                handle,
                shader,
                slot,
            },
            Command::Draw { desc } => Command::Draw { desc },
            Command::Marker { value } => Command::Marker { value },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleTable;
    use crate::handle::HandleData;

    #[test]
    fn into_owned_copies_caller_bytes() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Program);
        let mut bytes = vec![7u8; 4];
        let command = Command::BufferWrite {
            handle: id,
            offset: 0,
            bytes: Cow::Borrowed(&bytes[..]),
        };
        let owned = command.into_owned();
        bytes.fill(0);
        match owned {
            Command::BufferWrite { bytes, .. } => {
                assert!(matches!(bytes, Cow::Owned(_)));
                assert_eq!(&bytes[..], &[7u8; 4]);
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn free_matches_kind() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Compute);
        let command = Command::free(HandleKind::Texture, id);
        assert_eq!(command.kind(), CommandKind::TextureFree);
        assert!(command.is_free());
        assert_eq!(command.handle(), Some(id));
    }
}
