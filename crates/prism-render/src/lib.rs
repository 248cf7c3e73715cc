// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral GPU command layer.
//!
//! Callers create resources and record passes through a [`Device`]. Each
//! call becomes a [`Command`] that either runs on the [`Backend`] right
//! away or waits on the device queue until the next flush or present.

mod backend;
mod cache;
mod command;
mod device;
mod engine;
mod error;
mod handle;
mod list;
mod settings;
mod trace;
mod types;

pub use backend::{Backend, ExecState, Frame};
pub use cache::{Lookup, SamplerCache};
pub use command::{Command, CommandKind};
pub use device::Device;
pub use error::{RenderError, Result};
pub use handle::{
    Buffer, BufferInfo, Compute, HandleData, HandleId, HandleKind, HandleRecord, HandleTable,
    Pass, PassInfo, PassTarget, Pipeline, Program, Sampler, Swapchain, Texture, TextureInfo,
    TypedHandle,
};
pub use list::{CommandList, CommandNode, CommandPool};
pub use settings::Settings;
pub use trace::{TraceBackend, TraceEntry};
pub use types::*;
