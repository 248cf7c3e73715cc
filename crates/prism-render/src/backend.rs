// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

use crate::command::Command;
use crate::handle::{HandleId, HandleTable};
use crate::settings::Settings;
use crate::types::{ShaderStage, TextureOrigin, TextureRegion};

/// State that is only meaningful while commands are being executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecState {
    pub current_pipeline: Option<HandleId>,
    pub current_program: Option<HandleId>,
    pub current_pass: Option<HandleId>,
}

/// Everything a backend may look at while executing one command.
pub struct Frame<'a> {
    pub handles: &'a HandleTable,
    pub state: &'a ExecState,
    pub settings: &'a Settings,
}

/// A native graphics driver.
///
/// The device calls into a backend with its lock held, one command at a
/// time, in queue order. Free commands only arrive for the release that
/// dropped the last reference, so a backend destroys each native object
/// exactly once. Errors are logged by the device and never retried.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn texture_origin(&self) -> TextureOrigin;

    fn execute(&mut self, frame: &Frame<'_>, command: &Command<'_>) -> Result<()>;

    fn read_buffer(
        &mut self,
        handles: &HandleTable,
        buffer: HandleId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()>;

    fn read_texture(
        &mut self,
        handles: &HandleTable,
        texture: HandleId,
        region: &TextureRegion,
        out: &mut [u8],
    ) -> Result<()>;

    fn present(&mut self, handles: &HandleTable, swapchain: HandleId, settings: &Settings)
        -> Result<()>;

    /// Validates one shader stage without creating anything.
    fn check_program(&mut self, stage: ShaderStage, source: &str) -> Result<()>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn texture_origin(&self) -> TextureOrigin {
        (**self).texture_origin()
    }

    fn execute(&mut self, frame: &Frame<'_>, command: &Command<'_>) -> Result<()> {
        (**self).execute(frame, command)
    }

    fn read_buffer(
        &mut self,
        handles: &HandleTable,
        buffer: HandleId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        (**self).read_buffer(handles, buffer, offset, out)
    }

    fn read_texture(
        &mut self,
        handles: &HandleTable,
        texture: HandleId,
        region: &TextureRegion,
        out: &mut [u8],
    ) -> Result<()> {
        (**self).read_texture(handles, texture, region, out)
    }

    fn present(
        &mut self,
        handles: &HandleTable,
        swapchain: HandleId,
        settings: &Settings,
    ) -> Result<()> {
        (**self).present(handles, swapchain, settings)
    }

    fn check_program(&mut self, stage: ShaderStage, source: &str) -> Result<()> {
        (**self).check_program(stage, source)
    }
}
