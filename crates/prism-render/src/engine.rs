// SPDX-License-Identifier: CEPL-1.0
//! Command execution and resource bookkeeping.
//!
//! The engine never locks. [`crate::Device`] owns it behind a mutex and
//! every method here runs with that lock held.

use tracing::{debug, error, trace, warn};

use crate::backend::{Backend, ExecState, Frame};
use crate::cache::{Lookup, SamplerCache};
use crate::command::Command;
use crate::error::{RenderError, Result};
use crate::handle::{HandleData, HandleId, HandleKind, HandleRecord, HandleTable, PassTarget};
use crate::list::{CommandList, CommandPool};
use crate::settings::Settings;
use crate::types::{SamplerDesc, SAMPLER_CACHE_SIZE};

pub(crate) struct Engine<B> {
    pub(crate) backend: B,
    pub(crate) handles: HandleTable,
    pub(crate) samplers: SamplerCache<HandleId, SAMPLER_CACHE_SIZE>,
    pub(crate) settings: Settings,
    commands: CommandPool,
    queue: CommandList,
    state: ExecState,
}

impl<B: Backend> Engine<B> {
    pub(crate) fn new(backend: B, settings: Settings) -> Self {
        Self {
            backend,
            handles: HandleTable::new(),
            samplers: SamplerCache::new(),
            settings,
            commands: CommandPool::new(),
            queue: CommandList::new(),
            state: ExecState::default(),
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Looks up a record and checks it is of the expected kind.
    pub(crate) fn expect(&self, id: HandleId, kind: HandleKind) -> Result<&HandleRecord> {
        let record = self
            .handles
            .get(id)
            .ok_or(RenderError::StaleHandle { kind })?;
        if record.kind() != kind {
            return Err(RenderError::WrongKind {
                expected: kind,
                found: record.kind(),
            });
        }
        Ok(record)
    }

    pub(crate) fn create(&mut self, data: HandleData) -> HandleId {
        self.handles.insert(data)
    }

    /// Runs the command now, or queues an owned copy of it when calls are
    /// deferred.
    pub(crate) fn process(&mut self, command: Command<'_>) {
        if self.settings.defer_api_calls {
            self.queue.push_back(&mut self.commands, command.into_owned());
        } else {
            self.execute(&command);
        }
    }

    /// Executes and frees every queued command in order.
    pub(crate) fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(command) = self.queue.pop_front(&mut self.commands) {
            self.execute(&command);
            count += 1;
        }
        if count > 0 {
            debug!(count, "drained device queue");
        }
        count
    }

    /// Fails unless `pass` is a live pass between begin and end.
    pub(crate) fn check_recording(&self, pass: HandleId) -> Result<()> {
        self.expect(pass, HandleKind::Pass)?;
        match self.handles.pass(pass) {
            Some(info) if info.recording => Ok(()),
            _ => Err(RenderError::PassNotRecording),
        }
    }

    /// Appends to a recording pass. Pass lists always own their payloads.
    pub(crate) fn record(&mut self, pass: HandleId, command: Command<'_>) -> Result<()> {
        self.check_recording(pass)?;
        let info = self
            .handles
            .pass_mut(pass)
            .ok_or(RenderError::StaleHandle {
                kind: HandleKind::Pass,
            })?;
        info.list.push_back(&mut self.commands, command.into_owned());
        Ok(())
    }

    pub(crate) fn pass_begin(&mut self, pass: HandleId) -> Result<()> {
        self.expect(pass, HandleKind::Pass)?;
        let mut leftover = match self.handles.pass_mut(pass) {
            Some(info) if info.recording => return Err(RenderError::PassAlreadyRecording),
            Some(info) => {
                info.recording = true;
                std::mem::take(&mut info.list)
            }
            None => {
                return Err(RenderError::StaleHandle {
                    kind: HandleKind::Pass,
                })
            }
        };
        self.discard_list(&mut leftover);
        self.record(pass, Command::PassBegin { handle: pass })
    }

    pub(crate) fn pass_end(&mut self, pass: HandleId) -> Result<()> {
        self.record(pass, Command::PassEnd { handle: pass })?;
        let mut list = match self.handles.pass_mut(pass) {
            Some(info) => {
                info.recording = false;
                std::mem::take(&mut info.list)
            }
            None => CommandList::new(),
        };

        if self.settings.defer_api_calls {
            trace!(pass = ?pass, len = list.len(), "splicing pass onto device queue");
            self.queue.append(&mut self.commands, &mut list);
        } else {
            while let Some(command) = list.pop_front(&mut self.commands) {
                self.execute(&command);
            }
        }
        Ok(())
    }

    /// Returns the cached sampler for `desc`, creating it on a miss and
    /// tearing down whatever the miss pushed out. Runs on the draining
    /// side, so creation and eviction execute right away and the number of
    /// live cached samplers never exceeds the cache capacity.
    pub(crate) fn cached_sampler(&mut self, desc: SamplerDesc) -> HandleId {
        match self.samplers.lookup(&desc) {
            Lookup::Hit(handle) if self.handles.get(handle).is_some() => handle,
            Lookup::Hit(handle) => {
                warn!(sampler = ?handle, "cached sampler is gone, recreating");
                self.samplers.remove(&desc);
                self.cached_sampler(desc)
            }
            Lookup::Miss { slot, evicted } => {
                if let Some(old) = evicted {
                    debug!(sampler = ?old, "sampler cache eviction");
                    self.release(old);
                }
                let handle = self.create(HandleData::Sampler(desc));
                self.execute(&Command::SamplerNew { handle, desc });
                self.samplers.fill(slot, desc, handle);
                handle
            }
        }
    }

    /// Drops one reference through the regular free path.
    pub(crate) fn release(&mut self, id: HandleId) {
        match self.handles.kind(id) {
            Some(kind) => self.execute(&Command::free(kind, id)),
            None => warn!(handle = ?id, "release of stale handle"),
        }
    }

    pub(crate) fn execute(&mut self, command: &Command<'_>) {
        trace!(kind = ?command.kind(), handle = ?command.handle(), "execute");

        if command.is_free() {
            if let Some(id) = command.handle() {
                self.teardown(id, command);
            }
            return;
        }

        if let Command::TextureBind {
            handle,
            shader,
            slot,
            sampler,
            ..
        } = command
        {
            let cached = self.cached_sampler(*sampler);
            self.dispatch(&Command::TextureBind {
                handle: *handle,
                shader: *shader,
                slot: *slot,
                sampler: *sampler,
                cached: Some(cached),
            });
            return;
        }

        match command {
            Command::PassOffscreenNew { desc, .. } => {
                for texture in desc.attachments() {
                    if !self.handles.retain(texture.id()) {
                        warn!(texture = ?texture.id(), "offscreen pass attachment is gone");
                    }
                }
            }
            Command::SwapchainResize { handle, size } => {
                if let Some(record) = self.handles.get_mut(*handle) {
                    record.data = HandleData::Swapchain(*size);
                }
            }
            Command::PassBegin { handle } => self.state.current_pass = Some(*handle),
            Command::UsePipeline { pipeline } => self.state.current_pipeline = Some(*pipeline),
            Command::UseProgram { program } => self.state.current_program = Some(*program),
            _ => {}
        }

        self.dispatch(command);

        if let Command::PassEnd { .. } = command {
            self.state.current_pass = None;
        }
    }

    fn dispatch(&mut self, command: &Command<'_>) {
        let frame = Frame {
            handles: &self.handles,
            state: &self.state,
            settings: &self.settings,
        };
        if let Err(err) = self.backend.execute(&frame, command) {
            error!(
                backend = self.backend.name(),
                kind = ?command.kind(),
                "command failed: {err:#}"
            );
            if command.is_new() {
                if let Some(id) = command.handle() {
                    self.handles.mark_failed(id);
                }
            }
        }
    }

    fn teardown(&mut self, id: HandleId, command: &Command<'_>) {
        if self.handles.get(id).is_none() {
            warn!(handle = ?id, kind = ?command.kind(), "free of stale handle");
            return;
        }
        if !self.handles.release(id) {
            return;
        }

        self.dispatch(command);
        let Some(record) = self.handles.remove(id) else {
            return;
        };

        for current in [
            &mut self.state.current_pass,
            &mut self.state.current_pipeline,
            &mut self.state.current_program,
        ] {
            if *current == Some(id) {
                *current = None;
            }
        }

        if let HandleData::Pass(mut pass) = record.data {
            self.discard_list(&mut pass.list);
            if let PassTarget::Offscreen(desc) = pass.target {
                for texture in desc.attachments() {
                    self.release(texture.id());
                }
            }
        }
    }

    /// Frees commands that will never run.
    fn discard_list(&mut self, list: &mut CommandList) {
        let dropped = list.clear(&mut self.commands);
        if dropped > 0 {
            debug!(dropped, "discarded unexecuted pass commands");
        }
    }

    /// Flushes outstanding work and returns every cached sampler.
    pub(crate) fn shutdown(&mut self) {
        self.drain();
        for sampler in self.samplers.drain() {
            self.release(sampler);
        }
        self.drain();

        for (id, record) in self.handles.iter() {
            warn!(
                handle = ?id,
                kind = ?record.kind(),
                refs = record.ref_count(),
                "handle alive at dispose"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceBackend;
    use crate::types::RenderSize;

    #[test]
    fn cache_entry_without_a_live_sampler_is_recreated() {
        let mut engine = Engine::new(TraceBackend::new(), Settings::default());
        let desc = SamplerDesc::default();
        let first = engine.cached_sampler(desc);
        assert_eq!(engine.cached_sampler(desc), first);

        engine.release(first);
        assert!(engine.handles.get(first).is_none());

        let second = engine.cached_sampler(desc);
        assert_ne!(second, first);
        assert!(engine.handles.get(second).is_some());
        assert_eq!(engine.samplers.len(), 1);
        assert_eq!(engine.backend.live(HandleKind::Sampler), 1);
    }

    #[test]
    fn swapchain_size_changes_when_resize_runs() {
        let mut engine = Engine::new(TraceBackend::new(), Settings::deferred());
        let swapchain = engine.create(HandleData::Swapchain(RenderSize {
            width: 4,
            height: 4,
        }));
        engine.process(Command::SwapchainNew { handle: swapchain });
        let size = RenderSize {
            width: 8,
            height: 2,
        };
        engine.process(Command::SwapchainResize {
            handle: swapchain,
            size,
        });
        assert_eq!(engine.handles.swapchain_size(swapchain).map(|s| s.width), Some(4));

        engine.drain();
        assert_eq!(engine.handles.swapchain_size(swapchain), Some(size));
    }
}
