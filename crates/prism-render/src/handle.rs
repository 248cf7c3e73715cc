// SPDX-License-Identifier: CEPL-1.0
//! Reference-counted resource records.
//!
//! Every resource lives in one [`HandleTable`] slot. The record starts with a
//! count of one owned by the creator. Commands and passes that need a
//! resource to outlive the caller's free take extra counts; the engine tears
//! the native object down on the release that takes the count to zero.

use std::fmt;
use std::sync::atomic::Ordering;

use portable_atomic::AtomicU32;
use prism_core::{ObjectPool, PoolKey};

use crate::list::CommandList;
use crate::types::{
    Access, BufferKind, Msaa, PassOffscreenDesc, PipelineDesc, PixelFormat, RenderSize,
    SamplerDesc, TextureSize, Usage,
};

/// Untyped id of a handle-table slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(PoolKey);

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:?}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Swapchain,
    Pass,
    Buffer,
    Texture,
    Sampler,
    Program,
    Compute,
    Pipeline,
}

/// Implemented by the typed wrappers the device hands out.
pub trait TypedHandle: Copy + Into<HandleId> {
    const KIND: HandleKind;
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) HandleId);

        impl $name {
            pub fn id(self) -> HandleId {
                self.0
            }
        }

        impl TypedHandle for $name {
            const KIND: HandleKind = HandleKind::$kind;
        }

        impl From<$name> for HandleId {
            fn from(handle: $name) -> HandleId {
                handle.0
            }
        }
    };
}

typed_handle!(Swapchain => Swapchain);
typed_handle!(
    /// A render target plus the commands recorded against it.
    Pass => Pass
);
typed_handle!(Buffer => Buffer);
typed_handle!(Texture => Texture);
typed_handle!(Sampler => Sampler);
typed_handle!(Program => Program);
typed_handle!(Compute => Compute);
typed_handle!(Pipeline => Pipeline);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub kind: BufferKind,
    pub usage: Usage,
    pub access: Access,
    pub size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureInfo {
    pub size: TextureSize,
    pub format: PixelFormat,
    pub usage: Usage,
    pub access: Access,
    pub render_target: bool,
    pub msaa: Msaa,
    pub sampler: SamplerDesc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    Swapchain(Swapchain),
    Offscreen(PassOffscreenDesc),
}

#[derive(Debug)]
pub struct PassInfo {
    pub target: PassTarget,
    /// Extent of offscreen attachments. Swapchain passes follow the swapchain.
    pub size: RenderSize,
    pub(crate) list: CommandList,
    pub(crate) recording: bool,
}

#[derive(Debug)]
pub enum HandleData {
    Swapchain(RenderSize),
    Pass(PassInfo),
    Buffer(BufferInfo),
    Texture(TextureInfo),
    Sampler(SamplerDesc),
    Program,
    Compute,
    Pipeline(PipelineDesc),
}

impl HandleData {
    pub fn kind(&self) -> HandleKind {
        match self {
            HandleData::Swapchain(_) => HandleKind::Swapchain,
            HandleData::Pass(_) => HandleKind::Pass,
            HandleData::Buffer(_) => HandleKind::Buffer,
            HandleData::Texture(_) => HandleKind::Texture,
            HandleData::Sampler(_) => HandleKind::Sampler,
            HandleData::Program => HandleKind::Program,
            HandleData::Compute => HandleKind::Compute,
            HandleData::Pipeline(_) => HandleKind::Pipeline,
        }
    }
}

#[derive(Debug)]
pub struct HandleRecord {
    refcount: AtomicU32,
    failed: bool,
    pub data: HandleData,
}

impl HandleRecord {
    pub fn kind(&self) -> HandleKind {
        self.data.kind()
    }

    pub fn ref_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Set when the backend could not build the native object.
    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

#[derive(Default)]
pub struct HandleTable {
    pool: ObjectPool<HandleRecord>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub(crate) fn insert(&mut self, data: HandleData) -> HandleId {
        HandleId(self.pool.insert(HandleRecord {
            refcount: AtomicU32::new(1),
            failed: false,
            data,
        }))
    }

    pub(crate) fn remove(&mut self, id: HandleId) -> Option<HandleRecord> {
        self.pool.remove(id.0)
    }

    pub fn get(&self, id: HandleId) -> Option<&HandleRecord> {
        self.pool.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: HandleId) -> Option<&mut HandleRecord> {
        self.pool.get_mut(id.0)
    }

    pub fn kind(&self, id: HandleId) -> Option<HandleKind> {
        self.get(id).map(HandleRecord::kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &HandleRecord)> + '_ {
        self.pool.iter().map(|(key, record)| (HandleId(key), record))
    }

    /// Adds a reference. Returns false for a stale id.
    pub fn retain(&self, id: HandleId) -> bool {
        match self.get(id) {
            Some(record) => {
                record.refcount.fetch_add(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Drops a reference. True only for the caller that observed the count
    /// go from one to zero; that caller owns teardown.
    pub fn release(&self, id: HandleId) -> bool {
        match self.get(id) {
            Some(record) => record.refcount.fetch_sub(1, Ordering::AcqRel) == 1,
            None => false,
        }
    }

    pub(crate) fn mark_failed(&mut self, id: HandleId) {
        if let Some(record) = self.get_mut(id) {
            record.failed = true;
        }
    }

    pub fn buffer(&self, id: HandleId) -> Option<&BufferInfo> {
        match &self.get(id)?.data {
            HandleData::Buffer(info) => Some(info),
            _ => None,
        }
    }

    pub fn texture(&self, id: HandleId) -> Option<&TextureInfo> {
        match &self.get(id)?.data {
            HandleData::Texture(info) => Some(info),
            _ => None,
        }
    }

    pub fn sampler(&self, id: HandleId) -> Option<&SamplerDesc> {
        match &self.get(id)?.data {
            HandleData::Sampler(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn pipeline(&self, id: HandleId) -> Option<&PipelineDesc> {
        match &self.get(id)?.data {
            HandleData::Pipeline(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn swapchain_size(&self, id: HandleId) -> Option<RenderSize> {
        match &self.get(id)?.data {
            HandleData::Swapchain(size) => Some(*size),
            _ => None,
        }
    }

    pub fn pass(&self, id: HandleId) -> Option<&PassInfo> {
        match &self.get(id)?.data {
            HandleData::Pass(info) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn pass_mut(&mut self, id: HandleId) -> Option<&mut PassInfo> {
        match &mut self.get_mut(id)?.data {
            HandleData::Pass(info) => Some(info),
            _ => None,
        }
    }

    /// Current extent of a pass, resolving swapchain passes through their
    /// swapchain.
    pub fn pass_size(&self, id: HandleId) -> Option<RenderSize> {
        let pass = self.pass(id)?;
        match pass.target {
            PassTarget::Swapchain(swapchain) => self.swapchain_size(swapchain.id()),
            PassTarget::Offscreen(_) => Some(pass.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_start_with_one_reference() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Program);
        assert_eq!(table.get(id).map(HandleRecord::ref_count), Some(1));
        assert_eq!(table.kind(id), Some(HandleKind::Program));
    }

    #[test]
    fn only_the_last_release_reports_teardown() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Compute);
        assert!(table.retain(id));
        assert!(table.retain(id));
        assert!(!table.release(id));
        assert!(!table.release(id));
        assert!(table.release(id));
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Program);
        table.remove(id);
        let reused = table.insert(HandleData::Compute);
        assert_ne!(id, reused);
        assert!(!table.retain(id));
        assert!(!table.release(id));
        assert_eq!(table.kind(id), None);
    }

    #[test]
    fn typed_accessors_check_kind() {
        let mut table = HandleTable::new();
        let id = table.insert(HandleData::Swapchain(RenderSize {
            width: 4,
            height: 2,
        }));
        assert!(table.buffer(id).is_none());
        assert_eq!(table.swapchain_size(id).map(|s| s.width), Some(4));
    }
}
