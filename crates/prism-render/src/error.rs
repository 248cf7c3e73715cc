// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

use crate::handle::HandleKind;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid descriptor: {0}")]
    InvalidDesc(&'static str),
    #[error("stale {kind:?} handle")]
    StaleHandle { kind: HandleKind },
    #[error("expected a {expected:?} handle, found {found:?}")]
    WrongKind {
        expected: HandleKind,
        found: HandleKind,
    },
    #[error("pass is not recording")]
    PassNotRecording,
    #[error("pass is already recording")]
    PassAlreadyRecording,
    #[error("shader check failed: {0}")]
    ShaderCheck(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
