//! Camera ownership and frame sampling.
//!
//! Exactly one [`FrameSource`] is active at a time; acquiring for a new
//! capture session releases whatever was held before. All state transitions
//! are driven by the session layer so a closed view can never leave the
//! device streaming in the background.

pub mod sampler;
pub mod source;

use serde::{Deserialize, Serialize};

pub use sampler::{encode_frame, Frame, FrameQuality};
pub use source::{FrameSource, NokhwaSource, RawFrame};

use crate::error::CameraError;

/// Device lifecycle as surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraState {
    Idle,
    Starting,
    Ready,
    Failed,
}

/// Holder of the single camera grant.
pub struct CameraManager {
    active: Option<Box<dyn FrameSource>>,
}

impl CameraManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Install a freshly opened source, releasing any previous grant first.
    pub fn install(&mut self, source: Box<dyn FrameSource>) {
        self.release();
        self.active = Some(source);
    }

    /// Idempotent; dropping the source stops its stream.
    pub fn release(&mut self) {
        self.active = None;
    }

    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    pub fn label(&self) -> Option<String> {
        self.active.as_ref().map(|source| source.label())
    }

    /// Grab one frame and encode it at the requested quality.
    ///
    /// `Ok(None)` means the device produced a warm-up frame with no pixels
    /// yet; the caller simply tries again on a later tick.
    pub fn sample(&mut self, quality: FrameQuality) -> Result<Option<Frame>, CameraError> {
        let source = self
            .active
            .as_mut()
            .ok_or_else(|| CameraError::Capture("no camera is acquired".into()))?;

        let raw = source.grab()?;
        sampler::encode_frame(raw, quality)
    }
}

impl Default for CameraManager {
    fn default() -> Self {
        Self::new()
    }
}
