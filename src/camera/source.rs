use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    CallbackCamera, NokhwaError,
};

use crate::error::CameraError;

/// One RGB8 frame as delivered by the device, before any encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A grabbing backend the capture pipeline can pull frames from.
///
/// The production implementation wraps a physical device; tests swap in a
/// synthetic generator so the whole session flow runs headless.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<RawFrame, CameraError>;

    /// Human-readable device label for logs and snapshots.
    fn label(&self) -> String;
}

/// `FrameSource` backed by nokhwa's native platform backend.
pub struct NokhwaSource {
    camera: CallbackCamera,
    label: String,
}

impl NokhwaSource {
    /// Open the device at `device_index` and start its stream. Fails with a
    /// classified error so the session layer can tell the operator what to
    /// fix (permission, missing device, device held by another app).
    pub fn open(device_index: u32) -> Result<Self, CameraError> {
        let devices = nokhwa::query(ApiBackend::Auto)
            .map_err(|err| classify_open_error(&err, device_index))?;
        if devices.is_empty() {
            return Err(CameraError::NotFound(
                "no camera devices reported by the system".into(),
            ));
        }

        let index = CameraIndex::Index(device_index);
        let label = devices
            .iter()
            .find(|device| *device.index() == index)
            .map(|device| device.human_name())
            .unwrap_or_else(|| format!("camera {device_index}"));

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
        let mut camera = CallbackCamera::new(index, requested, |_| {})
            .map_err(|err| classify_open_error(&err, device_index))?;

        camera
            .open_stream()
            .map_err(|err| classify_open_error(&err, device_index))?;

        Ok(Self { camera, label })
    }
}

impl FrameSource for NokhwaSource {
    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        let buffer = self
            .camera
            .poll_frame()
            .map_err(|err| CameraError::Capture(format!("poll_frame failed: {err}")))?;

        let resolution = buffer.resolution();
        Ok(RawFrame {
            pixels: buffer.buffer_bytes().to_vec(),
            width: resolution.width_x,
            height: resolution.height_y,
        })
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

impl Drop for NokhwaSource {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            log::warn!("failed to stop camera stream on release: {err}");
        }
    }
}

/// Map nokhwa failures onto the operator-facing error taxonomy. Backends
/// report permission and busy conditions as free-text open errors, so a bit
/// of message sniffing is unavoidable here.
fn classify_open_error(err: &NokhwaError, device_index: u32) -> CameraError {
    let text = err.to_string();
    let lowered = text.to_ascii_lowercase();

    if lowered.contains("permission") || lowered.contains("access denied") {
        return CameraError::PermissionDenied(text);
    }
    if lowered.contains("busy") || lowered.contains("in use") {
        return CameraError::Busy(text);
    }
    if matches!(
        err,
        NokhwaError::NotImplementedError(_) | NokhwaError::UnsupportedOperationError(_)
    ) {
        return CameraError::Unsupported(text);
    }

    CameraError::NotFound(format!("device {device_index}: {text}"))
}
