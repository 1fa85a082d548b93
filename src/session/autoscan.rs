use log::{debug, warn};
use tauri::Runtime;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::sampler::compute_hamming_distance;

use super::controller::SessionController;

pub const SCAN_INTERVAL_SECS: u64 = 4;
const SCAN_TICK_TIMEOUT_SECS: u64 = 30;

/// Frames whose perceptual hash is closer than this to the last no-match
/// frame are treated as the same scene and skipped.
pub const PHASH_SKIP_THRESHOLD: u32 = 8;

/// Periodic detection loop for one session generation. Each tick samples a
/// preview frame and asks the analyzer which pending spec it satisfies, if
/// any. The loop outlives individual ticks; a tick that loses the phase or
/// generation race simply drops its work.
pub(crate) async fn scan_loop<R: Runtime>(
    controller: SessionController<R>,
    generation: u64,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fut = controller.run_scan_tick(generation, &cancel_token);
                match tokio::time::timeout(Duration::from_secs(SCAN_TICK_TIMEOUT_SECS), fut).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("scan tick failed: {err:?}"),
                    Err(_) => {
                        warn!("scan tick timeout (> {SCAN_TICK_TIMEOUT_SECS}s)");
                        controller.recover_stuck_scan(generation).await;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                debug!("auto-scan loop shutting down");
                break;
            }
        }
    }
}

/// A scene that already produced a no-match stays a no-match until it
/// actually changes; skip the analyzer call for it. Unparseable hashes
/// count as changed so a bad hash never wedges the scan.
pub(crate) fn scene_unchanged(current_phash: &str, last_no_match: Option<&str>) -> bool {
    let Some(prev) = last_no_match else {
        return false;
    };
    compute_hamming_distance(current_phash, prev) < PHASH_SKIP_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::sampler::compute_phash;
    use image::{DynamicImage, Rgb, RgbImage};

    #[test]
    fn identical_scene_is_skipped() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, 128])
        }));
        let hash = compute_phash(&image);
        assert!(scene_unchanged(&hash, Some(&hash)));
    }

    #[test]
    fn first_frame_is_always_analyzed() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, _| {
            Rgb([(x * 4) as u8, 0, 0])
        }));
        let hash = compute_phash(&image);
        assert!(!scene_unchanged(&hash, None));
    }

    #[test]
    fn unparseable_hash_forces_a_rescan() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |_, y| {
            Rgb([0, (y * 4) as u8, 0])
        }));
        let hash = compute_phash(&image);
        assert!(!scene_unchanged(&hash, Some("not base64!!")));
    }
}
