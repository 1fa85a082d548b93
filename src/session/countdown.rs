use std::time::Duration;

use log::debug;
use tauri::Runtime;
use tokio_util::sync::CancellationToken;

use super::controller::SessionController;

/// Detections at or above this confidence are trusted enough to commit
/// without the operator pressing Done.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Grace window between a high-confidence detection and the auto-commit.
pub const AUTO_COMMIT_DELAY: Duration = Duration::from_secs(3);

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

pub fn passes_gate(confidence: f64) -> bool {
    confidence >= HIGH_CONFIDENCE_THRESHOLD
}

/// Counts down toward an auto-commit, emitting one tick per second so the
/// UI can render the cancel affordance. Any cancellation stops the task
/// before the commit fires; the commit itself re-validates the session
/// generation and phase.
pub(crate) async fn run_countdown<R: Runtime>(
    controller: SessionController<R>,
    generation: u64,
    spec_id: String,
    cancel: CancellationToken,
) {
    let mut remaining = AUTO_COMMIT_DELAY;
    while !remaining.is_zero() {
        controller.emit_countdown_tick(&spec_id, remaining.as_millis() as u64);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("auto-commit countdown cancelled for spec {spec_id}");
                return;
            }
            _ = tokio::time::sleep(COUNTDOWN_TICK) => {
                remaining = remaining.saturating_sub(COUNTDOWN_TICK);
            }
        }
    }
    controller.emit_countdown_tick(&spec_id, 0);
    controller.auto_commit(generation).await;
}
