//! Headless test doubles for the capture pipeline.
//!
//! `SyntheticSource` generates deterministic RGB frames so the full session
//! flow runs without hardware, and `ScriptedAnalyzer` plays back canned
//! analyzer verdicts, delays, and failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{AnalysisOutcome, Classification, SpecAnalyzer},
    camera::{Frame, FrameSource, RawFrame},
    catalog::Spec,
    error::{AnalysisError, CameraError},
};

/// Deterministic frame generator.
pub struct SyntheticSource {
    label: String,
    width: u32,
    height: u32,
    frame_no: u64,
    warmup_frames: u64,
    vary_per_frame: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::named("synthetic-0", width, height)
    }

    pub fn named(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            frame_no: 0,
            warmup_frames: 0,
            vary_per_frame: false,
        }
    }

    /// Report `frames` zero-sized grabs before real frames start, the way a
    /// physical device behaves right after `open_stream`.
    pub fn with_warmup(mut self, frames: u64) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Change the pattern on every grab so consecutive frames hash apart.
    pub fn with_varying_scene(mut self) -> Self {
        self.vary_per_frame = true;
        self
    }
}

impl FrameSource for SyntheticSource {
    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        let frame_no = self.frame_no;
        self.frame_no += 1;

        if frame_no < self.warmup_frames {
            return Ok(RawFrame {
                pixels: Vec::new(),
                width: 0,
                height: 0,
            });
        }

        let base = if self.vary_per_frame {
            // Invert the pattern on alternating frames; a plain gradient
            // shift hashes too close to the original to count as a new scene.
            if frame_no % 2 == 0 { 0u8 } else { 255u8 }
        } else {
            0u8
        };

        let mut pixels = vec![0u8; (self.width * self.height * 3) as usize];
        for y in 0..self.height {
            for x in 0..self.width {
                let idx = ((y * self.width + x) * 3) as usize;
                pixels[idx] = base ^ ((x % 256) as u8);
                pixels[idx + 1] = base ^ ((y % 256) as u8);
                pixels[idx + 2] = base ^ (((x + y) % 256) as u8);
            }
        }

        Ok(RawFrame {
            pixels,
            width: self.width,
            height: self.height,
        })
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Source whose every grab fails, for exercising capture error paths.
pub struct BrokenSource;

impl FrameSource for BrokenSource {
    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        Err(CameraError::Capture("synthetic grab failure".into()))
    }

    fn label(&self) -> String {
        "broken".into()
    }
}

/// One scripted analyzer reply, consumed in FIFO order.
pub struct ScriptedReply {
    pub delay: Option<Duration>,
    pub response: ScriptedResponse,
}

pub enum ScriptedResponse {
    Verdict {
        classification: Classification,
        confidence: f64,
        /// For `detect`: which pending spec matched. Ignored by
        /// `analyze_spec`, which always answers about the requested spec.
        matched_spec_id: Option<String>,
    },
    /// `detect` answers "nothing here".
    NoMatch,
    Timeout,
    Service(String),
    Malformed(String),
    /// Never resolves until the caller's token cancels.
    HangUntilCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub mode: &'static str,
    pub spec_ids: Vec<String>,
}

/// `SpecAnalyzer` that plays back a fixed script.
pub struct ScriptedAnalyzer {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn verdict(classification: Classification, confidence: f64) -> ScriptedReply {
        ScriptedReply {
            delay: None,
            response: ScriptedResponse::Verdict {
                classification,
                confidence,
                matched_spec_id: None,
            },
        }
    }

    pub fn detection(spec_id: &str, classification: Classification, confidence: f64) -> ScriptedReply {
        ScriptedReply {
            delay: None,
            response: ScriptedResponse::Verdict {
                classification,
                confidence,
                matched_spec_id: Some(spec_id.to_string()),
            },
        }
    }

    pub fn no_match() -> ScriptedReply {
        ScriptedReply {
            delay: None,
            response: ScriptedResponse::NoMatch,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Highest number of concurrent analyzer calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, mode: &'static str, spec_ids: Vec<String>) {
        self.calls.lock().unwrap().push(RecordedCall { mode, spec_ids });
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted analyzer ran out of replies")
    }

    async fn run_reply(
        &self,
        reply: ScriptedReply,
        cancel: &CancellationToken,
    ) -> Result<ScriptedResponse, AnalysisError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.load(Ordering::SeqCst);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = async {
            if let Some(delay) = reply.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                }
            }

            match reply.response {
                ScriptedResponse::HangUntilCancelled => {
                    cancel.cancelled().await;
                    Err(AnalysisError::Cancelled)
                }
                ScriptedResponse::Timeout => {
                    Err(AnalysisError::TimedOut(crate::analysis::ANALYSIS_DEADLINE))
                }
                ScriptedResponse::Service(msg) => Err(AnalysisError::Service(msg)),
                ScriptedResponse::Malformed(msg) => Err(AnalysisError::MalformedResponse(msg)),
                other => Ok(other),
            }
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl SpecAnalyzer for ScriptedAnalyzer {
    async fn analyze_spec(
        &self,
        frame: &Frame,
        spec: &Spec,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.record("analyzeSpec", vec![spec.id.clone()]);
        let reply = self.next_reply();

        match self.run_reply(reply, cancel).await? {
            ScriptedResponse::Verdict {
                classification,
                confidence,
                ..
            } => Ok(AnalysisOutcome {
                spec_id: spec.id.clone(),
                classification,
                confidence,
                rationale_en: format!("scripted verdict for {}", spec.code),
                rationale_ar: Some(format!("تقييم تجريبي {}", spec.code)),
                frame: frame.clone(),
                analyzed_at: Utc::now(),
            }),
            _ => panic!("NoMatch reply is only valid for detect()"),
        }
    }

    async fn detect(
        &self,
        frame: &Frame,
        pending: &[Spec],
        cancel: &CancellationToken,
    ) -> Result<Option<AnalysisOutcome>, AnalysisError> {
        self.record(
            "detect",
            pending.iter().map(|spec| spec.id.clone()).collect(),
        );
        let reply = self.next_reply();

        match self.run_reply(reply, cancel).await? {
            ScriptedResponse::NoMatch => Ok(None),
            ScriptedResponse::Verdict {
                classification,
                confidence,
                matched_spec_id,
            } => {
                let Some(matched_id) = matched_spec_id else {
                    return Ok(None);
                };
                let Some(matched) = pending.iter().find(|spec| spec.id == matched_id) else {
                    return Ok(None);
                };

                Ok(Some(AnalysisOutcome {
                    spec_id: matched.id.clone(),
                    classification,
                    confidence,
                    rationale_en: format!("scripted detection of {}", matched.code),
                    rationale_ar: None,
                    frame: frame.clone(),
                    analyzed_at: Utc::now(),
                }))
            }
            _ => unreachable!("errors are returned by run_reply"),
        }
    }
}
