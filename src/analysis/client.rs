use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use tokio_util::sync::CancellationToken;

use super::schema::{
    normalize, Language, NormalizedResponse, SpecDescriptor, WireRequest, WireResponse,
    MODE_MULTI_SPEC, MODE_SINGLE_SPEC,
};
use super::{AnalysisOutcome, SpecAnalyzer};
use crate::{camera::Frame, catalog::Spec, error::AnalysisError, settings::SettingsStore};

/// Hard per-request deadline, enforced with or without an external cancel.
pub const ANALYSIS_DEADLINE: Duration = Duration::from_secs(25);

/// HTTP client for the vision analysis service.
///
/// Reads the base URL and API key from settings on every call, so pointing
/// the app at a different analyzer takes effect without a restart.
pub struct AnalysisClient {
    http: reqwest::Client,
    settings: Arc<SettingsStore>,
}

impl AnalysisClient {
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ANALYSIS_DEADLINE)
            .build()
            .context("failed to build analysis HTTP client")?;

        Ok(Self { http, settings })
    }

    async fn request(
        &self,
        frame_b64: &str,
        mode: &'static str,
        specs: &[SpecDescriptor],
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, AnalysisError> {
        let analyzer = self.settings.analyzer();
        let url = format!("{}/v1/analyze", analyzer.base_url.trim_end_matches('/'));

        let body = WireRequest {
            frame: frame_b64,
            mode,
            specs,
            language: language.as_str(),
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = analyzer.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let send = async {
            let response = request.send().await.map_err(map_transport_error)?;

            if !response.status().is_success() {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                return Err(AnalysisError::Service(format!("{status}: {detail}")));
            }

            let raw: WireResponse = response
                .json()
                .await
                .map_err(|err| AnalysisError::MalformedResponse(err.to_string()))?;

            Ok(normalize(raw))
        };

        // Whichever fires first wins; the losing branch is dropped, which
        // also aborts the in-flight HTTP request.
        tokio::select! {
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            result = tokio::time::timeout(ANALYSIS_DEADLINE, send) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AnalysisError::TimedOut(ANALYSIS_DEADLINE)),
            },
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::TimedOut(ANALYSIS_DEADLINE)
    } else {
        AnalysisError::Service(err.to_string())
    }
}

#[async_trait]
impl SpecAnalyzer for AnalysisClient {
    async fn analyze_spec(
        &self,
        frame: &Frame,
        spec: &Spec,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let frame_b64 = frame.to_base64();

        let descriptor_en = [SpecDescriptor::from_spec(spec, Language::En)];
        let primary = self
            .request(&frame_b64, MODE_SINGLE_SPEC, &descriptor_en, Language::En, cancel)
            .await?;

        // Second leg shares the cancel scope. A service hiccup here degrades
        // to an English-only rationale instead of failing the capture.
        let descriptor_ar = [SpecDescriptor::from_spec(spec, Language::Ar)];
        let rationale_ar = match self
            .request(&frame_b64, MODE_SINGLE_SPEC, &descriptor_ar, Language::Ar, cancel)
            .await
        {
            Ok(response) => Some(response.rationale),
            Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(err) => {
                warn!("arabic rationale request failed for spec {}: {err}", spec.id);
                None
            }
        };

        Ok(AnalysisOutcome {
            spec_id: spec.id.clone(),
            classification: primary.classification,
            confidence: primary.confidence,
            rationale_en: primary.rationale,
            rationale_ar,
            frame: frame.clone(),
            analyzed_at: Utc::now(),
        })
    }

    async fn detect(
        &self,
        frame: &Frame,
        pending: &[Spec],
        cancel: &CancellationToken,
    ) -> Result<Option<AnalysisOutcome>, AnalysisError> {
        if pending.is_empty() {
            return Ok(None);
        }

        let descriptors: Vec<SpecDescriptor> = pending
            .iter()
            .map(|spec| SpecDescriptor::from_spec(spec, Language::En))
            .collect();

        let frame_b64 = frame.to_base64();
        let response = self
            .request(&frame_b64, MODE_MULTI_SPEC, &descriptors, Language::En, cancel)
            .await?;

        let Some(matched_id) = response.matched_spec_id else {
            return Ok(None);
        };

        // The analyzer must point at one of the specs it was offered.
        let Some(matched) = pending.iter().find(|spec| spec.id == matched_id) else {
            warn!("analyzer matched unknown spec id '{matched_id}'; treating as no match");
            return Ok(None);
        };

        Ok(Some(AnalysisOutcome {
            spec_id: matched.id.clone(),
            classification: response.classification,
            confidence: response.confidence,
            rationale_en: response.rationale,
            rationale_ar: None,
            frame: frame.clone(),
            analyzed_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::analysis::Classification;
    use crate::camera::{encode_frame, FrameQuality, RawFrame};
    use crate::catalog::EvidenceKind;
    use crate::settings::AnalyzerSettings;

    fn spec_fixture() -> Spec {
        Spec {
            id: "fs-01".into(),
            code: "FS-01".into(),
            text_en: "Extinguisher mounted".into(),
            text_ar: "طفاية مثبتة".into(),
            evidence: EvidenceKind::Photo,
            category: "fireSafety".into(),
            active: true,
            order_index: 1,
        }
    }

    fn frame_fixture() -> Frame {
        let raw = RawFrame {
            pixels: vec![90u8; 32 * 24 * 3],
            width: 32,
            height: 24,
        };
        encode_frame(raw, FrameQuality::Evidence).unwrap().unwrap()
    }

    fn client_against(dir: &tempfile::TempDir, addr: SocketAddr) -> AnalysisClient {
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        settings
            .update_analyzer(AnalyzerSettings {
                base_url: format!("http://{addr}"),
                api_key: Some("test-key".into()),
            })
            .unwrap();
        AnalysisClient::new(settings).unwrap()
    }

    /// Read one HTTP request off the socket: headers plus however much body
    /// the content-length header promises.
    async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return buf,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            if request_complete(&buf) {
                return buf;
            }
        }
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let body_len = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= header_end + 4 + body_len
    }

    fn json_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Answer one connection per scripted response, then stop listening.
    async fn serve_script(listener: TcpListener, responses: Vec<String>) {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut socket).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    }

    /// Accept one connection, swallow the request, and never answer.
    async fn serve_stall(listener: TcpListener) {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut socket).await;
        std::future::pending::<()>().await;
    }

    #[tokio::test]
    async fn analyze_runs_an_english_and_an_arabic_leg() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        tokio::spawn(async move {
            let responses = [
                json_response(
                    r#"{"classification": "fail", "confidence": 0.72, "rationaleText": "no extinguisher in view"}"#,
                ),
                json_response(
                    r#"{"classification": "fail", "confidence": 0.7, "rationaleText": "scripted arabic rationale"}"#,
                ),
            ];
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                record
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&request).into_owned());
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let client = client_against(&dir, addr);
        let outcome = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.classification, Classification::Fail);
        assert_eq!(outcome.confidence, 0.72);
        assert_eq!(outcome.rationale_en, "no extinguisher in view");
        assert_eq!(outcome.rationale_ar.as_deref(), Some("scripted arabic rationale"));

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /v1/analyze "));
        assert!(requests[0].contains(r#""language":"en""#));
        assert!(requests[1].contains(r#""language":"ar""#));
        for request in &requests {
            assert!(request.contains(r#""mode":"single-spec""#));
            assert!(request
                .to_ascii_lowercase()
                .contains("authorization: bearer test-key"));
        }
    }

    #[tokio::test]
    async fn arabic_leg_failure_degrades_to_english_only() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_script(
            listener,
            vec![
                json_response(
                    r#"{"classification": "pass", "confidence": 0.91, "rationaleText": "extinguisher visible"}"#,
                ),
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    .into(),
            ],
        ));

        let client = client_against(&dir, addr);
        let outcome = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.classification, Classification::Pass);
        assert_eq!(outcome.confidence, 0.91);
        assert_eq!(outcome.rationale_en, "extinguisher visible");
        assert!(outcome.rationale_ar.is_none());
    }

    #[tokio::test]
    async fn http_failure_maps_to_a_service_error() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_script(
            listener,
            vec![
                "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    .into(),
            ],
        ));

        let client = client_against(&dir, addr);
        let err = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Service(_)));
        assert_eq!(err.kind(), "analysisServiceError");
    }

    #[tokio::test]
    async fn unparseable_body_is_a_malformed_response() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_script(
            listener,
            vec![json_response("plain text, not a verdict")],
        ));

        let client = client_against(&dir, addr);
        let err = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::MalformedResponse(_)));
        assert_eq!(err.kind(), "analysisMalformedResponse");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_without_an_external_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_stall(listener));

        let client = client_against(&dir, addr);
        let cancel = CancellationToken::new();
        let err = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::TimedOut(_)));
        assert_eq!(err.kind(), "analysisTimedOut");
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_request() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_stall(listener));

        let client = client_against(&dir, addr);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let err = client
            .analyze_spec(&frame_fixture(), &spec_fixture(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }

    #[tokio::test]
    async fn detect_drops_a_match_outside_the_offered_specs() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_script(
            listener,
            vec![json_response(
                r#"{"classification": "pass", "confidence": 0.9, "matchedSpecId": "fs-99"}"#,
            )],
        ));

        let client = client_against(&dir, addr);

        // An empty pending set answers locally, without a request.
        let none = client
            .detect(&frame_fixture(), &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(none.is_none());

        let outcome = client
            .detect(&frame_fixture(), &[spec_fixture()], &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
