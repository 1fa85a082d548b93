//! Wire types for the vision analysis service.
//!
//! Inbound parsing is deliberately forgiving: models drift, and a response
//! with a missing or unrecognized field must degrade to "uncertain, needs a
//! human" instead of failing the capture flow.

use serde::{Deserialize, Serialize};

use crate::catalog::{EvidenceKind, Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Language {
    En,
    Ar,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    Pass,
    Fail,
    Uncertain,
}

/// Spec as presented to the analyzer: id for match correlation, code, the
/// requirement text in the requested language, and the evidence category.
/// The analyzer never sees catalog internals beyond these.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecDescriptor {
    pub id: String,
    pub code: String,
    pub description_text: String,
    pub evidence_category: EvidenceKind,
}

impl SpecDescriptor {
    pub fn from_spec(spec: &Spec, language: Language) -> Self {
        let description_text = match language {
            Language::En => spec.text_en.clone(),
            Language::Ar => spec.text_ar.clone(),
        };
        Self {
            id: spec.id.clone(),
            code: spec.code.clone(),
            description_text,
            evidence_category: spec.evidence,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest<'a> {
    /// Base64-encoded JPEG.
    pub frame: &'a str,
    /// "single-spec" for targeted verification, "multi-spec" for detection.
    pub mode: &'static str,
    pub specs: &'a [SpecDescriptor],
    pub language: &'static str,
}

pub const MODE_SINGLE_SPEC: &str = "single-spec";
pub const MODE_MULTI_SPEC: &str = "multi-spec";

/// Raw response body. Every field is optional so a sparse or drifted payload
/// still deserializes; [`normalize`] fills the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale_text: Option<String>,
    #[serde(default)]
    pub matched_spec_id: Option<String>,
}

/// Response after boundary normalization. Everything downstream of this type
/// can rely on a valid classification and a confidence in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub classification: Classification,
    pub confidence: f64,
    pub rationale: String,
    pub matched_spec_id: Option<String>,
}

pub fn normalize(raw: WireResponse) -> NormalizedResponse {
    let classification = match raw
        .classification
        .as_deref()
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pass") => Classification::Pass,
        Some("fail") => Classification::Fail,
        _ => Classification::Uncertain,
    };

    let confidence = match raw.confidence {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => 0.0,
    };

    NormalizedResponse {
        classification,
        confidence,
        rationale: raw.rationale_text.unwrap_or_default(),
        matched_spec_id: raw
            .matched_spec_id
            .filter(|id| !id.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> NormalizedResponse {
        normalize(serde_json::from_str::<WireResponse>(json).unwrap())
    }

    #[test]
    fn well_formed_response_passes_through() {
        let normalized = parse(
            r#"{"classification": "pass", "confidence": 0.92, "rationaleText": "extinguisher visible", "matchedSpecId": "fs-01"}"#,
        );
        assert_eq!(normalized.classification, Classification::Pass);
        assert_eq!(normalized.confidence, 0.92);
        assert_eq!(normalized.rationale, "extinguisher visible");
        assert_eq!(normalized.matched_spec_id.as_deref(), Some("fs-01"));
    }

    #[test]
    fn missing_classification_defaults_to_uncertain() {
        let normalized = parse(r#"{"confidence": 0.7}"#);
        assert_eq!(normalized.classification, Classification::Uncertain);
    }

    #[test]
    fn unknown_classification_defaults_to_uncertain() {
        let normalized = parse(r#"{"classification": "banana", "confidence": 0.7}"#);
        assert_eq!(normalized.classification, Classification::Uncertain);
    }

    #[test]
    fn classification_is_case_insensitive() {
        let normalized = parse(r#"{"classification": " PASS ", "confidence": 0.7}"#);
        assert_eq!(normalized.classification, Classification::Pass);
    }

    #[test]
    fn missing_confidence_defaults_to_zero() {
        let normalized = parse(r#"{"classification": "pass"}"#);
        assert_eq!(normalized.confidence, 0.0);
    }

    #[test]
    fn confidence_is_clamped_into_unit_range() {
        assert_eq!(parse(r#"{"confidence": 3.5}"#).confidence, 1.0);
        assert_eq!(parse(r#"{"confidence": -1.0}"#).confidence, 0.0);
    }

    #[test]
    fn empty_matched_spec_id_is_dropped() {
        let normalized = parse(r#"{"matchedSpecId": "  "}"#);
        assert!(normalized.matched_spec_id.is_none());
    }

    #[test]
    fn descriptor_carries_the_requested_language() {
        let spec = Spec {
            id: "fs-01".into(),
            code: "FS-01".into(),
            text_en: "Extinguisher mounted".into(),
            text_ar: "طفاية مثبتة".into(),
            evidence: EvidenceKind::Photo,
            category: "fireSafety".into(),
            active: true,
            order_index: 1,
        };

        let en = serde_json::to_value(SpecDescriptor::from_spec(&spec, Language::En)).unwrap();
        assert_eq!(en["descriptionText"], "Extinguisher mounted");
        assert_eq!(en["evidenceCategory"], "photo");

        let ar = serde_json::to_value(SpecDescriptor::from_spec(&spec, Language::Ar)).unwrap();
        assert_eq!(ar["descriptionText"], "طفاية مثبتة");
    }

    #[test]
    fn empty_object_is_fully_defaulted() {
        let normalized = parse("{}");
        assert_eq!(normalized.classification, Classification::Uncertain);
        assert_eq!(normalized.confidence, 0.0);
        assert!(normalized.rationale.is_empty());
        assert!(normalized.matched_spec_id.is_none());
    }
}
