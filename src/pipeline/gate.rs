//! Quality gates: per-page threshold checks with relax-only overrides.
//!
//! ## Threshold resolution
//!
//! ```text
//! target profile ──▶ layout override ──▶ diagram-heavy escape ──▶ effective
//!  (base set)         (relax only)        (relax only, per page)
//! ```
//!
//! Every step after the base can only loosen the bar: floors merge with
//! `min()`, the low-confidence ceiling merges with `max()`. A layout override
//! that tries to tighten a threshold is silently ignored by the merge.
//!
//! All tables live in [`GateConfig`], which is plain data. Tests and callers
//! inject whatever thresholds they want; nothing here reads global state.

use crate::error::ExtractError;
use crate::output::{PageSource, PageStatus, QualityMetrics};
use crate::pipeline::layout::LayoutClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// The four thresholds a page is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_avg_confidence: f64,
    pub max_low_confidence_ratio: f64,
    pub min_dual_pass_similarity: f64,
    pub min_native_similarity: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_avg_confidence: 93.0,
            max_low_confidence_ratio: 0.5,
            min_dual_pass_similarity: 0.85,
            min_native_similarity: 0.85,
        }
    }
}

impl QualityThresholds {
    /// Merge an override, keeping whichever side is more lenient per key.
    pub fn relax(&self, with: &ThresholdOverride) -> Self {
        let floor = |base: f64, o: Option<f64>| o.map_or(base, |v| base.min(v));
        Self {
            min_avg_confidence: floor(self.min_avg_confidence, with.min_avg_confidence),
            max_low_confidence_ratio: with
                .max_low_confidence_ratio
                .map_or(self.max_low_confidence_ratio, |v| {
                    self.max_low_confidence_ratio.max(v)
                }),
            min_dual_pass_similarity: floor(
                self.min_dual_pass_similarity,
                with.min_dual_pass_similarity,
            ),
            min_native_similarity: floor(self.min_native_similarity, with.min_native_similarity),
        }
    }

    /// `true` if `self` is at most as strict as `base` on every key.
    pub fn no_stricter_than(&self, base: &QualityThresholds) -> bool {
        self.min_avg_confidence <= base.min_avg_confidence
            && self.max_low_confidence_ratio >= base.max_low_confidence_ratio
            && self.min_dual_pass_similarity <= base.min_dual_pass_similarity
            && self.min_native_similarity <= base.min_native_similarity
    }
}

/// Sparse set of threshold overrides. Unset keys leave the base untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_avg_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_low_confidence_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_dual_pass_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_native_similarity: Option<f64>,
}

/// Base thresholds and source-decision settings for one quality target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub thresholds: QualityThresholds,
    /// Accuracy score at or above which OCR text is preferred over native.
    pub decision_threshold: f64,
    /// Skip the native-similarity gate when native text was selected.
    #[serde(default)]
    pub skip_native_similarity_when_native: bool,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            decision_threshold: 0.8,
            skip_native_similarity_when_native: false,
        }
    }
}

impl TargetProfile {
    /// The stricter-agreement, looser-confidence profile used for target 90.
    pub fn target_90() -> Self {
        Self {
            thresholds: QualityThresholds {
                min_avg_confidence: 90.0,
                max_low_confidence_ratio: 0.6,
                min_dual_pass_similarity: 0.90,
                min_native_similarity: 0.90,
            },
            decision_threshold: 0.9,
            skip_native_similarity_when_native: true,
        }
    }
}

/// Per-layout relaxations. One field per [`LayoutClass`] variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOverrides {
    pub table: ThresholdOverride,
    pub text: ThresholdOverride,
    pub noisy: ThresholdOverride,
}

impl Default for LayoutOverrides {
    fn default() -> Self {
        Self {
            table: ThresholdOverride {
                min_avg_confidence: Some(90.0),
                max_low_confidence_ratio: Some(0.8),
                min_dual_pass_similarity: Some(0.36),
                min_native_similarity: Some(0.0),
            },
            text: ThresholdOverride {
                min_dual_pass_similarity: Some(0.88),
                ..ThresholdOverride::default()
            },
            noisy: ThresholdOverride {
                min_avg_confidence: Some(90.0),
                max_low_confidence_ratio: Some(0.85),
                min_dual_pass_similarity: Some(0.35),
                min_native_similarity: Some(0.0),
            },
        }
    }
}

impl LayoutOverrides {
    pub fn for_layout(&self, layout: LayoutClass) -> &ThresholdOverride {
        match layout {
            LayoutClass::Table => &self.table,
            LayoutClass::Text => &self.text,
            LayoutClass::Noisy => &self.noisy,
        }
    }
}

/// Extra page-scoped relaxation for pages dominated by figures.
///
/// Triggers when the low-confidence ratio is above `low_confidence_above`
/// AND dual-pass similarity is below `dual_pass_below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramEscape {
    pub layouts: Vec<LayoutClass>,
    pub low_confidence_above: f64,
    pub dual_pass_below: f64,
    pub relax: ThresholdOverride,
}

impl Default for DiagramEscape {
    fn default() -> Self {
        Self {
            layouts: vec![LayoutClass::Table, LayoutClass::Noisy],
            low_confidence_above: 0.85,
            dual_pass_below: 0.25,
            relax: ThresholdOverride {
                max_low_confidence_ratio: Some(0.95),
                min_dual_pass_similarity: Some(0.15),
                ..ThresholdOverride::default()
            },
        }
    }
}

impl DiagramEscape {
    fn applies(&self, layout: LayoutClass, metrics: &QualityMetrics) -> bool {
        self.layouts.contains(&layout)
            && matches!(metrics.low_confidence_ratio, Some(r) if r > self.low_confidence_above)
            && matches!(metrics.dual_pass_similarity, Some(s) if s < self.dual_pass_below)
    }
}

/// Every table the gate engine uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Profile used when no target is requested or the target is unknown.
    pub base: TargetProfile,
    /// Named quality targets (e.g. `90`).
    pub targets: BTreeMap<u8, TargetProfile>,
    pub layouts: LayoutOverrides,
    pub diagram_escape: Option<DiagramEscape>,
}

impl Default for GateConfig {
    fn default() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(90, TargetProfile::target_90());
        Self {
            base: TargetProfile::default(),
            targets,
            layouts: LayoutOverrides::default(),
            diagram_escape: Some(DiagramEscape::default()),
        }
    }
}

impl GateConfig {
    pub fn profile(&self, target: Option<u8>) -> &TargetProfile {
        target
            .and_then(|t| self.targets.get(&t))
            .unwrap_or(&self.base)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(json)
            .map_err(|e| ExtractError::InvalidConfig(format!("gate config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

/// Named quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    AvgConfidence,
    LowConfidenceRatio,
    DualPassSimilarity,
    NativeSimilarity,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::AvgConfidence => "avg_confidence",
            Gate::LowConfidenceRatio => "low_confidence_ratio",
            Gate::DualPassSimilarity => "dual_pass_similarity",
            Gate::NativeSimilarity => "native_similarity",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub status: PageStatus,
    /// In evaluation order; never contains duplicates.
    pub failed_gates: Vec<Gate>,
    /// Effective thresholds after every relaxation.
    pub thresholds: QualityThresholds,
    pub diagram_escape: bool,
}

/// Evaluates page metrics against a [`GateConfig`].
#[derive(Debug, Clone, Default)]
pub struct QualityGateEngine {
    config: GateConfig,
}

impl QualityGateEngine {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn base_thresholds(&self, target: Option<u8>) -> QualityThresholds {
        self.config.profile(target).thresholds
    }

    pub fn decision_threshold(&self, target: Option<u8>) -> f64 {
        self.config.profile(target).decision_threshold
    }

    /// Thresholds for a page, and whether the diagram escape fired.
    pub fn effective_thresholds(
        &self,
        metrics: &QualityMetrics,
        layout: Option<LayoutClass>,
        target: Option<u8>,
    ) -> (QualityThresholds, bool) {
        let layout = layout.unwrap_or_default();
        let mut thresholds = self
            .base_thresholds(target)
            .relax(self.config.layouts.for_layout(layout));

        let escaped = match &self.config.diagram_escape {
            Some(escape) if escape.applies(layout, metrics) => {
                thresholds = thresholds.relax(&escape.relax);
                true
            }
            _ => false,
        };
        (thresholds, escaped)
    }

    pub fn evaluate(
        &self,
        metrics: &QualityMetrics,
        layout: Option<LayoutClass>,
        source: PageSource,
        target: Option<u8>,
    ) -> GateOutcome {
        let (t, diagram_escape) = self.effective_thresholds(metrics, layout, target);
        let profile = self.config.profile(target);
        let mut failed = Vec::new();

        if metrics.ocr_attempted {
            if !matches!(metrics.avg_confidence, Some(v) if v >= t.min_avg_confidence) {
                failed.push(Gate::AvgConfidence);
            }
            if !matches!(metrics.low_confidence_ratio, Some(v) if v <= t.max_low_confidence_ratio)
            {
                failed.push(Gate::LowConfidenceRatio);
            }
            if source != PageSource::Native
                && !matches!(metrics.dual_pass_similarity, Some(v) if v >= t.min_dual_pass_similarity)
            {
                failed.push(Gate::DualPassSimilarity);
            }
        }

        let skip_native = profile.skip_native_similarity_when_native && source == PageSource::Native;
        if !skip_native {
            if let Some(sim) = metrics.native_similarity {
                if t.min_native_similarity > 0.0 && sim < t.min_native_similarity {
                    failed.push(Gate::NativeSimilarity);
                }
            }
        }

        if diagram_escape {
            debug!("Diagram-heavy escape applied");
        }

        GateOutcome {
            status: if failed.is_empty() {
                PageStatus::Approved
            } else {
                PageStatus::NeedsReview
            },
            failed_gates: failed,
            thresholds: t,
            diagram_escape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr_metrics(avg: f64, low: f64, dual: f64) -> QualityMetrics {
        QualityMetrics {
            avg_confidence: Some(avg),
            low_confidence_ratio: Some(low),
            dual_pass_similarity: Some(dual),
            ocr_attempted: true,
            ..QualityMetrics::default()
        }
    }

    #[test]
    fn relax_only_loosens() {
        let base = QualityThresholds::default();
        let tighter = ThresholdOverride {
            min_avg_confidence: Some(99.0),
            max_low_confidence_ratio: Some(0.1),
            min_dual_pass_similarity: Some(0.99),
            min_native_similarity: Some(0.99),
        };
        assert_eq!(base.relax(&tighter), base);

        let looser = ThresholdOverride {
            min_avg_confidence: Some(80.0),
            max_low_confidence_ratio: Some(0.7),
            ..ThresholdOverride::default()
        };
        let merged = base.relax(&looser);
        assert_eq!(merged.min_avg_confidence, 80.0);
        assert_eq!(merged.max_low_confidence_ratio, 0.7);
        assert_eq!(merged.min_dual_pass_similarity, base.min_dual_pass_similarity);
    }

    #[test]
    fn merged_thresholds_never_exceed_target_strictness() {
        let engine = QualityGateEngine::default();
        let extremes = [
            QualityMetrics::default(),
            ocr_metrics(50.0, 0.99, 0.01),
            ocr_metrics(99.0, 0.0, 1.0),
        ];
        for target in [None, Some(80), Some(90)] {
            let base = engine.base_thresholds(target);
            for layout in LayoutClass::ALL {
                for metrics in &extremes {
                    let (t, _) = engine.effective_thresholds(metrics, Some(layout), target);
                    assert!(t.no_stricter_than(&base), "{target:?} {layout}: {t:?} vs {base:?}");
                }
            }
        }
    }

    #[test]
    fn native_source_skips_dual_pass_for_every_layout() {
        let engine = QualityGateEngine::default();
        let metrics = QualityMetrics {
            dual_pass_similarity: None,
            ..ocr_metrics(96.0, 0.1, 0.0)
        };
        for layout in LayoutClass::ALL {
            let out = engine.evaluate(&metrics, Some(layout), PageSource::Native, None);
            assert!(!out.failed_gates.contains(&Gate::DualPassSimilarity), "{layout}");
        }
        let out = engine.evaluate(&metrics, Some(LayoutClass::Text), PageSource::Ocr, None);
        assert!(out.failed_gates.contains(&Gate::DualPassSimilarity));
    }

    #[test]
    fn good_page_approves_at_target_90() {
        let engine = QualityGateEngine::default();
        let out = engine.evaluate(
            &ocr_metrics(95.0, 0.1, 0.95),
            Some(LayoutClass::Text),
            PageSource::Ocr,
            Some(90),
        );
        assert_eq!(out.status, PageStatus::Approved);
        assert!(out.failed_gates.is_empty());
    }

    #[test]
    fn low_confidence_noisy_page_needs_review() {
        let engine = QualityGateEngine::default();
        let out = engine.evaluate(
            &ocr_metrics(70.0, 0.9, 0.1),
            Some(LayoutClass::Noisy),
            PageSource::Ocr,
            Some(90),
        );
        assert_eq!(out.status, PageStatus::NeedsReview);
        assert!(out.failed_gates.contains(&Gate::AvgConfidence));
        // the escape fired, so the low-confidence ceiling moved to 0.95
        assert!(out.diagram_escape);
        assert!(!out.failed_gates.contains(&Gate::LowConfidenceRatio));
    }

    #[test]
    fn diagram_escape_approves_table_page() {
        let engine = QualityGateEngine::default();
        let metrics = ocr_metrics(94.0, 0.93, 0.16);
        let out = engine.evaluate(&metrics, Some(LayoutClass::Table), PageSource::Ocr, None);
        assert!(out.diagram_escape);
        assert_eq!(out.status, PageStatus::Approved, "{:?}", out.failed_gates);

        let no_escape = QualityGateEngine::new(GateConfig {
            diagram_escape: None,
            ..GateConfig::default()
        });
        let out = no_escape.evaluate(&metrics, Some(LayoutClass::Table), PageSource::Ocr, None);
        assert_eq!(
            out.failed_gates,
            vec![Gate::LowConfidenceRatio, Gate::DualPassSimilarity]
        );
    }

    #[test]
    fn diagram_escape_does_not_apply_to_text_layout() {
        let engine = QualityGateEngine::default();
        let out = engine.evaluate(
            &ocr_metrics(94.0, 0.93, 0.16),
            Some(LayoutClass::Text),
            PageSource::Ocr,
            None,
        );
        assert!(!out.diagram_escape);
        assert_eq!(out.status, PageStatus::NeedsReview);
    }

    #[test]
    fn missing_layout_gates_as_text() {
        let engine = QualityGateEngine::default();
        let m = ocr_metrics(94.0, 0.1, 0.87);
        let none = engine.evaluate(&m, None, PageSource::Ocr, None);
        let text = engine.evaluate(&m, Some(LayoutClass::Text), PageSource::Ocr, None);
        assert_eq!(none, text);
        assert_eq!(none.thresholds.min_dual_pass_similarity, 0.85);
    }

    #[test]
    fn unmeasurable_metrics_fail_every_ocr_gate() {
        let engine = QualityGateEngine::default();
        let m = QualityMetrics {
            ocr_attempted: true,
            ..QualityMetrics::default()
        };
        let out = engine.evaluate(&m, Some(LayoutClass::Text), PageSource::Ocr, None);
        assert_eq!(
            out.failed_gates,
            vec![Gate::AvgConfidence, Gate::LowConfidenceRatio, Gate::DualPassSimilarity]
        );
    }

    #[test]
    fn native_only_page_skips_ocr_gates() {
        let engine = QualityGateEngine::default();
        let out = engine.evaluate(&QualityMetrics::default(), None, PageSource::Native, None);
        assert_eq!(out.status, PageStatus::Approved);
    }

    #[test]
    fn native_similarity_gate_respects_target_skip() {
        let engine = QualityGateEngine::default();
        let m = QualityMetrics {
            native_similarity: Some(0.5),
            ..ocr_metrics(96.0, 0.1, 0.95)
        };
        let base = engine.evaluate(&m, Some(LayoutClass::Text), PageSource::Native, None);
        assert_eq!(base.failed_gates, vec![Gate::NativeSimilarity]);
        let t90 = engine.evaluate(&m, Some(LayoutClass::Text), PageSource::Native, Some(90));
        assert!(t90.failed_gates.is_empty());
        // table layout drops the floor to zero
        let table = engine.evaluate(&m, Some(LayoutClass::Table), PageSource::Ocr, None);
        assert!(!table.failed_gates.contains(&Gate::NativeSimilarity));
    }

    #[test]
    fn injected_config_changes_outcome() {
        let mut config = GateConfig::default();
        config.base.thresholds.min_avg_confidence = 50.0;
        config.layouts.text = ThresholdOverride::default();
        config.base.thresholds.min_dual_pass_similarity = 0.1;
        let engine = QualityGateEngine::new(config);
        let out = engine.evaluate(
            &ocr_metrics(60.0, 0.2, 0.2),
            Some(LayoutClass::Text),
            PageSource::Ocr,
            None,
        );
        assert_eq!(out.status, PageStatus::Approved);
    }

    #[test]
    fn gate_config_loads_from_json() {
        let json = r#"{
            "base": {"thresholds": {"min_avg_confidence": 85.0, "max_low_confidence_ratio": 0.4,
                     "min_dual_pass_similarity": 0.8, "min_native_similarity": 0.8},
                     "decision_threshold": 0.75},
            "targets": {"95": {"thresholds": {"min_avg_confidence": 95.0, "max_low_confidence_ratio": 0.2,
                     "min_dual_pass_similarity": 0.95, "min_native_similarity": 0.95},
                     "decision_threshold": 0.95}},
            "layouts": {"noisy": {"max_low_confidence_ratio": 0.9}}
        }"#;
        let config = GateConfig::from_json_str(json).unwrap();
        assert_eq!(config.base.decision_threshold, 0.75);
        assert_eq!(config.profile(Some(95)).thresholds.min_avg_confidence, 95.0);
        assert_eq!(config.profile(Some(90)), &config.base);
        assert_eq!(config.layouts.noisy.max_low_confidence_ratio, Some(0.9));
        assert_eq!(config.layouts.table, LayoutOverrides::default().table);
        assert!(config.diagram_escape.is_some());
    }

    #[test]
    fn bad_gate_json_is_config_error() {
        let err = GateConfig::from_json_str("{\"base\": 3}").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn gate_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&Gate::LowConfidenceRatio).unwrap(),
            "\"low_confidence_ratio\""
        );
        assert_eq!(Gate::NativeSimilarity.to_string(), "native_similarity");
    }
}
