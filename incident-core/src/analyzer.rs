//! Evidence analysis and the concurrent per-item fan-out.

use crate::error::{AnalysisError, StageError};
use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use incident_schema::{EvidenceItem, IncidentReport};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ANALYSIS_FAILED: &str = "Analysis failed.";
pub const EVIDENCE_MISSING: &str = "Evidence file missing.";
pub const UNSUPPORTED_EVIDENCE: &str = "Unsupported evidence type (non-image).";
pub const EVIDENCE_ERROR: &str = "Error processing evidence.";
pub const VISION_UNAVAILABLE: &str = "Unable to complete AI analysis.";
pub const VISION_EMPTY: &str = "Vision model returned no commentary.";
pub const EVIDENCE_INSIGHTS_HEADING: &str = "Evidence Insights:";

/// Produces analysis text for one stored file. Never fails: every failure
/// path resolves to a descriptive fallback string.
#[async_trait]
pub trait EvidenceAnalyzer: Send + Sync {
    async fn analyse(&self, path: &Path) -> String;
}

/// Image ready to hand to a vision-capable model.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub media_type: &'static str,
    pub base64: String,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_image(&self, image: &EncodedImage) -> Result<String, StageError>;
}

pub struct VisionEvidenceAnalyzer {
    vision: Arc<dyn VisionModel>,
}

impl VisionEvidenceAnalyzer {
    pub fn new(vision: Arc<dyn VisionModel>) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl EvidenceAnalyzer for VisionEvidenceAnalyzer {
    async fn analyse(&self, path: &Path) -> String {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::warn!(path = %path.display(), "evidence path does not exist");
            return EVIDENCE_MISSING.to_string();
        }

        let owned = path.to_path_buf();
        let probed = match tokio::task::spawn_blocking(move || probe_image(&owned)).await {
            Ok(Ok(Some(probed))) => probed,
            Ok(Ok(None)) => return UNSUPPORTED_EVIDENCE.to_string(),
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), %err, "failed to read evidence image");
                return EVIDENCE_ERROR.to_string();
            }
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "evidence probe task failed");
                return EVIDENCE_ERROR.to_string();
            }
        };

        let commentary = match self.vision.describe_image(&probed.encoded).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => VISION_EMPTY.to_string(),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "vision analysis failed");
                VISION_UNAVAILABLE.to_string()
            }
        };

        format!(
            "Image {} {}x{}px. Analysis: {}",
            probed.format_name, probed.width, probed.height, commentary
        )
    }
}

struct ProbedImage {
    format_name: String,
    width: u32,
    height: u32,
    encoded: EncodedImage,
}

/// `Ok(None)` for anything that is not an image a vision model accepts.
/// The format comes from the file's magic bytes, never its extension.
fn probe_image(path: &Path) -> Result<Option<ProbedImage>, AnalysisError> {
    let file = BufReader::new(File::open(path)?);
    let reader = image::ImageReader::new(file).with_guessed_format()?;
    let Some(format) = reader.format() else {
        return Ok(None);
    };
    let media_type = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        _ => return Ok(None),
    };
    let (width, height) = reader.into_dimensions()?;
    let bytes = std::fs::read(path)?;

    Ok(Some(ProbedImage {
        format_name: format!("{format:?}").to_uppercase(),
        width,
        height,
        encoded: EncodedImage {
            media_type,
            base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        },
    }))
}

/// Runs one task per path concurrently. `result[i]` always belongs to
/// `paths[i]`; a panicking or timed-out task only affects its own slot.
pub async fn analyse_all(
    analyzer: Arc<dyn EvidenceAnalyzer>,
    paths: Vec<PathBuf>,
    timeout: Option<Duration>,
) -> Vec<Result<String, AnalysisError>> {
    let handles: Vec<_> = paths
        .into_iter()
        .map(|path| {
            let analyzer = Arc::clone(&analyzer);
            tokio::spawn(async move {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, analyzer.analyse(&path))
                        .await
                        .map_err(|_| AnalysisError::TimedOut(limit)),
                    None => Ok(analyzer.analyse(&path).await),
                }
            })
        })
        .collect();

    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(err) => Err(AnalysisError::TaskFailed(err.to_string())),
        })
        .collect()
}

/// Writes fan-out outcomes back into their items, positionally.
pub fn apply_analyses(items: &mut [EvidenceItem], outcomes: Vec<Result<String, AnalysisError>>) {
    for (item, outcome) in items.iter_mut().zip(outcomes) {
        let text = match outcome {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(filename = %item.filename, %err, "evidence analysis failed");
                ANALYSIS_FAILED.to_string()
            }
        };
        item.analysis = Some(text);
    }
}

/// Points the report's attachments at the stored evidence and appends the
/// analysis text, in item order, under the insights heading.
pub fn merge_evidence_insights(report: &mut IncidentReport, evidence: &[EvidenceItem]) {
    if evidence.is_empty() {
        return;
    }
    report.attachments = evidence.iter().map(|item| item.url.clone()).collect();

    let lines: Vec<&str> = evidence
        .iter()
        .filter_map(|item| item.analysis.as_deref())
        .filter(|text| !text.is_empty())
        .collect();
    if lines.is_empty() {
        return;
    }
    report.description = format!(
        "{}\n\n{}\n{}",
        report.description,
        EVIDENCE_INSIGHTS_HEADING,
        lines.join("\n")
    )
    .trim()
    .to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct ByName;

    #[async_trait]
    impl EvidenceAnalyzer for ByName {
        async fn analyse(&self, path: &Path) -> String {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if let Some(ms) = name.strip_prefix("slow-") {
                let ms: u64 = ms.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if name == "panic" {
                panic!("analyzer blew up");
            }
            format!("analysed {name}")
        }
    }

    struct FixedVision(Result<&'static str, &'static str>);

    #[async_trait]
    impl VisionModel for FixedVision {
        async fn describe_image(&self, _image: &EncodedImage) -> Result<String, StageError> {
            self.0
                .map(ToString::to_string)
                .map_err(|e| StageError::Execution(e.to_string()))
        }
    }

    fn item(name: &str) -> EvidenceItem {
        EvidenceItem {
            filename: name.into(),
            url: format!("/evidence/inc/{name}"),
            size_bytes: 1,
            analysis: None,
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::new(width, height)
            .save_with_format(path, ImageFormat::Png)
            .expect("write png");
    }

    #[tokio::test]
    async fn fan_out_preserves_input_order() {
        let paths = vec![
            PathBuf::from("slow-60"),
            PathBuf::from("slow-0"),
            PathBuf::from("slow-30"),
        ];
        let results = analyse_all(Arc::new(ByName), paths, None).await;
        let texts: Vec<_> = results.into_iter().map(|r| r.expect("ok")).collect();
        assert_eq!(
            texts,
            vec!["analysed slow-60", "analysed slow-0", "analysed slow-30"]
        );
    }

    #[tokio::test]
    async fn panicking_item_is_isolated() {
        let paths = vec![PathBuf::from("a"), PathBuf::from("panic"), PathBuf::from("b")];
        let results = analyse_all(Arc::new(ByName), paths, None).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_deref().ok(), Some("analysed a"));
        assert!(matches!(results[1], Err(AnalysisError::TaskFailed(_))));
        assert_eq!(results[2].as_deref().ok(), Some("analysed b"));

        let mut items = vec![item("a"), item("panic"), item("b")];
        apply_analyses(&mut items, results);
        assert_eq!(items[1].analysis.as_deref(), Some(ANALYSIS_FAILED));
        assert_eq!(items[2].analysis.as_deref(), Some("analysed b"));
    }

    #[tokio::test]
    async fn timed_out_item_is_isolated() {
        let paths = vec![PathBuf::from("slow-500"), PathBuf::from("fast")];
        let results =
            analyse_all(Arc::new(ByName), paths, Some(Duration::from_millis(50))).await;
        assert!(matches!(results[0], Err(AnalysisError::TimedOut(_))));
        assert_eq!(results[1].as_deref().ok(), Some("analysed fast"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn fan_out_length_and_positions_match(delays in proptest::collection::vec(0u64..20, 0..8)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");
            let paths: Vec<PathBuf> = delays.iter().map(|d| PathBuf::from(format!("slow-{d}"))).collect();
            let results = runtime.block_on(analyse_all(Arc::new(ByName), paths, None));
            prop_assert_eq!(results.len(), delays.len());
            for (result, delay) in results.iter().zip(&delays) {
                let expected = format!("analysed slow-{delay}");
                prop_assert_eq!(result.as_deref().ok(), Some(expected.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn vision_analyzer_describes_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dock.png");
        write_png(&path, 4, 3);

        let analyzer = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Ok(" puddle near pallet "))));
        let text = analyzer.analyse(&path).await;
        assert_eq!(text, "Image PNG 4x3px. Analysis: puddle near pallet");
    }

    #[tokio::test]
    async fn vision_failures_degrade_to_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dock.png");
        write_png(&path, 2, 2);

        let failing = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Err("offline"))));
        assert!(failing.analyse(&path).await.ends_with(VISION_UNAVAILABLE));

        let silent = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Ok("  "))));
        assert!(silent.analyse(&path).await.ends_with(VISION_EMPTY));
    }

    #[tokio::test]
    async fn non_image_and_missing_files_have_distinct_fallbacks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text_file = dir.path().join("notes.txt");
        std::fs::write(&text_file, "forklift operator statement").expect("write");

        let analyzer = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Ok("unused"))));
        assert_eq!(analyzer.analyse(&text_file).await, UNSUPPORTED_EVIDENCE);
        assert_eq!(
            analyzer.analyse(&dir.path().join("gone.png")).await,
            EVIDENCE_MISSING
        );
    }

    #[tokio::test]
    async fn text_named_like_an_image_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("abc_statement.png");
        std::fs::write(&path, "witness statement: floor was wet").expect("write");

        let analyzer = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Ok("unused"))));
        assert_eq!(analyzer.analyse(&path).await, UNSUPPORTED_EVIDENCE);
    }

    #[tokio::test]
    async fn corrupt_image_reports_processing_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, bytes).expect("write");

        let analyzer = VisionEvidenceAnalyzer::new(Arc::new(FixedVision(Ok("unused"))));
        assert_eq!(analyzer.analyse(&path).await, EVIDENCE_ERROR);
    }

    #[test]
    fn merge_appends_insights_once_in_order() {
        let mut report = IncidentReport::new("Slip", "Employee slipped");
        let mut first = item("a.png");
        first.analysis = Some("first".into());
        let mut second = item("b.png");
        second.analysis = Some("second".into());

        merge_evidence_insights(&mut report, &[first, second]);
        assert_eq!(
            report.description,
            "Employee slipped\n\nEvidence Insights:\nfirst\nsecond"
        );
        assert_eq!(
            report.attachments,
            vec!["/evidence/inc/a.png", "/evidence/inc/b.png"]
        );
    }

    #[test]
    fn merge_without_evidence_is_a_no_op() {
        let mut report = IncidentReport::new("Slip", "Employee slipped");
        merge_evidence_insights(&mut report, &[]);
        assert_eq!(report.description, "Employee slipped");
        assert!(report.attachments.is_empty());
    }
}
