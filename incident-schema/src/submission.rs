use crate::IncidentReport;

const MAX_TITLE_CHARS: usize = 80;
const EVIDENCE_ONLY_NARRATIVE: &str = "Evidence submitted without accompanying narrative.";
const FALLBACK_TITLE: &str = "Evidence Submission";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("provide an incident payload, message, or evidence")]
    EmptySubmission,
    #[error("invalid incident payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0} is required")]
    MissingField(&'static str),
}

pub fn validate_report(report: &IncidentReport) -> Result<(), ValidationError> {
    if report.title.trim().is_empty() {
        return Err(ValidationError::MissingField("title"));
    }
    Ok(())
}

pub fn parse_incident_json(raw: &str) -> Result<IncidentReport, ValidationError> {
    let report: IncidentReport = serde_json::from_str(raw)?;
    validate_report(&report)?;
    Ok(report)
}

/// Builds a report from a free-form message: the first line becomes the title.
pub fn report_from_message(message: &str) -> IncidentReport {
    let text = match message.trim() {
        "" => EVIDENCE_ONLY_NARRATIVE,
        trimmed => trimmed,
    };
    let title: String = text
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let title = match title.trim() {
        "" => FALLBACK_TITLE.to_string(),
        t => t.to_string(),
    };
    IncidentReport::new(title, text)
}

/// Resolves the report for a submission. A structured payload wins over the
/// free-form message; a submission with neither and no evidence is rejected.
pub fn prepare_report(
    incident_json: Option<&str>,
    message: Option<&str>,
    has_evidence: bool,
) -> Result<IncidentReport, ValidationError> {
    if incident_json.is_none() && message.is_none() && !has_evidence {
        return Err(ValidationError::EmptySubmission);
    }
    match incident_json {
        Some(raw) if !raw.trim().is_empty() => parse_incident_json(raw),
        _ => Ok(report_from_message(message.unwrap_or_default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_payload() {
        let raw = r#"{"title":"Slip on wet floor","description":"Employee slipped near loading dock","location":"Dock 4"}"#;
        let report = parse_incident_json(raw).expect("parse");
        assert_eq!(report.title, "Slip on wet floor");
        assert_eq!(report.location.as_deref(), Some("Dock 4"));
        assert!(report.individuals_involved.is_empty());
    }

    #[test]
    fn rejects_blank_title() {
        let raw = r#"{"title":"  ","description":"x"}"#;
        assert!(matches!(
            parse_incident_json(raw),
            Err(ValidationError::MissingField("title"))
        ));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(matches!(
            parse_incident_json("{\"title\": 3}"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn message_title_is_first_line_truncated() {
        let long = "x".repeat(120);
        let report = report_from_message(&format!("{long}\nsecond line"));
        assert_eq!(report.title.chars().count(), 80);
        assert!(report.description.ends_with("second line"));
    }

    #[test]
    fn empty_message_with_evidence_gets_placeholder_narrative() {
        let report = prepare_report(None, Some("   "), true).expect("report");
        assert_eq!(report.description, EVIDENCE_ONLY_NARRATIVE);
        assert_eq!(report.title, EVIDENCE_ONLY_NARRATIVE);
    }

    #[test]
    fn empty_submission_is_rejected() {
        assert!(matches!(
            prepare_report(None, None, false),
            Err(ValidationError::EmptySubmission)
        ));
        assert!(prepare_report(None, None, true).is_ok());
    }
}
