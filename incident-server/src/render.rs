//! Report rendering for the submission response.

use incident_schema::{
    CorrectiveActionPlan, EvidenceItem, IncidentWorkflowReport, NotificationResult, PolicyReference,
};

const WRAP_COLUMNS: usize = 90;

pub trait ReportRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn render(&self, report: &IncidentWorkflowReport) -> Vec<u8>;
}

/// Plain-text layout of the full report.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextRenderer;

impl ReportRenderer for TextRenderer {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, report: &IncidentWorkflowReport) -> Vec<u8> {
        let mut doc = TextDocument::new("Incident Workflow Report");
        let incident = &report.incident;

        doc.key_value(
            "Generated",
            Some(&report.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        );
        doc.key_value("Incident Title", Some(&incident.title));
        doc.key_value(
            "Reported By",
            Some(incident.reported_by.as_deref().unwrap_or("Unknown")),
        );
        doc.key_value(
            "Location",
            Some(incident.location.as_deref().unwrap_or("Not specified")),
        );
        doc.key_value(
            "Time of Incident",
            Some(incident.time_of_incident.as_deref().unwrap_or("Not provided")),
        );
        doc.key_value("Severity Hint", incident.severity_hint.as_deref());
        doc.blank();

        doc.section("Reporter Description");
        doc.wrapped(&incident.description);

        doc.section("Intake Summary");
        doc.wrapped(&report.intake.narrative);
        doc.key_value("Severity Assessment", Some(report.intake.severity.as_str()));
        doc.section("Key Findings");
        doc.bullets(&report.intake.key_findings);
        doc.section("Injuries / Illnesses");
        doc.bullets(&report.intake.injuries_or_illnesses);
        doc.blank();

        doc.section("Triage Assessment");
        doc.key_value("Risk Level", Some(report.triage.risk_level.as_str()));
        doc.key_value(
            "Escalation Required",
            Some(if report.triage.escalation_required { "Yes" } else { "No" }),
        );
        doc.section("Priority Actions");
        doc.bullets(&report.triage.priority_actions);
        doc.section("Escalation Channels");
        doc.bullets(&report.triage.escalation_channels);
        doc.section("Monitoring Plan");
        doc.wrapped(&report.triage.monitoring_plan);
        doc.section("Rationale");
        doc.wrapped(&report.triage.rationale);
        doc.blank();

        doc.section("Root Cause Analysis");
        doc.section("Primary Causes");
        doc.bullets(&report.root_cause.primary_causes);
        doc.section("Contributing Factors");
        doc.bullets(&report.root_cause.contributing_factors);
        doc.section("Investigation Gaps");
        doc.bullets(&report.root_cause.uncertainty_gaps);
        doc.blank();

        render_corrective_actions(&mut doc, &report.corrective_actions);
        doc.blank();
        render_notifications(&mut doc, &report.notifications);
        doc.blank();
        render_evidence(&mut doc, &report.evidence);

        doc.finish().into_bytes()
    }
}

fn render_corrective_actions(doc: &mut TextDocument, plan: &CorrectiveActionPlan) {
    doc.section("Corrective Action Plan");
    doc.bullets(&plan.actions);
    doc.section("Responsible Parties");
    doc.bullets(&plan.responsible_parties);
    doc.section("Due Dates");
    if plan.due_dates.is_empty() {
        doc.bullets(&["Not specified".to_string()]);
    } else {
        doc.bullets(&plan.due_dates);
    }
    if !plan.policy_references.is_empty() {
        doc.section("Policy References");
        let lines: Vec<String> = plan.policy_references.iter().map(format_reference).collect();
        doc.bullets(&lines);
    }
}

fn format_reference(reference: &PolicyReference) -> String {
    format!(
        "{} ({}): {}",
        reference.title, reference.source, reference.excerpt
    )
}

fn render_notifications(doc: &mut TextDocument, result: &NotificationResult) {
    doc.section("Notification Plan - Tickets");
    let tickets: Vec<String> = result
        .tickets
        .iter()
        .map(|ticket| {
            let status = match ticket.status {
                incident_schema::TicketStatus::Created => "created",
                incident_schema::TicketStatus::Failed => "failed",
            };
            let mut line = format!(
                "{} (Priority: {}) -> {} [{}]",
                ticket.request.title,
                ticket.request.priority,
                ticket.ticket_id.as_deref().unwrap_or("none"),
                status
            );
            if let Some(err) = &ticket.error {
                line.push_str(&format!(" ({err})"));
            }
            line
        })
        .collect();
    if tickets.is_empty() {
        doc.bullets(&["No tickets created".to_string()]);
    } else {
        doc.bullets(&tickets);
    }

    doc.section("Notification Plan - Emails");
    let emails: Vec<String> = result
        .emails
        .iter()
        .map(|email| {
            let status = match email.status {
                incident_schema::EmailStatus::Sent => "sent",
                incident_schema::EmailStatus::Failed => "failed",
            };
            format!(
                "{} | {} -> {}",
                email.request.recipient, email.request.subject, status
            )
        })
        .collect();
    if emails.is_empty() {
        doc.bullets(&["No emails sent".to_string()]);
    } else {
        doc.bullets(&emails);
    }

    if let Some(notes) = &result.notes {
        doc.wrapped(&format!("Notes: {notes}"));
    }
}

fn render_evidence(doc: &mut TextDocument, evidence: &[EvidenceItem]) {
    doc.section("Evidence");
    if evidence.is_empty() {
        doc.bullets(&["No evidence uploaded.".to_string()]);
        return;
    }
    let lines: Vec<String> = evidence
        .iter()
        .map(|item| {
            let mut line = format!(
                "{} ({}) -> {}",
                item.filename,
                format_size(item.size_bytes),
                item.url
            );
            if let Some(analysis) = item.analysis.as_deref().filter(|a| !a.is_empty()) {
                line.push_str(&format!(" | Analysis: {analysis}"));
            }
            line
        })
        .collect();
    doc.bullets(&lines);
}

pub fn format_size(size_bytes: u64) -> String {
    if size_bytes < 1024 {
        return format!("{size_bytes} B");
    }
    let kb = size_bytes as f64 / 1024.0;
    if kb < 1024.0 {
        return format!("{kb:.1} KB");
    }
    format!("{:.1} MB", kb / 1024.0)
}

struct TextDocument {
    out: String,
}

impl TextDocument {
    fn new(title: &str) -> Self {
        let mut out = String::new();
        out.push_str(title);
        out.push('\n');
        out.push_str(&"=".repeat(title.len()));
        out.push_str("\n\n");
        Self { out }
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn section(&mut self, title: &str) {
        self.line(&format!("## {}", sanitize(title)));
    }

    fn key_value(&mut self, key: &str, value: Option<&str>) {
        let value = match value.map(sanitize) {
            Some(v) if !v.is_empty() => v,
            _ => "N/A".to_string(),
        };
        for line in wrap_lines(&format!("{key}: {value}")) {
            self.line(&line);
        }
    }

    fn bullets(&mut self, items: &[String]) {
        if items.is_empty() {
            self.line("- None");
            return;
        }
        for item in items {
            for (idx, line) in wrap_lines(item).into_iter().enumerate() {
                let prefix = if idx == 0 { "- " } else { "  " };
                self.line(&format!("{prefix}{line}"));
            }
        }
        self.blank();
    }

    fn wrapped(&mut self, text: &str) {
        for line in wrap_lines(text) {
            self.line(&line);
        }
        self.blank();
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Splits sanitized text into lines of at most 90 characters.
pub fn wrap_lines(text: &str) -> Vec<String> {
    let sanitized = sanitize(text);
    if sanitized.is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    for raw in sanitized.lines() {
        if raw.is_empty() {
            lines.push(String::new());
            continue;
        }
        let chars: Vec<char> = raw.chars().collect();
        for chunk in chars.chunks(WRAP_COLUMNS) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

/// Maps typographic punctuation to ASCII and everything else outside
/// printable ASCII to `?`. Tabs and newlines survive.
pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        let replacement = match ch {
            '\u{2192}' => "->",
            '\u{2190}' => "<-",
            '\u{2194}' => "<->",
            '\u{2013}' | '\u{2014}' | '\u{2212}' | '\u{2022}' | '\u{00B7}' => "-",
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => "\"",
            '\u{2018}' | '\u{2019}' | '\u{201B}' => "'",
            '\u{2026}' => "...",
            '\u{00A0}' | '\u{202F}' => " ",
            '\n' | '\r' | '\t' => {
                out.push(ch);
                continue;
            }
            c if (c as u32) < 32 => " ",
            c if (' '..='~').contains(&c) => {
                out.push(c);
                continue;
            }
            _ => "?",
        };
        out.push_str(replacement);
    }
    out.trim().to_string()
}
