//! Markdown rendering of a [`CoverageReport`].
//!
//! Section order is fixed: summary, per-state table, top label table,
//! recommendations.

use chrono::{DateTime, Utc};

use super::{CountDelta, CoverageReport, LABEL_REPORT_LIMIT};

pub fn render_markdown(report: &CoverageReport, generated_at: DateTime<Utc>) -> String {
    let summary = &report.summary;
    let mut lines = vec![
        "# Remote vs. Local Coverage Report".to_string(),
        String::new(),
        format!("**Generated**: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        format!("- **Remote pull requests**: {}", thousands(summary.remote_total as i64)),
        format!("- **Local pull requests**: {}", thousands(summary.local_total as i64)),
        format!("- **Local files**: {}", thousands(summary.local_file_count as i64)),
        format!("- **Difference**: {}", thousands(summary.difference)),
        format!("- **Coverage**: {:.1}%", summary.coverage_percentage),
        String::new(),
        "## By State".to_string(),
        String::new(),
        "| State | Remote | Local | Difference |".to_string(),
        "|-------|--------|-------|------------|".to_string(),
    ];
    for delta in &report.states {
        lines.push(row(delta.state.as_str(), &delta.counts));
    }

    lines.extend([
        String::new(),
        format!("## By Label (top {} differences)", LABEL_REPORT_LIMIT),
        String::new(),
        "| Label | Remote | Local | Difference |".to_string(),
        "|-------|--------|-------|------------|".to_string(),
    ]);
    for delta in &report.labels {
        lines.push(row(&delta.label, &delta.counts));
    }

    lines.extend([String::new(), "## Recommendations".to_string(), String::new()]);
    if report.recommendations.is_empty() {
        lines.push("None. The local mirror matches the remote.".to_string());
    } else {
        for (i, rec) in report.recommendations.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, rec));
        }
    }

    lines.extend([String::new(), "---".to_string(), "*Generated by prm validate*".to_string()]);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn row(name: &str, counts: &CountDelta) -> String {
    format!(
        "| {} | {} | {} | {} |",
        name.replace('|', "\\|"),
        thousands(counts.remote as i64),
        thousands(counts.local as i64),
        signed(counts.difference)
    )
}

/// `1234567` -> `1,234,567`
pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Always carries a sign, like `+12` or `-3`. Zero renders as `+0`.
pub fn signed(n: i64) -> String {
    if n >= 0 {
        format!("+{}", thousands(n))
    } else {
        thousands(n)
    }
}
