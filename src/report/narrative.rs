//! Human-readable renderings of a verdict

use crate::drift::FeatureStatus;
use crate::report::VerdictArtifact;
use std::fmt::Write;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "&ndash;".to_string(), |v| format!("{:.4}", v))
}

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:2rem;color:#1f2933}\
table{border-collapse:collapse;width:100%;margin-top:1rem}\
th,td{border:1px solid #d9e2ec;padding:.4rem .6rem;text-align:left}\
th{background:#f0f4f8}\
.banner{padding:1rem;border-radius:6px;font-weight:600}\
.drift{background:#ffe3e3;color:#8a1c1c}\
.ok{background:#e3f9e5;color:#1f5c2e}\
.drifted{color:#c62828;font-weight:600}\
.stable{color:#2e7d32}\
.inconclusive{color:#8d6e00}\
.meta{color:#52606d;font-size:.9rem}";

/// Self-contained HTML report: inline CSS, no scripts, no external assets
pub fn render_html(artifact: &VerdictArtifact) -> String {
    let verdict = &artifact.verdict;
    let mut html = String::new();

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Drift report {}</title>\n<style>{}</style>\n</head>\n<body>\n",
        escape(&artifact.generated_at.to_rfc3339()),
        STYLE
    );

    let (class, headline) = if verdict.dataset_drifted {
        ("drift", "Dataset drift detected")
    } else {
        ("ok", "No dataset drift")
    };
    let _ = write!(
        html,
        "<h1>Data drift report</h1>\n<div class=\"banner {}\">{}: {} of {} evaluated features drifted \
         (share {:.2}, policy: {})</div>\n",
        class,
        headline,
        verdict.drifted_count,
        verdict.evaluated_features,
        verdict.drift_share,
        escape(&verdict.policy.to_string())
    );

    let _ = write!(
        html,
        "<p class=\"meta\">Generated {} &middot; cycle {} &middot; reference {} rows (sha256 {}) \
         &middot; window {} rows",
        escape(&artifact.generated_at.to_rfc3339()),
        artifact.cycle_id,
        verdict.reference_rows,
        escape(&artifact.reference_digest),
        verdict.window_rows
    );
    if let (Some(start), Some(end)) = (artifact.window_start, artifact.window_end) {
        let _ = write!(
            html,
            " ({} to {})",
            escape(&start.to_rfc3339()),
            escape(&end.to_rfc3339())
        );
    }
    html.push_str("</p>\n");

    if verdict.inconclusive_count > 0 {
        let _ = write!(
            html,
            "<p class=\"inconclusive\">{} feature(s) inconclusive and excluded from the drift share.</p>\n",
            verdict.inconclusive_count
        );
    }

    html.push_str(
        "<table>\n<thead><tr><th>Feature</th><th>Kind</th><th>Method</th><th>Statistic</th>\
         <th>p-value</th><th>Rule</th><th>Status</th><th>Reference mean</th><th>Window mean</th></tr></thead>\n<tbody>\n",
    );
    for f in &verdict.features {
        let (class, label) = match f.status {
            FeatureStatus::Drifted => ("drifted", "drifted".to_string()),
            FeatureStatus::Stable => ("stable", "stable".to_string()),
            FeatureStatus::Inconclusive => (
                "inconclusive",
                format!("inconclusive ({})", f.inconclusive_reason.as_deref().unwrap_or("unknown")),
            ),
        };
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{:?}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td class=\"{}\">{}</td><td>{:.4}</td><td>{:.4}</td></tr>\n",
            escape(&f.feature_name),
            f.kind,
            f.method,
            number(f.statistic),
            number(f.p_value),
            escape(&f.threshold.to_string()),
            class,
            escape(&label),
            f.reference_stats.mean,
            f.window_stats.mean
        );
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

/// Plain-text summary for logs and the terminal
pub fn render_text(artifact: &VerdictArtifact) -> String {
    format!(
        "Generated: {}\nCycle: {}\nReference digest: {}\n{}",
        artifact.generated_at.to_rfc3339(),
        artifact.cycle_id,
        artifact.reference_digest,
        artifact.verdict.summary()
    )
}
