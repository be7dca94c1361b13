//! HTML pages for the upload form and the cluster summary

use crate::aggregate::ClusterSummary;
use crate::pipeline::ProcessOutcome;

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 2em; background: #f5f5f5; color: #222; }
.card { background: white; border-radius: 8px; padding: 1.5em; margin: 1em 0; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
table.table { border-collapse: collapse; }
table.table th, table.table td { border: 1px solid #ddd; padding: 0.4em 0.8em; text-align: right; }
table.table th { background: #eef; }
.note { color: #666; font-size: 0.9em; }
.chart svg { max-width: 100%; height: auto; }
"#;

/// Escape text for inclusion in HTML element content or attribute values
pub fn escape(text: &str) -> String {
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

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>"#,
        title = escape(title),
    )
}

pub fn upload_page(model_ready: bool) -> String {
    let status = if model_ready {
        String::new()
    } else {
        r#"<p class="note">The clustering pipeline is not loaded; uploads will be rejected until it is available.</p>"#
            .to_string()
    };

    page(
        "Cluster a dataset",
        &format!(
            r#"<div class="card">
{status}
<form method="post" action="/" enctype="multipart/form-data">
<input type="file" name="file" accept=".csv,text/csv">
<button type="submit">Upload and cluster</button>
</form>
</div>"#
        ),
    )
}

/// Per-cluster means as an HTML table, one row per cluster
pub fn summary_table(summary: &ClusterSummary) -> String {
    let mut html = String::from("<table class=\"table\">\n<thead><tr><th>Cluster</th><th>Rows</th>");
    for feature in &summary.features {
        html.push_str(&format!("<th>{}</th>", escape(feature)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");

    for stats in &summary.clusters {
        html.push_str(&format!("<tr><td>{}</td><td>{}</td>", stats.label, stats.count));
        for mean in &stats.means {
            html.push_str(&format!("<td>{:.4}</td>", mean));
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>");
    html
}

pub fn results_page(outcome: &ProcessOutcome) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        r#"<div class="card"><h2>Cluster summary</h2>
{}
<p><a href="/download/{}">Download {}</a> ({} rows)</p>
</div>"#,
        summary_table(&outcome.summary),
        outcome.record.id,
        escape(&outcome.record.file_name),
        outcome.record.rows,
    ));

    if !outcome.schema.dropped.is_empty() || outcome.skipped_rows > 0 {
        body.push_str(r#"<div class="card note"><h2>Input notes</h2><ul>"#);
        for column in &outcome.schema.dropped {
            body.push_str(&format!(
                "<li>Column <code>{}</code> was ignored: not numeric</li>",
                escape(&column.name)
            ));
        }
        if outcome.skipped_rows > 0 {
            body.push_str(&format!(
                "<li>{} malformed row(s) were skipped</li>",
                outcome.skipped_rows
            ));
        }
        body.push_str("</ul></div>");
    }

    if let Some(ref charts) = outcome.charts {
        body.push_str(r#"<div class="card chart"><h2>Charts</h2>"#);
        if let Some(ref scatter) = charts.scatter {
            body.push_str(scatter);
        }
        body.push_str(&charts.distribution);
        body.push_str(&charts.spread);
        body.push_str("</div>");
    }

    body.push_str(r#"<p><a href="/">Cluster another file</a></p>"#);
    page("Clustering results", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ClusterStats;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_summary_table() {
        let summary = ClusterSummary {
            features: vec!["A".to_string(), "<B>".to_string()],
            clusters: vec![
                ClusterStats {
                    label: 0,
                    count: 2,
                    means: vec![1.5, 1.5],
                },
                ClusterStats {
                    label: 1,
                    count: 1,
                    means: vec![10.0, 10.0],
                },
            ],
        };

        let html = summary_table(&summary);
        assert!(html.contains("<th>&lt;B&gt;</th>"));
        assert!(html.contains("<tr><td>0</td><td>2</td><td>1.5000</td><td>1.5000</td></tr>"));
        assert!(html.contains("<tr><td>1</td><td>1</td><td>10.0000</td><td>10.0000</td></tr>"));
    }

    #[test]
    fn test_upload_page_mentions_missing_model() {
        assert!(upload_page(false).contains("not loaded"));
        assert!(!upload_page(true).contains("not loaded"));
        assert!(upload_page(true).contains("name=\"file\""));
    }
}
