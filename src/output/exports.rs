use anyhow::Result;
use std::fmt::Write as _;
use std::io::Write;

use crate::config::OutputFormat;
use crate::report::StatusMatrix;

use super::summary::render_summary;
use super::tables::status_symbol;

/// Writes the status matrix in the requested format.
///
/// - Summary: the terminal tables
/// - JSON: programmatic access
/// - HTML: a self-contained page; duration cells link to the workflow
pub fn export_matrix(
    matrix: &StatusMatrix,
    format: OutputFormat,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Summary => writeln!(output, "{}", render_summary(matrix))?,
        OutputFormat::Json => export_json(matrix, pretty, output)?,
        OutputFormat::Html => output.write_all(render_html(matrix, false).as_bytes())?,
    }
    Ok(())
}

fn export_json(matrix: &StatusMatrix, pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(matrix)?
    } else {
        serde_json::to_string(matrix)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

const STYLE: &str = "
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; }
        h1 { margin-bottom: 0; text-align: center; }
        .info { text-align: right; color: #666; }
        .rotated { vertical-align: top; transform: rotate(180deg); writing-mode: vertical-lr; min-width: 1em; white-space: nowrap; }
        .workflow { text-align: center; font-size: 160%; }
        .duration { text-align: right; padding-left: 1em; font-size: 90%; }
        .duration.running a { color: gray; font-style: italic; }
        td.job { text-align: center; }
        td.job a { text-decoration: none; }
        tr:nth-of-type(n+3) td.job:nth-of-type(2n+3) { background-color: hsl(0, 0%, 94%); }
        tr:nth-of-type(n+3) td.job:nth-of-type(2n+4) { background-color: hsl(0, 0%, 88%); }
        .success { color: rgb(4, 155, 74); }
        .failed, .unauthorized { color: rgb(242, 70, 70); }
        .running { color: rgb(53, 149, 220); }
        .on_hold { color: rgb(166, 146, 236); }
        .canceled, .blocked, .queued, .not_running { color: rgb(127, 127, 127); }
";

/// Renders the matrix as a standalone HTML page.
///
/// With `timeline_links` the duration cells point at the relative
/// `workflow_timeline/{id}` route served next to the report; otherwise
/// they point at the workflow in the CircleCI app.
pub fn render_html(matrix: &StatusMatrix, timeline_links: bool) -> String {
    let mut html = String::new();
    let title = format!("CI summary: {}", matrix.description);

    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html lang=\"en\">");
    let _ = writeln!(html, "<head>");
    let _ = writeln!(html, "    <meta charset=\"UTF-8\">");
    let _ = writeln!(html, "    <title>{}</title>", escape(&title));
    let _ = writeln!(html, "    <style>{STYLE}    </style>");
    let _ = writeln!(html, "</head>");
    let _ = writeln!(html, "<body>");
    let _ = writeln!(html, "    <h1>{}</h1>", escape(&title));
    let _ = writeln!(
        html,
        "    <div class=\"info\">{} · {}</div>",
        escape(&matrix.project),
        escape(&matrix.info_line())
    );
    let _ = writeln!(html, "    <table>");

    // Workflow names, then rotated job names underneath
    let _ = write!(html, "        <tr><td></td><td></td>");
    for column in &matrix.columns {
        let _ = write!(
            html,
            "<th></th><th class=\"workflow\" colspan=\"{}\">{}</th>",
            column.jobs.len() + 1,
            escape(&column.name)
        );
    }
    let _ = writeln!(html, "</tr>");
    let _ = write!(html, "        <tr><td></td><td></td>");
    for column in &matrix.columns {
        let _ = write!(html, "<td></td><td></td>");
        for job in &column.jobs {
            let _ = write!(html, "<td><div class=\"rotated\">{}</div></td>", escape(job));
        }
    }
    let _ = writeln!(html, "</tr>");

    for row in &matrix.rows {
        let created = row
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let reference = match &row.commit_url {
            Some(url) => format!(
                "<a href=\"{}\" title=\"{}\">{}</a>",
                escape(url),
                escape(&row.subject),
                escape(&row.ref_name)
            ),
            None => format!(
                "<span title=\"{}\">{}</span>",
                escape(&row.subject),
                escape(&row.ref_name)
            ),
        };
        let _ = write!(html, "        <tr><td><b>{created}</b></td><td>{reference}</td>");

        for (column, cell) in matrix.columns.iter().zip(&row.workflows) {
            let Some(workflow) = cell else {
                let _ = write!(html, "<td></td>");
                for _ in &column.jobs {
                    let _ = write!(html, "<td></td>");
                }
                let _ = write!(html, "<td></td>");
                continue;
            };

            let href = if timeline_links {
                format!("workflow_timeline/{}", workflow.id)
            } else {
                workflow.url.clone()
            };
            let running = if workflow.running { " running" } else { "" };
            let _ = write!(
                html,
                "<td class=\"duration{running}\"><a href=\"{}\">{}</a></td><td><a href=\"{}\" class=\"{}\" title=\"{}\">{}</a></td>",
                escape(&href),
                workflow.duration.as_deref().unwrap_or("—"),
                escape(&workflow.url),
                workflow.status.as_str(),
                escape(&column.name),
                status_symbol(&workflow.status)
            );

            for (name, job) in column.jobs.iter().zip(&workflow.jobs) {
                let Some(job) = job else {
                    let _ = write!(html, "<td class=\"job\">—</td>");
                    continue;
                };
                let title = match &job.duration {
                    Some(duration) => format!("{name}: {duration}"),
                    None => name.clone(),
                };
                let symbol = format!(
                    "<span class=\"{}\" title=\"{}\">{}</span>",
                    job.status.as_str(),
                    escape(&title),
                    status_symbol(&job.status)
                );
                match &job.url {
                    Some(url) => {
                        let _ = write!(
                            html,
                            "<td class=\"job\"><a href=\"{}\">{symbol}</a></td>",
                            escape(url)
                        );
                    }
                    None => {
                        let _ = write!(html, "<td class=\"job\">{symbol}</td>");
                    }
                }
            }
        }
        let _ = writeln!(html, "</tr>");
    }

    let _ = writeln!(html, "    </table>");
    let _ = writeln!(html, "</body>");
    let _ = writeln!(html, "</html>");
    html
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
