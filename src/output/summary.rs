use std::fmt::Write;

use comfy_table::Cell;

use crate::report::{StatusMatrix, WorkflowColumn};

use super::styling::{abbreviate, bright, cyan, dim};
use super::tables::{create_table, cyan_header, duration_cell, status_cell};

/// Prints the status matrix to stdout, one table per workflow column.
///
/// Each table has a row per pipeline (newest first) with the workflow's
/// duration followed by one status glyph per job. Pipelines that never ran
/// the workflow are left out of its table.
pub fn print_summary(matrix: &StatusMatrix) {
    println!("{}", render_summary(matrix));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

pub(super) fn render_summary(matrix: &StatusMatrix) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📋", "Overview");
    let mut overview = create_table();
    overview.add_row(vec![Cell::new("Project"), Cell::new(&matrix.project)]);
    overview.add_row(vec![Cell::new("View"), Cell::new(&matrix.description)]);
    overview.add_row(vec![Cell::new("Pipelines"), Cell::new(matrix.rows.len())]);
    overview.add_row(vec![Cell::new("Workflows"), Cell::new(matrix.columns.len())]);
    let _ = writeln!(output, "{overview}");
    let _ = writeln!(output, "  {}\n", dim(matrix.info_line()));

    if matrix.rows.is_empty() {
        let _ = writeln!(output, "  {}", dim("No pipeline data found"));
        return output;
    }

    for (index, column) in matrix.columns.iter().enumerate() {
        add_section_header(&mut output, "⚡", &column.name);
        let _ = writeln!(output, "{}\n", workflow_table(matrix, index, column));
    }

    let _ = writeln!(
        output,
        "  {} ✓ success  ✗ failed  ⊘ canceled  ▶ running  ⏸ on hold  ◷ queued",
        cyan("Legend:")
    );
    output
}

fn workflow_table(
    matrix: &StatusMatrix,
    index: usize,
    column: &WorkflowColumn,
) -> comfy_table::Table {
    let mut table = create_table();

    let job_labels: Vec<String> = column.jobs.iter().map(|job| abbreviate(job)).collect();
    let mut header = vec!["#", "Ref", "Duration"];
    header.extend(job_labels.iter().map(String::as_str));
    table.set_header(cyan_header(&header));

    for row in &matrix.rows {
        let Some(Some(workflow)) = row.workflows.get(index) else {
            continue;
        };

        let mut cells = vec![
            Cell::new(row.number),
            Cell::new(&row.ref_name),
            duration_cell(workflow.duration.as_deref(), workflow.running),
        ];
        cells.extend(workflow.jobs.iter().map(|job| match job {
            Some(job) => status_cell(&job.status),
            None => Cell::new("—"),
        }));
        table.add_row(cells);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::circleci::client::RequestCounts;
    use crate::providers::circleci::types::Status;
    use crate::report::{JobCell, PipelineRow, WorkflowCell};
    use chrono::{TimeZone, Utc};

    fn create_test_matrix(rows: Vec<PipelineRow>) -> StatusMatrix {
        StatusMatrix {
            project: "gh/acme/app".to_string(),
            description: "main".to_string(),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            requests: RequestCounts {
                total_requests: 3,
                uncached_requests: 1,
            },
            columns: vec![
                WorkflowColumn {
                    name: "build-and-test".to_string(),
                    jobs: vec!["compile-sources".to_string(), "unit".to_string()],
                },
                WorkflowColumn {
                    name: "nightly".to_string(),
                    jobs: vec!["e2e".to_string()],
                },
            ],
            rows,
        }
    }

    fn create_test_row(number: u64) -> PipelineRow {
        PipelineRow {
            number,
            created_at: None,
            ref_name: "main".to_string(),
            subject: "Fix things".to_string(),
            commit_url: None,
            workflows: vec![
                Some(WorkflowCell {
                    id: "w1".to_string(),
                    status: Status::Failed,
                    duration: Some("12:34".to_string()),
                    running: false,
                    url: "https://app.circleci.com/w1".to_string(),
                    jobs: vec![
                        Some(JobCell {
                            status: Status::Success,
                            duration: None,
                            url: None,
                        }),
                        None,
                    ],
                }),
                None,
            ],
        }
    }

    #[test]
    fn test_render_summary_empty_matrix() {
        let output = render_summary(&create_test_matrix(vec![]));

        assert!(output.contains("gh/acme/app"));
        assert!(output.contains("(1/3 uncached requests)"));
        assert!(output.contains("No pipeline data found"));
    }

    #[test]
    fn test_render_summary_with_rows() {
        let output = render_summary(&create_test_matrix(vec![create_test_row(42)]));

        assert!(output.contains("build-and-test"));
        assert!(output.contains("comp-sour"));
        assert!(output.contains("12:34"));
        assert!(output.contains("42"));
        assert!(output.contains('✓'));
        assert!(!output.contains("No pipeline data found"));
    }
}
