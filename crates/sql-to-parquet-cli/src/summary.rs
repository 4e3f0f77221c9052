//! Plain-text rendering of a run summary.

use std::fmt::Write;

use sql_to_parquet::{ExportResult, RunSummary};

const HEADERS: [&str; 6] = ["Name", "Object", "Status", "Rows", "Seconds", "File"];

/// Render the per-object table, the error section and the closing line.
///
/// With `show_table` false only the error section and the closing line are
/// rendered.
pub fn render(summary: &RunSummary, show_table: bool) -> String {
    let mut out = String::new();

    if show_table {
        let rows: Vec<[String; 6]> = summary.results.iter().map(table_row).collect();
        let mut widths = HEADERS.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        push_row(&mut out, &HEADERS.map(String::from), &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let _ = writeln!(out, "{}", rule.join("-+-"));
        for row in &rows {
            push_row(&mut out, row, &widths);
        }
        out.push('\n');
    }

    let failures: Vec<&ExportResult> = summary.results.iter().filter(|r| !r.is_success()).collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "Errors:");
        for result in failures {
            if let Some(reason) = result.failure() {
                let _ = writeln!(out, "  {} ({}): {}", result.name, reason.kind, reason.message);
            }
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "Exported {} objects ({} failed) with a total of {} rows",
        summary.succeeded(),
        summary.failed(),
        summary.total_rows_written
    );
    out
}

fn table_row(result: &ExportResult) -> [String; 6] {
    let object = result
        .resolved
        .as_ref()
        .map(|o| o.to_string())
        .unwrap_or_else(|| result.object_ref.clone());
    let status = match result.failure() {
        None => "completed".to_string(),
        Some(reason) => format!("failed: {}", reason.kind),
    };
    let file = result
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    [
        result.name.clone(),
        object,
        status,
        result.rows_written.to_string(),
        format!("{:.2}", result.duration_ms as f64 / 1000.0),
        file,
    ]
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
}
