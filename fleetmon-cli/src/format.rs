//! Table formatting for reports and instance listings.
//!
//! Display rounding happens here and nowhere earlier: the core keeps full
//! precision so rates are not distorted before they reach the sink.

use std::fmt::Write as _;

use fleetmon_core::models::{InstanceDescriptor, Report};

/// Placeholder for unknown or failed fields
const BLANK: &str = "-";

/// Renders the fleet report as an aligned text table
#[must_use]
pub fn format_report_table(report: &Report) -> String {
    let header = [
        "Instance ID",
        "GPU Name",
        "$/hr",
        "Runtime(h)",
        "Blocks/h",
        "Blocks/$",
    ];

    let rows: Vec<[String; 6]> = report
        .rows
        .iter()
        .map(|row| {
            [
                row.instance_id.to_string(),
                row.gpu_name.clone(),
                row.price_per_hour
                    .map_or_else(|| BLANK.to_string(), |p| format!("{p:.3}")),
                row.elapsed_hours
                    .map_or_else(|| BLANK.to_string(), |h| format!("{h:.2}")),
                row.blocks_per_hour
                    .map_or_else(|| BLANK.to_string(), |b| format!("{b:.2}")),
                row.blocks_per_dollar
                    .map_or_else(|| BLANK.to_string(), |b| format!("{b:.2}")),
            ]
        })
        .collect();

    render_table(&header, &rows)
}

/// One-line cycle summary printed under each watch report
#[must_use]
pub fn format_cycle_summary(report: &Report) -> String {
    format!(
        "{} of {} instances reporting",
        report.success_count(),
        report.rows.len()
    )
}

/// Renders the directory snapshot as an aligned text table
#[must_use]
pub fn format_instances_table(instances: &[InstanceDescriptor]) -> String {
    let header = ["Instance ID", "GPU Name", "$/hr", "Host", "Port"];

    let rows: Vec<[String; 5]> = instances
        .iter()
        .map(|d| {
            [
                d.id.to_string(),
                d.gpu_name.clone(),
                d.price_per_hour
                    .map_or_else(|| BLANK.to_string(), |p| format!("{p:.3}")),
                d.host.clone(),
                d.port.to_string(),
            ]
        })
        .collect();

    render_table(&header, &rows)
}

/// Left-aligns columns to the widest cell
fn render_table<const N: usize>(header: &[&str; N], rows: &[[String; N]]) -> String {
    let mut widths: [usize; N] = header.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, (title, width)) in header.iter().zip(widths.iter()).enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        let _ = write!(out, "{title:<width$}");
    }
    out.push('\n');
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        let _ = write!(out, "{:-<width$}", "");
    }
    for row in rows {
        out.push('\n');
        for (i, (cell, width)) in row.iter().zip(widths.iter()).enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            let _ = write!(out, "{cell:<width$}");
        }
    }
    out
}
