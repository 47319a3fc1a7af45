//! Report aggregation
//!
//! Combines a fully-settled set of poll results with the directory snapshot
//! that produced them. Derived rates are total functions: degenerate inputs
//! (zero runtime, unknown or zero price) yield 0, never a panic and never a
//! silently-dropped row.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{InstanceDescriptor, PollResult, PollStatus, Report, ReportRow};

/// Builds the per-cycle report from settled results.
///
/// Every instance in the snapshot appears exactly once, ordered by instance
/// id, regardless of its outcome; failed instances get blank metric fields.
#[must_use]
pub fn build_report(results: &[PollResult], snapshot: &[InstanceDescriptor]) -> Report {
    let by_id: HashMap<u64, &PollResult> =
        results.iter().map(|r| (r.instance_id, r)).collect();

    let mut rows: Vec<ReportRow> = snapshot
        .iter()
        .map(|descriptor| {
            let metrics = by_id.get(&descriptor.id).and_then(|r| match &r.status {
                PollStatus::Success(metrics) => Some(metrics),
                PollStatus::ConnectionFailure(_) | PollStatus::ParseFailure(_) => None,
            });

            match metrics {
                Some(metrics) => {
                    let blocks_per_hour =
                        blocks_per_hour(metrics.block_count, metrics.elapsed_hours);
                    ReportRow {
                        instance_id: descriptor.id,
                        gpu_name: descriptor.gpu_name.clone(),
                        price_per_hour: descriptor.price_per_hour,
                        elapsed_hours: Some(metrics.elapsed_hours),
                        blocks_per_hour: Some(blocks_per_hour),
                        blocks_per_dollar: Some(blocks_per_dollar(
                            blocks_per_hour,
                            descriptor.price_per_hour,
                        )),
                    }
                }
                None => ReportRow {
                    instance_id: descriptor.id,
                    gpu_name: descriptor.gpu_name.clone(),
                    price_per_hour: descriptor.price_per_hour,
                    elapsed_hours: None,
                    blocks_per_hour: None,
                    blocks_per_dollar: None,
                },
            }
        })
        .collect();

    rows.sort_by_key(|row| row.instance_id);

    Report {
        rows,
        generated_at: Utc::now(),
    }
}

/// Blocks per hour of runtime; 0 when the worker just started
fn blocks_per_hour(block_count: u64, elapsed_hours: f64) -> f64 {
    if elapsed_hours > 0.0 {
        block_count as f64 / elapsed_hours
    } else {
        0.0
    }
}

/// Blocks per dollar spent; 0 when the price is unknown or zero so an
/// unknown price never masquerades as infinite value
fn blocks_per_dollar(blocks_per_hour: f64, price_per_hour: Option<f64>) -> f64 {
    match price_per_hour {
        Some(price) if price > 0.0 => blocks_per_hour / price,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metrics;

    fn descriptor(id: u64, price: Option<f64>) -> InstanceDescriptor {
        InstanceDescriptor {
            id,
            gpu_name: format!("GPU-{id}"),
            price_per_hour: price,
            host: format!("host-{id}"),
            port: 22,
        }
    }

    fn success(id: u64, elapsed_hours: f64, block_count: u64) -> PollResult {
        PollResult::new(
            id,
            PollStatus::Success(Metrics {
                elapsed_hours,
                block_count,
                raw_line: String::new(),
            }),
        )
    }

    #[test]
    fn test_rates_are_derived() {
        let snapshot = vec![descriptor(1, Some(0.5))];
        let results = vec![success(1, 2.0, 10)];
        let report = build_report(&results, &snapshot);

        let row = &report.rows[0];
        assert!((row.blocks_per_hour.unwrap() - 5.0).abs() < f64::EPSILON);
        assert!((row.blocks_per_dollar.unwrap() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_elapsed_yields_zero_rate() {
        let snapshot = vec![descriptor(1, Some(0.5))];
        let results = vec![success(1, 0.0, 10)];
        let report = build_report(&results, &snapshot);

        assert_eq!(report.rows[0].blocks_per_hour, Some(0.0));
        assert_eq!(report.rows[0].blocks_per_dollar, Some(0.0));
    }

    #[test]
    fn test_unknown_price_yields_zero_per_dollar() {
        let snapshot = vec![descriptor(1, None)];
        let results = vec![success(1, 2.0, 10)];
        let report = build_report(&results, &snapshot);

        assert!((report.rows[0].blocks_per_hour.unwrap() - 5.0).abs() < f64::EPSILON);
        assert_eq!(report.rows[0].blocks_per_dollar, Some(0.0));
    }

    #[test]
    fn test_zero_price_yields_zero_per_dollar() {
        let snapshot = vec![descriptor(1, Some(0.0))];
        let results = vec![success(1, 2.0, 10)];
        let report = build_report(&results, &snapshot);
        assert_eq!(report.rows[0].blocks_per_dollar, Some(0.0));
    }

    #[test]
    fn test_every_instance_appears_exactly_once() {
        let snapshot = vec![
            descriptor(3, Some(0.3)),
            descriptor(1, None),
            descriptor(2, Some(0.2)),
        ];
        let results = vec![
            success(1, 1.0, 4),
            PollResult::new(2, PollStatus::ConnectionFailure("timeout".into())),
            PollResult::new(3, PollStatus::ParseFailure("no match".into())),
        ];
        let report = build_report(&results, &snapshot);

        let ids: Vec<_> = report.rows.iter().map(|r| r.instance_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_instance_gets_blank_metrics() {
        let snapshot = vec![descriptor(1, Some(0.4))];
        let results = vec![PollResult::new(
            1,
            PollStatus::ConnectionFailure("unreachable".into()),
        )];
        let report = build_report(&results, &snapshot);

        let row = &report.rows[0];
        assert_eq!(row.elapsed_hours, None);
        assert_eq!(row.blocks_per_hour, None);
        assert_eq!(row.blocks_per_dollar, None);
        // directory facts survive the failure
        assert_eq!(row.gpu_name, "GPU-1");
        assert_eq!(row.price_per_hour, Some(0.4));
    }

    #[test]
    fn test_missing_result_still_yields_a_row() {
        // A result missing from the settled set must not drop the row
        let snapshot = vec![descriptor(1, None)];
        let report = build_report(&[], &snapshot);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].elapsed_hours, None);
    }

    #[test]
    fn test_empty_snapshot_empty_report() {
        let report = build_report(&[], &[]);
        assert!(report.rows.is_empty());
    }
}
