//! Property tests for report aggregation

use fleetmon_core::models::{InstanceDescriptor, PollResult, PollStatus};
use fleetmon_core::report::build_report;
use proptest::prelude::*;

proptest! {
    /// Property: every snapshot instance appears in the report exactly once
    #[test]
    fn report_is_complete(ids in proptest::collection::hash_set(0u64..10_000, 0..50)) {
        let snapshot: Vec<_> = ids
            .iter()
            .map(|&id| InstanceDescriptor {
                id,
                gpu_name: "g".into(),
                price_per_hour: None,
                host: "h".into(),
                port: 22,
            })
            .collect();
        // half the fleet fails, half never reports
        let results: Vec<_> = snapshot
            .iter()
            .filter(|d| d.id % 2 == 0)
            .map(|d| PollResult::new(d.id, PollStatus::ConnectionFailure("down".into())))
            .collect();

        let report = build_report(&results, &snapshot);
        prop_assert_eq!(report.rows.len(), snapshot.len());
        let mut seen = std::collections::HashSet::new();
        for row in &report.rows {
            prop_assert!(seen.insert(row.instance_id));
            prop_assert!(ids.contains(&row.instance_id));
        }
    }
}
