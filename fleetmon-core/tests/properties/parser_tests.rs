//! Property tests for the log-line parser

use fleetmon_core::parser::{CounterLabel, LogLineParser, ParseError, strip_ansi};
use proptest::prelude::*;

/// Strategy for valid elapsed-time triples
fn valid_triple() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..10_000, 0u64..60, 0u64..60)
}

proptest! {
    /// Property: elapsed hours follow the formula exactly, no truncation
    #[test]
    fn elapsed_hours_formula_holds((h, m, s) in valid_triple(), count in 0u64..1_000_000) {
        let line = format!("Mining: 1 Blocks [{h:02}:{m:02}:{s:02}, Details=normal:{count}]");
        let parsed = LogLineParser::default().parse(&line).unwrap();

        let expected = h as f64 + m as f64 / 60.0 + s as f64 / 3600.0;
        prop_assert!((parsed.metrics.elapsed_hours - expected).abs() < 1e-9);
        prop_assert_eq!(parsed.metrics.block_count, count);
    }

    /// Property: out-of-range minutes or seconds never parse
    #[test]
    fn out_of_range_components_rejected(
        h in 0u64..100,
        m in 60u64..1000,
        s in 0u64..60,
    ) {
        let line = format!("Mining: x [{h}:{m}:{s:02}, Details=normal:1]");
        let err = LogLineParser::default().parse(&line).unwrap_err();
        prop_assert!(
            matches!(err, ParseError::NoMatch { .. }),
            "expected ParseError::NoMatch, got {err:?}"
        );
    }

    /// Property: lines without a recognized counter token never yield metrics
    #[test]
    fn no_counter_no_metrics(filler in "[a-zA-Z0-9 .,=/]{0,60}") {
        let line = format!("Mining: x [01:02:03, {filler}]");
        // the filler may not accidentally spell a labeled counter
        prop_assume!(!line.contains("normal:") && !line.contains("xuni:"));
        let err = LogLineParser::default().parse(&line).unwrap_err();
        prop_assert!(
            matches!(err, ParseError::NoMatch { .. }),
            "expected ParseError::NoMatch, got {err:?}"
        );
    }

    /// Property: parsing the same line twice is bit-identical
    #[test]
    fn parse_is_idempotent((h, m, s) in valid_triple(), count in 0u64..1_000_000) {
        let line = format!("\x1b[33mMining: 1 Blocks [{h}:{m:02}:{s:02}, Details=xuni:{count}]");
        let parser = LogLineParser::default();
        let a = parser.parse(&line).unwrap();
        let b = parser.parse(&line).unwrap();
        prop_assert_eq!(a.metrics, b.metrics);
        prop_assert_eq!(a.label, CounterLabel::Xuni);
    }

    /// Property: ANSI stripping is idempotent over arbitrary input
    #[test]
    fn strip_is_idempotent(input in "\\PC{0,120}") {
        let once = strip_ansi(&input);
        let twice = strip_ansi(&once);
        prop_assert_eq!(once, twice);
    }

    /// Property: stripping never alters escape-free text
    #[test]
    fn strip_preserves_plain_text(input in "[a-zA-Z0-9 :,.\\[\\]=]{0,120}") {
        prop_assert_eq!(strip_ansi(&input), input);
    }
}
