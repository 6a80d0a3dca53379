//! Property tests for batch iteration and metric aggregation

use std::sync::{Arc, Mutex};

use cyclerun::config::ProcessConfig;
use cyclerun::events::{Event, EventKind, UnitCore};
use cyclerun::lifecycle::{Process, SourceIterator, SourceSet, VecSource};
use cyclerun::metric::{FlushTrigger, MetricAggregator};
use proptest::prelude::*;
use serde_json::json;

fn run_indices(len: usize, bound: Option<usize>, cycles: usize) -> Vec<usize> {
    let source = Arc::new(SourceIterator::new(
        "train",
        VecSource::new((0..len).map(|i| json!(i)).collect()),
    ));
    let process = Process::new(
        SourceSet::Fixed(vec![source]),
        &ProcessConfig {
            cycles,
            steps_per_cycle: bound,
            wrap_on_completion: false,
        },
    )
    .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    UnitCore::with_bus("recorder", process.bus())
        .subscribe(EventKind::BatchStarted, move |event| {
            if let Event::BatchStarted { batch_index, .. } = event {
                sink.lock().unwrap().push(*batch_index);
            }
            Ok(())
        })
        .unwrap();

    process.start().unwrap();
    let indices = log.lock().unwrap().clone();
    indices
}

proptest! {
    #[test]
    fn test_bounded_iteration_cycles_through_source(len in 1usize..8, bound in 1usize..12, cycles in 1usize..5) {
        let indices = run_indices(len, Some(bound), cycles);

        let expected: Vec<usize> = (0..bound * cycles).map(|k| k % len + 1).collect();
        prop_assert_eq!(indices, expected);
    }

    #[test]
    fn test_unbounded_iteration_is_one_pass_per_cycle(len in 1usize..8, cycles in 1usize..5) {
        let indices = run_indices(len, None, cycles);

        let expected: Vec<usize> = (0..cycles).flat_map(|_| 1..=len).collect();
        prop_assert_eq!(indices, expected);
    }

    #[test]
    fn test_flush_writes_sample_mean(values in prop::collection::vec(-1000.0f64..1000.0, 1..32)) {
        let aggregator = MetricAggregator::new(FlushTrigger::PerCycle);
        for value in &values {
            aggregator.record("loss", *value, 1, "train");
        }

        let table = aggregator.flush(1);

        let expected = values.iter().sum::<f64>() / values.len() as f64;
        prop_assert!((table["loss"][&1]["train"] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_flush_is_write_once(first in -10.0f64..10.0, late in -10.0f64..10.0) {
        let aggregator = MetricAggregator::new(FlushTrigger::PerCycle);
        aggregator.record("loss", first, 1, "valid");
        aggregator.flush(1);

        aggregator.record("loss", late, 1, "valid");
        let table = aggregator.flush(1);

        prop_assert_eq!(table["loss"][&1]["valid"], first);
    }
}
