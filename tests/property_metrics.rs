// tests/property_metrics.rs

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use pipeloop::engine::{
    AbortReason, Cycle, CycleOutcome, CycleScheduler, FailureController, MetricsStore,
};
use pipeloop::types::{FailureKind, FailureState};

#[derive(Debug, Clone, Copy)]
enum Event {
    Success,
    Failure,
    Abort,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Success),
        3 => Just(Event::Failure),
        1 => Just(Event::Abort),
    ]
}

fn cycle(index: u64, event: Event) -> Cycle {
    let now = Utc::now();
    let outcome = match event {
        Event::Success => CycleOutcome::Succeeded,
        Event::Failure => CycleOutcome::Failed {
            stage: "fetch".into(),
            kind: FailureKind::StageError,
            message: "boom".into(),
        },
        Event::Abort => CycleOutcome::Aborted {
            stage: None,
            reason: AbortReason::Forced,
        },
    };
    Cycle {
        index,
        started_at: now,
        ended_at: now,
        duration: Duration::from_millis(10),
        stages: Vec::new(),
        items_processed: 0,
        outcome,
    }
}

proptest! {
    #[test]
    fn counters_stay_consistent(events in prop::collection::vec(event(), 0..200), threshold in 1u32..8) {
        let mut store = MetricsStore::new(Utc::now(), 50);
        let mut failures = FailureController::new(threshold, Duration::from_secs(300));

        let mut streak = 0u32;
        let mut aborted = 0u64;
        for (i, ev) in events.iter().enumerate() {
            let c = cycle(i as u64 + 1, *ev);
            failures.record(&c.outcome);
            let snap = store.record_cycle(&c, failures.consecutive_failures(), failures.state());

            match ev {
                Event::Success => streak = 0,
                Event::Failure => streak += 1,
                Event::Abort => aborted += 1,
            }

            prop_assert_eq!(snap.cycles_total, snap.cycles_success + snap.cycles_failed);
            prop_assert_eq!(snap.cycles_aborted, aborted);
            prop_assert_eq!(snap.consecutive_failures, streak);
            prop_assert!(snap.recent_outcomes.len() <= 50);
            if let Some(rate) = snap.success_rate() {
                prop_assert!((0.0..=1.0).contains(&rate));
            }
            if matches!(ev, Event::Success) {
                prop_assert_eq!(snap.failure_state, FailureState::Normal);
            }
            if streak >= threshold {
                prop_assert_eq!(snap.failure_state, FailureState::Backoff);
            }
        }
    }

    #[test]
    fn scheduled_wait_never_exceeds_target(elapsed in -1_000.0f64..1_000.0, target_secs in 1u64..600) {
        let target = Duration::from_secs(target_secs);
        let wait = CycleScheduler::new(target).wait(elapsed);
        prop_assert!(wait.delay <= target);
        if elapsed >= target_secs as f64 {
            prop_assert_eq!(wait.delay, Duration::ZERO);
        }
    }
}
