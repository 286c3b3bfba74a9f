//! Property tests over random command sequences.
//!
//! The clock only moves forward here; backwards clocks are covered by the
//! controller's unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use uuid::Uuid;
use worksession_core::notify::RecordingScheduler;
use worksession_core::{
    CompletionKind, ControllerState, Event, ManualClock, MemorySnapshotStore, SessionController,
    SessionSnapshot, SessionState,
};

#[derive(Debug, Clone)]
enum Op {
    Start(u64),
    Pause,
    Resume,
    End,
    Tick,
    Reconcile,
    Advance(i64),
    Relaunch,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=30).prop_map(Op::Start),
        Just(Op::Pause),
        Just(Op::Resume),
        Just(Op::End),
        Just(Op::Tick),
        Just(Op::Reconcile),
        (0i64..=900).prop_map(Op::Advance),
        Just(Op::Relaunch),
    ]
}

struct World {
    clock: ManualClock,
    store: MemorySnapshotStore,
    controller: SessionController,
    completions: HashMap<Uuid, usize>,
}

impl World {
    fn new() -> Self {
        let clock = ManualClock::starting_now();
        let store = MemorySnapshotStore::new();
        let controller = launch(&clock, &store);
        Self {
            clock,
            store,
            controller,
            completions: HashMap::new(),
        }
    }

    fn collect(&mut self) {
        for event in self.controller.drain_events() {
            if let Event::SessionCompleted { session, .. } = event {
                *self.completions.entry(session.id).or_default() += 1;
            }
        }
    }
}

fn launch(clock: &ManualClock, store: &MemorySnapshotStore) -> SessionController {
    SessionController::new(
        Arc::new(clock.clone()),
        Box::new(store.clone()),
        Box::new(RecordingScheduler::new()),
    )
    .open()
}

fn check_budget(state: &ControllerState) -> Result<(), TestCaseError> {
    if let Some(session) = state.session() {
        prop_assert!(session.accumulated_ms <= session.planned_ms);
    }
    if let ControllerState::Completed { session, .. } = state {
        let expired = session.completion == Some(CompletionKind::Expired);
        prop_assert_eq!(expired, session.accumulated_ms == session.planned_ms);
        prop_assert!(session.completed_at.is_some());
    }
    Ok(())
}

proptest! {
    #[test]
    fn command_sequences_keep_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut world = World::new();

        for op in ops {
            let before_state = world.controller.tag();
            let before_remaining = world.controller.remaining_ms();

            match op {
                Op::Start(minutes) => {
                    world.controller.start("task", Duration::from_secs(minutes * 60)).unwrap();
                }
                Op::Pause => { let _ = world.controller.pause(); }
                Op::Resume => { let _ = world.controller.resume(); }
                Op::End => { let _ = world.controller.end(); }
                Op::Tick => { world.controller.tick().unwrap(); }
                Op::Reconcile => { world.controller.reconcile().unwrap(); }
                Op::Advance(secs) => {
                    world.clock.advance_secs(secs);
                    let after = world.controller.remaining_ms();
                    match before_state {
                        SessionState::Running => prop_assert!(after <= before_remaining),
                        _ => prop_assert_eq!(after, before_remaining),
                    }
                }
                Op::Relaunch => {
                    world.collect();
                    world.controller = launch(&world.clock, &world.store);
                    let after_state = world.controller.tag();
                    let expired_while_away = before_state == SessionState::Running
                        && before_remaining == 0
                        && after_state == SessionState::Completed;
                    prop_assert!(after_state == before_state || expired_while_away);
                    prop_assert_eq!(world.controller.remaining_ms(), before_remaining);
                }
            }

            world.collect();
            check_budget(world.controller.state())?;
            if let Some(session) = world.controller.session() {
                prop_assert!(world.controller.remaining_ms() <= session.planned_ms);
            }
        }

        prop_assert!(world.completions.values().all(|n| *n == 1));
    }

    #[test]
    fn committed_snapshot_restores_same_state(
        minutes in 1u64..=120,
        worked_secs in 0i64..=7200,
        pause in any::<bool>(),
    ) {
        let clock = ManualClock::starting_now();
        let store = MemorySnapshotStore::new();
        let mut controller = launch(&clock, &store);
        controller.start("task", Duration::from_secs(minutes * 60)).unwrap();
        clock.advance_secs(worked_secs);
        if pause {
            let _ = controller.pause();
        } else {
            controller.reconcile().unwrap();
        }

        let blob = store.blob().unwrap();
        let restored = SessionSnapshot::decode(&blob).unwrap().into_state().unwrap();
        prop_assert_eq!(&restored, controller.state());
    }
}
