//! Async host for a [`SessionController`].
//!
//! Drives the display tick loop on tokio and serializes every command with
//! it. The loop only runs while a session is running; it is stopped before
//! any command touches the controller and restarted afterwards, so a tick can
//! never interleave with a transition.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::Event;
use crate::session::{SessionController, SessionState};

type Shared = Arc<Mutex<SessionController>>;

struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SessionRuntime {
    controller: Shared,
    tick_interval: Duration,
    updates: watch::Sender<Event>,
    ticker: Option<Ticker>,
}

impl SessionRuntime {
    /// Wrap an opened controller. No loop runs until the first command or
    /// [`reconcile`](Self::reconcile).
    pub fn new(controller: SessionController, tick_interval: Duration) -> Self {
        let (updates, _) = watch::channel(controller.snapshot());
        Self {
            controller: Arc::new(Mutex::new(controller)),
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            updates,
            ticker: None,
        }
    }

    /// Latest `StateSnapshot`, refreshed on every tick and command.
    pub fn subscribe(&self) -> watch::Receiver<Event> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> Event {
        lock(&self.controller).snapshot()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.controller).tag()
    }

    pub fn drain_events(&self) -> Vec<Event> {
        lock(&self.controller).drain_events()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub async fn start(
        &mut self,
        task_id: impl Into<String>,
        planned: Duration,
    ) -> Result<Event, SessionError> {
        let task_id = task_id.into();
        self.apply(move |c| c.start(task_id, planned)).await
    }

    pub async fn pause(&mut self) -> Result<Event, SessionError> {
        self.apply(SessionController::pause).await
    }

    pub async fn resume(&mut self) -> Result<Event, SessionError> {
        self.apply(SessionController::resume).await
    }

    pub async fn end(&mut self) -> Result<Event, SessionError> {
        self.apply(SessionController::end).await
    }

    pub async fn reset(&mut self) -> Result<Event, SessionError> {
        self.apply(SessionController::reset).await
    }

    pub async fn acknowledge(&mut self) -> Result<Event, SessionError> {
        self.apply(SessionController::acknowledge).await
    }

    /// Call when the host comes back to the foreground. Pre-empts the loop,
    /// catches up on anything that happened while away and restarts ticking
    /// if the session is still running.
    pub async fn reconcile(&mut self) -> Result<Option<Event>, SessionError> {
        self.apply(SessionController::reconcile).await
    }

    /// Stop ticking, e.g. when the host goes to the background. The session
    /// keeps running on the wall clock.
    pub async fn suspend(&mut self) {
        self.stop_ticker().await;
    }

    async fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut SessionController) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.stop_ticker().await;
        let (result, snapshot) = {
            let mut controller = lock(&self.controller);
            let result = op(&mut controller);
            (result, controller.snapshot())
        };
        self.updates.send_replace(snapshot);
        self.ensure_ticker();
        result
    }

    async fn stop_ticker(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        // The loop may already have exited after a completion.
        let _ = ticker.stop.send(());
        if let Err(e) = ticker.handle.await {
            warn!(error = %e, "tick loop ended abnormally");
        }
    }

    fn ensure_ticker(&mut self) {
        if self.is_ticking() || self.state() != SessionState::Running {
            return;
        }
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.controller),
            self.updates.clone(),
            self.tick_interval,
            stopped,
        ));
        self.ticker = Some(Ticker { stop, handle });
    }
}

async fn tick_loop(
    controller: Shared,
    updates: watch::Sender<Event>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(period_ms = period.as_millis() as u64, "tick loop started");

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = interval.tick() => {
                let (outcome, state, snapshot) = {
                    let mut c = lock(&controller);
                    let outcome = c.tick();
                    (outcome, c.tag(), c.snapshot())
                };
                updates.send_replace(snapshot);
                match outcome {
                    Ok(Some(_)) => info!("session completed; tick loop stopping"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "completion not committed; retrying next tick"),
                }
                if state != SessionState::Running {
                    break;
                }
            }
        }
    }
    debug!("tick loop stopped");
}

fn lock(controller: &Shared) -> MutexGuard<'_, SessionController> {
    controller.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::RecordingScheduler;
    use crate::storage::MemorySnapshotStore;

    fn runtime(clock: &ManualClock) -> SessionRuntime {
        let controller = SessionController::new(
            Arc::new(clock.clone()),
            Box::new(MemorySnapshotStore::new()),
            Box::new(RecordingScheduler::new()),
        )
        .open();
        SessionRuntime::new(controller, Duration::from_millis(100))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<Event>,
        pred: impl Fn(&Event) -> bool,
    ) -> Event {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return (*rx.borrow()).clone();
                }
                rx.changed().await.unwrap();
            }
        })
        .await;
        found.unwrap()
    }

    fn remaining(event: &Event) -> Option<u64> {
        match event {
            Event::StateSnapshot { remaining_ms, .. } => Some(*remaining_ms),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_wall_clock_remaining() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        let mut rx = rt.subscribe();

        rt.start("task-1", Duration::from_secs(600)).await.unwrap();
        assert!(rt.is_ticking());

        clock.advance_secs(30);
        let seen = wait_for(&mut rx, |e| remaining(e) == Some(570_000)).await;
        assert!(matches!(seen, Event::StateSnapshot { state: SessionState::Running, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_completes_and_stops() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        let mut rx = rt.subscribe();

        rt.start("task-1", Duration::from_secs(60)).await.unwrap();
        clock.advance_secs(61);
        wait_for(&mut rx, |e| {
            matches!(e, Event::StateSnapshot { state: SessionState::Completed, .. })
        })
        .await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!rt.is_ticking());
        let completions = rt.drain_events().iter().filter(|e| e.is_completion()).count();
        assert_eq!(completions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_only_runs_while_running() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        assert!(!rt.is_ticking());

        rt.start("task-1", Duration::from_secs(600)).await.unwrap();
        rt.pause().await.unwrap();
        assert!(!rt.is_ticking());

        rt.resume().await.unwrap();
        assert!(rt.is_ticking());

        rt.end().await.unwrap();
        assert!(!rt.is_ticking());
        assert_eq!(rt.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_after_suspension_completes_once() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        rt.start("task-1", Duration::from_secs(120)).await.unwrap();
        rt.suspend().await;
        assert!(!rt.is_ticking());

        clock.advance_secs(600);
        assert!(rt.reconcile().await.unwrap().is_some());
        assert_eq!(rt.reconcile().await.unwrap(), None);
        assert!(!rt.is_ticking());

        let completions = rt.drain_events().iter().filter(|e| e.is_completion()).count();
        assert_eq!(completions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_restarts_ticking_for_running_session() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        rt.start("task-1", Duration::from_secs(600)).await.unwrap();
        rt.suspend().await;

        clock.advance_secs(60);
        assert_eq!(rt.reconcile().await.unwrap(), None);
        assert!(rt.is_ticking());
        assert_eq!(remaining(&rt.snapshot()), Some(540_000));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_keeps_ticking() {
        let clock = ManualClock::starting_now();
        let mut rt = runtime(&clock);
        rt.start("task-1", Duration::from_secs(600)).await.unwrap();

        assert!(rt.resume().await.is_err());
        assert!(rt.is_ticking());
    }
}
