use std::time::Duration;

use clap::Subcommand;
use worksession_core::{Config, Event, SessionController, SessionRuntime, SessionState};

use super::Host;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a work session for a task
    Start {
        /// Task the session is bound to
        #[arg(long)]
        task: String,
        /// Planned minutes (added to --hours)
        #[arg(long)]
        minutes: Option<u32>,
        /// Planned hours
        #[arg(long)]
        hours: Option<u32>,
        /// One of the configured duration presets, in minutes
        #[arg(long, conflicts_with_all = ["minutes", "hours"])]
        preset: Option<u32>,
    },
    /// Pause the running session
    Pause,
    /// Resume a paused session
    Resume,
    /// End the session now, keeping the time worked
    End,
    /// Drop the session without recording it
    Reset,
    /// Print the current session state as JSON
    Status,
    /// Acknowledge a completed session
    Ack,
    /// Follow the countdown until the session stops running
    Watch,
}

fn planned_duration(
    config: &Config,
    minutes: Option<u32>,
    hours: Option<u32>,
    preset: Option<u32>,
) -> Result<Duration, Box<dyn std::error::Error>> {
    let total_minutes = match (preset, hours, minutes) {
        (Some(p), _, _) => {
            if !config.session.duration_presets.contains(&p) {
                return Err(format!(
                    "{p} is not a configured preset (available: {:?})",
                    config.session.duration_presets
                )
                .into());
            }
            u64::from(p)
        }
        (None, None, None) => return Ok(Duration::from_millis(config.default_planned_ms())),
        (None, h, m) => u64::from(h.unwrap_or(0)) * 60 + u64::from(m.unwrap_or(0)),
    };
    Ok(Duration::from_secs(total_minutes * 60))
}

fn print_json(event: &Event) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(event)?);
    Ok(())
}

/// Apply one command. Returns a snapshot to print after the events, if the
/// command is a query.
fn execute(
    host: &Host,
    controller: &mut SessionController,
    action: SessionAction,
) -> Result<Option<Event>, Box<dyn std::error::Error>> {
    match action {
        SessionAction::Start {
            task,
            minutes,
            hours,
            preset,
        } => {
            let planned = planned_duration(&host.config, minutes, hours, preset)?;
            controller.start(task, planned)?;
        }
        SessionAction::Pause => {
            controller.pause()?;
        }
        SessionAction::Resume => {
            controller.resume()?;
        }
        SessionAction::End => {
            controller.end()?;
        }
        SessionAction::Reset => {
            controller.reset()?;
        }
        SessionAction::Ack => {
            controller.acknowledge()?;
        }
        SessionAction::Status | SessionAction::Watch => return Ok(Some(controller.snapshot())),
    }
    Ok(None)
}

pub fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    let (host, mut controller) = Host::open()?;
    if matches!(action, SessionAction::Watch) {
        return watch(&host, controller);
    }

    let outcome = execute(&host, &mut controller, action);

    // Completions found while opening are recorded even if the command failed.
    let events = controller.drain_events();
    host.record(&events)?;
    for event in &events {
        print_json(event)?;
    }
    if let Ok(Some(snapshot)) = &outcome {
        print_json(snapshot)?;
    }
    host.deliver_alerts()?;

    outcome.map(drop)
}

fn watch(host: &Host, controller: SessionController) -> Result<(), Box<dyn std::error::Error>> {
    let tick = Duration::from_millis(host.config.session.tick_interval_ms);
    let mut runtime = SessionRuntime::new(controller, tick);
    let rt = tokio::runtime::Runtime::new()?;

    let last = rt.block_on(async {
        runtime.reconcile().await?;
        let mut updates = runtime.subscribe();
        let mut shown = String::new();
        loop {
            let snapshot = (*updates.borrow_and_update()).clone();
            if let Event::StateSnapshot { state, display, .. } = snapshot {
                if display != shown {
                    eprint!("\r{display}");
                    shown = display;
                }
                if state != SessionState::Running {
                    break;
                }
            }
            if updates.changed().await.is_err() {
                break;
            }
        }
        eprintln!();
        runtime.suspend().await;
        Ok::<_, worksession_core::SessionError>(runtime.snapshot())
    })?;

    let events = runtime.drain_events();
    host.record(&events)?;
    for event in &events {
        print_json(event)?;
    }
    print_json(&last)?;
    Ok(host.deliver_alerts()?)
}
