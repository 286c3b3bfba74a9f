use chrono::Utc;
use clap::Subcommand;
use worksession_core::format_duration;

use super::Host;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's focus time
    Today,
    /// All-time focus statistics
    All,
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let (host, mut controller) = Host::open()?;
    host.record(&controller.drain_events())?;

    let stats = host.db.focus_stats(host.config.focus_policy(), Utc::now())?;
    let out = match action {
        StatsAction::Today => serde_json::json!({
            "sessions": stats.today_sessions,
            "focus_ms": stats.today_focus_ms,
            "focus": format_duration(stats.today_focus_ms),
        }),
        StatsAction::All => {
            let mut value = serde_json::to_value(&stats)?;
            value["focus"] = format_duration(stats.focus_ms).into();
            value
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(host.deliver_alerts()?)
}
