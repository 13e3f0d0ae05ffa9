//! `hotswap status`: modules, bindings, and timers of the running runtime.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use hotswap_runtime::{request_status, RuntimeError, RuntimeStatus};

use super::home_dir;

/// Arguments for `hotswap status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let status = match request_status(&home) {
            Ok(status) => status,
            Err(RuntimeError::NotRunning { socket }) => {
                if self.json {
                    print_json(&NotRunning {
                        running: false,
                        socket: socket.display().to_string(),
                    })?;
                } else {
                    println!("hotswap runtime is not running ({})", socket.display());
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query runtime status"),
        };

        if self.json {
            return print_json(&status);
        }
        print_table(status, Utc::now());
        Ok(())
    }
}

#[derive(Serialize)]
struct NotRunning {
    running: bool,
    socket: String,
}

#[derive(Tabled)]
struct ModuleTableRow {
    #[tabled(rename = "")]
    indicator: String,
    #[tabled(rename = "module")]
    module: String,
    #[tabled(rename = "bound to")]
    bound_to: String,
    #[tabled(rename = "loads")]
    loads: u64,
    #[tabled(rename = "revision")]
    revision: String,
    #[tabled(rename = "last load")]
    last_load: String,
}

#[derive(Tabled)]
struct TimerTableRow {
    #[tabled(rename = "timer")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "delay")]
    delay: String,
    #[tabled(rename = "remaining")]
    remaining: String,
}

fn print_json(payload: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(payload).context("failed to render status JSON")?
    );
    Ok(())
}

fn print_table(report: RuntimeStatus, now: DateTime<Utc>) {
    let uptime = i64::try_from(report.started_at_unix)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|started| format_age(started, now))
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "hotswap v{} | up {} | {} modules | {} reloads | watcher {}",
        env!("CARGO_PKG_VERSION"),
        uptime.trim_end_matches(" ago"),
        report.modules.len(),
        report.reloads,
        if report.watching { "on".green() } else { "off".yellow() },
    );
    println!("Source root: {}", report.source_root.display());
    if report.full_reload_on_untracked {
        println!("{}", "Full reload on untracked changes is enabled.".yellow());
    }
    if let Some(target) = &report.last_target {
        println!("Last reload: {target}");
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} BOUND  {} CACHE ONLY",
        "■".green().bold(),
        "■".bright_black().bold(),
    );
    println!("{separator}");

    if report.modules.is_empty() {
        println!("No modules tracked.");
    } else {
        let rows: Vec<ModuleTableRow> = report
            .modules
            .into_iter()
            .map(|row| ModuleTableRow {
                indicator: if row.status.bound_to.is_some() {
                    "■".green().bold().to_string()
                } else {
                    "■".bright_black().bold().to_string()
                },
                module: row.status.id.to_string(),
                bound_to: row.status.bound_to.unwrap_or_else(|| "-".to_string()),
                loads: row.status.loads,
                revision: row
                    .revision
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                last_load: format_age(row.status.last_loaded_at, now),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !report.timers.is_empty() {
        println!("{separator}");
        let rows: Vec<TimerTableRow> = report
            .timers
            .into_iter()
            .map(|timer| TimerTableRow {
                name: timer.name.to_string(),
                kind: timer
                    .kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "external".to_string()),
                delay: format_millis(timer.delay_ms),
                remaining: format_millis(timer.remaining_ms),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn format_millis(ms: Option<u64>) -> String {
    match ms {
        None => "-".to_string(),
        Some(ms) if ms >= 1000 && ms % 1000 == 0 => format!("{}s", ms / 1000),
        Some(ms) => format!("{ms}ms"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn ages_use_the_largest_whole_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_age(now - Duration::seconds(125), now), "2m ago");
        assert_eq!(format_age(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_age(now + Duration::seconds(3), now), "0s ago");
    }

    #[test]
    fn millis_render_as_seconds_when_whole() {
        assert_eq!(format_millis(None), "-");
        assert_eq!(format_millis(Some(60_000)), "60s");
        assert_eq!(format_millis(Some(1_500)), "1500ms");
    }

    #[test]
    fn status_payload_parses_with_document_revisions() {
        let payload = serde_json::json!({
            "running": true,
            "started_at_unix": 1_700_000_000,
            "reloads": 3,
            "last_reload_at_unix": 1_700_000_100,
            "last_target": "commands/ping",
            "watching": true,
            "full_reload_on_untracked": false,
            "source_root": "/srv/bot/modules",
            "socket": "/home/dev/.hotswap/run/hotswap.sock",
            "modules": [{
                "id": "commands/ping",
                "loads": 4,
                "last_loaded_at": "2024-01-01T00:00:00Z",
                "bound_to": "documents.commands/ping",
                "revision": 4
            }],
            "timers": [{
                "name": "hotswap.heartbeat",
                "kind": "interval",
                "delay_ms": 60000,
                "remaining_ms": 12000,
                "args": [],
                "armed": true
            }]
        });
        let report: RuntimeStatus = serde_json::from_value(payload).expect("parse");
        assert_eq!(report.modules[0].revision, Some(4));
        assert_eq!(report.modules[0].status.loads, 4);
        assert_eq!(report.timers[0].delay_ms, Some(60_000));
    }
}
