use serde::Serialize;
use taskdesk_core::models::{RemoteSyncStats, SyncReport, SyncStats};
use taskdesk_core::remote::RemoteStore;
use taskdesk_core::TaskDesk;

use crate::commands::common::format_sync_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutput {
    report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleaned_up: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsOutput {
    local: SyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<RemoteSyncStats>,
}

pub async fn run_sync<R: RemoteStore>(
    desk: &TaskDesk<R>,
    cleanup: bool,
    as_json: bool,
) -> Result<Option<SyncReport>, CliError> {
    let report = desk.force_sync().await?;
    let cleaned_up = if cleanup {
        Some(desk.remote_cleanup().await?)
    } else {
        None
    };

    if as_json {
        let output = SyncOutput {
            report: report.clone(),
            cleaned_up,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(report);
    }

    match &report {
        Some(report) => {
            for line in format_report_lines(report) {
                println!("{line}");
            }
        }
        None => println!("A sync is already running; skipped."),
    }
    if let Some(evicted) = cleaned_up {
        println!("Remote cleanup removed {evicted} task(s) past the TTL");
    }
    Ok(report)
}

pub async fn run_stats<R: RemoteStore>(
    desk: &TaskDesk<R>,
    include_remote: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let local = desk.stats()?;
    let remote = if include_remote {
        Some(desk.remote_stats().await?)
    } else {
        None
    };

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&StatsOutput { local, remote })?
        );
        return Ok(());
    }

    for line in format_stats_lines(&local) {
        println!("{line}");
    }
    if let Some(remote) = remote {
        println!(
            "Remote: {} task(s), {} past the {}-day TTL",
            remote.total_tasks, remote.old_tasks, remote.ttl_days
        );
        if let Some(next_cleanup) = remote.next_cleanup {
            println!("Next remote cleanup: {next_cleanup}");
        }
    }
    Ok(())
}

pub fn run_reset_cache<R: RemoteStore>(desk: &TaskDesk<R>) -> Result<(), CliError> {
    desk.reset_local_cache()?;
    println!("Local cache cleared");
    Ok(())
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    vec![
        format!(
            "Sync completed at {}",
            format_sync_timestamp(report.finished_at)
        ),
        format!(
            "  pulled {}  added {}  updated {}  pushed {}",
            report.pulled, report.added, report.updated, report.pushed
        ),
        format!(
            "  deletes sent {}  user changes sent {}",
            report.deleted, report.users_flushed
        ),
    ]
}

pub fn format_stats_lines(stats: &SyncStats) -> Vec<String> {
    let last_sync = stats
        .last_sync
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    let next_sync = stats.next_sync_in_ms.map_or_else(
        || "now".to_string(),
        |remaining| format!("in {}s", remaining / 1000),
    );

    let mut lines = vec![
        format!("Device: {}", stats.device_id),
        format!(
            "Cached: {} user(s) [{}], {} task(s) [{}]",
            stats.cached_users, stats.users_state, stats.cached_tasks, stats.tasks_state
        ),
        format!("Last sync: {last_sync} (next {next_sync})"),
        format!("Queued changes: {}", stats.pending_ops),
        format!(
            "Local storage: {} bytes, remote TTL {} day(s)",
            stats.bytes_used, stats.ttl_days
        ),
    ];
    if stats.offline_too_long {
        lines.push("Warning: this device has not synced for a long time".to_string());
    }
    lines
}
