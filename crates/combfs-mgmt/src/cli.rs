use crate::alerts::Alert;
use crate::api::{StatusSummary, WatermarkView};
use crate::expansion::ExpansionStatus;
use crate::tracker::TaskStats;
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// combfs-mgmt command line.
#[derive(Parser)]
#[command(name = "combfs-mgmt")]
#[command(about = "combfs maintenance monitor and admin CLI", long_about = None)]
pub struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8443")]
    pub server: String,

    /// Admin bearer token
    #[arg(short, long, env = "COMBFS_ADMIN_TOKEN")]
    pub token: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the monitor loop and the admin API
    Serve {
        /// Config file, TOML or JSON
        #[arg(short, long, default_value = "/etc/combfs/mgmt.toml")]
        config: PathBuf,
    },
    /// Show monitor status
    Status,
    /// List statistics for every task
    Tasks,
    /// Show one task by label or numeric id
    Task {
        /// Task label or id
        name: String,
    },
    /// Show the query integrity watermark
    Watermark,
    /// Start or inspect the cluster expansion
    Expansion {
        /// Expansion action
        #[command(subcommand)]
        cmd: ExpansionCmd,
    },
    /// Clear the sys-cache task's previous completion time
    ResetSysCache,
    /// Show recent external alerts
    Alerts {
        /// Maximum alerts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Expansion subcommands.
#[derive(Subcommand, Clone, Copy)]
pub enum ExpansionCmd {
    /// Start the expansion
    Start,
    /// Show the expansion state
    Status,
}

impl Cli {
    /// Runs the selected subcommand.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { .. } => {
                anyhow::bail!("serve is started by the combfs-mgmt binary entry point")
            }
            Command::Status => self.status().await,
            Command::Tasks => self.tasks().await,
            Command::Task { ref name } => self.task(name).await,
            Command::Watermark => self.watermark().await,
            Command::Expansion { cmd } => self.expansion(cmd).await,
            Command::ResetSysCache => self.reset_sys_cache().await,
            Command::Alerts { limit } => self.alerts(limit).await,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorized(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
            {
                Some(err) => anyhow::bail!("Request failed: {}: {}", status, err),
                None => anyhow::bail!("Request failed: {}", status),
            }
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let client = Client::new();
        self.send(client.get(format!("{}{}", self.server, path))).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let client = Client::new();
        self.send(client.post(format!("{}{}", self.server, path))).await
    }

    async fn status(&self) -> Result<()> {
        let status: StatusSummary = self.get("/api/v1/status").await?;

        println!("Ready: {}", status.ready);
        println!("Quorum: {}", if status.has_quorum { "yes" } else { "no" });
        println!("Monitor passes: {}", status.ticks);
        println!("Last pass: {}", format_timestamp(status.last_tick_at));
        println!(
            "Query integrity time: {}",
            format_timestamp(status.query_integrity_time)
        );
        print_expansion(&status.expansion);
        Ok(())
    }

    async fn tasks(&self) -> Result<()> {
        let tasks: Vec<TaskStats> = self.get("/api/v1/tasks").await?;

        println!(
            "{:<4} {:<22} {:<26} {:>8} {:>10} {:>8} {:>6}",
            "ID", "TASK", "LAST COMPLETION", "PCT", "SLOWEST", "ERRORS", "CELLS"
        );
        println!("{}", "-".repeat(90));
        for t in tasks {
            println!(
                "{:<4} {:<22} {:<26} {:>8} {:>10} {:>8} {:>6}",
                t.task_id,
                t.task.label(),
                format_timestamp(t.completion_time),
                format_percent(t.completion_percent),
                format_duration(t.slowest_disk_time),
                t.error_count,
                t.live_cells
            );
        }
        Ok(())
    }

    async fn task(&self, name: &str) -> Result<()> {
        let t: TaskStats = self.get(&format!("/api/v1/tasks/{}", name)).await?;

        println!("Task: {} (id {})", t.task, t.task_id);
        println!("Completed: {}", format_timestamp(t.completion_time));
        println!(
            "Previously completed: {}",
            format_timestamp(t.previous_completion_time)
        );
        println!("Slowest disk: {}", format_duration(t.slowest_disk_time));
        println!("Fastest disk: {}", format_duration(t.fastest_disk_time));
        println!("Average disk: {}", format_duration(t.average_disk_time));
        println!("Errors: {}", t.error_count);
        println!("Progress: {}", format_percent(t.completion_percent));
        println!("Generation: {}", t.generation);
        println!("Live cells: {}", t.live_cells);
        if t.task.is_aggregator() {
            println!("Run start: {}", format_timestamp(t.super_run_start));
            println!("Cycle start: {}", format_timestamp(t.super_cycle_start));
        }
        Ok(())
    }

    async fn watermark(&self) -> Result<()> {
        let w: WatermarkView = self.get("/api/v1/watermark").await?;

        println!(
            "Query integrity time: {}",
            format_timestamp(w.query_integrity_time)
        );
        println!(
            "Saved query integrity time: {}",
            format_timestamp(w.saved_query_integrity_time)
        );
        Ok(())
    }

    async fn expansion(&self, cmd: ExpansionCmd) -> Result<()> {
        let status: ExpansionStatus = match cmd {
            ExpansionCmd::Start => self.post("/api/v1/expansion/start").await?,
            ExpansionCmd::Status => self.get("/api/v1/expansion").await?,
        };
        print_expansion(&status);
        Ok(())
    }

    async fn reset_sys_cache(&self) -> Result<()> {
        let t: TaskStats = self.post("/api/v1/sys-cache/reset").await?;

        println!("Reset previous completion of {}", t.task);
        println!("Completed: {}", format_timestamp(t.completion_time));
        Ok(())
    }

    async fn alerts(&self, limit: usize) -> Result<()> {
        let alerts: Vec<Alert> = self.get("/api/v1/alerts").await?;

        if alerts.is_empty() {
            println!("No alerts");
            return Ok(());
        }
        let skip = alerts.len().saturating_sub(limit);
        for alert in alerts.into_iter().skip(skip) {
            println!(
                "{:<26} {:<8} {}",
                format_timestamp(alert.timestamp),
                format!("{:?}", alert.severity).to_uppercase(),
                alert.message
            );
        }
        Ok(())
    }
}

fn print_expansion(status: &ExpansionStatus) {
    println!("Expansion: {}", status.state);
    if status.start_time > 0 {
        println!("Expansion started: {}", format_timestamp(status.start_time));
    }
    if status.masked_disks > 0 {
        println!("Disks in mask: {}", status.masked_disks);
    }
}

/// Epoch milliseconds as RFC 3339; zero means "never".
pub fn format_timestamp(ms: i64) -> String {
    if ms <= 0 {
        return "never".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Milliseconds as a short human duration.
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn format_percent(pct: Option<f64>) -> String {
    match pct {
        Some(p) => format!("{:.1}%", p),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_status_subcommand() {
        let cli = Cli::parse_from(["combfs-mgmt", "status"]);
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.server, "http://localhost:8443");
    }

    #[test]
    fn test_cli_task_subcommand() {
        let cli = Cli::parse_from(["combfs-mgmt", "task", "recover-lost-frags"]);
        match &cli.command {
            Command::Task { name } => assert_eq!(name, "recover-lost-frags"),
            _ => panic!("Expected Task command"),
        }
    }

    #[test]
    fn test_cli_expansion_subcommands() {
        let cli = Cli::parse_from(["combfs-mgmt", "expansion", "start"]);
        assert!(matches!(
            cli.command,
            Command::Expansion {
                cmd: ExpansionCmd::Start
            }
        ));
        let cli = Cli::parse_from(["combfs-mgmt", "expansion", "status"]);
        assert!(matches!(
            cli.command,
            Command::Expansion {
                cmd: ExpansionCmd::Status
            }
        ));
    }

    #[test]
    fn test_cli_reset_sys_cache_and_alerts() {
        let cli = Cli::parse_from(["combfs-mgmt", "reset-sys-cache"]);
        assert!(matches!(cli.command, Command::ResetSysCache));
        let cli = Cli::parse_from(["combfs-mgmt", "alerts", "--limit", "5"]);
        assert!(matches!(cli.command, Command::Alerts { limit: 5 }));
    }

    #[test]
    fn test_cli_serve_with_config_and_token() {
        let cli = Cli::parse_from([
            "combfs-mgmt",
            "--server",
            "http://mgmt:9000",
            "--token",
            "abc",
            "serve",
            "--config",
            "/tmp/mgmt.toml",
        ]);
        assert_eq!(cli.server, "http://mgmt:9000");
        assert_eq!(cli.token.as_deref(), Some("abc"));
        match cli.command {
            Command::Serve { config } => assert_eq!(config, PathBuf::from("/tmp/mgmt.toml")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "never");
        assert_eq!(format_timestamp(-5), "never");
        assert_eq!(format_timestamp(1_000), "1970-01-01T00:00:01Z");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59_999), "59s");
        assert_eq!(format_duration(61_000), "1m01s");
        assert_eq!(format_duration(3_723_000), "1h02m03s");
        assert_eq!(format_duration(-10), "0s");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(None), "-");
        assert_eq!(format_percent(Some(37.26)), "37.3%");
    }
}
