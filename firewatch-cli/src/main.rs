//! firewatch-cli: control and reporting client for a running Firewatch server
//!
//! # Subcommands
//! - `status`                             : server health, capture and detector state
//! - `start` / `stop`                     : enable/disable capture (opens/closes a session)
//! - `snapshot`                           : current fire/smoke counts
//! - `stats`                              : aggregate statistics
//! - `sessions [-n <limit>]`              : latest sessions
//! - `session <id>`                       : log rows of one session
//! - `range [--from DATE] [--to DATE]`    : sessions by start date
//!
//! Every subcommand accepts `--json` to print the raw server response.

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";
const DEFAULT_LIMIT: usize = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "firewatch-cli",
    version,
    about = "Firewatch fire/smoke monitor: control and reporting CLI"
)]
struct Cli {
    /// Firewatch HTTP server URL (overrides FIREWATCH_HTTP_URL env var)
    #[arg(long, env = "FIREWATCH_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server health
    Status,

    /// Start capture and open a detection session
    Start,

    /// Stop capture and close the active session
    Stop,

    /// Show the current detection counts
    Snapshot,

    /// Show aggregate statistics
    Stats,

    /// List the latest sessions
    Sessions {
        /// Maximum number of sessions to list
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Show the detection log of one session
    Session {
        /// Session id
        id: i64,
    },

    /// List sessions started within a date range (YYYY-MM-DD or RFC 3339)
    Range {
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub total_fire: i64,
    pub total_smoke: i64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct LogRow {
    pub timestamp: String,
    pub fire_count: i64,
    pub smoke_count: i64,
    pub alert_triggered: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatsResponse {
    pub total_sessions: i64,
    pub total_fire_detections: i64,
    pub total_smoke_detections: i64,
    pub recent_sessions: i64,
    pub avg_fire_per_session: f64,
    pub avg_smoke_per_session: f64,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotResponse {
    pub fire: u32,
    pub smoke: u32,
    pub timestamp: f64,
}

// ============================================================================
// Formatting
// ============================================================================

/// Trim an RFC 3339 timestamp to `YYYY-MM-DD HH:MM:SS`.
pub fn short_time(ts: &str) -> String {
    let cut: String = ts.chars().take(19).collect();
    cut.replacen('T', " ", 1)
}

pub fn format_sessions(rows: &[SessionRow]) -> String {
    if rows.is_empty() {
        return "No sessions.".to_string();
    }
    let mut out = format!(
        "{:>6}  {:<19}  {:<19}  {:>5}  {:>5}  {}\n",
        "ID", "START", "END", "FIRE", "SMOKE", "STATUS"
    );
    for r in rows {
        let end = r.end_time.as_deref().map(short_time).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:>6}  {:<19}  {:<19}  {:>5}  {:>5}  {}\n",
            r.id,
            short_time(&r.start_time),
            end,
            r.total_fire,
            r.total_smoke,
            r.status
        ));
    }
    out
}

pub fn format_logs(session_id: i64, rows: &[LogRow]) -> String {
    if rows.is_empty() {
        return format!("No log entries for session {}.", session_id);
    }
    let mut out = format!("{:<19}  {:>5}  {:>5}  {}\n", "TIME", "FIRE", "SMOKE", "ALERT");
    for r in rows {
        out.push_str(&format!(
            "{:<19}  {:>5}  {:>5}  {}\n",
            short_time(&r.timestamp),
            r.fire_count,
            r.smoke_count,
            if r.alert_triggered { "yes" } else { "no" }
        ));
    }
    out
}

pub fn format_stats(s: &StatsResponse) -> String {
    format!(
        "Sessions:          {} ({} in the last 24h)\n\
         Fire detections:   {} (avg {:.2} per session)\n\
         Smoke detections:  {} (avg {:.2} per session)",
        s.total_sessions,
        s.recent_sessions,
        s.total_fire_detections,
        s.avg_fire_per_session,
        s.total_smoke_detections,
        s.avg_smoke_per_session
    )
}

pub fn format_snapshot(s: &SnapshotResponse) -> String {
    let state = if s.fire > 0 || s.smoke > 0 { "ALERT" } else { "clear" };
    format!("fire={} smoke={} [{}] at {:.0}", s.fire, s.smoke, state, s.timestamp)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    server: String,
}

impl Api {
    fn new(server: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    /// GET `path` and decode the JSON body; non-2xx responses become errors
    /// carrying the server's `error` field.
    fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            let reason = body["error"].as_str().unwrap_or("no details");
            anyhow::bail!("server returned {}: {}", status, reason);
        }
        Ok(body)
    }
}

/// Print `body` raw with `--json`, otherwise through `render`.
fn emit(
    json: bool,
    body: serde_json::Value,
    render: impl FnOnce(serde_json::Value) -> anyhow::Result<String>,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", render(body)?.trim_end());
    }
    Ok(())
}

pub fn format_health(b: &serde_json::Value) -> String {
    let session = b["active_session"]
        .as_i64()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "Firewatch server: {}\n\
         Version:          {}\n\
         SQLite:           {}\n\
         Detector:         {}\n\
         Capturing:        {}\n\
         Active session:   {}\n\
         Camera connected: {}\n\
         Frames captured:  {} ({} dropped)",
        b["status"].as_str().unwrap_or("unknown"),
        b["version"].as_str().unwrap_or("?"),
        b["sqlite"].as_str().unwrap_or("?"),
        b["detector"].as_str().unwrap_or("?"),
        b["capturing"].as_bool().unwrap_or(false),
        session,
        b["capture"]["connected"].as_bool().unwrap_or(false),
        b["capture"]["frames_captured"].as_u64().unwrap_or(0),
        b["frames_dropped"].as_u64().unwrap_or(0),
    )
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.server)?;
    let json = cli.json;

    match cli.command {
        Commands::Status => emit(json, api.get("/health", &[])?, |b| Ok(format_health(&b))),
        Commands::Start => emit(json, api.get("/start", &[])?, |b| {
            let id = b["session_id"].as_i64().unwrap_or_default();
            Ok(if b["already_active"].as_bool().unwrap_or(false) {
                format!("Capture already running (session {})", id)
            } else {
                format!("Capture started (session {})", id)
            })
        }),
        Commands::Stop => emit(json, api.get("/stop", &[])?, |b| {
            Ok(match b["session_id"].as_i64() {
                Some(id) => format!("Capture stopped (session {} closed)", id),
                None => "Capture stopped (no active session)".to_string(),
            })
        }),
        Commands::Snapshot => emit(json, api.get("/detection_status", &[])?, |b| {
            Ok(format_snapshot(&serde_json::from_value(b)?))
        }),
        Commands::Stats => emit(json, api.get("/api/statistics", &[])?, |b| {
            Ok(format_stats(&serde_json::from_value(b)?))
        }),
        Commands::Sessions { limit } => {
            let body = api.get("/api/sessions", &[("limit", limit.to_string())])?;
            emit(json, body, |b| {
                Ok(format_sessions(&serde_json::from_value::<Vec<SessionRow>>(b)?))
            })
        }
        Commands::Session { id } => {
            let body = api.get(&format!("/api/session/{}", id), &[])?;
            emit(json, body, |b| {
                Ok(format_logs(id, &serde_json::from_value::<Vec<LogRow>>(b)?))
            })
        }
        Commands::Range { from, to } => {
            let mut query = Vec::new();
            if let Some(from) = from {
                query.push(("start_date", from));
            }
            if let Some(to) = to {
                query.push(("end_date", to));
            }
            let body = api.get("/api/reports/date-range", &query)?;
            emit(json, body, |b| {
                Ok(format_sessions(&serde_json::from_value::<Vec<SessionRow>>(b)?))
            })
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("firewatch-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
