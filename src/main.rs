mod backup;
mod db;
mod ipc;
mod payments;
mod results;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// School administration sidecar speaking JSON lines on stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "smartconnectd", version)]
struct Args {
    /// Workspace directory to open at startup.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()));

    let mut state = ipc::AppState::new();
    if let Some(path) = args.workspace.as_deref() {
        match ipc::open_workspace(&mut state, path) {
            Ok(()) => log::info!("opened workspace {}", path.to_string_lossy()),
            Err(e) => log::error!("failed to open workspace {}: {:#}", path.to_string_lossy(), e),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back.
                log::warn!("rejected malformed request: {}", e);
                serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("stdin closed, shutting down");
}
