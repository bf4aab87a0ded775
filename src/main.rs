mod activity;
mod admin;
mod assistant;
mod backup;
mod config;
mod db;
mod error;
mod exchange;
mod history;
mod ids;
mod ipc;
mod model;
mod persist;
mod store;

use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

use crate::assistant::HttpChatService;
use crate::config::Config;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let config = Config::parse();
    init_tracing(&config);

    let chat = HttpChatService::new(&config.api_base, config.request_timeout());
    let mut state = ipc::AppState::new(config.clone(), Box::new(chat));

    if let Some(path) = config.workspace.clone() {
        if let Err(e) = state.select_workspace(path) {
            tracing::error!(error = %format!("{e:#}"), "configured workspace could not be opened");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lessonbookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
