mod auth;
mod binder;
mod blobs;
mod classroom;
mod comments;
mod db;
mod error;
mod forms;
mod guard;
mod ipc;
mod roles;
mod settings;
mod store;

use std::io::{self, BufRead, Write};

fn write_line(stdout: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
}

fn main() {
    // stdout carries the protocol, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    log::info!("classroomd {} starting", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin closed: {}", e);
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
                log::warn!("unparseable request line: {}", e);
                write_line(
                    &mut stdout,
                    &serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        // Listener events caused by this request go out ahead of its response.
        for event in state.take_events() {
            write_line(&mut stdout, &event);
        }
        write_line(&mut stdout, &resp);
        let _ = stdout.flush();
    }
    log::info!("classroomd exiting");
}
