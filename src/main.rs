mod backup;
mod calc;
mod db;
mod ipc;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let _ = writeln!(stdout, "{}", text);
    let _ = stdout.flush();
}

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
            }
            Err(e) => {
                // No request id to echo back; reply with a bare protocol error.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                write_line(&mut stdout, &resp);
            }
        }
    }
}
