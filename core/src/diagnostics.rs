//! Operator-facing diagnostics. Invariant violations and other conditions an
//! end user should never see are appended here as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

const MAX_LOG_BYTES: u64 = 1_500_000;
const MAX_MESSAGE_CHARS: usize = 2_000;

#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub ts: String,
    pub kind: String,
    pub message: String,
}

fn sanitize(input: &str) -> String {
    let flattened: String = input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let mut out = flattened.split_whitespace().collect::<Vec<_>>().join(" ");
    if out.chars().count() > MAX_MESSAGE_CHARS {
        out = out.chars().take(MAX_MESSAGE_CHARS).collect();
        out.push_str(" [truncated]");
    }
    out
}

pub fn log_event(log_dir: &Path, kind: &str, message: &str) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join("diagnostics.log");
    trim_log(&path)?;
    let event = LogEvent {
        ts: Utc::now().to_rfc3339(),
        kind: kind.to_string(),
        message: sanitize(message),
    };
    let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn trim_log(path: &PathBuf) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let meta = fs::metadata(path)?;
    if meta.len() <= MAX_LOG_BYTES {
        return Ok(());
    }
    let data = fs::read(path)?;
    let keep_from = data.len().saturating_sub((MAX_LOG_BYTES / 2) as usize);
    // start at a line boundary so every kept line is valid JSON
    let keep_from = data[keep_from..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|pos| keep_from + pos + 1)
        .unwrap_or(data.len());
    fs::write(path, &data[keep_from..])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_flattens_and_truncates() {
        let cleaned = sanitize("orphan ghost\nthread t1\tmessage m2");
        assert_eq!(cleaned, "orphan ghost thread t1 message m2");
        let long = "x".repeat(MAX_MESSAGE_CHARS + 10);
        assert!(sanitize(&long).ends_with("[truncated]"));
    }

    #[test]
    fn log_event_appends_json_lines() {
        let dir = tempdir().expect("temp");
        let log_dir = dir.path();
        for _ in 0..3 {
            log_event(log_dir, "invariant_violation", "ghost reply without real children").expect("log");
        }
        let contents = fs::read_to_string(log_dir.join("diagnostics.log")).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(parsed["kind"], "invariant_violation");
    }
}
