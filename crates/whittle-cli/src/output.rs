use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use whittle_core::runtime_dir;
use whittle_http::ProgressSink;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Progress sink for interactive runs: events go to stderr when verbose,
/// warnings always; everything is appended to the workspace run log.
pub(crate) struct StderrSink {
    verbose: bool,
    log_path: Option<PathBuf>,
}

impl StderrSink {
    pub(crate) fn new(workspace: &Path, verbose: bool) -> Self {
        let dir = runtime_dir(workspace);
        let log_path = fs::create_dir_all(&dir)
            .ok()
            .map(|_| dir.join("whittle.log"));
        Self { verbose, log_path }
    }

    fn append_log_line(&self, line: &str) {
        let Some(path) = &self.log_path else {
            return;
        };
        let _ = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{} {line}", Utc::now().to_rfc3339()));
    }
}

impl ProgressSink for StderrSink {
    fn event(&self, message: &str) {
        if self.verbose {
            eprintln!("[whittle] {message}");
        }
        self.append_log_line(message);
    }

    fn warn(&self, message: &str) {
        eprintln!("[whittle WARN] {message}");
        self.append_log_line(&format!("WARN {message}"));
    }
}
