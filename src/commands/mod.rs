pub mod digest;
pub mod forward;
pub mod status;

use serde::Serialize;

use crate::digest::audit;
use crate::digest::paths::QqsumPaths;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{}: {}\n",
            self.command,
            if self.ok { "ok" } else { "failed" }
        );
        for detail in &self.details {
            out.push_str(&format!("  {detail}\n"));
        }
        for issue in &self.issues {
            out.push_str(&format!("  ! {issue}\n"));
        }
        out
    }
}

/// Append the run outcome to the audit log. A broken log never fails a run.
pub fn record_audit(paths: &QqsumPaths, report: &mut CommandReport, message: &str) {
    let status = if report.ok { "ok" } else { "failed" };
    if let Err(err) = audit::append_event(paths, &report.command, status, message) {
        tracing::warn!(error = %format!("{err:#}"), "audit log append failed");
        report.detail(format!("audit.error={err:#}"));
    }
}
