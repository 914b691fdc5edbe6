use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::{CommandReport, record_audit};
use crate::digest::config::load_config;
use crate::digest::fetch::{FetchBudget, fetch_history};
use crate::digest::format::DisplayClock;
use crate::digest::gemini::GeminiClient;
use crate::digest::lock::CacheLock;
use crate::digest::media::ImageNormalizer;
use crate::digest::paths::resolve_paths;
use crate::digest::prompt::{assemble, load_prefix};
use crate::digest::window::FetchWindow;
use crate::error::QqsumError;
use crate::onebot::gateway::GatewayClient;

#[derive(Debug, Clone, Default)]
pub struct DigestOptions {
    pub group_id: Option<i64>,
    pub lookback_hours: Option<u64>,
    pub max_messages: Option<usize>,
    /// Assemble the prompt but never contact Gemini.
    pub dry_run: bool,
    pub prompt_out: Option<PathBuf>,
}

pub fn run(opts: &DigestOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths.config_file)?;
    if let Some(group_id) = opts.group_id {
        cfg.fetch.group_id = group_id;
    }
    if let Some(hours) = opts.lookback_hours {
        cfg.fetch.lookback_hours = hours;
    }
    if let Some(max) = opts.max_messages {
        cfg.fetch.max_messages = max;
    }
    cfg.validate()?;
    let group_id = cfg.require_group()?;
    let hours = cfg.fetch.lookback_hours;

    // Credentials are checked before the gateway sees a single request.
    let gemini = if opts.dry_run {
        None
    } else {
        Some(GeminiClient::new(&cfg.gemini)?)
    };
    let clock = DisplayClock::from_name(cfg.prompt.timezone.as_deref())?;
    let prefix = load_prefix(cfg.prompt.template_path.as_deref().map(Path::new), hours)?;

    let mut report = CommandReport::new("digest");
    report.detail(format!("group_id={group_id}"));

    let cache_dir = paths.group_image_dir(group_id);
    let lock = CacheLock::acquire(&cache_dir)?;
    debug!(lock = %lock.path().display(), "image cache locked");

    let window = FetchWindow::lookback_from_now(hours)?;
    report.detail(format!("window={}..{} ({hours}h)", window.start, window.end));

    let gateway = GatewayClient::new(&cfg.gateway)?;
    report.detail(format!("gateway={}", gateway.base_url()));
    let budget = FetchBudget {
        max_pages: cfg.fetch.max_pages,
        max_messages: cfg.fetch.max_messages,
        page_size: cfg.fetch.page_size,
        delay: Duration::from_millis(cfg.fetch.delay_ms),
    };
    let outcome = fetch_history(&gateway, group_id, window, budget);
    report.detail(format!("fetch.pages={}", outcome.pages));
    report.detail(format!("fetch.halt={}", outcome.halt.as_str()));
    report.detail(format!("fetch.admitted={}", outcome.messages.len()));
    if let Some(err) = &outcome.error {
        if outcome.halt.is_error() && outcome.messages.is_empty() {
            report.issue(format!("history fetch failed: {err}"));
        } else {
            report.detail(format!("fetch.warning={err}"));
        }
    }

    let normalizer = ImageNormalizer::new(
        cache_dir,
        Duration::from_secs(cfg.media.download_timeout_secs),
    )?;
    report.detail(format!("image_cache={}", normalizer.cache_dir().display()));
    let Some(bundle) = assemble(&outcome.messages, &prefix, &clock, &normalizer) else {
        info!(group_id, "no messages in window");
        report.detail("nothing to report: no messages in the lookback window");
        record_audit(
            &paths,
            &mut report,
            &format!("group={group_id} admitted=0 halt={}", outcome.halt.as_str()),
        );
        return Ok(report);
    };
    report.detail(format!("prompt.chars={}", bundle.text.chars().count()));
    report.detail(format!("prompt.images={}", bundle.images.len()));

    if let Some(path) = &opts.prompt_out {
        fs::write(path, &bundle.text)
            .with_context(|| format!("failed to write prompt to {}", path.display()))?;
        report.detail(format!("prompt.out={}", path.display()));
    }

    let Some(client) = gemini else {
        if opts.prompt_out.is_none() {
            println!("{}", bundle.text);
        }
        for (idx, image) in bundle.images.iter().enumerate() {
            report.detail(format!("image.{}={}", idx + 1, image.display()));
        }
        report.detail("dry run: gemini not contacted");
        record_audit(
            &paths,
            &mut report,
            &format!(
                "group={group_id} admitted={} images={} dry_run=true",
                outcome.messages.len(),
                bundle.images.len()
            ),
        );
        return Ok(report);
    };

    let mut stdout = io::stdout().lock();
    let streamed = client.stream(&bundle, |text| {
        if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            warn!(error = %err, "stdout write failed");
        }
    });
    if let Err(err) = writeln!(stdout) {
        warn!(error = %err, "stdout write failed");
    }
    drop(stdout);

    report.detail(format!("gemini.model={}", client.model()));
    let usage = match streamed {
        Ok(summary) => {
            report.detail(format!("gemini.chunks={}", summary.chunks));
            report.detail(format!("gemini.chars={}", summary.chars));
            if let Some(version) = &summary.model_version {
                report.detail(format!("gemini.model_version={version}"));
            }
            if let Some(reason) = &summary.finish_reason {
                report.detail(format!("gemini.finish_reason={reason}"));
            }
            summary.usage
        }
        Err(QqsumError::Stream { message, usage }) => {
            report.issue(format!("gemini stream failed: {message}"));
            usage
        }
        Err(other) => return Err(other.into()),
    };
    match &usage {
        Some(usage) => report.detail(format!("gemini.usage {usage}")),
        None => report.detail("gemini.usage unavailable"),
    }

    record_audit(
        &paths,
        &mut report,
        &format!(
            "group={group_id} admitted={} images={} halt={}",
            outcome.messages.len(),
            bundle.images.len(),
            outcome.halt.as_str()
        ),
    );
    Ok(report)
}
