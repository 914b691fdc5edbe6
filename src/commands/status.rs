use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::digest::config::load_config;
use crate::digest::paths::resolve_paths;
use crate::digest::util::redact_secret;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/qqsum_env_allowlist.rs"));
}

/// Every environment key the binary reads, `QQSUM_*` ones collected at build time.
pub fn env_allowlist() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = generated::GENERATED_QQSUM_ENV_ALLOWLIST.to_vec();
    keys.push("GEMINI_API_KEY");
    keys.sort_unstable();
    keys.dedup();
    keys
}

fn is_set(key: &str) -> bool {
    env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("BUILD_UUID")));
    report.detail(format!("qqsum_home={}", paths.qqsum_home.display()));
    report.detail(format!("image_dir={}", paths.image_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!(
        "config_file={}{}",
        paths.config_file.display(),
        if paths.config_file.exists() { "" } else { " (absent, defaults)" }
    ));

    let set: Vec<&str> = env_allowlist().into_iter().filter(|k| is_set(k)).collect();
    report.detail(format!(
        "env.set={}",
        if set.is_empty() { "-".to_string() } else { set.join(",") }
    ));

    let cfg = match load_config(&paths.config_file) {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("config invalid: {err:#}"));
            return Ok(report);
        }
    };

    report.detail(format!("gateway.base_url={}", cfg.gateway.base_url));
    report.detail(format!(
        "gateway.access_token={}",
        redact_secret(cfg.gateway.access_token.as_deref().unwrap_or_default())
    ));
    report.detail(format!("gateway.timeout_secs={}", cfg.gateway.timeout_secs));
    report.detail(format!("fetch.lookback_hours={}", cfg.fetch.lookback_hours));
    report.detail(format!(
        "fetch.budget=pages:{} messages:{} page_size:{} delay_ms:{}",
        cfg.fetch.max_pages, cfg.fetch.max_messages, cfg.fetch.page_size, cfg.fetch.delay_ms
    ));
    report.detail(format!(
        "media.download_timeout_secs={}",
        cfg.media.download_timeout_secs
    ));
    report.detail(format!("gemini.model={}", cfg.gemini.model));
    report.detail(format!("gemini.base_url={}", cfg.gemini.base_url));
    report.detail(format!("gemini.api_key={}", redact_secret(&cfg.gemini.api_key)));
    report.detail(format!(
        "prompt.template={}",
        cfg.prompt.template_path.as_deref().unwrap_or("<builtin>")
    ));
    report.detail(format!(
        "prompt.timezone={}",
        cfg.prompt.timezone.as_deref().unwrap_or("<local>")
    ));

    match cfg.require_group() {
        Ok(group_id) => report.detail(format!("fetch.group_id={group_id}")),
        Err(_) => report.issue("target group id is not set (QQSUM_GROUP_ID or [fetch].group_id)"),
    }
    if !cfg.gemini.has_usable_key() {
        report.issue("gemini api key is missing or still the placeholder (GEMINI_API_KEY)");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::env_allowlist;

    #[test]
    fn allowlist_covers_keys_read_by_config_and_paths() {
        let keys = env_allowlist();
        for key in [
            "QQSUM_GATEWAY_URL",
            "QQSUM_GROUP_ID",
            "QQSUM_HOME",
            "QQSUM_CONFIG_PATH",
            "GEMINI_API_KEY",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }
}
