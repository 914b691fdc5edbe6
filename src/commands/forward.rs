use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, record_audit};
use crate::digest::config::load_config;
use crate::digest::paths::resolve_paths;
use crate::onebot::forward::{ForwardNode, load_nodes, sample_nodes, send_forward};
use crate::onebot::gateway::GatewayClient;

pub const DEFAULT_NARRATOR_ID: i64 = 10001;

#[derive(Debug, Clone, Default)]
pub struct ForwardOptions {
    pub group_id: Option<i64>,
    pub file: Option<PathBuf>,
    pub sample: bool,
    pub narrator_id: Option<i64>,
}

pub fn run(opts: &ForwardOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths.config_file)?;
    if let Some(group_id) = opts.group_id {
        cfg.fetch.group_id = group_id;
    }
    let group_id = cfg.require_group()?;

    let mut report = CommandReport::new("forward");
    let nodes: Vec<ForwardNode> = match (&opts.file, opts.sample) {
        (Some(path), false) => {
            report.detail(format!("nodes.source={}", path.display()));
            load_nodes(path)?
        }
        (None, true) => {
            report.detail("nodes.source=sample");
            sample_nodes(opts.narrator_id.unwrap_or(DEFAULT_NARRATOR_ID))
        }
        _ => {
            report.issue("invalid flags: use exactly one of --file or --sample");
            return Ok(report);
        }
    };
    let max_depth = nodes.iter().map(ForwardNode::depth).max().unwrap_or(0);
    report.detail(format!("group_id={group_id}"));
    report.detail(format!("nodes.count={}", nodes.len()));
    report.detail(format!("nodes.max_depth={max_depth}"));

    let gateway = GatewayClient::new(&cfg.gateway)?;
    match send_forward(&gateway, group_id, &nodes) {
        Ok(reply) => {
            match reply.data.get("message_id") {
                Some(id) => report.detail(format!("message_id={id}")),
                None => report.detail("message_id=<none>"),
            }
        }
        Err(err) if err.is_configuration() => return Err(err.into()),
        Err(err) => report.issue(err.to_string()),
    }

    record_audit(
        &paths,
        &mut report,
        &format!("group={group_id} nodes={} max_depth={max_depth}", nodes.len()),
    );
    Ok(report)
}
