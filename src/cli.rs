use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

/// Summarize QQ group chat with Gemini through a OneBot gateway.
#[derive(Parser, Debug)]
#[command(name = "qqsum", version, about, long_about = None)]
pub struct Cli {
    /// Debug-level logs on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the command report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch recent group history and stream a Gemini summary to stdout
    Digest(DigestArgs),
    /// Send a nested forward-message card to a group
    Forward(ForwardArgs),
    /// Show resolved paths, configuration and environment keys
    Status,
}

#[derive(Args, Debug)]
pub struct DigestArgs {
    /// Target group (overrides QQSUM_GROUP_ID)
    #[arg(short, long)]
    pub group: Option<i64>,

    /// Lookback window in hours
    #[arg(long)]
    pub hours: Option<u64>,

    /// Stop admitting after this many messages
    #[arg(long)]
    pub max_messages: Option<usize>,

    /// Build the prompt without calling Gemini
    #[arg(long)]
    pub dry_run: bool,

    /// Write the assembled prompt text to this file
    #[arg(long)]
    pub prompt_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ForwardArgs {
    /// Target group (overrides QQSUM_GROUP_ID)
    #[arg(short, long)]
    pub group: Option<i64>,

    /// JSON file holding an array of forward nodes
    #[arg(long, conflicts_with = "sample")]
    pub file: Option<PathBuf>,

    /// Send the built-in three-level sample card
    #[arg(long)]
    pub sample: bool,

    /// user_id shown on the sample's outer nodes
    #[arg(long, requires = "sample")]
    pub narrator: Option<i64>,
}

enum ReportSink {
    Stdout,
    Stderr,
}

fn emit(report: &CommandReport, json: bool, sink: ReportSink) -> Result<()> {
    let rendered = if json {
        format!("{}\n", serde_json::to_string_pretty(report)?)
    } else {
        report.render_text()
    };
    match sink {
        ReportSink::Stdout => print!("{rendered}"),
        ReportSink::Stderr => eprint!("{rendered}"),
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let (report, sink) = match &cli.command {
        Command::Digest(args) => {
            let opts = commands::digest::DigestOptions {
                group_id: args.group,
                lookback_hours: args.hours,
                max_messages: args.max_messages,
                dry_run: args.dry_run,
                prompt_out: args.prompt_out.clone(),
            };
            // stdout carries the summary or the prompt itself
            (commands::digest::run(&opts)?, ReportSink::Stderr)
        }
        Command::Forward(args) => {
            let opts = commands::forward::ForwardOptions {
                group_id: args.group,
                file: args.file.clone(),
                sample: args.sample,
                narrator_id: args.narrator,
            };
            (commands::forward::run(&opts)?, ReportSink::Stdout)
        }
        Command::Status => (commands::status::run()?, ReportSink::Stdout),
    };

    emit(&report, cli.json, sink)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn digest_flags_parse() {
        let cli = Cli::try_parse_from([
            "qqsum", "digest", "--group", "1021625002", "--hours", "6", "--dry-run", "--json",
        ])
        .expect("parse");
        assert!(cli.json);
        let Command::Digest(args) = cli.command else {
            panic!("expected digest");
        };
        assert_eq!(args.group, Some(1021625002));
        assert_eq!(args.hours, Some(6));
        assert!(args.dry_run);
    }

    #[test]
    fn forward_rejects_file_with_sample() {
        let err = Cli::try_parse_from(["qqsum", "forward", "--file", "n.json", "--sample"]);
        assert!(err.is_err());
    }
}
