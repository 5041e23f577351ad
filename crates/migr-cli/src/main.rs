//! `migr` - staged, resumable on-chain migrations

mod cli;
mod commands;
mod logging;

use clap::ArgMatches;
use commands::{RunArgs, WatchArgs};
use migr_core::MigrationError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Exit status when rerunning the same command may succeed (`EX_TEMPFAIL`)
const EXIT_RETRYABLE: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli::build_cli().get_matches();
    logging::init(
        string(&matches, "log-level").as_str(),
        string(&matches, "log-format").as_str(),
    );

    match dispatch(&matches).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "migr failed");
            eprintln!("error: {e:#}");
            let code = failure_code(&e);
            if code == EXIT_RETRYABLE {
                eprintln!("the failure looks transient; rerunning resumes from the on-chain step pointer");
            }
            ExitCode::from(code)
        }
    }
}

async fn dispatch(matches: &ArgMatches) -> anyhow::Result<bool> {
    match matches.subcommand() {
        Some(("run", args)) => {
            commands::run(RunArgs {
                config: path(args, "config"),
                manual: args.get_flag("manual"),
                step: args.get_one::<u64>("step").copied(),
                journal: args.get_one::<PathBuf>("journal").cloned(),
                json: args.get_flag("json"),
            })
            .await
        }
        Some(("status", args)) => {
            commands::status(&path(args, "config"), args.get_flag("manual"), args.get_flag("json")).await?;
            Ok(true)
        }
        Some(("render", args)) => {
            let step = args.get_one::<u64>("step").copied().unwrap_or_default();
            commands::render(&path(args, "config"), step).await?;
            Ok(true)
        }
        Some(("watch", args)) => {
            let interval = args.get_one::<u64>("interval-secs").copied().unwrap_or(10);
            commands::watch(WatchArgs {
                config: path(args, "config"),
                target: string(args, "target"),
                signature: string(args, "signature"),
                returns: string(args, "returns"),
                interval: Duration::from_secs(interval),
            })
            .await?;
            Ok(true)
        }
        Some(("check-node", args)) => {
            commands::check_node(&string(args, "url")).await?;
            Ok(true)
        }
        _ => anyhow::bail!("unknown command"),
    }
}

fn failure_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<MigrationError>() {
        Some(e) if e.is_retryable() => EXIT_RETRYABLE,
        _ => 1,
    }
}

fn string(matches: &ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

fn path(matches: &ArgMatches, id: &str) -> PathBuf {
    matches
        .get_one::<PathBuf>(id)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(cli::DEFAULT_CONFIG))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use migr_chain::ChainError;
    use migr_core::ConfigError;

    #[test]
    fn transient_failures_exit_as_retryable() {
        let transient = MigrationError::chain(2, ChainError::Transport("connection refused".into()));
        let err = Err::<(), _>(transient).context("running plan").unwrap_err();
        assert_eq!(failure_code(&err), EXIT_RETRYABLE);

        let config = anyhow::Error::from(MigrationError::from(ConfigError::Missing("accounts.controller".into())));
        assert_eq!(failure_code(&config), 1);

        assert_eq!(failure_code(&anyhow::anyhow!("unknown command")), 1);
    }
}
