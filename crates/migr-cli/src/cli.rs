//! Command line definition

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

pub(crate) const DEFAULT_CONFIG: &str = "migration.toml";

/// Build the `migr` command tree
pub(crate) fn build_cli() -> Command {
    let config = Arg::new("config")
        .long("config")
        .short('c')
        .env("MIGR_CONFIG")
        .default_value(DEFAULT_CONFIG)
        .value_parser(value_parser!(PathBuf))
        .help("Migration configuration file");
    let manual = Arg::new("manual")
        .long("manual")
        .action(ArgAction::SetTrue)
        .help("Render transactions for the controller instead of sending them");

    Command::new("migr")
        .version(migr_core::VERSION)
        .about("Staged, resumable on-chain migrations")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter; RUST_LOG takes precedence when set"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("pretty")
                .value_parser(["pretty", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("run")
                .about("Run every pending step in order")
                .arg(config.clone())
                .arg(manual.clone())
                .arg(
                    Arg::new("step")
                        .long("step")
                        .value_parser(value_parser!(u64))
                        .help("Run only this step"),
                )
                .arg(
                    Arg::new("journal")
                        .long("journal")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the transition journal to this file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the run summary as JSON"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show which steps are applied")
                .arg(config.clone())
                .arg(manual.help("Report the mode a `run --manual` would use"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("Print manual-signing artifacts for a step without waiting")
                .arg(config.clone())
                .arg(
                    Arg::new("step")
                        .long("step")
                        .required(true)
                        .value_parser(value_parser!(u64))
                        .help("Step to render"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Poll a contract getter and print every change")
                .arg(config)
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .help("Contract name or 0x address"),
                )
                .arg(
                    Arg::new("signature")
                        .long("signature")
                        .required(true)
                        .help("Argument-less getter, e.g. `currentStep()`"),
                )
                .arg(
                    Arg::new("returns")
                        .long("returns")
                        .default_value("uint256")
                        .help("Return type of the getter"),
                )
                .arg(
                    Arg::new("interval-secs")
                        .long("interval-secs")
                        .default_value("10")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Seconds between reads"),
                ),
        )
        .subcommand(
            Command::new("check-node")
                .about("Print sync status and rollup configuration of a rollup node")
                .arg(
                    Arg::new("url")
                        .long("url")
                        .required(true)
                        .help("Rollup node RPC endpoint"),
                ),
        )
}
