//! Subcommand handlers

use anyhow::{bail, Context, Result};
use migr_chain::abi::{decode_return, format_value, parse_type};
use migr_chain::{Bytes, ChainClient, DynSolType, DynSolValue, FunctionSignature, JsonRpcClient};
use migr_core::config::MigrationConfig;
use migr_core::dispatch::{ArtifactSink, ManualArtifact};
use migr_core::journal::RunJournal;
use migr_core::mode::manual_override_from_env;
use migr_core::orchestrator::{Orchestrator, RunOptions};
use migr_core::RunStatus;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Prints rendered artifacts for the operator
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StdoutSink;

impl ArtifactSink for StdoutSink {
    fn publish(&self, label: &str, artifact: &ManualArtifact) {
        println!("==== {label} ====");
        println!("{}", artifact.render_text());
    }
}

pub(crate) struct RunArgs {
    pub(crate) config: PathBuf,
    pub(crate) manual: bool,
    pub(crate) step: Option<u64>,
    pub(crate) journal: Option<PathBuf>,
    pub(crate) json: bool,
}

async fn connect(config_path: &Path, options: RunOptions) -> Result<(MigrationConfig, Orchestrator)> {
    let config = MigrationConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let chain = JsonRpcClient::new(&config.network.rpc_url)?;
    tracing::info!(rpc = %chain.url(), "connecting");
    let orchestrator = Orchestrator::connect(&config, Arc::new(chain), options).await?;
    Ok((config, orchestrator))
}

/// Run the plan, or a single step; `Ok(true)` when everything requested is applied
pub(crate) async fn run(args: RunArgs) -> Result<bool> {
    let journal = Arc::new(RunJournal::new());
    let options = RunOptions {
        force_manual: args.manual || manual_override_from_env(),
        sink: Arc::new(StdoutSink),
        journal: journal.clone(),
    };
    let (_, orchestrator) = connect(&args.config, options).await?;

    let result = match args.step {
        Some(step) => orchestrator.run_step(step).await.map(|outcome| {
            println!("step {step}: {outcome}");
            outcome.is_settled()
        }),
        None => orchestrator.run().await.map(|summary| {
            if args.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(text) => println!("{text}"),
                    Err(e) => tracing::error!(error = %e, "failed to encode summary"),
                }
            } else {
                for report in &summary.reports {
                    println!("step {} ({}): {}", report.step, report.description, report.outcome);
                }
                println!("{}", summary.status);
                if let RunStatus::AwaitingManualConfirmation { step } = &summary.status {
                    println!("rerun once step {step} has been executed by the controller");
                }
            }
            summary.is_complete()
        }),
    };

    if let Some(path) = &args.journal {
        journal
            .write_json(path)
            .with_context(|| format!("writing journal to {}", path.display()))?;
        tracing::info!(path = %path.display(), entries = journal.len(), "journal written");
    }
    Ok(result?)
}

/// Print applied and pending steps
pub(crate) async fn status(config: &Path, manual: bool, json: bool) -> Result<()> {
    let options = RunOptions {
        force_manual: manual || manual_override_from_env(),
        ..RunOptions::default()
    };
    let (_, orchestrator) = connect(config, options).await?;
    let report = orchestrator.status().await?;

    let addresses: serde_json::Map<String, Value> = orchestrator
        .address_book()
        .entries()
        .map(|(name, address)| (name.to_string(), Value::String(address.to_checksum(None))))
        .collect();

    if json {
        let mut out = serde_json::to_value(&report)?;
        out["addresses"] = Value::Object(addresses);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("pointer: {} (mode: {})", report.pointer, report.mode);
    for step in &report.steps {
        let marker = if step.applied {
            "done"
        } else if step.current {
            "next"
        } else {
            "    "
        };
        println!("  [{marker}] {:>3}  {}", step.step, step.description);
    }
    println!("addresses:");
    for (name, address) in &addresses {
        println!("  {name:<32} {}", address.as_str().unwrap_or_default());
    }
    Ok(())
}

/// Print manual-signing artifacts for one step
pub(crate) async fn render(config: &Path, step: u64) -> Result<()> {
    let (_, orchestrator) = connect(config, RunOptions::default()).await?;
    let artifacts = orchestrator.render_step(step).await?;
    if artifacts.is_empty() {
        println!("step {step} has nothing to sign");
    }
    for (label, artifact) in &artifacts {
        StdoutSink.publish(label, artifact);
    }
    Ok(())
}

pub(crate) struct WatchArgs {
    pub(crate) config: PathBuf,
    pub(crate) target: String,
    pub(crate) signature: String,
    pub(crate) returns: String,
    pub(crate) interval: Duration,
}

/// Poll a getter until interrupted, printing each distinct value
pub(crate) async fn watch(args: WatchArgs) -> Result<()> {
    let (config, orchestrator) = connect(&args.config, RunOptions::default()).await?;
    let target = orchestrator.address_book().resolve(&args.target)?;
    let signature: FunctionSignature = args.signature.parse()?;
    if !signature.inputs().is_empty() {
        bail!("`{}` takes arguments; only argument-less getters can be watched", args.signature);
    }
    let returns = parse_type(&args.returns)?;
    let chain = JsonRpcClient::new(&config.network.rpc_url)?;
    let calldata = Bytes::from(signature.selector().to_vec());

    tracing::info!(%target, getter = %signature, interval = ?args.interval, "watching");
    let mut last: Option<DynSolValue> = None;
    let mut ticker = tokio::time::interval(args.interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("interrupted");
                return Ok(());
            }
            _ = ticker.tick() => {
                match read(&chain, target, &calldata, &returns).await {
                    Ok(value) if last.as_ref() != Some(&value) => {
                        println!("{} {signature} = {}", args.target, format_value(&value));
                        last = Some(value);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "read failed"),
                }
            }
        }
    }
}

async fn read(
    chain: &dyn ChainClient,
    target: migr_chain::Address,
    calldata: &Bytes,
    returns: &DynSolType,
) -> Result<DynSolValue> {
    let data = chain.call(target, calldata.clone()).await?;
    Ok(decode_return(returns, &data, 0)?)
}

/// Print rollup node sync status and configuration
pub(crate) async fn check_node(url: &str) -> Result<()> {
    let node = JsonRpcClient::new(url)?;
    let sync: Value = node
        .request("optimism_syncStatus", json!([]))
        .await
        .context("optimism_syncStatus")?;
    let rollup: Value = node
        .request("optimism_rollupConfig", json!([]))
        .await
        .context("optimism_rollupConfig")?;
    println!("{}", serde_json::to_string_pretty(&json!({
        "syncStatus": sync,
        "rollupConfig": rollup,
    }))?);
    Ok(())
}
