//! Building an orchestrator from configuration.

use migr_chain::abi::uint;
use migr_chain::{Address, ChainClient, FunctionSignature};
use migr_core::config::MigrationConfig;
use migr_core::orchestrator::{Orchestrator, RunOptions};
use migr_core::{ConfigError, ExecutionMode, MigrationError, StepOutcome};
use migr_test_utils::{addr, MemorySink, MockChain};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

const DEPLOYER: &str = "0xdededededededededededededededededededede";
const CONTROLLER: &str = "0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0";

fn sig(signature: &str) -> FunctionSignature {
    signature.parse().unwrap()
}

fn dictator() -> Address {
    addr(0xd1)
}

fn token() -> Address {
    addr(0xa1)
}

fn write_deployments(dir: &Path) {
    std::fs::write(
        dir.join("SystemDictatorProxy.json"),
        format!(r#"{{"address": "{}", "abi": []}}"#, dictator()),
    )
    .unwrap();
    std::fs::write(dir.join(".chainId"), "31337").unwrap();
}

fn config(dir: &Path, deployer: Option<&str>, chain_id: u64) -> MigrationConfig {
    let deployer = deployer.map(|d| format!("deployer = \"{d}\"\n")).unwrap_or_default();
    let src = format!(
        r#"
deployments_dir = '{dir}'

[network]
rpc_url = "http://localhost:8545"
chain_id = {chain_id}

[accounts]
{deployer}controller = "{CONTROLLER}"

[polling]
interval_ms = 1000
live_timeout_secs = 30
manual_timeout_secs = 30

[control]
contract = "SystemDictatorProxy"

[addresses]
Token = "{token}"

[[steps]]
number = 1
description = "configure token"
[[steps.checks]]
target = "Token"
signature = "a()"
equals = 5
"#,
        dir = dir.display(),
        token = token(),
    );
    MigrationConfig::from_toml(&src).unwrap()
}

fn chain_at_step_one() -> MockChain {
    let chain = MockChain::default();
    chain.set_code(dictator(), &[0x60, 0x80, 0x60, 0x40]);
    chain.set_pointer(dictator(), 1);
    chain
}

#[tokio::test(start_paused = true)]
async fn matching_signer_runs_live() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let chain = chain_at_step_one();
    chain.on_transaction(dictator(), &sig("step1()"), |state, _| {
        state.set_value(token(), &sig("a()"), uint(5));
        state.set_value(dictator(), &sig("currentStep()"), uint(2));
    });
    let config = config(dir.path(), Some(CONTROLLER), 31337);

    let orchestrator = Orchestrator::connect(&config, Arc::new(chain.clone()), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(orchestrator.mode(), ExecutionMode::Live);
    assert_eq!(orchestrator.address_book().get("SystemDictatorProxy"), Some(dictator()));
    assert_eq!(orchestrator.address_book().get("Token"), Some(token()));

    let summary = orchestrator.run().await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.report(1).unwrap().outcome, StepOutcome::Applied);
    assert_eq!(chain.sent().len(), 1);
    assert!(!orchestrator.journal().is_empty());
    orchestrator.journal().verify_integrity().unwrap();
}

#[tokio::test(start_paused = true)]
async fn different_signer_renders_for_controller() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let chain = chain_at_step_one();
    let config = config(dir.path(), Some(DEPLOYER), 31337);
    let sink = MemorySink::new();
    let options = RunOptions {
        sink: Arc::new(sink.clone()),
        ..RunOptions::default()
    };

    let orchestrator = Orchestrator::connect(&config, Arc::new(chain.clone()), options)
        .await
        .unwrap();
    assert_eq!(orchestrator.mode(), ExecutionMode::Manual);
    assert_eq!(orchestrator.controller(), CONTROLLER.parse::<Address>().unwrap());

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.report(1).unwrap().outcome, StepOutcome::AwaitingManualConfirmation);
    assert!(chain.sent().is_empty());
    let published = sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].1.transaction["from"],
        CONTROLLER.parse::<Address>().unwrap().to_checksum(None)
    );
}

#[tokio::test]
async fn force_manual_overrides_matching_signer() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), Some(CONTROLLER), 31337);
    let options = RunOptions {
        force_manual: true,
        ..RunOptions::default()
    };

    let orchestrator = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), options)
        .await
        .unwrap();

    assert_eq!(orchestrator.mode(), ExecutionMode::Manual);
}

#[tokio::test]
async fn node_accounts_supply_missing_signer() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), None, 31337);

    let unlocked = chain_at_step_one();
    unlocked.set_accounts(vec![CONTROLLER.parse().unwrap()]);
    let live = Orchestrator::connect(&config, Arc::new(unlocked), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(live.mode(), ExecutionMode::Live);

    let locked = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(locked.mode(), ExecutionMode::Manual);
}

#[tokio::test]
async fn chain_id_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), Some(CONTROLLER), 5);

    let err = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), RunOptions::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        MigrationError::Config(ConfigError::ChainMismatch {
            expected: 5,
            actual: 31337
        })
    ));
}

#[tokio::test]
async fn missing_control_deployment_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), Some(CONTROLLER), 31337);

    let err = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), RunOptions::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        MigrationError::Config(ConfigError::UnknownAddress(name)) if name == "SystemDictatorProxy"
    ));
}

#[tokio::test]
async fn control_without_bytecode_is_rejected_before_sending() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), Some(CONTROLLER), 31337);
    let chain = MockChain::default();
    chain.set_pointer(dictator(), 1);

    let err = Orchestrator::connect(&config, Arc::new(chain.clone()), RunOptions::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        &err,
        MigrationError::Config(ConfigError::NotDeployed { name, address })
            if name == "SystemDictatorProxy" && *address == dictator()
    ));
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn status_reports_the_mode_a_forced_manual_run_would_use() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), Some(CONTROLLER), 31337);

    let live = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(live.status().await.unwrap().mode, ExecutionMode::Live);

    let options = RunOptions {
        force_manual: true,
        ..RunOptions::default()
    };
    let forced = Orchestrator::connect(&config, Arc::new(chain_at_step_one()), options)
        .await
        .unwrap();
    assert_eq!(forced.status().await.unwrap().mode, ExecutionMode::Manual);
}

#[tokio::test]
async fn status_reads_the_pointer_without_sending() {
    let dir = tempfile::tempdir().unwrap();
    write_deployments(dir.path());
    let config = config(dir.path(), Some(CONTROLLER), 31337);
    let chain = chain_at_step_one();

    let orchestrator = Orchestrator::connect(&config, Arc::new(chain.clone()), RunOptions::default())
        .await
        .unwrap();
    let status = orchestrator.status().await.unwrap();

    assert_eq!(status.pointer, 1);
    assert!(status.steps[0].current);
    assert!(!status.steps[0].applied);
    assert_eq!(chain.sent().len(), 0);
    assert_eq!(chain.chain_id().await.unwrap(), 31337);
}
