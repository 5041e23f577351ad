//! Execution mode resolution

use crate::types::ExecutionMode;
use migr_chain::Address;

/// Environment variable that forces manual mode
pub const DISABLE_LIVE_ENV: &str = "DISABLE_LIVE_DEPLOYER";

/// Decide whether the local signer may submit steps directly
///
/// Addresses compare case-insensitively. Input that does not parse as an
/// address never matches.
#[must_use]
pub fn resolve_mode(local_signer: &str, controller: &str, force_manual: bool) -> ExecutionMode {
    match (local_signer.trim().parse::<Address>(), controller.trim().parse::<Address>()) {
        (Ok(signer), Ok(controller)) => resolve_mode_for(signer, controller, force_manual),
        _ => ExecutionMode::Manual,
    }
}

/// [`resolve_mode`] for already-parsed addresses
#[inline]
#[must_use]
pub fn resolve_mode_for(local_signer: Address, controller: Address, force_manual: bool) -> ExecutionMode {
    if !force_manual && local_signer == controller {
        ExecutionMode::Live
    } else {
        ExecutionMode::Manual
    }
}

/// Read the manual override from the environment
#[must_use]
pub fn manual_override_from_env() -> bool {
    std::env::var(DISABLE_LIVE_ENV)
        .map(|v| override_value_set(&v))
        .unwrap_or(false)
}

fn override_value_set(value: &str) -> bool {
    !value.trim().is_empty()
}
