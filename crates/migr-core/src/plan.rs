//! Migration plans
//!
//! A [`MigrationPlan`] is an ordered list of [`Step`]s with unique, strictly
//! increasing numbers starting at 1 or later. Plans are either assembled in
//! code or built from the `[[steps]]` tables of a configuration file.

use crate::address_book::AddressBook;
use crate::control::ControlContract;
use crate::dynamic::{DynamicConfigResolver, DynamicSettings};
use crate::error::ConfigError;
use crate::step::{Action, Step, SubStep};
use crate::verify::{Expectation, Predicate, Read, ValueCheck};
use migr_chain::abi::parse_type;
use migr_chain::{Bytes, DynSolType, DynSolValue, FunctionSignature, TransactionIntent, B256, U256};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

/// Ordered, validated sequence of steps
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    steps: Vec<Step>,
}

impl MigrationPlan {
    /// Validate and wrap `steps`
    ///
    /// # Errors
    /// Returns `InvalidPlan` for step 0, duplicates, or non-increasing numbers
    pub fn new(steps: Vec<Step>) -> Result<Self, ConfigError> {
        let mut previous: Option<u64> = None;
        for step in &steps {
            if step.number == 0 {
                return Err(ConfigError::InvalidPlan("step numbers start at 1".into()));
            }
            if let Some(prev) = previous {
                if step.number <= prev {
                    return Err(ConfigError::InvalidPlan(format!(
                        "step {} follows step {prev}; numbers must be unique and increasing",
                        step.number
                    )));
                }
            }
            previous = Some(step.number);
        }
        Ok(Self { steps })
    }

    /// Steps in execution order
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step by number
    #[must_use]
    pub fn step(&self, number: u64) -> Option<&Step> {
        self.steps.iter().find(|s| s.number == number)
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the plan has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Build a plan from configuration definitions
    ///
    /// # Errors
    /// Unknown names, malformed signatures or arguments, and plan ordering errors
    pub fn from_definitions(definitions: &[StepDefinition], ctx: &PlanContext<'_>) -> Result<Self, ConfigError> {
        let mut steps = definitions
            .iter()
            .map(|def| def.build(ctx))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(dynamic) = ctx.dynamic {
            let gated = dynamic.step;
            let declared = definitions
                .iter()
                .any(|d| d.pre.iter().any(|p| p.kind == SubStepKind::DynamicConfig));
            if !declared {
                let step = steps
                    .iter_mut()
                    .find(|s| s.number == gated)
                    .ok_or_else(|| {
                        ConfigError::InvalidPlan(format!("dynamic configuration gates step {gated}, which is not in the plan"))
                    })?;
                step.pre.insert(0, dynamic_sub_step(ctx)?);
            }
        }

        Self::new(steps)
    }
}

/// What plan construction needs to resolve definitions
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// Name resolution
    pub book: &'a AddressBook,
    /// Control contract
    pub control: &'a ControlContract,
    /// Dynamic configuration settings and the step they gate
    pub dynamic: Option<&'a DynamicPlacement>,
}

/// Dynamic configuration settings together with the step they gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicPlacement {
    /// Resolver inputs
    pub settings: DynamicSettings,
    /// Step the configuration is a pre-step of
    pub step: u64,
}

/// A value written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Address, name, decimal or hex text
    Text(String),
    /// Tuple or array components
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Convert to an ABI value of type `ty`, resolving names through `book`
    ///
    /// # Errors
    /// Returns `ConfigError` if the value cannot represent `ty`
    pub fn to_abi(&self, ty: &DynSolType, book: &AddressBook) -> Result<DynSolValue, ConfigError> {
        let name = ty.sol_type_name();
        let mismatch = || ConfigError::invalid(name.to_string(), format!("cannot use {self:?} as {name}"));
        let uint = |n: Option<U256>, bits: usize| {
            n.filter(|n| n.bit_len() <= bits)
                .map(|n| DynSolValue::Uint(n, bits))
                .ok_or_else(mismatch)
        };
        match (ty, self) {
            (DynSolType::Address, Self::Text(s)) => book.resolve(s).map(DynSolValue::Address),
            (DynSolType::Bool, Self::Bool(b)) => Ok(DynSolValue::Bool(*b)),
            (DynSolType::Uint(bits), Self::Int(n)) => uint(u64::try_from(*n).ok().map(U256::from), *bits),
            (DynSolType::Uint(bits), Self::Text(s)) => uint(U256::from_str(s.trim()).ok(), *bits),
            (DynSolType::Int(_), Self::Int(n)) => ty.coerce_str(&n.to_string()).map_err(|_| mismatch()),
            (DynSolType::Int(_), Self::Text(s)) => ty.coerce_str(s.trim()).map_err(|_| mismatch()),
            (DynSolType::FixedBytes(len), Self::Text(s)) => match decode_hex(s) {
                Some(bytes) if bytes.len() == *len => Ok(DynSolValue::FixedBytes(B256::right_padding_from(&bytes), *len)),
                _ => Err(mismatch()),
            },
            (DynSolType::String, Self::Text(s)) => Ok(DynSolValue::String(s.clone())),
            (DynSolType::Bytes, Self::Text(s)) => decode_hex(s).map(DynSolValue::Bytes).ok_or_else(mismatch),
            (DynSolType::Tuple(types), Self::List(items)) if types.len() == items.len() => {
                Self::list_to_abi(types.iter(), items, book).map(DynSolValue::Tuple)
            }
            (DynSolType::Array(inner), Self::List(items)) => {
                Self::list_to_abi(std::iter::repeat(inner.as_ref()), items, book).map(DynSolValue::Array)
            }
            (DynSolType::FixedArray(inner, len), Self::List(items)) if *len == items.len() => {
                Self::list_to_abi(std::iter::repeat(inner.as_ref()), items, book).map(DynSolValue::FixedArray)
            }
            _ => Err(mismatch()),
        }
    }

    fn list_to_abi<'t>(
        types: impl Iterator<Item = &'t DynSolType>,
        items: &[ArgValue],
        book: &AddressBook,
    ) -> Result<Vec<DynSolValue>, ConfigError> {
        types.zip(items).map(|(t, v)| v.to_abi(t, book)).collect()
    }

    /// Type to decode a getter's return word as, when not given explicitly
    ///
    /// `0x` text of 20 bytes is an address, of 32 bytes a `bytes32`, and of
    /// any other length a `uint256`; digits are a `uint256`; any other text is
    /// an address name.
    #[must_use]
    pub fn inferred_type(&self) -> DynSolType {
        match self {
            Self::Bool(_) => DynSolType::Bool,
            Self::Int(_) => DynSolType::Uint(256),
            Self::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x") {
                    Some(digits) if digits.len() == 64 => DynSolType::FixedBytes(32),
                    Some(digits) if digits.len() == 40 => DynSolType::Address,
                    Some(_) => DynSolType::Uint(256),
                    None if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => DynSolType::Uint(256),
                    None => DynSolType::Address,
                }
            }
            Self::List(items) => DynSolType::Tuple(items.iter().map(Self::inferred_type).collect()),
        }
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s.trim().strip_prefix("0x")?).ok()
}

fn parse_signature(signature: &str) -> Result<FunctionSignature, ConfigError> {
    signature.parse().map_err(|e| ConfigError::abi(signature, e))
}

fn encode_call(signature: &FunctionSignature, args: &[ArgValue], book: &AddressBook) -> Result<Bytes, ConfigError> {
    if signature.inputs().len() != args.len() {
        return Err(ConfigError::invalid(
            signature.canonical(),
            format!("expects {} arguments, got {}", signature.inputs().len(), args.len()),
        ));
    }
    let values = signature
        .inputs()
        .iter()
        .zip(args)
        .map(|(ty, arg)| arg.to_abi(ty, book))
        .collect::<Result<Vec<_>, _>>()?;
    signature
        .encode_call(&values)
        .map_err(|e| ConfigError::abi(signature.canonical(), e))
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing(field.to_string()))
}

/// An explicit contract call
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallDefinition {
    /// Address or name of the contract
    pub target: String,
    /// Function signature, e.g. `unpause()`
    pub signature: String,
    /// Arguments in declaration order
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Attached value in wei, as decimal text
    #[serde(default)]
    pub value: Option<String>,
}

impl CallDefinition {
    /// Encode as an intent
    ///
    /// # Errors
    /// Unknown target, malformed signature or arguments, or an invalid value
    pub fn intent(&self, book: &AddressBook) -> Result<TransactionIntent, ConfigError> {
        let target = book.resolve(&self.target)?;
        let signature = parse_signature(&self.signature)?;
        let data = encode_call(&signature, &self.args, book)?;

        let mut intent = TransactionIntent::new(target, data).with_description(format!(
            "{}.{}",
            self.target,
            signature.canonical()
        ));
        if let Some(value) = &self.value {
            let value = U256::from_str(value.trim())
                .map_err(|_| ConfigError::invalid("value", format!("`{value}` is not an amount")))?;
            intent = intent.with_value(value);
        }
        Ok(intent)
    }
}

/// Kind of a step's main action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Verify only
    None,
    /// Call `step<N>()` on the control contract
    #[default]
    ControlStep,
    /// Explicit call
    Call,
    /// `ProxyAdmin.upgradeAndCall(proxy, implementation, initData)`
    UpgradeAndCall,
}

/// Main action of a step definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDefinition {
    /// Action kind
    #[serde(default)]
    pub kind: ActionKind,
    /// Call target (`call`) or proxy admin (`upgrade_and_call`)
    #[serde(default)]
    pub target: Option<String>,
    /// Function signature (`call`)
    #[serde(default)]
    pub signature: Option<String>,
    /// Arguments (`call`)
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Attached value in wei (`call`)
    #[serde(default)]
    pub value: Option<String>,
    /// Proxy being upgraded (`upgrade_and_call`)
    #[serde(default)]
    pub proxy: Option<String>,
    /// New implementation (`upgrade_and_call`)
    #[serde(default)]
    pub implementation: Option<String>,
    /// Initializer run through the proxy (`upgrade_and_call`); plain `upgrade` when absent
    #[serde(default)]
    pub init_signature: Option<String>,
    /// Initializer arguments
    #[serde(default)]
    pub init_args: Vec<ArgValue>,
}

impl ActionDefinition {
    fn build(&self, number: u64, ctx: &PlanContext<'_>) -> Result<Action, ConfigError> {
        match self.kind {
            ActionKind::None => Ok(Action::None),
            ActionKind::ControlStep => ctx
                .control
                .step_intent(number)
                .map(Action::Call)
                .map_err(|e| ConfigError::abi(format!("step{number}()"), e)),
            ActionKind::Call => CallDefinition {
                target: required(self.target.as_deref(), "action.target")?.to_string(),
                signature: required(self.signature.as_deref(), "action.signature")?.to_string(),
                args: self.args.clone(),
                value: self.value.clone(),
            }
            .intent(ctx.book)
            .map(Action::Call),
            ActionKind::UpgradeAndCall => self.upgrade_intent(ctx.book).map(Action::Call),
        }
    }

    fn upgrade_intent(&self, book: &AddressBook) -> Result<TransactionIntent, ConfigError> {
        let admin_name = required(self.target.as_deref(), "action.target")?;
        let proxy_name = required(self.proxy.as_deref(), "action.proxy")?;
        let impl_name = required(self.implementation.as_deref(), "action.implementation")?;
        let admin = book.resolve(admin_name)?;
        let proxy = DynSolValue::Address(book.resolve(proxy_name)?);
        let implementation = DynSolValue::Address(book.resolve(impl_name)?);

        let (signature, args, description) = match &self.init_signature {
            Some(init) => {
                let init_sig = parse_signature(init)?;
                let init_data = encode_call(&init_sig, &self.init_args, book)?;
                (
                    "upgradeAndCall(address,address,bytes)",
                    vec![proxy, implementation, DynSolValue::Bytes(init_data.to_vec())],
                    format!("upgrade {proxy_name} to {impl_name} and call {}", init_sig.canonical()),
                )
            }
            None => (
                "upgrade(address,address)",
                vec![proxy, implementation],
                format!("upgrade {proxy_name} to {impl_name}"),
            ),
        };
        let signature = parse_signature(signature)?;
        TransactionIntent::call(admin, &signature, &args)
            .map(|intent| intent.with_description(description))
            .map_err(|e| ConfigError::abi(signature.canonical(), e))
    }
}

/// A predicate written in configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDefinition {
    /// Name for reports; derived from the read when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Contract to call
    #[serde(default)]
    pub target: Option<String>,
    /// Getter signature
    #[serde(default)]
    pub signature: Option<String>,
    /// Getter arguments
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Return type; inferred from the expected value when absent
    #[serde(default)]
    pub returns: Option<String>,
    /// Return word index
    #[serde(default)]
    pub word: usize,
    /// Read an account balance instead of calling a getter
    #[serde(default)]
    pub balance_of: Option<String>,
    /// Expected value
    #[serde(default)]
    pub equals: Option<ArgValue>,
    /// Value that must not be observed
    #[serde(default)]
    pub not_equals: Option<ArgValue>,
    /// The getter must revert
    #[serde(default)]
    pub reverts: bool,
}

impl CheckDefinition {
    /// Build the predicate
    ///
    /// # Errors
    /// Ambiguous or incomplete definitions, unknown names, malformed values
    pub fn build(&self, book: &AddressBook) -> Result<Arc<dyn Predicate>, ConfigError> {
        let expectations = usize::from(self.equals.is_some())
            + usize::from(self.not_equals.is_some())
            + usize::from(self.reverts);
        if expectations != 1 {
            return Err(ConfigError::invalid(
                self.display_name(),
                "exactly one of `equals`, `not_equals`, `reverts` is required",
            ));
        }
        let compared = self.equals.as_ref().or(self.not_equals.as_ref());

        let read = match (&self.balance_of, &self.target, &self.signature) {
            (Some(account), None, None) => Read::Balance {
                account: book.resolve(account)?,
            },
            (None, Some(target), Some(signature)) => {
                let sig = parse_signature(signature)?;
                let returns = match (&self.returns, compared) {
                    (Some(ty), _) => parse_type(ty).map_err(|e| ConfigError::abi(ty.as_str(), e))?,
                    (None, Some(value)) => value.inferred_type(),
                    (None, None) => DynSolType::Uint(256),
                };
                Read::Call {
                    target: book.resolve(target)?,
                    calldata: encode_call(&sig, &self.args, book)?,
                    returns,
                    word: self.word,
                }
            }
            _ => {
                return Err(ConfigError::invalid(
                    self.display_name(),
                    "use either `balance_of` or `target` with `signature`",
                ))
            }
        };

        let value_type = match &read {
            Read::Call { returns, .. } => returns.clone(),
            Read::Balance { .. } => DynSolType::Uint(256),
        };
        let expect = match (&self.equals, &self.not_equals) {
            (Some(v), _) => Expectation::Equals(v.to_abi(&value_type, book)?),
            (_, Some(v)) => Expectation::NotEquals(v.to_abi(&value_type, book)?),
            _ => Expectation::Reverts,
        };

        Ok(Arc::new(ValueCheck::new(self.display_name(), read, expect)))
    }

    fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.balance_of, &self.target, &self.signature) {
            (Some(account), _, _) => format!("balance({account})"),
            (_, Some(target), Some(signature)) => format!("{target}.{signature}"),
            _ => "check".to_string(),
        }
    }
}

/// Kind of a pre-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStepKind {
    /// Resolve and submit dynamic configuration
    DynamicConfig,
    /// Explicit call
    Call,
}

/// A pre-step definition
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubStepDefinition {
    /// Pre-step kind
    pub kind: SubStepKind,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Call target (`call`)
    #[serde(default)]
    pub target: Option<String>,
    /// Function signature (`call`)
    #[serde(default)]
    pub signature: Option<String>,
    /// Arguments (`call`)
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Attached value in wei (`call`)
    #[serde(default)]
    pub value: Option<String>,
    /// Idempotency check and completion predicate (`call`, required)
    #[serde(default)]
    pub applied_when: Option<CheckDefinition>,
    /// Post-conditions
    #[serde(default)]
    pub checks: Vec<CheckDefinition>,
}

impl SubStepDefinition {
    fn build(&self, ctx: &PlanContext<'_>) -> Result<SubStep, ConfigError> {
        let sub = match self.kind {
            SubStepKind::DynamicConfig => dynamic_sub_step(ctx)?,
            SubStepKind::Call => {
                let call = CallDefinition {
                    target: required(self.target.as_deref(), "pre.target")?.to_string(),
                    signature: required(self.signature.as_deref(), "pre.signature")?.to_string(),
                    args: self.args.clone(),
                    value: self.value.clone(),
                };
                let applied_when = self
                    .applied_when
                    .as_ref()
                    .ok_or_else(|| ConfigError::Missing("pre.applied_when".into()))?
                    .build(ctx.book)?;
                let description = format!("{}.{}", call.target, call.signature);
                SubStep::new(description, Action::Call(call.intent(ctx.book)?), applied_when)
            }
        };

        let mut sub = match &self.description {
            Some(description) => SubStep {
                description: description.clone(),
                ..sub
            },
            None => sub,
        };
        for check in &self.checks {
            sub = sub.with_check(check.build(ctx.book)?);
        }
        Ok(sub)
    }
}

fn dynamic_sub_step(ctx: &PlanContext<'_>) -> Result<SubStep, ConfigError> {
    let placement = ctx
        .dynamic
        .ok_or_else(|| ConfigError::Missing("dynamic".into()))?;
    let resolver = DynamicConfigResolver::new(ctx.control.address(), placement.settings.clone())?;
    let applied_when = resolver.set_predicate();
    Ok(SubStep::new(
        "dynamic configuration",
        Action::Derived(Arc::new(resolver)),
        applied_when,
    ))
}

/// A `[[steps]]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Step number
    pub number: u64,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Main action; `control_step` when absent
    #[serde(default)]
    pub action: ActionDefinition,
    /// Extra idempotency check
    #[serde(default)]
    pub applied_when: Option<CheckDefinition>,
    /// Completion predicate override
    #[serde(default)]
    pub completion: Option<CheckDefinition>,
    /// Post-conditions
    #[serde(default)]
    pub checks: Vec<CheckDefinition>,
    /// Pre-steps
    #[serde(default)]
    pub pre: Vec<SubStepDefinition>,
}

impl StepDefinition {
    fn build(&self, ctx: &PlanContext<'_>) -> Result<Step, ConfigError> {
        let description = if self.description.is_empty() {
            format!("step {}", self.number)
        } else {
            self.description.clone()
        };
        let mut step = Step::new(self.number, description).with_action(self.action.build(self.number, ctx)?);

        for pre in &self.pre {
            step = step.with_pre(pre.build(ctx)?);
        }
        if let Some(check) = &self.applied_when {
            step = step.applied_when(check.build(ctx.book)?);
        }
        if let Some(check) = &self.completion {
            step = step.completed_when(check.build(ctx.book)?);
        }
        for check in &self.checks {
            step = step.with_check(check.build(ctx.book)?);
        }
        Ok(step)
    }
}
