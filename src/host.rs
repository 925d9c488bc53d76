use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use tracing::{debug, warn};

use crate::api::{self, WorldViewHandle};
use crate::callin::{CallIn, CallInRegistry};
use crate::capability::CapabilityPolicy;
use crate::settings::SettingsHandle;
use crate::supervisor::ModuleKind;
use crate::vfs::VfsHandle;

/// Cap on the per-host ring of recent call-in failures. A guest that throws
/// every tick must not leak unbounded host memory.
pub const MAX_RECENT_ERRORS: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct CallInFailure {
    pub call_in: &'static str,
    pub message: String,
}

/// Effects queued by capability-gated call-outs, drained by the embedder
/// after dispatch. Guests never mutate game state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    SendChat { message: String },
    RequestSpawn,
    DropFlag,
    TeleportTo { x: f64, y: f64, z: f64 },
    WarpMouse { x: i64, y: i64 },
    GrabInput { grab: bool },
}

/// State shared between a host and its registered call-outs.
#[derive(Default)]
pub struct HostShared {
    pub valid_names: HashSet<&'static str>,
    pub defined: HashSet<String>,
    pub disabled: HashSet<String>,
    pub request_reload: Option<String>,
    pub request_disable: Option<String>,
    pub errors: VecDeque<CallInFailure>,
    pub commands: Vec<HostCommand>,
}

/// Everything a host needs from its surroundings, cloned per construction.
#[derive(Clone)]
pub struct HostContext {
    pub vfs: VfsHandle,
    pub settings: SettingsHandle,
    pub world: WorldViewHandle,
    pub epoch: Instant,
    pub max_operations: u64,
}

/// Result of one host-to-guest invocation.
#[derive(Debug)]
pub enum CallOutcome {
    /// The module does not implement this call-in; not an error.
    Absent,
    /// The guest failed; the error was recorded and the host keeps running.
    NoResult,
    Value(Dynamic),
}

/// One guest interpreter bound to one module slot. Owns the engine, the
/// compiled AST and the persistent scope; the call-in table is the dense
/// per-code index into the script's top-level functions.
pub struct ScriptHost {
    kind: ModuleKind,
    policy: CapabilityPolicy,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    valid_call_ins: HashSet<CallIn>,
    table: Vec<Option<&'static str>>,
    shared: Rc<RefCell<HostShared>>,
}

impl ScriptHost {
    /// Opens a fresh interpreter, installs the capability-filtered call-out
    /// surfaces, compiles `source` and runs its top-level statements once.
    /// Any failure here is a load failure; the slot stays unloaded.
    pub fn new(
        kind: ModuleKind,
        policy: CapabilityPolicy,
        registry: &CallInRegistry,
        ctx: &HostContext,
        source: &str,
        source_label: &str,
    ) -> Result<Self> {
        let valid_call_ins = registry.valid_for(kind, policy.caps);

        let shared = Rc::new(RefCell::new(HostShared::default()));
        shared.borrow_mut().valid_names =
            valid_call_ins.iter().map(|call_in| call_in.name()).collect();

        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.set_max_operations(ctx.max_operations);
        engine.set_max_call_levels(64);
        engine.set_max_string_size(1 << 20);
        engine.set_max_array_size(1 << 16);
        engine.set_max_map_size(1 << 12);
        let label = kind.name();
        engine.on_print(move |text| debug!(target: "script", "[{label}] {text}"));
        engine.on_debug(move |text, _, pos| debug!(target: "script", "[{label}] {pos:?} {text}"));

        api::install(&mut engine, kind, &policy, Rc::clone(&shared), ctx);

        let ast = engine
            .compile(source)
            .map_err(|err| anyhow!("{source_label}: {err}"))?;
        shared.borrow_mut().defined =
            ast.iter_functions().map(|func| func.name.to_string()).collect();

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| anyhow!("{source_label}: {err}"))?;

        let mut table: Vec<Option<&'static str>> = vec![None; registry.len()];
        {
            let shared = shared.borrow();
            for &call_in in &valid_call_ins {
                let name = call_in.name();
                if shared.defined.contains(name) {
                    table[call_in.code() as usize] = Some(name);
                }
            }
        }

        debug!(
            target: "script",
            "[{label}] loaded {source_label}: {} of {} call-ins wired",
            table.iter().flatten().count(),
            registry.len()
        );

        Ok(Self { kind, policy, engine, ast, scope, valid_call_ins, table, shared })
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Whether the registry-level requirements make this call-in available
    /// to the module at all (implemented or not).
    pub fn can_use(&self, call_in: CallIn) -> bool {
        self.valid_call_ins.contains(&call_in)
    }

    /// The module-registered function for this code, if any. Absence is not
    /// an error; call-ins are optional overrides.
    pub fn call_in_entry(&self, call_in: CallIn) -> Option<&'static str> {
        let name = self.table.get(call_in.code() as usize).copied().flatten()?;
        if self.shared.borrow().disabled.contains(name) {
            return None;
        }
        Some(name)
    }

    pub fn has_call_in(&self, call_in: CallIn) -> bool {
        self.call_in_entry(call_in).is_some()
    }

    /// Invokes the guest function under a protected call. Guest failures are
    /// appended to the bounded error ring and never propagate; a single
    /// failing call-in never disables the module.
    pub fn run_call_in(&mut self, call_in: CallIn, args: Vec<Dynamic>) -> CallOutcome {
        let Some(name) = self.call_in_entry(call_in) else {
            return CallOutcome::Absent;
        };

        let depth = self.scope.len();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result = self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            name,
            args,
        );
        if self.scope.len() != depth {
            // An asymmetric binding pushed or popped; repair and report.
            warn!(
                target: "script",
                "[{}] scope imbalance after {name}: {depth} -> {}",
                self.kind.name(),
                self.scope.len()
            );
            self.scope.rewind(depth);
        }

        match result {
            Ok(value) => CallOutcome::Value(value),
            Err(err) => {
                if missing_function(&err, name) {
                    return CallOutcome::Absent;
                }
                self.record_failure(name, err.to_string());
                CallOutcome::NoResult
            }
        }
    }

    fn record_failure(&self, call_in: &'static str, message: String) {
        warn!(target: "script", "[{}] {call_in} failed: {message}", self.kind.name());
        let mut shared = self.shared.borrow_mut();
        shared.errors.push_back(CallInFailure { call_in, message });
        while shared.errors.len() > MAX_RECENT_ERRORS {
            shared.errors.pop_front();
        }
    }

    pub fn error_count(&self) -> usize {
        self.shared.borrow().errors.len()
    }

    pub fn recent_errors(&self) -> Vec<CallInFailure> {
        self.shared.borrow().errors.iter().cloned().collect()
    }

    pub fn take_reload_request(&mut self) -> Option<String> {
        self.shared.borrow_mut().request_reload.take()
    }

    pub fn take_disable_request(&mut self) -> Option<String> {
        self.shared.borrow_mut().request_disable.take()
    }

    pub fn take_commands(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.shared.borrow_mut().commands)
    }
}

/// True when the failure is "the invoked call-in itself is not defined",
/// which counts as absence. A missing function deeper in the guest's own
/// call chain is a real error and gets logged.
fn missing_function(err: &EvalAltResult, name: &str) -> bool {
    match err {
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            let signature = signature.as_str();
            signature == name
                || signature
                    .strip_prefix(name)
                    .map_or(false, |rest| rest.starts_with(' ') || rest.starts_with('('))
        }
        _ => false,
    }
}
