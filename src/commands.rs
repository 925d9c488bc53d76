use crate::callin::CallIn;
use crate::host::CallOutcome;
use crate::settings::{FORBID_COMMUNITY_SCRIPTS, FORBID_USER_SCRIPTS};
use crate::supervisor::{CallValue, ModuleKind, ModuleState, ModuleSupervisor};

/// Parsed form of one operator command line aimed at a module slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleCommand {
    Status,
    Reload { path: Option<String> },
    Disable,
    Custom(String),
}

impl ModuleCommand {
    pub fn parse(line: &str) -> ModuleCommand {
        let trimmed = line.trim();
        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };
        match word {
            "" | "status" => ModuleCommand::Status,
            "reload" => {
                ModuleCommand::Reload { path: (!rest.is_empty()).then(|| rest.to_string()) }
            }
            "disable" => ModuleCommand::Disable,
            _ => ModuleCommand::Custom(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub handled: bool,
    pub message: String,
}

impl CommandOutcome {
    fn handled(message: impl Into<String>) -> Self {
        Self { handled: true, message: message.into() }
    }

    fn unhandled() -> Self {
        Self { handled: false, message: String::new() }
    }
}

impl ModuleSupervisor {
    /// Executes one operator command against a module slot. These run from
    /// the embedder's console between ticks, so lifecycle effects apply
    /// immediately instead of being deferred.
    pub fn handle_command(&mut self, kind: ModuleKind, line: &str) -> CommandOutcome {
        match ModuleCommand::parse(line) {
            ModuleCommand::Status => CommandOutcome::handled(self.status_line(kind)),
            ModuleCommand::Reload { path } => self.command_reload(kind, path),
            ModuleCommand::Disable => self.command_disable(kind),
            ModuleCommand::Custom(text) => self.command_custom(kind, &text),
        }
    }

    /// Server pushes and the dev-mode switch bound which slots an operator
    /// may cycle; the rules module is hands-off outside development.
    fn lifecycle_gate(&self, kind: ModuleKind) -> Option<String> {
        let settings = self.settings().borrow();
        match kind {
            ModuleKind::User if settings.is_true(FORBID_USER_SCRIPTS) => {
                Some("user scripts are forbidden by the server".to_string())
            }
            ModuleKind::Community if settings.is_true(FORBID_COMMUNITY_SCRIPTS) => {
                Some("community scripts are forbidden by the server".to_string())
            }
            ModuleKind::Rules if !self.config().dev_mode => {
                Some("rules module commands require dev mode".to_string())
            }
            _ => None,
        }
    }

    fn command_reload(&mut self, kind: ModuleKind, path: Option<String>) -> CommandOutcome {
        if let Some(message) = self.lifecycle_gate(kind) {
            return CommandOutcome::handled(message);
        }
        let source = match &path {
            Some(path) => {
                let modes = kind.policy().read_allowed;
                let Some(text) = self.vfs().borrow().read_string(path, &modes) else {
                    return CommandOutcome::handled(format!("{path} not found"));
                };
                Some(text)
            }
            None => None,
        };
        match self.reload(kind, source.as_deref()) {
            Ok(()) => match self.state(kind) {
                ModuleState::Loading => {
                    CommandOutcome::handled(format!("{} download started", kind.name()))
                }
                _ => CommandOutcome::handled(format!("{} module reloaded", kind.name())),
            },
            Err(err) => {
                CommandOutcome::handled(format!("{} reload failed: {err:#}", kind.name()))
            }
        }
    }

    fn command_disable(&mut self, kind: ModuleKind) -> CommandOutcome {
        if let Some(message) = self.lifecycle_gate(kind) {
            return CommandOutcome::handled(message);
        }
        if self.unload(kind) {
            CommandOutcome::handled(format!("{} module disabled", kind.name()))
        } else {
            CommandOutcome::handled(format!("{} module was not running", kind.name()))
        }
    }

    /// Anything that is not a lifecycle word goes to the module's own
    /// RecvCommand handler; if it declines, the user module gets one shot at
    /// it through CommandFallback.
    fn command_custom(&mut self, kind: ModuleKind, line: &str) -> CommandOutcome {
        let outcome = self.run_slot(kind, CallIn::RecvCommand, &[CallValue::from(line)], None);
        if matches!(outcome, CallOutcome::Value(value) if value.as_bool().unwrap_or(false)) {
            return CommandOutcome::handled(String::new());
        }
        if self.command_fallback(line) {
            return CommandOutcome::handled(String::new());
        }
        CommandOutcome::unhandled()
    }
}
