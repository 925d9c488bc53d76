pub mod api;
pub mod callin;
pub mod capability;
pub mod commands;
pub mod config;
pub mod docket;
pub mod fetch;
pub mod host;
pub mod settings;
pub mod supervisor;
pub mod vfs;

pub use config::ScriptingConfig;
pub use docket::Docket;
pub use supervisor::{ModuleKind, ModuleSupervisor};
