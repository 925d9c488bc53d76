use std::time::Instant;

use anyhow::{bail, Context, Result};
use rhai::Dynamic;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::api::WorldViewHandle;
use crate::callin::{CallIn, CallInRegistry, LoopType};
use crate::capability::{Capabilities, CapabilityPolicy};
use crate::config::ScriptingConfig;
use crate::docket::Docket;
use crate::fetch::{FetchPoll, SourceFetch};
use crate::host::{CallOutcome, HostCommand, HostContext, ScriptHost};
use crate::settings::{SettingsHandle, FORBID_COMMUNITY_SCRIPTS, FORBID_USER_SCRIPTS};
use crate::vfs::{forbid_modes, tags, CacheFs, DocketFs, VfsHandle, BASIC_MODES};

/// The four module roles. Each gets at most one host, a fixed capability
/// set and fixed VFS mode ceilings; nothing a guest does can widen them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    User,
    World,
    Rules,
    Community,
}

/// Dispatch iterates slots in this order; draw call-ins run it reversed so
/// the user module draws last (on top) but handles events first.
pub const DISPATCH_ORDER: [ModuleKind; 4] =
    [ModuleKind::User, ModuleKind::Community, ModuleKind::World, ModuleKind::Rules];

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] =
        [ModuleKind::User, ModuleKind::World, ModuleKind::Rules, ModuleKind::Community];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::User => "user",
            ModuleKind::World => "world",
            ModuleKind::Rules => "rules",
            ModuleKind::Community => "community",
        }
    }

    /// Source file looked up in the mounts; empty for the community module,
    /// whose source arrives over HTTP instead.
    pub fn source_file(self) -> &'static str {
        match self {
            ModuleKind::User => "user.rhai",
            ModuleKind::World => "world.rhai",
            ModuleKind::Rules => "rules.rhai",
            ModuleKind::Community => "",
        }
    }

    /// Mounts the source may come from. Dev mode lets the user-script dir
    /// shadow the world docket for map-script development.
    pub fn source_modes(self, dev_mode: bool) -> &'static str {
        match self {
            ModuleKind::User => "u",
            ModuleKind::World | ModuleKind::Rules => {
                if dev_mode {
                    "uw"
                } else {
                    "w"
                }
            }
            ModuleKind::Community => "",
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            ModuleKind::User | ModuleKind::World => {
                Capabilities::FULL_READ | Capabilities::INPUT_CTRL
            }
            ModuleKind::Rules => Capabilities::all(),
            ModuleKind::Community => Capabilities::INPUT_CTRL,
        }
    }

    /// Mode ceilings composed from [`BASIC_MODES`] plus the module's own
    /// mounts. The community module never sees the config store.
    pub fn policy(self) -> CapabilityPolicy {
        let caps = self.capabilities();
        match self {
            ModuleKind::User => {
                CapabilityPolicy::new(caps, &format!("u{BASIC_MODES}"), &format!("u{BASIC_MODES}U"), "U")
            }
            ModuleKind::World => {
                CapabilityPolicy::new(caps, &format!("w{BASIC_MODES}"), &format!("w{BASIC_MODES}W"), "W")
            }
            ModuleKind::Rules => {
                let read = format!("w{BASIC_MODES}");
                CapabilityPolicy::new(caps, &read, &read, "")
            }
            ModuleKind::Community => {
                let read = forbid_modes(BASIC_MODES, "c");
                CapabilityPolicy::new(caps, &read, &format!("{read}B"), "B")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Active,
}

/// Positional argument for a dispatch, marshaled by value into the guest.
#[derive(Debug, Clone, PartialEq)]
pub enum CallValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl CallValue {
    fn to_dynamic(&self) -> Dynamic {
        match self {
            CallValue::Bool(value) => Dynamic::from(*value),
            CallValue::Int(value) => Dynamic::from(*value),
            CallValue::Float(value) => Dynamic::from(*value),
            CallValue::Str(value) => Dynamic::from(value.clone()),
        }
    }
}

impl From<bool> for CallValue {
    fn from(value: bool) -> Self {
        CallValue::Bool(value)
    }
}

impl From<i64> for CallValue {
    fn from(value: i64) -> Self {
        CallValue::Int(value)
    }
}

impl From<f64> for CallValue {
    fn from(value: f64) -> Self {
        CallValue::Float(value)
    }
}

impl From<&str> for CallValue {
    fn from(value: &str) -> Self {
        CallValue::Str(value.to_string())
    }
}

impl From<String> for CallValue {
    fn from(value: String) -> Self {
        CallValue::Str(value)
    }
}

/// What a dispatch loop produced, shaped by the call-in's loop type.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Done,
    Flag(bool),
    Text(Option<String>),
    Words(Vec<String>),
}

impl DispatchResult {
    pub fn flag(self) -> bool {
        matches!(self, DispatchResult::Flag(true))
    }

    pub fn text(self) -> Option<String> {
        match self {
            DispatchResult::Text(text) => text,
            _ => None,
        }
    }

    pub fn words(self) -> Vec<String> {
        match self {
            DispatchResult::Words(words) => words,
            _ => Vec::new(),
        }
    }
}

struct PendingReload {
    source: Option<String>,
    reason: String,
}

struct ModuleSlot {
    kind: ModuleKind,
    host: Option<ScriptHost>,
    fetch: Option<SourceFetch>,
    pending_reload: Option<PendingReload>,
    pending_disable: Option<String>,
    last_message: String,
}

impl ModuleSlot {
    fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            host: None,
            fetch: None,
            pending_reload: None,
            pending_disable: None,
            last_message: String::new(),
        }
    }
}

/// Owns the four module slots and everything they share: the call-in
/// registry, the VFS router, the settings store and the world view. All
/// lifecycle transitions requested while guests are running are deferred to
/// the next `update`; `&mut self` on the dispatch entry points makes guest
/// reentry into the supervisor impossible by construction.
pub struct ModuleSupervisor {
    registry: CallInRegistry,
    config: ScriptingConfig,
    ctx: HostContext,
    http_cache: CacheFs,
    slots: [ModuleSlot; 4],
    commands: Vec<(ModuleKind, HostCommand)>,
}

impl ModuleSupervisor {
    pub fn new(config: ScriptingConfig) -> Self {
        let vfs = VfsHandle::new();
        vfs.borrow_mut().reset(&config);
        let http_cache = CacheFs::http(config.cache_dir.join("http"));
        let ctx = HostContext {
            vfs,
            settings: SettingsHandle::new(),
            world: WorldViewHandle::new(),
            epoch: Instant::now(),
            max_operations: config.max_script_operations,
        };
        Self {
            registry: CallInRegistry::new(),
            config,
            ctx,
            http_cache,
            slots: ModuleKind::ALL.map(ModuleSlot::new),
            commands: Vec::new(),
        }
    }

    pub fn registry(&self) -> &CallInRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.ctx.settings
    }

    pub fn world(&self) -> &WorldViewHandle {
        &self.ctx.world
    }

    pub fn vfs(&self) -> &VfsHandle {
        &self.ctx.vfs
    }

    pub fn host(&self, kind: ModuleKind) -> Option<&ScriptHost> {
        self.slots[kind.index()].host.as_ref()
    }

    pub fn state(&self, kind: ModuleKind) -> ModuleState {
        let slot = &self.slots[kind.index()];
        if slot.host.is_some() {
            ModuleState::Active
        } else if slot.fetch.is_some() {
            ModuleState::Loading
        } else {
            ModuleState::Unloaded
        }
    }

    pub fn status_line(&self, kind: ModuleKind) -> String {
        let slot = &self.slots[kind.index()];
        match self.state(kind) {
            ModuleState::Active => {
                let errors = slot.host.as_ref().map_or(0, ScriptHost::error_count);
                format!(
                    "{}: active ({}, {} recent errors)",
                    kind.name(),
                    kind.capabilities().label(),
                    errors
                )
            }
            ModuleState::Loading => format!("{}: downloading", kind.name()),
            ModuleState::Unloaded if !slot.last_message.is_empty() => {
                format!("{}: not loaded ({})", kind.name(), slot.last_message)
            }
            ModuleState::Unloaded => format!("{}: not loaded", kind.name()),
        }
    }

    /// Starts the modules that exist outside any world: the user module from
    /// its mount and the community module from its URL. Absence is normal.
    pub fn boot(&mut self) {
        for kind in [ModuleKind::User, ModuleKind::Community] {
            if let Err(err) = self.load(kind) {
                info!(target: "script", "{} module not started: {err:#}", kind.name());
            }
        }
    }

    pub fn load(&mut self, kind: ModuleKind) -> Result<()> {
        let result = self.try_load(kind);
        self.record_outcome(kind, result)
    }

    pub fn load_with_source(&mut self, kind: ModuleKind, source: &str) -> Result<()> {
        let result = self.try_load_with_source(kind, source);
        self.record_outcome(kind, result)
    }

    fn record_outcome(&mut self, kind: ModuleKind, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.slots[kind.index()].last_message.clear(),
            Err(err) => self.slots[kind.index()].last_message = format!("{err:#}"),
        }
        result
    }

    fn try_load(&mut self, kind: ModuleKind) -> Result<()> {
        self.ensure_idle(kind)?;
        self.check_forbid(kind)?;
        if kind == ModuleKind::Community {
            let url = self
                .config
                .community_url
                .clone()
                .context("no community url configured")?;
            info!(target: "script", "fetching community module from {url}");
            self.slots[kind.index()].fetch = Some(SourceFetch::spawn(&url));
            return Ok(());
        }
        let source = self.read_module_source(kind)?;
        self.try_load_with_source(kind, &source)
    }

    fn try_load_with_source(&mut self, kind: ModuleKind, source: &str) -> Result<()> {
        if self.slots[kind.index()].host.is_some() {
            bail!("{} module is already active", kind.name());
        }
        self.check_forbid(kind)?;
        let host = self.build_host(kind, source)?;
        let slot = &mut self.slots[kind.index()];
        slot.fetch = None;
        slot.host = Some(host);
        info!(target: "script", "{} module active ({})", kind.name(), kind.capabilities().label());
        Ok(())
    }

    fn ensure_idle(&self, kind: ModuleKind) -> Result<()> {
        let slot = &self.slots[kind.index()];
        if slot.host.is_some() {
            bail!("{} module is already active", kind.name());
        }
        if slot.fetch.is_some() {
            bail!("{} module is still downloading", kind.name());
        }
        Ok(())
    }

    fn check_forbid(&self, kind: ModuleKind) -> Result<()> {
        let settings = self.ctx.settings.borrow();
        match kind {
            ModuleKind::User if settings.is_true(FORBID_USER_SCRIPTS) => {
                bail!("user scripts are forbidden by the server")
            }
            ModuleKind::Community if settings.is_true(FORBID_COMMUNITY_SCRIPTS) => {
                bail!("community scripts are forbidden by the server")
            }
            _ => Ok(()),
        }
    }

    fn read_module_source(&self, kind: ModuleKind) -> Result<String> {
        let file = kind.source_file();
        if file.is_empty() {
            bail!("{} module has no on-disk source", kind.name());
        }
        let modes = kind.source_modes(self.config.dev_mode);
        self.ctx
            .vfs
            .borrow()
            .read_string(file, modes)
            .with_context(|| format!("{file} not found in mounts {modes:?}"))
    }

    fn build_host(&self, kind: ModuleKind, source: &str) -> Result<ScriptHost> {
        let label = match kind.source_file() {
            "" => "downloaded source",
            file => file,
        };
        ScriptHost::new(kind, kind.policy(), &self.registry, &self.ctx, source, label)
    }

    /// Tears the slot down, giving the guest its Shutdown call-in first.
    /// Pending requests and an in-flight fetch die with the slot.
    pub fn unload(&mut self, kind: ModuleKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        slot.fetch = None;
        slot.pending_reload = None;
        slot.pending_disable = None;
        let Some(mut host) = slot.host.take() else {
            return false;
        };
        host.run_call_in(CallIn::Shutdown, Vec::new());
        for command in host.take_commands() {
            self.commands.push((kind, command));
        }
        info!(target: "script", "{} module unloaded", kind.name());
        true
    }

    /// Immediate reload; callers running between ticks (command handlers,
    /// the embedder's own code) use this directly.
    pub fn reload(&mut self, kind: ModuleKind, source: Option<&str>) -> Result<()> {
        self.unload(kind);
        match source {
            Some(text) => self.load_with_source(kind, text),
            None => self.load(kind),
        }
    }

    /// Deferred variants, safe to call from anywhere; honored by the next
    /// `update` before any dispatch.
    pub fn request_reload(&mut self, kind: ModuleKind, source: Option<String>) {
        self.slots[kind.index()].pending_reload =
            Some(PendingReload { source, reason: String::new() });
    }

    pub fn request_disable(&mut self, kind: ModuleKind) {
        self.slots[kind.index()].pending_disable = Some(String::new());
    }

    /// One tick: guest lifecycle requests are collected and applied, fetches
    /// polled, queued setting changes announced, then Update dispatched.
    pub fn update(&mut self) {
        self.collect_guest_requests();
        self.poll_fetches();
        self.apply_pending();
        self.dispatch_setting_changes();
        self.dispatch(CallIn::Update, &[]);
    }

    fn collect_guest_requests(&mut self) {
        for slot in &mut self.slots {
            let Some(host) = slot.host.as_mut() else { continue };
            if let Some(reason) = host.take_reload_request() {
                slot.pending_reload = Some(PendingReload { source: None, reason });
            }
            if let Some(reason) = host.take_disable_request() {
                slot.pending_disable = Some(reason);
            }
        }
    }

    fn poll_fetches(&mut self) {
        for kind in ModuleKind::ALL {
            let Some(fetch) = self.slots[kind.index()].fetch.take() else { continue };
            match fetch.poll() {
                FetchPoll::Pending => self.slots[kind.index()].fetch = Some(fetch),
                FetchPoll::Done(data) => {
                    debug!(
                        target: "script",
                        "{} source arrived ({} bytes)",
                        kind.name(),
                        data.len()
                    );
                    self.http_cache.store(fetch.url(), &data);
                    let source = String::from_utf8_lossy(&data).into_owned();
                    if let Err(err) = self.load_with_source(kind, &source) {
                        warn!(target: "script", "{} fetched source rejected: {err:#}", kind.name());
                    }
                }
                FetchPoll::Failed(message) => {
                    warn!(target: "script", "{} fetch failed: {message}", kind.name());
                    self.slots[kind.index()].last_message = message;
                }
            }
        }
    }

    fn apply_pending(&mut self) {
        for kind in ModuleKind::ALL {
            let slot = &mut self.slots[kind.index()];
            let reload = slot.pending_reload.take();
            let disable = slot.pending_disable.take();
            if let Some(pending) = reload {
                if pending.reason.is_empty() {
                    info!(target: "script", "{} reloading", kind.name());
                } else {
                    info!(target: "script", "{} reloading: {}", kind.name(), pending.reason);
                }
                if let Err(err) = self.reload(kind, pending.source.as_deref()) {
                    warn!(target: "script", "{} reload failed: {err:#}", kind.name());
                }
            }
            if let Some(reason) = disable {
                if reason.is_empty() {
                    info!(target: "script", "{} disabled", kind.name());
                } else {
                    info!(target: "script", "{} disabled: {reason}", kind.name());
                }
                self.unload(kind);
            }
        }
    }

    fn dispatch_setting_changes(&mut self) {
        let changed = self.ctx.settings.borrow_mut().drain_changes();
        for key in changed {
            let value = self.ctx.settings.borrow().get_or(&key, "").to_string();
            self.dispatch(
                CallIn::SettingChange,
                &[CallValue::Str(key), CallValue::Str(value)],
            );
        }
    }

    /// Runs one call-in across the active hosts per its loop type. Hosts
    /// whose capabilities exclude the call-in simply have no table entry.
    pub fn dispatch(&mut self, call_in: CallIn, args: &[CallValue]) -> DispatchResult {
        let info = self.registry.info(call_in);
        let loop_type = info.loop_type;
        let reversed = info.reversed;
        let single = info.single_module;

        let mut order: SmallVec<[ModuleKind; 4]> = SmallVec::from_slice(&DISPATCH_ORDER);
        if let Some(owner) = single {
            order.retain(|kind| *kind == owner);
        }
        if reversed {
            order.reverse();
        }

        match loop_type {
            LoopType::Basic => {
                for kind in order {
                    self.run_slot(kind, call_in, args, None);
                }
                DispatchResult::Done
            }
            LoopType::FirstTrue => {
                for kind in order {
                    if truthy(self.run_slot(kind, call_in, args, None)) {
                        return DispatchResult::Flag(true);
                    }
                }
                DispatchResult::Flag(false)
            }
            LoopType::TakenContinue => {
                let mut taken = false;
                for kind in order {
                    taken |= truthy(self.run_slot(kind, call_in, args, Some(taken)));
                }
                DispatchResult::Flag(taken)
            }
            LoopType::FirstString => {
                for kind in order {
                    if let CallOutcome::Value(value) = self.run_slot(kind, call_in, args, None) {
                        if let Ok(text) = value.into_string() {
                            if !text.is_empty() {
                                return DispatchResult::Text(Some(text));
                            }
                        }
                    }
                }
                DispatchResult::Text(None)
            }
            LoopType::Special => {
                let mut words = Vec::new();
                for kind in order {
                    if let CallOutcome::Value(value) = self.run_slot(kind, call_in, args, None) {
                        if let Ok(array) = value.into_array() {
                            for item in array {
                                if let Ok(word) = item.into_string() {
                                    if !word.is_empty() {
                                        words.push(word);
                                    }
                                }
                            }
                        }
                    }
                }
                words.sort_unstable();
                words.dedup();
                DispatchResult::Words(words)
            }
        }
    }

    pub(crate) fn run_slot(
        &mut self,
        kind: ModuleKind,
        call_in: CallIn,
        args: &[CallValue],
        taken: Option<bool>,
    ) -> CallOutcome {
        let Some(host) = self.slots[kind.index()].host.as_mut() else {
            return CallOutcome::Absent;
        };
        let mut dynamics = Vec::with_capacity(args.len() + 1);
        if let Some(flag) = taken {
            dynamics.push(Dynamic::from(flag));
        }
        dynamics.extend(args.iter().map(CallValue::to_dynamic));
        host.run_call_in(call_in, dynamics)
    }

    /// Queued guest effects since the last drain, oldest first.
    pub fn take_commands(&mut self) -> Vec<(ModuleKind, HostCommand)> {
        let mut out = std::mem::take(&mut self.commands);
        for slot in &mut self.slots {
            if let Some(host) = slot.host.as_mut() {
                for command in host.take_commands() {
                    out.push((slot.kind, command));
                }
            }
        }
        out
    }

    /// Mounts the world docket and starts its modules. A missing world or
    /// rules script is normal; a rules failure under `strict_boot` is not.
    pub fn load_world(&mut self, docket: Docket) -> Result<()> {
        self.unload_world();
        {
            let mut vfs = self.ctx.vfs.borrow_mut();
            vfs.unmount(tags::WORLD_READ);
            vfs.mount(tags::WORLD_READ, Box::new(DocketFs::new(docket)), false);
        }
        if let Err(err) = self.load(ModuleKind::World) {
            info!(target: "script", "world module not started: {err:#}");
        }
        if let Err(err) = self.load(ModuleKind::Rules) {
            if self.config.strict_boot {
                return Err(err.context("rules module failed under strict boot"));
            }
            info!(target: "script", "rules module not started: {err:#}");
        }
        Ok(())
    }

    pub fn unload_world(&mut self) {
        self.unload(ModuleKind::Rules);
        self.unload(ModuleKind::World);
        self.ctx.vfs.borrow_mut().unmount(tags::WORLD_READ);
    }

    // Event entry points for the embedder.

    pub fn server_joined(&mut self) {
        self.dispatch(CallIn::ServerJoined, &[]);
    }

    pub fn server_parted(&mut self) {
        self.dispatch(CallIn::ServerParted, &[]);
    }

    pub fn player_added(&mut self, id: i64) {
        self.dispatch(CallIn::PlayerAdded, &[id.into()]);
    }

    pub fn player_removed(&mut self, id: i64) {
        self.dispatch(CallIn::PlayerRemoved, &[id.into()]);
    }

    pub fn player_spawned(&mut self, id: i64) {
        self.dispatch(CallIn::PlayerSpawned, &[id.into()]);
    }

    pub fn player_killed(&mut self, victim: i64, killer: i64) {
        self.dispatch(CallIn::PlayerKilled, &[victim.into(), killer.into()]);
    }

    /// True when a listener consumed the message.
    pub fn recv_chat_msg(&mut self, from: &str, message: &str) -> bool {
        self.dispatch(CallIn::RecvChatMsg, &[from.into(), message.into()]).flag()
    }

    pub fn recv_command(&mut self, line: &str) -> bool {
        self.dispatch(CallIn::RecvCommand, &[line.into()]).flag()
    }

    pub fn command_fallback(&mut self, line: &str) -> bool {
        self.dispatch(CallIn::CommandFallback, &[line.into()]).flag()
    }

    pub fn gl_resize(&mut self, width: i64, height: i64) {
        self.dispatch(CallIn::GLResize, &[width.into(), height.into()]);
    }

    pub fn gl_context_init(&mut self) {
        self.dispatch(CallIn::GLReload, &[]);
    }

    pub fn gl_context_free(&mut self) {
        self.dispatch(CallIn::GLContextFree, &[]);
    }

    /// One frame's draw pass: every draw call-in in declaration order, each
    /// dispatched across the slots in reverse so the user module lands on top.
    pub fn draw_frame(&mut self) {
        let draws: SmallVec<[CallIn; 8]> = self
            .registry
            .infos()
            .iter()
            .filter(|info| info.is_draw)
            .map(|info| info.call_in)
            .collect();
        for call_in in draws {
            self.dispatch(call_in, &[]);
        }
    }

    /// Dispatch by internal event name, resolving the context-init alias.
    pub fn fire_event(&mut self, event_name: &str, args: &[CallValue]) -> Option<DispatchResult> {
        let call_in = self.registry.call_in_for_event(event_name)?;
        Some(self.dispatch(call_in, args))
    }

    pub fn key_press(&mut self, key: &str, mods: i64) -> bool {
        self.dispatch(CallIn::KeyPress, &[key.into(), mods.into()]).flag()
    }

    pub fn key_release(&mut self, key: &str, mods: i64) -> bool {
        self.dispatch(CallIn::KeyRelease, &[key.into(), mods.into()]).flag()
    }

    pub fn unicode_text(&mut self, text: &str) -> bool {
        self.dispatch(CallIn::UnicodeText, &[text.into()]).flag()
    }

    pub fn mouse_press(&mut self, x: i64, y: i64, button: i64) -> bool {
        self.dispatch(CallIn::MousePress, &[x.into(), y.into(), button.into()]).flag()
    }

    pub fn mouse_move(&mut self, x: i64, y: i64) -> bool {
        self.dispatch(CallIn::MouseMove, &[x.into(), y.into()]).flag()
    }

    pub fn mouse_release(&mut self, x: i64, y: i64, button: i64) -> bool {
        self.dispatch(CallIn::MouseRelease, &[x.into(), y.into(), button.into()]).flag()
    }

    pub fn mouse_wheel(&mut self, delta: f64) -> bool {
        self.dispatch(CallIn::MouseWheel, &[delta.into()]).flag()
    }

    pub fn is_above(&mut self, x: i64, y: i64) -> bool {
        self.dispatch(CallIn::IsAbove, &[x.into(), y.into()]).flag()
    }

    pub fn get_tooltip(&mut self, x: i64, y: i64) -> Option<String> {
        self.dispatch(CallIn::GetTooltip, &[x.into(), y.into()]).text()
    }

    pub fn word_complete(&mut self, line: &str) -> Vec<String> {
        self.dispatch(CallIn::WordComplete, &[line.into()]).words()
    }

    pub fn forbid_spawn(&mut self) -> bool {
        self.dispatch(CallIn::ForbidSpawn, &[]).flag()
    }

    pub fn forbid_jump(&mut self) -> bool {
        self.dispatch(CallIn::ForbidJump, &[]).flag()
    }

    pub fn forbid_flag_drop(&mut self) -> bool {
        self.dispatch(CallIn::ForbidFlagDrop, &[]).flag()
    }

    pub fn forbid_shot(&mut self) -> bool {
        self.dispatch(CallIn::ForbidShot, &[]).flag()
    }

    pub fn forbid_shot_lock(&mut self, target: i64) -> bool {
        self.dispatch(CallIn::ForbidShotLock, &[target.into()]).flag()
    }

    pub fn forbid_shot_hit(&mut self, shot: i64) -> bool {
        self.dispatch(CallIn::ForbidShotHit, &[shot.into()]).flag()
    }
}

fn truthy(outcome: CallOutcome) -> bool {
    match outcome {
        CallOutcome::Value(value) => value.as_bool().unwrap_or(false),
        _ => false,
    }
}
