use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use rand::Rng;
use rhai::{Dynamic, Engine};
use tracing::debug;

use crate::capability::{Capabilities, CapabilityPolicy};
use crate::host::{HostCommand, HostContext, HostShared};
use crate::supervisor::ModuleKind;

/// Read-only snapshot of one player, refreshed by the embedder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerView {
    pub id: i64,
    pub callsign: String,
    pub team: i64,
    pub pos: [f64; 3],
    pub alive: bool,
}

/// The game state slice exposed to full-read modules. The embedder updates
/// it between ticks; guests only ever see copies of its fields.
#[derive(Debug, Clone, Default)]
pub struct WorldView {
    pub map_name: String,
    pub world_size: f64,
    pub players: Vec<PlayerView>,
}

impl WorldView {
    pub fn player(&self, id: i64) -> Option<&PlayerView> {
        self.players.iter().find(|player| player.id == id)
    }
}

#[derive(Clone, Default)]
pub struct WorldViewHandle {
    inner: Rc<RefCell<WorldView>>,
}

impl WorldViewHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow(&self) -> Ref<'_, WorldView> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, WorldView> {
        self.inner.borrow_mut()
    }
}

/// Registers every call-out the module's capabilities admit. Surfaces the
/// module lacks are simply never registered, so a gated call reads as an
/// unknown function from guest code.
pub fn install(
    engine: &mut Engine,
    kind: ModuleKind,
    policy: &CapabilityPolicy,
    shared: Rc<RefCell<HostShared>>,
    ctx: &HostContext,
) {
    install_base(engine, kind, policy, Rc::clone(&shared), ctx);
    if policy.satisfies(Capabilities::FULL_READ) {
        install_full_read(engine, ctx);
    }
    if policy.satisfies(Capabilities::GAME_CTRL) {
        install_game_ctrl(engine, Rc::clone(&shared));
    }
    if policy.satisfies(Capabilities::INPUT_CTRL) {
        install_input_ctrl(engine, shared);
    }
}

fn install_base(
    engine: &mut Engine,
    kind: ModuleKind,
    policy: &CapabilityPolicy,
    shared: Rc<RefCell<HostShared>>,
    ctx: &HostContext,
) {
    let label = kind.name();
    engine.register_fn("log", move |message: &str| {
        debug!(target: "script", "[{label}] {message}");
    });

    engine.register_fn("script_name", move || label.to_string());

    let caps = policy.caps;
    engine.register_fn("has_full_read", move || caps.contains(Capabilities::FULL_READ));
    engine.register_fn("has_game_ctrl", move || caps.contains(Capabilities::GAME_CTRL));
    engine.register_fn("has_input_ctrl", move || caps.contains(Capabilities::INPUT_CTRL));

    let epoch = ctx.epoch;
    engine.register_fn("game_time", move || epoch.elapsed().as_secs_f64());

    engine.register_fn("random_range", |min: f64, max: f64| {
        if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        }
    });

    {
        let shared = Rc::clone(&shared);
        engine.register_fn("can_use_call_in", move |name: &str| {
            shared.borrow().valid_names.contains(name)
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("set_call_in", move |name: &str, active: bool| -> bool {
            let mut shared = shared.borrow_mut();
            if !shared.valid_names.contains(name) || !shared.defined.contains(name) {
                return false;
            }
            if active {
                shared.disabled.remove(name);
            } else {
                shared.disabled.insert(name.to_string());
            }
            true
        });
    }

    {
        let shared = Rc::clone(&shared);
        engine.register_fn("request_reload", move || {
            shared.borrow_mut().request_reload = Some(String::new());
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("request_reload", move |reason: &str| {
            shared.borrow_mut().request_reload = Some(reason.to_string());
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("request_disable", move || {
            shared.borrow_mut().request_disable = Some(String::new());
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("request_disable", move |reason: &str| {
            shared.borrow_mut().request_disable = Some(reason.to_string());
        });
    }

    {
        let shared = Rc::clone(&shared);
        engine.register_fn("send_chat", move |message: &str| {
            shared
                .borrow_mut()
                .commands
                .push(HostCommand::SendChat { message: message.to_string() });
        });
    }

    {
        let settings = ctx.settings.clone();
        engine.register_fn("settings_get", move |key: &str| -> String {
            settings.borrow().get_or(key, "").to_string()
        });
    }
    {
        let settings = ctx.settings.clone();
        engine.register_fn("settings_is_true", move |key: &str| settings.borrow().is_true(key));
    }
    {
        let settings = ctx.settings.clone();
        let policy = policy.clone();
        engine.register_fn("settings_set", move |key: &str, value: &str| -> bool {
            if !policy.can_write_setting(key) {
                return false;
            }
            settings.borrow_mut().set(key, value);
            true
        });
    }

    install_vfs(engine, policy, ctx);
}

/// Filesystem call-outs. Guest paths may carry a `:modes:` override, so the
/// ceiling passed down is the allowed set for prefixed paths and the default
/// set otherwise; the router intersects overrides against it.
fn install_vfs(engine: &mut Engine, policy: &CapabilityPolicy, ctx: &HostContext) {
    fn read_ceiling(policy: &CapabilityPolicy, path: &str) -> String {
        policy.read_modes_for(path).to_string()
    }
    fn write_ceiling(policy: &CapabilityPolicy, path: &str) -> String {
        policy.write_modes_for(path).to_string()
    }

    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_file_exists", move |path: &str| {
            vfs.borrow().file_exists(path, &read_ceiling(&policy, path))
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_file_size", move |path: &str| -> i64 {
            vfs.borrow()
                .file_size(path, &read_ceiling(&policy, path))
                .map_or(-1, |size| size as i64)
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_read_file", move |path: &str| -> Dynamic {
            match vfs.borrow().read_file(path, &read_ceiling(&policy, path)) {
                Some(data) => Dynamic::from(String::from_utf8_lossy(&data).into_owned()),
                None => Dynamic::UNIT,
            }
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_write_file", move |path: &str, data: &str| {
            vfs.borrow().write_file(path, &write_ceiling(&policy, path), data.as_bytes())
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_append_file", move |path: &str, data: &str| {
            vfs.borrow().append_file(path, &write_ceiling(&policy, path), data.as_bytes())
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_remove_file", move |path: &str| {
            vfs.borrow().remove_file(path, &write_ceiling(&policy, path))
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_rename_file", move |old: &str, new: &str| {
            vfs.borrow().rename_file(old, new, &write_ceiling(&policy, old))
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_create_dir", move |path: &str| {
            vfs.borrow().create_dir(path, &write_ceiling(&policy, path))
        });
    }
    {
        let vfs = ctx.vfs.clone();
        let policy = policy.clone();
        engine.register_fn("vfs_dir_list", move |path: &str, recursive: bool| -> rhai::Map {
            let (files, dirs) =
                vfs.borrow().dir_list(path, &read_ceiling(&policy, path), recursive);
            let mut map = rhai::Map::new();
            map.insert(
                "files".into(),
                Dynamic::from_array(files.into_iter().map(Dynamic::from).collect()),
            );
            map.insert(
                "dirs".into(),
                Dynamic::from_array(dirs.into_iter().map(Dynamic::from).collect()),
            );
            map
        });
    }
    {
        let policy = policy.clone();
        engine.register_fn("vfs_get_modes", move || -> rhai::Map {
            let mut map = rhai::Map::new();
            map.insert("read_default".into(), policy.read_default.clone().into());
            map.insert("read_allowed".into(), policy.read_allowed.clone().into());
            map.insert("write_default".into(), policy.write_default.clone().into());
            map.insert("write_allowed".into(), policy.write_allowed.clone().into());
            map
        });
    }
}

fn install_full_read(engine: &mut Engine, ctx: &HostContext) {
    {
        let world = ctx.world.clone();
        engine.register_fn("map_name", move || world.borrow().map_name.clone());
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("world_size", move || world.borrow().world_size);
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_count", move || world.borrow().players.len() as i64);
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_ids", move || -> rhai::Array {
            world.borrow().players.iter().map(|player| Dynamic::from(player.id)).collect()
        });
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_callsign", move |id: i64| -> String {
            world.borrow().player(id).map_or_else(String::new, |player| player.callsign.clone())
        });
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_team", move |id: i64| -> i64 {
            world.borrow().player(id).map_or(-1, |player| player.team)
        });
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_pos", move |id: i64| -> rhai::Array {
            world.borrow().player(id).map_or_else(Vec::new, |player| {
                player.pos.iter().map(|&coord| Dynamic::from(coord)).collect()
            })
        });
    }
    {
        let world = ctx.world.clone();
        engine.register_fn("player_alive", move |id: i64| {
            world.borrow().player(id).is_some_and(|player| player.alive)
        });
    }
}

fn install_game_ctrl(engine: &mut Engine, shared: Rc<RefCell<HostShared>>) {
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("request_spawn", move || {
            shared.borrow_mut().commands.push(HostCommand::RequestSpawn);
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("drop_flag", move || {
            shared.borrow_mut().commands.push(HostCommand::DropFlag);
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("teleport_to", move |x: f64, y: f64, z: f64| {
            shared.borrow_mut().commands.push(HostCommand::TeleportTo { x, y, z });
        });
    }
}

fn install_input_ctrl(engine: &mut Engine, shared: Rc<RefCell<HostShared>>) {
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("warp_mouse", move |x: i64, y: i64| {
            shared.borrow_mut().commands.push(HostCommand::WarpMouse { x, y });
        });
    }
    {
        let shared = Rc::clone(&shared);
        engine.register_fn("set_input_grab", move |grab: bool| {
            shared.borrow_mut().commands.push(HostCommand::GrabInput { grab });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callin::{CallIn, CallInRegistry};
    use crate::host::{CallOutcome, ScriptHost};
    use crate::vfs::RawFs;
    use std::time::Instant;

    fn test_context() -> HostContext {
        HostContext {
            vfs: crate::vfs::VfsHandle::new(),
            settings: crate::settings::SettingsHandle::new(),
            world: WorldViewHandle::new(),
            epoch: Instant::now(),
            max_operations: 1_000_000,
        }
    }

    fn host_with(
        ctx: &HostContext,
        caps: Capabilities,
        write_allowed: &str,
        source: &str,
    ) -> ScriptHost {
        let registry = CallInRegistry::new();
        let policy = CapabilityPolicy::new(caps, "U", "U", write_allowed);
        ScriptHost::new(ModuleKind::User, policy, &registry, ctx, source, "api_test.rhai")
            .expect("host should build")
    }

    fn run_update(host: &mut ScriptHost) -> CallOutcome {
        host.run_call_in(CallIn::Update, Vec::new())
    }

    #[test]
    fn settings_writes_respect_the_policy() {
        let ctx = test_context();
        let mut with_ctrl = host_with(
            &ctx,
            Capabilities::GAME_CTRL,
            "",
            r#"fn Update() { settings_set("teamColor", "red") }"#,
        );
        match run_update(&mut with_ctrl) {
            CallOutcome::Value(value) => assert!(value.as_bool().expect("bool result")),
            other => panic!("expected a value, got {other:?}"),
        }
        assert_eq!(ctx.settings.borrow().get("teamColor"), Some("red"));

        let mut server_owned = host_with(
            &ctx,
            Capabilities::GAME_CTRL,
            "",
            r#"fn Update() { settings_set("_forbidUserScripts", "1") }"#,
        );
        match run_update(&mut server_owned) {
            CallOutcome::Value(value) => assert!(!value.as_bool().expect("bool result")),
            other => panic!("expected a value, got {other:?}"),
        }
        assert_eq!(ctx.settings.borrow().get("_forbidUserScripts"), None);

        let mut no_ctrl = host_with(
            &ctx,
            Capabilities::empty(),
            "",
            r#"fn Update() { settings_set("teamColor", "blue") }"#,
        );
        match run_update(&mut no_ctrl) {
            CallOutcome::Value(value) => assert!(!value.as_bool().expect("bool result")),
            other => panic!("expected a value, got {other:?}"),
        }
        assert_eq!(ctx.settings.borrow().get("teamColor"), Some("red"));
    }

    #[test]
    fn gated_surfaces_are_not_registered() {
        let ctx = test_context();
        let mut host =
            host_with(&ctx, Capabilities::empty(), "", "fn Update() { player_count() }");
        assert!(matches!(run_update(&mut host), CallOutcome::NoResult));
        assert_eq!(host.error_count(), 1);
        assert!(host.recent_errors()[0].message.contains("player_count"));
    }

    #[test]
    fn world_views_reach_the_guest() {
        let ctx = test_context();
        {
            let mut world = ctx.world.borrow_mut();
            world.map_name = "pillbox".to_string();
            world.world_size = 400.0;
            world.players.push(PlayerView {
                id: 7,
                callsign: "tanker".to_string(),
                team: 2,
                pos: [1.0, 2.0, 3.0],
                alive: true,
            });
        }
        let mut host = host_with(
            &ctx,
            Capabilities::FULL_READ,
            "",
            r#"fn Update() { `${map_name()}:${player_callsign(7)}:${player_team(9)}` }"#,
        );
        match run_update(&mut host) {
            CallOutcome::Value(value) => {
                assert_eq!(value.into_string().expect("string result"), "pillbox:tanker:-1");
            }
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[test]
    fn vfs_writes_route_through_the_ceiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context();
        ctx.vfs.borrow_mut().mount('U', Box::new(RawFs::new(dir.path())), true);

        let mut host = host_with(
            &ctx,
            Capabilities::empty(),
            "U",
            r#"fn Update() { vfs_write_file("out.txt", "hello") }"#,
        );
        match run_update(&mut host) {
            CallOutcome::Value(value) => assert!(value.as_bool().expect("bool result")),
            other => panic!("expected a value, got {other:?}"),
        }
        let written = std::fs::read_to_string(dir.path().join("out.txt")).expect("file on disk");
        assert_eq!(written, "hello");

        // Same mount, but a policy whose write ceiling is empty.
        let mut sealed = host_with(
            &ctx,
            Capabilities::empty(),
            "",
            r#"fn Update() { vfs_write_file("blocked.txt", "nope") }"#,
        );
        match run_update(&mut sealed) {
            CallOutcome::Value(value) => assert!(!value.as_bool().expect("bool result")),
            other => panic!("expected a value, got {other:?}"),
        }
        assert!(!dir.path().join("blocked.txt").exists());
    }

    #[test]
    fn command_effects_are_queued_not_applied() {
        let ctx = test_context();
        let mut host = host_with(
            &ctx,
            Capabilities::GAME_CTRL,
            "",
            r#"fn Update() { request_spawn(); teleport_to(1.0, 2.0, 3.0); }"#,
        );
        assert!(matches!(run_update(&mut host), CallOutcome::Value(_)));
        assert_eq!(
            host.take_commands(),
            vec![
                HostCommand::RequestSpawn,
                HostCommand::TeleportTo { x: 1.0, y: 2.0, z: 3.0 },
            ]
        );
        assert!(host.take_commands().is_empty());
    }

    #[test]
    fn degenerate_random_ranges_do_not_panic() {
        let ctx = test_context();
        let mut host = host_with(
            &ctx,
            Capabilities::empty(),
            "",
            "fn Update() { random_range(5.0, 5.0) }",
        );
        match run_update(&mut host) {
            CallOutcome::Value(value) => {
                assert_eq!(value.as_float().expect("float result"), 5.0);
            }
            other => panic!("expected a value, got {other:?}"),
        }
    }
}
