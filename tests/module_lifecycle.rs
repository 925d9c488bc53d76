use std::fs;

use saker_scripting::config::ScriptingConfig;
use saker_scripting::host::HostCommand;
use saker_scripting::settings::FORBID_COMMUNITY_SCRIPTS;
use saker_scripting::supervisor::{ModuleKind, ModuleState, ModuleSupervisor};

fn test_supervisor() -> (tempfile::TempDir, ModuleSupervisor) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ScriptingConfig::rooted_at(dir.path());
    (dir, ModuleSupervisor::new(config))
}

fn write_user_script(supervisor: &ModuleSupervisor, source: &str) {
    let path = supervisor.config().user_script_dir.join("user.rhai");
    fs::write(path, source).expect("user script written");
}

fn chats(commands: Vec<(ModuleKind, HostCommand)>) -> Vec<String> {
    commands
        .into_iter()
        .filter_map(|(_, command)| match command {
            HostCommand::SendChat { message } => Some(message),
            _ => None,
        })
        .collect()
}

#[test]
fn top_level_statements_run_once_per_load() {
    let (_dir, mut supervisor) = test_supervisor();
    write_user_script(
        &supervisor,
        r#"
            vfs_append_file(":U:boot.txt", "x");
            fn Update() {
                if !vfs_file_exists(":U:done.txt") {
                    vfs_write_file(":U:done.txt", "1");
                    request_reload("fresh copy please");
                }
            }
        "#,
    );
    supervisor.boot();
    let boot_log = supervisor.config().config_dir.join("UserScript/boot.txt");
    assert_eq!(fs::read_to_string(&boot_log).expect("boot log"), "x");

    // Tick 1 runs Update, which requests a reload for the next boundary.
    supervisor.update();
    assert_eq!(fs::read_to_string(&boot_log).expect("boot log"), "x");

    // Tick 2 performs the reload, re-running the top level exactly once.
    supervisor.update();
    assert_eq!(fs::read_to_string(&boot_log).expect("boot log"), "xx");

    // No further reloads are pending; the count stays put.
    supervisor.update();
    supervisor.update();
    assert_eq!(fs::read_to_string(&boot_log).expect("boot log"), "xx");
    assert_eq!(supervisor.state(ModuleKind::User), ModuleState::Active);
}

#[test]
fn guest_disable_requests_apply_at_the_next_boundary() {
    let (_dir, mut supervisor) = test_supervisor();
    write_user_script(
        &supervisor,
        r#"
            fn Update() { send_chat("beat"); request_disable("all done"); }
            fn Shutdown() { send_chat("goodbye"); }
        "#,
    );
    supervisor.boot();

    supervisor.update();
    assert_eq!(supervisor.state(ModuleKind::User), ModuleState::Active);

    supervisor.update();
    assert_eq!(supervisor.state(ModuleKind::User), ModuleState::Unloaded);

    // Exactly one heartbeat, then the Shutdown farewell; never a second beat.
    assert_eq!(chats(supervisor.take_commands()), vec!["beat", "goodbye"]);

    supervisor.update();
    assert!(supervisor.take_commands().is_empty());
}

#[test]
fn guest_errors_are_capped_while_the_module_keeps_running() {
    let (_dir, mut supervisor) = test_supervisor();
    write_user_script(
        &supervisor,
        r#"
            fn Update() { this_function_does_not_exist(); }
            fn ServerJoined() { send_chat("still here"); }
        "#,
    );
    supervisor.boot();

    for _ in 0..2_000 {
        supervisor.update();
    }
    let host = supervisor.host(ModuleKind::User).expect("still active");
    assert_eq!(host.error_count(), 1024);
    assert_eq!(supervisor.state(ModuleKind::User), ModuleState::Active);

    supervisor.server_joined();
    assert_eq!(chats(supervisor.take_commands()), vec!["still here"]);
}

#[test]
fn community_modules_load_from_source_with_narrow_capabilities() {
    let (_dir, mut supervisor) = test_supervisor();
    supervisor
        .reload(
            ModuleKind::Community,
            Some(
                r#"
                    fn Update() {
                        if !vfs_write_file(":B:notes.txt", "hi") { send_chat("b-write failed"); }
                        if vfs_write_file(":U:steal.txt", "hi") { send_chat("escaped"); }
                        player_count();
                    }
                "#,
            ),
        )
        .expect("community load");
    assert_eq!(supervisor.state(ModuleKind::Community), ModuleState::Active);

    supervisor.update();
    // Writes to its own area succeed, the user area stays off-limits, and the
    // full-read surface was never registered for it.
    assert!(chats(supervisor.take_commands()).is_empty());
    assert!(supervisor.config().config_dir.join("CommunityScript/notes.txt").is_file());
    assert!(!supervisor.config().config_dir.join("UserScript/steal.txt").exists());
    let host = supervisor.host(ModuleKind::Community).expect("active");
    assert_eq!(host.error_count(), 1);
    assert!(host.recent_errors()[0].message.contains("player_count"));
}

#[test]
fn forbid_setting_blocks_community_sources() {
    let (_dir, mut supervisor) = test_supervisor();
    supervisor.settings().borrow_mut().set(FORBID_COMMUNITY_SCRIPTS, "yes");
    let err = supervisor
        .reload(ModuleKind::Community, Some("fn Update() {}"))
        .expect_err("forbidden");
    assert!(err.to_string().contains("forbidden"));
    assert_eq!(supervisor.state(ModuleKind::Community), ModuleState::Unloaded);
}

#[test]
fn broken_sources_leave_the_previous_state_clean() {
    let (_dir, mut supervisor) = test_supervisor();
    write_user_script(&supervisor, "fn Update() { send_chat(\"v1\"); }");
    supervisor.boot();

    // A reload with a syntax error tears the old module down and reports.
    let err = supervisor
        .reload(ModuleKind::User, Some("fn Update( {"))
        .expect_err("parse error");
    assert!(err.to_string().contains("user.rhai"));
    assert_eq!(supervisor.state(ModuleKind::User), ModuleState::Unloaded);
    assert!(supervisor.status_line(ModuleKind::User).contains("not loaded"));

    // The slot recovers on the next good load.
    supervisor.reload(ModuleKind::User, None).expect("disk copy still good");
    supervisor.update();
    assert_eq!(chats(supervisor.take_commands()), vec!["v1"]);
}

#[test]
fn dev_mode_lets_user_sources_shadow_the_world_docket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = ScriptingConfig::rooted_at(dir.path());
    config.dev_mode = true;
    let mut supervisor = ModuleSupervisor::new(config);

    let shadow = supervisor.config().user_script_dir.join("world.rhai");
    fs::write(shadow, r#"fn Update() { send_chat("shadowed"); }"#).expect("shadow script");

    let mut docket = saker_scripting::Docket::new("arena");
    docket.add_data("world.rhai", b"fn Update() { send_chat(\"canonical\"); }".to_vec());
    supervisor.load_world(docket).expect("world load");

    supervisor.update();
    assert_eq!(chats(supervisor.take_commands()), vec!["shadowed"]);
}
