use std::fs;

use saker_scripting::config::ScriptingConfig;
use saker_scripting::docket::Docket;
use saker_scripting::vfs::{tags, CacheFs, DocketFs, RawFs, Vfs};

fn seeded_tree(root: &std::path::Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("fixture dirs");
        }
        fs::write(full, contents).expect("fixture file");
    }
}

#[test]
fn overlay_listings_merge_sorted_and_deduplicated() {
    let data = tempfile::tempdir().expect("data dir");
    let user = tempfile::tempdir().expect("user dir");
    seeded_tree(data.path(), &[("maps/alpha.map", "a"), ("maps/beta.map", "data beta")]);
    seeded_tree(user.path(), &[("maps/beta.map", "user beta"), ("maps/gamma.map", "g")]);

    let mut vfs = Vfs::new();
    vfs.mount('d', Box::new(RawFs::new(data.path())), false);
    vfs.mount('u', Box::new(RawFs::new(user.path())), false);

    let (files, dirs) = vfs.dir_list("maps", "du", false);
    assert_eq!(files, vec!["maps/alpha.map", "maps/beta.map", "maps/gamma.map"]);
    assert!(dirs.is_empty());

    // Reads stay first-match: 'd' before 'u' versus 'u' before 'd'.
    let from_d = vfs.read_file("maps/beta.map", "du").expect("beta via d");
    assert_eq!(from_d, b"data beta");
    let from_u = vfs.read_file("maps/beta.map", "ud").expect("beta via u");
    assert_eq!(from_u, b"user beta");
}

#[test]
fn unsafe_paths_fail_closed_on_every_operation() {
    let dir = tempfile::tempdir().expect("tempdir");
    seeded_tree(dir.path(), &[("ok.txt", "fine")]);
    let mut vfs = Vfs::new();
    vfs.mount('d', Box::new(RawFs::new(dir.path())), true);

    for path in ["/etc/passwd", "\\windows", "C:stuff", "a/../b", ".."] {
        assert!(!vfs.file_exists(path, "d"), "{path:?} must not exist");
        assert_eq!(vfs.read_file(path, "d"), None, "{path:?} must not read");
        assert!(!vfs.write_file(path, "d", b"x"), "{path:?} must not write");
        assert!(!vfs.remove_file(path, "d"), "{path:?} must not remove");
        let (files, dirs) = vfs.dir_list(path, "d", true);
        assert!(files.is_empty() && dirs.is_empty(), "{path:?} must not list");
    }
    // Control: the sandbox still works for honest paths.
    assert!(vfs.file_exists("ok.txt", "d"));
}

#[test]
fn mode_overrides_never_widen_the_callers_set() {
    let open = tempfile::tempdir().expect("open dir");
    let sealed = tempfile::tempdir().expect("sealed dir");
    seeded_tree(open.path(), &[("note.txt", "public")]);
    seeded_tree(sealed.path(), &[("note.txt", "private")]);

    let mut vfs = Vfs::new();
    vfs.mount('d', Box::new(RawFs::new(open.path())), false);
    vfs.mount('W', Box::new(RawFs::new(sealed.path())), true);

    assert_eq!(vfs.read_file("note.txt", "d").expect("plain read"), b"public");
    // The override can only narrow: requesting W with a d-only caller is empty.
    assert_eq!(vfs.read_file(":W:note.txt", "d"), None);
    assert_eq!(vfs.read_file(":Wd:note.txt", "d").expect("narrowed read"), b"public");
    // A malformed override (missing the closing colon) fails the whole call.
    assert_eq!(vfs.read_file(":d", "d"), None);
    // Writes obey the same ceiling.
    assert!(!vfs.write_file(":W:evil.txt", "d", b"x"));
    assert!(!sealed.path().join("evil.txt").exists());
}

#[test]
fn writes_honor_the_writable_flag_and_rename_refuses_to_clobber() {
    let readonly = tempfile::tempdir().expect("ro dir");
    let writable = tempfile::tempdir().expect("rw dir");
    seeded_tree(readonly.path(), &[("keep.txt", "ro")]);
    seeded_tree(writable.path(), &[("a.txt", "first"), ("b.txt", "second")]);

    let mut vfs = Vfs::new();
    vfs.mount('d', Box::new(RawFs::new(readonly.path())), false);
    vfs.mount('U', Box::new(RawFs::new(writable.path())), true);

    // 'd' resolves first but is not writable; the write lands on 'U'.
    assert!(vfs.write_file("fresh.txt", "dU", b"hello"));
    assert!(!readonly.path().join("fresh.txt").exists());
    assert_eq!(fs::read(writable.path().join("fresh.txt")).expect("written"), b"hello");

    assert!(!vfs.rename_file("a.txt", "b.txt", "U"), "rename must not clobber");
    assert_eq!(fs::read(writable.path().join("b.txt")).expect("intact"), b"second");
    assert!(vfs.rename_file("a.txt", "c.txt", "U"));
    assert!(!writable.path().join("a.txt").exists());

    assert!(vfs.append_file("fresh.txt", "U", b" again"));
    assert_eq!(fs::read(writable.path().join("fresh.txt")).expect("appended"), b"hello again");
}

#[test]
fn reset_builds_the_standard_mount_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ScriptingConfig::rooted_at(dir.path());
    let mut vfs = Vfs::new();
    vfs.reset(&config);

    for tag in ['c', 'd', 'D', 'f', 'h', 'u', 'U', 'W', 'B'] {
        assert!(vfs.is_mounted(tag), "tag {tag:?} should be mounted");
    }
    // The world docket arrives with the map, never at reset.
    assert!(!vfs.is_mounted(tags::WORLD_READ));
    assert_eq!(vfs.mounted_tags(), "BDUWcdfhu");

    // Config is read-write, data is read-only.
    assert!(vfs.write_file("prefs.txt", "c", b"x"));
    assert!(vfs.file_exists("prefs.txt", "c"));
    assert!(!vfs.write_file("blocked.txt", "dD", b"x"));

    // The user write area lives under the config dir.
    assert!(vfs.write_file("book.txt", "U", b"note"));
    assert!(config.config_dir.join("UserScript/book.txt").is_file());
}

#[test]
fn dockets_round_trip_through_the_binary_format_and_the_router() {
    let mut docket = Docket::new("arena");
    assert!(docket.add_data("maps/field.txt", b"flat".to_vec()));
    assert!(docket.add_data("world.rhai", b"fn Update() {}".to_vec()));
    assert!(!docket.add_data("world.rhai", b"dup".to_vec()), "duplicates are rejected");
    assert!(!docket.add_data("bad:colon", b"x".to_vec()));
    assert!(!docket.add_data("dir/", b"x".to_vec()));

    let dir = tempfile::tempdir().expect("tempdir");
    let packed_path = dir.path().join("arena.docket");
    docket.save(&packed_path).expect("save");

    let bytes = fs::read(&packed_path).expect("read packed");
    let unpacked = Docket::unpack(&bytes).expect("unpack");
    assert_eq!(unpacked.name(), "arena");
    assert_eq!(unpacked.len(), 2);
    assert_eq!(unpacked.get_data("maps/field.txt"), Some(b"flat".as_slice()));

    assert!(Docket::unpack(b"not a docket").is_err());

    let mut vfs = Vfs::new();
    vfs.mount(tags::WORLD_READ, Box::new(DocketFs::new(unpacked)), false);
    assert_eq!(vfs.file_size("world.rhai", "w"), Some(14));
    let (files, dirs) = vfs.dir_list("", "w", false);
    assert_eq!(files, vec!["world.rhai"]);
    assert_eq!(dirs, vec!["maps/"]);
    let (deep_files, _) = vfs.dir_list("", "w", true);
    assert_eq!(deep_files, vec!["maps/field.txt", "world.rhai"]);
}

#[test]
fn url_caches_serve_stored_bodies_back_through_their_tag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = CacheFs::http(dir.path());
    let url = "http://example.org/pack/extra.rhai";
    assert!(cache.store(url, b"fn Update() {}"));
    assert!(!cache.store("ftp://example.org/other", b"x"), "wrong scheme for this cache");

    let mut vfs = Vfs::new();
    vfs.mount(tags::HTTP, Box::new(cache), false);
    assert!(vfs.file_exists(url, "h"));
    assert_eq!(vfs.read_file(url, "h").expect("cached body"), b"fn Update() {}");
    // URL-shaped paths belong to the cache tags alone.
    assert_eq!(vfs.read_file(url, "d"), None);
}
