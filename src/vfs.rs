use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::ScriptingConfig;
use crate::docket::Docket;

/// Single-character mount tags. Mode strings are ordered sequences of these;
/// routing precedence follows the order tags appear in the string.
pub mod tags {
    pub const CONFIG: char = 'c';
    pub const DATA: char = 'd';
    pub const DATA_DEFAULT: char = 'D';
    pub const FTP: char = 'f';
    pub const HTTP: char = 'h';
    pub const USER_READ: char = 'u';
    pub const USER_WRITE: char = 'U';
    pub const WORLD_READ: char = 'w';
    pub const WORLD_WRITE: char = 'W';
    pub const COMMUNITY_WRITE: char = 'B';
}

/// Composite mode string covering the stores every module may read.
pub const BASIC_MODES: &str = "cdDhf";

/// Keep the characters of `wanted` that also appear in `allowed`.
pub fn allow_modes(wanted: &str, allowed: &str) -> String {
    wanted.chars().filter(|&c| allowed.contains(c)).collect()
}

/// Keep the characters of `wanted` that do not appear in `forbidden`.
pub fn forbid_modes(wanted: &str, forbidden: &str) -> String {
    wanted.chars().filter(|&c| !forbidden.contains(c)).collect()
}

/// Paths must stay inside the mounts: no absolute paths, no drive letters,
/// no `..` anywhere. The empty path is fine (it names a mount root).
pub fn is_safe_path(path: &str) -> bool {
    if path.is_empty() {
        return true;
    }
    let bytes = path.as_bytes();
    if bytes[0] == b'/' || bytes[0] == b'\\' {
        return false;
    }
    if bytes.len() >= 2 && bytes[1] == b':' {
        return false;
    }
    !path.contains("..")
}

pub fn clean_file_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Like [`clean_file_path`], but directory paths also get a trailing `/`.
pub fn clean_dir_path(path: &str) -> String {
    let mut clean = clean_file_path(path);
    if !clean.is_empty() && !clean.ends_with('/') {
        clean.push('/');
    }
    clean
}

/// Split an optional `:modes:` override off the front of a path and intersect
/// it with the caller's modes. A lone `:` with no closing `:` is malformed
/// and fails the whole operation.
fn parse_modes<'p>(path: &'p str, caller_modes: &str) -> Option<(String, &'p str)> {
    let Some(rest) = path.strip_prefix(':') else {
        return Some((caller_modes.to_string(), path));
    };
    let end = rest.find(':')?;
    Some((allow_modes(&rest[..end], caller_modes), &rest[end + 1..]))
}

/// The uniform surface a backing store exposes to the router. Read-only
/// stores keep the default (failing) mutations.
pub trait BackingStore {
    fn file_exists(&self, path: &str) -> bool;
    fn file_size(&self, path: &str) -> Option<u64>;
    fn read_file(&self, path: &str) -> Option<Vec<u8>>;

    fn write_file(&self, _path: &str, _data: &[u8]) -> bool {
        false
    }
    fn append_file(&self, _path: &str, _data: &[u8]) -> bool {
        false
    }
    fn remove_file(&self, _path: &str) -> bool {
        false
    }
    fn rename_file(&self, _old: &str, _new: &str) -> bool {
        false
    }
    fn create_dir(&self, _path: &str) -> bool {
        false
    }

    /// Append matches under `path` (a `…/`-terminated prefix or empty) to the
    /// output vectors, directories `/`-terminated. Returns false when the
    /// prefix cannot be listed at all.
    fn dir_list(
        &self,
        path: &str,
        recursive: bool,
        files: &mut Vec<String>,
        dirs: &mut Vec<String>,
    ) -> bool;
}

/// A real directory tree. Paths are joined under the root; the router's
/// safety gate guarantees they cannot escape it.
pub struct RawFs {
    root: PathBuf,
}

impl RawFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl BackingStore for RawFs {
    fn file_exists(&self, path: &str) -> bool {
        self.full(path).is_file()
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        let meta = fs::metadata(self.full(path)).ok()?;
        meta.is_file().then(|| meta.len())
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.full(path)).ok()
    }

    fn write_file(&self, path: &str, data: &[u8]) -> bool {
        fs::write(self.full(path), data).is_ok()
    }

    fn append_file(&self, path: &str, data: &[u8]) -> bool {
        use std::io::Write;
        let file = fs::OpenOptions::new().append(true).create(true).open(self.full(path));
        match file {
            Ok(mut file) => file.write_all(data).is_ok(),
            Err(_) => false,
        }
    }

    fn remove_file(&self, path: &str) -> bool {
        fs::remove_file(self.full(path)).is_ok()
    }

    fn rename_file(&self, old: &str, new: &str) -> bool {
        let target = self.full(new);
        if target.exists() {
            return false;
        }
        fs::rename(self.full(old), target).is_ok()
    }

    fn create_dir(&self, path: &str) -> bool {
        fs::create_dir_all(self.full(path)).is_ok()
    }

    fn dir_list(
        &self,
        path: &str,
        recursive: bool,
        files: &mut Vec<String>,
        dirs: &mut Vec<String>,
    ) -> bool {
        let Ok(listing) = fs::read_dir(self.full(path)) else {
            return false;
        };
        let mut names: Vec<(String, bool)> = Vec::new();
        for entry in listing.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if let Some(name) = entry.file_name().to_str() {
                names.push((name.to_string(), file_type.is_dir()));
            }
        }
        names.sort();
        for (name, is_dir) in names {
            if is_dir {
                let sub = format!("{path}{name}/");
                dirs.push(sub.clone());
                if recursive {
                    self.dir_list(&sub, true, files, dirs);
                }
            } else {
                files.push(format!("{path}{name}"));
            }
        }
        true
    }
}

/// Read-only view over an in-memory [`Docket`].
pub struct DocketFs {
    docket: Docket,
}

impl DocketFs {
    pub fn new(docket: Docket) -> Self {
        Self { docket }
    }

    pub fn docket(&self) -> &Docket {
        &self.docket
    }
}

impl BackingStore for DocketFs {
    fn file_exists(&self, path: &str) -> bool {
        self.docket.has_data(path)
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        self.docket.data_size(path)
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.docket.get_data(path).map(<[u8]>::to_vec)
    }

    fn dir_list(
        &self,
        path: &str,
        recursive: bool,
        files: &mut Vec<String>,
        dirs: &mut Vec<String>,
    ) -> bool {
        self.docket.dir_list(path, recursive, files, dirs)
    }
}

/// Read-only view of a URL-keyed local cache. Virtual paths are full URLs;
/// anything without a matching scheme belongs to some other mount. Remote
/// fetch completion lands in the cache through [`CacheFs::store`].
#[derive(Clone)]
pub struct CacheFs {
    root: PathBuf,
    schemes: &'static [&'static str],
}

impl CacheFs {
    pub fn http(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), schemes: &["http://", "https://"] }
    }

    pub fn ftp(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), schemes: &["ftp://"] }
    }

    fn local(&self, url: &str) -> Option<PathBuf> {
        for scheme in self.schemes {
            if let Some(rest) = url.strip_prefix(scheme) {
                if rest.is_empty() {
                    return None;
                }
                // Port separators would look like drive letters on disk.
                return Some(self.root.join(rest.replace(':', "_")));
            }
        }
        None
    }

    pub fn store(&self, url: &str, data: &[u8]) -> bool {
        let Some(path) = self.local(url) else {
            return false;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        fs::write(path, data).is_ok()
    }
}

impl BackingStore for CacheFs {
    fn file_exists(&self, path: &str) -> bool {
        self.local(path).is_some_and(|p| p.is_file())
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        let meta = fs::metadata(self.local(path)?).ok()?;
        meta.is_file().then(|| meta.len())
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.local(path)?).ok()
    }

    fn dir_list(
        &self,
        _path: &str,
        _recursive: bool,
        _files: &mut Vec<String>,
        _dirs: &mut Vec<String>,
    ) -> bool {
        // A URL namespace has no meaningful listing offline.
        false
    }
}

struct Mount {
    tag: char,
    backend: Box<dyn BackingStore>,
    writable: bool,
}

/// Mode-string router over the mounted backing stores. Every operation
/// parses the optional `:modes:` override, cleans the path, rejects unsafe
/// paths before any backend is consulted, then tries the resolved mounts in
/// mode-string order; `dir_list` alone merges all of them.
#[derive(Default)]
pub struct Vfs {
    mounts: HashMap<char, Mount>,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard mount layout for a game instance. The world docket is not
    /// mounted here; it arrives with the map.
    pub fn reset(&mut self, config: &ScriptingConfig) {
        self.mounts.clear();

        let user_write = config.config_dir.join("UserScript");
        let world_write = config.config_dir.join("WorldScript");
        let community_write = config.config_dir.join("CommunityScript");
        let http_cache = config.cache_dir.join("http");
        let ftp_cache = config.cache_dir.join("ftp");
        for dir in [
            &config.config_dir,
            &config.user_script_dir,
            &user_write,
            &world_write,
            &community_write,
            &http_cache,
            &ftp_cache,
        ] {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(target: "vfs", "could not create {}: {err}", dir.display());
            }
        }

        self.mount(tags::CONFIG, Box::new(RawFs::new(&config.config_dir)), true);
        self.mount(tags::DATA, Box::new(RawFs::new(&config.data_dir)), false);
        self.mount(tags::DATA_DEFAULT, Box::new(RawFs::new(&config.data_default_dir)), false);
        self.mount(tags::USER_READ, Box::new(RawFs::new(&config.user_script_dir)), false);
        self.mount(tags::USER_WRITE, Box::new(RawFs::new(user_write)), true);
        self.mount(tags::WORLD_WRITE, Box::new(RawFs::new(world_write)), true);
        self.mount(tags::COMMUNITY_WRITE, Box::new(RawFs::new(community_write)), true);
        self.mount(tags::HTTP, Box::new(CacheFs::http(http_cache)), false);
        self.mount(tags::FTP, Box::new(CacheFs::ftp(ftp_cache)), false);
    }

    pub fn mount(&mut self, tag: char, backend: Box<dyn BackingStore>, writable: bool) -> bool {
        if self.mounts.contains_key(&tag) {
            warn!(target: "vfs", "mount tag {tag:?} is already taken");
            return false;
        }
        debug!(target: "vfs", "mounting {tag:?} (writable: {writable})");
        self.mounts.insert(tag, Mount { tag, backend, writable });
        true
    }

    pub fn unmount(&mut self, tag: char) -> bool {
        self.mounts.remove(&tag).is_some()
    }

    pub fn is_mounted(&self, tag: char) -> bool {
        self.mounts.contains_key(&tag)
    }

    pub fn mounted_tags(&self) -> String {
        let mut tags: Vec<char> = self.mounts.keys().copied().collect();
        tags.sort_unstable();
        tags.into_iter().collect()
    }

    /// One lookup per mode character; duplicates and unknown tags are skipped.
    fn resolve(&self, modes: &str) -> SmallVec<[&Mount; 8]> {
        let mut seen: SmallVec<[char; 8]> = SmallVec::new();
        let mut out: SmallVec<[&Mount; 8]> = SmallVec::new();
        for tag in modes.chars() {
            if seen.contains(&tag) {
                continue;
            }
            seen.push(tag);
            if let Some(mount) = self.mounts.get(&tag) {
                out.push(mount);
            }
        }
        out
    }

    pub fn file_exists(&self, path: &str, modes: &str) -> bool {
        let Some((modes, rest)) = parse_modes(path, modes) else {
            return false;
        };
        let clean = clean_file_path(rest);
        if !is_safe_path(&clean) {
            return false;
        }
        self.resolve(&modes).iter().any(|m| m.backend.file_exists(&clean))
    }

    pub fn file_size(&self, path: &str, modes: &str) -> Option<u64> {
        let (modes, rest) = parse_modes(path, modes)?;
        let clean = clean_file_path(rest);
        if !is_safe_path(&clean) {
            return None;
        }
        self.resolve(&modes).iter().find_map(|m| m.backend.file_size(&clean))
    }

    pub fn read_file(&self, path: &str, modes: &str) -> Option<Vec<u8>> {
        let (modes, rest) = parse_modes(path, modes)?;
        let clean = clean_file_path(rest);
        if !is_safe_path(&clean) {
            return None;
        }
        self.resolve(&modes).iter().find_map(|m| m.backend.read_file(&clean))
    }

    pub fn read_string(&self, path: &str, modes: &str) -> Option<String> {
        String::from_utf8(self.read_file(path, modes)?).ok()
    }

    pub fn write_file(&self, path: &str, modes: &str, data: &[u8]) -> bool {
        self.mutate(path, modes, |backend, clean| backend.write_file(clean, data))
    }

    pub fn append_file(&self, path: &str, modes: &str, data: &[u8]) -> bool {
        self.mutate(path, modes, |backend, clean| backend.append_file(clean, data))
    }

    pub fn remove_file(&self, path: &str, modes: &str) -> bool {
        self.mutate(path, modes, |backend, clean| backend.remove_file(clean))
    }

    pub fn rename_file(&self, old: &str, new: &str, modes: &str) -> bool {
        let Some((modes, old_rest)) = parse_modes(old, modes) else {
            return false;
        };
        let old_clean = clean_file_path(old_rest);
        let new_clean = clean_file_path(new);
        if !is_safe_path(&old_clean) || !is_safe_path(&new_clean) {
            return false;
        }
        for mount in self.resolve(&modes) {
            if !mount.writable {
                continue;
            }
            if mount.backend.rename_file(&old_clean, &new_clean) {
                return true;
            }
        }
        false
    }

    pub fn create_dir(&self, path: &str, modes: &str) -> bool {
        let Some((modes, rest)) = parse_modes(path, modes) else {
            return false;
        };
        let clean = clean_dir_path(rest);
        if !is_safe_path(&clean) {
            return false;
        }
        for mount in self.resolve(&modes) {
            if !mount.writable {
                continue;
            }
            if mount.backend.create_dir(&clean) {
                return true;
            }
        }
        false
    }

    /// Merged listing: unlike the other operations, every mount matching the
    /// mode string contributes, because a virtual path may legitimately exist
    /// in several mounts at once (overlay of a writable dir over a bundle).
    pub fn dir_list(&self, path: &str, modes: &str, recursive: bool) -> (Vec<String>, Vec<String>) {
        let Some((modes, rest)) = parse_modes(path, modes) else {
            return (Vec::new(), Vec::new());
        };
        let clean = clean_dir_path(rest);
        if !is_safe_path(&clean) {
            return (Vec::new(), Vec::new());
        }
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for mount in self.resolve(&modes) {
            mount.backend.dir_list(&clean, recursive, &mut files, &mut dirs);
        }
        files.sort();
        files.dedup();
        dirs.sort();
        dirs.dedup();
        (files, dirs)
    }

    fn mutate<F>(&self, path: &str, modes: &str, op: F) -> bool
    where
        F: Fn(&dyn BackingStore, &str) -> bool,
    {
        let Some((modes, rest)) = parse_modes(path, modes) else {
            return false;
        };
        let clean = clean_file_path(rest);
        if !is_safe_path(&clean) {
            return false;
        }
        for mount in self.resolve(&modes) {
            if !mount.writable {
                debug!(target: "vfs", "skipping read-only mount {:?} for a write", mount.tag);
                continue;
            }
            if op(mount.backend.as_ref(), &clean) {
                return true;
            }
        }
        false
    }
}

/// Shared handle to the router, cloned into guest-facing call-outs.
#[derive(Clone, Default)]
pub struct VfsHandle {
    inner: Rc<RefCell<Vfs>>,
}

impl VfsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow(&self) -> Ref<'_, Vfs> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vfs> {
        self.inner.borrow_mut()
    }
}
