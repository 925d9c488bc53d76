use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DOCKET_MAGIC: &[u8; 8] = b"SKDOCKET";
const DOCKET_VERSION: u32 = 1;

/// Refuse to embed single files larger than this when building from disk.
const MAX_FILE_SIZE: u64 = 100 << 20;

#[derive(Serialize, Deserialize)]
struct DocketBody {
    version: u32,
    name: String,
    entries: BTreeMap<String, Vec<u8>>,
}

/// A read-mostly in-memory archive: virtual path → file bytes, with the
/// directory set derived from the paths. Mounted into the VFS behind the
/// world tag; also usable standalone for building map bundles.
#[derive(Debug, Clone, Default)]
pub struct Docket {
    name: String,
    entries: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Docket {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: BTreeMap::new(), dirs: BTreeSet::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one entry. Paths must be relative, slash-separated, colon-free and
    /// must not end in `/`; duplicates are rejected.
    pub fn add_data(&mut self, path: &str, data: Vec<u8>) -> bool {
        if path.is_empty() || path.ends_with('/') || path.contains(':') {
            warn!(target: "docket", "{}: rejected entry path {:?}", self.name, path);
            return false;
        }
        if self.entries.contains_key(path) {
            warn!(target: "docket", "{}: duplicate entry {:?}", self.name, path);
            return false;
        }
        let mut slash = 0;
        while let Some(next) = path[slash..].find('/') {
            slash += next + 1;
            self.dirs.insert(path[..slash].to_string());
        }
        self.entries.insert(path.to_string(), data);
        true
    }

    pub fn add_file(&mut self, path: &str, disk_path: impl AsRef<Path>) -> Result<()> {
        let disk_path = disk_path.as_ref();
        let meta = fs::metadata(disk_path)
            .with_context(|| format!("Reading {}", disk_path.display()))?;
        if meta.len() > MAX_FILE_SIZE {
            bail!("{} is too large for a docket ({} bytes)", disk_path.display(), meta.len());
        }
        let data = fs::read(disk_path)
            .with_context(|| format!("Reading {}", disk_path.display()))?;
        if !self.add_data(path, data) {
            bail!("docket {} rejected entry {:?}", self.name, path);
        }
        Ok(())
    }

    /// Recursively add a directory tree from disk under `prefix`. Returns the
    /// number of files added.
    pub fn add_dir(&mut self, prefix: &str, disk_dir: impl AsRef<Path>) -> Result<usize> {
        let disk_dir = disk_dir.as_ref();
        let listing = fs::read_dir(disk_dir)
            .with_context(|| format!("Listing {}", disk_dir.display()))?;
        let mut added = 0;
        for entry in listing {
            let entry = entry.with_context(|| format!("Listing {}", disk_dir.display()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                warn!(target: "docket", "{}: skipping non-utf8 name in {}", self.name, disk_dir.display());
                continue;
            };
            let mapped = if prefix.is_empty() {
                file_name.to_string()
            } else {
                format!("{prefix}{file_name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                added += self.add_dir(&format!("{mapped}/"), entry.path())?;
            } else if file_type.is_file() {
                self.add_file(&mapped, entry.path())?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn has_data(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn data_size(&self, path: &str) -> Option<u64> {
        self.entries.get(path).map(|data| data.len() as u64)
    }

    pub fn get_data(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    /// List entries under `path` (empty string or a `…/`-terminated prefix).
    /// Non-recursive listings stop at the next `/`; directories come back
    /// `/`-terminated. Results are appended to the output vectors.
    pub fn dir_list(
        &self,
        path: &str,
        recursive: bool,
        files: &mut Vec<String>,
        dirs: &mut Vec<String>,
    ) -> bool {
        if !path.is_empty() && !path.ends_with('/') {
            return false;
        }
        for key in self.entries.keys() {
            let Some(rest) = key.strip_prefix(path) else { continue };
            if recursive || !rest.contains('/') {
                files.push(key.clone());
            }
        }
        for dir in &self.dirs {
            let Some(rest) = dir.strip_prefix(path) else { continue };
            if rest.is_empty() {
                continue;
            }
            if recursive || rest.matches('/').count() == 1 {
                dirs.push(dir.clone());
            }
        }
        true
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        let body = DocketBody {
            version: DOCKET_VERSION,
            name: self.name.clone(),
            entries: self.entries.clone(),
        };
        let mut bytes = DOCKET_MAGIC.to_vec();
        bytes.extend(bincode::serialize(&body).context("Packing docket body")?);
        Ok(bytes)
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        let Some(body) = bytes.strip_prefix(DOCKET_MAGIC.as_slice()) else {
            bail!("not a docket (bad magic)");
        };
        let body: DocketBody = bincode::deserialize(body).context("Unpacking docket body")?;
        if body.version != DOCKET_VERSION {
            bail!("unsupported docket version {}", body.version);
        }
        let mut docket = Docket::new(body.name);
        for (path, data) in body.entries {
            if !docket.add_data(&path, data) {
                bail!("docket carries an invalid entry path {:?}", path);
            }
        }
        Ok(docket)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.pack()?)
            .with_context(|| format!("Writing {}", path.display()))
    }
}
