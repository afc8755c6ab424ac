use super::{spec::ToolSpec, version::is_executable};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

pub const MANIFEST_FILE: &str = "bundle.json";

/// Written into every installed bundle directory.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BundleManifest {
    pub tool: String,
    pub tag: String,
    pub url: String,
    pub sha256: Option<String>,
    pub platform: String,
    /// Unique per install, tells concurrent installs apart.
    pub install_id: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub dir: PathBuf,
    pub manifest: BundleManifest,
}

impl CacheEntry {
    pub fn bin_dir(&self) -> PathBuf {
        self.dir.join("bin")
    }

    pub fn lib_dir(&self) -> Option<PathBuf> {
        let lib = self.dir.join("lib");
        lib.is_dir().then_some(lib)
    }
}

#[derive(Debug)]
pub enum Promotion {
    /// The staged directory is now the active entry.
    Installed,
    /// Another install won the race, the staged directory was discarded.
    Superseded,
}

/// On-disk store of tool bundles: `{root}/{tool}/{platform_key}/{bin,lib}`.
///
/// Nothing is modified in place. Bundles are unpacked in a private staging
/// directory next to the entry and renamed into place.
#[derive(Clone, Debug)]
pub struct ToolCache {
    root: PathBuf,
}

impl ToolCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tool_dir(&self, tool: &str) -> PathBuf {
        self.root.join(tool)
    }

    pub fn entry_dir(&self, tool: &str, key: &str) -> PathBuf {
        self.tool_dir(tool).join(key)
    }

    /// Returns the active entry if it belongs to the current bundle tag and
    /// contains the executable.
    pub fn lookup(&self, spec: &ToolSpec, key: &str) -> Option<CacheEntry> {
        let dir = self.entry_dir(spec.name, key);
        let manifest = read_manifest(&dir)?;

        if manifest.tag != spec.bundle_tag {
            debug!(
                "Cached {} bundle has tag {}, expected {}",
                spec.name, manifest.tag, spec.bundle_tag
            );
            return None;
        }

        if !is_executable(&dir.join("bin").join(spec.executable)) {
            warn!("Cached {} bundle at {} is incomplete", spec.name, dir.to_string_lossy());
            return None;
        }

        Some(CacheEntry { dir, manifest })
    }

    /// Manifest of whatever occupies the entry slot, usable or not.
    pub fn manifest(&self, tool: &str, key: &str) -> Option<BundleManifest> {
        read_manifest(&self.entry_dir(tool, key))
    }

    /// Creates a fresh, uniquely named directory inside the tool directory.
    pub async fn create_staging(&self, tool: &str) -> io::Result<PathBuf> {
        let dir = self
            .tool_dir(tool)
            .join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Unique path for a downloaded artifact, on the same filesystem as the entries.
    pub async fn download_path(&self, tool: &str, asset: &str) -> io::Result<PathBuf> {
        let dir = self.tool_dir(tool);
        fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!(".download-{}-{}", uuid::Uuid::new_v4().simple(), asset)))
    }

    /// Moves `staging` to the entry location with a single rename.
    ///
    /// `replaced_install` is the install id of the entry the caller rejected
    /// (if any). An existing entry with that id is retired and replaced; any
    /// other existing entry was promoted by a concurrent install and wins.
    pub async fn promote(
        &self,
        staging: &Path,
        entry: &Path,
        replaced_install: Option<&str>,
    ) -> io::Result<Promotion> {
        if fs::rename(staging, entry).await.is_ok() {
            return Ok(Promotion::Installed);
        }

        let current = read_manifest(entry);
        let superseded = match (&current, replaced_install) {
            (Some(current), Some(replaced)) => current.install_id != replaced,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if superseded {
            debug!("{} was installed concurrently", entry.to_string_lossy());
            remove_dir(staging).await;
            return Ok(Promotion::Superseded);
        }

        if fs::try_exists(entry).await? {
            let retired = entry.with_file_name(format!(
                ".retired-{}",
                uuid::Uuid::new_v4().simple()
            ));

            match fs::rename(entry, &retired).await {
                Ok(()) => remove_dir(&retired).await,
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => {
                    remove_dir(staging).await;
                    return Err(e);
                }
            }
        }

        match fs::rename(staging, entry).await {
            Ok(()) => Ok(Promotion::Installed),
            Err(_) if read_manifest(entry).is_some() => {
                remove_dir(staging).await;
                Ok(Promotion::Superseded)
            }
            Err(e) => {
                remove_dir(staging).await;
                Err(e)
            }
        }
    }
}

pub fn read_manifest(dir: &Path) -> Option<BundleManifest> {
    let data = std::fs::read(dir.join(MANIFEST_FILE)).ok()?;
    serde_json::from_slice(&data).ok()
}

pub async fn write_manifest(dir: &Path, manifest: &BundleManifest) -> io::Result<()> {
    let data = serde_json::to_vec_pretty(manifest).map_err(io::Error::other)?;
    fs::write(dir.join(MANIFEST_FILE), data).await
}

pub(crate) async fn remove_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Cannot remove {}: {}", dir.to_string_lossy(), e);
    }
}

pub(crate) async fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Cannot remove {}: {}", path.to_string_lossy(), e);
    }
}
