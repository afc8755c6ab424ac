use super::{
    cache::{self, BundleManifest, CacheEntry, Promotion, ToolCache},
    spec::{BundleTarget, Checksum, ToolSpec},
    tool_env,
    version::{self, is_executable},
};
use crate::{
    config::Config,
    error::{Error, Result},
    http::Transport,
    process::{Invocation, ProcessRunner},
    retry::RetryPolicy,
};
use flate2::read::GzDecoder;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Downloads, verifies and installs tool bundles into a [`ToolCache`].
pub struct BundleFetcher<'a> {
    pub cache: &'a ToolCache,
    pub config: &'a Config,
    pub transport: &'a dyn Transport,
    pub runner: &'a dyn ProcessRunner,
    pub retry: RetryPolicy,
    pub cancel: &'a CancellationToken,
}

impl BundleFetcher<'_> {
    /// Installs a fresh entry for `target` and returns it.
    ///
    /// `replaced_install` is the install id of a cached entry which was found
    /// unusable. On failure nothing under the entry directory is touched.
    pub async fn install(
        &self,
        spec: &ToolSpec,
        target: &BundleTarget,
        replaced_install: Option<&str>,
    ) -> Result<CacheEntry> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let url = spec.bundle_url(target);
        let parsed_url = Url::parse(&url).map_err(|e| Error::bundle_fetch(&url, e))?;
        info!("Downloading {} bundle from {}", spec.name, url);

        let expected = self.expected_checksum(spec, &parsed_url).await?;
        let archive = self
            .cache
            .download_path(spec.name, &target.asset)
            .await
            .map_err(|e| Error::bundle_fetch(&url, e))?;

        let result = self
            .stage(spec, target, &url, &parsed_url, &archive, expected, replaced_install)
            .await;
        cache::remove_file(&archive).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage(
        &self,
        spec: &ToolSpec,
        target: &BundleTarget,
        url: &str,
        parsed_url: &Url,
        archive: &Path,
        expected: Option<String>,
        replaced_install: Option<&str>,
    ) -> Result<CacheEntry> {
        let size = self
            .retry
            .run(self.cancel, || self.transport.download(parsed_url, archive))
            .await
            .map_err(|e| Error::bundle_fetch(url, e.reason))?;

        if size == 0 {
            return Err(Error::bundle_fetch(url, "downloaded bundle is empty"));
        }

        let actual = sha256_file(archive.to_path_buf())
            .await
            .map_err(|e| Error::bundle_fetch(url, e))?;

        if let Some(expected) = &expected {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Error::bundle_fetch(
                    url,
                    format!("sha256 mismatch (expected {expected}, got {actual})"),
                ));
            }
            debug!("{} bundle checksum verified ({})", spec.name, actual);
        }

        let staging = self
            .cache
            .create_staging(spec.name)
            .await
            .map_err(|e| Error::bundle_fetch(url, e))?;

        let result = self
            .install_staged(spec, target, url, archive, &staging, actual, replaced_install)
            .await;

        if result.is_err() {
            cache::remove_dir(&staging).await;
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_staged(
        &self,
        spec: &ToolSpec,
        target: &BundleTarget,
        url: &str,
        archive: &Path,
        staging: &Path,
        sha256: String,
        replaced_install: Option<&str>,
    ) -> Result<CacheEntry> {
        extract(archive.to_path_buf(), staging.to_path_buf())
            .await
            .map_err(|e| Error::bundle_fetch(url, format!("extraction failed: {e}")))?;

        let exe = staging.join("bin").join(spec.executable);

        if !is_executable(&exe) {
            return Err(Error::bundle_fetch(
                url,
                format!("bundle does not contain an executable bin/{}", spec.executable),
            ));
        }

        let lib = staging.join("lib");
        let env = tool_env(
            self.config,
            &staging.join("bin"),
            lib.is_dir().then_some(lib.as_path()),
        );
        let invocation = Invocation::new(&exe, self.config.version_timeout)
            .args(spec.version_args.iter().copied())
            .envs(&env);

        match version::query_version(self.runner, invocation, &spec.version_pattern).await {
            Ok(version) if version >= spec.min_version => {
                debug!("Staged {} reports version {}", spec.name, version)
            }
            Ok(version) => {
                return Err(Error::BundleVerificationFailed {
                    tool: spec.name.to_owned(),
                    path: exe,
                    reason: format!("version {version} is older than {}", spec.min_version),
                });
            }
            Err(e) => {
                return Err(Error::BundleVerificationFailed {
                    tool: spec.name.to_owned(),
                    path: exe,
                    reason: e.to_string(),
                });
            }
        }

        let manifest = BundleManifest {
            tool: spec.name.to_owned(),
            tag: spec.bundle_tag.to_owned(),
            url: url.to_owned(),
            sha256: Some(sha256),
            platform: target.key(),
            install_id: uuid::Uuid::new_v4().simple().to_string(),
            installed_at: chrono::Utc::now(),
        };
        cache::write_manifest(staging, &manifest)
            .await
            .map_err(|e| Error::bundle_fetch(url, e))?;

        let entry = self.cache.entry_dir(spec.name, &target.key());
        let promotion = self
            .cache
            .promote(staging, &entry, replaced_install)
            .await
            .map_err(|e| Error::bundle_fetch(url, format!("cannot install into cache: {e}")))?;

        if let Promotion::Superseded = promotion {
            info!("Using {} bundle installed by a concurrent run", spec.name);
        }

        self.cache
            .lookup(spec, &target.key())
            .ok_or_else(|| Error::BundleVerificationFailed {
                tool: spec.name.to_owned(),
                path: entry,
                reason: "cache entry is missing after install".to_owned(),
            })
    }

    async fn expected_checksum(&self, spec: &ToolSpec, url: &Url) -> Result<Option<String>> {
        let sidecar = match &spec.checksum {
            None => return Ok(None),
            Some(Checksum::Sha256(hash)) => return Ok(Some(hash.to_owned())),
            Some(Checksum::Sidecar(suffix)) => {
                let raw = format!("{url}{suffix}");
                Url::parse(&raw).map_err(|e| Error::bundle_fetch(&raw, e))?
            }
        };

        let data = self
            .retry
            .run(self.cancel, || self.transport.get(&sidecar))
            .await
            .map_err(|e| Error::bundle_fetch(&sidecar, e.reason))?;

        parse_sidecar(&String::from_utf8_lossy(&data))
            .map(Some)
            .ok_or_else(|| {
                Error::bundle_fetch(&sidecar, "checksum file does not contain a sha256 digest")
            })
    }
}

/// Accepts `<hex>` or the `sha256sum` format `<hex>  <file>`.
pub(crate) fn parse_sidecar(text: &str) -> Option<String> {
    let digest = text.split_whitespace().next()?;

    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(digest.to_ascii_lowercase())
    } else {
        None
    }
}

async fn sha256_file(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn extract(archive: PathBuf, dest: PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.set_overwrite(true);
        archive.unpack(&dest)
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_formats() {
        let digest = "A".repeat(64);

        assert_eq!(parse_sidecar(&digest), Some("a".repeat(64)));
        assert_eq!(
            parse_sidecar(&format!("{digest}  mp4box-bundle-linux-x86_64.tar.gz\n")),
            Some("a".repeat(64))
        );
        assert_eq!(parse_sidecar("not a digest"), None);
        assert_eq!(parse_sidecar(""), None);
    }

    #[tokio::test]
    async fn hashes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
