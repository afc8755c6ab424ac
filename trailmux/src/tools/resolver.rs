use super::{
    BundleFetcher, CacheEntry, Origin, Platform, ResolvedTool, ToolCache, ToolRole, ToolSpec,
    tool_env,
    version::{self, VersionError},
};
use crate::{
    config::Config,
    error::{Error, Result},
    http::Transport,
    process::{Invocation, ProcessRunner},
    retry::RetryPolicy,
    utils,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Finds a usable muxer or converter, installing a bundle when the system has none.
///
/// Successful resolutions are kept for the lifetime of the resolver, so every
/// tool is checked at most once per run. Failed ones are retried on the next call.
pub struct ToolResolver {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    runner: Arc<dyn ProcessRunner>,
    cancel: CancellationToken,
    cache: ToolCache,
    platform: OnceCell<Platform>,
    muxer: OnceCell<ResolvedTool>,
    converter: OnceCell<ResolvedTool>,
}

impl ToolResolver {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn ProcessRunner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache: ToolCache::new(&config.tools_dir),
            config,
            transport,
            runner,
            cancel,
            platform: OnceCell::new(),
            muxer: OnceCell::new(),
            converter: OnceCell::new(),
        }
    }

    /// Skips host detection and uses `platform` instead.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = OnceCell::new_with(Some(platform));
        self
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    pub async fn platform(&self) -> &Platform {
        self.platform
            .get_or_init(|| Platform::detect(self.runner.as_ref()))
            .await
    }

    /// Memoized [`resolve`](Self::resolve) of the built-in tool for `role`.
    pub async fn resolve_role(&self, role: ToolRole) -> Result<&ResolvedTool> {
        let cell = match role {
            ToolRole::Muxer => &self.muxer,
            ToolRole::Converter => &self.converter,
        };

        cell.get_or_try_init(|| async {
            let tool = self.resolve(&ToolSpec::for_role(role, &self.config)).await?;
            info!(
                "Using {} {} ({}) at {}",
                tool.name,
                tool.version,
                tool.origin,
                tool.executable.to_string_lossy()
            );
            Ok::<_, Error>(tool)
        })
        .await
    }

    pub async fn resolve(&self, spec: &ToolSpec) -> Result<ResolvedTool> {
        let mut system_failure = None;

        if spec.forced(&self.config) {
            info!("Ignoring system {} because a bundle is forced", spec.name);
        } else {
            match self.system_tool(spec).await {
                Ok(Some(tool)) => return Ok(tool),
                Ok(None) => (),
                Err(e) => {
                    warn!("{e}");
                    system_failure = Some(e);
                }
            }
        }

        let platform = self.platform().await;
        let target = spec.target_for(platform);
        let key = target
            .map(|x| x.key())
            .unwrap_or_else(|| format!("{}-{}", platform.os, platform.arch));
        let mut replaced_install = None;

        match self.cache.lookup(spec, &key) {
            Some(entry) => match self.bundled_tool(spec, &entry).await {
                Ok(tool) => {
                    debug!("Found cached {} at {}", spec.name, entry.dir.to_string_lossy());
                    return Ok(tool);
                }
                Err(reason) => {
                    warn!("Cached {} is not usable ({}), reinstalling", spec.name, reason);
                    replaced_install = Some(entry.manifest.install_id);
                }
            },
            // Stale tag or missing executable: the occupant must be replaced,
            // not mistaken for a concurrent install.
            None => {
                if let Some(stale) = self.cache.manifest(spec.name, &key) {
                    info!("Replacing outdated {} bundle ({})", spec.name, stale.tag);
                    replaced_install = Some(stale.install_id);
                }
            }
        }

        let Some(target) = target else {
            return Err(system_failure.unwrap_or_else(|| Error::UnsupportedPlatform {
                tool: spec.name.to_owned(),
                platform: platform.to_string(),
            }));
        };

        let fetcher = BundleFetcher {
            cache: &self.cache,
            config: &self.config,
            transport: self.transport.as_ref(),
            runner: self.runner.as_ref(),
            retry: RetryPolicy::new(self.config.retries),
            cancel: &self.cancel,
        };
        let entry = fetcher
            .install(spec, target, replaced_install.as_deref())
            .await?;

        self.bundled_tool(spec, &entry)
            .await
            .map_err(|reason| Error::BundleVerificationFailed {
                tool: spec.name.to_owned(),
                path: entry.bin_dir().join(spec.executable),
                reason,
            })
    }

    /// `Ok(None)` when the system has no executable, or only an outdated one.
    async fn system_tool(&self, spec: &ToolSpec) -> Result<Option<ResolvedTool>> {
        let Some(executable) = utils::find_executable(spec.executable, &self.config.search_path)
        else {
            debug!("{} is not in PATH", spec.executable);
            return Ok(None);
        };

        let invocation = Invocation::new(&executable, self.config.version_timeout)
            .args(spec.version_args.iter().copied());

        let version =
            version::query_version(self.runner.as_ref(), invocation, &spec.version_pattern).await;

        match version {
            Ok(version) if version >= spec.min_version => Ok(Some(ResolvedTool {
                name: spec.name,
                executable,
                origin: Origin::System,
                version,
                env: Vec::new(),
            })),
            Ok(version) => {
                info!(
                    "System {} {} is older than required {}",
                    spec.name, version, spec.min_version
                );
                Ok(None)
            }
            Err(VersionError::NotFound) => Ok(None),
            Err(e) => Err(Error::ToolNotRunnable {
                tool: spec.name.to_owned(),
                path: executable,
                reason: e.to_string(),
            }),
        }
    }

    async fn bundled_tool(
        &self,
        spec: &ToolSpec,
        entry: &CacheEntry,
    ) -> std::result::Result<ResolvedTool, String> {
        let executable = entry.bin_dir().join(spec.executable);
        let lib_dir = entry.lib_dir();
        let env = tool_env(&self.config, &entry.bin_dir(), lib_dir.as_deref());
        let invocation = Invocation::new(&executable, self.config.version_timeout)
            .args(spec.version_args.iter().copied())
            .envs(&env);

        let version =
            version::query_version(self.runner.as_ref(), invocation, &spec.version_pattern).await;

        match version {
            Ok(version) if version >= spec.min_version => Ok(ResolvedTool {
                name: spec.name,
                executable,
                origin: Origin::Bundle,
                version,
                env,
            }),
            Ok(version) => Err(format!(
                "version {version} is older than {}",
                spec.min_version
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}
