mod bundle;
mod cache;
mod platform;
mod resolver;
mod spec;
mod version;

pub use bundle::BundleFetcher;
pub use cache::{BundleManifest, CacheEntry, Promotion, ToolCache};
pub use platform::{Libc, Platform};
pub use resolver::ToolResolver;
pub use spec::{BundleTarget, Checksum, ToolRole, ToolSpec};
pub use version::{VersionError, Version, parse_version, query_version};

use crate::{config::Config, process::Invocation};
use std::{
    ffi::OsString,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    System,
    Bundle,
}

impl Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::System => "system",
                Self::Bundle => "bundle",
            }
        )
    }
}

/// A tool which passed its version check and is ready to be invoked.
#[derive(Clone, Debug)]
pub struct ResolvedTool {
    pub name: &'static str,
    pub executable: PathBuf,
    pub origin: Origin,
    pub version: Version,
    /// Extra variables for every invocation. Bundled tools find their own
    /// `bin` and `lib` directories first.
    pub env: Vec<(OsString, OsString)>,
}

impl ResolvedTool {
    pub fn invocation(&self, timeout: Duration) -> Invocation {
        Invocation::new(&self.executable, timeout).envs(&self.env)
    }
}

/// `PATH` and `LD_LIBRARY_PATH` with the bundle directories in front of the
/// values captured at startup.
pub(crate) fn tool_env(
    config: &Config,
    bin: &Path,
    lib: Option<&Path>,
) -> Vec<(OsString, OsString)> {
    let mut env = Vec::new();

    if let Some(path) = prepend(bin, &config.search_path) {
        env.push((OsString::from("PATH"), path));
    }

    if let Some(lib) = lib
        && let Some(path) = prepend(lib, &config.library_path)
    {
        env.push((OsString::from("LD_LIBRARY_PATH"), path));
    }

    env
}

fn prepend(first: &Path, rest: &[PathBuf]) -> Option<OsString> {
    std::env::join_paths(std::iter::once(first).chain(rest.iter().map(|x| x.as_path()))).ok()
}
