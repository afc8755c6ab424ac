use crate::process::{Invocation, ProcessError, ProcessRunner};
use regex::Regex;
use std::{cmp::Ordering, fmt::Display, path::Path, str::FromStr};
use thiserror::Error;

/// Dotted numeric version compared field by field, missing fields count as zero.
#[derive(Clone, Debug, Default)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn new(fields: &[u64]) -> Self {
        Self(fields.to_vec())
    }

    fn field(&self, i: usize) -> u64 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    /// Every field keeps its leading digits only; a field without digits reads as zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.trim()
                .split('.')
                .map(|x| {
                    let digits = x.chars().take_while(|c| c.is_ascii_digit()).collect::<String>();
                    digits.parse::<u64>().unwrap_or(0)
                })
                .collect(),
        ))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.field(i).cmp(&other.field(i)))
            .find(|x| *x != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(".")
        )
    }
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("executable not found")]
    NotFound,

    #[error("unrecognized version output: {0}")]
    Unparseable(String),

    #[error(transparent)]
    Process(ProcessError),
}

/// Pulls the first capture group of `pattern` out of `output`.
pub fn parse_version(pattern: &Regex, output: &str) -> Option<Version> {
    let caps = pattern.captures(output)?;
    caps.get(1)
        .or_else(|| caps.get(0))?
        .as_str().parse::<Version>().ok()
}

/// Runs `executable args...` and extracts its version.
pub async fn query_version(
    runner: &dyn ProcessRunner,
    invocation: Invocation,
    pattern: &Regex,
) -> Result<Version, VersionError> {
    let output = match runner.run(&invocation).await {
        Ok(output) => output,
        Err(ProcessError::NotFound(_)) => return Err(VersionError::NotFound),
        Err(e) => return Err(VersionError::Process(e)),
    };

    let text = output.combined();
    parse_version(pattern, &text).ok_or_else(|| {
        let first = text.lines().next().unwrap_or_default();
        VersionError::Unparseable(first.chars().take(120).collect())
    })
}

pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        metadata.is_file()
    }
}
