use super::version::{Version, parse_version};
use crate::process::{Invocation, ProcessRunner};
use log::debug;
use regex::Regex;
use std::{fmt::Display, time::Duration};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Libc {
    Glibc(Version),
    Musl,
    /// Not a Linux host, or the C library could not be identified.
    Unknown,
}

/// Host description used to pick a compatible tool bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub libc: Libc,
}

impl Platform {
    pub fn new(os: &str, arch: &str, libc: Libc) -> Self {
        Self {
            os: os.to_owned(),
            arch: normalize_arch(arch).to_owned(),
            libc,
        }
    }

    /// Detects the running host. Only Linux needs the C library version.
    pub async fn detect(runner: &dyn ProcessRunner) -> Self {
        let os = std::env::consts::OS;
        let libc = if os == "linux" {
            detect_libc(runner).await
        } else {
            Libc::Unknown
        };

        let platform = Self::new(os, std::env::consts::ARCH, libc);
        debug!("Detected platform {platform}");
        platform
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)?;

        match &self.libc {
            Libc::Glibc(version) => write!(f, "-glibc{version}"),
            Libc::Musl => write!(f, "-musl"),
            Libc::Unknown => Ok(()),
        }
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch.to_ascii_lowercase().as_str() {
        "amd64" | "x64" | "x86_64" => "x86_64",
        "arm64" | "aarch64" => "aarch64",
        _ => arch,
    }
}

async fn detect_libc(runner: &dyn ProcessRunner) -> Libc {
    let invocation = Invocation::new("ldd", Duration::from_secs(10)).arg("--version");

    match runner.run(&invocation).await {
        Ok(output) => parse_ldd_output(&output.combined()),
        Err(e) => {
            debug!("Cannot identify C library: {e}");
            Libc::Unknown
        }
    }
}

pub(crate) fn parse_ldd_output(text: &str) -> Libc {
    if text.to_ascii_lowercase().contains("musl") {
        return Libc::Musl;
    }

    let pattern = r"(?i)(?:glibc|gnu libc|gnu c library)[^\n]*?([0-9]+\.[0-9]+)";
    let Ok(pattern) = Regex::new(pattern) else {
        return Libc::Unknown;
    };

    parse_version(&pattern, text)
        .map(Libc::Glibc)
        .unwrap_or(Libc::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ldd_banners() {
        assert_eq!(
            parse_ldd_output("ldd (Ubuntu GLIBC 2.35-0ubuntu3.8) 2.35\nCopyright (C) 2022"),
            Libc::Glibc("2.35".parse().unwrap())
        );
        assert_eq!(
            parse_ldd_output("ldd (GNU libc) 2.17\n"),
            Libc::Glibc("2.17".parse().unwrap())
        );
        assert_eq!(parse_ldd_output("musl libc (x86_64)\nVersion 1.2.4"), Libc::Musl);
        assert_eq!(parse_ldd_output("something else"), Libc::Unknown);
    }

    #[test]
    fn platform_key() {
        let platform = Platform::new("linux", "amd64", Libc::Glibc("2.31".parse().unwrap()));
        assert_eq!(platform.to_string(), "linux-x86_64-glibc2.31");
        assert_eq!(Platform::new("macos", "arm64", Libc::Unknown).to_string(), "macos-aarch64");
    }
}
