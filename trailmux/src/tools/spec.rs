use super::{
    platform::{Libc, Platform},
    version::Version,
};
use crate::config::Config;
use regex::Regex;

pub const MP4BOX_BUNDLE_BASE: &str =
    "https://github.com/pdahd/Manzana-Apple-TV-Plus-Trailers/releases/download/mp4box-bundle-latest";
pub const FFMPEG_BUNDLE_BASE: &str =
    "https://github.com/pdahd/Manzana-Apple-TV-Plus-Trailers/releases/download/ffmpeg-bundle-latest";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ToolRole {
    Muxer,
    Converter,
}

/// How a downloaded bundle is checked before it is installed.
#[derive(Clone, Debug)]
pub enum Checksum {
    /// Expected sha256 is published next to the bundle as `<url><suffix>`.
    Sidecar(&'static str),
    Sha256(String),
}

/// One row of the bundle matrix.
#[derive(Clone, Debug)]
pub struct BundleTarget {
    pub os: &'static str,
    pub arch: &'static str,
    /// Oldest glibc the bundle runs on. `None` means the C library does not matter.
    pub glibc_floor: Option<Version>,
    /// File name appended to the bundle base url.
    pub asset: String,
}

impl BundleTarget {
    pub fn matches(&self, platform: &Platform) -> bool {
        if self.os != platform.os || self.arch != platform.arch {
            return false;
        }

        match (&self.glibc_floor, &platform.libc) {
            (None, _) => true,
            (Some(floor), Libc::Glibc(host)) => host >= floor,
            (Some(_), _) => false,
        }
    }

    /// Cache directory name for this target.
    pub fn key(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

/// Static description of an external tool this program depends on.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub role: ToolRole,
    pub executable: &'static str,
    pub min_version: Version,
    pub version_args: &'static [&'static str],
    pub version_pattern: Regex,
    /// Release tag of the bundles, stored in every cache entry manifest.
    pub bundle_tag: &'static str,
    pub bundle_base: String,
    pub matrix: Vec<BundleTarget>,
    pub checksum: Option<Checksum>,
}

impl ToolSpec {
    pub fn mp4box(config: &Config) -> Self {
        Self {
            name: "mp4box",
            role: ToolRole::Muxer,
            executable: executable_name("MP4Box"),
            min_version: Version::new(&[2, 0]),
            version_args: &["-version"],
            version_pattern: version_regex(r"(?i)GPAC\s+version\s+([0-9]+(?:\.[0-9]+)*)"),
            bundle_tag: "mp4box-bundle-latest",
            bundle_base: config
                .muxer_bundle_base
                .clone()
                .unwrap_or_else(|| MP4BOX_BUNDLE_BASE.to_owned()),
            matrix: vec![BundleTarget {
                os: "linux",
                arch: "x86_64",
                glibc_floor: Some(Version::new(&[2, 17])),
                asset: "mp4box-bundle-linux-x86_64.tar.gz".to_owned(),
            }],
            checksum: Some(Checksum::Sidecar(".sha256")),
        }
    }

    pub fn ffmpeg(config: &Config) -> Self {
        Self {
            name: "ffmpeg",
            role: ToolRole::Converter,
            executable: executable_name("ffmpeg"),
            min_version: Version::new(&[4, 0]),
            version_args: &["-version"],
            version_pattern: version_regex(r"(?i)ffmpeg\s+version\s+n?([0-9]+(?:\.[0-9]+)*)"),
            bundle_tag: "ffmpeg-bundle-latest",
            bundle_base: config
                .converter_bundle_base
                .clone()
                .unwrap_or_else(|| FFMPEG_BUNDLE_BASE.to_owned()),
            matrix: vec![BundleTarget {
                os: "linux",
                arch: "x86_64",
                glibc_floor: Some(Version::new(&[2, 17])),
                asset: "ffmpeg-bundle-linux-x86_64.tar.gz".to_owned(),
            }],
            checksum: Some(Checksum::Sidecar(".sha256")),
        }
    }

    pub fn for_role(role: ToolRole, config: &Config) -> Self {
        match role {
            ToolRole::Muxer => Self::mp4box(config),
            ToolRole::Converter => Self::ffmpeg(config),
        }
    }

    pub fn target_for(&self, platform: &Platform) -> Option<&BundleTarget> {
        self.matrix.iter().find(|x| x.matches(platform))
    }

    pub fn bundle_url(&self, target: &BundleTarget) -> String {
        format!("{}/{}", self.bundle_base.trim_end_matches('/'), target.asset)
    }

    /// Whether the force-bundle switch for this tool is on.
    pub fn forced(&self, config: &Config) -> bool {
        match self.role {
            ToolRole::Muxer => config.force_bundle_muxer,
            ToolRole::Converter => config.force_bundle_converter,
        }
    }
}

fn executable_name(name: &'static str) -> &'static str {
    if cfg!(target_os = "windows") {
        match name {
            "MP4Box" => "MP4Box.exe",
            "ffmpeg" => "ffmpeg.exe",
            _ => name,
        }
    } else {
        name
    }
}

fn version_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in version pattern: {e}"))
}
