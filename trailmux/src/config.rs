use log::warn;
use std::{
    env,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

pub const ENV_TOOLS_DIR: &str = "TRAILMUX_TOOLS_DIR";
pub const ENV_DEBUG: &str = "TRAILMUX_DEBUG";
pub const ENV_FORCE_BUNDLE_MUXER: &str = "TRAILMUX_FORCE_BUNDLE_MP4BOX";
pub const ENV_FORCE_BUNDLE_CONVERTER: &str = "TRAILMUX_FORCE_BUNDLE_FFMPEG";
pub const ENV_MUXER_BUNDLE_BASE: &str = "TRAILMUX_MP4BOX_BUNDLE_BASE";
pub const ENV_CONVERTER_BUNDLE_BASE: &str = "TRAILMUX_FFMPEG_BUNDLE_BASE";
pub const ENV_INSTALL_MODE: &str = "TRAILMUX_INSTALL_MODE";

/// Process-wide settings, read once at startup and passed by reference afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub tools_dir: PathBuf,
    pub debug: bool,
    /// Already gated by `debug`.
    pub force_bundle_muxer: bool,
    /// Already gated by `debug`.
    pub force_bundle_converter: bool,
    pub muxer_bundle_base: Option<String>,
    pub converter_bundle_base: Option<String>,
    pub install_mode: bool,
    pub home_dir: Option<PathBuf>,
    pub search_path: Vec<PathBuf>,
    pub library_path: Vec<PathBuf>,
    pub threads: usize,
    pub retries: u32,
    pub version_timeout: Duration,
    pub convert_timeout: Duration,
    pub mux_timeout: Duration,
    pub request_timeout: Duration,
    pub bundle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools_dir: env::temp_dir().join("trailmux").join("tools"),
            debug: false,
            force_bundle_muxer: false,
            force_bundle_converter: false,
            muxer_bundle_base: None,
            converter_bundle_base: None,
            install_mode: false,
            home_dir: None,
            search_path: Vec::new(),
            library_path: Vec::new(),
            threads: 5,
            retries: 5,
            version_timeout: Duration::from_secs(30),
            convert_timeout: Duration::from_secs(5 * 60),
            mux_timeout: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(60),
            bundle_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(env::vars_os())
    }

    /// Builds a configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Vec<(OsString, OsString)>>();
        let get = |key: &str| {
            vars.iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| get(key).is_some_and(|v| is_truthy(&v));
        let string = |key: &str| {
            get(key)
                .map(|v| v.to_string_lossy().trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let home_dir = get("HOME").map(PathBuf::from).or_else(dirs::home_dir);
        let tools_dir = string(ENV_TOOLS_DIR)
            .map(|x| expand_home(&x, home_dir.as_deref()))
            .or_else(|| get("XDG_CACHE_HOME").map(|x| cache_subdir(&PathBuf::from(x))))
            .or_else(|| home_dir.as_ref().map(|x| cache_subdir(&x.join(".cache"))))
            .or_else(|| dirs::cache_dir().map(|x| cache_subdir(&x)))
            .unwrap_or_else(|| cache_subdir(&env::temp_dir()));

        let debug = flag(ENV_DEBUG);
        let force_bundle_muxer =
            gate_force_switch(debug, flag(ENV_FORCE_BUNDLE_MUXER), ENV_FORCE_BUNDLE_MUXER);
        let force_bundle_converter =
            gate_force_switch(debug, flag(ENV_FORCE_BUNDLE_CONVERTER), ENV_FORCE_BUNDLE_CONVERTER);

        Self {
            tools_dir,
            debug,
            force_bundle_muxer,
            force_bundle_converter,
            muxer_bundle_base: string(ENV_MUXER_BUNDLE_BASE),
            converter_bundle_base: string(ENV_CONVERTER_BUNDLE_BASE),
            install_mode: flag(ENV_INSTALL_MODE),
            search_path: get("PATH").map(|x| env::split_paths(&x).collect()).unwrap_or_default(),
            library_path: get("LD_LIBRARY_PATH")
                .map(|x| env::split_paths(&x).collect())
                .unwrap_or_default(),
            home_dir,
            ..Self::default()
        }
    }

    /// Directory where finished files land when `--output-dir` is not given.
    pub fn default_output_dir(&self) -> PathBuf {
        if self.install_mode {
            let local = PathBuf::from("output");

            if std::fs::create_dir_all(&local).is_ok() {
                return local;
            }

            warn!(
                "Cannot create {}, falling back to home directory.",
                local.to_string_lossy()
            );

            return self
                .home_dir
                .as_ref()
                .map(|x| x.join("trailmux"))
                .unwrap_or(local);
        }

        env::current_exe()
            .ok()
            .and_then(|x| x.parent().map(|x| x.join("output")))
            .unwrap_or_else(|| PathBuf::from("output"))
    }
}

fn cache_subdir(base: &Path) -> PathBuf {
    base.join("trailmux").join("tools")
}

fn gate_force_switch(debug: bool, requested: bool, name: &str) -> bool {
    if requested && !debug {
        warn!("{name} is ignored because {ENV_DEBUG} is not enabled.");
        return false;
    }
    requested
}

fn is_truthy(value: &OsStr) -> bool {
    matches!(
        value.to_string_lossy().trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn expand_home(value: &str, home: Option<&Path>) -> PathBuf {
    match (value.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_switch_requires_debug() {
        let config = Config::from_vars([(ENV_FORCE_BUNDLE_MUXER, "1"), ("HOME", "/home/u")]);
        assert!(!config.force_bundle_muxer);

        let config = Config::from_vars([
            (ENV_FORCE_BUNDLE_MUXER, "true"),
            (ENV_DEBUG, "yes"),
            ("HOME", "/home/u"),
        ]);
        assert!(config.debug);
        assert!(config.force_bundle_muxer);
        assert!(!config.force_bundle_converter);
    }

    #[test]
    fn tools_dir_precedence() {
        let config = Config::from_vars([("HOME", "/home/u")]);
        assert_eq!(config.tools_dir, PathBuf::from("/home/u/.cache/trailmux/tools"));

        let config = Config::from_vars([("HOME", "/home/u"), ("XDG_CACHE_HOME", "/xdg")]);
        assert_eq!(config.tools_dir, PathBuf::from("/xdg/trailmux/tools"));

        let config = Config::from_vars([
            ("HOME", "/home/u"),
            ("XDG_CACHE_HOME", "/xdg"),
            (ENV_TOOLS_DIR, "~/tools"),
        ]);
        assert_eq!(config.tools_dir, PathBuf::from("/home/u/tools"));
    }

    #[test]
    fn captures_search_path_and_bundle_bases() {
        let path = env::join_paths(["/usr/local/bin", "/usr/bin"]).unwrap();
        let config = Config::from_vars([
            (OsString::from("PATH"), path),
            (
                OsString::from(ENV_MUXER_BUNDLE_BASE),
                OsString::from(" https://mirror.local/mp4box "),
            ),
            (OsString::from(ENV_INSTALL_MODE), OsString::from("0")),
        ]);

        assert_eq!(
            config.search_path,
            vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/usr/bin")]
        );
        assert_eq!(config.muxer_bundle_base.as_deref(), Some("https://mirror.local/mp4box"));
        assert_eq!(config.converter_bundle_base, None);
        assert!(!config.install_mode);
    }
}
