#![allow(dead_code)]

use async_trait::async_trait;
use flate2::{Compression, write::GzEncoder};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};
use trailmux::{
    Config,
    http::{Transport, TransportError},
    process::{Invocation, Output, ProcessError, ProcessRunner},
    tools::{Libc, Platform},
};
use url::Url;

pub const MP4BOX_BASE: &str = "https://mirror.local/mp4box";
pub const MP4BOX_BUNDLE: &str = "https://mirror.local/mp4box/mp4box-bundle-linux-x86_64.tar.gz";
pub const GPAC_BANNER: &str = "MP4Box - GPAC version 2.2.1-rev0-gd6f6a4b7\n(c) 2000-2023 Telecom Paris";
pub const FFMPEG_BANNER: &str = "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers";

/// Serves canned bodies, 404 for everything else.
#[derive(Default)]
pub struct FakeTransport {
    bodies: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    flaky: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_owned(), body.into());
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_owned(), delay);
        self
    }

    /// Fails the first `times` requests of `url` with a transient error.
    pub fn flaky(self, url: &str, times: usize) -> Self {
        self.flaky.lock().unwrap().insert(url.to_owned(), times);
        self
    }

    /// Serves a bundle containing `bin/<exe>` (and its sha256 sidecar).
    pub fn with_bundle(self, url: &str, exe: &str, banner: &str) -> Self {
        let bundle = bundle(exe, banner);
        let digest = hex::encode(Sha256::digest(&bundle));
        self.with(url, bundle)
            .with(&format!("{url}.sha256"), format!("{digest}  bundle.tar.gz\n"))
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.requests().iter().filter(|x| *x == url).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let key = url.as_str().to_owned();
        self.requests.lock().unwrap().push(key.clone());

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::transient(url, "connection error"));
        }

        self.bodies
            .get(&key)
            .cloned()
            .ok_or_else(|| TransportError::fatal(url, "HTTP 404 Not Found"))
    }
}

/// Every fake executable is a text file holding its version banner.
///
/// `-version` prints the banner, the muxer writes its inputs concatenated to
/// the `-new` target and the converter copies its input.
#[derive(Default)]
pub struct FakeRunner {
    pub mux_exit: i32,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_mux() -> Self {
        Self {
            mux_exit: 1,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, arg: &str) -> usize {
        self.calls()
            .iter()
            .filter(|x| x.args.iter().any(|y| y == arg))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Output, ProcessError> {
        self.calls.lock().unwrap().push(invocation.clone());

        let banner = std::fs::read_to_string(&invocation.program)
            .map_err(|_| ProcessError::NotFound(invocation.program.clone()))?;
        let args = &invocation.args;

        if args.iter().any(|x| x == "-version") {
            return Ok(Output {
                code: Some(0),
                stdout: banner,
                stderr: String::new(),
            });
        }

        if let Some(i) = args.iter().position(|x| x == "-new") {
            std::fs::write(&args[i + 1], b"partial").unwrap();

            if self.mux_exit != 0 {
                return Ok(Output {
                    code: Some(self.mux_exit),
                    stdout: String::new(),
                    stderr: "Error: corrupted input".to_owned(),
                });
            }

            let mut data = Vec::new();

            for pair in args.windows(2).filter(|x| x[0] == "-add") {
                let input = pair[1].to_string_lossy();
                let path = input.split(":lang=").next().unwrap_or_default();
                data.extend(std::fs::read(path).unwrap());
            }

            std::fs::write(&args[i + 1], data).unwrap();
        } else if let [.., input, output] = args.as_slice() {
            std::fs::copy(input, output).unwrap();
        }

        Ok(Output {
            code: Some(0),
            ..Output::default()
        })
    }
}

pub fn bundle(exe: &str, banner: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut header = tar::Header::new_gnu();
    header.set_size(banner.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("bin/{exe}"), banner.as_bytes())
        .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

pub fn linux() -> Platform {
    Platform::new("linux", "x86_64", Libc::Glibc("2.31".parse().unwrap()))
}

/// Config rooted in `root`, with `root/bin` as the only search path entry.
pub fn config(root: &Path) -> Config {
    let bin = root.join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    Config {
        tools_dir: root.join("tools"),
        search_path: vec![bin],
        muxer_bundle_base: Some(MP4BOX_BASE.to_owned()),
        retries: 3,
        ..Config::default()
    }
}

/// Places a fake system executable into `root/bin`.
pub fn install_system_tool(root: &Path, exe: &str, banner: &str) -> PathBuf {
    let bin = root.join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let path = bin.join(exe);
    std::fs::write(&path, banner).unwrap();
    path
}

/// Names of hidden leftovers (staging, download, retired) below `dir`.
pub fn hidden_entries(dir: &Path) -> Vec<OsString> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|x| x.ok())
                .map(|x| x.file_name())
                .filter(|x| x.to_string_lossy().starts_with('.'))
                .collect()
        })
        .unwrap_or_default()
}
