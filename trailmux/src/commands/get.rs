use super::{cancel_on_interrupt, proxy_address_parser};
use crate::{
    catalog::{Catalog, TrackKind, Trailer},
    config::Config,
    error::Error,
    http::{ReqwestTransport, Transport, USER_AGENT},
    preset::{AudioQuality, Preset, Profile},
    process::{ProcessRunner, SystemRunner},
    prompt,
    retry::RetryPolicy,
    session::Session,
};
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use log::{info, warn};
use reqwest::{Proxy, Url};
use std::{
    io::{IsTerminal, stdin},
    path::PathBuf,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

/// Download tracks of trailers listed in a catalog and mux them into mp4 files.
#[derive(Debug, Clone, Args)]
pub struct Get {
    /// Catalog json file path or http(s):// url.
    #[arg(required = true)]
    pub catalog: String,

    /// List trailers of the catalog and exit.
    #[arg(long)]
    pub list_trailers: bool,

    /// Trailer to process.
    /// Use `all` to process every trailer of the catalog one after another.
    #[arg(long, value_name = "tN|N|all")]
    pub trailer: Option<String>,

    /// List available tracks (format ids) and exit.
    /// Neither tools nor segments are downloaded in this mode.
    #[arg(short = 'F', long)]
    pub list_formats: bool,

    /// Tracks to download joined by `+`, exactly one video and any number of audio/subtitle tracks.
    /// When given, --no-audio and --no-subs are ignored.
    #[arg(short, long, value_name = "v0+a0+s0")]
    pub format: Option<String>,

    /// Never prompt. A format selection (-f or --preset) is then required.
    #[arg(long)]
    pub no_prompt: bool,

    /// Do not offer audio tracks in the interactive selection (also -an).
    /// With --preset no audio track is selected.
    #[arg(long)]
    pub no_audio: bool,

    /// Do not offer subtitle tracks in the interactive selection (also -sn).
    /// With --preset no subtitle track is selected.
    #[arg(long)]
    pub no_subs: bool,

    /// Select tracks by profile instead of -f.
    /// Missing 4K tracks fall back to 1080p SDR, then 720p SDR.
    #[arg(long, help_heading = "Preset Options", value_enum, conflicts_with = "format")]
    pub preset: Option<Profile>,

    /// Audio codec for the video-only profiles. `none` drops audio for every profile.
    #[arg(long, help_heading = "Preset Options", value_enum, default_value_t = AudioQuality::Aac)]
    pub audio: AudioQuality,

    /// Audio language, `original` or a language tag (e.g. en, cmn-Hans).
    #[arg(long, help_heading = "Preset Options", default_value = "original")]
    pub audio_lang: String,

    /// Subtitle language to add, none by default.
    #[arg(long, help_heading = "Preset Options")]
    pub sub_lang: Option<String>,

    /// Directory for finished files.
    /// Defaults to an `output` directory next to the executable.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Set http(s) / socks proxy address for requests.
    #[arg(long, help_heading = "Client Options", value_parser = proxy_address_parser)]
    pub proxy: Option<Proxy>,

    /// Update and set user agent header for requests.
    #[arg(long, help_heading = "Client Options", default_value = USER_AGENT)]
    pub user_agent: String,

    /// Maximum number of retries to download an individual segment.
    #[arg(long, help_heading = "Download Options", default_value_t = 5)]
    pub retry_count: u8,

    /// Maximum number of threads for parallel downloading of segments.
    /// Number of threads should be in range 1-16 (inclusive).
    #[arg(short, long, help_heading = "Download Options", default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub threads: u8,
}

impl Get {
    pub async fn execute(self, config: Config) -> Result<()> {
        let transport = Arc::new(ReqwestTransport::new(
            self.proxy.clone(),
            &self.user_agent,
            config.request_timeout,
            config.bundle_timeout,
        )?);
        let interactive = !self.no_prompt && stdin().is_terminal();

        self.run(
            config,
            transport,
            Arc::new(SystemRunner),
            cancel_on_interrupt,
            interactive,
        )
        .await
    }

    pub(crate) async fn run(
        self,
        mut config: Config,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn ProcessRunner>,
        cancel: impl FnOnce() -> CancellationToken,
        interactive: bool,
    ) -> Result<()> {
        config.threads = self.threads as usize;
        config.retries = self.retry_count as u32;

        let catalog = load_catalog(&self.catalog, transport.as_ref()).await?;

        if self.list_trailers {
            list_trailers(&catalog);
            return Ok(());
        }

        let (trailers, bulk) = self.trailers(&catalog, interactive)?;

        if self.list_formats {
            for trailer in &trailers {
                list_formats(trailer, &self.catalog);
            }
            return Ok(());
        }

        if let Some(message) = self.ignored_flags_warning() {
            warn!("{}", message);
        }

        let preset = self.preset();

        if self.format.is_none() && preset.is_none() && !interactive {
            return Err(Error::SelectorRequired.into());
        }

        let output_dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| config.default_output_dir());
        let session = Session::new(Arc::new(config), transport, runner, cancel(), output_dir);

        let select = |trailer: &Trailer| match (&self.format, &preset) {
            (Some(format), _) => Ok(format.to_owned()),
            (None, Some(preset)) => preset.select(trailer).map(|x| x.to_string()),
            (None, None) => prompt::select_tracks(trailer, self.no_audio, self.no_subs),
        };

        if !bulk && let [trailer] = trailers.as_slice() {
            let trailer: &Trailer = trailer;
            session.process_trailer(trailer, &select(trailer)?).await?;
            return Ok(());
        }

        let report = session.process_all(&trailers, select).await;
        report.log_summary();

        if report.has_failures() {
            bail!(
                "{} of {} trailers failed",
                report.failed.len(),
                trailers.len()
            );
        }

        Ok(())
    }

    fn ignored_flags_warning(&self) -> Option<&'static str> {
        (self.format.is_some() && (self.no_audio || self.no_subs))
            .then_some("--no-audio and --no-subs are ignored because -f selects tracks explicitly")
    }

    fn preset(&self) -> Option<Preset> {
        self.preset.map(|profile| Preset {
            profile,
            audio: if self.no_audio {
                AudioQuality::None
            } else {
                self.audio
            },
            audio_lang: self.audio_lang.clone(),
            sub_lang: if self.no_subs {
                None
            } else {
                self.sub_lang.clone()
            },
        })
    }

    /// Trailers to work on and whether this is a bulk run.
    fn trailers<'a>(
        &self,
        catalog: &'a Catalog,
        interactive: bool,
    ) -> Result<(Vec<&'a Trailer>, bool)> {
        if let Some(value) = &self.trailer {
            let bulk = matches!(value.trim().to_lowercase().as_str(), "all" | "a");
            return Ok((catalog.select(value)?, bulk));
        }

        match catalog.trailers.as_slice() {
            [] => Err(Error::TrailerSelection("catalog lists no trailers".to_owned()).into()),
            [trailer] => Ok((vec![trailer], false)),
            trailers if self.list_formats => Ok((trailers.iter().collect(), false)),
            trailers if interactive => {
                let index = prompt::select_trailer(catalog)?;
                let trailer = trailers.get(index).ok_or_else(|| {
                    Error::TrailerSelection(format!("trailer index {index} is out of range"))
                })?;
                Ok((vec![trailer], false))
            }
            trailers => Err(Error::TrailerSelection(format!(
                "catalog lists {} trailers, choose one",
                trailers.len()
            ))
            .into()),
        }
    }
}

async fn load_catalog(input: &str, transport: &dyn Transport) -> Result<Catalog> {
    let data = if input.starts_with("http://") || input.starts_with("https://") {
        let url = input.parse::<Url>()?;
        info!("Fetching catalog {}", url);
        RetryPolicy::default()
            .run(&CancellationToken::new(), || transport.get(&url))
            .await?
    } else {
        tokio::fs::read(input).await?
    };

    Ok(Catalog::from_json(&data)?)
}

fn list_trailers(catalog: &Catalog) {
    for trailer in &catalog.trailers {
        println!(
            "{} {} - {}{}",
            trailer.id.bold(),
            trailer.title,
            trailer.video_title,
            trailer
                .year()
                .map(|x| format!(" ({x})"))
                .unwrap_or_default()
        );
    }
}

fn list_formats(trailer: &Trailer, catalog: &str) {
    println!(
        "{} {} - {}",
        format!("Trailer {}:", trailer.id).bold(),
        trailer.title,
        trailer.video_title
    );

    for (kind, heading) in [
        (TrackKind::Video, "Video"),
        (TrackKind::Audio, "Audio"),
        (TrackKind::Subtitle, "Subtitles"),
    ] {
        let tracks = trailer.tracks_of(kind).collect::<Vec<_>>();

        if tracks.is_empty() {
            continue;
        }

        println!("  {}", heading.cyan());

        for track in tracks {
            println!("    {}", track.display_track());
        }
    }

    let mut example = vec![];

    for kind in [TrackKind::Video, TrackKind::Audio, TrackKind::Subtitle] {
        if let Some(track) = trailer.tracks_of(kind).next() {
            example.push(track.id().to_string());
        }
    }

    if !example.is_empty() {
        println!(
            "  {} trailmux get {} --trailer {} -f {}",
            "Example:".dimmed(),
            catalog,
            trailer.id,
            example.join("+")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::{Args, Commands, normalize_flags},
        http::TransportError,
        process::{Invocation, Output, ProcessError},
    };
    use async_trait::async_trait;
    use clap::Parser;
    use std::{ffi::OsString, path::Path, sync::Mutex};

    const CATALOG: &str = r#"{"trailers": [{
        "title": "Foundation",
        "video_title": "Teaser",
        "tracks": [
            {"kind": "video", "index": 0, "resolution": [960, 540], "segment_urls": ["https://cdn.local/v0/0.m4s"]},
            {"kind": "video", "index": 1, "resolution": [640, 360], "segment_urls": ["https://cdn.local/v1/0.m4s"]},
            {"kind": "audio", "index": 0, "language": "en", "segment_urls": ["https://cdn.local/a0/0.m4s"]}
        ]
    }]}"#;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<String>>,
        runs: Mutex<Vec<Invocation>>,
    }

    impl Recorder {
        fn untouched(&self) -> bool {
            self.requests.lock().unwrap().is_empty() && self.runs.lock().unwrap().is_empty()
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn get(&self, url: &Url) -> std::result::Result<Vec<u8>, TransportError> {
            self.requests.lock().unwrap().push(url.to_string());
            Err(TransportError::fatal(url, "HTTP 404 Not Found"))
        }
    }

    #[async_trait]
    impl ProcessRunner for Recorder {
        async fn run(&self, invocation: &Invocation) -> std::result::Result<Output, ProcessError> {
            self.runs.lock().unwrap().push(invocation.clone());
            Err(ProcessError::NotFound(invocation.program.clone()))
        }
    }

    fn get(root: &Path, extra: &[&str]) -> Get {
        let catalog = root.join("catalog.json");
        std::fs::write(&catalog, CATALOG).unwrap();

        let mut args = vec![
            OsString::from("trailmux"),
            OsString::from("get"),
            catalog.into_os_string(),
            OsString::from("-o"),
            root.join("out").into_os_string(),
        ];
        args.extend(extra.iter().map(OsString::from));

        match Args::try_parse_from(normalize_flags(args)).unwrap().command {
            Commands::Get(get) => get,
            _ => panic!("expected get"),
        }
    }

    async fn run(root: &Path, extra: &[&str], recorder: &Arc<Recorder>) -> Result<()> {
        let config = Config {
            tools_dir: root.join("tools"),
            ..Config::default()
        };

        get(root, extra)
            .run(
                config,
                recorder.clone(),
                recorder.clone(),
                CancellationToken::new,
                false,
            )
            .await
    }

    fn crate_error(result: Result<()>) -> Error {
        match result {
            Err(e) => match e.downcast::<Error>() {
                Ok(e) => e,
                Err(e) => panic!("unexpected error {e}"),
            },
            Ok(()) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn non_interactive_run_requires_selector() {
        let root = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());

        let result = run(root.path(), &["--no-prompt"], &recorder).await;

        assert!(matches!(crate_error(result), Error::SelectorRequired));
        assert!(recorder.untouched());
        assert!(!root.path().join("tools").exists());
    }

    #[tokio::test]
    async fn listing_formats_needs_no_tools() {
        let root = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());

        run(root.path(), &["-F"], &recorder).await.unwrap();

        assert!(recorder.untouched());
        assert!(!root.path().join("tools").exists());
        assert!(!root.path().join("out").exists());
    }

    #[tokio::test]
    async fn video_token_count_is_checked_before_any_work() {
        let root = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());

        for (format, expected) in [("a0", 0), ("v0+v1", 2)] {
            match crate_error(run(root.path(), &["-f", format], &recorder).await) {
                Error::ConflictingVideoSelection { found } => assert_eq!(found, expected),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert!(recorder.untouched());
        assert!(!root.path().join("tools").exists());
    }

    #[tokio::test]
    async fn preset_replaces_format_selector() {
        let root = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());

        let args = ["--no-prompt", "--preset", "1080-sdr-aac"];
        let result = run(root.path(), &args, &recorder).await;

        match crate_error(result) {
            Error::NoMatchingTrack { preset, .. } => assert_eq!(preset, "1080-sdr-aac"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(recorder.untouched());
    }

    #[test]
    fn preset_conflicts_with_format() {
        let args = ["trailmux", "get", "c.json", "--preset", "4k-hdr", "-f", "v0"];
        assert!(Args::try_parse_from(args).is_err());
    }

    #[test]
    fn no_audio_and_no_subs_with_format_are_reported() {
        let root = tempfile::tempdir().unwrap();

        assert!(get(root.path(), &["-f", "v0", "-an"]).ignored_flags_warning().is_some());
        assert!(get(root.path(), &["-f", "v0", "-sn"]).ignored_flags_warning().is_some());
        assert!(get(root.path(), &["-an", "-sn"]).ignored_flags_warning().is_none());
        assert!(get(root.path(), &["-f", "v0"]).ignored_flags_warning().is_none());

        let get = get(root.path(), &["--preset", "1080-sdr", "--sub-lang", "en", "-an", "-sn"]);
        assert!(get.ignored_flags_warning().is_none());

        let preset = get.preset().unwrap();
        assert_eq!(preset.audio, AudioQuality::None);
        assert_eq!(preset.sub_lang, None);
    }
}
