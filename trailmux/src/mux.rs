use crate::{
    downloader::{FetchedTracks, TrackFile},
    error::{Error, Result},
    process::{Invocation, ProcessRunner},
    tools::ResolvedTool,
};
use log::{debug, info, warn};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::fs;

/// Inputs of one mux run, consumed once.
#[derive(Clone, Debug)]
pub struct MergeJob {
    pub video: TrackFile,
    pub audios: Vec<TrackFile>,
    pub subtitles: Vec<TrackFile>,
    pub output: PathBuf,
    pub title: Option<String>,
    pub year: Option<String>,
}

impl MergeJob {
    pub fn new(tracks: &FetchedTracks, output: PathBuf) -> Self {
        Self {
            video: tracks.video.clone(),
            audios: tracks.audios.clone(),
            subtitles: tracks.subtitles.clone(),
            output,
            title: None,
            year: None,
        }
    }

    pub fn metadata(mut self, title: Option<String>, year: Option<String>) -> Self {
        self.title = title.filter(|x| !x.is_empty());
        self.year = year;
        self
    }
}

pub struct MergeOrchestrator {
    runner: Arc<dyn ProcessRunner>,
    convert_timeout: Duration,
    mux_timeout: Duration,
}

impl MergeOrchestrator {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        convert_timeout: Duration,
        mux_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            convert_timeout,
            mux_timeout,
        }
    }

    /// Converts subtitles when present, then muxes everything into `job.output`.
    ///
    /// The muxer writes into a hidden file next to the output which is only
    /// renamed into place after a clean exit.
    pub async fn merge(
        &self,
        job: &MergeJob,
        muxer: &ResolvedTool,
        converter: Option<&ResolvedTool>,
    ) -> Result<PathBuf> {
        let mut subtitles = Vec::with_capacity(job.subtitles.len());

        if !job.subtitles.is_empty() {
            let converter = converter.ok_or(Error::ConverterNotResolved)?;

            for subtitle in &job.subtitles {
                subtitles.push(TrackFile {
                    path: self.convert_subtitle(&subtitle.path, converter).await?,
                    ..subtitle.clone()
                });
            }
        }

        let dest_dir = match job.output.parent() {
            Some(x) if !x.as_os_str().is_empty() => x.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dest_dir).await?;

        let partial = dest_dir.join(format!(".{}.partial.mp4", uuid::Uuid::new_v4().simple()));
        let invocation = muxer
            .invocation(self.mux_timeout)
            .args(mux_args(job, &subtitles, &partial));

        info!("Muxing {}", job.output.to_string_lossy());

        let result = self.run_tool(muxer.name, &invocation).await;

        if let Err(e) = result {
            remove_partial(&partial).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&partial, &job.output).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }

        Ok(job.output.clone())
    }

    async fn convert_subtitle(&self, input: &Path, converter: &ResolvedTool) -> Result<PathBuf> {
        let output = input.with_extension("srt");
        let invocation = converter
            .invocation(self.convert_timeout)
            .args(["-hide_banner", "-y", "-i"])
            .arg(input)
            .arg(&output);

        debug!("Converting {} to srt", input.to_string_lossy());
        self.run_tool(converter.name, &invocation).await?;
        Ok(output)
    }

    async fn run_tool(&self, tool: &str, invocation: &Invocation) -> Result<()> {
        let output = self.runner.run(invocation).await?;

        if output.success() {
            Ok(())
        } else {
            Err(Error::MergeToolFailed {
                tool: tool.to_owned(),
                code: output.code,
                diagnostics: output.combined(),
            })
        }
    }
}

fn mux_args(job: &MergeJob, subtitles: &[TrackFile], output: &Path) -> Vec<OsString> {
    let mut args = vec![OsString::from("-add"), job.video.path.clone().into_os_string()];

    for track in job.audios.iter().chain(subtitles) {
        let mut input = track.path.clone().into_os_string();

        if let Some(language) = &track.language {
            input.push(format!(":lang={language}"));
        }

        args.push(OsString::from("-add"));
        args.push(input);
    }

    if let Some(title) = &job.title {
        let mut tags = format!("title={}", title.replace(':', ""));

        if let Some(year) = &job.year {
            tags.push_str(&format!(":created={year}"));
        }

        args.push(OsString::from("-itags"));
        args.push(OsString::from(tags));
    }

    args.push(OsString::from("-new"));
    args.push(output.as_os_str().to_owned());
    args
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Cannot remove {}: {}", path.to_string_lossy(), e);
    }
}
