use crate::{
    catalog::Trailer,
    config::Config,
    downloader::DownloadOrchestrator,
    error::{Error, Result},
    http::Transport,
    mux::{MergeJob, MergeOrchestrator},
    process::ProcessRunner,
    retry::RetryPolicy,
    selector::TrackSelection,
    tools::{Platform, ToolResolver, ToolRole},
};
use colored::Colorize;
use log::{error, info};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum Outcome {
    Created(PathBuf),
    /// The output file already existed.
    Skipped(PathBuf),
}

/// Per-trailer results of a bulk run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub created: Vec<(String, PathBuf)>,
    pub skipped: Vec<(String, PathBuf)>,
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn log_summary(&self) {
        info!(
            "Finished: {} created, {} skipped, {} failed",
            self.created.len().to_string().green(),
            self.skipped.len().to_string().yellow(),
            self.failed.len().to_string().red()
        );

        for (id, e) in &self.failed {
            error!("{} ({}): {}", id, e.kind(), e);
        }
    }
}

/// One run over a catalog: shared tools, transport and cancellation signal.
pub struct Session {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    runner: Arc<dyn ProcessRunner>,
    resolver: ToolResolver,
    cancel: CancellationToken,
    output_dir: PathBuf,
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn ProcessRunner>,
        cancel: CancellationToken,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            resolver: ToolResolver::new(
                config.clone(),
                transport.clone(),
                runner.clone(),
                cancel.clone(),
            ),
            config,
            transport,
            runner,
            cancel,
            output_dir,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.resolver = self.resolver.with_platform(platform);
        self
    }

    pub fn resolver(&self) -> &ToolResolver {
        &self.resolver
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Selects, downloads and muxes the tracks of one trailer.
    pub async fn process_trailer(&self, trailer: &Trailer, expression: &str) -> Result<Outcome> {
        let selection = TrackSelection::parse(expression, trailer)?;
        let output = self.output_dir.join(trailer.output_file_name());

        if output.exists() {
            info!("Skipping {} (already exists)", output.to_string_lossy());
            return Ok(Outcome::Skipped(output));
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!("Selected {} for {}", selection.to_string().bold(), trailer.id);

        let muxer = self.resolver.resolve_role(ToolRole::Muxer).await?;
        let converter = if selection.has_subtitles() {
            Some(self.resolver.resolve_role(ToolRole::Converter).await?)
        } else {
            None
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let fetched = DownloadOrchestrator::new(
            self.transport.clone(),
            RetryPolicy::new(self.config.retries),
            self.config.threads,
            self.cancel.clone(),
        )
        .fetch(&selection, &self.output_dir)
        .await?;

        let title = [trailer.title.as_str(), trailer.video_title.as_str()]
            .into_iter()
            .filter(|x| !x.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        let job = MergeJob::new(&fetched, output)
            .metadata(Some(title), trailer.year().map(str::to_owned));

        let output = MergeOrchestrator::new(
            self.runner.clone(),
            self.config.convert_timeout,
            self.config.mux_timeout,
        )
        .merge(&job, muxer, converter)
        .await?;

        info!("Saved {}", output.to_string_lossy().bold());
        Ok(Outcome::Created(output))
    }

    /// Runs every trailer with the expression returned by `select`.
    ///
    /// A failing trailer is recorded and the run moves on. Cancellation marks
    /// every remaining trailer as cancelled.
    pub async fn process_all<F>(&self, trailers: &[&Trailer], mut select: F) -> BatchReport
    where
        F: FnMut(&Trailer) -> Result<String>,
    {
        let mut report = BatchReport::default();

        for trailer in trailers {
            if self.cancel.is_cancelled() {
                report.failed.push((trailer.id.clone(), Error::Cancelled));
                continue;
            }

            info!("Trailer {}: {} {}", trailer.id.bold(), trailer.title, trailer.video_title);

            let result = match select(trailer) {
                Ok(expression) => self.process_trailer(trailer, &expression).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(Outcome::Created(path)) => report.created.push((trailer.id.clone(), path)),
                Ok(Outcome::Skipped(path)) => report.skipped.push((trailer.id.clone(), path)),
                Err(e) => {
                    error!("{}: {}", trailer.id, e);
                    report.failed.push((trailer.id.clone(), e));
                }
            }
        }

        report
    }
}
