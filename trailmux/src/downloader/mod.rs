mod merger;

pub use merger::Merger;

use crate::{
    catalog::TrackId,
    error::{Error, Result},
    http::{Transport, TransportError},
    progress::Progress,
    retry::RetryPolicy,
    selector::TrackSelection,
};
use colored::Colorize;
use log::{debug, info};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;

/// One assembled track on disk.
#[derive(Clone, Debug)]
pub struct TrackFile {
    pub id: TrackId,
    pub language: Option<String>,
    pub path: PathBuf,
}

/// Track files of one trailer in selection order.
///
/// They live in a private working directory which is deleted on drop.
pub struct FetchedTracks {
    workdir: TempDir,
    pub video: TrackFile,
    pub audios: Vec<TrackFile>,
    pub subtitles: Vec<TrackFile>,
}

impl FetchedTracks {
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

#[derive(Clone, Copy, Debug)]
struct Part {
    slot: usize,
    pos: usize,
    /// `None` for the init segment.
    segment: Option<usize>,
}

type PartResult = (Part, std::result::Result<Vec<u8>, TransportError>);

/// Fetches the segments of every selected track through one bounded worker pool.
pub struct DownloadOrchestrator {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    threads: usize,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        threads: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            retry,
            threads: threads.max(1),
            cancel,
        }
    }

    /// Downloads `selection` into a new working directory below `parent`.
    ///
    /// The first failing segment stops new fetches; in-flight ones finish and
    /// the working directory is removed before the error is returned.
    pub async fn fetch(
        &self,
        selection: &TrackSelection<'_>,
        parent: &Path,
    ) -> Result<FetchedTracks> {
        let workdir = tempfile::Builder::new()
            .prefix(".trailmux-")
            .tempdir_in(parent)?;
        debug!("Working directory {}", workdir.path().to_string_lossy());

        let mut files = Vec::new();
        let mut mergers = Vec::new();
        let mut parts = Vec::new();

        for (slot, track) in selection.tracks().enumerate() {
            if track.segment_urls.is_empty() && track.init_url.is_none() {
                return Err(Error::Catalog(format!("track {} has no segments", track.id())));
            }

            info!(
                "Processing {:>8} track: {}",
                track.kind.to_string(),
                track.display_track().bold()
            );

            let path = workdir
                .path()
                .join(format!("{}.{}", track.id(), track.kind.extension()));
            let mut pos = 0;

            if let Some(url) = &track.init_url {
                parts.push((Part { slot, pos, segment: None }, url.clone()));
                pos += 1;
            }

            for (i, url) in track.segment_urls.iter().enumerate() {
                parts.push((Part { slot, pos, segment: Some(i) }, url.clone()));
                pos += 1;
            }

            mergers.push(Merger::new(pos, &path)?);
            files.push(TrackFile {
                id: track.id(),
                language: track.language.clone(),
                path,
            });
        }

        let token = self.cancel.child_token();
        let mut state = State {
            files: &files,
            mergers,
            failure: None,
            done: 0,
            progress: Progress::new(&files[0].id.to_string(), parts.len()),
            token: token.clone(),
        };
        let mut set = JoinSet::new();

        for (part, url) in parts {
            while set.len() >= self.threads {
                if let Some(result) = set.join_next().await
                    && let Err(e) = state.complete(result)
                {
                    return Err(drain(&mut set, &token, e).await);
                }
            }

            if token.is_cancelled() {
                break;
            }

            set.spawn(fetch_part(
                self.transport.clone(),
                self.retry.clone(),
                token.clone(),
                part,
                url,
            ));
        }

        while let Some(result) = set.join_next().await {
            if let Err(e) = state.complete(result) {
                return Err(drain(&mut set, &token, e).await);
            }
        }

        let State {
            mergers,
            failure,
            progress,
            ..
        } = state;
        drop(progress);

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(failure) = failure {
            return Err(failure);
        }

        if let Some(i) = mergers.iter().position(|x| !x.finished()) {
            return Err(Error::Io(std::io::Error::other(format!(
                "track {} was not fully assembled",
                files[i].id
            ))));
        }

        let audio_count = selection.audios.len();
        let mut files = files.into_iter();
        let video = files
            .next()
            .ok_or_else(|| Error::Catalog("no video track selected".to_owned()))?;
        let audios = files.by_ref().take(audio_count).collect();
        let subtitles = files.collect();

        Ok(FetchedTracks {
            workdir,
            video,
            audios,
            subtitles,
        })
    }
}

struct State<'a> {
    files: &'a [TrackFile],
    mergers: Vec<Merger>,
    failure: Option<Error>,
    done: usize,
    progress: Progress,
    token: CancellationToken,
}

impl State<'_> {
    fn complete(&mut self, result: std::result::Result<PartResult, JoinError>) -> Result<()> {
        let (part, data) = match result {
            Ok(x) => x,
            Err(e) => {
                self.token.cancel();
                return Err(Error::Io(std::io::Error::other(e)));
            }
        };

        match data {
            Ok(data) => {
                let merger = &mut self.mergers[part.slot];

                if let Err(e) = merger.write(part.pos, data) {
                    self.token.cancel();
                    return Err(e.into());
                }

                self.done += 1;
                let stored = self.mergers.iter().map(|x| x.stored()).sum();
                self.progress.update(self.done, stored);
            }
            Err(e) => {
                self.token.cancel();

                if self.failure.is_none() {
                    let track = self.files[part.slot].id.to_string();
                    self.failure = Some(match part.segment {
                        Some(segment) => Error::SegmentFetch {
                            track,
                            segment,
                            cause: e.to_string(),
                        },
                        None => Error::SegmentFetch {
                            track,
                            segment: 0,
                            cause: format!("init segment: {e}"),
                        },
                    });
                }
            }
        }

        Ok(())
    }
}

/// Stops new retries and waits for in-flight fetches before `error` is returned.
async fn drain(set: &mut JoinSet<PartResult>, token: &CancellationToken, error: Error) -> Error {
    token.cancel();
    while set.join_next().await.is_some() {}
    error
}

async fn fetch_part(
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    token: CancellationToken,
    part: Part,
    url: Url,
) -> PartResult {
    let data = retry.run(&token, || transport.get(&url)).await;
    (part, data)
}
