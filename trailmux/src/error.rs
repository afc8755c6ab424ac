use crate::{http::TransportError, process::ProcessError};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by every stage of a trailer run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed format selector '{expression}': {reason}. Use -F to list format ids")]
    MalformedSelector { expression: String, reason: String },

    #[error("{}", video_selection_message(.found))]
    ConflictingVideoSelection { found: usize },

    #[error("track '{token}' is selected more than once. Remove the duplicate from -f")]
    DuplicateTrackSelection { token: String },

    #[error("track '{token}' not found in this trailer. Use -F to list format ids")]
    TrackNotFound { token: String },

    #[error(
        "no {tool} bundle is published for platform '{platform}'. Install {tool} manually and make it available in PATH"
    )]
    UnsupportedPlatform { tool: String, platform: String },

    #[error("failed to fetch bundle {url}: {cause}")]
    BundleFetch { url: String, cause: String },

    #[error(
        "bundled {tool} at {} is not usable: {reason}. Remove the tools directory and retry, or install {tool} manually",
        .path.display()
    )]
    BundleVerificationFailed {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    #[error("{tool} at {} cannot be used: {reason}", .path.display())]
    ToolNotRunnable {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to download segment {segment} of track {track}: {cause}")]
    SegmentFetch {
        track: String,
        segment: usize,
        cause: String,
    },

    #[error("{tool} exited with {}\n{diagnostics}", exit_code_display(.code))]
    MergeToolFailed {
        tool: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("subtitle tracks are selected but no converter was resolved")]
    ConverterNotResolved,

    #[error("a format selector is required in non-interactive mode. Use -F to list formats and -f or --preset to select")]
    SelectorRequired,

    #[error("no {what} matches preset '{preset}'. Use -F to list formats and -f to select")]
    NoMatchingTrack { preset: String, what: String },

    #[error("{0}. Use --list-trailers then --trailer t0 (or all)")]
    TrailerSelection(String),

    #[error("invalid catalog: {0}")]
    Catalog(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Name of the error kind, as shown in batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSelector { .. } => "MalformedSelector",
            Self::ConflictingVideoSelection { .. } => "ConflictingVideoSelection",
            Self::DuplicateTrackSelection { .. } => "DuplicateTrackSelection",
            Self::TrackNotFound { .. } => "TrackNotFound",
            Self::UnsupportedPlatform { .. } => "UnsupportedPlatform",
            Self::BundleFetch { .. } => "BundleFetchError",
            Self::BundleVerificationFailed { .. } => "BundleVerificationFailed",
            Self::ToolNotRunnable { .. } => "ToolNotRunnable",
            Self::SegmentFetch { .. } => "SegmentFetchError",
            Self::MergeToolFailed { .. } => "MergeToolFailed",
            Self::ConverterNotResolved => "ConverterNotResolved",
            Self::SelectorRequired => "SelectorRequired",
            Self::NoMatchingTrack { .. } => "NoMatchingTrack",
            Self::TrailerSelection(_) => "TrailerSelection",
            Self::Catalog(_) => "Catalog",
            Self::Cancelled => "Cancelled",
            Self::Process(_) => "Process",
            Self::Transport(_) => "Transport",
            Self::Io(_) => "Io",
        }
    }

    pub(crate) fn bundle_fetch(url: impl ToString, cause: impl ToString) -> Self {
        Self::BundleFetch {
            url: url.to_string(),
            cause: cause.to_string(),
        }
    }
}

fn video_selection_message(found: &usize) -> String {
    if *found == 0 {
        "no video track selected, exactly one vN token is required (e.g. -f \"v0+a0\")".to_owned()
    } else {
        format!("{found} video tracks selected, only one vN token is supported in the output")
    }
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (killed or timed out)".to_owned(),
    }
}
