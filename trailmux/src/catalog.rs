use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Display};
use url::Url;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    /// Letter used by format ids (`v0`, `a1`, `s2`).
    pub fn tag(&self) -> char {
        match self {
            Self::Video => 'v',
            Self::Audio => 'a',
            Self::Subtitle => 's',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag.to_ascii_lowercase() {
            'v' => Some(Self::Video),
            'a' => Some(Self::Audio),
            's' => Some(Self::Subtitle),
            _ => None,
        }
    }

    /// Extension of the assembled track file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "m4a",
            Self::Subtitle => "vtt",
        }
    }
}

impl Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Video => "video",
                Self::Audio => "audio",
                Self::Subtitle => "subtitle",
            }
        )
    }
}

/// Dynamic range of a video track. Tracks without one are SDR.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum VideoRange {
    #[default]
    #[serde(rename = "sdr", alias = "SDR")]
    Sdr,
    #[serde(rename = "hdr", alias = "HDR", alias = "hdr10")]
    Hdr,
    #[serde(rename = "dovi", alias = "DoVi", alias = "dolby-vision")]
    DoVi,
}

impl Display for VideoRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Sdr => "SDR",
                Self::Hdr => "HDR",
                Self::DoVi => "DoVi",
            }
        )
    }
}

/// Identity of a track inside one trailer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TrackId {
    pub kind: TrackKind,
    pub index: usize,
}

impl TrackId {
    pub fn new(kind: TrackKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.tag(), self.index)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Track {
    pub kind: TrackKind,
    pub index: usize,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub resolution: Option<(u32, u32)>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub init_url: Option<Url>,
    pub segment_urls: Vec<Url>,
    #[serde(default)]
    pub range: Option<VideoRange>,
    /// Audio in the original language of the title.
    #[serde(default)]
    pub original: bool,
    #[serde(default)]
    pub audio_description: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub sdh: bool,
}

impl Track {
    pub fn id(&self) -> TrackId {
        TrackId::new(self.kind, self.index)
    }

    pub fn video_range(&self) -> VideoRange {
        self.range.unwrap_or_default()
    }

    pub fn width(&self) -> u32 {
        self.resolution.map(|(w, _)| w).unwrap_or_default()
    }

    pub fn display_track(&self) -> String {
        let mut parts = vec![self.id().to_string()];

        if let Some(codec) = &self.codec {
            parts.push(codec.to_owned());
        }

        if let Some(range) = self.range {
            parts.push(range.to_string());
        }

        if let Some((w, h)) = self.resolution {
            parts.push(format!("{w}x{h}"));
        }

        if let Some(bitrate) = self.bitrate {
            parts.push(format_bitrate(bitrate));
        }

        if let Some(language) = &self.language {
            parts.push(language.to_owned());
        }

        if let Some(name) = &self.name {
            parts.push(name.to_owned());
        }

        for (flag, label) in [
            (self.original, "original"),
            (self.audio_description, "AD"),
            (self.forced, "forced"),
            (self.sdh, "SDH"),
        ] {
            if flag {
                parts.push(label.to_owned());
            }
        }

        parts.push(format!("{} segments", self.segment_urls.len()));
        parts.join(" | ")
    }
}

/// All selectable tracks of one trailer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Trailer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub video_title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    pub tracks: Vec<Track>,
}

impl Trailer {
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|x| x.id() == id)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        let mut tracks = self.tracks.iter().filter(|x| x.kind == kind).collect::<Vec<_>>();
        tracks.sort_by_key(|x| x.index);
        tracks.into_iter()
    }

    pub fn year(&self) -> Option<&str> {
        self.release_date.as_deref().and_then(|x| x.get(0..4))
    }

    /// Name of the finished file, without directory.
    pub fn output_file_name(&self) -> String {
        let mut name = crate::utils::sanitize(&self.title);
        let video_title = crate::utils::sanitize(&self.video_title);

        if !video_title.is_empty() {
            if !name.is_empty() {
                name.push_str(" - ");
            }
            name.push_str(&video_title);
        }

        if name.is_empty() {
            name = crate::utils::sanitize(&self.id);
        }

        if let Some(year) = self.year() {
            name.push_str(&format!(" ({year})"));
        }

        format!("{name} Trailer [WEB-DL].mp4")
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for track in &self.tracks {
            if !seen.insert(track.id()) {
                return Err(Error::Catalog(format!(
                    "trailer {} lists track {} twice",
                    self.id,
                    track.id()
                )));
            }
        }

        Ok(())
    }
}

/// Catalog document handed over by the page/manifest collaborator.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Catalog {
    pub trailers: Vec<Trailer>,
}

impl Catalog {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let mut catalog = serde_json::from_slice::<Self>(data)
            .map_err(|e| Error::Catalog(e.to_string()))?;

        for (i, trailer) in catalog.trailers.iter_mut().enumerate() {
            if trailer.id.is_empty() {
                trailer.id = format!("t{i}");
            }
            trailer.validate()?;
        }

        Ok(catalog)
    }

    /// Resolves a `--trailer` value (`t0`, `0`, `all`).
    pub fn select(&self, value: &str) -> Result<Vec<&Trailer>> {
        let value = value.trim().to_lowercase();

        if value == "all" || value == "a" {
            return Ok(self.trailers.iter().collect());
        }

        let index = value
            .strip_prefix('t')
            .unwrap_or(&value)
            .parse::<usize>()
            .map_err(|_| Error::TrailerSelection(format!("invalid trailer value '{value}'")))?;

        self.trailers
            .get(index)
            .map(|x| vec![x])
            .ok_or_else(|| {
                Error::TrailerSelection(format!("trailer index {index} is out of range"))
            })
    }
}

fn format_bitrate(bitrate: u64) -> String {
    if bitrate >= 1_000_000 {
        format!("{:.2} Mb/s", bitrate as f64 / 1_000_000.0)
    } else {
        format!("{} Kb/s", bitrate / 1000)
    }
}
