use crate::{
    catalog::{Track, TrackId, TrackKind, Trailer},
    error::{Error, Result},
};
use std::{collections::HashSet, fmt::Display};

/// Tracks chosen by a format expression such as `v0+a0+a3+s0`.
///
/// Audio and subtitle tracks keep the order in which they were written, which
/// is also the order they are muxed in.
#[derive(Clone, Debug)]
pub struct TrackSelection<'a> {
    pub video: &'a Track,
    pub audios: Vec<&'a Track>,
    pub subtitles: Vec<&'a Track>,
}

impl<'a> TrackSelection<'a> {
    /// Parses `expression` and checks every token against `trailer`.
    pub fn parse(expression: &str, trailer: &'a Trailer) -> Result<Self> {
        let ids = tokenize(expression)?;

        let videos = ids
            .iter()
            .filter(|x| x.kind == TrackKind::Video)
            .collect::<Vec<_>>();

        if videos.len() != 1 {
            return Err(Error::ConflictingVideoSelection {
                found: videos.len(),
            });
        }

        let mut seen = HashSet::new();

        for id in &ids {
            if !seen.insert(*id) {
                return Err(Error::DuplicateTrackSelection {
                    token: id.to_string(),
                });
            }
        }

        let lookup = |id: &TrackId| {
            trailer.get(*id).ok_or_else(|| Error::TrackNotFound {
                token: id.to_string(),
            })
        };

        let video = lookup(videos[0])?;
        let mut audios = Vec::new();
        let mut subtitles = Vec::new();

        for id in &ids {
            match id.kind {
                TrackKind::Video => (),
                TrackKind::Audio => audios.push(lookup(id)?),
                TrackKind::Subtitle => subtitles.push(lookup(id)?),
            }
        }

        Ok(Self {
            video,
            audios,
            subtitles,
        })
    }

    pub fn has_subtitles(&self) -> bool {
        !self.subtitles.is_empty()
    }

    /// Every selected track, video first.
    pub fn tracks(&self) -> impl Iterator<Item = &'a Track> + '_ {
        std::iter::once(self.video)
            .chain(self.audios.iter().copied())
            .chain(self.subtitles.iter().copied())
    }
}

impl Display for TrackSelection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let expression = self
            .tracks()
            .map(|x| x.id().to_string())
            .collect::<Vec<_>>()
            .join("+");
        write!(f, "{expression}")
    }
}

fn tokenize(expression: &str) -> Result<Vec<TrackId>> {
    let malformed = |reason: String| Error::MalformedSelector {
        expression: expression.to_owned(),
        reason,
    };

    if expression.trim().is_empty() {
        return Err(malformed("expression is empty".to_owned()));
    }

    let mut ids = Vec::new();

    for token in expression.split('+').map(|x| x.trim()) {
        if token.is_empty() {
            return Err(malformed("empty token around '+'".to_owned()));
        }

        let mut chars = token.chars();
        let kind = chars
            .next()
            .and_then(TrackKind::from_tag)
            .ok_or_else(|| malformed(format!("invalid token '{token}' (expected v0, a0 or s0)")))?;
        let index = chars.as_str();

        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed(format!(
                "invalid token '{token}' (expected v0, a0 or s0)"
            )));
        }

        let index = index
            .parse::<usize>()
            .map_err(|_| malformed(format!("index of '{token}' is too large")))?;
        ids.push(TrackId::new(kind, index));
    }

    Ok(ids)
}
