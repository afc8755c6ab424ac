//! Unattended track selection by named profile.
//!
//! A profile names the wanted video range and width. The AV profiles also fix
//! the audio codec. When the wanted video is missing the choice falls back to
//! 1080p SDR, then 720p SDR. Missing audio falls back to AAC in the original
//! language.

use crate::{
    catalog::{Track, TrackKind, Trailer, VideoRange},
    error::{Error, Result},
    selector::TrackSelection,
};
use clap::ValueEnum;
use log::{info, warn};
use std::cmp::Reverse;

const WIDTH_4K: u32 = 3500;
const WIDTH_1080: u32 = 1800;
const WIDTH_720: u32 = 1200;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Profile {
    /// 1080p SDR with AAC audio.
    #[value(name = "1080-sdr-aac")]
    Sdr1080Aac,
    /// 4K Dolby Vision with Atmos audio.
    #[value(name = "4k-dovi-atmos")]
    DoVi4kAtmos,
    /// 4K HDR with Dolby Digital 5.1 audio.
    #[value(name = "4k-hdr-dd51")]
    Hdr4kDd51,
    /// 1080p SDR, audio chosen by --audio.
    #[value(name = "1080-sdr")]
    Sdr1080,
    /// 4K Dolby Vision, audio chosen by --audio.
    #[value(name = "4k-dovi")]
    DoVi4k,
    /// 4K HDR, audio chosen by --audio.
    #[value(name = "4k-hdr")]
    Hdr4k,
}

impl Profile {
    fn video(&self) -> (VideoRange, u32) {
        match self {
            Self::Sdr1080Aac | Self::Sdr1080 => (VideoRange::Sdr, WIDTH_1080),
            Self::DoVi4kAtmos | Self::DoVi4k => (VideoRange::DoVi, WIDTH_4K),
            Self::Hdr4kDd51 | Self::Hdr4k => (VideoRange::Hdr, WIDTH_4K),
        }
    }

    /// Codec fixed by the AV profiles.
    fn fixed_audio(&self) -> Option<AudioQuality> {
        match self {
            Self::Sdr1080Aac => Some(AudioQuality::Aac),
            Self::DoVi4kAtmos => Some(AudioQuality::Atmos),
            Self::Hdr4kDd51 => Some(AudioQuality::Dd51),
            _ => None,
        }
    }

    fn name(&self) -> String {
        self.to_possible_value()
            .map(|x| x.get_name().to_owned())
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum AudioQuality {
    #[default]
    Aac,
    Atmos,
    #[value(name = "dd5.1", alias = "dd51")]
    Dd51,
    None,
}

#[derive(Clone, Copy, Debug)]
enum Codec {
    Aac,
    HeAac,
    Atmos,
    Dd51,
}

impl Codec {
    fn matches(&self, codec: &str) -> bool {
        let codec = codec.to_ascii_lowercase();

        match self {
            Self::Aac => matches!(codec.as_str(), "aac" | "mp4a.40.2"),
            Self::HeAac => matches!(codec.as_str(), "he-aac" | "mp4a.40.5" | "mp4a.40.29"),
            Self::Atmos => codec == "atmos",
            Self::Dd51 => matches!(codec.as_str(), "dd5.1" | "ac-3" | "ec-3"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Wanted<'a> {
    Original,
    Language(&'a str),
    Any,
}

/// Profile plus the audio and subtitle wishes of one run.
#[derive(Clone, Debug)]
pub struct Preset {
    pub profile: Profile,
    /// Ignored by AV profiles, except for `none`.
    pub audio: AudioQuality,
    /// `original` or a language tag such as `en` or `cmn-Hans`.
    pub audio_lang: String,
    pub sub_lang: Option<String>,
}

impl Preset {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            audio: AudioQuality::default(),
            audio_lang: "original".to_owned(),
            sub_lang: None,
        }
    }

    pub fn select<'a>(&self, trailer: &'a Trailer) -> Result<TrackSelection<'a>> {
        let video = self.video(trailer)?;
        let audio = self.audio(trailer);
        let subtitle = self.subtitle(trailer);

        if audio.is_none() && self.audio != AudioQuality::None {
            warn!(
                "No suitable audio track in {}, output will be video only",
                trailer.id
            );
        }

        let selection = TrackSelection {
            video,
            audios: audio.into_iter().collect(),
            subtitles: subtitle.into_iter().collect(),
        };
        info!(
            "Preset {} selected {} ({})",
            self.profile.name(),
            selection,
            video.display_track()
        );
        Ok(selection)
    }

    fn video<'a>(&self, trailer: &'a Trailer) -> Result<&'a Track> {
        let wanted = self.profile.video();
        let fallbacks = [(VideoRange::Sdr, WIDTH_1080), (VideoRange::Sdr, WIDTH_720)];

        for (i, (range, min_width)) in std::iter::once(wanted).chain(fallbacks).enumerate() {
            if let Some(track) = best_video(trailer, range, min_width) {
                if i > 0 {
                    warn!(
                        "No {} video of {}px width in {}, using {}",
                        wanted.0,
                        wanted.1,
                        trailer.id,
                        track.id()
                    );
                }
                return Ok(track);
            }
        }

        Err(Error::NoMatchingTrack {
            preset: self.profile.name(),
            what: format!("SDR video of at least {WIDTH_720}px width"),
        })
    }

    fn audio<'a>(&self, trailer: &'a Trailer) -> Option<&'a Track> {
        if self.audio == AudioQuality::None {
            return None;
        }

        let codec = match self.profile.fixed_audio().unwrap_or(self.audio) {
            AudioQuality::Aac => Codec::Aac,
            AudioQuality::Atmos => Codec::Atmos,
            AudioQuality::Dd51 => Codec::Dd51,
            AudioQuality::None => return None,
        };
        let lang = self.audio_lang.trim();
        let wanted = if lang.is_empty() || lang.eq_ignore_ascii_case("original") {
            Wanted::Original
        } else {
            Wanted::Language(lang)
        };

        best_audio(trailer, codec, wanted).or_else(|| {
            [
                (Codec::Aac, Wanted::Original),
                (Codec::HeAac, Wanted::Original),
                (Codec::Aac, Wanted::Any),
                (Codec::HeAac, Wanted::Any),
            ]
            .into_iter()
            .find_map(|(codec, wanted)| best_audio(trailer, codec, wanted))
        })
    }

    fn subtitle<'a>(&self, trailer: &'a Trailer) -> Option<&'a Track> {
        let lang = self.sub_lang.as_deref()?.trim();

        if matches!(lang.to_ascii_lowercase().as_str(), "" | "none" | "off" | "no") {
            return None;
        }

        trailer
            .tracks_of(TrackKind::Subtitle)
            .filter(|x| x.language.as_deref() == Some(lang))
            .min_by_key(|x| (x.sdh, x.forced))
    }
}

fn best_video(trailer: &Trailer, range: VideoRange, min_width: u32) -> Option<&Track> {
    trailer
        .tracks_of(TrackKind::Video)
        .filter(|x| x.video_range() == range && x.width() >= min_width)
        .min_by_key(|x| {
            let area = x.resolution.map(|(w, h)| w as u64 * h as u64).unwrap_or_default();
            Reverse((area, x.bitrate.unwrap_or_default()))
        })
}

fn best_audio<'a>(trailer: &'a Trailer, codec: Codec, wanted: Wanted) -> Option<&'a Track> {
    trailer
        .tracks_of(TrackKind::Audio)
        .filter(|x| !x.audio_description)
        .filter(|x| x.codec.as_deref().is_some_and(|c| codec.matches(c)))
        .filter(|x| match wanted {
            Wanted::Original => x.original,
            Wanted::Language(lang) => x.language.as_deref() == Some(lang),
            Wanted::Any => true,
        })
        .min_by_key(|x| Reverse(x.bitrate.unwrap_or_default()))
}
