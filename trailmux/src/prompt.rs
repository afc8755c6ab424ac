use crate::{
    catalog::{Catalog, TrackKind, Trailer},
    error::{Error, Result},
};
use requestty::{Answer, Question, prompt::style::Stylize};

/// Asks for one video and optionally audio/subtitle tracks, returning a format expression.
pub fn select_tracks(trailer: &Trailer, no_audio: bool, no_subs: bool) -> Result<String> {
    let videos = trailer.tracks_of(TrackKind::Video).collect::<Vec<_>>();

    if videos.is_empty() {
        return Err(Error::Catalog(format!("trailer {} has no video track", trailer.id)));
    }

    let question = Question::select("video")
        .message("Select video track")
        .choices(videos.iter().map(|x| x.display_track()))
        .build();
    let answer = ask(question)?;
    let mut tokens = answer
        .as_list_item()
        .and_then(|x| videos.get(x.index))
        .map(|x| vec![x.id().to_string()])
        .unwrap_or_default();

    if !no_audio {
        tokens.extend(select_many(trailer, TrackKind::Audio, "Select audio tracks", true)?);
    }

    if !no_subs {
        tokens.extend(select_many(trailer, TrackKind::Subtitle, "Select subtitle tracks", false)?);
    }

    Ok(tokens.join("+"))
}

fn select_many(
    trailer: &Trailer,
    kind: TrackKind,
    message: &str,
    first_default: bool,
) -> Result<Vec<String>> {
    let tracks = trailer.tracks_of(kind).collect::<Vec<_>>();

    if tracks.is_empty() {
        return Ok(Vec::new());
    }

    let question = Question::multi_select(kind.to_string())
        .message(message)
        .should_loop(false)
        .choices_with_default(
            tracks
                .iter()
                .enumerate()
                .map(|(i, x)| requestty::Choice((x.display_track(), first_default && i == 0))),
        )
        .transform(|choices, _, backend| {
            backend.write_styled(
                &choices
                    .iter()
                    .map(|x| x.text.split(" | ").next().unwrap_or_default().to_owned())
                    .collect::<Vec<_>>()
                    .join("+")
                    .cyan(),
            )
        })
        .build();

    Ok(ask(question)?
        .as_list_items()
        .map(|items| {
            items
                .iter()
                .filter_map(|x| tracks.get(x.index))
                .map(|x| x.id().to_string())
                .collect()
        })
        .unwrap_or_default())
}

/// Asks which trailer of `catalog` to process.
pub fn select_trailer(catalog: &Catalog) -> Result<usize> {
    let question = Question::select("trailer")
        .message("Select trailer")
        .choices(
            catalog
                .trailers
                .iter()
                .map(|x| format!("{}: {} {}", x.id, x.title, x.video_title)),
        )
        .build();

    ask(question)?
        .as_list_item()
        .map(|x| x.index)
        .ok_or_else(|| Error::TrailerSelection("no trailer selected".to_owned()))
}

fn ask(question: Question<'_>) -> Result<Answer> {
    requestty::prompt_one(question).map_err(|e| match e {
        requestty::ErrorKind::Interrupted | requestty::ErrorKind::Aborted => Error::Cancelled,
        e => Error::Io(std::io::Error::other(e.to_string())),
    })
}
