#![cfg(unix)]

mod common;

use common::*;
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use trailmux::{
    Error,
    catalog::{Catalog, Trailer},
    session::{Outcome, Session},
};

const CATALOG: &str = r#"{
    "trailers": [
        {
            "title": "Foundation",
            "video_title": "Official Trailer",
            "release_date": "2023-07-14",
            "tracks": [
                {"kind": "video", "index": 0, "segment_urls": ["https://cdn.local/t0/v0/0.m4s", "https://cdn.local/t0/v0/1.m4s"]},
                {"kind": "audio", "index": 0, "language": "en", "segment_urls": ["https://cdn.local/t0/a0/0.m4s"]},
                {"kind": "audio", "index": 3, "language": "de", "segment_urls": ["https://cdn.local/t0/a3/0.m4s"]},
                {"kind": "subtitle", "index": 0, "language": "en", "segment_urls": ["https://cdn.local/t0/s0/0.vtt"]}
            ]
        },
        {
            "title": "Foundation",
            "video_title": "Teaser",
            "release_date": "2023-05-01",
            "tracks": [
                {"kind": "video", "index": 0, "segment_urls": ["https://cdn.local/t1/v0/0.m4s"]},
                {"kind": "audio", "index": 0, "language": "en", "segment_urls": ["https://cdn.local/t1/a0/0.m4s"]}
            ]
        }
    ]
}"#;

fn catalog() -> Catalog {
    Catalog::from_json(CATALOG.as_bytes()).unwrap()
}

fn transport() -> Arc<FakeTransport> {
    Arc::new(
        FakeTransport::new()
            .with("https://cdn.local/t0/v0/0.m4s", "[v0]")
            .with("https://cdn.local/t0/v0/1.m4s", "[v1]")
            .with("https://cdn.local/t0/a0/0.m4s", "[en]")
            .with("https://cdn.local/t0/a3/0.m4s", "[de]")
            .with("https://cdn.local/t0/s0/0.vtt", "[subs]")
            .with("https://cdn.local/t1/v0/0.m4s", "[teaser]")
            .with("https://cdn.local/t1/a0/0.m4s", "[teaser-en]"),
    )
}

/// Session with system MP4Box and ffmpeg, writing into `root/out`.
fn session(root: &Path, runner: Arc<FakeRunner>) -> Session {
    install_system_tool(root, "MP4Box", GPAC_BANNER);
    install_system_tool(root, "ffmpeg", FFMPEG_BANNER);

    Session::new(
        Arc::new(config(root)),
        transport(),
        runner,
        CancellationToken::new(),
        root.join("out"),
    )
    .with_platform(linux())
}

fn created(outcome: Outcome) -> std::path::PathBuf {
    match outcome {
        Outcome::Created(path) => path,
        Outcome::Skipped(path) => panic!("{} was skipped", path.display()),
    }
}

#[tokio::test]
async fn muxes_selected_tracks_in_order() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let session = session(root.path(), runner.clone());
    let catalog = catalog();

    let output = created(
        session
            .process_trailer(&catalog.trailers[0], "v0+a3+a0")
            .await
            .unwrap(),
    );

    assert_eq!(
        output,
        root.path()
            .join("out")
            .join("Foundation - Official Trailer (2023) Trailer [WEB-DL].mp4")
    );
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "[v0][v1][de][en]");

    let mux = runner
        .calls()
        .into_iter()
        .find(|x| x.args.iter().any(|y| y == "-new"))
        .unwrap();
    let args = mux
        .args
        .iter()
        .map(|x| x.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert!(args[3].ends_with("a3.m4a:lang=de"));
    assert!(args[5].ends_with("a0.m4a:lang=en"));
    assert_eq!(args[7], "title=Foundation - Official Trailer:created=2023");

    // Only the finished file is left behind.
    assert_eq!(std::fs::read_dir(root.path().join("out")).unwrap().count(), 1);
}

#[tokio::test]
async fn subtitles_are_converted_before_muxing() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let session = session(root.path(), runner.clone());
    let catalog = catalog();

    let output = created(
        session
            .process_trailer(&catalog.trailers[0], "v0+s0")
            .await
            .unwrap(),
    );

    assert_eq!(std::fs::read_to_string(&output).unwrap(), "[v0][v1][subs]");
    assert_eq!(runner.count("-hide_banner"), 1);

    let mux = runner
        .calls()
        .into_iter()
        .find(|x| x.args.iter().any(|y| y == "-new"))
        .unwrap();
    assert!(mux.args[3].to_string_lossy().ends_with("s0.srt:lang=en"));
}

#[tokio::test]
async fn existing_output_is_skipped() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let session = session(root.path(), runner.clone());
    let catalog = catalog();

    let output = created(
        session
            .process_trailer(&catalog.trailers[1], "v0")
            .await
            .unwrap(),
    );
    let mux_runs = runner.count("-new");

    match session.process_trailer(&catalog.trailers[1], "v0").await {
        Ok(Outcome::Skipped(path)) => assert_eq!(path, output),
        other => panic!("unexpected result {other:?}"),
    }

    assert_eq!(runner.count("-new"), mux_runs);
}

#[tokio::test]
async fn failed_mux_leaves_nothing_behind() {
    let root = tempfile::tempdir().unwrap();
    let session = session(root.path(), Arc::new(FakeRunner::failing_mux()));
    let catalog = catalog();

    match session.process_trailer(&catalog.trailers[0], "v0+a0").await {
        Err(Error::MergeToolFailed {
            tool,
            code,
            diagnostics,
        }) => {
            assert_eq!(tool, "mp4box");
            assert_eq!(code, Some(1));
            assert!(diagnostics.contains("corrupted input"));
        }
        other => panic!("unexpected result {other:?}"),
    }

    assert_eq!(std::fs::read_dir(root.path().join("out")).unwrap().count(), 0);
}

#[tokio::test]
async fn bulk_run_continues_after_failures() {
    let root = tempfile::tempdir().unwrap();
    let session = session(root.path(), Arc::new(FakeRunner::new()));
    let catalog = catalog();
    let trailers = catalog.trailers.iter().collect::<Vec<&Trailer>>();

    let report = session
        .process_all(&trailers, |_| Ok("v0+a3".to_owned()))
        .await;

    assert!(report.has_failures());
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].0, "t0");
    assert!(report.skipped.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "t1");
    assert_eq!(report.failed[0].1.kind(), "TrackNotFound");

    let again = session
        .process_all(&trailers, |trailer| match trailer.id.as_str() {
            "t1" => Ok("v0+a0".to_owned()),
            _ => Ok("v0+a3".to_owned()),
        })
        .await;

    assert!(!again.has_failures());
    assert_eq!(again.skipped.len(), 1);
    assert_eq!(again.created.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_bulk_run() {
    let root = tempfile::tempdir().unwrap();
    let catalog = catalog();
    let trailers = catalog.trailers.iter().collect::<Vec<&Trailer>>();
    let cancel = CancellationToken::new();
    install_system_tool(root.path(), "MP4Box", GPAC_BANNER);

    let session = Session::new(
        Arc::new(config(root.path())),
        transport(),
        Arc::new(FakeRunner::new()),
        cancel.clone(),
        root.path().join("out"),
    )
    .with_platform(linux());
    cancel.cancel();

    let report = session.process_all(&trailers, |_| Ok("v0".to_owned())).await;

    assert!(report.created.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|(_, e)| matches!(e, Error::Cancelled)));
}
