mod get;
mod tools;

pub use get::Get;
pub use tools::Tools;

use clap::{ArgAction, ColorChoice, Parser, Subcommand};
use log::warn;
use reqwest::Proxy;
use std::ffi::OsString;
use tokio_util::sync::CancellationToken;

/// Download trailer tracks and mux them into one mp4 file with MP4Box.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Print debug messages (-vv for trace messages).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only print warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Get(Get),
    Tools(Tools),
}

impl Args {
    /// Parses the process arguments, accepting ffmpeg style `-an` and `-sn`.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_flags(std::env::args_os()))
    }
}

pub(crate) fn normalize_flags<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .map(|x| match x.to_str() {
            Some("-an") => OsString::from("--no-audio"),
            Some("-sn") => OsString::from("--no-subs"),
            _ => x,
        })
        .collect()
}

/// First Ctrl+C cancels the run cooperatively, a second one exits immediately.
pub(crate) fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }

        warn!("Interrupted, finishing in-flight work (press Ctrl+C again to quit)");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    cancel
}

fn proxy_address_parser(s: &str) -> Result<Proxy, String> {
    Proxy::all(s).map_err(|x| x.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_style_flags() {
        let args = ["trailmux", "get", "c.json", "-an", "-sn", "-f", "v0"].map(OsString::from);
        let args = normalize_flags(args);
        assert_eq!(
            args,
            ["trailmux", "get", "c.json", "--no-audio", "--no-subs", "-f", "v0"].map(OsString::from)
        );

        let args = Args::parse_from(args);
        match args.command {
            Commands::Get(get) => {
                assert!(get.no_audio && get.no_subs);
                assert_eq!(get.format.as_deref(), Some("v0"));
                assert_eq!(get.threads, 5);
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn threads_are_bounded() {
        assert!(Args::try_parse_from(["trailmux", "get", "c.json", "--threads", "17"]).is_err());
        assert!(Args::try_parse_from(["trailmux", "get", "c.json", "--threads", "16"]).is_ok());
    }
}
