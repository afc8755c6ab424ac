//! Download selected tracks of streamed trailers and mux them with MP4Box.
//!
//! Missing or outdated tools are replaced by prebuilt bundles kept in a
//! per-user cache, so nothing has to be installed system-wide.

pub mod catalog;
mod commands;
pub mod config;
pub mod downloader;
mod error;
pub mod http;
mod logger;
pub mod mux;
pub mod preset;
pub mod process;
mod progress;
mod prompt;
pub mod retry;
pub mod selector;
pub mod session;
pub mod tools;
mod utils;

#[doc(hidden)]
pub use commands::{Args, Commands};
pub use config::Config;
pub use error::{Error, Result};
#[doc(hidden)]
pub use logger::Logger;
