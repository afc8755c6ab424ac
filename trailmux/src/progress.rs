use colored::Colorize;
use std::{
    io::{self, IsTerminal, Write},
    time::Instant,
};

/// Single line segment counter drawn on stderr. Silent when stderr is not a terminal.
pub struct Progress {
    label: String,
    total_segments: usize,
    started: Instant,
    enabled: bool,
}

impl Progress {
    pub fn new(label: &str, total_segments: usize) -> Self {
        let enabled = io::stderr().is_terminal() && log::max_level() <= log::LevelFilter::Info;

        if enabled {
            let mut handle = io::stderr().lock();
            let _ = write!(handle, "\x1B[?25l");
            let _ = handle.flush();
        }

        Self {
            label: label.to_owned(),
            total_segments,
            started: Instant::now(),
            enabled,
        }
    }

    pub fn update(&mut self, segments: usize, bytes: usize) {
        if !self.enabled {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            bytes as f64 / elapsed
        } else {
            0.0
        };

        let eta = if segments > 0 && speed > 0.0 {
            let estimate = bytes as f64 / segments as f64 * self.total_segments as f64;
            ((estimate - bytes as f64).max(0.0) / speed) as usize
        } else {
            0
        };

        let percent = if self.total_segments > 0 {
            segments * 100 / self.total_segments
        } else {
            100
        };

        let mut handle = io::stderr().lock();
        let _ = write!(
            handle,
            "\r\x1B[2K{}#{} {}{} SG:{} DL:{} ETA:{}{}",
            "[".magenta(),
            self.label,
            ByteSize(bytes),
            format!("({percent}%)").cyan(),
            format!("{}/{}", segments, self.total_segments).cyan(),
            format!("{}/s", ByteSize(speed as usize)).green(),
            Eta(eta).to_string().yellow(),
            "]".magenta(),
        );
        let _ = handle.flush();
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if self.enabled {
            let mut handle = io::stderr().lock();
            let _ = writeln!(handle, "\x1B[?25h");
            let _ = handle.flush();
        }
    }
}

pub(crate) struct ByteSize(pub usize);

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const KIB: f64 = 1024.0;
        const MIB: f64 = KIB * 1024.0;
        const GIB: f64 = MIB * 1024.0;

        let bytes = self.0 as f64;

        if bytes >= GIB {
            write!(f, "{:.1}GiB", bytes / GIB)
        } else if bytes >= MIB {
            write!(f, "{:.1}MiB", bytes / MIB)
        } else if bytes >= KIB {
            write!(f, "{:.1}KiB", bytes / KIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

struct Eta(usize);

impl std::fmt::Display for Eta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        let seconds = self.0 % 60;

        if hours > 0 {
            write!(f, "{hours}h{minutes}m{seconds}s")
        } else if minutes > 0 {
            write!(f, "{minutes}m{seconds}s")
        } else {
            write!(f, "{seconds}s")
        }
    }
}
