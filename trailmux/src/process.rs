use async_trait::async_trait;
use log::debug;
use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{} cannot be executed (not found)", .0.display())]
    NotFound(PathBuf),

    #[error("{} was killed after {}s timeout", .program.display(), .timeout.as_secs())]
    TimedOut { program: PathBuf, timeout: Duration },

    #[error("failed to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One external program call.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &[(OsString, OsString)]) -> Self {
        self.env.extend_from_slice(env);
        self
    }

    /// Command line as it would be typed in a shell, used for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().map(|x| x.to_string_lossy().into_owned()))
            .map(|x| if x.contains(' ') { format!("\"{x}\"") } else { x })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, Default)]
pub struct Output {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Both streams joined, stdout first.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_owned(),
            _ => self.stderr.trim_end().to_owned(),
        }
    }
}

/// Runs external programs. Every call is bounded by the invocation timeout.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<Output, ProcessError>;
}

/// [`ProcessRunner`] backed by real child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Output, ProcessError> {
        debug!("Executing {}", invocation.display());

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ProcessError::NotFound(invocation.program.clone())
                }
                _ => ProcessError::Spawn {
                    program: invocation.program.clone(),
                    source,
                },
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::TimedOut {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            })?
            .map_err(|source| ProcessError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        Ok(Output {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let invocation = Invocation::new("MP4Box", Duration::from_secs(1))
            .arg("-add")
            .arg("my video.mp4")
            .args(["-new", "out.mp4"]);

        assert_eq!(invocation.display(), "MP4Box -add \"my video.mp4\" -new out.mp4");
    }

    #[test]
    fn combined_output_joins_streams() {
        let output = Output {
            code: Some(1),
            stdout: "line one\n".to_owned(),
            stderr: "line two\n".to_owned(),
        };
        assert_eq!(output.combined(), "line one\nline two");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_not_found() {
        let invocation = Invocation::new("/nonexistent/trailmux-tool", Duration::from_secs(5));
        let result = SystemRunner.run(&invocation).await;
        assert!(matches!(result, Err(ProcessError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_is_killed() {
        let invocation = Invocation::new("sleep", Duration::from_millis(100)).arg("5");
        let result = SystemRunner.run(&invocation).await;
        assert!(matches!(result, Err(ProcessError::TimedOut { .. })));
    }
}
