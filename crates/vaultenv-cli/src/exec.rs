use std::{io::Write, process::Stdio};

use thiserror::Error;
use tokio::{
    io::{self, AsyncRead, AsyncWrite, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, instrument, warn};
use vaultenv_core::{Concealed, Ring, RingError, Safe, SafeError};

pub const USAGE_MESSAGE: &str = "expected namespace and command argument(s)";

/// Outcome of one pipeline run, mapped 1:1 onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The child ran; carries its exit code.
    Child(i32),
    UsageError,
    Failure,
}

impl ExecStatus {
    pub fn code(self) -> i32 {
        match self {
            ExecStatus::Child(code) => code,
            ExecStatus::UsageError => 2,
            ExecStatus::Failure => 1,
        }
    }
}

#[derive(Debug, Error)]
enum ExecError {
    #[error("{0}")]
    Fetch(#[from] SafeError),
    #[error("unable to decrypt {key:?}: {source}")]
    Decrypt { key: String, source: RingError },
    #[error("failed to exec: {0}")]
    Spawn(std::io::Error),
    #[error("failed to wait for child: {0}")]
    Wait(std::io::Error),
}

/// Where the pipeline writes. `diag` receives at most one line; the child's
/// stdout and stderr are copied to their own sinks, never merged.
pub struct Streams<'a> {
    pub diag: &'a mut (dyn Write + Send),
    pub stdout: &'a mut (dyn AsyncWrite + Unpin + Send),
    pub stderr: &'a mut (dyn AsyncWrite + Unpin + Send),
}

/// Fetch a namespace, decrypt it and run a command with the secrets in its
/// environment.
pub struct ExecPipeline<S, R> {
    safe: S,
    ring: R,
    insulate: bool,
}

impl<S: Safe, R: Ring> ExecPipeline<S, R> {
    pub fn new(safe: S, ring: R) -> Self {
        Self {
            safe,
            ring,
            insulate: false,
        }
    }

    /// Start the child with only the decrypted secrets as its environment.
    pub fn insulate(mut self, insulate: bool) -> Self {
        self.insulate = insulate;
        self
    }

    /// `args` is `<namespace> <command> [args...]`.
    pub async fn run(&self, args: &[String], streams: &mut Streams<'_>) -> ExecStatus {
        let [namespace, command, command_args @ ..] = args else {
            report(&mut *streams.diag, USAGE_MESSAGE);
            return ExecStatus::UsageError;
        };

        match self.execute(namespace, command, command_args, streams).await {
            Ok(code) => ExecStatus::Child(code),
            Err(err) => {
                report(&mut *streams.diag, &err.to_string());
                ExecStatus::Failure
            }
        }
    }

    #[instrument(skip_all, fields(namespace = %namespace, insulate = self.insulate))]
    async fn execute(
        &self,
        namespace: &str,
        command: &str,
        command_args: &[String],
        streams: &mut Streams<'_>,
    ) -> Result<i32, ExecError> {
        let ns = self.safe.get(namespace).await?;
        debug!(keys = ns.len(), "namespace fetched");

        let mut secrets: Vec<(&str, Concealed)> = Vec::with_capacity(ns.len());
        for (key, value) in &ns.content {
            let plain = self
                .ring
                .decrypt(value)
                .await
                .map_err(|source| ExecError::Decrypt {
                    key: key.clone(),
                    source,
                })?;
            secrets.push((key.as_str(), plain));
        }

        let mut cmd = Command::new(command);
        cmd.args(command_args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.insulate {
            cmd.env_clear();
        }
        for (key, plain) in &secrets {
            cmd.env(key, plain.expose());
        }

        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        // The command holds its own copy of the environment now.
        drop(secrets);
        debug!(pid = child.id(), "child spawned");

        let child_out = child.stdout.take();
        let child_err = child.stderr.take();
        let (status, (), ()) = tokio::join!(
            child.wait(),
            relay("stdout", child_out, &mut *streams.stdout),
            relay("stderr", child_err, &mut *streams.stderr),
        );
        let status = status.map_err(ExecError::Wait)?;
        debug!(?status, "child exited");
        Ok(exit_code(status))
    }
}

/// Check the `<namespace> <command> [args...]` shape before any other work.
pub fn check_usage(args: &[String], diag: &mut dyn Write) -> Result<(), ExecStatus> {
    if args.len() >= 2 {
        return Ok(());
    }
    report(diag, USAGE_MESSAGE);
    Err(ExecStatus::UsageError)
}

/// Write the single `vaultenv: <message>` diagnostic line.
pub fn report(diag: &mut dyn Write, message: &str) {
    // Nothing sensible is left to do if the diagnostic stream itself fails.
    let _ = writeln!(diag, "vaultenv: {message}");
}

/// Copy one child stream into its sink. A failing sink never ends the run:
/// the rest of the stream is drained so the child is not blocked on a full
/// pipe and its exit status still decides the outcome.
async fn relay<R: AsyncRead + Unpin>(
    stream: &'static str,
    source: Option<R>,
    sink: &mut (dyn AsyncWrite + Unpin + Send),
) {
    let Some(mut source) = source else {
        return;
    };
    let forwarded = match io::copy(&mut source, &mut *sink).await {
        Ok(_) => sink.flush().await,
        Err(err) => Err(err),
    };
    if let Err(err) = forwarded {
        warn!(stream, %err, "cannot forward child output, discarding the rest");
        if let Err(err) = io::copy(&mut source, &mut io::sink()).await {
            debug!(stream, %err, "draining child output failed");
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
