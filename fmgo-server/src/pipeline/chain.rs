//! The three-stage process chain and its teardown.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

use crate::pipeline::command::{build_stages, StageCommand};
use crate::pipeline::config::PipelineConfig;
use crate::settings::PipelineSettings;

/// How long a stderr drain may keep running after its process was reaped.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Creates process chains; the seam the controller launches through.
pub trait ChainSpawner: Send + Sync {
    fn spawn(&self, config: &PipelineConfig) -> io::Result<ProcessChain>;
}

/// Spawns the real `rtl_fm | sox | ffmpeg` chain.
#[derive(Debug, Clone)]
pub struct SubprocessSpawner {
    settings: PipelineSettings,
}

impl SubprocessSpawner {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }
}

impl ChainSpawner for SubprocessSpawner {
    fn spawn(&self, config: &PipelineConfig) -> io::Result<ProcessChain> {
        let stages = build_stages(config, &self.settings);
        for stage in &stages {
            debug!("[{}] {}", stage.name, stage);
        }
        ProcessChain::spawn(stages)
    }
}

/// A running subprocess with its stderr drain.
struct Stage {
    name: &'static str,
    child: Child,
    /// Yields the last diagnostic line the process printed.
    drain: Option<JoinHandle<Option<String>>>,
}

impl Stage {
    fn spawn(command: &StageCommand, stdin: Stdio) -> io::Result<Self> {
        let mut child = command.to_command(stdin).spawn().map_err(|e| {
            io::Error::new(e.kind(), format!("failed to start {}: {}", command.program, e))
        })?;
        let drain = child.stderr.take().map(|stderr| drain_stderr(command.name, stderr));
        Ok(Self {
            name: command.name,
            child,
            drain,
        })
    }

    fn take_stdout(&mut self) -> io::Result<ChildStdout> {
        self.child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, format!("{} has no stdout", self.name))
        })
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL. Failures are swallowed.
    async fn terminate(&mut self, timeout: Duration) -> Option<String> {
        if !self.has_exited() {
            send_terminate(&mut self.child);
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(status)) => debug!("[{}] exited: {}", self.name, status),
                Ok(Err(e)) => debug!("[{}] wait failed: {}", self.name, e),
                Err(_) => {
                    warn!("[{}] did not exit within {:?}, killing", self.name, timeout);
                    if let Err(e) = self.child.kill().await {
                        debug!("[{}] kill failed: {}", self.name, e);
                    }
                }
            }
        }
        self.join_drain().await
    }

    async fn join_drain(&mut self) -> Option<String> {
        let mut drain = self.drain.take()?;
        match tokio::time::timeout(DRAIN_GRACE, &mut drain).await {
            Ok(Ok(last_line)) => last_line,
            Ok(Err(_)) => None,
            Err(_) => {
                // A grandchild may still hold the pipe open.
                drain.abort();
                None
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid once the child has been reaped.
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Forward a stage's stderr to the log until the process closes it.
fn drain_stderr(name: &'static str, stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::with_capacity(256);
        let mut last_line = None;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!("[{}] {}", name, line);
                        last_line = Some(line.to_string());
                    }
                }
                Err(e) => {
                    debug!("[{}] stderr read failed: {}", name, e);
                    break;
                }
            }
        }
        last_line
    })
}

/// Demodulator -> resampler -> encoder, each stdout feeding the next stdin.
///
/// Intermediate pipe ends are handed to the next process and never kept
/// here, so an exiting stage propagates EOF/broken pipe down the chain.
pub struct ProcessChain {
    demod: Stage,
    resampler: Stage,
    encoder: Stage,
    output: Option<ChildStdout>,
}

impl ProcessChain {
    /// Start the stages in order and wire them together.
    ///
    /// On error the already started stages are dropped, which kills them.
    pub fn spawn(stages: [StageCommand; 3]) -> io::Result<Self> {
        let [demod_cmd, resampler_cmd, encoder_cmd] = stages;

        let mut demod = Stage::spawn(&demod_cmd, Stdio::null())?;
        let demod_out: Stdio = demod.take_stdout()?.try_into()?;

        let mut resampler = Stage::spawn(&resampler_cmd, demod_out)?;
        let resampler_out: Stdio = resampler.take_stdout()?.try_into()?;

        let mut encoder = Stage::spawn(&encoder_cmd, resampler_out)?;
        let output = encoder.take_stdout()?;

        Ok(Self {
            demod,
            resampler,
            encoder,
            output: Some(output),
        })
    }

    /// Whether the device-claiming first stage is still running.
    pub fn demod_alive(&mut self) -> bool {
        !self.demod.has_exited()
    }

    pub fn encoder_exited(&mut self) -> bool {
        self.encoder.has_exited()
    }

    /// Take the encoder's stdout. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    /// Terminate the encoder, then the demodulator, then reap the resampler.
    ///
    /// Returns the demodulator's last diagnostic line.
    pub async fn shutdown(mut self, timeout: Duration) -> Option<String> {
        drop(self.output.take());
        self.encoder.terminate(timeout).await;
        let demod_last = self.demod.terminate(timeout).await;
        // Normally gone already: its input hit EOF and its output broke.
        self.resampler.terminate(timeout).await;
        demod_last
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn sh(name: &'static str, script: &str) -> StageCommand {
        StageCommand::new(name, "sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_chain_pipes_data_through() {
        let mut chain = ProcessChain::spawn([
            sh("demod", "printf 'abc'"),
            sh("resampler", "tr a-z A-Z"),
            sh("encoder", "cat"),
        ])
        .unwrap();

        let mut output = chain.take_output().unwrap();
        assert!(chain.take_output().is_none());

        let mut data = Vec::new();
        output.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"ABC");

        chain.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_long_running_stages() {
        let mut chain = ProcessChain::spawn([
            sh("demod", "while :; do echo tick; sleep 0.05; done"),
            sh("resampler", "cat"),
            sh("encoder", "cat"),
        ])
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(chain.demod_alive());
        assert!(!chain.encoder_exited());

        let started = std::time::Instant::now();
        chain.shutdown(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_early_exit_is_detected_with_diagnostics() {
        let mut chain = ProcessChain::spawn([
            sh("demod", "echo 'usb_claim_interface error -6' >&2; exit 1"),
            sh("resampler", "cat"),
            sh("encoder", "cat"),
        ])
        .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!chain.demod_alive());

        let last = chain.shutdown(Duration::from_millis(500)).await;
        assert_eq!(last.as_deref(), Some("usb_claim_interface error -6"));
    }

    #[tokio::test]
    async fn test_missing_program_fails_spawn() {
        let result = ProcessChain::spawn([
            sh("demod", "sleep 5"),
            StageCommand::new("resampler", "/nonexistent/sox"),
            sh("encoder", "cat"),
        ]);
        let err = result.err().expect("spawn should fail");
        assert!(err.to_string().contains("/nonexistent/sox"));
    }
}
