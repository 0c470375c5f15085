//! Plugin server process lifecycle.
//!
//! The spawner sets the launch cookie in the child's environment, captures
//! stdout and stderr, and turns the child's life into a typed event stream:
//! `Started`, `HandshakeRead`, `Ready`, `Exited`. The handshake scanner
//! consumes that stream instead of interleaving blocking reads with
//! business logic.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crosswire_wire_protocol::{HandshakeConfig, HandshakeLine};

use crate::error::{ClientError, Result};

/// Maximum captured output lines kept for diagnostics.
const OUTPUT_TAIL_LINES: usize = 200;

/// Lifecycle events of a spawned server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Started,
    HandshakeRead(HandshakeLine),
    Ready,
    Exited(Option<i32>),
}

/// How to launch a server process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Extra environment variables beyond the cookie.
    pub envs: Vec<(String, String)>,
    pub handshake: HandshakeConfig,
    /// How long to wait for the handshake line.
    pub startup_timeout: Duration,
}

impl SpawnOptions {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            envs: Vec::new(),
            handshake: HandshakeConfig::default(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

/// A running (or exited) server process with captured output.
pub struct PluginProcess {
    child: Child,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    output: Arc<Mutex<VecDeque<String>>>,
    startup_timeout: Duration,
    handshake: Option<HandshakeLine>,
}

impl PluginProcess {
    /// Spawn the server with the cookie in its environment.
    pub fn spawn(options: SpawnOptions) -> Result<Self> {
        let (program, args) = options
            .command
            .split_first()
            .ok_or_else(|| ClientError::Configuration("empty server command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env(&options.handshake.cookie_key, &options.handshake.cookie_value)
            .envs(options.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ClientError::Configuration(format!("spawning {program}: {e}"))
        })?;

        let (tx, events) = mpsc::unbounded_channel();
        let output = Arc::new(Mutex::new(VecDeque::new()));

        let _ = tx.send(ServerEvent::Started);

        // Child guaranteed piped handles; missing ones mean spawn raced exit.
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            let output = Arc::clone(&output);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut handshake_seen = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    if !handshake_seen {
                        if let Some(handshake) = HandshakeLine::parse(&line) {
                            handshake_seen = true;
                            debug!(%handshake, "handshake line read");
                            let _ = tx.send(ServerEvent::HandshakeRead(handshake));
                            let _ = tx.send(ServerEvent::Ready);
                            continue;
                        }
                    }
                    push_line(&output, format!("stdout: {line}"));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let output = Arc::clone(&output);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    push_line(&output, format!("stderr: {line}"));
                }
            });
        }

        Ok(Self {
            child,
            events,
            output,
            startup_timeout: options.startup_timeout,
            handshake: None,
        })
    }

    /// Scan events until a valid handshake line appears.
    ///
    /// Lines that do not match the six-field pattern are treated as log
    /// output and skipped. On timeout or early exit the error carries the
    /// captured output tail, never a bare timeout.
    pub async fn await_handshake(&mut self) -> Result<HandshakeLine> {
        if let Some(handshake) = &self.handshake {
            return Ok(handshake.clone());
        }

        let deadline = tokio::time::sleep(self.startup_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(ServerEvent::HandshakeRead(handshake)) => {
                        self.handshake = Some(handshake.clone());
                        return Ok(handshake);
                    }
                    Some(ServerEvent::Started) | Some(ServerEvent::Ready) => continue,
                    Some(ServerEvent::Exited(code)) => {
                        return Err(ClientError::ProcessExited {
                            code,
                            output: self.output_tail(),
                        });
                    }
                    None => {
                        // Reader tasks are gone; fall through to the exit path.
                        let code = self.child.try_wait().ok().flatten().and_then(|s| s.code());
                        return Err(ClientError::ProcessExited {
                            code,
                            output: self.output_tail(),
                        });
                    }
                },
                status = self.child.wait() => {
                    // Give the stdout reader a moment to deliver a handshake
                    // that raced the exit.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    while let Ok(event) = self.events.try_recv() {
                        if let ServerEvent::HandshakeRead(handshake) = event {
                            self.handshake = Some(handshake.clone());
                            return Ok(handshake);
                        }
                    }
                    let code = status.ok().and_then(|s| s.code());
                    return Err(ClientError::ProcessExited {
                        code,
                        output: self.output_tail(),
                    });
                }
                _ = &mut deadline => {
                    return Err(ClientError::HandshakeTimeout {
                        timeout_secs: self.startup_timeout.as_secs(),
                        output: self.output_tail(),
                    });
                }
            }
        }
    }

    /// The captured stdout/stderr tail, newest last.
    pub fn output_tail(&self) -> String {
        let output = self.output.lock().expect("output buffer poisoned");
        output.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Whether the process has already exited, and with which code.
    pub fn exit_code(&mut self) -> Option<Option<i32>> {
        self.child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.code())
    }

    /// Terminate the server: SIGTERM, a grace period, then SIGKILL.
    pub async fn shutdown(mut self, grace: Duration) -> Option<i32> {
        if let Some(pid) = self.child.id() {
            // Politely first.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => return status.code(),
                Ok(Err(e)) => {
                    warn!("waiting for server exit: {e}");
                    return None;
                }
                Err(_) => {
                    debug!("grace period elapsed, killing server");
                }
            }
        }
        if let Err(e) = self.child.kill().await {
            warn!("killing server process: {e}");
        }
        self.child.wait().await.ok().and_then(|s| s.code())
    }
}

fn push_line(output: &Arc<Mutex<VecDeque<String>>>, line: String) {
    let mut output = output.lock().expect("output buffer poisoned");
    if output.len() == OUTPUT_TAIL_LINES {
        output.pop_front();
    }
    output.push_back(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> SpawnOptions {
        SpawnOptions::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
    }

    #[tokio::test]
    async fn reads_handshake_after_log_noise() {
        let mut options = sh(
            "echo 'starting up'; echo 'still warming caches'; \
             echo '1|1|tcp|127.0.0.1:4433|tarpc-postcard|'; sleep 5",
        );
        options.startup_timeout = Duration::from_secs(5);
        let mut process = PluginProcess::spawn(options).unwrap();
        let handshake = process.await_handshake().await.unwrap();
        assert_eq!(handshake.address, "127.0.0.1:4433");
        // The noise lines were captured as output, not mistaken for handshakes.
        let tail = process.output_tail();
        assert!(tail.contains("starting up"));
        process.shutdown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn early_exit_carries_captured_output() {
        let mut options = sh("echo 'cookie rejected' >&2; exit 3");
        options.startup_timeout = Duration::from_secs(5);
        let mut process = PluginProcess::spawn(options).unwrap();
        let err = process.await_handshake().await.unwrap_err();
        match err {
            ClientError::ProcessExited { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("cookie rejected"), "output: {output}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out_with_diagnostics() {
        let mut options = sh("echo 'listening soon, promise'; sleep 30");
        options.startup_timeout = Duration::from_millis(300);
        let mut process = PluginProcess::spawn(options).unwrap();
        let err = process.await_handshake().await.unwrap_err();
        match err {
            ClientError::HandshakeTimeout { output, .. } => {
                assert!(output.contains("listening soon"), "output: {output}");
            }
            other => panic!("unexpected error: {other}"),
        }
        process.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn shutdown_reaps_the_child() {
        let options = sh("sleep 30");
        let process = PluginProcess::spawn(options).unwrap();
        // sh does not trap TERM, so the grace path suffices.
        let code = process.shutdown(Duration::from_secs(1)).await;
        assert_eq!(code, None); // killed by signal, no exit code
    }
}
