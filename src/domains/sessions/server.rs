use crate::config::AgentSettings;
use crate::errors::HostError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to one running agent backend. `close` is idempotent, callable from
/// any task, and guaranteed on drop; the child is additionally spawned with
/// kill-on-drop so a panicking owner cannot leak the process.
#[derive(Debug)]
pub struct AgentServer {
    server_id: Uuid,
    port: u16,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl AgentServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let child = {
            let mut guard = self
                .child
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        if let Some(mut child) = child {
            if let Err(err) = child.start_kill() {
                log::warn!("[server {}] kill failed: {err}", self.server_id);
            }
        }
        log::info!(
            "[server {}] closed agent server on port {}",
            self.server_id,
            self.port
        );
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve the configured agent command to a concrete binary: explicit paths
/// win, then the usual user bin directories, then PATH via `which`.
pub fn resolve_agent_binary(command: &str) -> String {
    let trimmed = command.trim();
    if trimmed.contains('/') {
        return trimmed.to_string();
    }

    if let Ok(home) = std::env::var("HOME") {
        for dir in [
            format!("{home}/.local/bin"),
            format!("{home}/.cargo/bin"),
            format!("{home}/bin"),
        ] {
            let candidate = PathBuf::from(&dir).join(trimmed);
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }
    }

    if let Ok(path) = which::which(trimmed) {
        return path.to_string_lossy().to_string();
    }

    log::warn!("Could not resolve path for '{trimmed}', using as-is");
    trimmed.to_string()
}

enum BootAttempt {
    Ready(AgentServer),
    PortBusy(String),
}

/// Start the agent backend against `workspace_dir`, probing the configured
/// port window. A boot failure whose output mentions `port` advances the
/// window; any other failure is fatal for the whole start.
pub async fn spawn_agent_server(
    workspace_dir: &Path,
    settings: &AgentSettings,
) -> Result<AgentServer, HostError> {
    let binary = resolve_agent_binary(&settings.command);
    let probe = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .map_err(|e| HostError::SessionStartFailed {
            message: format!("failed to build probe client: {e}"),
        })?;

    for offset in 0..settings.port_attempts {
        let port = settings.base_port.saturating_add(offset);
        match try_boot(&binary, settings, workspace_dir, port, &probe).await? {
            BootAttempt::Ready(server) => {
                log::info!(
                    "[server {}] agent server ready on port {port}",
                    server.server_id
                );
                return Ok(server);
            }
            BootAttempt::PortBusy(message) => {
                log::debug!("Port {port} busy ({message}); trying next");
            }
        }
    }

    Err(HostError::PortsExhausted {
        base_port: settings.base_port,
        attempts: settings.port_attempts,
    })
}

async fn try_boot(
    binary: &str,
    settings: &AgentSettings,
    workspace_dir: &Path,
    port: u16,
    probe: &reqwest::Client,
) -> Result<BootAttempt, HostError> {
    let server_id = Uuid::new_v4();
    let port_arg = port.to_string();

    let mut command = Command::new(binary);
    command.arg("serve");
    command.args(["--hostname", "127.0.0.1", "--port", &port_arg]);
    command.args(&settings.args);
    command.current_dir(workspace_dir);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| HostError::SessionStartFailed {
        message: format!("failed to spawn '{binary}': {e}"),
    })?;

    // The backend's boot output is both the busy-port signal and the only
    // diagnostic on a fatal boot, so keep draining it for the server's whole
    // life (a full pipe would eventually stall the child). Only the last few
    // lines are ever read, so the capture is bounded to a tail.
    let output = Arc::new(Mutex::new(Vec::new()));
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain_output(server_id, stdout, output.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_output(server_id, stderr, output.clone()));
    }

    let url = format!("http://127.0.0.1:{port}/");
    let deadline = Instant::now() + Duration::from_secs(settings.ready_timeout_secs);

    loop {
        if let Some(status) = child.try_wait().map_err(|e| HostError::SessionStartFailed {
            message: format!("failed to poll agent process: {e}"),
        })? {
            // Give the drain tasks a beat to flush the final lines.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let captured = output
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .join("\n");
            if captured.to_lowercase().contains("port") {
                return Ok(BootAttempt::PortBusy(first_line(&captured)));
            }
            return Err(HostError::SessionStartFailed {
                message: format!("agent exited during boot ({status}): {}", first_line(&captured)),
            });
        }

        if probe.get(&url).send().await.is_ok() {
            return Ok(BootAttempt::Ready(AgentServer {
                server_id,
                port,
                child: Mutex::new(Some(child)),
                closed: AtomicBool::new(false),
            }));
        }

        if Instant::now() >= deadline {
            let _ = child.start_kill();
            return Err(HostError::SessionStartFailed {
                message: format!(
                    "agent did not become ready on port {port} within {}s",
                    settings.ready_timeout_secs
                ),
            });
        }

        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

const OUTPUT_TAIL_LINES: usize = 8;

async fn drain_output(
    server_id: Uuid,
    stream: impl tokio::io::AsyncRead + Unpin,
    buffer: Arc<Mutex<Vec<String>>>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("[server {server_id}] {line}");
        let mut guard = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.len() >= OUTPUT_TAIL_LINES {
            guard.remove(0);
        }
        guard.push(line);
    }
}

fn first_line(output: &str) -> String {
    output
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path.to_string_lossy().to_string()
    }

    fn settings_with(command: String, base_port: u16, attempts: u16) -> AgentSettings {
        AgentSettings {
            command,
            base_port,
            port_attempts: attempts,
            ready_timeout_secs: 2,
            ..Default::default()
        }
    }

    async fn hold_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A port nothing is listening on right now.
    async fn free_port() -> u16 {
        let (listener, port) = hold_port().await;
        drop(listener);
        port
    }

    /// Minimal HTTP responder standing in for a booted backend.
    fn serve_ok(listener: TcpListener) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        })
    }

    #[tokio::test]
    async fn all_ports_busy_raises_ports_exhausted() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(
            tmp.path(),
            "busy-agent",
            "echo 'Error: port already in use' >&2; exit 1",
        );
        let base_port = free_port().await;
        let err = spawn_agent_server(tmp.path(), &settings_with(script, base_port, 3))
            .await
            .unwrap_err();
        match err {
            HostError::PortsExhausted {
                base_port: reported,
                attempts,
            } => {
                assert_eq!(reported, base_port);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected PortsExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_port_boot_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(
            tmp.path(),
            "broken-agent",
            "echo 'missing credentials' >&2; exit 2",
        );
        let base_port = free_port().await;
        let err = spawn_agent_server(tmp.path(), &settings_with(script, base_port, 5))
            .await
            .unwrap_err();
        match err {
            HostError::SessionStartFailed { message } => {
                assert!(message.contains("missing credentials"), "got: {message}");
            }
            other => panic!("expected SessionStartFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn readiness_timeout_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let script = write_script(tmp.path(), "silent-agent", "sleep 60");
        let base_port = free_port().await;
        let err = spawn_agent_server(tmp.path(), &settings_with(script, base_port, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::SessionStartFailed { .. }));
    }

    #[tokio::test]
    async fn probes_past_busy_ports_to_the_first_free_one() {
        let tmp = TempDir::new().unwrap();

        // An anchored listener provides the "ready" port; the script reports
        // busy for every other port in the window, mirroring a backend that
        // failed to bind.
        let (listener, ok_port) = hold_port().await;
        let base_port = ok_port - 2;
        let server_task = serve_ok(listener);

        let script = write_script(
            tmp.path(),
            "picky-agent",
            &format!(
                "case \"$*\" in *\"--port {ok_port}\"*) exec sleep 60;; *) echo 'port in use' >&2; exit 1;; esac"
            ),
        );

        // The free port sits in the last slot of the window.
        let server = spawn_agent_server(tmp.path(), &settings_with(script, base_port, 3))
            .await
            .unwrap();
        assert_eq!(server.port(), ok_port);
        assert!(!server.is_closed());

        server.close();
        assert!(server.is_closed());
        server.close(); // idempotent
        server_task.abort();
    }

    #[tokio::test]
    async fn close_releases_the_child_process() {
        let tmp = TempDir::new().unwrap();
        let (listener, ok_port) = hold_port().await;
        let server_task = serve_ok(listener);

        let marker = tmp.path().join("alive");
        let script = write_script(
            tmp.path(),
            "agent",
            &format!("touch {} ; exec sleep 60", marker.display()),
        );

        let server = spawn_agent_server(tmp.path(), &settings_with(script, ok_port, 1))
            .await
            .unwrap();
        // The probe can win the race against the script's first line.
        for _ in 0..20 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
        server.close();

        // After the kill the child may take a moment to reap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        server_task.abort();
    }

    #[test]
    fn resolve_agent_binary_keeps_explicit_paths() {
        assert_eq!(
            resolve_agent_binary("/usr/local/bin/opencode"),
            "/usr/local/bin/opencode"
        );
    }

    #[test]
    fn resolve_agent_binary_finds_sh_on_path() {
        let resolved = resolve_agent_binary("sh");
        assert!(resolved.ends_with("sh"));
        assert!(resolved.contains('/'));
    }
}
