//! External tool resolution and supervised execution.
//!
//! Every external process the crate spawns (ffmpeg, ffprobe, the WebP
//! suite, the APNG toolchain) goes through a [`ToolGateway`]. The gateway
//! resolves binaries through a fixed precedence — explicit override, then
//! bundled directory, then the system `PATH` — and supervises every child
//! so a batch-wide cancellation can terminate all in-flight processes.
//!
//! A run terminated by [`ToolGateway::cancel_all`] reports
//! [`AnimorphError::Cancelled`], never
//! [`AnimorphError::ToolFailure`] — cancellation is distinguished
//! structurally, not by inspecting exit codes.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), animorph::AnimorphError> {
//! use animorph::ToolGateway;
//!
//! let gateway = ToolGateway::new();
//! let output = gateway.run("ffmpeg", &["-version"], None).await?;
//! println!("{}", output.stdout.lines().next().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{io::AsyncReadExt, process::Command, sync::watch};

use crate::error::AnimorphError;

/// The external tools the pipeline can call.
pub const KNOWN_TOOLS: &[&str] = &[
    "ffmpeg", "ffprobe", "cwebp", "dwebp", "webpmux", "apngasm", "apng2gif", "apngquant",
    "apngopt",
];

/// Captured output of a completed tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Everything the tool wrote to stdout.
    pub stdout: String,
    /// Everything the tool wrote to stderr.
    ///
    /// Kept even on success; ffmpeg reports media info here.
    pub stderr: String,
}

#[derive(Debug)]
struct GatewayInner {
    overrides: HashMap<String, PathBuf>,
    bundled_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    cancel_tx: watch::Sender<bool>,
    live: Arc<AtomicUsize>,
}

/// Decrements the live-process counter when a supervised run ends, on
/// every exit path.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves and supervises external tool processes.
///
/// Cheap to clone; clones share the cancellation channel, so cancelling
/// through any clone terminates processes started through all of them.
#[derive(Debug, Clone)]
pub struct ToolGateway {
    inner: Arc<GatewayInner>,
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolGateway {
    /// Create a gateway resolving tools from the system `PATH` only.
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(GatewayInner {
                overrides: HashMap::new(),
                bundled_dir: None,
                timeout: None,
                cancel_tx,
                live: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Pin a tool to an explicit binary path, bypassing lookup.
    pub fn with_override(self, tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut overrides = self.inner.overrides.clone();
        overrides.insert(tool.into(), path.into());
        Self {
            inner: Arc::new(GatewayInner {
                overrides,
                bundled_dir: self.inner.bundled_dir.clone(),
                timeout: self.inner.timeout,
                cancel_tx: self.inner.cancel_tx.clone(),
                live: self.inner.live.clone(),
            }),
        }
    }

    /// Set a directory of bundled binaries, consulted before `PATH`.
    pub fn with_bundled_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                overrides: self.inner.overrides.clone(),
                bundled_dir: Some(dir.into()),
                timeout: self.inner.timeout,
                cancel_tx: self.inner.cancel_tx.clone(),
                live: self.inner.live.clone(),
            }),
        }
    }

    /// Cap every tool run at `timeout`; a run exceeding it is killed and
    /// reported as a [`AnimorphError::ToolFailure`]. No cap by default.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                overrides: self.inner.overrides.clone(),
                bundled_dir: self.inner.bundled_dir.clone(),
                timeout: Some(timeout),
                cancel_tx: self.inner.cancel_tx.clone(),
                live: self.inner.live.clone(),
            }),
        }
    }

    /// Resolve a tool to a binary path.
    ///
    /// Precedence: explicit override, bundled directory, system `PATH`.
    pub fn resolve(&self, tool: &str) -> Result<PathBuf, AnimorphError> {
        if let Some(path) = self.inner.overrides.get(tool) {
            return Ok(path.clone());
        }
        if let Some(dir) = &self.inner.bundled_dir {
            let candidate = dir.join(exe_name(tool));
            if candidate.is_file() {
                // Bundled binaries shipped inside an archive can lose their
                // execute bit.
                #[cfg(unix)]
                if let Err(err) = ensure_executable(&candidate) {
                    log::warn!("could not mark {} executable: {err}", candidate.display());
                }
                return Ok(candidate);
            }
        }
        which::which(tool).map_err(|_| AnimorphError::ToolNotFound {
            tool: tool.to_string(),
        })
    }

    /// Whether a tool is available without running it.
    pub fn is_available(&self, tool: &str) -> bool {
        self.resolve(tool).is_ok()
    }

    /// Report resolution status for every known tool.
    ///
    /// Powers the CLI's `doctor` output.
    pub fn capabilities(&self) -> Vec<(&'static str, Option<PathBuf>)> {
        KNOWN_TOOLS
            .iter()
            .map(|tool| (*tool, self.resolve(tool).ok()))
            .collect()
    }

    /// Terminate every in-flight process started through this gateway (or
    /// any clone of it), returning how many were signaled.
    ///
    /// Each affected [`run`](Self::run) call returns
    /// [`AnimorphError::Cancelled`]. Idempotent; with nothing in flight it
    /// returns `0`.
    pub fn cancel_all(&self) -> usize {
        let live = self.inner.live.load(Ordering::SeqCst);
        self.inner.cancel_tx.send_replace(true);
        live
    }

    /// Clear a previous cancellation so the gateway can serve a new batch.
    pub(crate) fn reset_cancel(&self) {
        self.inner.cancel_tx.send_replace(false);
    }

    /// Run a tool to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit becomes [`AnimorphError::ToolFailure`] carrying the
    /// captured stderr; termination via [`cancel_all`](Self::cancel_all)
    /// becomes [`AnimorphError::Cancelled`].
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        tool: &str,
        args: &[S],
        cwd: Option<&Path>,
    ) -> Result<ToolOutput, AnimorphError> {
        let binary = self.resolve(tool)?;

        let mut cancel_rx = self.inner.cancel_tx.subscribe();
        if *cancel_rx.borrow() {
            return Err(AnimorphError::Cancelled);
        }

        let mut command = Command::new(&binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        log::debug!("spawning {}: {:?}", tool, command.as_std());

        let mut child = command.spawn()?;
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let _live = LiveGuard(self.inner.live.clone());
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let drain = tokio::spawn(async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            (stdout, stderr)
        });

        let timeout = self.inner.timeout;
        let status = tokio::select! {
            status = child.wait() => status?,
            // The watch borrow guard is dropped before every await; holding
            // it across one would pin a lock guard inside the future.
            _ = async {
                while !*cancel_rx.borrow_and_update() {
                    if cancel_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            } => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                drain.abort();
                log::info!("{tool} terminated by cancellation");
                return Err(AnimorphError::Cancelled);
            }
            _ = tokio::time::sleep(timeout.unwrap_or(Duration::from_secs(86_400))),
                    if timeout.is_some() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                drain.abort();
                return Err(AnimorphError::ToolFailure {
                    tool: tool.to_string(),
                    status: None,
                    stderr: format!(
                        "timed out after {}s",
                        timeout.unwrap_or_default().as_secs()
                    ),
                });
            }
        };

        let (stdout, stderr) = drain.await.unwrap_or_default();

        if status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            Err(AnimorphError::ToolFailure {
                tool: tool.to_string(),
                status: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.mode() & 0o111 == 0 {
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn exe_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_beats_lookup() {
        let gateway = ToolGateway::new().with_override("ffmpeg", "/opt/media/bin/ffmpeg");
        assert_eq!(
            gateway.resolve("ffmpeg").unwrap(),
            PathBuf::from("/opt/media/bin/ffmpeg")
        );
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let gateway = ToolGateway::new();
        let err = gateway.resolve("definitely-not-a-real-tool-9000").unwrap_err();
        assert!(matches!(err, AnimorphError::ToolNotFound { .. }));
    }
}
