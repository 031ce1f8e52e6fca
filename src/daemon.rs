//! Daemon mode for flowrun
//!
//! This module provides the long-running service with:
//! - PID file management for single-instance enforcement
//! - Signal handling (SIGTERM/SIGINT for graceful shutdown)
//! - The minute scheduler and the HTTP trigger surface
//!
//! # Example
//!
//! ```no_run
//! use flowrun::daemon::Daemon;
//! use flowrun::executor::FlowExecutor;
//! use flowrun::toolbox::Toolbox;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example() -> flowrun::error::Result<()> {
//! let executor = Arc::new(FlowExecutor::new(Arc::new(Toolbox::new())));
//! let bind = "127.0.0.1:8116".parse().unwrap();
//!
//! let daemon = Daemon::new(executor, bind, PathBuf::from("/tmp/flowrun.pid"))?;
//!
//! // Blocks until SIGINT or SIGTERM
//! daemon.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{FlowrunError, Result};
use crate::executor::FlowExecutor;
use crate::metrics::FlowMetrics;
use crate::models::Flow;
use crate::observer::{ExecutionObserver, MetricsObserver, TracingObserver};
use crate::scheduler::{FlowScheduler, ObserverFactory};
use crate::server::{AppState, HttpServer};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Observer factory for daemon runs: structured logs plus metrics
pub fn daemon_observers(metrics: Arc<FlowMetrics>) -> ObserverFactory {
    Arc::new(move |project: &str, _flow: &Flow| {
        Box::new(MetricsObserver::new(
            Box::new(TracingObserver::new(project)),
            metrics.clone(),
        )) as Box<dyn ExecutionObserver>
    })
}

/// Requests a graceful stop of a running daemon
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

/// Daemon manager for the flowrun background service
pub struct Daemon {
    scheduler: Arc<FlowScheduler>,
    metrics: Arc<FlowMetrics>,
    bind: SocketAddr,
    pid_file: PathBuf,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// * `FlowrunError::Other` - If another daemon owns the PID file
    pub fn new(executor: Arc<FlowExecutor>, bind: SocketAddr, pid_file: PathBuf) -> Result<Self> {
        info!("Initializing flowrun daemon");

        if let Some(pid) = check_daemon_running(&pid_file)? {
            return Err(FlowrunError::Other(format!(
                "Daemon already running with PID {} (PID file {:?})",
                pid, pid_file
            )));
        }

        let metrics = Arc::new(FlowMetrics::new());
        let scheduler = Arc::new(FlowScheduler::new(
            executor,
            daemon_observers(metrics.clone()),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            scheduler,
            metrics,
            bind,
            pid_file,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn scheduler(&self) -> &Arc<FlowScheduler> {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<FlowMetrics> {
        &self.metrics
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Write PID file with current process ID
    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();
        info!("Writing PID file: {:?} (PID: {})", self.pid_file, pid);

        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.pid_file, pid.to_string()).map_err(|e| {
            FlowrunError::Io(std::io::Error::other(format!(
                "Failed to write PID file: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Remove PID file
    fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            info!("Removing PID file: {:?}", self.pid_file);
            fs::remove_file(&self.pid_file).map_err(|e| {
                FlowrunError::Io(std::io::Error::other(format!(
                    "Failed to remove PID file: {}",
                    e
                )))
            })?;
        }
        Ok(())
    }

    /// Run the daemon until SIGTERM, SIGINT or a [`ShutdownHandle`] request
    pub async fn run(mut self) -> Result<()> {
        info!("Starting flowrun daemon");

        self.write_pid_file()?;
        let _guard = PidFileGuard {
            pid_file: self.pid_file.clone(),
        };

        self.scheduler.start().await?;

        let server = HttpServer::new(
            self.bind,
            AppState {
                scheduler: self.scheduler.clone(),
                metrics: self.metrics.clone(),
            },
        )
        .start()
        .await;
        let server = match server {
            Ok(server) => server,
            Err(e) => {
                let _ = self.scheduler.shutdown().await;
                return Err(e);
            }
        };

        info!(
            "Daemon started on {}, waiting for signals...",
            server.bound_address()
        );

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| FlowrunError::Other(format!("Failed to setup SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| FlowrunError::Other(format!("Failed to setup SIGINT handler: {}", e)))?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = self.shutdown_rx.wait_for(|stop| *stop) => {
                info!("Shutdown requested");
            }
        }

        server.stop().await?;
        self.shutdown().await?;

        Ok(())
    }

    /// Stop the scheduler timer and remove the PID file.
    ///
    /// Runs already in flight are not waited for.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down daemon...");

        self.scheduler.shutdown().await?;
        self.remove_pid_file()?;

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// RAII guard for PID file cleanup
struct PidFileGuard {
    pid_file: PathBuf,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if self.pid_file.exists() {
            debug!("PidFileGuard: Cleaning up PID file: {:?}", self.pid_file);
            if let Err(e) = fs::remove_file(&self.pid_file) {
                error!("Failed to remove PID file in guard: {}", e);
            }
        }
    }
}

/// Check if a daemon is running by reading its PID file.
///
/// A PID file naming a process that no longer exists is removed.
///
/// # Returns
///
/// * `Result<Option<u32>>` - PID if running, None if not running
pub fn check_daemon_running(pid_file: &Path) -> Result<Option<u32>> {
    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(pid_file).map_err(|e| {
        FlowrunError::Io(std::io::Error::other(format!(
            "Failed to read PID file: {}",
            e
        )))
    })?;

    let pid: u32 = pid_str
        .trim()
        .parse()
        .map_err(|e| FlowrunError::Other(format!("Invalid PID in file: {}", e)))?;

    // kill(2) treats 0 and negative PIDs as process groups
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(FlowrunError::Other(format!(
            "Invalid PID in file {:?}: {}",
            pid_file, pid
        )));
    }

    #[cfg(unix)]
    {
        // SAFETY: signal 0 only checks that the process exists and can be
        // signalled; nothing is delivered.
        let result = unsafe { libc::kill(pid as i32, 0) };

        if result == 0 {
            return Ok(Some(pid));
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            // Exists but owned by someone else
            Some(libc::EPERM) => Ok(Some(pid)),
            Some(libc::ESRCH) => {
                warn!("Stale PID file found, removing");
                let _ = fs::remove_file(pid_file);
                Ok(None)
            }
            _ => Err(FlowrunError::Other(format!(
                "Error checking process: {}",
                err
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        Ok(Some(pid))
    }
}

/// Stop a running daemon by sending SIGTERM and waiting for its PID file to go
pub async fn stop_daemon(pid_file: &Path) -> Result<()> {
    let pid = check_daemon_running(pid_file)?
        .ok_or_else(|| FlowrunError::Other("Daemon is not running".to_string()))?;

    info!("Stopping daemon (PID: {})", pid);

    #[cfg(unix)]
    {
        // SAFETY: plain SIGTERM to a PID confirmed alive just above.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        return Err(FlowrunError::Other(
            "Stopping daemon not supported on this platform".to_string(),
        ));
    }

    let timeout = Duration::from_secs(30);
    let start = Instant::now();

    while pid_file.exists() && start.elapsed() < timeout {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if pid_file.exists() {
        warn!("PID file still exists after timeout, daemon may not have stopped cleanly");
    } else {
        info!("Daemon stopped successfully");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolbox::Toolbox;
    use tempfile::TempDir;

    fn executor() -> Arc<FlowExecutor> {
        Arc::new(FlowExecutor::new(Arc::new(Toolbox::new())))
    }

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_check_daemon_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");

        let result = check_daemon_running(&pid_file).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_check_daemon_running_self() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");
        fs::write(&pid_file, std::process::id().to_string()).unwrap();

        assert_eq!(
            check_daemon_running(&pid_file).unwrap(),
            Some(std::process::id())
        );
    }

    #[test]
    fn test_check_invalid_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");
        fs::write(&pid_file, "not a pid").unwrap();

        assert!(matches!(
            check_daemon_running(&pid_file),
            Err(FlowrunError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_check_out_of_range_pid() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");

        for contents in ["0", "4294967295", "2147483648"] {
            fs::write(&pid_file, contents).unwrap();
            assert!(
                matches!(check_daemon_running(&pid_file), Err(FlowrunError::Other(_))),
                "PID {} should be rejected",
                contents
            );
            assert!(matches!(
                stop_daemon(&pid_file).await,
                Err(FlowrunError::Other(_))
            ));
        }
    }

    #[test]
    fn test_write_and_remove_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("run").join("test.pid");

        let daemon = Daemon::new(executor(), any_port(), pid_file.clone()).unwrap();

        daemon.write_pid_file().unwrap();
        let pid: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());

        daemon.remove_pid_file().unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_daemon_already_running() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");
        fs::write(&pid_file, std::process::id().to_string()).unwrap();

        let result = Daemon::new(executor(), any_port(), pid_file);
        assert!(matches!(result, Err(FlowrunError::Other(_))));
    }

    #[tokio::test]
    async fn test_daemon_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");

        let daemon = Daemon::new(executor(), any_port(), pid_file.clone()).unwrap();
        let handle = daemon.shutdown_handle();
        let running = tokio::spawn(daemon.run());

        let mut waited = 0;
        while !pid_file.exists() && waited < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        assert!(pid_file.exists());

        handle.shutdown();
        running.await.unwrap().unwrap();
        assert!(!pid_file.exists());
    }
}
