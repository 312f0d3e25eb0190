//! Sidecar process supervision.
//!
//! The supervisor owns the child's whole lifecycle: idempotent start
//! with health polling, graceful stop, diff-gated reload, and a crash
//! watcher that restarts once with jitter and locks out after a second
//! crash inside a short window. All transitions are serialized by one
//! internal mutex, so concurrent provider edits produce one reload per
//! resulting state.

use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use tollgate_db::TollgateDb;

use super::{SidecarError, SidecarManagement, config_gen};

/// Grace period between SIGTERM and a forced kill.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Total budget for the post-spawn health poll.
const HEALTH_BUDGET_SECS: u64 = 30;
/// Two crashes within this window disable automatic restart.
const CRASH_WINDOW_SECS: i64 = 10;

/// Manages the sidecar child process itself.
#[async_trait]
pub trait SidecarProcessManager: Send + Sync {
    /// Spawn the sidecar with the given config and management URL.
    async fn spawn(&self, config_path: &Path, management_url: &str) -> Result<u32, SidecarError>;

    /// Terminate gracefully, then forcefully after `grace`.
    async fn terminate(&self, grace: Duration) -> Result<(), SidecarError>;

    /// Observe a child exit, clearing the handle if it has exited.
    fn try_reap(&self) -> Option<i32>;

    fn is_running(&self) -> bool;
    fn pid(&self) -> Option<u32>;
    fn uptime(&self) -> Option<Duration>;

    /// For downcasting in tests
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Spawns the real sidecar binary as a tokio child process.
pub struct LocalSidecarProcess {
    binary_path: String,
    child: StdMutex<Option<Child>>,
    started_at: StdMutex<Option<Instant>>,
}

impl LocalSidecarProcess {
    pub fn new(binary_path: String) -> Self {
        Self {
            binary_path,
            child: StdMutex::new(None),
            started_at: StdMutex::new(None),
        }
    }
}

#[async_trait]
impl SidecarProcessManager for LocalSidecarProcess {
    async fn spawn(&self, config_path: &Path, management_url: &str) -> Result<u32, SidecarError> {
        if self.is_running() {
            return Err(SidecarError::Spawn("sidecar already running".to_string()));
        }

        let child = Command::new(&self.binary_path)
            .arg("--config")
            .arg(config_path)
            .arg("--management-url")
            .arg(management_url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SidecarError::Spawn(format!("{}: {}", self.binary_path, e)))?;

        let pid = child.id().unwrap_or(0);
        *self.child.lock().unwrap() = Some(child);
        *self.started_at.lock().unwrap() = Some(Instant::now());

        Ok(pid)
    }

    async fn terminate(&self, grace: Duration) -> Result<(), SidecarError> {
        let child = self.child.lock().unwrap().take();
        *self.started_at.lock().unwrap() = None;

        let Some(mut child) = child else {
            return Ok(());
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if child.try_wait()?.is_some() {
                    return Ok(());
                }
                sleep(Duration::from_millis(100)).await;
            }
        }

        #[cfg(not(unix))]
        let _ = grace;

        child.kill().await?;
        Ok(())
    }

    fn try_reap(&self) -> Option<i32> {
        let mut guard = self.child.lock().unwrap();
        let status = guard.as_mut()?.try_wait().ok()??;
        *guard = None;
        drop(guard);
        *self.started_at.lock().unwrap() = None;
        Some(status.code().unwrap_or(-1))
    }

    fn is_running(&self) -> bool {
        self.child.lock().unwrap().is_some()
    }

    fn pid(&self) -> Option<u32> {
        self.child.lock().unwrap().as_ref().and_then(|c| c.id())
    }

    fn uptime(&self) -> Option<Duration> {
        self.started_at.lock().unwrap().map(|t| t.elapsed())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// In-memory mock used by tests
#[derive(Default)]
pub struct MockSidecarProcess {
    pub running: StdMutex<bool>,
    pub mock_pid: StdMutex<Option<u32>>,
    pub spawn_error: StdMutex<Option<String>>,
    pub pending_exit: StdMutex<Option<i32>>,
    pub call_log: StdMutex<Vec<String>>,
}

impl MockSidecarProcess {
    pub fn set_running(&self, running: bool, pid: u32) {
        *self.running.lock().unwrap() = running;
        *self.mock_pid.lock().unwrap() = if running { Some(pid) } else { None };
    }

    /// Simulate the child exiting with `code` on the next reap.
    pub fn simulate_exit(&self, code: i32) {
        *self.pending_exit.lock().unwrap() = Some(code);
    }
}

#[async_trait]
impl SidecarProcessManager for MockSidecarProcess {
    async fn spawn(&self, config_path: &Path, management_url: &str) -> Result<u32, SidecarError> {
        self.call_log
            .lock()
            .unwrap()
            .push(format!("spawn:{}:{}", config_path.display(), management_url));

        if let Some(message) = self.spawn_error.lock().unwrap().clone() {
            return Err(SidecarError::Spawn(message));
        }

        self.set_running(true, 12345);
        Ok(12345)
    }

    async fn terminate(&self, _grace: Duration) -> Result<(), SidecarError> {
        self.call_log.lock().unwrap().push("terminate".to_string());
        self.set_running(false, 0);
        Ok(())
    }

    fn try_reap(&self) -> Option<i32> {
        let code = self.pending_exit.lock().unwrap().take()?;
        self.set_running(false, 0);
        Some(code)
    }

    fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    fn pid(&self) -> Option<u32> {
        *self.mock_pid.lock().unwrap()
    }

    fn uptime(&self) -> Option<Duration> {
        if self.is_running() {
            Some(Duration::from_secs(120))
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// What the crash watcher should do after an unexpected exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// First crash outside the window: restart once with jitter
    Restart,
    /// Second crash inside the window: disable automatic restart
    Lockout,
    /// Automatic restart already disabled; wait for an admin
    Disabled,
}

/// Crash bookkeeping for the watcher
#[derive(Debug, Clone, Default)]
pub struct CrashState {
    pub last_crash_at: Option<DateTime<Utc>>,
    pub auto_restart_disabled: bool,
}

impl CrashState {
    /// Record a crash at `now` and decide what to do about it.
    pub fn register(&mut self, now: DateTime<Utc>) -> RestartDecision {
        if self.auto_restart_disabled {
            self.last_crash_at = Some(now);
            return RestartDecision::Disabled;
        }

        let within_window = self
            .last_crash_at
            .map(|prev| now - prev < TimeDelta::seconds(CRASH_WINDOW_SECS))
            .unwrap_or(false);
        self.last_crash_at = Some(now);

        if within_window {
            self.auto_restart_disabled = true;
            RestartDecision::Lockout
        } else {
            RestartDecision::Restart
        }
    }
}

/// Status snapshot served to the admin API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorStatus {
    pub running: bool,
    pub port: u16,
    pub pid: Option<u32>,
    pub endpoint: String,
    pub uptime_seconds: Option<u64>,
    pub last_crash_at: Option<DateTime<Utc>>,
    pub auto_restart_disabled: bool,
}

/// Owner of the sidecar child's lifecycle.
pub struct Supervisor {
    db: TollgateDb,
    process: Arc<dyn SidecarProcessManager>,
    management: Arc<dyn SidecarManagement>,
    config_path: PathBuf,
    state_dir: PathBuf,
    management_url: String,
    lifecycle: Mutex<()>,
    stopping: AtomicBool,
    crash: StdMutex<CrashState>,
}

impl Supervisor {
    pub fn new(
        db: TollgateDb,
        process: Arc<dyn SidecarProcessManager>,
        management: Arc<dyn SidecarManagement>,
        config_path: PathBuf,
        state_dir: PathBuf,
        management_url: String,
    ) -> Self {
        Self {
            db,
            process,
            management,
            config_path,
            state_dir,
            management_url,
            lifecycle: Mutex::new(()),
            stopping: AtomicBool::new(false),
            crash: StdMutex::new(CrashState::default()),
        }
    }

    /// Base URL data-plane requests are forwarded to.
    pub fn endpoint(&self) -> &str {
        &self.management_url
    }

    pub fn management(&self) -> &Arc<dyn SidecarManagement> {
        &self.management
    }

    /// Start the sidecar. A no-op when a live child already answers
    /// health.
    pub async fn start(&self) -> Result<(), SidecarError> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), SidecarError> {
        if self.process.is_running() && self.management.health().await.is_ok() {
            debug!("Sidecar already healthy; start is a no-op");
            return Ok(());
        }

        let yaml = self.render_config().await?;
        config_gen::write_atomic(&self.config_path, &yaml)?;

        if self.process.is_running() {
            // A tracked child that stopped answering health is replaced
            self.process.terminate(STOP_GRACE).await?;
        }

        self.stopping.store(false, Ordering::SeqCst);
        let pid = self
            .process
            .spawn(&self.config_path, &self.management_url)
            .await?;
        info!(pid, "Spawned sidecar");

        match self.await_healthy().await {
            Ok(()) => {
                self.crash.lock().unwrap().auto_restart_disabled = false;
                info!("Sidecar is healthy");
                Ok(())
            }
            Err(e) => {
                let _ = self.process.terminate(Duration::ZERO).await;
                Err(e)
            }
        }
    }

    async fn await_healthy(&self) -> Result<(), SidecarError> {
        let deadline = Instant::now() + Duration::from_secs(HEALTH_BUDGET_SECS);
        let mut delay = Duration::from_millis(100);

        loop {
            if self.management.health().await.is_ok() {
                return Ok(());
            }
            if Instant::now() + delay >= deadline {
                return Err(SidecarError::HealthTimeout(HEALTH_BUDGET_SECS));
            }
            sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(2));
        }
    }

    /// Stop the sidecar: graceful signal, then kill after the grace
    /// period.
    pub async fn stop(&self) -> Result<(), SidecarError> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<(), SidecarError> {
        self.stopping.store(true, Ordering::SeqCst);
        self.process.terminate(STOP_GRACE).await?;
        info!("Sidecar stopped");
        Ok(())
    }

    /// Stop then start, preserving the configured port.
    pub async fn restart(&self) -> Result<(), SidecarError> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await?;
        self.start_locked().await
    }

    /// Regenerate the YAML and restart only if it changed. A stopped
    /// sidecar just gets the new config for its next start. Returns
    /// whether a restart happened.
    pub async fn reload(&self) -> Result<bool, SidecarError> {
        let _guard = self.lifecycle.lock().await;

        let yaml = self.render_config().await?;
        let current = std::fs::read_to_string(&self.config_path).ok();
        if current.as_deref() == Some(yaml.as_str()) {
            debug!("Sidecar config unchanged; skipping reload");
            return Ok(false);
        }

        if !self.process.is_running() {
            config_gen::write_atomic(&self.config_path, &yaml)?;
            return Ok(false);
        }

        info!("Sidecar config changed; restarting");
        self.stop_locked().await?;
        config_gen::write_atomic(&self.config_path, &yaml)?;
        self.start_locked().await?;
        Ok(true)
    }

    /// Current lifecycle snapshot.
    pub async fn status(&self) -> Result<SupervisorStatus, SidecarError> {
        let config = config_gen::load_server_config(self.db.pool()).await?;
        let crash = self.crash.lock().unwrap().clone();

        Ok(SupervisorStatus {
            running: self.process.is_running(),
            port: config.proxy_port,
            pid: self.process.pid(),
            endpoint: self.management_url.clone(),
            uptime_seconds: self.process.uptime().map(|d| d.as_secs()),
            last_crash_at: crash.last_crash_at,
            auto_restart_disabled: crash.auto_restart_disabled,
        })
    }

    async fn render_config(&self) -> Result<String, SidecarError> {
        Ok(config_gen::render_from_store(self.db.pool(), &self.state_dir).await?)
    }

    /// Spawn the background crash watcher.
    pub fn spawn_watcher(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                if supervisor.stopping.load(Ordering::SeqCst) {
                    continue;
                }
                if let Some(code) = supervisor.process.try_reap() {
                    supervisor.handle_crash(code).await;
                }
            }
        });
    }

    async fn handle_crash(&self, code: i32) {
        warn!(code, "Sidecar exited unexpectedly");

        let decision = self.crash.lock().unwrap().register(Utc::now());
        match decision {
            RestartDecision::Restart => {
                let jitter = rand::thread_rng().gen_range(500..1500);
                sleep(Duration::from_millis(jitter)).await;
                if let Err(e) = self.start().await {
                    error!("Automatic sidecar restart failed: {}", e);
                }
            }
            RestartDecision::Lockout => {
                warn!(
                    "Second sidecar crash within {}s; automatic restart disabled until manual start",
                    CRASH_WINDOW_SECS
                );
            }
            RestartDecision::Disabled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::MockSidecarManagement;
    use tollgate_db::test_helpers::create_test_db;

    async fn test_supervisor(
        healthy: bool,
    ) -> (Arc<Supervisor>, Arc<MockSidecarProcess>, Arc<MockSidecarManagement>, tempfile::TempDir)
    {
        let db = create_test_db().await.unwrap();
        let process = Arc::new(MockSidecarProcess::default());
        let management = Arc::new(MockSidecarManagement::default());
        if healthy {
            management.set_healthy();
        }

        let dir = tempfile::tempdir().unwrap();
        let supervisor = Arc::new(Supervisor::new(
            db,
            process.clone(),
            management.clone(),
            dir.path().join("sidecar-config.yaml"),
            dir.path().join("sidecar"),
            "http://127.0.0.1:8317".to_string(),
        ));

        (supervisor, process, management, dir)
    }

    #[tokio::test]
    async fn test_start_spawns_and_writes_config() {
        let (supervisor, process, _management, dir) = test_supervisor(true).await;

        supervisor.start().await.unwrap();

        let calls = process.call_log.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("spawn:"));

        let yaml = std::fs::read_to_string(dir.path().join("sidecar-config.yaml")).unwrap();
        assert!(yaml.contains("port: 8317"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_when_healthy() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;

        supervisor.start().await.unwrap();
        supervisor.start().await.unwrap();

        let spawns = process
            .call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("spawn:"))
            .count();
        assert_eq!(spawns, 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_not_running() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;
        *process.spawn_error.lock().unwrap() = Some("binary missing".to_string());

        let result = supervisor.start().await;
        assert!(matches!(result, Err(SidecarError::Spawn(_))));

        let status = supervisor.status().await.unwrap();
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_reload_skips_when_config_unchanged() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;

        supervisor.start().await.unwrap();
        let restarted = supervisor.reload().await.unwrap();
        assert!(!restarted);

        let terminates = process
            .call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == "terminate")
            .count();
        assert_eq!(terminates, 0);
    }

    #[tokio::test]
    async fn test_reload_restarts_on_diff() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;

        supervisor.start().await.unwrap();

        // Change sidecar-facing config so the rendered YAML differs
        let mut config = config_gen::load_server_config(supervisor.db.pool())
            .await
            .unwrap();
        config.proxy_port = 9000;
        config_gen::save_server_config(supervisor.db.pool(), &config)
            .await
            .unwrap();

        let restarted = supervisor.reload().await.unwrap();
        assert!(restarted);

        let calls = process.call_log.lock().unwrap().clone();
        assert!(calls.iter().any(|c| c == "terminate"));
        let spawns = calls.iter().filter(|c| c.starts_with("spawn:")).count();
        assert_eq!(spawns, 2);
    }

    #[tokio::test]
    async fn test_status_reports_running_state() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;

        let status = supervisor.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.port, 8317);
        assert_eq!(status.pid, None);

        supervisor.start().await.unwrap();
        let status = supervisor.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(12345));
        assert_eq!(status.uptime_seconds, Some(120));

        supervisor.stop().await.unwrap();
        let status = supervisor.status().await.unwrap();
        assert!(!status.running);
        let _ = process;
    }

    #[tokio::test]
    async fn test_reload_while_stopped_only_rewrites_config() {
        let (supervisor, process, _management, dir) = test_supervisor(true).await;

        let restarted = supervisor.reload().await.unwrap();
        assert!(!restarted);

        let yaml = std::fs::read_to_string(dir.path().join("sidecar-config.yaml")).unwrap();
        assert!(yaml.contains("port: 8317"));

        let spawns = process
            .call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("spawn:"))
            .count();
        assert_eq!(spawns, 0);
    }

    #[test]
    fn test_crash_policy_single_crash_restarts() {
        let mut crash = CrashState::default();
        let now = Utc::now();

        assert_eq!(crash.register(now), RestartDecision::Restart);
        assert!(!crash.auto_restart_disabled);
        assert_eq!(crash.last_crash_at, Some(now));
    }

    #[test]
    fn test_crash_policy_double_crash_locks_out() {
        let mut crash = CrashState::default();
        let now = Utc::now();

        assert_eq!(crash.register(now), RestartDecision::Restart);
        assert_eq!(
            crash.register(now + TimeDelta::seconds(5)),
            RestartDecision::Lockout
        );
        assert!(crash.auto_restart_disabled);

        // Further crashes stay disabled until an admin starts manually
        assert_eq!(
            crash.register(now + TimeDelta::seconds(60)),
            RestartDecision::Disabled
        );
    }

    #[test]
    fn test_crash_policy_slow_crashes_keep_restarting() {
        let mut crash = CrashState::default();
        let now = Utc::now();

        assert_eq!(crash.register(now), RestartDecision::Restart);
        assert_eq!(
            crash.register(now + TimeDelta::seconds(30)),
            RestartDecision::Restart
        );
        assert!(!crash.auto_restart_disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_watcher_restarts_once_then_locks_out() {
        let (supervisor, process, _management, _dir) = test_supervisor(true).await;

        supervisor.start().await.unwrap();
        supervisor.spawn_watcher();

        // First crash: the watcher restarts after a jittered delay
        process.simulate_exit(1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(process.is_running());
        let spawns = process
            .call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("spawn:"))
            .count();
        assert_eq!(spawns, 2);

        // Second crash inside the window: lockout, no third spawn
        process.simulate_exit(1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!process.is_running());

        let status = supervisor.status().await.unwrap();
        assert!(status.auto_restart_disabled);
        assert!(status.last_crash_at.is_some());

        // Manual start brings it back and re-arms auto-restart
        supervisor.start().await.unwrap();
        assert!(process.is_running());
        let status = supervisor.status().await.unwrap();
        assert!(!status.auto_restart_disabled);
    }

    #[tokio::test]
    async fn test_manual_start_clears_lockout() {
        let (supervisor, _process, _management, _dir) = test_supervisor(true).await;

        {
            let mut crash = supervisor.crash.lock().unwrap();
            crash.auto_restart_disabled = true;
            crash.last_crash_at = Some(Utc::now());
        }

        supervisor.start().await.unwrap();

        let status = supervisor.status().await.unwrap();
        assert!(!status.auto_restart_disabled);
        assert!(status.last_crash_at.is_some());
    }
}
