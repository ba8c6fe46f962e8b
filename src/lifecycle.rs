//! HTTP listener lifecycle
//!
//! The controller owns the one listener thread the process may run. It binds
//! the port on the caller's thread, so a port conflict is reported straight
//! back to `start()`, then hands the socket to a dedicated thread running a
//! tokio runtime and the axum accept loop.
//!
//! Stopping never sleeps: `shutdown()` fires the listener's shutdown signal
//! and joins the thread, after which the port is free again. Open connections
//! get `DRAIN_TIMEOUT` to finish before they are dropped.

use crate::server::{self, AppState, ShutdownSignal};
use crate::settings::SettingsStore;
use axum::Router;
use parking_lot::Mutex;
use std::future::IntoFuture;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// How long open connections may finish after a shutdown request
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Server is already running on {0}")]
    AlreadyRunning(SocketAddr),
    #[error("Failed to prepare listener socket: {0}")]
    Socket(#[source] io::Error),
    #[error("Failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Listener thread panicked")]
    ListenerPanicked,
}

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Running(SocketAddr),
}

/// What the listener needs to serve requests
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl From<&crate::config::AppConfig> for ServerConfig {
    fn from(config: &crate::config::AppConfig) -> Self {
        ServerConfig {
            bind_addr: config.bind_addr(),
            static_dir: config.static_dir.clone(),
            settings_path: config.settings_path(),
        }
    }
}

struct RunningServer {
    addr: SocketAddr,
    signal: ShutdownSignal,
    thread: JoinHandle<()>,
}

enum ServerState {
    Stopped,
    Running(RunningServer),
}

/// Owns the running/stopped state of the HTTP listener
pub struct LifecycleController {
    config: ServerConfig,
    state: Mutex<ServerState>,
}

impl LifecycleController {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServerState::Stopped),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and start serving on a new thread
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock();
        reap_finished(&mut state);

        if let ServerState::Running(server) = &*state {
            return Err(ServerError::AlreadyRunning(server.addr));
        }

        let bind_addr = self.config.bind_addr;
        let listener = TcpListener::bind(bind_addr).map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;
        listener.set_nonblocking(true).map_err(ServerError::Socket)?;
        let addr = listener.local_addr().map_err(ServerError::Socket)?;

        let signal = ShutdownSignal::new();
        let app = server::router(
            AppState {
                store: SettingsStore::new(self.config.settings_path.clone()),
                shutdown: Some(signal.clone()),
            },
            self.config.static_dir.clone(),
        );

        let listener_signal = signal.clone();
        let thread = thread::Builder::new()
            .name("http-listener".to_string())
            .spawn(move || run_listener(listener, app, listener_signal))
            .map_err(ServerError::Spawn)?;

        tracing::info!("Server listening on http://{}", addr);
        *state = ServerState::Running(RunningServer {
            addr,
            signal,
            thread,
        });
        Ok(addr)
    }

    /// Stop the listener and wait for its thread to exit
    /// Does nothing when already stopped
    pub fn shutdown(&self) -> Result<(), ServerError> {
        // Joined without holding the lock so observers never wait on the drain
        let taken = std::mem::replace(&mut *self.state.lock(), ServerState::Stopped);
        let ServerState::Running(server) = taken else {
            tracing::debug!("Shutdown requested while stopped");
            return Ok(());
        };

        tracing::info!("Stopping server on {}", server.addr);
        server.signal.fire();
        server
            .thread
            .join()
            .map_err(|_| ServerError::ListenerPanicked)?;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Stop the listener, wait for the port to be released, start again
    pub fn restart(&self) -> Result<SocketAddr, ServerError> {
        tracing::info!("Restarting server...");
        self.shutdown()?;
        self.start()
    }

    pub fn status(&self) -> ServerStatus {
        let mut state = self.state.lock();
        reap_finished(&mut state);
        match &*state {
            ServerState::Running(server) => ServerStatus::Running(server.addr),
            ServerState::Stopped => ServerStatus::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), ServerStatus::Running(_))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.status() {
            ServerStatus::Running(addr) => Some(addr),
            ServerStatus::Stopped => None,
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Error stopping server: {}", e);
        }
    }
}

/// A listener stopped through `POST /shutdown` leaves a finished thread behind
fn reap_finished(state: &mut ServerState) {
    let finished = matches!(state, ServerState::Running(server) if server.thread.is_finished());
    if !finished {
        return;
    }

    if let ServerState::Running(server) = std::mem::replace(state, ServerState::Stopped) {
        tracing::info!("Server on {} has stopped", server.addr);
        if server.thread.join().is_err() {
            tracing::error!("Listener thread panicked");
        }
    }
}

/// Body of the listener thread
fn run_listener(listener: TcpListener, app: Router, signal: ShutdownSignal) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("http-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build server runtime: {}", e);
            return;
        }
    };

    let result = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let drain_signal = signal.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.wait().await })
            .into_future();

        // A client stuck mid-request would otherwise hold the drain open forever
        let drain_deadline = async move {
            drain_signal.wait().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        };

        tokio::select! {
            result = serve => result,
            _ = drain_deadline => {
                tracing::warn!(
                    "Connections still open {:?} after shutdown; closing them",
                    DRAIN_TIMEOUT
                );
                Ok(())
            }
        }
    });

    if let Err(e) = result {
        tracing::error!("Server stopped with error: {}", e);
    }

    // Drops the remaining connection tasks without waiting on them
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::Ipv4Addr;
    use crossbeam::channel::bounded;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn controller() -> (LifecycleController, TempDir) {
        let dir = tempdir().unwrap();
        let static_dir = dir.path().join("static");
        fs::create_dir_all(&static_dir).unwrap();
        fs::write(static_dir.join("profile.html"), "<h1>Profiles</h1>").unwrap();

        let config = ServerConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, free_port())),
            static_dir,
            settings_path: dir.path().join("DETool").join("TagSettings.json"),
        };
        (LifecycleController::new(config), dir)
    }

    fn client() -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn port_is_free(addr: SocketAddr) -> bool {
        TcpListener::bind(addr).is_ok()
    }

    fn wait_until_stopped(controller: &LifecycleController) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.is_running() {
            assert!(Instant::now() < deadline, "listener did not stop");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_start_serves_requests() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();
        assert_eq!(controller.status(), ServerStatus::Running(addr));

        let body = client()
            .get(format!("http://{addr}/api/tagsettings"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(body, "{}");

        controller.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_releases_port() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();
        assert!(!port_is_free(addr));

        controller.shutdown().unwrap();
        assert_eq!(controller.status(), ServerStatus::Stopped);
        assert!(port_is_free(addr));

        // Stopping twice is harmless
        controller.shutdown().unwrap();
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();

        let err = controller.start().unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning(running) if running == addr));
        assert!(controller.is_running());

        controller.shutdown().unwrap();
    }

    #[test]
    fn test_port_in_use_is_bind_error() {
        let (controller, _dir) = controller();
        let _occupant = TcpListener::bind(controller.config().bind_addr).unwrap();

        let err = controller.start().unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(controller.status(), ServerStatus::Stopped);
    }

    #[test]
    fn test_http_shutdown_then_start_on_same_port() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();

        let response = client()
            .post(format!("http://{addr}/shutdown"))
            .send()
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().unwrap(), "Server shutting down...");

        wait_until_stopped(&controller);
        assert!(client().get(format!("http://{addr}/")).send().is_err());

        let restarted = controller.start().unwrap();
        assert_eq!(restarted, addr);
        let response = client().get(format!("http://{addr}/")).send().unwrap();
        assert_eq!(response.status().as_u16(), 200);

        controller.shutdown().unwrap();
    }

    #[test]
    fn test_restart_twice_leaves_one_listener() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();

        assert_eq!(controller.restart().unwrap(), addr);
        assert_eq!(controller.restart().unwrap(), addr);

        assert_eq!(controller.status(), ServerStatus::Running(addr));
        assert!(!port_is_free(addr));
        let response = client().get(format!("http://{addr}/")).send().unwrap();
        assert_eq!(response.status().as_u16(), 200);

        controller.shutdown().unwrap();
        assert!(port_is_free(addr));
    }

    #[test]
    fn test_restart_from_stopped_starts() {
        let (controller, _dir) = controller();
        let addr = controller.restart().unwrap();
        assert!(controller.is_running());
        assert_eq!(controller.local_addr(), Some(addr));
    }

    #[test]
    fn test_settings_persist_across_restart() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();

        let response = client()
            .post(format!("http://{addr}/api/tagsettings"))
            .header("content-type", "application/json")
            .body(r#"{"color":"red"}"#)
            .send()
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        controller.restart().unwrap();

        let body = client()
            .get(format!("http://{addr}/api/tagsettings"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc, serde_json::json!({ "color": "red" }));
    }

    #[test]
    fn test_shutdown_does_not_wait_on_stalled_client() {
        let (controller, _dir) = controller();
        let addr = controller.start().unwrap();

        // Headers never terminated, so the request stays in flight
        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled
            .write_all(b"GET /api/tagsettings HTTP/1.1\r\nHost: detool.app\r\n")
            .unwrap();
        thread::sleep(Duration::from_millis(100));

        let (done_tx, done_rx) = bounded(1);
        thread::scope(|scope| {
            scope.spawn(|| {
                let started = Instant::now();
                let result = controller.shutdown();
                let _ = done_tx.send((result, started.elapsed()));
            });

            // Observers are not blocked while the listener drains
            let _ = controller.status();

            let (result, elapsed) = done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("shutdown hung on a stalled client");
            result.unwrap();
            assert!(elapsed < DRAIN_TIMEOUT + Duration::from_secs(2), "{elapsed:?}");
        });

        assert_eq!(controller.status(), ServerStatus::Stopped);
        assert!(port_is_free(addr));
        drop(stalled);
    }
}
