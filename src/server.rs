//! Listening socket, accept loop, and startup/shutdown lifecycle.
//!
//! Accepts nonblocking so the loop can observe a shutdown flag set by
//! `signal-hook` on SIGTERM/SIGINT, and enforces the connection-limit
//! and stale-socket handling the command-line surface promises.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag as signal_flag;

use crate::auth;
use crate::clock::{Clock, SystemClock};
use crate::codec::{self, Response};
use crate::config::{Config, SHUTDOWN_GRACE};
use crate::connection;
use crate::error::ErrorKind;
use crate::store::Store;
use crate::sweeper::Sweeper;

/// Process exit codes for the command-line surface.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const BIND_FAILED: i32 = 2;
    pub const MISSING_PEER_CREDENTIALS: i32 = 3;
}

pub struct Server {
    config: Arc<Config>,
    listener: UnixListener,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl Server {
    /// Validate the socket path, bind, set the mode, and probe
    /// peer-credential support. Returns a process exit code on failure
    /// rather than a generic error, since the caller's only job with it
    /// is `std::process::exit`.
    pub fn start(config: Config) -> Result<Server, i32> {
        let config = Arc::new(config);

        if let Err(e) = prepare_socket_path(&config.socket_path) {
            tracing::error!(error = %e, "failed to prepare socket path");
            return Err(exit_code::BIND_FAILED);
        }

        let listener = match UnixListener::bind(&config.socket_path) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, path = %config.socket_path.display(), "bind failed");
                return Err(exit_code::BIND_FAILED);
            }
        };

        if let Err(e) = fs::set_permissions(
            &config.socket_path,
            fs::Permissions::from_mode(config.socket_mode),
        ) {
            tracing::error!(error = %e, "failed to set socket permissions");
            return Err(exit_code::BIND_FAILED);
        }

        // Probe peer-credential support with a loopback pair; the agent
        // must refuse to run without it.
        match UnixStream::pair() {
            Ok((a, _b)) if auth::platform_supports_peer_credentials(&a) => {}
            _ => {
                tracing::error!("platform lacks SO_PEERCRED support; refusing to start");
                let _ = fs::remove_file(&config.socket_path);
                return Err(exit_code::MISSING_PEER_CREDENTIALS);
            }
        }

        tracing::info!(
            socket = %config.socket_path.display(),
            max_keys = config.max_keys,
            max_connections = config.max_connections,
            default_ttl_secs = config.default_ttl.as_secs(),
            max_ttl_secs = config.max_ttl.as_secs(),
            "secmem-agent starting"
        );
        tracing::info!(socket = %config.socket_path.display(), "listening");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(Store::new(Arc::clone(&clock), config.max_keys));

        Ok(Server {
            config,
            listener,
            store,
            clock,
        })
    }

    /// Run the accept loop until a termination signal is observed, then
    /// shut down gracefully. Returns the clean-shutdown exit code.
    pub fn run(self) -> i32 {
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        for sig in [SIGTERM, SIGINT] {
            if signal_flag::register(sig, Arc::clone(&shutdown)).is_err() {
                tracing::warn!(signal = sig, "failed to register signal handler");
            }
        }

        let sweeper = Sweeper::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.sweep_interval,
        );

        // Accept with a timeout so the loop can observe the shutdown
        // flag even with no incoming connections.
        self.listener
            .set_nonblocking(true)
            .expect("failed to set listener nonblocking");

        let active_connections = Arc::new(AtomicUsize::new(0));
        let handles = Arc::new(Mutex::new(Vec::new()));

        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if active_connections.load(Ordering::SeqCst) >= self.config.max_connections {
                        tracing::warn!("connection limit reached; rejecting new connection");
                        let mut w = stream;
                        let _ = codec::write_response(&mut w, &Response::Err(ErrorKind::capacity()));
                        continue;
                    }
                    self.spawn_connection(stream, &active_connections, &handles);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        tracing::info!("shutdown signal received; draining connections");
        // Give in-flight connections up to SHUTDOWN_GRACE to finish their
        // current request; we don't forcibly join past that.
        thread::sleep(SHUTDOWN_GRACE);

        sweeper.shutdown();
        let _ = fs::remove_file(&self.config.socket_path);
        tracing::info!("shutdown complete");
        exit_code::CLEAN
    }

    fn spawn_connection(
        &self,
        stream: UnixStream,
        active_connections: &Arc<AtomicUsize>,
        handles: &Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
    ) {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let config = Arc::clone(&self.config);
        let active = Arc::clone(active_connections);
        active.fetch_add(1, Ordering::SeqCst);

        // Connection I/O is blocking even though the listener itself is
        // polled nonblocking; hand the accepted stream back to blocking
        // mode for the handler.
        let _ = stream.set_nonblocking(false);

        let handle = thread::Builder::new()
            .name("secmem-conn".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    connection::handle(stream, store, clock, config);
                }));
                if result.is_err() {
                    tracing::error!("connection handler panicked");
                }
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("failed to spawn connection thread");

        let mut handles = handles.lock().expect("handles lock poisoned");
        handles.retain(|h: &thread::JoinHandle<()>| !h.is_finished());
        handles.push(handle);
    }
}

/// Remove a stale socket file if one is present and not currently being
/// served. We can't reliably probe "is anyone listening" without racing
/// a connect attempt, so we follow the common convention: try connecting
/// first; a refused connection means the file is stale.
fn prepare_socket_path(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        match UnixStream::connect(path) {
            Ok(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "socket is already accepting connections",
                ));
            }
            Err(_) => {
                fs::remove_file(path)?;
            }
        }
    }
    Ok(())
}
