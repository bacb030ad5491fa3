use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use secmem::config::{Cli, Config};
use secmem::server::{exit_code, Server};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(exit_code::CONFIG_ERROR);
        }
    };

    // Process hardening + memory lock. Both are best-effort: failure is
    // logged and never stops the agent from starting.
    if let Err(e) = protect_process() {
        warn!(error = %e, "process hardening failed");
    }
    if let Err(e) = mlockall_current_future() {
        warn!(error = %e, "mlockall failed");
    }

    let server = match Server::start(config) {
        Ok(s) => s,
        Err(code) => std::process::exit(code),
    };

    std::process::exit(server.run());
}

/// Disable core dumps and privilege escalation via `ptrace`.
#[cfg(target_os = "linux")]
fn protect_process() -> std::io::Result<()> {
    unsafe {
        if libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn protect_process() -> std::io::Result<()> {
    Ok(())
}

/// Lock all current and future pages resident, on top of the per-secret
/// `mlock` done in `secmem::secret`.
#[cfg(unix)]
fn mlockall_current_future() -> std::io::Result<()> {
    let res = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if res != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn mlockall_current_future() -> std::io::Result<()> {
    Ok(())
}
