//! Peer UID authentication via the kernel's socket peer-credentials
//! facility (`nix::sys::socket::{getsockopt, sockopt::PeerCredentials}`).
//! A missing facility is treated as fatal at startup rather than
//! skipped per-connection.

use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

use nix::sys::socket::{getsockopt, sockopt};

use crate::error::ErrorKind;

/// Probe the platform for peer-credential support. Called once at
/// startup; the agent refuses to run if this fails.
pub fn platform_supports_peer_credentials(probe: &UnixStream) -> bool {
    getsockopt(&probe.as_fd(), sockopt::PeerCredentials).is_ok()
}

/// Fetch the effective UID of the peer connected on `stream`.
pub fn peer_uid(stream: &UnixStream) -> Result<u32, ErrorKind> {
    let cred = getsockopt(&stream.as_fd(), sockopt::PeerCredentials)
        .map_err(|e| ErrorKind::internal(format!("peer credentials unavailable: {e}")))?;
    Ok(cred.uid())
}

/// Check a peer UID against the configured allow-list. An empty
/// allow-list denies everyone; there is no "allow all" wildcard.
pub fn is_allowed(uid: u32, allowed_uids: &[u32]) -> bool {
    allowed_uids.contains(&uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_denies_everyone() {
        assert!(!is_allowed(0, &[]));
        assert!(!is_allowed(1000, &[]));
    }

    #[test]
    fn allow_list_permits_listed_uids_only() {
        assert!(is_allowed(1000, &[1000, 1001]));
        assert!(!is_allowed(1002, &[1000, 1001]));
    }

    #[test]
    fn peer_uid_matches_current_process_uid_over_a_real_socket_pair() {
        let (a, _b) = UnixStream::pair().unwrap();
        let uid = peer_uid(&a).unwrap();
        assert_eq!(uid, nix::unistd::Uid::current().as_raw());
    }
}
