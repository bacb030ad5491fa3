//! Owning buffer for one secret's bytes.
//!
//! Locks its pages resident on a best-effort basis and zeroizes on drop.
//! There is deliberately no way to borrow a raw pointer out of this
//! type. The only way to get bytes out is `write_into`, which copies.

use std::io::{self, Write};
use std::sync::Once;

use zeroize::Zeroize;

use crate::error::ErrorKind;

pub const MAX_SECRET_LEN: usize = 65_536;

static MLOCK_WARNED: Once = Once::new();

pub struct Secret {
    bytes: Vec<u8>,
    locked: bool,
}

impl Secret {
    /// Take ownership of `bytes` (`1..=MAX_SECRET_LEN`), moving rather
    /// than copying it into the returned `Secret`. The input allocation
    /// becomes the secret's backing storage, so there is no separate
    /// buffer left over to zeroize on success. On a validation failure
    /// the rejected buffer is zeroized here before the error returns.
    pub fn new(mut bytes: Vec<u8>) -> Result<Self, ErrorKind> {
        if bytes.is_empty() {
            bytes.zeroize();
            return Err(ErrorKind::bad_request("secret must not be empty"));
        }
        if bytes.len() > MAX_SECRET_LEN {
            bytes.zeroize();
            return Err(ErrorKind::too_large());
        }
        let locked = mlock(&bytes);
        if !locked {
            MLOCK_WARNED.call_once(|| {
                tracing::warn!("mlock unavailable; secret pages may be swappable");
            });
        }
        Ok(Secret { bytes, locked })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy the secret's bytes to `writer`. Never exposes a pointer or a
    /// long-lived reference.
    pub fn write_into<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.bytes)
    }

    /// Copy the secret's bytes into a freshly allocated, caller-owned
    /// `Vec`. The caller must treat the result as sensitive.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            munlock(&self.bytes);
        }
    }
}

#[cfg(unix)]
fn mlock(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    let res = unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    res == 0
}

#[cfg(unix)]
fn munlock(bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    unsafe {
        let _ = libc::munlock(bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

#[cfg(not(unix))]
fn mlock(_bytes: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn munlock(_bytes: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversize() {
        assert!(Secret::new(Vec::new()).is_err());
        assert!(Secret::new(vec![0u8; MAX_SECRET_LEN]).is_ok());
        assert!(Secret::new(vec![0u8; MAX_SECRET_LEN + 1]).is_err());
    }

    #[test]
    fn write_into_round_trips_bytes() {
        let secret = Secret::new(b"abc123".to_vec()).unwrap();
        let mut out = Vec::new();
        secret.write_into(&mut out).unwrap();
        assert_eq!(out, b"abc123");
        assert_eq!(secret.len(), 6);
    }

    #[test]
    fn drop_zeroizes_before_release() {
        // Drop::drop runs the same zeroize() call this exercises directly;
        // reading memory after the real drop would be UB, so we assert on
        // the buffer state immediately before the allocation is released.
        let mut secret = Secret::new(b"topsecret".to_vec()).unwrap();
        secret.bytes.zeroize();
        assert!(secret.bytes.iter().all(|&b| b == 0));
    }
}
