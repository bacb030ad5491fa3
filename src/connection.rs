//! Per-connection state machine: authenticate, then read/dispatch/reply
//! until the peer closes or a fatal protocol error occurs.
//!
//! Restructured around the text line protocol and a request/response
//! dispatch table rather than fd-passing framing.

use std::io::{self, BufReader};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::clock::Clock;
use crate::codec::{self, ReadOutcome, Request, Response};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::secret::Secret;
use crate::store::{PutOutcome, Store};

/// Handle one accepted connection end to end. Never panics out past this
/// call: any unexpected failure is converted to a log line and a clean
/// return, so one bad connection can't take the server down.
pub fn handle(stream: UnixStream, store: Arc<Store>, clock: Arc<dyn Clock>, config: Arc<Config>) {
    let peer_uid = match auth::peer_uid(&stream) {
        Ok(uid) => uid,
        Err(e) => {
            tracing::error!(error = %e, "failed to read peer credentials; closing connection");
            if let Ok(mut writer) = stream.try_clone() {
                let _ = codec::write_response(&mut writer, &Response::Err(e));
            }
            return;
        }
    };

    if !auth::is_allowed(peer_uid, &config.allowed_uids) {
        tracing::warn!(uid = peer_uid, "rejected connection: uid not in allow-list");
        let mut writer = match stream.try_clone() {
            Ok(w) => w,
            Err(_) => return,
        };
        let _ = codec::write_response(&mut writer, &Response::Err(ErrorKind::forbidden()));
        return;
    }

    tracing::info!(uid = peer_uid, "connection accepted");

    if let Err(e) = stream.set_read_timeout(Some(config.idle_timeout)) {
        tracing::warn!(error = %e, "failed to set idle timeout");
    }

    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to clone connection for writing");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        match codec::read_request(&mut reader, config.max_value_bytes) {
            Ok(ReadOutcome::Eof) => {
                tracing::info!(uid = peer_uid, "connection closed by peer");
                break;
            }
            Ok(ReadOutcome::Fatal(kind)) => {
                let _ = codec::write_response(&mut writer, &Response::Err(kind));
                break;
            }
            Ok(ReadOutcome::Rejected(kind)) => {
                if codec::write_response(&mut writer, &Response::Err(kind)).is_err() {
                    break;
                }
                continue;
            }
            Ok(ReadOutcome::Request(request)) => {
                let is_quit = matches!(request, Request::Quit);
                let response = dispatch(request, &store, &clock, &config);
                if codec::write_response(&mut writer, &response).is_err() {
                    break;
                }
                if is_quit {
                    break;
                }
            }
            Err(e) => {
                if is_timeout(&e) {
                    tracing::info!(uid = peer_uid, "idle timeout; closing connection");
                } else {
                    tracing::info!(uid = peer_uid, error = %e, "connection I/O error");
                }
                break;
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn dispatch(request: Request, store: &Store, clock: &Arc<dyn Clock>, config: &Config) -> Response {
    match request {
        Request::Ping => Response::Ok,
        Request::Quit => Response::Ok,
        Request::Get { key } => match store.get(&key) {
            Ok(bytes) => Response::Value(bytes),
            Err(e) => Response::Err(e),
        },
        Request::Del { key } => Response::OkNum(if store.delete(&key) { 1 } else { 0 }),
        Request::List => Response::List(store.list()),
        Request::Ttl { key } => match store.ttl_remaining(&key) {
            Ok(secs) => Response::OkNum(secs),
            Err(e) => Response::Err(e),
        },
        Request::Put { key, ttl, payload } => put(store, clock, config, key, ttl, payload),
    }
}

fn put(
    store: &Store,
    clock: &Arc<dyn Clock>,
    config: &Config,
    key: crate::key::Key,
    ttl: Option<crate::ttl::Ttl>,
    payload: Vec<u8>,
) -> Response {
    let ttl = match ttl {
        Some(t) => t,
        None => config.default_ttl,
    };
    if ttl.as_secs() > config.max_ttl.as_secs() {
        return Response::Err(ErrorKind::ttl_invalid("ttl exceeds configured maximum"));
    }

    let secret = match Secret::new(payload) {
        Ok(s) => s,
        Err(e) => return Response::Err(e),
    };

    let now = clock.now();
    let expires_at = match now.checked_add(Duration::from_secs(ttl.as_secs())) {
        Some(t) => t,
        None => return Response::Err(ErrorKind::ttl_invalid("ttl overflows")),
    };

    match store.put(key, secret, expires_at) {
        Ok(PutOutcome::Inserted) | Ok(PutOutcome::Replaced) => Response::Ok,
        Err(e) => Response::Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use crate::key::Key;

    fn store() -> (Store, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        (Store::new(clock.clone() as Arc<dyn Clock>, 4), clock)
    }

    fn config() -> Config {
        Config {
            socket_path: "/tmp/x.sock".into(),
            socket_mode: 0o600,
            allowed_uids: vec![],
            default_ttl: crate::ttl::Ttl::from_secs(900).unwrap(),
            max_ttl: crate::ttl::Ttl::from_secs(86_400).unwrap(),
            max_value_bytes: 65_536,
            max_keys: 1_024,
            max_connections: 64,
            sweep_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn put_without_ttl_uses_default() {
        let (store, _clock) = store();
        let cfg = config();
        let clock_dyn: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let resp = put(
            &store,
            &clock_dyn,
            &cfg,
            Key::parse("k").unwrap(),
            None,
            b"v".to_vec(),
        );
        assert!(matches!(resp, Response::Ok));
        assert_eq!(
            store.get(&Key::parse("k").unwrap()).unwrap(),
            b"v".to_vec()
        );
    }

    #[test]
    fn put_with_ttl_exceeding_max_is_rejected() {
        let (store, _clock) = store();
        let cfg = config();
        let clock_dyn: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let resp = put(
            &store,
            &clock_dyn,
            &cfg,
            Key::parse("k").unwrap(),
            Some(crate::ttl::Ttl::from_secs(604_800).unwrap()),
            b"v".to_vec(),
        );
        assert!(matches!(resp, Response::Err(ErrorKind::TtlInvalid(_))));
    }

    #[test]
    fn dispatch_del_reports_zero_for_absent_key() {
        let (store, _clock) = store();
        let resp = dispatch(
            Request::Del {
                key: Key::parse("nope").unwrap(),
            },
            &store,
            &(Arc::new(FakeClock::new()) as Arc<dyn Clock>),
            &config(),
        );
        assert!(matches!(resp, Response::OkNum(0)));
    }
}
