//! Operator abort: SIGINT/SIGTERM request cancellation of the run
//!
//! The first signal sets the shared [`CancelToken`]; the engine lets the
//! in-flight step finish, records it, and stops. Step commands run in their
//! own process group, so the terminal's Ctrl-C does not reach them. A second
//! signal sends SIGTERM to those groups and exits immediately with status 130.

use provision::CancelToken;
use std::sync::OnceLock;

static CANCEL: OnceLock<CancelToken> = OnceLock::new();

/// Install the handlers and return the token they set
pub fn install() -> CancelToken {
    let token = CANCEL.get_or_init(CancelToken::new).clone();
    #[cfg(unix)]
    unix::install();
    token
}

#[cfg(unix)]
#[allow(unsafe_code)]
mod unix {
    use super::CANCEL;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RECEIVED: AtomicUsize = AtomicUsize::new(0);

    const NOTICE: &[u8] = b"\nInterrupt received, finishing current step (again to abort)\n";

    extern "C" fn handle(_signal: libc::c_int) {
        if RECEIVED.fetch_add(1, Ordering::SeqCst) > 0 {
            provision::command::signal_running(libc::SIGTERM);
            // SAFETY: _exit is async-signal-safe
            unsafe { libc::_exit(130) };
        }
        if let Some(token) = CANCEL.get() {
            token.cancel();
        }
        // SAFETY: write(2) is async-signal-safe and NOTICE outlives the call
        unsafe {
            libc::write(libc::STDERR_FILENO, NOTICE.as_ptr().cast(), NOTICE.len());
        }
    }

    pub(super) fn install() {
        let handler = handle as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for signal in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: the handler only touches atomics and async-signal-safe calls
            if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
                log::warn!("Failed to install handler for signal {signal}");
            }
        }
    }
}
