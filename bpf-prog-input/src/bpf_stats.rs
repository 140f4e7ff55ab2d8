//! Enabling and holding BPF runtime statistics tracking.
//!
//! ```no_run
//! use bpf_prog_input::bpf_stats::{enable_stats_fd, StatsHandle};
//!
//! // Attempt to enable bpf stats tracking via syscall
//! let handle = enable_stats_fd()?.map(StatsHandle::new);
//!
//! // Stats are tracked for as long as the handle is held
//! assert!(handle.is_some());
//!
//! // Release reference to the bpf stats object. Dropping the handle does the same.
//! if let Some(handle) = handle {
//!     handle.release();
//! }
//! # Ok::<(), bpf_prog_input::bpf_stats::StatsError>(())
//! ```

use std::{io, io::ErrorKind, os::fd::OwnedFd};

use aya::sys::{enable_stats, Stats};
use thiserror::Error;
use tracing::info;

/// Failure to enable BPF statistics tracking.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The `bpf` syscall failed.
    #[error("`{call}` failed")]
    Syscall {
        /// Syscall command that failed.
        call: &'static str,
        /// Underlying OS error.
        #[source]
        io_error: io::Error,
    },
}

/// Enable BPF statistics tracking through `BPF_ENABLE_STATS` syscall with `BPF_STATS_RUN_TIME`
/// type.
///
/// Returns `Some` file descriptor if enabled successfully, `None` if feature is not available on
/// the host, or `Error` if a syscall error occurs (e.g. `CAP_SYS_ADMIN` capability missing, etc.).
///
/// **Note:** `BPF_ENABLE_STATS` was introduced in kernel 5.8, however, some distros backport
/// certain features (e.g. Red Hat). Checking the kernel version is therefore not sufficient to
/// detect whether this feature is available.
pub fn enable_stats_fd() -> Result<Option<OwnedFd>, StatsError> {
    let fd = match enable_stats(Stats::RunTime) {
        Ok(fd) => Some(fd),
        Err(err) => match err.io_error.kind() {
            ErrorKind::InvalidInput => None, // EINVAL
            _ => {
                return Err(StatsError::Syscall {
                    call: err.call,
                    io_error: err.io_error,
                })
            }
        },
    };
    Ok(fd)
}

/// Exclusively owned resource keeping runtime statistics tracking active.
///
/// Tracking stops once the handle is released or dropped.
#[derive(Debug)]
pub struct StatsHandle<G>(G);

impl<G> StatsHandle<G> {
    /// Takes ownership of the guard returned by the kernel (or a stand-in).
    pub fn new(guard: G) -> Self {
        Self(guard)
    }

    /// Closes the handle, which stops runtime statistics tracking.
    pub fn release(self) {
        drop(self.0);
        info!("released `BPF_ENABLE_STATS` handle");
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::StatsHandle;

    struct Guard(Rc<Cell<bool>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_release_closes_guard() {
        let closed = Rc::new(Cell::new(false));
        let handle = StatsHandle::new(Guard(closed.clone()));
        assert!(!closed.get());
        handle.release();
        assert!(closed.get());
    }

    #[test]
    fn test_drop_closes_guard() {
        let closed = Rc::new(Cell::new(false));
        {
            let _handle = StatsHandle::new(Guard(closed.clone()));
        }
        assert!(closed.get());
    }
}
