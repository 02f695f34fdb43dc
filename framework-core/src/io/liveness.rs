//! Process liveness probing for lock staleness.

use crate::core::lock::Liveness;

/// Answers whether the process owning a lock still exists.
pub trait ProcessProbe {
    fn probe(&self, pid: i64) -> Liveness;
}

/// Probe by sending the null signal (`kill(pid, 0)`).
///
/// `ESRCH` means gone; `EPERM` means the process exists but belongs to someone
/// else, which is reported as [`Liveness::Unknown`] so the caller's policy decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    #[cfg(unix)]
    fn probe(&self, pid: i64) -> Liveness {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 0 and negative values address process groups, never a single owner.
        let Ok(raw) = i32::try_from(pid) else {
            return Liveness::Dead;
        };
        if raw <= 0 {
            return Liveness::Dead;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Dead,
            Err(_) => Liveness::Unknown,
        }
    }

    #[cfg(not(unix))]
    fn probe(&self, pid: i64) -> Liveness {
        if pid <= 0 {
            return Liveness::Dead;
        }
        Liveness::Unknown
    }
}
