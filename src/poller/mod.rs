//! Readiness-polling backend abstraction.

use std::{
    fmt::Display,
    io::{Error, ErrorKind, Result},
    time::Duration,
};

#[cfg(target_family = "unix")]
mod select;
#[cfg(target_family = "unix")]
pub use select::SelectPoller;

/// Opaque pollable descriptor handle supplied by the transport layer.
pub type RawFd = i32;

/// Readiness interest mask: readable, writable or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);
    pub const BOTH: Interest = Interest(0b11);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits present in both masks, `None` when disjoint.
    pub fn intersection(self, other: Interest) -> Option<Interest> {
        match self.0 & other.0 {
            0 => None,
            bits => Some(Interest(bits)),
        }
    }

    /// Bits left after clearing `other`, `None` when the mask empties.
    pub fn remove(self, other: Interest) -> Option<Interest> {
        match self.0 & !other.0 {
            0 => None,
            bits => Some(Interest(bits)),
        }
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "readable|writable"),
            (true, false) => write!(f, "readable"),
            (false, true) => write!(f, "writable"),
            // no empty mask can be constructed
            (false, false) => Ok(()),
        }
    }
}

/// Single readiness mode reported by a poller wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ready {
    Readable,
    Writable,
}

impl Ready {
    pub fn as_interest(self) -> Interest {
        match self {
            Self::Readable => Interest::READABLE,
            Self::Writable => Interest::WRITABLE,
        }
    }
}

impl Display for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Readable => write!(f, "readable"),
            Self::Writable => write!(f, "writable"),
        }
    }
}

/// Readiness multiplexer capability.
///
/// The loop never sees backend internals; any backend honoring this contract
/// with amortized O(ready-count) wakes can replace the reference one without
/// touching the loop or its registries.
pub trait Poller {
    /// Can this backend address `fd` at all.
    fn check_capacity(&self, fd: RawFd) -> bool;

    /// Register interest; fails with [`ErrorKind::Unsupported`] past the
    /// backend's addressing ceiling.
    fn add_interest(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Drop interest bits; unknown fd or bits are ignored.
    fn remove_interest(&mut self, fd: RawFd, interest: Interest);

    /// Block up to `timeout` (indefinitely when `None`), then invoke
    /// `dispatch` once per ready (fd, mode) pair currently of interest.
    /// Returns once all pairs for this wake are dispatched, or immediately
    /// if the timeout elapsed with nothing ready.
    fn wait(
        &mut self,
        timeout: Option<Duration>,
        dispatch: &mut dyn FnMut(RawFd, Ready),
    ) -> Result<()>;
}

pub(crate) fn capacity_exceeded(fd: RawFd) -> Error {
    Error::new(
        ErrorKind::Unsupported,
        format!("fd({}) exceeds poller capacity", fd),
    )
}
