//! Per-descriptor interest registry owned by the loop.

use std::collections::HashMap;

use crate::eventloop::IoCallback;
use crate::poller::{Interest, RawFd, Ready};

struct IoEntry {
    interest: Interest,
    read: Option<IoCallback>,
    write: Option<IoCallback>,
}

/// At most one entry per descriptor; mask bits and callback slots stay in
/// lockstep, and `max_fd` always equals the highest registered descriptor.
#[derive(Default)]
pub(crate) struct IoRegistry {
    entries: HashMap<RawFd, IoEntry>,
    max_fd: Option<RawFd>,
}

impl IoRegistry {
    pub(crate) fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.entries.get(&fd).map(|entry| entry.interest)
    }

    /// Cached highest registered descriptor, `None` when empty.
    pub(crate) fn max_fd(&self) -> Option<RawFd> {
        self.max_fd
    }

    /// Union `interest` into any existing registration, replacing the
    /// callback slots for the supplied bits only.
    pub(crate) fn merge(&mut self, fd: RawFd, interest: Interest, callback: IoCallback) {
        let entry = self.entries.entry(fd).or_insert(IoEntry {
            interest,
            read: None,
            write: None,
        });

        entry.interest = entry.interest | interest;

        if interest.is_readable() {
            entry.read = Some(callback.clone());
        }
        if interest.is_writable() {
            entry.write = Some(callback);
        }

        self.max_fd = Some(self.max_fd.map_or(fd, |max| max.max(fd)));
    }

    /// Slot for a ready mode, `None` when the bit is not currently held.
    pub(crate) fn callback(&self, fd: RawFd, ready: Ready) -> Option<IoCallback> {
        let entry = self.entries.get(&fd)?;

        if !entry.interest.contains(ready.as_interest()) {
            return None;
        }

        match ready {
            Ready::Readable => entry.read.clone(),
            Ready::Writable => entry.write.clone(),
        }
    }

    /// Clear bits and their slots; drops the entry and rescans the remaining
    /// keys for the highest descriptor when the mask empties.
    pub(crate) fn clear(&mut self, fd: RawFd, interest: Interest) {
        let Some(entry) = self.entries.get_mut(&fd) else {
            return;
        };

        if interest.is_readable() {
            entry.read = None;
        }
        if interest.is_writable() {
            entry.write = None;
        }

        match entry.interest.remove(interest) {
            Some(rest) => entry.interest = rest,
            None => {
                self.entries.remove(&fd);

                self.max_fd = self.entries.keys().copied().max();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    fn noop() -> IoCallback {
        Rc::new(RefCell::new(|_: &mut crate::LoopHandle<'_>, _, _| {}))
    }

    #[test]
    fn max_fd_tracks_highest_descriptor() {
        let mut registry = IoRegistry::default();

        assert_eq!(registry.max_fd(), None);

        registry.merge(3, Interest::READABLE, noop());
        registry.merge(9, Interest::WRITABLE, noop());
        registry.merge(5, Interest::READABLE, noop());
        assert_eq!(registry.max_fd(), Some(9));

        registry.clear(9, Interest::BOTH);
        assert_eq!(registry.max_fd(), Some(5));

        registry.clear(5, Interest::READABLE);
        registry.clear(3, Interest::READABLE);
        assert_eq!(registry.max_fd(), None);
    }

    #[test]
    fn merge_keeps_slots_independent() {
        let mut registry = IoRegistry::default();

        registry.merge(4, Interest::READABLE, noop());
        registry.merge(4, Interest::WRITABLE, noop());

        assert_eq!(registry.interest(4), Some(Interest::BOTH));
        assert!(registry.callback(4, Ready::Readable).is_some());
        assert!(registry.callback(4, Ready::Writable).is_some());

        registry.clear(4, Interest::READABLE);

        assert_eq!(registry.interest(4), Some(Interest::WRITABLE));
        assert!(registry.callback(4, Ready::Readable).is_none());
        assert!(registry.callback(4, Ready::Writable).is_some());
    }

    #[test]
    fn clear_unknown_is_noop() {
        let mut registry = IoRegistry::default();

        registry.merge(2, Interest::READABLE, noop());

        registry.clear(8, Interest::BOTH);
        registry.clear(2, Interest::WRITABLE);

        assert_eq!(registry.interest(2), Some(Interest::READABLE));
        assert_eq!(registry.max_fd(), Some(2));
        assert!(registry.callback(2, Ready::Readable).is_some());
    }
}
