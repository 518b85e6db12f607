//! Reference backend over `select(2)`.
//!
//! Hard `FD_SETSIZE` ceiling on the largest addressable descriptor and an
//! O(registered-descriptor-count) scan per wake; acceptable only at small
//! scale.

use std::{
    collections::BTreeMap,
    io::{Error, Result},
    mem,
    ptr::null_mut,
    time::Duration,
};

use errno::{errno, set_errno};
use libc::{fd_set, timeval, FD_CLR, FD_ISSET, FD_SET, FD_ZERO};

use super::{capacity_exceeded, Interest, Poller, RawFd, Ready};

pub struct SelectPoller {
    rfds: fd_set,
    wfds: fd_set,
    interest: BTreeMap<RawFd, Interest>,
}

impl SelectPoller {
    pub fn new() -> Self {
        let mut rfds: fd_set = unsafe { mem::zeroed() };
        let mut wfds: fd_set = unsafe { mem::zeroed() };

        unsafe {
            FD_ZERO(&mut rfds);
            FD_ZERO(&mut wfds);
        }

        Self {
            rfds,
            wfds,
            interest: BTreeMap::new(),
        }
    }
}

impl Default for SelectPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for SelectPoller {
    fn check_capacity(&self, fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize
    }

    fn add_interest(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        if !self.check_capacity(fd) {
            return Err(capacity_exceeded(fd));
        }

        unsafe {
            if interest.is_readable() {
                FD_SET(fd, &mut self.rfds);
            }
            if interest.is_writable() {
                FD_SET(fd, &mut self.wfds);
            }
        }

        self.interest
            .entry(fd)
            .and_modify(|held| *held = *held | interest)
            .or_insert(interest);

        Ok(())
    }

    fn remove_interest(&mut self, fd: RawFd, interest: Interest) {
        if !self.check_capacity(fd) {
            return;
        }

        unsafe {
            if interest.is_readable() {
                FD_CLR(fd, &mut self.rfds);
            }
            if interest.is_writable() {
                FD_CLR(fd, &mut self.wfds);
            }
        }

        let Some(held) = self.interest.get_mut(&fd) else {
            return;
        };

        match held.remove(interest) {
            Some(rest) => *held = rest,
            None => {
                self.interest.remove(&fd);
            }
        }
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        dispatch: &mut dyn FnMut(RawFd, Ready),
    ) -> Result<()> {
        let mut rfds = self.rfds;
        let mut wfds = self.wfds;

        let mut tv;
        let tvp = match timeout {
            Some(timeout) => {
                tv = timeval {
                    tv_sec: timeout.as_secs() as _,
                    tv_usec: timeout.subsec_micros() as _,
                };

                &mut tv as *mut timeval
            }
            None => null_mut(),
        };

        let nfds = self.interest.keys().next_back().map_or(0, |fd| fd + 1);

        let fired = unsafe { libc::select(nfds, &mut rfds, &mut wfds, null_mut(), tvp) };

        if fired < 0 {
            let e = errno();

            set_errno(e);

            if e.0 == libc::EINTR {
                log::debug!("select interrupted, treating as empty wake");
                return Ok(());
            }

            log::debug!("select error({})", e);

            return Err(Error::last_os_error());
        }

        if fired == 0 {
            return Ok(());
        }

        log::trace!("select woke with {} ready", fired);

        // ascending fd order; this is the backend-defined dispatch order
        for (&fd, &held) in &self.interest {
            if held.is_readable() && unsafe { FD_ISSET(fd, &mut rfds) } {
                dispatch(fd, Ready::Readable);
            }

            if held.is_writable() && unsafe { FD_ISSET(fd, &mut wfds) } {
                dispatch(fd, Ready::Writable);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn capacity_ceiling() {
        let poller = SelectPoller::new();

        assert!(poller.check_capacity(0));
        assert!(poller.check_capacity(libc::FD_SETSIZE as RawFd - 1));
        assert!(!poller.check_capacity(-1));
        assert!(!poller.check_capacity(libc::FD_SETSIZE as RawFd));
    }

    #[test]
    fn interest_bookkeeping() {
        let mut poller = SelectPoller::new();

        poller.add_interest(5, Interest::READABLE).unwrap();
        poller.add_interest(5, Interest::WRITABLE).unwrap();
        assert_eq!(poller.interest.get(&5), Some(&Interest::BOTH));

        poller.remove_interest(5, Interest::READABLE);
        assert_eq!(poller.interest.get(&5), Some(&Interest::WRITABLE));

        poller.remove_interest(5, Interest::WRITABLE);
        assert!(poller.interest.is_empty());

        // dropping bits never held leaves state unchanged
        poller.remove_interest(5, Interest::BOTH);
        assert!(poller.interest.is_empty());

        let err = poller
            .add_interest(libc::FD_SETSIZE as RawFd, Interest::READABLE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
