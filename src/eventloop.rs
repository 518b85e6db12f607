//! Loop orchestration: one iteration waits for readiness bounded by the
//! nearest timer deadline, dispatches ready io, then fires due timers.

use std::{
    cell::RefCell,
    io::{Error, ErrorKind, Result},
    rc::Rc,
    time::Duration,
};

use crate::{
    io::IoRegistry,
    poller::{Interest, Poller, RawFd, Ready},
    timer::{Clock, Next, Repeat, SystemClock, TimerEntry, TimerId, TimerQueue},
};

#[cfg(target_family = "unix")]
use crate::poller::SelectPoller;

/// Io callback, invoked with the ready descriptor and mode.
///
/// Shared between the read and write slots when one registration covers both
/// bits.
pub type IoCallback = Rc<RefCell<dyn FnMut(&mut LoopHandle<'_>, RawFd, Ready)>>;

/// Timer callback; the returned [`Next`] verdict drives the repeat policy.
pub type TimerCallback = Box<dyn FnMut(&mut LoopHandle<'_>, TimerId) -> Next>;

/// Loop mutation queued by a callback, applied once the iteration ends.
enum Command {
    RegisterIo {
        fd: RawFd,
        interest: Interest,
        callback: IoCallback,
    },
    UnregisterIo {
        fd: RawFd,
        interest: Interest,
    },
    ScheduleTimer {
        id: TimerId,
        interval: Duration,
        repeat: Repeat,
        callback: TimerCallback,
    },
    CancelTimer(TimerId),
}

/// View of the loop handed to running callbacks.
///
/// Mutations queue up and take effect on the next iteration: a registration
/// already captured as ready or due for the current pass still fires once,
/// even if another callback cancels it mid-dispatch.
pub struct LoopHandle<'a> {
    pending: &'a mut Vec<Command>,
    next_timer_id: &'a mut u64,
    stop: &'a mut bool,
}

impl LoopHandle<'_> {
    /// Queue an io registration. A backend rejection surfaces as a warning
    /// when the command is applied; the calling frame is long gone by then.
    pub fn register_io<F>(&mut self, fd: RawFd, interest: Interest, callback: F)
    where
        F: FnMut(&mut LoopHandle<'_>, RawFd, Ready) + 'static,
    {
        self.pending.push(Command::RegisterIo {
            fd,
            interest,
            callback: Rc::new(RefCell::new(callback)),
        });
    }

    pub fn unregister_io(&mut self, fd: RawFd, interest: Interest) {
        self.pending.push(Command::UnregisterIo { fd, interest });
    }

    pub fn schedule_timer<F>(&mut self, interval: Duration, repeat: Repeat, callback: F) -> TimerId
    where
        F: FnMut(&mut LoopHandle<'_>, TimerId) -> Next + 'static,
    {
        let id = TimerId::alloc(self.next_timer_id);

        self.pending.push(Command::ScheduleTimer {
            id,
            interval,
            repeat,
            callback: Box::new(callback),
        });

        id
    }

    /// One-shot sugar for `Repeat::Times(1)`.
    pub fn schedule_once<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut LoopHandle<'_>, TimerId) -> Next + 'static,
    {
        self.schedule_timer(delay, Repeat::Times(1), callback)
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.pending.push(Command::CancelTimer(id));
    }

    /// Request loop exit once the current iteration completes.
    pub fn stop(&mut self) {
        *self.stop = true;
    }
}

/// Single-threaded reactor over a swappable [`Poller`] backend.
///
/// Everything runs on the calling thread; the only suspension point is the
/// poller's wait, bounded by the nearest timer deadline.
pub struct EventLoop<P: Poller> {
    poller: P,
    io: IoRegistry,
    timers: TimerQueue,
    clock: Box<dyn Clock>,
    next_timer_id: u64,
    pending: Vec<Command>,
    stop: bool,
}

#[cfg(target_family = "unix")]
impl EventLoop<SelectPoller> {
    /// Loop over the reference select backend and the system clock.
    pub fn new() -> Self {
        Self::with_poller(SelectPoller::new())
    }
}

#[cfg(target_family = "unix")]
impl Default for EventLoop<SelectPoller> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Poller> EventLoop<P> {
    pub fn with_poller(poller: P) -> Self {
        Self::with_clock(poller, Box::new(SystemClock))
    }

    pub fn with_clock(poller: P, clock: Box<dyn Clock>) -> Self {
        Self {
            poller,
            io: IoRegistry::default(),
            timers: TimerQueue::default(),
            clock,
            next_timer_id: 0,
            pending: Vec::new(),
            stop: false,
        }
    }

    /// Cached highest registered descriptor, `None` when no io is registered.
    pub fn max_descriptor(&self) -> Option<RawFd> {
        self.io.max_fd()
    }

    /// Register interest in `fd`, merging with any existing registration:
    /// masks union, and the callback replaces the slots for the supplied
    /// bits. Fails with [`ErrorKind::Unsupported`] when the backend cannot
    /// address the descriptor; the loop keeps running and the registry is
    /// untouched.
    pub fn register_io<F>(&mut self, fd: RawFd, interest: Interest, callback: F) -> Result<()>
    where
        F: FnMut(&mut LoopHandle<'_>, RawFd, Ready) + 'static,
    {
        self.install_io(fd, interest, Rc::new(RefCell::new(callback)))
    }

    fn install_io(&mut self, fd: RawFd, interest: Interest, callback: IoCallback) -> Result<()> {
        if fd < 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("fd({}) is not a pollable handle", fd),
            ));
        }

        self.poller.add_interest(fd, interest)?;

        self.io.merge(fd, interest, callback);

        log::trace!("registered fd({}) for {}", fd, interest);

        Ok(())
    }

    /// Clear interest bits; unknown fd or bits are a no-op. Removing the last
    /// bit drops the registration entirely.
    pub fn unregister_io(&mut self, fd: RawFd, interest: Interest) {
        let Some(held) = self.io.interest(fd) else {
            return;
        };

        let Some(bits) = held.intersection(interest) else {
            return;
        };

        self.poller.remove_interest(fd, bits);
        self.io.clear(fd, bits);

        log::trace!("unregistered fd({}) for {}", fd, bits);
    }

    /// Schedule `callback` to first fire after `interval`, then per the
    /// repeat policy. Returns a fresh monotonic id.
    pub fn schedule_timer<F>(&mut self, interval: Duration, repeat: Repeat, callback: F) -> TimerId
    where
        F: FnMut(&mut LoopHandle<'_>, TimerId) -> Next + 'static,
    {
        let id = TimerId::alloc(&mut self.next_timer_id);
        let deadline = self.clock.now() + interval;

        self.timers
            .insert(id, TimerEntry::new(deadline, interval, repeat, Box::new(callback)));

        id
    }

    /// One-shot sugar for `Repeat::Times(1)`.
    pub fn schedule_once<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut LoopHandle<'_>, TimerId) -> Next + 'static,
    {
        self.schedule_timer(delay, Repeat::Times(1), callback)
    }

    /// Idempotent; cancelling an exhausted or unknown id is a no-op.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if self.timers.cancel(id) {
            log::trace!("cancelled {}", id);
        }
    }

    /// Request loop exit. Only meaningful from the loop thread, either inside
    /// a callback or before [`run`](EventLoop::run) starts; there is no
    /// cross-thread signaling.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Iterate until a stop is observed. The in-flight iteration always
    /// completes; a fatal poll error aborts with `Err`.
    pub fn run(&mut self) -> Result<()> {
        while !self.stop {
            self.process_once()?;
        }

        log::debug!("loop stopped");

        Ok(())
    }

    /// One iteration: wait bounded by the nearest timer deadline, dispatch
    /// ready io, then fire the timers due as of a snapshot taken before any
    /// timer callback runs.
    pub fn process_once(&mut self) -> Result<()> {
        let timeout = {
            let now = self.clock.now();

            self.timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
        };

        {
            let io = &mut self.io;
            let pending = &mut self.pending;
            let next_timer_id = &mut self.next_timer_id;
            let stop = &mut self.stop;

            self.poller.wait(timeout, &mut |fd, ready| {
                // the backend may report modes whose bits were cleared since
                // the last wake; those never reach a callback
                let Some(callback) = io.callback(fd, ready) else {
                    return;
                };

                let mut handle = LoopHandle {
                    pending: &mut *pending,
                    next_timer_id: &mut *next_timer_id,
                    stop: &mut *stop,
                };

                (&mut *callback.borrow_mut())(&mut handle, fd, ready);
            })?;
        }

        let now = self.clock.now();
        let due = self.timers.due_ids(now);

        for id in due {
            let verdict = {
                let Some(entry) = self.timers.entry_mut(id) else {
                    continue;
                };

                let mut handle = LoopHandle {
                    pending: &mut self.pending,
                    next_timer_id: &mut self.next_timer_id,
                    stop: &mut self.stop,
                };

                log::trace!("firing {}", id);

                (entry.callback)(&mut handle, id)
            };

            let Some(entry) = self.timers.entry_mut(id) else {
                continue;
            };

            let exhausted = match verdict {
                Next::Cancel => true,
                Next::After(interval) if interval.is_zero() => true,
                Next::Continue => {
                    entry.deadline += entry.interval;

                    entry.finish_round()
                }
                Next::After(interval) => {
                    entry.deadline += interval;

                    entry.finish_round()
                }
            };

            if exhausted {
                self.timers.remove(id);
            }
        }

        self.apply_pending();

        Ok(())
    }

    fn apply_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let commands: Vec<Command> = self.pending.drain(..).collect();

        for command in commands {
            match command {
                Command::RegisterIo {
                    fd,
                    interest,
                    callback,
                } => {
                    if let Err(err) = self.install_io(fd, interest, callback) {
                        log::warn!("deferred register_io(fd={}) failed: {}", fd, err);
                    }
                }
                Command::UnregisterIo { fd, interest } => self.unregister_io(fd, interest),
                Command::ScheduleTimer {
                    id,
                    interval,
                    repeat,
                    callback,
                } => {
                    let deadline = self.clock.now() + interval;

                    self.timers
                        .insert(id, TimerEntry::new(deadline, interval, repeat, callback));
                }
                Command::CancelTimer(id) => self.cancel_timer(id),
            }
        }
    }
}
