#![doc = include_str!("../README.md")]

pub mod eventloop;
mod io;
pub mod poller;
pub mod timer;

pub use eventloop::{EventLoop, IoCallback, LoopHandle, TimerCallback};
#[cfg(target_family = "unix")]
pub use poller::SelectPoller;
pub use poller::{Interest, Poller, RawFd, Ready};
pub use timer::{Clock, ManualClock, Next, Repeat, SystemClock, TimerId};
