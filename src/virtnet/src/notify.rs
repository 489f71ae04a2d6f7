/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Host ↔ guest wakeups.
//!
//! A [`Notifier`] hides how notifications travel between driver and host.
//! Two transports exist: an eventfd pair wired to vhost (kick by writing the
//! kick fd, wait by reading the call fd), and an assigned virtio device
//! whose kick is a platform call and whose host-to-guest signal arrives in
//! an interrupt handler that calls [`Notifier::wake_wait`].
//!
//! The fast path of the driver is the ring, not the notifier, so `wait`
//! returns a boxed future and the ring stores a trait object.

use core::future::Future;
use core::pin::Pin;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::Notify;
use vmm_sys_util::eventfd::EventFd;

use crate::error::{Result, VirtnetError};

/// How the ring talks to its host and sleeps until the host talks back.
pub trait Notifier {
    /// Tell the host to look at the available ring.
    fn notify(&self);

    /// Completes when the host has signaled the guest.
    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + '_>>;

    /// Resolve a pending [`wait`](Self::wait) from inside the process.
    ///
    /// Only meaningful where the host-to-guest signal is delivered to an
    /// in-process interrupt handler rather than a file descriptor.
    fn wake_wait(&self) {
        panic!("this notifier's wait is resolved externally");
    }
}

/// Eventfd-pair notifier for the vhost backend.
///
/// The external setup hands the kick fd to `VHOST_SET_VRING_KICK` and the
/// call fd to `VHOST_SET_VRING_CALL`; after that, writing `kick` pokes the
/// host and `call` becomes readable whenever the host interrupts us.
#[derive(Debug)]
pub struct EventfdNotifier {
    kick: EventFd,
    call: AsyncFd<EventFd>,
}

impl EventfdNotifier {
    /// Create a notifier over a fresh eventfd pair.
    pub fn new() -> Result<Rc<Self>> {
        let kick = EventFd::new(libc::EFD_NONBLOCK).map_err(VirtnetError::EventfdSetup)?;
        let call = EventFd::new(libc::EFD_NONBLOCK).map_err(VirtnetError::EventfdSetup)?;
        Self::from_fds(kick, call)
    }

    /// Wrap an existing pair. `call` must be non-blocking.
    pub fn from_fds(kick: EventFd, call: EventFd) -> Result<Rc<Self>> {
        let call = AsyncFd::with_interest(call, Interest::READABLE)
            .map_err(VirtnetError::EventfdSetup)?;
        Ok(Rc::new(Self { kick, call }))
    }

    /// The fd the host reads kicks from (`VHOST_SET_VRING_KICK`).
    pub fn kick_fd(&self) -> RawFd {
        self.kick.as_raw_fd()
    }

    /// The fd the host writes calls to (`VHOST_SET_VRING_CALL`).
    pub fn call_fd(&self) -> RawFd {
        self.call.get_ref().as_raw_fd()
    }
}

impl Notifier for EventfdNotifier {
    fn notify(&self) {
        if let Err(e) = self.kick.write(1) {
            // The host side is gone; the completion loop will surface the
            // terminal error on its next wait.
            tracing::warn!(error = %e, "eventfd kick failed");
        }
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + '_>> {
        Box::pin(async move {
            loop {
                let mut guard = self.call.readable().await?;
                match guard.try_io(|fd| fd.get_ref().read().map(|_| ())) {
                    Ok(res) => return res,
                    Err(_would_block) => continue,
                }
            }
        })
    }
}

/// Notifier for an assigned virtio device.
///
/// `notify` runs the platform-specific kick; `wait` blocks on a single-shot
/// event that the device's interrupt handler fires via `wake_wait`.
pub struct AssignedNotifier {
    kick: Box<dyn Fn()>,
    event: Notify,
}

impl AssignedNotifier {
    pub fn new(kick: impl Fn() + 'static) -> Rc<Self> {
        Rc::new(Self {
            kick: Box::new(kick),
            event: Notify::new(),
        })
    }
}

impl Notifier for AssignedNotifier {
    fn notify(&self) {
        (self.kick)();
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + '_>> {
        Box::pin(async move {
            self.event.notified().await;
            Ok(())
        })
    }

    fn wake_wait(&self) {
        // notify_one stores a permit when nobody is waiting yet, so an
        // interrupt that beats the next wait is not lost.
        self.event.notify_one();
    }
}

impl core::fmt::Debug for AssignedNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AssignedNotifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eventfd_notify_accumulates_on_kick_fd() {
        let n = EventfdNotifier::new().expect("eventfd pair");
        n.notify();
        n.notify();
        // Play the host: the kick fd's counter holds both kicks.
        let mut counter = 0u64;
        let ret = unsafe {
            libc::read(
                n.kick_fd(),
                (&mut counter as *mut u64).cast(),
                core::mem::size_of::<u64>(),
            )
        };
        assert_eq!(ret, core::mem::size_of::<u64>() as isize);
        assert_eq!(counter, 2);
    }

    #[tokio::test]
    async fn eventfd_wait_resolves_after_call() {
        let n = EventfdNotifier::new().expect("eventfd pair");
        // Simulate the host writing the call eventfd.
        let ret = unsafe {
            libc::write(
                n.call_fd(),
                (&1u64 as *const u64).cast(),
                core::mem::size_of::<u64>(),
            )
        };
        assert_eq!(ret, core::mem::size_of::<u64>() as isize);
        n.wait().await.expect("wait resolves");
    }

    #[tokio::test]
    async fn assigned_wake_wait_is_not_lost_before_wait() {
        let fired = std::rc::Rc::new(core::cell::Cell::new(0));
        let n = AssignedNotifier::new({
            let fired = fired.clone();
            move || fired.set(fired.get() + 1)
        });
        n.notify();
        assert_eq!(fired.get(), 1);

        // Interrupt arrives before anyone waits; the permit must stick.
        n.wake_wait();
        n.wait().await.expect("wait resolves");
    }
}
