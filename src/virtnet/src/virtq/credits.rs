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

//! Descriptor-credit flow control.
//!
//! A ring starts with one credit per descriptor slot. Submitters take one
//! credit per buffer before posting a chain and the chain's completion gives
//! them back, so the free list can never run dry mid-submission.

use tokio::sync::Semaphore;

/// Counting credits over the descriptor table.
#[derive(Debug)]
pub struct Credits {
    sem: Semaphore,
}

impl Credits {
    pub(crate) fn new(n: u32) -> Self {
        Self {
            sem: Semaphore::new(n as usize),
        }
    }

    /// Take `n` credits, suspending until they are available.
    pub async fn take(&self, n: u32) {
        match self.sem.acquire_many(n).await {
            Ok(permit) => permit.forget(),
            Err(_) => unreachable!("credit semaphore is never closed"),
        }
    }

    /// Take `n` credits only if they are available right now.
    pub fn try_take(&self, n: u32) -> bool {
        match self.sem.try_acquire_many(n) {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Give `n` credits back. Called by completions.
    pub fn release(&self, n: u32) {
        self.sem.add_permits(n as usize);
    }

    /// Credits available right now.
    pub fn available(&self) -> u32 {
        self.sem.available_permits() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_and_release_balance() {
        let credits = Credits::new(4);
        credits.take(3).await;
        assert_eq!(credits.available(), 1);
        assert!(credits.try_take(1));
        assert!(!credits.try_take(1));
        credits.release(4);
        assert_eq!(credits.available(), 4);
    }

    #[tokio::test]
    async fn take_suspends_until_released() {
        use std::rc::Rc;

        let credits = Rc::new(Credits::new(1));
        credits.take(1).await;

        let waiter = {
            let credits = Rc::clone(&credits);
            async move {
                credits.take(1).await;
            }
        };
        tokio::pin!(waiter);

        // Not ready while the credit is held.
        assert!(
            futures_poll_once(waiter.as_mut()).await.is_none(),
            "take() must suspend with zero credits"
        );

        credits.release(1);
        waiter.await;
    }

    /// Poll a future exactly once.
    async fn futures_poll_once<F: core::future::Future>(
        f: core::pin::Pin<&mut F>,
    ) -> Option<F::Output> {
        use core::task::Poll;
        let mut f = Some(f);
        core::future::poll_fn(move |cx| {
            let polled = f.take().map(|f| f.poll(cx));
            Poll::Ready(match polled {
                Some(Poll::Ready(v)) => Some(v),
                _ => None,
            })
        })
        .await
    }
}
