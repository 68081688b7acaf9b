//! Exclusive lock for sequencing composite SMTP operations
//!
//! A minimal async mutual-exclusion primitive: `enter().await` suspends the
//! caller until exclusive access is granted, dropping the returned guard
//! releases it. Waiters are granted access in the order they called
//! [`Lock::enter`]; on release the lock is handed directly to the oldest
//! waiter, so a caller arriving in between cannot barge ahead of the queue.
//!
//! Re-entrant use is not supported: a task awaiting `enter()` while already
//! holding a guard deadlocks.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll, Waker},
};

/// A fair (FIFO) async exclusive lock
#[derive(Debug, Default)]
pub struct Lock {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    held: bool,
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    granted: bool,
    waker: Option<Waker>,
}

impl Lock {
    /// Creates an unlocked `Lock`
    pub fn new() -> Lock {
        Lock::default()
    }

    /// Waits for exclusive access
    ///
    /// Resolves once every earlier caller has released; the guard releases on
    /// drop, waking the oldest waiter.
    pub fn enter(&self) -> Enter<'_> {
        Enter { lock: self, id: None }
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("lock state poisoned");
        state.held = false;

        let mut waker = None;
        if let Some(front) = state.waiters.front_mut() {
            front.granted = true;
            waker = front.waker.take();
        }
        // a granted front waiter owns the lock until it consumes the grant
        state.held = state.waiters.front().map_or(false, |front| front.granted);
        drop(state);

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Future returned by [`Lock::enter`]
#[derive(Debug)]
pub struct Enter<'a> {
    lock: &'a Lock,
    id: Option<u64>,
}

impl<'a> Future for Enter<'a> {
    type Output = Guard<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut state = this.lock.state.lock().expect("lock state poisoned");

        match this.id {
            None => {
                if !state.held && state.waiters.is_empty() {
                    state.held = true;
                    drop(state);
                    return Poll::Ready(Guard { lock: this.lock });
                }

                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push_back(Waiter {
                    id,
                    granted: false,
                    waker: Some(cx.waker().clone()),
                });
                this.id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                let Some(pos) = state.waiters.iter().position(|waiter| waiter.id == id) else {
                    // entry vanished (spurious poll after completion)
                    return Poll::Pending;
                };

                if state.waiters[pos].granted {
                    // a grant always sits at the queue front
                    let _ = state.waiters.remove(pos);
                    this.id = None;
                    drop(state);
                    Poll::Ready(Guard { lock: this.lock })
                } else {
                    state.waiters[pos].waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for Enter<'_> {
    fn drop(&mut self) {
        let Some(id) = self.id else {
            return;
        };

        let mut state = self.lock.state.lock().expect("lock state poisoned");
        let Some(pos) = state.waiters.iter().position(|waiter| waiter.id == id) else {
            return;
        };

        let granted = state.waiters[pos].granted;
        let _ = state.waiters.remove(pos);
        drop(state);

        if granted {
            // the grant was never consumed, pass it on
            self.lock.release();
        }
    }
}

/// Exclusive access to the lock; releases on drop
#[derive(Debug)]
pub struct Guard<'a> {
    lock: &'a Lock,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::Lock;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn grants_are_fifo() {
        let lock = Arc::new(Lock::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = lock.enter().await;

        let mut handles = Vec::new();
        for i in 0..5usize {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = lock.enter().await;
                order.lock().unwrap().push(i);
            }));
            // let the task register before spawning the next waiter
            settle().await;
        }

        drop(guard);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn one_holder_at_a_time() {
        let lock = Arc::new(Lock::new());
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = lock.enter().await;
                let seen = *counter.lock().unwrap();
                tokio::task::yield_now().await;
                // with interleaving holders this write would lose updates
                *counter.lock().unwrap() = seen + 1;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 10);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_waiter_does_not_stall_the_queue() {
        let lock = Arc::new(Lock::new());
        let guard = lock.enter().await;

        let abandoned = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let _guard = lock.enter().await;
                std::future::pending::<()>().await;
            })
        };
        settle().await;
        abandoned.abort();
        settle().await;

        let reached = Arc::new(Mutex::new(false));
        let follower = {
            let lock = Arc::clone(&lock);
            let reached = Arc::clone(&reached);
            tokio::spawn(async move {
                let _guard = lock.enter().await;
                *reached.lock().unwrap() = true;
            })
        };
        settle().await;

        drop(guard);
        follower.await.unwrap();
        assert!(*reached.lock().unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn uncontended_enter_is_immediate() {
        let lock = Lock::new();
        {
            let _guard = lock.enter().await;
        }
        // release with no waiters leaves the lock reusable
        let _guard = lock.enter().await;
    }
}
