//! Admission control for object transfers
//!
//! This crate provides the two limiters used while scheduling transfers:
//!
//! 1. **Admission gate** ([`Gate`]) - a fixed-capacity counting gate bounding how many transfers
//!    are in flight at the same time
//! 2. **Operations throttle** ([`OpsThrottle`]) - a token bucket limiting how many transfers are
//!    admitted per second
//!
//! Both limiters are plain values owned by whoever creates them. Nothing here is global, so two
//! concurrent replication runs never share a gate or a token bucket.
//!
//! # Admission Gate
//!
//! A [`Permit`] is held for the whole lifetime of one transfer and releases its slot when it is
//! dropped, whatever the outcome of the transfer was:
//!
//! ```rust,no_run
//! use std::num::NonZeroUsize;
//!
//! # async fn example() {
//! let gate = throttle::Gate::new(NonZeroUsize::new(20).unwrap());
//! let permit = gate.admit().await;
//! tokio::spawn(async move {
//!     let _permit = permit;
//!     // transfer one object here
//! });
//! # }
//! ```
//!
//! # Operations Throttle
//!
//! Tokens are replenished by a background task that is aborted when the throttle is dropped:
//!
//! ```rust,no_run
//! # async fn example() {
//! // at most 100 admissions per second
//! let throttle = throttle::OpsThrottle::new(100);
//! throttle.get_token().await;
//! # }
//! ```
//!
//! # Replenishment Strategy
//!
//! For rates of 10/s and above, `rate / 10` tokens are added every 100ms. Slower rates add a
//! single token every `1s / rate`, so a rate of 2/s means one admission every 500ms.

mod semaphore;

use std::num::NonZeroUsize;

/// Fixed-capacity admission gate
#[derive(Debug, Clone)]
pub struct Gate {
    sem: semaphore::Semaphore,
    capacity: NonZeroUsize,
}

/// One admitted slot of a [`Gate`], released on drop
#[derive(Debug)]
pub struct Permit {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl Gate {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            sem: semaphore::Semaphore::new(capacity.get()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Waits until a slot is free and takes it.
    pub async fn admit(&self) -> Permit {
        Permit {
            _permit: self.sem.acquire_owned().await,
        }
    }
}

/// Token bucket limiting admissions per second, 0 disables it
#[derive(Debug)]
pub struct OpsThrottle {
    sem: semaphore::Semaphore,
    replenish: Option<tokio::task::JoinHandle<()>>,
}

fn replenish_schedule(ops_per_second: usize) -> (usize, std::time::Duration) {
    if ops_per_second >= 10 {
        (ops_per_second / 10, std::time::Duration::from_millis(100))
    } else {
        let interval_ms = 1000 / ops_per_second as u64;
        (1, std::time::Duration::from_millis(interval_ms))
    }
}

impl OpsThrottle {
    /// Must be called from within a tokio runtime when `ops_per_second > 0`.
    pub fn new(ops_per_second: usize) -> Self {
        if ops_per_second == 0 {
            return Self {
                sem: semaphore::Semaphore::new(0),
                replenish: None,
            };
        }
        let (tokens, interval) = replenish_schedule(ops_per_second);
        let sem = semaphore::Semaphore::new(tokens);
        let replenish = {
            let sem = sem.clone();
            tokio::spawn(async move { sem.run_replenish_thread(tokens, interval).await })
        };
        tracing::debug!("ops throttle: {} token(s) every {:?}", tokens, interval);
        Self {
            sem,
            replenish: Some(replenish),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sem.is_enabled()
    }

    pub async fn get_token(&self) {
        self.sem.consume().await;
    }
}

impl Drop for OpsThrottle {
    fn drop(&mut self) {
        if let Some(handle) = self.replenish.take() {
            handle.abort();
        }
    }
}
