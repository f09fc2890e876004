//! Bounded-wait locking for shared state
//!
//! Every acquisition carries a timeout. Callers that cannot get the lock in
//! time skip their update and report why through [`LockOutcome`].

use core::cell::RefCell;
use core::future::Future;
use core::ops::DerefMut;

use alloc::collections::VecDeque;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, with_timeout};

/// Why a lock could not be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    /// Held by someone else and the caller asked not to wait
    Contention,
    /// Not released within the caller's timeout
    Timeout,
}

/// Result of a guarded update
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome<R> {
    Applied(R),
    SkippedContention,
    SkippedTimeout,
}

impl<R> LockOutcome<R> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn applied(self) -> Option<R> {
        match self {
            Self::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> LockOutcome<U> {
        match self {
            Self::Applied(value) => LockOutcome::Applied(f(value)),
            Self::SkippedContention => LockOutcome::SkippedContention,
            Self::SkippedTimeout => LockOutcome::SkippedTimeout,
        }
    }

    pub fn into_result(self) -> Result<R, LockFailure> {
        match self {
            Self::Applied(value) => Ok(value),
            Self::SkippedContention => Err(LockFailure::Contention),
            Self::SkippedTimeout => Err(LockFailure::Timeout),
        }
    }

    pub fn failure(&self) -> Option<LockFailure> {
        match self {
            Self::Applied(_) => None,
            Self::SkippedContention => Some(LockFailure::Contention),
            Self::SkippedTimeout => Some(LockFailure::Timeout),
        }
    }
}

impl<R> From<LockFailure> for LockOutcome<R> {
    fn from(failure: LockFailure) -> Self {
        match failure {
            LockFailure::Contention => Self::SkippedContention,
            LockFailure::Timeout => Self::SkippedTimeout,
        }
    }
}

/// A mutex that can only be acquired with a bounded wait
pub trait BoundedLock {
    type Target;
    type Guard<'a>: DerefMut<Target = Self::Target>
    where
        Self: 'a;

    /// A zero timeout is a single non-blocking attempt
    fn acquire(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Guard<'_>, LockFailure>>;
}

/// Async mutex with bounded acquisition
pub struct TimedMutex<T> {
    inner: Mutex<CriticalSectionRawMutex, T>,
}

impl<T> TimedMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> BoundedLock for TimedMutex<T> {
    type Target = T;
    type Guard<'a>
        = MutexGuard<'a, CriticalSectionRawMutex, T>
    where
        Self: 'a;

    async fn acquire(&self, timeout: Duration) -> Result<Self::Guard<'_>, LockFailure> {
        if let Ok(guard) = self.inner.try_lock() {
            return Ok(guard);
        }
        if timeout.as_ticks() == 0 {
            return Err(LockFailure::Contention);
        }
        with_timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| LockFailure::Timeout)
    }
}

/// [`TimedMutex`] that fails acquisitions on demand
///
/// Used to exercise the skipped-update paths (the simulator's `--flaky-lock`
/// mode and tests).
pub struct FaultInjectingLock<T> {
    inner: TimedMutex<T>,
    queued: RefCell<VecDeque<LockFailure>>,
    every: RefCell<Option<(u32, u32, LockFailure)>>,
}

impl<T> FaultInjectingLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: TimedMutex::new(value),
            queued: RefCell::new(VecDeque::new()),
            every: RefCell::new(None),
        }
    }

    /// Fail the next acquisition with `failure`
    pub fn fail_next(&self, failure: LockFailure) {
        self.queued.borrow_mut().push_back(failure);
    }

    /// Fail every `n`-th acquisition with `failure`
    pub fn fail_every(&self, n: u32, failure: LockFailure) {
        *self.every.borrow_mut() = (n > 0).then_some((n, 0, failure));
    }

    fn injected(&self) -> Option<LockFailure> {
        if let Some(failure) = self.queued.borrow_mut().pop_front() {
            return Some(failure);
        }
        let mut every = self.every.borrow_mut();
        let (n, seen, failure) = every.as_mut()?;
        *seen += 1;
        (*seen % *n == 0).then_some(*failure)
    }
}

impl<T> BoundedLock for FaultInjectingLock<T> {
    type Target = T;
    type Guard<'a>
        = MutexGuard<'a, CriticalSectionRawMutex, T>
    where
        Self: 'a;

    async fn acquire(&self, timeout: Duration) -> Result<Self::Guard<'_>, LockFailure> {
        if let Some(failure) = self.injected() {
            return Err(failure);
        }
        self.inner.acquire(timeout).await
    }
}
