//! Bounded polling of resources that change status asynchronously on the server.
//!
//! Authorizations and orders move between statuses on their own after a challenge
//! is signaled or a CSR submitted. We poll them with a [`PollPolicy`]: a maximum
//! number of attempts and a [`Backoff`] between attempts.
//!
//! The numbers are operational tuning, not mandated by the protocol, so they are
//! configurable per polled resource through [`IssueConfig`].
//!
//! [`PollPolicy`]: struct.PollPolicy.html
//! [`Backoff`]: enum.Backoff.html
//! [`IssueConfig`]: struct.IssueConfig.html
use std::convert::TryFrom;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

/// Something that can wait. Tests substitute a fake that just records.
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

/// Delay between two poll attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay every time.
    Fixed(Duration),
    /// `initial`, then growing by `step` per attempt, never above `max`.
    Linear {
        initial: Duration,
        step: Duration,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the attempt with (zero based) index `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear { initial, step, max } => {
                let times = u32::try_from(attempt).unwrap_or(u32::MAX);
                match step.checked_mul(times).and_then(|d| initial.checked_add(d)) {
                    Some(grown) if grown <= max => grown,
                    _ => max,
                }
            }
        }
    }
}

/// How often, and how patiently, to poll one kind of resource.
#[derive(Clone)]
pub struct PollPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub sleeper: Rc<dyn Sleep>,
}

impl PollPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        PollPolicy {
            max_attempts,
            backoff,
            sleeper: Rc::new(ThreadSleep),
        }
    }

    /// Replace the sleeper, i.e. to not actually wait in tests.
    pub fn with_sleeper(mut self, sleeper: Rc<dyn Sleep>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run `attempt` until it returns `Some`, at most `max_attempts` times.
    ///
    /// There is no sleep before the first attempt, nor after the last one.
    pub(crate) fn poll<T, F>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        for n in 0..self.max_attempts {
            debug!("Poll {} (attempt {}/{})", what, n + 1, self.max_attempts);
            if let Some(done) = attempt()? {
                return Ok(done);
            }
            if n + 1 < self.max_attempts {
                self.sleeper.sleep(self.backoff.delay(n));
            }
        }
        Err(Error::Timeout {
            what: what.into(),
            attempts: self.max_attempts,
        })
    }
}

impl fmt::Debug for PollPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PollPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Polling configuration for [`Account::issue`].
///
/// [`Account::issue`]: struct.Account.html#method.issue
#[derive(Debug, Clone)]
pub struct IssueConfig {
    /// Waiting for an authorization to become `valid` after its challenge was signaled.
    pub authorization: PollPolicy,
    /// Waiting for the order to become `ready`, and `valid` after finalize.
    pub order: PollPolicy,
}

impl IssueConfig {
    /// Use the same sleeper for both policies.
    pub fn with_sleeper(self, sleeper: Rc<dyn Sleep>) -> Self {
        IssueConfig {
            authorization: self.authorization.with_sleeper(sleeper.clone()),
            order: self.order.with_sleeper(sleeper),
        }
    }
}

impl Default for IssueConfig {
    fn default() -> Self {
        IssueConfig {
            // DNS propagation is slow, give it a couple of minutes.
            authorization: PollPolicy::new(
                20,
                Backoff::Linear {
                    initial: Duration::from_secs(2),
                    step: Duration::from_secs(2),
                    max: Duration::from_secs(10),
                },
            ),
            order: PollPolicy::new(10, Backoff::Fixed(Duration::from_secs(2))),
        }
    }
}
