use chrono::{DateTime, Utc};

/// A source of the current time.
///
/// Expiry decisions (session idle timeout, token lifetime, reset-token expiry)
/// compare stored timestamps against this clock, so tests can substitute a
/// controllable implementation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
