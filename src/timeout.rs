//! Supervision timers of the Security Manager
//!
//! The Security Manager protocol has a single timeout. Whenever a device sends a PDU that
//! requires a response it starts a thirty second timer, and when the timer expires the procedure
//! has failed and no more Security Manager traffic is allowed on the connection. Nothing is sent
//! to the peer when this happens, the connection just goes silent until it is re-established.
//!
//! This crate is `no_std` so it cannot read a clock on its own. The timers here work off
//! monotonic timestamps provided by the caller, any measure of time since some fixed point (such
//! as system boot) works as long as every timestamp comes from the same clock.

use core::time::Duration;

/// A monotonic timestamp provided by the platform
///
/// The value is the time elapsed since an arbitrary fixed point, every timestamp given to the
/// Security Manager must use the same fixed point and the same clock.
pub type Instant = Duration;

/// The Security Manager protocol timeout
///
/// Defined in the Bluetooth Specification (v5.0 | Vol 3, Part H, section 3.4).
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// The timer supervising one pairing procedure
///
/// The timer is restarted on every PDU that expects a response from the peer and cleared while
/// pairing waits on something local (user input, encryption). Once [`expired`](Self::expired)
/// reports true the owning context must drop all further Security Manager traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairingTimer {
    deadline: Option<Instant>,
}

impl PairingTimer {
    pub fn new() -> Self {
        PairingTimer::default()
    }

    /// Start or restart the timeout
    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + PAIRING_TIMEOUT);
    }

    /// Clear the timeout
    ///
    /// Used when the procedure is waiting on this device instead of the peer.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Check whether the timeout has elapsed
    pub fn expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Whether the timer is counting down
    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }
}

/// One-shot retry for a failed security elevation
///
/// When re-encrypting a connection with stored bonding keys fails (the peer may have deleted its
/// copy of the bond), the recovery is to pair again from scratch. This guards against looping,
/// the retry is allowed exactly once per connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityElevationRetry {
    used: bool,
}

impl SecurityElevationRetry {
    pub fn new() -> Self {
        SecurityElevationRetry::default()
    }

    /// Check if a retry is allowed, consuming the attempt
    pub fn try_retry(&mut self) -> bool {
        !core::mem::replace(&mut self.used, true)
    }

    /// Reset the retry allowance for a new connection
    pub fn reset(&mut self) {
        self.used = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expires_thirty_seconds_after_restart() {
        let mut timer = PairingTimer::new();

        assert!(!timer.expired(Duration::from_secs(1_000_000)));

        timer.restart(Duration::from_secs(100));

        assert!(timer.is_running());
        assert!(!timer.expired(Duration::from_secs(129)));
        assert!(timer.expired(Duration::from_secs(130)));
    }

    #[test]
    fn restart_pushes_the_deadline_out() {
        let mut timer = PairingTimer::new();

        timer.restart(Duration::from_secs(100));

        timer.restart(Duration::from_secs(120));

        assert!(!timer.expired(Duration::from_secs(149)));
        assert!(timer.expired(Duration::from_secs(150)));
    }

    #[test]
    fn cleared_timer_never_expires() {
        let mut timer = PairingTimer::new();

        timer.restart(Duration::from_secs(0));

        timer.clear();

        assert!(!timer.is_running());
        assert!(!timer.expired(Duration::from_secs(10_000)));
    }

    #[test]
    fn elevation_retry_is_one_shot() {
        let mut retry = SecurityElevationRetry::new();

        assert!(retry.try_retry());
        assert!(!retry.try_retry());

        retry.reset();

        assert!(retry.try_retry());
    }
}
