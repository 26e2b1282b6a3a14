//! Latched store of asynchronous external signals
//!
//! Producers (the audio server event stream) set and reset signals; waiting
//! commands consume changes. Each signal keeps its current value and the
//! value last consumed. A signal has changed when the two differ, so a set
//! followed by a reset before anyone consumed it cancels out.

use std::fmt;

/// Signals published by the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The audio server control service is reachable
    ServerPresent,
    /// The audio server is running
    ServerStarted,
}

impl Signal {
    fn bit(self) -> u32 {
        match self {
            Signal::ServerPresent => 1 << 0,
            Signal::ServerStarted => 1 << 1,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::ServerPresent => write!(f, "server present"),
            Signal::ServerStarted => write!(f, "server started"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentStore {
    current: u32,
    consumed: u32,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a signal, making the transition observable.
    pub fn set(&mut self, signal: Signal) {
        self.current |= signal.bit();
    }

    /// Raise a signal without making the transition observable.
    pub fn set_stealth(&mut self, signal: Signal) {
        self.current |= signal.bit();
        self.consumed |= signal.bit();
    }

    /// Lower a signal, making the transition observable.
    pub fn reset(&mut self, signal: Signal) {
        self.current &= !signal.bit();
    }

    /// Lower a signal without making the transition observable.
    pub fn reset_stealth(&mut self, signal: Signal) {
        self.current &= !signal.bit();
        self.consumed &= !signal.bit();
    }

    pub fn get(&self, signal: Signal) -> bool {
        self.current & signal.bit() != 0
    }

    /// Whether the signal has an unconsumed transition.
    pub fn has_changed(&self, signal: Signal) -> bool {
        (self.current ^ self.consumed) & signal.bit() != 0
    }

    /// Consume a pending transition.
    ///
    /// Returns `None` when nothing changed since the last consumption,
    /// otherwise the current value. A second call without an intervening
    /// transition returns `None`.
    pub fn consume_change(&mut self, signal: Signal) -> Option<bool> {
        if !self.has_changed(signal) {
            return None;
        }
        self.ignore(signal);
        Some(self.get(signal))
    }

    /// Drop a pending transition without reading it. Used when the
    /// transition was caused by us and must not be observed again.
    pub fn ignore(&mut self, signal: Signal) {
        let bit = signal.bit();
        self.consumed = (self.consumed & !bit) | (self.current & bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_change_once_per_transition() {
        let mut env = EnvironmentStore::new();
        assert_eq!(env.consume_change(Signal::ServerStarted), None);

        env.set(Signal::ServerStarted);
        assert_eq!(env.consume_change(Signal::ServerStarted), Some(true));
        assert_eq!(env.consume_change(Signal::ServerStarted), None);

        env.reset(Signal::ServerStarted);
        assert_eq!(env.consume_change(Signal::ServerStarted), Some(false));
        assert_eq!(env.consume_change(Signal::ServerStarted), None);
    }

    #[test]
    fn test_set_then_reset_coalesces() {
        let mut env = EnvironmentStore::new();
        env.set(Signal::ServerStarted);
        env.reset(Signal::ServerStarted);
        assert!(!env.has_changed(Signal::ServerStarted));
        assert_eq!(env.consume_change(Signal::ServerStarted), None);
    }

    #[test]
    fn test_repeated_set_is_latched() {
        let mut env = EnvironmentStore::new();
        env.set(Signal::ServerPresent);
        env.set(Signal::ServerPresent);
        assert_eq!(env.consume_change(Signal::ServerPresent), Some(true));
        env.set(Signal::ServerPresent);
        assert_eq!(env.consume_change(Signal::ServerPresent), None);
    }

    #[test]
    fn test_stealth_transitions_are_invisible() {
        let mut env = EnvironmentStore::new();
        env.set_stealth(Signal::ServerStarted);
        assert!(env.get(Signal::ServerStarted));
        assert_eq!(env.consume_change(Signal::ServerStarted), None);

        env.reset_stealth(Signal::ServerStarted);
        assert!(!env.get(Signal::ServerStarted));
        assert_eq!(env.consume_change(Signal::ServerStarted), None);
    }

    #[test]
    fn test_reset_stealth_swallows_pending_set() {
        let mut env = EnvironmentStore::new();
        env.set(Signal::ServerStarted);
        env.reset_stealth(Signal::ServerStarted);
        assert_eq!(env.consume_change(Signal::ServerStarted), None);
    }

    #[test]
    fn test_ignore_clears_change_without_reading() {
        let mut env = EnvironmentStore::new();
        env.set(Signal::ServerPresent);
        env.ignore(Signal::ServerPresent);
        assert!(env.get(Signal::ServerPresent));
        assert_eq!(env.consume_change(Signal::ServerPresent), None);
    }

    #[test]
    fn test_signals_are_independent() {
        let mut env = EnvironmentStore::new();
        env.set(Signal::ServerPresent);
        assert!(!env.has_changed(Signal::ServerStarted));
        assert_eq!(env.consume_change(Signal::ServerPresent), Some(true));
    }
}
