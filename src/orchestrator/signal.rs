use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Cooperative control signal, checked at each orchestration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    /// Hold before the next step; resume on clear.
    Pause,
    /// Finish the current task, then stop taking new ones.
    Drain,
    /// Stop as soon as the current step returns.
    Cancel,
}

impl From<u8> for Signal {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Pause,
            2 => Self::Drain,
            3 => Self::Cancel,
            _ => Self::None,
        }
    }
}

impl From<Signal> for u8 {
    fn from(s: Signal) -> Self {
        match s {
            Signal::None => 0,
            Signal::Pause => 1,
            Signal::Drain => 2,
            Signal::Cancel => 3,
        }
    }
}

/// Shared, lock-free signal slot. Cloning shares the slot.
#[derive(Clone, Default)]
pub struct SignalHandler {
    signal: Arc<AtomicU8>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, signal: Signal) {
        self.signal.store(signal.into(), Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.send(Signal::Pause);
    }

    pub fn drain(&self) {
        self.send(Signal::Drain);
    }

    pub fn cancel(&self) {
        self.send(Signal::Cancel);
    }

    pub fn clear(&self) {
        self.signal.store(0, Ordering::SeqCst);
    }

    pub fn check(&self) -> Signal {
        Signal::from(self.signal.load(Ordering::SeqCst))
    }

    /// Whether new tasks may still be dispatched.
    pub fn accepting_tasks(&self) -> bool {
        matches!(self.check(), Signal::None | Signal::Pause)
    }

    pub fn is_cancelled(&self) -> bool {
        self.check() == Signal::Cancel
    }
}
