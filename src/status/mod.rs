//! # Status Module
//!
//! Maps the combined device state onto the tri-color status LED.
//!
//! Device status is derived, never stored: a pure function of the current
//! session state, the latest fix quality, the queue backlog, and the
//! uploader's failure count, recomputed whenever any of them changes. The
//! driver only remembers the last pattern it wrote so redundant hardware
//! writes are skipped.

use tracing::info;

use crate::gps::FixQuality;
use crate::net::SessionState;

/// Consecutive upload failures that escalate to the error pattern
pub const REPEATED_UPLOAD_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Red,
    Green,
    Blue,
    Amber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Solid,
    Blink,
}

/// One color/pattern combination written to the LED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub color: LedColor,
    pub pattern: LedPattern,
}

impl LedState {
    pub const fn new(color: LedColor, pattern: LedPattern) -> Self {
        Self { color, pattern }
    }
}

/// Everything the status derivation depends on
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs {
    pub session: SessionState,
    pub fix_quality: FixQuality,
    pub queue_len: usize,
    pub upload_failures: u32,
}

impl StatusInputs {
    /// Startup snapshot: nothing known yet
    pub fn initial() -> Self {
        Self {
            session: SessionState::Unregistered,
            fix_quality: FixQuality::Unknown,
            queue_len: 0,
            upload_failures: 0,
        }
    }
}

/// Derive the LED state from the combined inputs.
///
/// Priority order, highest first: session error or repeated upload
/// failure, missing/poor fix, backlog over the threshold, all-good, and
/// finally the transitional amber.
pub fn derive_status(
    inputs: &StatusInputs,
    min_fix: FixQuality,
    backlog_threshold: usize,
) -> LedState {
    if inputs.session == SessionState::DataSessionError
        || inputs.upload_failures >= REPEATED_UPLOAD_FAILURES
    {
        return LedState::new(LedColor::Red, LedPattern::Solid);
    }

    if inputs.fix_quality < min_fix {
        return LedState::new(LedColor::Blue, LedPattern::Blink);
    }

    if inputs.session == SessionState::DataSessionUp {
        if inputs.queue_len > backlog_threshold {
            return LedState::new(LedColor::Green, LedPattern::Blink);
        }
        return LedState::new(LedColor::Green, LedPattern::Solid);
    }

    LedState::new(LedColor::Amber, LedPattern::Solid)
}

/// Hardware primitive: set the LED to a color and pattern
pub trait StatusLed: Send {
    fn set(&mut self, state: LedState);
}

/// LED backend that reports transitions to the log.
///
/// Stands in for the pin-driving electronics on a bench setup.
pub struct TracingLed;

impl StatusLed for TracingLed {
    fn set(&mut self, state: LedState) {
        info!("status LED: {:?} {:?}", state.color, state.pattern);
    }
}

/// Recomputes the device status on every input change and writes the LED
/// only when the derived pattern actually changed.
pub struct StatusIndicator {
    backend: Box<dyn StatusLed>,
    min_fix: FixQuality,
    backlog_threshold: usize,
    last_written: Option<LedState>,
}

impl StatusIndicator {
    pub fn new(backend: Box<dyn StatusLed>, min_fix: FixQuality, backlog_threshold: usize) -> Self {
        Self {
            backend,
            min_fix,
            backlog_threshold,
            last_written: None,
        }
    }

    /// Recompute from fresh inputs; returns the pattern now showing
    pub fn update(&mut self, inputs: &StatusInputs) -> LedState {
        let state = derive_status(inputs, self.min_fix, self.backlog_threshold);
        if self.last_written != Some(state) {
            self.backend.set(state);
            self.last_written = Some(state);
        }
        state
    }

    /// The pattern currently on the hardware, if anything was written yet
    pub fn current(&self) -> Option<LedState> {
        self.last_written
    }
}
