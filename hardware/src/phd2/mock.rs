//! Recording [`Guider`] for tests.

use std::sync::Mutex;

use super::{Guider, Phd2Error, Phd2Result, SettleParams};

#[derive(Debug, Clone, PartialEq)]
pub enum GuiderCall {
    SetDecGuideMode(String),
    Start,
    Dither(f64),
    Stop,
}

#[derive(Default)]
pub struct MockGuider {
    calls: Mutex<Vec<GuiderCall>>,
    fail_start: bool,
}

impl MockGuider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail as if guiding never settled.
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<GuiderCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, call: GuiderCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl Guider for MockGuider {
    fn set_dec_guide_mode(&self, mode: &str) -> Phd2Result<()> {
        self.record(GuiderCall::SetDecGuideMode(mode.to_string()));
        Ok(())
    }

    fn start(&self, _settle: &SettleParams) -> Phd2Result<()> {
        self.record(GuiderCall::Start);
        if self.fail_start {
            return Err(Phd2Error::SettleFailed("star lost".to_string()));
        }
        Ok(())
    }

    fn dither(&self, pixels: f64, _settle: &SettleParams) -> Phd2Result<()> {
        self.record(GuiderCall::Dither(pixels));
        Ok(())
    }

    fn stop(&self) -> Phd2Result<()> {
        self.record(GuiderCall::Stop);
        Ok(())
    }
}
