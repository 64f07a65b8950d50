use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Fixed delay before the single automatic reload after a failed ad load.
pub const LOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdState {
    Idle,
    Loading,
    Ready,
    Shown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowOutcome {
    /// An ad was ready and is now on screen; the reward is granted.
    Rewarded,
    /// No ad is available and none is loading, so the unlock is granted for free.
    FreeUnlock,
    /// An ad is loading (or already on screen); the caller should try again shortly.
    NotReady,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct GateStatus {
    pub state: AdState,
    pub retry_pending: bool,
}

/// Rewarded-ad lifecycle, owned by whoever serves unlock requests.
///
/// The ad SDK lives with the host: it asks to load, reports the load result, and reports
/// dismissal. The gate only decides what an unlock request gets.
#[derive(Debug)]
pub struct RewardGate {
    state: AdState,
    retry_at: Option<Instant>,
    retry_spent: bool,
}

impl RewardGate {
    pub fn new() -> Self {
        Self {
            state: AdState::Idle,
            retry_at: None,
            retry_spent: false,
        }
    }

    pub fn state(&self) -> AdState {
        self.state
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            state: self.state,
            retry_pending: self.retry_at.is_some(),
        }
    }

    /// `Idle -> Loading`. Returns `false` when a load is pending or an ad is already held.
    pub fn begin_load(&mut self) -> bool {
        if self.state != AdState::Idle {
            return false;
        }
        self.state = AdState::Loading;
        self.retry_at = None;
        self.retry_spent = false;
        debug!("reward ad load requested");
        true
    }

    pub fn load_finished(&mut self, ok: bool, now: Instant) {
        if self.state != AdState::Loading {
            warn!("ignoring ad load result in state {:?}", self.state);
            return;
        }
        if ok {
            self.state = AdState::Ready;
            self.retry_at = None;
            self.retry_spent = false;
            info!("reward ad ready");
            return;
        }

        self.state = AdState::Idle;
        if self.retry_spent {
            warn!("reward ad load failed again; giving up until the next request");
        } else {
            self.retry_at = Some(now + LOAD_RETRY_DELAY);
            self.retry_spent = true;
            warn!("reward ad load failed; retrying in {}s", LOAD_RETRY_DELAY.as_secs());
        }
    }

    /// Performs the pending retry once its delay has passed. Returns `true` if it started a load.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if now >= at && self.state == AdState::Idle => {
                self.retry_at = None;
                self.state = AdState::Loading;
                debug!("reward ad retry started");
                true
            }
            _ => false,
        }
    }

    pub fn show(&mut self) -> ShowOutcome {
        match self.state {
            AdState::Ready => {
                self.state = AdState::Shown;
                ShowOutcome::Rewarded
            }
            AdState::Idle => {
                self.begin_load();
                ShowOutcome::FreeUnlock
            }
            AdState::Loading | AdState::Shown => ShowOutcome::NotReady,
        }
    }

    /// `Shown -> Idle`, then immediately asks for the next ad.
    pub fn dismissed(&mut self) {
        if self.state != AdState::Shown {
            return;
        }
        self.state = AdState::Idle;
        self.begin_load();
    }
}

impl Default for RewardGate {
    fn default() -> Self {
        Self::new()
    }
}
