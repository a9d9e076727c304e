// ── Rate mode state machine ──
//
// Normal --activate--> Fast --deadline / settle / deactivate--> Normal
//
// Pure state: every transition takes `now` explicitly, so the machine is
// driven by the scheduler's clock and tested without timers.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::StreamConfig;

/// Whether a stream polls at its normal or fast period.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RateMode {
    #[default]
    Normal,
    Fast,
}

/// Result of an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The stream switched from Normal to Fast.
    Entered { deadline: Instant },
    /// The stream was already Fast; the deadline is now the later of the two.
    Extended { deadline: Instant },
}

impl Activation {
    pub fn deadline(self) -> Instant {
        match self {
            Self::Entered { deadline } | Self::Extended { deadline } => deadline,
        }
    }
}

/// Why a stream left fast mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Reversion {
    DeadlineElapsed,
    Settled,
    Manual,
}

/// Mode and deadline for one stream.
///
/// Invariant: `mode == Fast` iff `fast_deadline.is_some()`.
#[derive(Debug, Clone, Default)]
pub(crate) struct RateState {
    mode: RateMode,
    fast_deadline: Option<Instant>,
    /// Last time a fetched value differed from its predecessor while Fast.
    last_change: Option<Instant>,
}

impl RateState {
    pub(crate) fn mode(&self) -> RateMode {
        self.mode
    }

    pub(crate) fn fast_deadline(&self) -> Option<Instant> {
        self.fast_deadline
    }

    /// Enter fast mode for `duration` (already clamped), or extend it.
    pub(crate) fn activate(&mut self, now: Instant, duration: Duration) -> Activation {
        let requested = now + duration;
        match (self.mode, self.fast_deadline) {
            (RateMode::Fast, Some(current)) => {
                let deadline = current.max(requested);
                self.fast_deadline = Some(deadline);
                Activation::Extended { deadline }
            }
            _ => {
                self.mode = RateMode::Fast;
                self.fast_deadline = Some(requested);
                self.last_change = Some(now);
                Activation::Entered {
                    deadline: requested,
                }
            }
        }
    }

    /// True when fast mode is active and its deadline has passed.
    pub(crate) fn deadline_reached(&self, now: Instant) -> bool {
        self.mode == RateMode::Fast && self.fast_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Record the outcome of a successful fast-mode fetch.
    pub(crate) fn observe_fetch(&mut self, now: Instant, changed: bool) {
        if self.mode == RateMode::Fast && changed {
            self.last_change = Some(now);
        }
    }

    /// True when fast mode has seen no change for `settle_after`.
    pub(crate) fn settled(&self, now: Instant, settle_after: Duration) -> bool {
        self.mode == RateMode::Fast
            && self
                .last_change
                .is_some_and(|at| now.saturating_duration_since(at) >= settle_after)
    }

    /// Return to Normal. `false` if already Normal.
    pub(crate) fn revert(&mut self) -> bool {
        let was_fast = self.mode == RateMode::Fast;
        self.mode = RateMode::Normal;
        self.fast_deadline = None;
        self.last_change = None;
        was_fast
    }

    /// Decide whether a tick that started at `now` ends fast mode.
    ///
    /// The deadline always wins; settling is only considered after a
    /// tick that actually fetched.
    pub(crate) fn after_tick(
        &mut self,
        now: Instant,
        fetched: bool,
        settle_after: Option<Duration>,
    ) -> Option<Reversion> {
        if self.deadline_reached(now) {
            self.revert();
            return Some(Reversion::DeadlineElapsed);
        }
        if fetched && settle_after.is_some_and(|settle| self.settled(now, settle)) {
            self.revert();
            return Some(Reversion::Settled);
        }
        None
    }

    pub(crate) fn period(&self, config: &StreamConfig) -> Duration {
        match self.mode {
            RateMode::Normal => config.normal_period,
            RateMode::Fast => config.fast_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn starts_normal() {
        let state = RateState::default();
        assert_eq!(state.mode(), RateMode::Normal);
        assert_eq!(state.fast_deadline(), None);
        assert!(!state.deadline_reached(Instant::now()));
    }

    #[test]
    fn activation_sets_deadline_and_fast_period() {
        let t0 = Instant::now();
        let cfg = StreamConfig::new("devices");
        let mut state = RateState::default();

        let act = state.activate(t0, secs(120));

        assert_eq!(act, Activation::Entered { deadline: t0 + secs(120) });
        assert_eq!(state.mode(), RateMode::Fast);
        assert_eq!(state.period(&cfg), cfg.fast_period);
    }

    #[test]
    fn reactivation_extends_to_the_later_deadline() {
        let t0 = Instant::now();
        let mut state = RateState::default();
        state.activate(t0, secs(60));

        let act = state.activate(t0 + secs(10), secs(60));
        assert_eq!(act, Activation::Extended { deadline: t0 + secs(70) });

        // A shorter request never pulls the deadline in.
        let act = state.activate(t0 + secs(20), secs(30));
        assert_eq!(act.deadline(), t0 + secs(70));
        assert_eq!(state.fast_deadline(), Some(t0 + secs(70)));
    }

    #[test]
    fn deadline_reverts_on_the_tick_that_reaches_it() {
        let t0 = Instant::now();
        let cfg = StreamConfig::new("devices");
        let mut state = RateState::default();
        state.activate(t0, secs(120));

        assert_eq!(state.after_tick(t0 + secs(119), false, None), None);
        assert_eq!(
            state.after_tick(t0 + secs(120), true, None),
            Some(Reversion::DeadlineElapsed)
        );
        assert_eq!(state.mode(), RateMode::Normal);
        assert_eq!(state.fast_deadline(), None);
        assert_eq!(state.period(&cfg), cfg.normal_period);
    }

    #[test]
    fn settles_only_after_a_fetch_without_change() {
        let t0 = Instant::now();
        let mut state = RateState::default();
        state.activate(t0, secs(120));
        state.observe_fetch(t0 + secs(10), true);

        // Quiet for 19s: not yet.
        assert_eq!(state.after_tick(t0 + secs(29), true, Some(secs(20))), None);
        // Quiet for 20s but the tick was a cache hit: not considered.
        assert_eq!(state.after_tick(t0 + secs(30), false, Some(secs(20))), None);
        assert_eq!(
            state.after_tick(t0 + secs(30), true, Some(secs(20))),
            Some(Reversion::Settled)
        );
    }

    #[test]
    fn changes_postpone_settling() {
        let t0 = Instant::now();
        let mut state = RateState::default();
        state.activate(t0, secs(120));
        state.observe_fetch(t0 + secs(15), true);
        state.observe_fetch(t0 + secs(25), false);

        assert!(!state.settled(t0 + secs(30), secs(20)));
        assert!(state.settled(t0 + secs(35), secs(20)));
    }

    #[test]
    fn revert_reports_whether_anything_changed() {
        let mut state = RateState::default();
        assert!(!state.revert());
        state.activate(Instant::now(), secs(30));
        assert!(state.revert());
    }

    #[test]
    fn mode_names() {
        assert_eq!(RateMode::Fast.to_string(), "fast");
        assert_eq!("normal".parse::<RateMode>(), Ok(RateMode::Normal));
        assert_eq!(Reversion::DeadlineElapsed.to_string(), "deadline_elapsed");
    }
}
