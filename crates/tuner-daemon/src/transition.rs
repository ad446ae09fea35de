//! Mute-and-fade bookkeeping around station switches.
//!
//! The guard itself never touches the engine: the orchestrator asks it what
//! to do and applies the result, and fade steps come back into the command
//! loop as timer events carrying the fade token they were scheduled under.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadePlan {
    pub token: u64,
    pub steps: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GuardState {
    Open,
    Armed,
    Fading { token: u64, target: f32 },
}

pub struct TransitionGuard {
    state: GuardState,
    fade_token: u64,
    steps: u32,
    duration: Duration,
}

impl TransitionGuard {
    pub fn new(duration: Duration, steps: u32) -> Self {
        Self {
            state: GuardState::Open,
            fade_token: 0,
            steps: steps.max(1),
            duration,
        }
    }

    /// Mute before the previous item is torn down.  Returns false (nothing to
    /// do) when output is already muted and no fade has started.  Arming
    /// during a fade supersedes it.
    pub fn arm(&mut self) -> bool {
        if self.state == GuardState::Armed {
            return false;
        }
        self.fade_token += 1;
        self.state = GuardState::Armed;
        true
    }

    /// Start ramping to `target`.  Only valid while armed; a second call
    /// while a fade is running is ignored.
    pub fn begin_fade(&mut self, target: f32) -> Option<FadePlan> {
        if self.state != GuardState::Armed {
            return None;
        }
        self.fade_token += 1;
        self.state = GuardState::Fading {
            token: self.fade_token,
            target,
        };
        Some(FadePlan {
            token: self.fade_token,
            steps: self.steps,
            interval: self.duration / self.steps,
        })
    }

    /// Gain for step `index` (1-based) of the fade `token`, or None if that
    /// fade has been superseded.  The last step opens the guard.
    pub fn step(&mut self, token: u64, index: u32) -> Option<f32> {
        let GuardState::Fading { token: current, target } = self.state else {
            return None;
        };
        if current != token {
            return None;
        }
        if index >= self.steps {
            self.state = GuardState::Open;
            return Some(target);
        }
        Some(target * index as f32 / self.steps as f32)
    }

    /// A new volume arrived.  Returns true when the caller should apply it to
    /// the engine now; during a fade the new value becomes the fade target,
    /// and while armed it is picked up by the next fade.
    pub fn set_target(&mut self, value: f32) -> bool {
        match &mut self.state {
            GuardState::Open => true,
            GuardState::Armed => false,
            GuardState::Fading { target, .. } => {
                *target = value;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> TransitionGuard {
        TransitionGuard::new(Duration::from_millis(400), 4)
    }

    #[test]
    fn fade_ramps_linearly_then_opens() {
        let mut g = guard();
        assert!(g.arm());
        assert!(!g.arm());
        let plan = g.begin_fade(0.8).unwrap();
        assert_eq!(plan.steps, 4);
        assert_eq!(plan.interval, Duration::from_millis(100));
        assert!(g.begin_fade(0.8).is_none());

        assert_eq!(g.step(plan.token, 1), Some(0.2));
        assert_eq!(g.step(plan.token, 2), Some(0.4));
        assert_eq!(g.step(plan.token, 4), Some(0.8));
        assert_eq!(g.step(plan.token, 4), None);
        // Open again: volume changes apply directly.
        assert!(g.set_target(0.8));
    }

    #[test]
    fn rearming_supersedes_running_fade() {
        let mut g = guard();
        g.arm();
        let old = g.begin_fade(1.0).unwrap();
        assert!(g.arm());
        assert_eq!(g.step(old.token, 1), None);
        let new = g.begin_fade(1.0).unwrap();
        assert!(new.token > old.token);
        assert_eq!(g.step(new.token, 1), Some(0.25));
    }

    #[test]
    fn volume_during_fade_retargets() {
        let mut g = guard();
        assert!(g.set_target(0.5));
        g.arm();
        assert!(!g.set_target(0.5));
        let plan = g.begin_fade(1.0).unwrap();
        assert!(!g.set_target(0.4));
        assert_eq!(g.step(plan.token, 4), Some(0.4));
        assert!(g.set_target(0.9));
    }

    #[test]
    fn begin_fade_requires_arm() {
        let mut g = guard();
        assert!(g.begin_fade(1.0).is_none());
        g.arm();
        let plan = g.begin_fade(1.0).unwrap();
        g.step(plan.token, 4);
        assert!(g.begin_fade(1.0).is_none());
    }
}
