//! Floppy disk controllers
//!
//! A controller is a state machine driven by host register accesses and by
//! its own timers. Transitions never touch a scheduler directly: each
//! handler returns the [`Effects`] it wants applied (arm a timer, raise an
//! interrupt, raise a DMA request) and the owning machine applies them.

/// Intel 8271 command processor
pub mod i8271;

pub use i8271::{Command, Execution, Phase, I8271};

use crate::clock::Micros;

/// Timers owned by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdcTimer {
    /// Next byte of a data transfer is ready
    DataRequest,
    /// Command completion interrupt
    Complete,
}

/// One side effect requested by a controller transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Arm a timer to fire after a delay; re-arming replaces the deadline
    Arm(FdcTimer, Micros),
    /// Cancel a timer
    Disarm(FdcTimer),
    /// Interrupt line changed
    Irq(bool),
    /// DMA request line changed; `read` is set when data flows to the host
    Drq {
        /// Request asserted
        active: bool,
        /// Transfer direction is controller to host
        read: bool,
    },
}

/// Ordered list of effects produced by one transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects(Vec<Effect>);

impl Effects {
    /// Empty list
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an effect
    pub fn push(&mut self, effect: Effect) {
        self.0.push(effect);
    }

    /// Effects in the order they were requested
    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.0.iter()
    }

    /// Number of effects
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Nothing to apply?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final state of the interrupt line, if it changed
    pub fn irq(&self) -> Option<bool> {
        self.0.iter().rev().find_map(|e| match e {
            Effect::Irq(state) => Some(*state),
            _ => None,
        })
    }

    /// Final state of the DMA request line, if it changed
    pub fn drq(&self) -> Option<bool> {
        self.0.iter().rev().find_map(|e| match e {
            Effect::Drq { active, .. } => Some(*active),
            _ => None,
        })
    }

    /// Delay a timer is left armed with, if it is armed by this list
    pub fn armed(&self, timer: FdcTimer) -> Option<Micros> {
        self.0.iter().rev().find_map(|e| match e {
            Effect::Arm(t, delay) if *t == timer => Some(Some(*delay)),
            Effect::Disarm(t) if *t == timer => Some(None),
            _ => None,
        })?
    }

    /// Does any effect arm a timer?
    pub fn arms_timer(&self) -> bool {
        self.0.iter().any(|e| matches!(e, Effect::Arm(..)))
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effects_last_state_wins() {
        let mut effects = Effects::new();
        assert!(effects.is_empty());
        effects.push(Effect::Irq(true));
        effects.push(Effect::Arm(FdcTimer::Complete, 128));
        effects.push(Effect::Irq(false));
        effects.push(Effect::Disarm(FdcTimer::Complete));
        effects.push(Effect::Arm(FdcTimer::DataRequest, 64));

        assert_eq!(effects.len(), 5);
        assert_eq!(effects.irq(), Some(false));
        assert_eq!(effects.drq(), None);
        assert_eq!(effects.armed(FdcTimer::Complete), None);
        assert_eq!(effects.armed(FdcTimer::DataRequest), Some(64));
        assert!(effects.arms_timer());
    }
}
