//! Virtual clock and timer queue
//!
//! All asynchronous hardware behaviour (index pulses, data requests, command
//! completion) is expressed as timers on one `VirtualClock`. Time is counted
//! in microseconds and only moves when the owner drains the queue, so timer
//! callbacks run strictly in deadline order. Timers with equal deadlines fire
//! in the order they were armed.

/// Microseconds of emulated time
pub type Micros = u64;

/// Handle to a timer allocated on a [`VirtualClock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

#[derive(Debug)]
struct TimerEntry<E> {
    event: E,
    /// (deadline, arm sequence) while armed
    armed: Option<(Micros, u64)>,
}

/// A single-threaded queue of one-shot timers sharing one time base
#[derive(Debug)]
pub struct VirtualClock<E> {
    now: Micros,
    sequence: u64,
    timers: Vec<TimerEntry<E>>,
}

impl<E: Copy> VirtualClock<E> {
    /// Create a clock at time zero with no timers
    pub fn new() -> Self {
        Self {
            now: 0,
            sequence: 0,
            timers: Vec::new(),
        }
    }

    /// Current emulated time
    pub fn now(&self) -> Micros {
        self.now
    }

    /// Allocate a disarmed timer that reports `event` when it expires
    pub fn add_timer(&mut self, event: E) -> TimerId {
        self.timers.push(TimerEntry { event, armed: None });
        TimerId(self.timers.len() - 1)
    }

    /// Arm (or re-arm) a timer to fire `delay` microseconds from now
    pub fn arm(&mut self, id: TimerId, delay: Micros) {
        self.sequence += 1;
        let deadline = self.now.saturating_add(delay);
        if let Some(timer) = self.timers.get_mut(id.0) {
            timer.armed = Some((deadline, self.sequence));
        }
    }

    /// Disarm a timer; a disarmed timer never fires
    pub fn disarm(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(id.0) {
            timer.armed = None;
        }
    }

    /// Disarm every timer on the clock
    pub fn disarm_all(&mut self) {
        for timer in &mut self.timers {
            timer.armed = None;
        }
    }

    /// Is the timer currently armed?
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.timers.get(id.0).is_some_and(|t| t.armed.is_some())
    }

    /// Deadline of an armed timer
    pub fn deadline(&self, id: TimerId) -> Option<Micros> {
        self.timers.get(id.0).and_then(|t| t.armed.map(|(d, _)| d))
    }

    /// Earliest deadline of any armed timer
    pub fn next_deadline(&self) -> Option<Micros> {
        self.timers
            .iter()
            .filter_map(|t| t.armed.map(|(d, _)| d))
            .min()
    }

    /// Pop the earliest timer due at or before `limit`.
    ///
    /// The timer is disarmed and the clock advances to its deadline.
    pub fn pop_due(&mut self, limit: Micros) -> Option<(TimerId, E)> {
        let (index, deadline) = self
            .timers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.armed.map(|armed| (i, armed)))
            .filter(|(_, (deadline, _))| *deadline <= limit)
            .min_by_key(|(_, armed)| *armed)
            .map(|(i, (deadline, _))| (i, deadline))?;

        let timer = &mut self.timers[index];
        timer.armed = None;
        self.now = self.now.max(deadline);
        Some((TimerId(index), timer.event))
    }

    /// Move time forward without firing anything
    pub fn advance_to(&mut self, time: Micros) {
        self.now = self.now.max(time);
    }
}

impl<E: Copy> Default for VirtualClock<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut clock = VirtualClock::new();
        let a = clock.add_timer('a');
        let b = clock.add_timer('b');

        clock.arm(a, 100);
        clock.arm(b, 50);

        assert_eq!(clock.pop_due(1000), Some((b, 'b')));
        assert_eq!(clock.now(), 50);
        assert_eq!(clock.pop_due(1000), Some((a, 'a')));
        assert_eq!(clock.now(), 100);
        assert_eq!(clock.pop_due(1000), None);
    }

    #[test]
    fn test_equal_deadlines_keep_arm_order() {
        let mut clock = VirtualClock::new();
        let a = clock.add_timer(1);
        let b = clock.add_timer(2);

        clock.arm(b, 10);
        clock.arm(a, 10);

        assert_eq!(clock.pop_due(10).map(|(_, e)| e), Some(2));
        assert_eq!(clock.pop_due(10).map(|(_, e)| e), Some(1));
    }

    #[test]
    fn test_limit_and_disarm() {
        let mut clock = VirtualClock::new();
        let a = clock.add_timer(());

        clock.arm(a, 64);
        assert!(clock.pop_due(63).is_none());
        assert_eq!(clock.next_deadline(), Some(64));

        clock.disarm(a);
        assert!(!clock.is_armed(a));
        assert!(clock.pop_due(1000).is_none());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut clock = VirtualClock::new();
        let a = clock.add_timer(());

        clock.arm(a, 500);
        clock.arm(a, 20);
        assert_eq!(clock.deadline(a), Some(20));

        clock.advance_to(10);
        clock.arm(a, 20);
        assert_eq!(clock.deadline(a), Some(30));
    }

    #[test]
    fn test_disarm_all() {
        let mut clock = VirtualClock::new();
        let a = clock.add_timer(0u8);
        let b = clock.add_timer(1u8);
        clock.arm(a, 1);
        clock.arm(b, 2);

        clock.disarm_all();
        assert_eq!(clock.next_deadline(), None);
    }
}
