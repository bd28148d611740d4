// ⏱️ Scheduler - advances through the timeline on a logical clock
//
// Pure state machine: the caller supplies "now" in milliseconds (any epoch)
// and sleeps until next_deadline(). There is exactly one advance deadline and
// one quote deadline at any time, so rebuilds and view switches replace
// timers instead of stacking them.
//
// States:
// - Idle: timeline is the single Empty entry, nothing to advance
// - Advancing: cycling through entries
// - Suspended: display switched away, no deadlines armed

use crate::timeline::{SchedulePolicy, TimelineEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotePhase {
    /// Name, country, pins
    Info,

    /// The record's quote
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Advancing,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Moved to a new entry
    Advanced { index: usize, key: String },

    /// Current slide switched to its quote
    QuotePhaseStarted { index: usize },
}

/// Info → Quote micro-cycle scoped to the current slide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QuoteTimer {
    phase: QuotePhase,
    due: Option<u64>,
}

impl QuoteTimer {
    fn idle() -> Self {
        QuoteTimer {
            phase: QuotePhase::Info,
            due: None,
        }
    }
}

pub struct Scheduler {
    timeline: Vec<TimelineEntry>,
    current: usize,
    policy: SchedulePolicy,
    started: bool,
    suspended: bool,
    advance_at: Option<u64>,
    quote: QuoteTimer,
}

impl Scheduler {
    /// Create a scheduler positioned on the first entry. No timer runs until start().
    pub fn new(timeline: Vec<TimelineEntry>, policy: SchedulePolicy) -> Self {
        Scheduler {
            timeline: non_empty(timeline, &policy),
            current: 0,
            policy,
            started: false,
            suspended: false,
            advance_at: None,
            quote: QuoteTimer::idle(),
        }
    }

    /// Arm timers for the current entry
    pub fn start(&mut self, now: u64) {
        self.started = true;
        self.arm(now);
    }

    pub fn state(&self) -> SchedulerState {
        if self.suspended {
            SchedulerState::Suspended
        } else if self.is_idle() {
            SchedulerState::Idle
        } else {
            SchedulerState::Advancing
        }
    }

    pub fn current(&self) -> &TimelineEntry {
        &self.timeline[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn quote_phase(&self) -> QuotePhase {
        self.quote.phase
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Earliest armed deadline, if any
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.advance_at, self.quote.due) {
            (Some(a), Some(q)) => Some(a.min(q)),
            (a, q) => a.or(q),
        }
    }

    /// Fire every deadline that is due at `now`, in order.
    pub fn tick(&mut self, now: u64) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();

        while !self.suspended {
            let quote_due = self.quote.due.filter(|due| *due <= now);
            let advance_due = self.advance_at.filter(|due| *due <= now);

            match (quote_due, advance_due) {
                (Some(q), a) if a.map_or(true, |a| q < a) => {
                    self.quote = QuoteTimer {
                        phase: QuotePhase::Quote,
                        due: None,
                    };
                    events.push(SchedulerEvent::QuotePhaseStarted { index: self.current });
                }
                (_, Some(fired)) => {
                    self.current = (self.current + 1) % self.timeline.len();
                    // Re-arm from the fired deadline so late ticks do not drift
                    self.arm(fired);
                    tracing::debug!(index = self.current, key = self.current().key(), "advanced");
                    events.push(SchedulerEvent::Advanced {
                        index: self.current,
                        key: self.current().key().to_string(),
                    });
                }
                _ => break,
            }
        }

        events
    }

    /// Swap in a rebuilt timeline. Returns false when nothing changed.
    ///
    /// The current entry is re-homed by identity key: if it survives the
    /// rebuild the display stays on it, otherwise it restarts at index 0.
    /// An entry that survives unchanged keeps its running timers.
    pub fn replace_timeline(&mut self, timeline: Vec<TimelineEntry>, now: u64) -> bool {
        let timeline = non_empty(timeline, &self.policy);
        if timeline == self.timeline {
            return false;
        }

        let previous = self.current().clone();
        let rehomed = timeline.iter().position(|e| e.key() == previous.key());

        self.current = rehomed.unwrap_or(0);
        self.timeline = timeline;

        let unchanged = rehomed.is_some() && *self.current() == previous;
        if !unchanged {
            self.arm(now);
        }

        tracing::debug!(
            index = self.current,
            rehomed = rehomed.is_some(),
            entries = self.timeline.len(),
            "timeline replaced"
        );
        true
    }

    /// Stop all timers (display switched away)
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.advance_at = None;
        self.quote = QuoteTimer::idle();
    }

    /// Re-arm the current entry for its full duration; never advances by itself
    pub fn resume(&mut self, now: u64) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        self.arm(now);
    }

    fn is_idle(&self) -> bool {
        self.timeline.len() == 1 && self.timeline[0].is_empty_entry()
    }

    /// Cancel pending timers and schedule fresh ones for the current entry
    fn arm(&mut self, now: u64) {
        self.advance_at = None;
        self.quote = QuoteTimer::idle();

        if !self.started || self.suspended || self.is_idle() {
            return;
        }

        let entry = self.current();
        let duration = entry.duration_ms().max(1);
        let quote_due = entry
            .quote_for_phase()
            .map(|_| now + self.policy.quote_offset(duration));

        self.advance_at = Some(now + duration);
        self.quote.due = quote_due;
    }
}

fn non_empty(timeline: Vec<TimelineEntry>, policy: &SchedulePolicy) -> Vec<TimelineEntry> {
    if timeline.is_empty() {
        crate::timeline::build(&[], &crate::ranks::RankCatalog::default(), &Default::default(), policy)
    } else {
        timeline
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affiliate::AffiliateRecord;
    use crate::ranks::{RankCatalog, RankDefinition};
    use crate::timeline::{build, PinAssets};

    fn catalog() -> RankCatalog {
        RankCatalog::new(vec![
            RankDefinition::new("Bronze", "#cd7f32", ["#a", "#b", "#c"]).paired(),
            RankDefinition::new("Gold", "#ffd700", ["#d", "#e", "#f"]).extended().with_quote(),
        ])
        .unwrap()
    }

    fn record(id: &str, rank: &str) -> AffiliateRecord {
        AffiliateRecord::new(id.to_string(), format!("D{}", id), format!("Person {}", id), rank.to_string())
    }

    fn timeline_for(records: &[AffiliateRecord]) -> Vec<TimelineEntry> {
        build(records, &catalog(), &PinAssets::default(), &SchedulePolicy::default())
    }

    fn sample() -> Vec<AffiliateRecord> {
        vec![
            record("1", "Bronze"),
            record("2", "Bronze"),
            record("3", "Bronze"),
            record("4", "Gold").with_quote("Persevera"),
        ]
    }

    #[test]
    fn test_advances_after_each_duration_and_wraps() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);
        assert_eq!(scheduler.state(), SchedulerState::Advancing);
        assert_eq!(scheduler.next_deadline(), Some(4000));

        assert!(scheduler.tick(3999).is_empty());
        let events = scheduler.tick(4000);
        assert_eq!(events, vec![SchedulerEvent::Advanced { index: 1, key: "group-1-2".to_string() }]);

        // separator 4000 + bronze 8000 + bronze 8000 + separator 4000 = 24000
        scheduler.tick(24000);
        assert_eq!(scheduler.current().key(), "aff-4");

        // Gold slide lasts 12000, then wraps to the first entry
        scheduler.tick(36000);
        assert_eq!(scheduler.current_index(), 0);
    }

    #[test]
    fn test_late_tick_catches_up_without_drift() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);

        let events = scheduler.tick(12500);
        assert_eq!(events.len(), 2);
        assert_eq!(scheduler.current_index(), 2);
        assert_eq!(scheduler.next_deadline(), Some(20000));
    }

    #[test]
    fn test_idle_timeline_arms_no_timer() {
        let mut scheduler = Scheduler::new(timeline_for(&[]), SchedulePolicy::default());
        scheduler.start(0);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.next_deadline(), None);
        assert!(scheduler.tick(1_000_000).is_empty());
        assert!(scheduler.current().is_empty_entry());
    }

    #[test]
    fn test_empty_input_is_replaced_by_empty_entry() {
        let scheduler = Scheduler::new(Vec::new(), SchedulePolicy::default());
        assert_eq!(scheduler.timeline().len(), 1);
        assert!(scheduler.current().is_empty_entry());
    }

    #[test]
    fn test_quote_phase_fires_at_half_duration() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(24000);
        assert_eq!(scheduler.current().key(), "aff-4");
        assert_eq!(scheduler.quote_phase(), QuotePhase::Info);
        assert_eq!(scheduler.next_deadline(), Some(30000));

        let events = scheduler.tick(30000);
        assert_eq!(events, vec![SchedulerEvent::QuotePhaseStarted { index: 4 }]);
        assert_eq!(scheduler.quote_phase(), QuotePhase::Quote);

        // Leaving the slide resets to info
        scheduler.tick(36000);
        assert_eq!(scheduler.quote_phase(), QuotePhase::Info);
    }

    #[test]
    fn test_no_quote_text_stays_info() {
        let records = vec![record("4", "Gold")];
        let mut scheduler = Scheduler::new(timeline_for(&records), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(4000);
        assert_eq!(scheduler.current().key(), "aff-4");
        assert_eq!(scheduler.next_deadline(), Some(16000));

        scheduler.tick(15999);
        assert_eq!(scheduler.quote_phase(), QuotePhase::Info);
    }

    #[test]
    fn test_suspend_cancels_and_resume_restarts_full_duration() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(4000);

        scheduler.suspend();
        assert_eq!(scheduler.state(), SchedulerState::Suspended);
        assert_eq!(scheduler.next_deadline(), None);
        assert!(scheduler.tick(100_000).is_empty());
        assert_eq!(scheduler.current_index(), 1);

        scheduler.resume(100_000);
        assert_eq!(scheduler.current_index(), 1);
        assert_eq!(scheduler.next_deadline(), Some(108_000));
    }

    #[test]
    fn test_suspend_tears_down_quote_phase() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(30000);
        assert_eq!(scheduler.quote_phase(), QuotePhase::Quote);

        scheduler.suspend();
        assert_eq!(scheduler.quote_phase(), QuotePhase::Info);
    }

    #[test]
    fn test_rebuild_rehomes_current_entry_by_key() {
        let mut records = sample();
        let mut scheduler = Scheduler::new(timeline_for(&records), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(24000);
        assert_eq!(scheduler.current().key(), "aff-4");
        let deadline = scheduler.next_deadline();

        // Unrelated record removed: Gold slide moves from index 4 to index 3
        records.remove(2);
        assert!(scheduler.replace_timeline(timeline_for(&records), 25000));
        assert_eq!(scheduler.current().key(), "aff-4");
        assert_eq!(scheduler.current_index(), 3);
        assert_eq!(scheduler.next_deadline(), deadline);
    }

    #[test]
    fn test_rebuild_resets_when_current_entry_disappears() {
        let mut records = sample();
        let mut scheduler = Scheduler::new(timeline_for(&records), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(4000);
        assert_eq!(scheduler.current().key(), "group-1-2");

        records.remove(1);
        assert!(scheduler.replace_timeline(timeline_for(&records), 5000));
        assert_eq!(scheduler.current_index(), 0);
        assert_eq!(scheduler.next_deadline(), Some(9000));
    }

    #[test]
    fn test_identical_rebuild_is_a_no_op() {
        let records = sample();
        let mut scheduler = Scheduler::new(timeline_for(&records), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.tick(4000);

        assert!(!scheduler.replace_timeline(timeline_for(&records), 7000));
        assert_eq!(scheduler.next_deadline(), Some(12000));
    }

    #[test]
    fn test_rebuild_while_suspended_keeps_timers_off() {
        let mut scheduler = Scheduler::new(timeline_for(&sample()), SchedulePolicy::default());
        scheduler.start(0);
        scheduler.suspend();

        assert!(scheduler.replace_timeline(timeline_for(&[record("9", "Gold")]), 1000));
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.state(), SchedulerState::Suspended);
    }
}
