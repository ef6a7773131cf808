//! Chronological timeline events assembled during correlation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::finding::Citation;

/// A dated event on the case timeline.
///
/// Timelines are kept sorted: any list returned by the platform is
/// monotonically non-decreasing by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Event identifier.
    pub id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event category (meeting, payment, communication, filing, ...).
    pub event_type: String,
    /// What happened.
    pub description: String,
    /// Participating entities.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Citations backing the event.
    #[serde(default)]
    pub source_citations: Vec<Citation>,
}

impl TimelineEvent {
    /// Creates a timeline event.
    #[must_use]
    pub fn new(
        case_id: Uuid,
        timestamp: DateTime<Utc>,
        event_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            timestamp,
            event_type: event_type.into(),
            description: description.into(),
            participants: Vec::new(),
            source_citations: Vec::new(),
        }
    }
}

/// Sorts events chronologically with a stable id tie-break.
pub fn sort_chronologically(events: &mut [TimelineEvent]) {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sort_chronologically() {
        let case = Uuid::new_v4();
        let t = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).single().unwrap();
        let mut events = vec![
            TimelineEvent::new(case, t(20), "payment", "wire sent"),
            TimelineEvent::new(case, t(15), "meeting", "contract negotiation"),
            TimelineEvent::new(case, t(18), "communication", "follow-up email"),
        ];
        sort_chronologically(&mut events);
        let days: Vec<u32> = events
            .iter()
            .map(|e| {
                use chrono::Datelike;
                e.timestamp.day()
            })
            .collect();
        assert_eq!(days, vec![15, 18, 20]);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
