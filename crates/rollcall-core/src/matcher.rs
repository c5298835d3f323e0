//! Matching engine: nearest enrolled identity plus an acceptance threshold.

use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};

use crate::store::{EncodingStore, StoreError};
use crate::types::Embedding;

/// Outcome of comparing one query against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    /// The store is empty; no comparison was possible.
    NoKnownIdentities,
    /// Nearest identity is close enough to be the same person.
    Accepted { id: i64, label: String, distance: f32 },
    /// Nearest identity is too far away.
    Rejected { distance: f32 },
}

/// Strategy for deciding whether a query belongs to an enrolled identity.
pub trait Matcher {
    fn decide(&self, query: &Embedding, store: &EncodingStore) -> Result<MatchDecision, StoreError>;
}

/// Accepts the single nearest record when its L2 distance is strictly below
/// `max_distance`.
#[derive(Debug, Clone, Copy)]
pub struct NearestNeighborMatcher {
    pub max_distance: f32,
}

impl Matcher for NearestNeighborMatcher {
    fn decide(&self, query: &Embedding, store: &EncodingStore) -> Result<MatchDecision, StoreError> {
        let Some(nearest) = store.nearest(query)? else {
            return Ok(MatchDecision::NoKnownIdentities);
        };

        tracing::debug!(
            id = nearest.record.id,
            distance = nearest.distance,
            max_distance = self.max_distance,
            "nearest enrolled identity"
        );

        if nearest.distance < self.max_distance {
            Ok(MatchDecision::Accepted {
                id: nearest.record.id,
                label: nearest.record.label.clone(),
                distance: nearest.distance,
            })
        } else {
            Ok(MatchDecision::Rejected {
                distance: nearest.distance,
            })
        }
    }
}

/// Wall-clock source for attendance timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Greeting for a recognized person, bucketed by the hour.
pub fn greeting(label: &str, at: NaiveTime) -> String {
    if at.hour() < 12 {
        format!("Good Morning {label}")
    } else {
        format!("Good Evening {label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdentityRecord;

    fn store() -> EncodingStore {
        EncodingStore::from_records(vec![
            IdentityRecord {
                id: 7,
                label: "alice".into(),
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
            IdentityRecord {
                id: 8,
                label: "bob".into(),
                embedding: Embedding::new(vec![5.0, 5.0]),
            },
        ])
        .unwrap()
    }

    const MATCHER: NearestNeighborMatcher = NearestNeighborMatcher { max_distance: 0.45 };

    #[test]
    fn test_exact_self_match_accepted() {
        let d = MATCHER.decide(&Embedding::new(vec![5.0, 5.0]), &store()).unwrap();
        assert_eq!(
            d,
            MatchDecision::Accepted { id: 8, label: "bob".into(), distance: 0.0 }
        );
    }

    #[test]
    fn test_close_face_accepted() {
        let d = MATCHER.decide(&Embedding::new(vec![0.2, 0.0]), &store()).unwrap();
        assert!(matches!(d, MatchDecision::Accepted { id: 7, .. }));
    }

    #[test]
    fn test_far_face_rejected_with_distance() {
        let d = MATCHER.decide(&Embedding::new(vec![0.6, 0.0]), &store()).unwrap();
        match d {
            MatchDecision::Rejected { distance } => assert!((distance - 0.6).abs() < 1e-6),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let matcher = NearestNeighborMatcher { max_distance: 0.5 };
        let d = matcher.decide(&Embedding::new(vec![0.0, 0.5]), &store()).unwrap();
        assert_eq!(d, MatchDecision::Rejected { distance: 0.5 });
    }

    #[test]
    fn test_empty_store() {
        let d = MATCHER.decide(&Embedding::new(vec![0.0, 0.0]), &EncodingStore::new()).unwrap();
        assert_eq!(d, MatchDecision::NoKnownIdentities);
    }

    #[test]
    fn test_greeting_buckets() {
        let morning = NaiveTime::from_hms_opt(11, 59, 59).unwrap();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert_eq!(greeting("alice", morning), "Good Morning alice");
        assert_eq!(greeting("alice", noon), "Good Evening alice");
    }
}
