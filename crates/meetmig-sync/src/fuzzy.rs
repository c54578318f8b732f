//! Title/date similarity matching for destinations that carry no embedded source id.

use chrono::{DateTime, Utc};
use meetmig_core::{DestinationRecord, SourceRecord};
use serde::Serialize;

use crate::config::MatcherConfig;

/// Transient pairing produced while matching; consumed by the caller.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatchCandidate<'a> {
    pub source: &'a SourceRecord,
    pub destination: &'a DestinationRecord,
    pub score: f64,
    pub title_score: f64,
    pub date_score: f64,
}

#[derive(Debug, Default)]
pub struct MatchOutcome<'a> {
    pub matches: Vec<MatchCandidate<'a>>,
    pub unmatched_source: Vec<&'a SourceRecord>,
    pub unmatched_destination: Vec<&'a DestinationRecord>,
}

pub struct FuzzyMatcher {
    config: MatcherConfig,
}

impl FuzzyMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn normalize_title(input: &str) -> String {
        input
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn title_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
        let a = Self::normalize_title(a.unwrap_or_default());
        let b = Self::normalize_title(b.unwrap_or_default());
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        if a.contains(&b) || b.contains(&a) {
            return 0.9;
        }

        let words_a: Vec<&str> = a.split(' ').collect();
        let words_b: Vec<&str> = b.split(' ').collect();
        let common = words_a
            .iter()
            .filter(|w| w.chars().count() > 2 && words_b.contains(*w))
            .count();
        let ratio = (2 * common) as f64 / (words_a.len() + words_b.len()) as f64;
        ratio.min(0.8)
    }

    pub fn date_similarity(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> f64 {
        let (Some(a), Some(b)) = (a, b) else {
            return 0.0;
        };
        let hours = (a - b).num_seconds().unsigned_abs() as f64 / 3600.0;
        if hours <= 12.0 {
            1.0
        } else if hours <= 24.0 {
            0.8
        } else if hours <= 48.0 {
            0.6
        } else if hours <= 168.0 {
            0.3
        } else {
            0.0
        }
    }

    pub fn score<'a>(
        &self,
        source: &'a SourceRecord,
        destination: &'a DestinationRecord,
    ) -> MatchCandidate<'a> {
        let title_score =
            Self::title_similarity(source.title.as_deref(), destination.title.as_deref());
        let date_score = Self::date_similarity(source.start, destination.start);
        MatchCandidate {
            source,
            destination,
            score: self.config.title_weight * title_score + self.config.date_weight * date_score,
            title_score,
            date_score,
        }
    }

    /// Greedy one-to-one matching in source order: each source takes its best
    /// unconsumed destination at or above the confidence floor. Ties keep the
    /// earliest destination.
    pub fn match_meetings<'a>(
        &self,
        sources: &[&'a SourceRecord],
        destinations: &[&'a DestinationRecord],
    ) -> MatchOutcome<'a> {
        let mut consumed = vec![false; destinations.len()];
        let mut outcome = MatchOutcome::default();

        for source in sources {
            let mut best: Option<(usize, MatchCandidate<'a>)> = None;
            for (idx, destination) in destinations.iter().enumerate() {
                if consumed[idx] {
                    continue;
                }
                let candidate = self.score(*source, *destination);
                if candidate.score < self.config.min_confidence {
                    continue;
                }
                if best
                    .as_ref()
                    .map_or(true, |(_, current)| candidate.score > current.score)
                {
                    best = Some((idx, candidate));
                }
            }

            match best {
                Some((idx, candidate)) => {
                    consumed[idx] = true;
                    outcome.matches.push(candidate);
                }
                None => outcome.unmatched_source.push(*source),
            }
        }

        outcome.unmatched_destination = destinations
            .iter()
            .zip(consumed)
            .filter(|(_, used)| !used)
            .map(|(d, _)| *d)
            .collect();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::Value as JsonValue;
    use std::collections::HashSet;

    fn at(hour_offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).single().unwrap() + Duration::hours(hour_offset)
    }

    fn src(id: &str, title: &str, hour_offset: i64) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            description: None,
            start: Some(at(hour_offset)),
            end: None,
            participants: vec![],
            linked: vec![],
            malformed_entries: 0,
            raw: JsonValue::Null,
        }
    }

    fn dst(id: &str, title: &str, hour_offset: i64) -> DestinationRecord {
        DestinationRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            body: None,
            start: Some(at(hour_offset)),
            end: None,
        }
    }

    #[test]
    fn normalization_collapses_case_punctuation_and_spacing() {
        assert_eq!(
            FuzzyMatcher::title_similarity(Some("Q1 Sync"), Some("q1   sync!!")),
            1.0
        );
    }

    #[test]
    fn substring_and_word_overlap_scores() {
        assert_eq!(
            FuzzyMatcher::title_similarity(Some("Weekly sync"), Some("Weekly sync with Acme")),
            0.9
        );
        // common = {"roadmap"}, 2*1 / (3+3)
        let overlap =
            FuzzyMatcher::title_similarity(Some("Roadmap review Q3"), Some("Q4 roadmap planning"));
        assert!((overlap - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(FuzzyMatcher::title_similarity(Some(""), Some("x")), 0.0);
        assert_eq!(FuzzyMatcher::title_similarity(None, Some("x")), 0.0);
    }

    #[test]
    fn word_overlap_is_capped() {
        let score = FuzzyMatcher::title_similarity(
            Some("acme renewal pricing call"),
            Some("pricing call acme renewal"),
        );
        assert_eq!(score, 0.8);
    }

    #[test]
    fn date_similarity_bands() {
        assert_eq!(FuzzyMatcher::date_similarity(Some(at(0)), Some(at(10))), 1.0);
        assert_eq!(FuzzyMatcher::date_similarity(Some(at(0)), Some(at(20))), 0.8);
        assert_eq!(FuzzyMatcher::date_similarity(Some(at(30)), Some(at(0))), 0.6);
        assert_eq!(FuzzyMatcher::date_similarity(Some(at(0)), Some(at(100))), 0.3);
        assert_eq!(FuzzyMatcher::date_similarity(Some(at(0)), Some(at(200))), 0.0);
        assert_eq!(FuzzyMatcher::date_similarity(None, Some(at(0))), 0.0);
    }

    #[test]
    fn below_threshold_pairs_stay_unmatched() {
        let matcher = FuzzyMatcher::new(MatcherConfig::default());
        let s = src("s1", "Board meeting", 0);
        let d = dst("d1", "Lunch", 500);
        let outcome = matcher.match_meetings(&[&s], &[&d]);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.unmatched_source.len(), 1);
        assert_eq!(outcome.unmatched_destination.len(), 1);
    }

    #[test]
    fn destinations_are_consumed_at_most_once() {
        let matcher = FuzzyMatcher::new(MatcherConfig::default());
        let s1 = src("s1", "Design review", 0);
        let s2 = src("s2", "Design review", 1);
        let d1 = dst("d1", "Design review", 0);
        let outcome = matcher.match_meetings(&[&s1, &s2], &[&d1]);

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].source.id, "s1");
        assert_eq!(outcome.unmatched_source[0].id, "s2");
        assert!(outcome.unmatched_destination.is_empty());

        let used: HashSet<&str> = outcome.matches.iter().map(|m| m.destination.id.as_str()).collect();
        assert_eq!(used.len(), outcome.matches.len());
    }

    #[test]
    fn best_match_is_independent_of_destination_order() {
        let matcher = FuzzyMatcher::new(MatcherConfig::default());
        let s = src("s1", "Pipeline review", 0);
        let exact = dst("d-exact", "Pipeline review", 2);
        let close = dst("d-close", "Pipeline review and hiring", 30);
        let far = dst("d-far", "Pipeline", 120);

        let forward = matcher.match_meetings(&[&s], &[&exact, &close, &far]);
        let reversed = matcher.match_meetings(&[&s], &[&far, &close, &exact]);
        assert_eq!(forward.matches[0].destination.id, "d-exact");
        assert_eq!(reversed.matches[0].destination.id, "d-exact");
        assert!((forward.matches[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weights_and_threshold_are_configurable() {
        let strict = FuzzyMatcher::new(MatcherConfig {
            title_weight: 0.5,
            date_weight: 0.5,
            min_confidence: 0.95,
        });
        let s = src("s1", "Pipeline review", 0);
        let d = dst("d1", "Pipeline review", 30);
        // 0.5 * 1.0 + 0.5 * 0.6 = 0.8
        assert!(strict.match_meetings(&[&s], &[&d]).matches.is_empty());
    }
}
