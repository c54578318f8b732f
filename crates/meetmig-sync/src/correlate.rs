//! Exact-id join between source records and destination records.

use std::collections::{BTreeMap, HashMap};

use meetmig_core::{DestinationRecord, SourceRecord};

#[derive(Debug, Default)]
pub struct Correlation<'a> {
    pub missing: Vec<&'a SourceRecord>,
    pub existing_pairs: Vec<(&'a SourceRecord, &'a DestinationRecord)>,
}

pub fn correlate<'a>(
    sources: &'a [SourceRecord],
    destinations: &'a [DestinationRecord],
) -> Correlation<'a> {
    correlate_with_prior(sources, destinations, &BTreeMap::new())
}

/// Like [`correlate`], but sources whose id is not embedded in any body may
/// still pair through `prior` (source id -> destination id from earlier runs),
/// provided that destination is still listed.
pub fn correlate_with_prior<'a>(
    sources: &'a [SourceRecord],
    destinations: &'a [DestinationRecord],
    prior: &BTreeMap<String, String>,
) -> Correlation<'a> {
    let mut by_embedded_id: HashMap<&str, &DestinationRecord> = HashMap::new();
    for destination in destinations {
        if let Some(source_id) = destination.embedded_source_id() {
            by_embedded_id.insert(source_id, destination);
        }
    }
    let by_destination_id: HashMap<&str, &DestinationRecord> = destinations
        .iter()
        .map(|d| (d.id.as_str(), d))
        .collect();

    let mut out = Correlation::default();
    for source in sources {
        let found = by_embedded_id.get(source.id.as_str()).copied().or_else(|| {
            prior
                .get(&source.id)
                .and_then(|dest_id| by_destination_id.get(dest_id.as_str()).copied())
        });
        match found {
            Some(destination) => out.existing_pairs.push((source, destination)),
            None => out.missing.push(source),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;

    const ID_A: &str = "11111111-1111-1111-1111-111111111111";
    const ID_B: &str = "22222222-2222-2222-2222-222222222222";

    fn src(id: &str) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            title: None,
            description: None,
            start: None,
            end: None,
            participants: vec![],
            linked: vec![],
            malformed_entries: 0,
            raw: JsonValue::Null,
        }
    }

    fn dst(id: &str, body: Option<String>) -> DestinationRecord {
        DestinationRecord {
            id: id.to_string(),
            title: None,
            body,
            start: None,
            end: None,
        }
    }

    #[test]
    fn embedded_ids_pair_exactly() {
        let sources = vec![src(ID_A), src(ID_B)];
        let destinations = vec![
            dst("900", Some(format!("Imported from Attio. Original ID: {ID_A}"))),
            dst("901", Some("hand written note".into())),
        ];
        let corr = correlate(&sources, &destinations);
        assert_eq!(corr.existing_pairs.len(), 1);
        assert_eq!(corr.existing_pairs[0].0.id, ID_A);
        assert_eq!(corr.existing_pairs[0].1.id, "900");
        assert_eq!(corr.missing.len(), 1);
        assert_eq!(corr.missing[0].id, ID_B);
    }

    #[test]
    fn last_destination_wins_on_duplicate_embedded_id() {
        let sources = vec![src(ID_A)];
        let destinations = vec![
            dst("900", Some(format!("Original ID: {ID_A}"))),
            dst("901", Some(format!("Original ID: {ID_A}"))),
        ];
        let corr = correlate(&sources, &destinations);
        assert_eq!(corr.existing_pairs[0].1.id, "901");
    }

    #[test]
    fn prior_mappings_pair_only_with_listed_destinations() {
        let sources = vec![src(ID_A), src(ID_B)];
        let destinations = vec![dst("900", Some("edited by hand".into()))];
        let prior = BTreeMap::from([
            (ID_A.to_string(), "900".to_string()),
            (ID_B.to_string(), "deleted-1".to_string()),
        ]);
        let corr = correlate_with_prior(&sources, &destinations, &prior);
        assert_eq!(corr.existing_pairs.len(), 1);
        assert_eq!(corr.existing_pairs[0].1.id, "900");
        assert_eq!(corr.missing[0].id, ID_B);
    }
}
