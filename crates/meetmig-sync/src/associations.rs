//! Resolution of a source meeting's people, companies and deals to destination ids.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use meetmig_adapters::DestinationSystem;
use meetmig_core::{AssociationKind, EntityKind, ObjectType, SourceRecord};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAssociations {
    pub contact_ids: BTreeSet<String>,
    pub company_ids: BTreeSet<String>,
    pub deal_ids: BTreeSet<String>,
}

impl ResolvedAssociations {
    pub fn ids(&self, kind: AssociationKind) -> &BTreeSet<String> {
        match kind {
            AssociationKind::Contact => &self.contact_ids,
            AssociationKind::Company => &self.company_ids,
            AssociationKind::Deal => &self.deal_ids,
        }
    }

    fn ids_mut(&mut self, kind: AssociationKind) -> &mut BTreeSet<String> {
        match kind {
            AssociationKind::Contact => &mut self.contact_ids,
            AssociationKind::Company => &mut self.company_ids,
            AssociationKind::Deal => &mut self.deal_ids,
        }
    }

    pub fn total(&self) -> usize {
        self.contact_ids.len() + self.company_ids.len() + self.deal_ids.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LookupKey {
    object_type: ObjectType,
    property: String,
    value: String,
}

/// Lookup results for one run. Misses are cached too; failures are not.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<LookupKey, Option<String>>,
    hits: usize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

pub struct AssociationResolver<'a> {
    destination: &'a dyn DestinationSystem,
    cross_reference_property: &'a str,
    email_property: &'a str,
    call_delay: Duration,
}

impl<'a> AssociationResolver<'a> {
    pub fn new(
        destination: &'a dyn DestinationSystem,
        cross_reference_property: &'a str,
        email_property: &'a str,
        call_delay: Duration,
    ) -> Self {
        Self {
            destination,
            cross_reference_property,
            email_property,
            call_delay,
        }
    }

    pub async fn resolve(
        &self,
        record: &SourceRecord,
        cache: &mut ResolutionCache,
    ) -> ResolvedAssociations {
        let mut out = ResolvedAssociations::default();

        for participant in &record.participants {
            let found = if let Some(person_id) = &participant.person_record_id {
                self.lookup(ObjectType::Contacts, self.cross_reference_property, person_id, cache)
                    .await
            } else if let Some(email) = participant.valid_email() {
                self.lookup(ObjectType::Contacts, self.email_property, email, cache)
                    .await
            } else {
                None
            };
            if let Some(id) = found {
                out.contact_ids.insert(id);
            }
        }

        for linked in &record.linked {
            let kind = match linked.kind {
                EntityKind::Person => AssociationKind::Contact,
                EntityKind::Company => AssociationKind::Company,
                EntityKind::Deal => AssociationKind::Deal,
                EntityKind::Other => {
                    debug!(source_id = %record.id, slug = %linked.slug, "ignoring linked record");
                    continue;
                }
            };
            if let Some(id) = self
                .lookup(
                    kind.object_type(),
                    self.cross_reference_property,
                    &linked.record_id,
                    cache,
                )
                .await
            {
                out.ids_mut(kind).insert(id);
            }
        }

        out
    }

    async fn lookup(
        &self,
        object_type: ObjectType,
        property: &str,
        value: &str,
        cache: &mut ResolutionCache,
    ) -> Option<String> {
        let key = LookupKey {
            object_type,
            property: property.to_string(),
            value: if property == self.email_property {
                value.to_ascii_lowercase()
            } else {
                value.to_string()
            },
        };
        if let Some(cached) = cache.entries.get(&key) {
            cache.hits += 1;
            return cached.clone();
        }

        let result = self.destination.search_one(object_type, property, value).await;
        tokio::time::sleep(self.call_delay).await;
        match result {
            Ok(found) => {
                if found.is_none() {
                    debug!(%object_type, property, value, "no destination match");
                }
                cache.entries.insert(key, found.clone());
                found
            }
            Err(err) => {
                warn!(%object_type, property, value, error = %err, "lookup failed; skipping reference");
                None
            }
        }
    }
}
