use serde::de::DeserializeOwned;

use ecf_core::{Aggregate, AggregateId, TenantId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::read_model::TenantStore;

/// Replay every stream of `aggregate_type` into `target`.
///
/// Existing entries are overwritten with the replayed state. Returns the
/// number of aggregates restored.
pub fn rebuild<A, K, S, T>(
    store: &S,
    aggregate_type: &str,
    target: &T,
    make_aggregate: impl Fn(AggregateId) -> A,
    key_of: impl Fn(&A) -> K,
) -> Result<usize, EventStoreError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
    S: EventStore + ?Sized,
    T: TenantStore<K, A> + ?Sized,
{
    let events = store.load_aggregate_type(aggregate_type)?;

    let mut restored = 0;
    let mut current: Option<(TenantId, AggregateId, A)> = None;

    for stored in &events {
        let same_stream = matches!(
            &current,
            Some((t, a, _)) if *t == stored.tenant_id && *a == stored.aggregate_id
        );
        if !same_stream {
            if let Some((tenant_id, _, aggregate)) = current.take() {
                target.upsert(tenant_id, key_of(&aggregate), aggregate);
                restored += 1;
            }
            let aggregate = make_aggregate(stored.aggregate_id);
            current = Some((stored.tenant_id, stored.aggregate_id, aggregate));
        }
        if let Some((_, _, aggregate)) = current.as_mut() {
            aggregate.apply(&decode::<A>(stored)?);
        }
    }

    if let Some((tenant_id, _, aggregate)) = current {
        target.upsert(tenant_id, key_of(&aggregate), aggregate);
        restored += 1;
    }

    Ok(restored)
}

fn decode<A>(stored: &StoredEvent) -> Result<A::Event, EventStoreError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        EventStoreError::Decode(format!(
            "{} #{} of {}: {e}",
            stored.event_type, stored.sequence_number, stored.aggregate_id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use ecf_events::InMemoryEventBus;
    use ecf_sequencing::{
        CreateRange, DocumentType, IssuingLocation, RangeCommand, RangeId, SequenceRange,
    };

    use crate::command_dispatcher::{CommandDispatcher, Dispatcher};
    use crate::event_store::InMemoryEventStore;
    use crate::read_model::InMemoryTenantStore;

    #[test]
    fn registry_is_restored_from_the_store() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let d: Dispatcher =
            CommandDispatcher::new(store.clone(), Arc::new(InMemoryEventBus::new()));
        let tenant_id = TenantId::new();

        for upper in [10, 20] {
            let range_id = RangeId::new(AggregateId::new());
            let cmd = RangeCommand::CreateRange(CreateRange {
                tenant_id,
                range_id,
                name: format!("block {upper}"),
                document_type: DocumentType::Consumer,
                location: IssuingLocation::new("001", "002").unwrap(),
                lower: upper - 9,
                upper,
                expires_on: NaiveDate::from_ymd_opt(2099, 1, 1),
                occurred_at: Utc::now(),
            });
            d.dispatch(tenant_id, range_id.0, "sequencing.range", &cmd, |id| {
                SequenceRange::empty(RangeId::new(id))
            })
            .unwrap();
        }

        let registry = InMemoryTenantStore::<RangeId, SequenceRange>::new();
        let restored = rebuild(
            &store,
            "sequencing.range",
            &registry,
            |id| SequenceRange::empty(RangeId::new(id)),
            |r| r.id_typed(),
        )
        .unwrap();

        assert_eq!(restored, 2);
        let mut uppers: Vec<u64> = registry.list(tenant_id).iter().map(|r| r.upper()).collect();
        uppers.sort();
        assert_eq!(uppers, vec![10, 20]);
    }
}
