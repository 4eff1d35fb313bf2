//! In-memory lambda persistence: records, schedules and monitoring history.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::PlatformError;
use crate::primitives::{LambdaRecord, MonitoringEvent, ScheduledEvent};
use crate::types::{LambdaId, UserId};

#[derive(Default)]
struct Records {
    by_id: HashMap<LambdaId, LambdaRecord>,
    by_name: HashMap<(UserId, String), LambdaId>,
}

#[derive(Default)]
pub struct LambdaRepository {
    records: RwLock<Records>,
    schedules: RwLock<HashMap<LambdaId, BTreeMap<String, ScheduledEvent>>>,
    monitoring: RwLock<HashMap<LambdaId, Vec<MonitoringEvent>>>,
}

impl LambdaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a new record. Names are unique per owner.
    pub fn insert(&self, record: LambdaRecord) -> Result<(), PlatformError> {
        let mut records = self.records.write();
        let name_key = (record.owner, record.name.clone());
        if records.by_name.contains_key(&name_key) {
            return Err(PlatformError::DuplicateLambda {
                owner: record.owner.to_string(),
                name: record.name,
            });
        }
        records.by_name.insert(name_key, record.id);
        records.by_id.insert(record.id, record);
        Ok(())
    }

    /// Replaces an existing record. Name and owner cannot change.
    pub fn update(&self, record: LambdaRecord) -> Result<(), PlatformError> {
        let mut records = self.records.write();
        let current = records
            .by_id
            .get(&record.id)
            .ok_or_else(|| PlatformError::LambdaNotFound(record.id.to_string()))?;
        if current.owner != record.owner || current.name != record.name {
            return Err(PlatformError::InvalidRequest(
                "lambda name and owner are fixed at creation".to_string(),
            ));
        }
        records.by_id.insert(record.id, record);
        Ok(())
    }

    /// Removes a record with its schedules and monitoring history.
    pub fn remove(&self, id: &LambdaId) -> Option<LambdaRecord> {
        let removed = {
            let mut records = self.records.write();
            let record = records.by_id.remove(id)?;
            records.by_name.remove(&(record.owner, record.name.clone()));
            record
        };
        self.schedules.write().remove(id);
        self.monitoring.write().remove(id);
        Some(removed)
    }

    pub fn get(&self, id: &LambdaId) -> Option<LambdaRecord> {
        self.records.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &LambdaId) -> bool {
        self.records.read().by_id.contains_key(id)
    }

    pub fn find(&self, owner: &UserId, name: &str) -> Option<LambdaRecord> {
        let records = self.records.read();
        let id = records.by_name.get(&(*owner, name.to_string()))?;
        records.by_id.get(id).cloned()
    }

    /// All lambdas of `owner`, ordered by name.
    pub fn of_owner(&self, owner: &UserId) -> Vec<LambdaRecord> {
        let mut found: Vec<LambdaRecord> = self
            .records
            .read()
            .by_id
            .values()
            .filter(|r| r.owner == *owner)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    // --- Schedules -----------------------------------------------------------

    /// Inserts or replaces the event with the same name.
    pub fn upsert_schedule(&self, lambda: LambdaId, event: ScheduledEvent) {
        self.schedules
            .write()
            .entry(lambda)
            .or_default()
            .insert(event.name.clone(), event);
    }

    pub fn schedule(&self, lambda: &LambdaId, name: &str) -> Option<ScheduledEvent> {
        self.schedules.read().get(lambda)?.get(name).cloned()
    }

    pub fn schedules(&self, lambda: &LambdaId) -> Vec<ScheduledEvent> {
        self.schedules
            .read()
            .get(lambda)
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }

    // --- Monitoring ----------------------------------------------------------

    /// Appends an event unless the lambda has been removed meanwhile.
    pub fn record_event(&self, event: MonitoringEvent) {
        if !self.contains(&event.lambda) {
            tracing::debug!(lambda = %event.lambda, "dropping monitoring event for removed lambda");
            return;
        }
        self.monitoring.write().entry(event.lambda).or_default().push(event);
    }

    pub fn events(&self, lambda: &LambdaId) -> Vec<MonitoringEvent> {
        self.monitoring.read().get(lambda).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::OutcomeClass;
    use crate::types::KeyId;

    fn record(owner: UserId, name: &str) -> LambdaRecord {
        LambdaRecord {
            id: LambdaId::new(),
            name: name.to_string(),
            owner,
            runtime: "native".into(),
            is_async: false,
            binary: vec![1, 2, 3],
            image: None,
            version: 1,
        }
    }

    #[test]
    fn names_are_unique_per_owner() {
        let repo = LambdaRepository::new();
        let alice = UserId::new();
        let bob = UserId::new();
        repo.insert(record(alice, "resize")).unwrap();
        repo.insert(record(bob, "resize")).unwrap();
        assert!(matches!(
            repo.insert(record(alice, "resize")),
            Err(PlatformError::DuplicateLambda { .. })
        ));
        assert_eq!(repo.of_owner(&alice).len(), 1);
    }

    #[test]
    fn update_keeps_identity_fixed() {
        let repo = LambdaRepository::new();
        let owner = UserId::new();
        let original = record(owner, "resize");
        repo.insert(original.clone()).unwrap();

        let mut renamed = original.clone();
        renamed.name = "shrink".into();
        assert!(matches!(repo.update(renamed), Err(PlatformError::InvalidRequest(_))));

        let mut changed = original.clone();
        changed.is_async = true;
        changed.version = 2;
        repo.update(changed).unwrap();
        assert!(repo.find(&owner, "resize").unwrap().is_async);
    }

    #[test]
    fn schedules_upsert_by_name_and_vanish_with_the_lambda() {
        let repo = LambdaRepository::new();
        let rec = record(UserId::new(), "report");
        let id = rec.id;
        repo.insert(rec).unwrap();
        let event = |cron: &str| ScheduledEvent {
            name: "nightly".into(),
            cron_expression: cron.into(),
            parameters: "{}".into(),
            key: KeyId::new(),
        };
        repo.upsert_schedule(id, event("0 0 * * *"));
        repo.upsert_schedule(id, event("0 1 * * *"));
        assert_eq!(repo.schedules(&id).len(), 1);
        assert_eq!(repo.schedule(&id, "nightly").unwrap().cron_expression, "0 1 * * *");

        repo.remove(&id).unwrap();
        assert!(repo.schedules(&id).is_empty());
        assert!(repo.find(&UserId::new(), "report").is_none());
    }

    #[test]
    fn monitoring_for_removed_lambda_is_dropped() {
        let repo = LambdaRepository::new();
        let rec = record(UserId::new(), "report");
        let id = rec.id;
        let event = MonitoringEvent {
            lambda: id,
            key: None,
            started_at_ms: 0,
            duration_ms: 1,
            outcome: OutcomeClass::Success,
            asynchronous: false,
        };
        repo.record_event(event.clone());
        assert!(repo.events(&id).is_empty());
        repo.insert(rec).unwrap();
        repo.record_event(event);
        assert_eq!(repo.events(&id).len(), 1);
    }
}
