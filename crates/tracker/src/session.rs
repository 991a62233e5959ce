use std::sync::Mutex;

use data_model::JobId;

/// Where the tracked job id survives between runs. Only the tracker calls
/// into it.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<JobId>;
    fn save(&self, job_id: Option<&JobId>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionStore;

impl SessionStore for NoopSessionStore {
    fn load(&self) -> Option<JobId> {
        None
    }

    fn save(&self, _job_id: Option<&JobId>) {}
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<JobId>>,
}

impl MemorySessionStore {
    pub fn with_job(job_id: JobId) -> Self {
        Self {
            slot: Mutex::new(Some(job_id)),
        }
    }

    pub fn current(&self) -> Option<JobId> {
        self.load()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<JobId> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn save(&self, job_id: Option<&JobId>) {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = job_id.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySessionStore::default();
        assert!(store.load().is_none());
        store.save(Some(&JobId::from("job-1")));
        assert_eq!(store.current(), Some(JobId::from("job-1")));
        store.save(None);
        assert!(store.load().is_none());
        assert!(NoopSessionStore.load().is_none());
    }
}
