//! In-memory pipeline registry.
//!
//! Reads (status polling, listing) are concurrent. Writes require a
//! [`PipelineLease`], and at most one lease exists per pipeline id, so a
//! pipeline is only ever advanced by one task at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::PipelineState;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Pipeline {0} not found")]
    NotFound(Uuid),

    #[error("Pipeline {0} is already in flight")]
    InFlight(Uuid),

    #[error("Pipeline {0} already exists")]
    Duplicate(Uuid),
}

type LeaseSet = Arc<Mutex<HashSet<Uuid>>>;

/// Exclusive write access to one pipeline. Released on drop.
#[derive(Debug)]
pub struct PipelineLease {
    id: Uuid,
    leases: LeaseSet,
}

impl PipelineLease {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for PipelineLease {
    fn drop(&mut self) {
        match self.leases.lock() {
            Ok(mut held) => {
                held.remove(&self.id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.id);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct PipelineStore {
    states: Arc<RwLock<HashMap<Uuid, PipelineState>>>,
    leases: LeaseSet,
}

impl PipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_lease(&self, id: Uuid) -> Result<PipelineLease, StoreError> {
        let mut held = self.leases.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(id) {
            return Err(StoreError::InFlight(id));
        }
        Ok(PipelineLease {
            id,
            leases: Arc::clone(&self.leases),
        })
    }

    /// Insert a new pipeline and take its lease.
    pub async fn insert(&self, state: PipelineState) -> Result<PipelineLease, StoreError> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.id) {
            return Err(StoreError::Duplicate(state.id));
        }
        let lease = self.try_lease(state.id)?;
        states.insert(state.id, state);
        Ok(lease)
    }

    /// Take the lease for an existing pipeline.
    pub async fn claim(&self, id: Uuid) -> Result<PipelineLease, StoreError> {
        if !self.states.read().await.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.try_lease(id)
    }

    /// Mutate a leased pipeline and return the updated snapshot.
    pub async fn update<F>(&self, lease: &PipelineLease, apply: F) -> Result<PipelineState, StoreError>
    where
        F: FnOnce(&mut PipelineState),
    {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(&lease.id)
            .ok_or(StoreError::NotFound(lease.id))?;
        apply(state);
        Ok(state.clone())
    }

    pub async fn get(&self, id: Uuid) -> Option<PipelineState> {
        self.states.read().await.get(&id).cloned()
    }

    /// All pipelines, newest first.
    pub async fn list(&self) -> Vec<PipelineState> {
        let mut states: Vec<PipelineState> = self.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));
        states
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Drop terminal pipelines that finished more than `age` ago. Returns the
    /// number removed. Running or leased pipelines are kept.
    pub async fn evict_terminal_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut states = self.states.write().await;
        let held = self
            .leases
            .lock()
            .map(|h| h.clone())
            .unwrap_or_else(|p| p.into_inner().clone());
        let before = states.len();
        states.retain(|id, state| {
            let expired = state.is_terminal()
                && state.completed_at.map_or(false, |done| done < cutoff)
                && !held.contains(id);
            !expired
        });
        let evicted = before - states.len();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted finished pipelines past retention");
        }
        evicted
    }
}
