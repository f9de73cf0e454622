//! Intervention manager: atomic get-and-delete for human overrides.
//!
//! Two kinds of overrides, both short-lived KVS entries:
//! - *interventions* (per CR), consumed by the next pipeline node that checks;
//! - *nudges* (per CR, per agent role), consumed between tool-use rounds.
//!
//! Polling uses the KVS atomic `get_del`, so each stored value is seen by
//! exactly one consumer exactly once. Setting overwrites any prior value.

use std::sync::Arc;

use crate::kvs::{Kvs, KvsError};

use super::keys;

#[derive(Clone)]
pub struct InterventionManager {
    kvs: Arc<dyn Kvs>,
}

impl InterventionManager {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Writes an intervention for a CR. Overwrites any existing one.
    pub async fn set_intervention(&self, cr_id: &str, instructions: &str) -> Result<(), KvsError> {
        self.kvs.set(&keys::intervention(cr_id), instructions).await
    }

    /// Atomically takes the intervention, if any.
    pub async fn poll_intervention(&self, cr_id: &str) -> Result<Option<String>, KvsError> {
        self.kvs.get_del(&keys::intervention(cr_id)).await
    }

    /// Sets an agent-role nudge (picked up between tool-use rounds).
    pub async fn set_nudge(&self, cr_id: &str, role: &str, message: &str) -> Result<(), KvsError> {
        self.kvs.set(&keys::nudge(cr_id, role), message).await
    }

    /// Atomically takes the nudge for one role, if any.
    pub async fn poll_nudge(&self, cr_id: &str, role: &str) -> Result<Option<String>, KvsError> {
        self.kvs.get_del(&keys::nudge(cr_id, role)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::MemoryKvs;

    fn manager() -> InterventionManager {
        InterventionManager::new(Arc::new(MemoryKvs::new()))
    }

    /// **Scenario**: an intervention is consumed exactly once.
    #[tokio::test]
    async fn intervention_consumed_once() {
        let mgr = manager();
        mgr.set_intervention("CR-1", "stop touching auth").await.unwrap();
        assert_eq!(
            mgr.poll_intervention("CR-1").await.unwrap().as_deref(),
            Some("stop touching auth")
        );
        assert_eq!(mgr.poll_intervention("CR-1").await.unwrap(), None);
    }

    /// **Scenario**: nudges are scoped per role; setting overwrites.
    #[tokio::test]
    async fn nudges_scoped_per_role_and_overwrite() {
        let mgr = manager();
        mgr.set_nudge("CR-1", "code_writer", "first").await.unwrap();
        mgr.set_nudge("CR-1", "code_writer", "second").await.unwrap();
        assert_eq!(mgr.poll_nudge("CR-1", "spec_writer").await.unwrap(), None);
        assert_eq!(
            mgr.poll_nudge("CR-1", "code_writer").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(mgr.poll_nudge("CR-1", "code_writer").await.unwrap(), None);
    }
}
