use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::decision::{DecisionContext, LlmDecision};

/// A decision waiting for a human.
#[derive(Debug, Clone, Serialize)]
pub struct PendingDecision {
    pub id: String,
    pub decision: LlmDecision,
    pub context: DecisionContext,
    pub registered_at: DateTime<Utc>,
    /// When silence turns into an implicit approval.
    pub deadline: DateTime<Utc>,
}

/// Session-scoped map of decision id to pending decision.
///
/// Removing an entry is what cancels its implicit-approval deadline, so
/// a decision can be resolved at most once.
pub struct PendingRegistry {
    entries: BTreeMap<String, PendingDecision>,
    timeout: Duration,
}

impl PendingRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            timeout,
        }
    }

    pub fn register(&mut self, decision: LlmDecision, context: DecisionContext, now: DateTime<Utc>) -> String {
        let id = loop {
            let candidate = new_id(now);
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        tracing::debug!(id = %id, action = %decision.action, "decision pending approval");
        self.entries.insert(
            id.clone(),
            PendingDecision {
                id: id.clone(),
                decision,
                context,
                registered_at: now,
                deadline: now + self.timeout,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&PendingDecision> {
        self.entries.get(id)
    }

    /// Remove and return `id`; `None` if it was never registered or already resolved.
    pub fn take(&mut self, id: &str) -> Option<PendingDecision> {
        self.entries.remove(id)
    }

    /// Remove and return every decision whose deadline has passed.
    pub fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<PendingDecision> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<&PendingDecision> {
        let mut pending: Vec<&PendingDecision> = self.entries.values().collect();
        pending.sort_by_key(|p| p.registered_at);
        pending
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn new_id(now: DateTime<Utc>) -> String {
    format!("dec-{}-{:06x}", now.timestamp_millis(), rand::random::<u32>() & 0x00ff_ffff)
}
