use std::collections::HashSet;

use personapool_common::PersonaStatus;

/// Five disjoint membership sets over persona IDs, one per pool status.
/// Every pooled persona appears in exactly one set, and that set matches
/// the record's `status` field.
#[derive(Debug, Default)]
pub(crate) struct PoolIndex {
    idle: HashSet<i64>,
    borrowed: HashSet<i64>,
    cooldown: HashSet<i64>,
    session_required: HashSet<i64>,
    suspended: HashSet<i64>,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, status: PersonaStatus) -> &mut HashSet<i64> {
        match status {
            PersonaStatus::Idle => &mut self.idle,
            PersonaStatus::Borrowed => &mut self.borrowed,
            PersonaStatus::Cooldown => &mut self.cooldown,
            PersonaStatus::SessionRequired => &mut self.session_required,
            PersonaStatus::Suspended => &mut self.suspended,
        }
    }

    pub fn set(&self, status: PersonaStatus) -> &HashSet<i64> {
        match status {
            PersonaStatus::Idle => &self.idle,
            PersonaStatus::Borrowed => &self.borrowed,
            PersonaStatus::Cooldown => &self.cooldown,
            PersonaStatus::SessionRequired => &self.session_required,
            PersonaStatus::Suspended => &self.suspended,
        }
    }

    pub fn insert(&mut self, id: i64, status: PersonaStatus) {
        self.remove_everywhere(id);
        self.set_mut(status).insert(id);
    }

    pub fn transition(&mut self, id: i64, from: PersonaStatus, to: PersonaStatus) {
        self.set_mut(from).remove(&id);
        self.set_mut(to).insert(id);
    }

    pub fn remove_everywhere(&mut self, id: i64) {
        self.idle.remove(&id);
        self.borrowed.remove(&id);
        self.cooldown.remove(&id);
        self.session_required.remove(&id);
        self.suspended.remove(&id);
    }

    pub fn all_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .idle
            .iter()
            .chain(&self.borrowed)
            .chain(&self.cooldown)
            .chain(&self.session_required)
            .chain(&self.suspended)
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.idle.clear();
        self.borrowed.clear();
        self.cooldown.clear();
        self.session_required.clear();
        self.suspended.clear();
    }

    /// Number of sets the ID currently belongs to. Anything other than one
    /// (for a pooled persona) is an invariant violation.
    #[cfg(test)]
    pub fn membership_count(&self, id: i64) -> usize {
        [
            &self.idle,
            &self.borrowed,
            &self.cooldown,
            &self.session_required,
            &self.suspended,
        ]
        .iter()
        .filter(|set| set.contains(&id))
        .count()
    }
}
