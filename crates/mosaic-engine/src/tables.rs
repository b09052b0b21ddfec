//! Per-worker bookkeeping of received summaries.
//!
//! The precondition table keeps the latest post condition of every
//! predecessor; the violation-condition table keeps the history of error
//! conditions received from every successor. Both are owned by exactly one
//! worker and never shared.

use std::collections::BTreeMap;

use mosaic_ir::{Block, BlockId, PostConditionMessage};

/// What a worker knows about one predecessor.
#[derive(Debug, Clone)]
pub struct PreconditionEntry<S> {
    last_message: Option<PostConditionMessage>,
    state: Option<S>,
    is_sound: bool,
    ignore: bool,
}

impl<S> PreconditionEntry<S> {
    fn new(ignore: bool) -> Self {
        Self {
            last_message: None,
            state: None,
            is_sound: false,
            ignore,
        }
    }

    pub fn last_message(&self) -> Option<&PostConditionMessage> {
        self.last_message.as_ref()
    }

    /// Deserialized state of the last message; `None` when nothing reachable
    /// was received.
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// The last message added no information over its predecessor.
    pub fn is_sound(&self) -> bool {
        self.is_sound
    }

    /// Excluded from working-set seeding.
    pub fn ignore(&self) -> bool {
        self.ignore
    }

    fn contributes(&self) -> bool {
        !self.ignore && self.state.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PreconditionTable<S> {
    entries: BTreeMap<BlockId, PreconditionEntry<S>>,
}

impl<S> PreconditionTable<S> {
    /// One entry per predecessor; loop predecessors start ignored.
    pub fn for_block(block: &Block) -> Self {
        let entries = block
            .predecessors()
            .iter()
            .map(|p| (p.clone(), PreconditionEntry::new(block.is_loop_predecessor(p))))
            .collect();
        Self { entries }
    }

    pub fn get(&self, predecessor: &BlockId) -> Option<&PreconditionEntry<S>> {
        self.entries.get(predecessor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &PreconditionEntry<S>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mark_sound(&mut self, predecessor: &BlockId) {
        if let Some(entry) = self.entries.get_mut(predecessor) {
            entry.is_sound = true;
        }
    }

    /// Record a new, uncovered message. Resets soundness of the entry.
    pub fn update(
        &mut self,
        predecessor: &BlockId,
        message: PostConditionMessage,
        state: Option<S>,
        ignore: bool,
    ) {
        let entry = self
            .entries
            .entry(predecessor.clone())
            .or_insert_with(|| PreconditionEntry::new(ignore));
        entry.last_message = Some(message);
        entry.state = state;
        entry.is_sound = false;
        entry.ignore = ignore;
    }

    /// Every predecessor's last message was covered by its previous one.
    /// Vacuously true without predecessors.
    pub fn all_sound(&self) -> bool {
        self.entries.values().all(|e| e.is_sound)
    }

    /// States that take part in working-set seeding.
    pub fn active_states(&self) -> impl Iterator<Item = &S> {
        self.entries
            .values()
            .filter(|e| e.contributes())
            .filter_map(|e| e.state.as_ref())
    }

    /// Every forward (non-loop) predecessor has delivered a full-path summary.
    pub fn forward_full_path(&self, block: &Block) -> bool {
        self.entries
            .iter()
            .filter(|(id, _)| !block.is_loop_predecessor(id))
            .all(|(_, e)| e.last_message.as_ref().is_some_and(|m| m.full_path()))
    }
}

/// A violation condition received from a successor.
#[derive(Debug, Clone)]
pub struct ViolationConditionRecord<S> {
    condition: S,
    trail: Vec<BlockId>,
    forwarded: bool,
}

impl<S> ViolationConditionRecord<S> {
    pub fn condition(&self) -> &S {
        &self.condition
    }

    /// Blocks the condition passed through, origin first.
    pub fn trail(&self) -> &[BlockId] {
        &self.trail
    }

    /// A refined condition was sent upstream for this record.
    pub fn forwarded(&self) -> bool {
        self.forwarded
    }
}

/// Conditions received from one successor, oldest first.
#[derive(Debug, Clone)]
pub struct ViolationConditionEntry<S> {
    records: Vec<ViolationConditionRecord<S>>,
}

impl<S> ViolationConditionEntry<S> {
    pub fn latest(&self) -> Option<&S> {
        self.records.last().map(|r| &r.condition)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViolationConditionRecord<S>> {
        self.records.iter()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &S> {
        self.records.iter().map(|r| &r.condition)
    }
}

impl<S> Default for ViolationConditionEntry<S> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViolationConditionTable<S> {
    entries: BTreeMap<BlockId, ViolationConditionEntry<S>>,
}

impl<S> ViolationConditionTable<S> {
    pub fn for_block(block: &Block) -> Self {
        let entries = block
            .successors()
            .iter()
            .map(|s| (s.clone(), ViolationConditionEntry::default()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, successor: &BlockId) -> Option<&ViolationConditionEntry<S>> {
        self.entries.get(successor)
    }

    pub fn latest(&self, successor: &BlockId) -> Option<&S> {
        self.entries.get(successor).and_then(ViolationConditionEntry::latest)
    }

    /// Append a condition; returns its index in the successor's history.
    pub fn append(&mut self, successor: &BlockId, condition: S, trail: Vec<BlockId>) -> usize {
        let entry = self.entries.entry(successor.clone()).or_default();
        entry.records.push(ViolationConditionRecord {
            condition,
            trail,
            forwarded: false,
        });
        entry.records.len() - 1
    }

    pub fn mark_forwarded(&mut self, successor: &BlockId, index: usize) {
        if let Some(record) = self
            .entries
            .get_mut(successor)
            .and_then(|e| e.records.get_mut(index))
        {
            record.forwarded = true;
        }
    }

    /// Records not yet forwarded upstream, as `(successor, index, record)`.
    pub fn unforwarded(&self) -> impl Iterator<Item = (&BlockId, usize, &ViolationConditionRecord<S>)> {
        self.entries.iter().flat_map(|(id, e)| {
            e.records
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.forwarded)
                .map(move |(i, r)| (id, i, r))
        })
    }

    /// Number of conditions received over all successors.
    pub fn total(&self) -> usize {
        self.entries.values().map(ViolationConditionEntry::len).sum()
    }
}
