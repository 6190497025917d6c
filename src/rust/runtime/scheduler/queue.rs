// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Structures
//==============================================================================

/// Entry of a priority list: the small-integer index of the member and the arena slot that holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Member {
    pub index: u8,
    pub key: usize,
}

/// Per-priority list of tasks or background interrupts.
///
/// While `locked` is non-zero the member vector is never shrunk: deletions only mark the entry prunable and bump
/// `prunable`. Physical removal happens when the last lock is released.
#[derive(Debug, Default)]
pub struct PriorityList {
    members: Vec<Member>,
    locked: usize,
    prunable: usize,
    /// Queued messages for a task list or raised entries for a bg-int list.
    pending: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl PriorityList {
    /// Inserts a member keeping the list ordered by index.
    pub fn insert(&mut self, member: Member) {
        let position: usize = self.members.partition_point(|m| m.index < member.index);
        self.members.insert(position, member);
    }

    /// Unlinks the member stored in arena slot `key`.
    pub fn remove(&mut self, key: usize) -> Option<Member> {
        let position: usize = self.members.iter().position(|m| m.key == key)?;
        Some(self.members.remove(position))
    }

    pub fn contains_index(&self, index: u8) -> bool {
        self.members.iter().any(|m| m.index == index)
    }

    pub fn find_by_index(&self, index: u8) -> Option<Member> {
        self.members.iter().find(|m| m.index == index).copied()
    }

    /// Copies out the current members so that they may be visited while the list itself is mutated.
    pub fn snapshot(&self) -> Vec<Member> {
        self.members.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn lock(&mut self) {
        self.locked += 1;
    }

    /// Releases one lock. Returns `true` if the caller held the last lock and prunable members remain, in which case
    /// the caller must prune the list.
    pub fn unlock(&mut self) -> bool {
        if self.locked == 0 {
            panic!("unlock(): priority list is not locked");
        }
        let must_prune: bool = self.locked <= 1 && self.prunable > 0;
        self.locked -= 1;
        must_prune
    }

    /// Whether a lock other than the caller's own is held.
    pub fn is_locked_elsewhere(&self) -> bool {
        self.locked > 1
    }

    pub fn is_locked(&self) -> bool {
        self.locked > 0
    }

    pub fn mark_prunable(&mut self) {
        self.prunable += 1;
    }

    pub fn num_prunable(&self) -> usize {
        self.prunable
    }

    pub fn clear_prunable(&mut self) {
        self.prunable = 0;
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn add_pending(&mut self, count: usize) {
        self.pending += count;
    }

    pub fn sub_pending(&mut self, count: usize) {
        self.pending = match self.pending.checked_sub(count) {
            Some(pending) => pending,
            None => panic!("sub_pending(): pending count underflow"),
        };
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
