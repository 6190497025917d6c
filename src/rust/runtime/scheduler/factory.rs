// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::{
        MAX_TASK_INDEX,
        NUM_PRIORITIES,
    },
    scheduler::{
        queue::Member,
        scheduler::{
            Entity,
            ListKind,
            Scheduler,
        },
        task::{
            Priority,
            TaskHandler,
            TaskId,
            TaskKind,
        },
    },
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Dynamic task factory.
impl Scheduler {
    /// Creates a task, a bg-int, or a coupled pair at `priority`, all served by `handler`.
    ///
    /// The new entity gets the smallest index not used by any task or bg-int at any priority. Running out of indices
    /// is fatal. Running out of task blocks is reported as `ENOMEM`.
    pub fn create_task(
        &mut self,
        priority: Priority,
        kind: TaskKind,
        handler: Box<dyn TaskHandler>,
    ) -> Result<TaskId, Fail> {
        if self.entities.len() >= self.config.task_pool_capacity {
            let cause: String = format!(
                "out of task blocks (task_pool_capacity={:?})",
                self.config.task_pool_capacity
            );
            warn!("create_task(): {}", cause);
            return Err(Fail::new(libc::ENOMEM, &cause));
        }

        let index: u8 = match self.find_free_index() {
            Some(index) => index,
            None => panic!("create_task(): too many dynamic tasks"),
        };
        let id: TaskId = self.insert_entity(priority, index, kind, handler, false);
        trace!("create_task(): created {:?}", id);
        Ok(id)
    }

    /// Smallest index in `1..=MAX_TASK_INDEX` that is not in use anywhere.
    fn find_free_index(&self) -> Option<u8> {
        let mut used: [bool; MAX_TASK_INDEX + 1] = [false; MAX_TASK_INDEX + 1];
        for list in self.tasks_in_priority.iter().chain(self.bg_ints_in_priority.iter()) {
            for member in list.iter() {
                used[member.index as usize] = true;
            }
        }
        (1..=MAX_TASK_INDEX).find(|index| !used[*index]).map(|index| index as u8)
    }

    /// Deletes the task, bg-int, or coupled pair named by `id`.
    ///
    /// If the owning list is being iterated the entry is only marked prunable; it stops receiving work at once and is
    /// freed when the iteration releases the list. Otherwise queued messages are flushed and the entry is freed
    /// immediately.
    pub fn delete_task(&mut self, id: TaskId) {
        if id.is_coupled() {
            self.delete_part(ListKind::Task, id.as_task());
            self.delete_part(ListKind::BgInt, id.as_bg_int());
        } else if id.is_bg_int() {
            self.delete_part(ListKind::BgInt, id);
        } else {
            self.delete_part(ListKind::Task, id);
        }
    }

    fn delete_part(&mut self, kind: ListKind, id: TaskId) {
        let level: usize = id.priority_level();
        if level >= NUM_PRIORITIES {
            panic!("delete_task(): invalid priority in {:?}", id);
        }

        self.list_mut(kind, level).lock();
        let key: usize = match self.find(kind, id) {
            Some(key) => key,
            None => panic!("delete_task(): invalid task id {:?}", id),
        };

        if self.list(kind, level).is_locked_elsewhere() {
            let already_prunable: bool = match self.entities.get_mut(key) {
                Some(entity) => Self::mark_part_prunable(entity, kind),
                None => true,
            };
            if already_prunable {
                debug!("delete_task(): {:?} is already prunable", id);
            } else {
                trace!("delete_task(): deferring deletion of {:?}", id);
                self.list_mut(kind, level).mark_prunable();
            }
        } else {
            self.release_part(kind, level, key);
        }

        self.unlock_list(kind, level);
    }

    /// Marks one part of an entity prunable. Returns whether it already was.
    fn mark_part_prunable(entity: &mut Entity, kind: ListKind) -> bool {
        let flag: Option<&mut bool> = match kind {
            ListKind::Task => entity.task.as_mut().map(|t| &mut t.prunable),
            ListKind::BgInt => entity.bg_int.as_mut().map(|b| &mut b.prunable),
        };
        match flag {
            Some(prunable) => {
                let was_prunable: bool = *prunable;
                *prunable = true;
                was_prunable
            },
            None => true,
        }
    }

    /// Unlinks one part of the entity in slot `key`, flushing its outstanding work. The slot is freed once neither
    /// part remains.
    fn release_part(&mut self, kind: ListKind, level: usize, key: usize) {
        let flushed: usize = match self.entities.get_mut(key) {
            Some(entity) => match kind {
                ListKind::Task => entity.task.take().map_or(0, |mut task| task.queue.flush()),
                ListKind::BgInt => entity.bg_int.take().map_or(0, |bg_int| usize::from(bg_int.raised)),
            },
            None => return,
        };
        let _: Option<Member> = self.list_mut(kind, level).remove(key);
        if flushed > 0 {
            self.list_mut(kind, level).sub_pending(flushed);
            self.decrement_total(flushed);
        }

        let empty: bool = self
            .entities
            .get(key)
            .map_or(false, |entity| entity.task.is_none() && entity.bg_int.is_none());
        if empty {
            // Dropping the entity drops the handler unless it is currently running.
            let _: Entity = self.entities.remove(key);
            trace!("release_part(): freed slot {}", key);
        }
    }

    /// Frees every prunable member of a list. Called when the last lock on the list is released.
    pub(super) fn prune(&mut self, kind: ListKind, level: usize) {
        for member in self.list(kind, level).snapshot() {
            let prunable: bool = match self.entities.get(member.key) {
                Some(entity) => match kind {
                    ListKind::Task => entity.task.as_ref().map_or(false, |t| t.prunable),
                    ListKind::BgInt => entity.bg_int.as_ref().map_or(false, |b| b.prunable),
                },
                None => false,
            };
            if prunable {
                self.release_part(kind, level, member.key);
            }
        }
        self.list_mut(kind, level).clear_prunable();
    }

    /// Releases a lock on a priority list, pruning it if this was the last lock.
    pub(super) fn unlock_list(&mut self, kind: ListKind, level: usize) {
        if self.list_mut(kind, level).unlock() {
            self.prune(kind, level);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
