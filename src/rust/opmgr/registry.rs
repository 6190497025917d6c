// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::{
        capability::{
            CapabilityData,
            OperatorInstance,
        },
        types::{
            CapId,
            ConnectionId,
            ExtOpId,
            IntOpId,
            OpState,
        },
    },
    runtime::scheduler::{
        Priority,
        TaskId,
    },
};
use ::std::{
    collections::VecDeque,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Which operator list an entry lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpList {
    /// Operators running on this core.
    Local,
    /// Mirrors of operators running on a secondary core. Only the primary core keeps these.
    Remote,
}

/// One operator instance, or the primary core's mirror of a remote one.
pub struct OperatorData {
    pub id: IntOpId,
    pub cap: Rc<CapabilityData>,
    /// Connection the operator was created over. Commands are accepted from its client.
    pub con_id: ConnectionId,
    pub creator_client_id: u8,
    pub state: OpState,
    pub processor_id: u8,
    pub priority: Priority,
    /// Task that runs the operator. Mirrors have none.
    pub task_id: Option<TaskId>,
    /// Capability instance data. Absent until creation completes, and for mirrors.
    pub instance: Option<Box<dyn OperatorInstance>>,
}

/// Operators known to one core.
pub struct OperatorRegistry {
    local: VecDeque<OperatorData>,
    remote: VecDeque<OperatorData>,
    is_primary: bool,
    max_opid: u16,
    last_opid: u16,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl OperatorData {
    pub fn ext_id(&self) -> ExtOpId {
        self.id.to_ext()
    }
}

impl OperatorRegistry {
    pub fn new(is_primary: bool, max_opid: u16) -> Self {
        Self {
            local: VecDeque::new(),
            remote: VecDeque::new(),
            is_primary,
            max_opid,
            last_opid: 0,
        }
    }

    fn list(&self, list: OpList) -> &VecDeque<OperatorData> {
        match list {
            OpList::Local => &self.local,
            OpList::Remote => &self.remote,
        }
    }

    fn list_mut(&mut self, list: OpList) -> &mut VecDeque<OperatorData> {
        match list {
            OpList::Local => &mut self.local,
            OpList::Remote => &mut self.remote,
        }
    }

    /// Links an operator at the head of `list`.
    pub fn insert(&mut self, list: OpList, op: OperatorData) {
        if list == OpList::Remote && !self.is_primary {
            warn!("insert(): secondary core keeps a mirror of {:?}", op.ext_id());
        }
        self.list_mut(list).push_front(op);
    }

    /// Searches the operators running on this core.
    pub fn get_op_data_from_id(&self, id: IntOpId) -> Option<&OperatorData> {
        self.local.iter().find(|op| op.id == id)
    }

    pub fn get_op_data_from_id_mut(&mut self, id: IntOpId) -> Option<&mut OperatorData> {
        self.local.iter_mut().find(|op| op.id == id)
    }

    /// Searches the local list and, on the primary core, the remote mirrors.
    pub fn get_anycore_op_data_from_id(&self, id: IntOpId) -> Option<&OperatorData> {
        match self.get_op_data_from_id(id) {
            Some(op) => Some(op),
            None if self.is_primary => self.remote.iter().find(|op| op.id == id),
            None => None,
        }
    }

    pub fn get_anycore_op_data_from_id_mut(&mut self, id: IntOpId) -> Option<&mut OperatorData> {
        let is_primary: bool = self.is_primary;
        match self.local.iter().position(|op| op.id == id) {
            Some(position) => self.local.get_mut(position),
            None if is_primary => self.remote.iter_mut().find(|op| op.id == id),
            None => None,
        }
    }

    /// Whether `id` is in `list`.
    pub fn contains(&self, list: OpList, id: IntOpId) -> bool {
        self.list(list).iter().any(|op| op.id == id)
    }

    /// Unlinks an operator. The operator must be in `list`.
    pub fn remove_op_data_from_list(&mut self, id: IntOpId, list: OpList) -> OperatorData {
        let entries: &mut VecDeque<OperatorData> = self.list_mut(list);
        let removed: Option<OperatorData> = match entries.iter().position(|op| op.id == id) {
            Some(position) => entries.remove(position),
            None => None,
        };
        match removed {
            Some(op) => op,
            None => panic!("remove_op_data_from_list(): {:?} is not in the {:?} list", id, list),
        }
    }

    /// Number of local operators, optionally only those of capability `cap_id`.
    pub fn ops_count(&self, cap_id: Option<CapId>) -> usize {
        Self::count(&self.local, cap_id)
    }

    /// Number of remote mirrors, optionally only those of capability `cap_id`.
    pub fn remote_ops_count(&self, cap_id: Option<CapId>) -> usize {
        Self::count(&self.remote, cap_id)
    }

    fn count(list: &VecDeque<OperatorData>, cap_id: Option<CapId>) -> usize {
        list.iter().filter(|op| cap_id.map_or(true, |cap| op.cap.id == cap)).count()
    }

    /// Pages over local then remote operators. Returns the total number of matching operators and the page.
    pub fn get_opid_list(&self, cap_id: Option<CapId>, skip: usize, max_count: usize) -> (usize, Vec<(ExtOpId, CapId)>) {
        let matching = || {
            self.local
                .iter()
                .chain(self.remote.iter())
                .filter(move |op| cap_id.map_or(true, |cap| op.cap.id == cap))
        };
        let total: usize = matching().count();
        let page: Vec<(ExtOpId, CapId)> = matching()
            .skip(skip)
            .take(max_count)
            .map(|op| (op.ext_id(), op.cap.id))
            .collect();
        (total, page)
    }

    /// Allocates the next free internal id. Ids wrap from `max_opid` back to 1 and skip ids live on any core.
    pub fn get_next_opid(&mut self) -> Option<IntOpId> {
        for _ in 0..self.max_opid {
            self.last_opid = if self.last_opid >= self.max_opid {
                1
            } else {
                self.last_opid + 1
            };
            let candidate: IntOpId = IntOpId(self.last_opid);
            if self.get_anycore_op_data_from_id(candidate).is_none() {
                return Some(candidate);
            }
        }
        warn!("get_next_opid(): all {} operator ids are in use", self.max_opid);
        None
    }

    pub fn con_id_from_opid(&self, id: IntOpId) -> Option<ConnectionId> {
        self.get_anycore_op_data_from_id(id).map(|op| op.con_id)
    }

    pub fn get_processor_id_from_opid(&self, id: IntOpId) -> Option<u8> {
        self.get_anycore_op_data_from_id(id).map(|op| op.processor_id)
    }

    /// Records which client created an operator. Returns `false` if the operator does not exist.
    pub fn set_creator_client_id(&mut self, id: IntOpId, client_id: u8) -> bool {
        match self.get_anycore_op_data_from_id_mut(id) {
            Some(op) => {
                op.creator_client_id = client_id;
                true
            },
            None => false,
        }
    }

    /// Operators created over connections of the same client as `con_id`, local first.
    pub fn ops_owned_by(&self, con_id: ConnectionId) -> Vec<IntOpId> {
        self.local
            .iter()
            .chain(self.remote.iter())
            .filter(|op| op.con_id.send == con_id.send)
            .map(|op| op.id)
            .collect()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
