// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::{
        aggregate::MultiOpRequest,
        commands::{
            CreateRequest,
            MessageRequest,
        },
        types::IntOpId,
        SharedOpMgr,
    },
    runtime::scheduler::{
        Message,
        SharedScheduler,
        TaskHandler,
        TaskId,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Completes creation of the operator.
pub const OPCMD_CREATE: u16 = 0x0001;
/// Runs one step of a list command.
pub const OPCMD_LIST: u16 = 0x0002;
/// Delivers an operator message.
pub const OPCMD_MESSAGE: u16 = 0x0003;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Coupled task of one operator. Commands arrive as messages and processing passes as kicks.
pub struct OperatorTask {
    opmgr: SharedOpMgr,
    op_id: IntOpId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl OperatorTask {
    pub fn new(opmgr: SharedOpMgr, op_id: IntOpId) -> Self {
        Self { opmgr, op_id }
    }

    fn dispatch(&mut self, task_id: TaskId, mut message: Message) {
        match message.tag {
            OPCMD_CREATE => match message.take_payload::<CreateRequest>() {
                Some(request) => self.opmgr.complete_create(self.op_id, task_id, *request),
                None => warn!("dispatch(): create request without payload (op_id={:?})", self.op_id),
            },
            OPCMD_LIST => match message.take_payload::<MultiOpRequest>() {
                Some(request) => self.opmgr.run_list_step(self.op_id, *request),
                None => warn!("dispatch(): list request without payload (op_id={:?})", self.op_id),
            },
            OPCMD_MESSAGE => match message.take_payload::<MessageRequest>() {
                Some(request) => self.opmgr.deliver_operator_message(self.op_id, *request),
                None => warn!("dispatch(): operator message without payload (op_id={:?})", self.op_id),
            },
            tag => warn!("dispatch(): unexpected message (op_id={:?}, tag={:#x})", self.op_id, tag),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TaskHandler for OperatorTask {
    fn on_message(&mut self, sched: &mut SharedScheduler, id: TaskId) {
        while let Some(message) = sched.get_message_with_routing() {
            trace!(
                "on_message(): op_id={:?} tag={:#x} src={:#x}",
                self.op_id,
                message.tag,
                message.routing.src_id
            );
            self.dispatch(id, message);
        }
    }

    fn on_kick(&mut self, _sched: &mut SharedScheduler, _id: TaskId) {
        self.opmgr.process_operator(self.op_id);
    }
}
