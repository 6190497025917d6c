// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Command aggregation.
//!
//! A list command is processed as a sequence of runs. A run is a maximal stretch of consecutive operators, in the
//! order given by the caller, that live on the same processor. Runs are dispatched one at a time: a run starts only
//! once the previous one has reported back, and the first failing run ends the command.
//!
//! A local run is a single [OPCMD_LIST] message that travels from one operator task to the next. A remote run is a
//! single request over the inter-processor link. Remote destroys take two rounds: the secondary core first checks the
//! request and runs no further than pre-processing, then local pre-processing runs, and only then is the destroy
//! itself sent.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::{
        operator_task::OPCMD_LIST,
        registry::OpList,
        types::{
            create_endpoint_id,
            ConnectionId,
            Direction,
            ExtOpId,
            IntOpId,
            ListCallback,
            ListCmd,
            ListResult,
            OpState,
            PreProc,
            Status,
            ERR_NOT_OWNER,
            ERR_NO_AGGREGATE,
            ERR_OP_NOT_FOUND,
            ERR_OP_RUNNING,
            ERR_RUN_UNTIL_PREPROC,
            ERR_TRANSPORT,
        },
        OpMgr,
        SharedOpMgr,
    },
    runtime::{
        limits::MAX_OPS_PER_LIST_CMD,
        scheduler::{
            Payload,
            RoutingInfo,
            TaskId,
        },
    },
};
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Payload of [OPCMD_LIST]. Carries a local run from one operator task to the next.
pub(super) struct MultiOpRequest {
    con_id: ConnectionId,
    cmd: ListCmd,
    ops: Vec<IntOpId>,
    /// Position of the operator the request is addressed to.
    idx: usize,
    /// Operators of the run that succeeded so far.
    count: usize,
    preproc: Option<PreProc>,
    callback: ListCallback,
}

/// Progress of the two-round remote destroy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DestroyPhase {
    Idle,
    /// The secondary core is checking the run.
    Probing,
}

/// State of one in-flight list command.
struct CmdAggregate {
    con_id: ConnectionId,
    cmd: ListCmd,
    ops: Vec<IntOpId>,
    /// First operator of the run being processed.
    prv_idx: usize,
    /// First operator not yet dispatched.
    cur_idx: usize,
    count: usize,
    preproc: Option<PreProc>,
    callback: ListCallback,
    phase: DestroyPhase,
}

enum Admission {
    Started(u8),
    Queued,
    Rejected(CmdAggregate),
}

/// Bounded set of in-flight aggregates plus a bounded queue of list commands waiting for one.
pub(super) struct AggregatePool {
    slots: Vec<Option<CmdAggregate>>,
    waiting: VecDeque<CmdAggregate>,
    queue_depth: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AggregatePool {
    pub(super) fn new(num_aggregates: usize, queue_depth: usize) -> Self {
        Self {
            slots: (0..num_aggregates).map(|_| None).collect(),
            waiting: VecDeque::new(),
            queue_depth,
        }
    }

    fn admit(&mut self, aggregate: CmdAggregate) -> Admission {
        if self.waiting.is_empty() {
            if let Some(agid) = self.slots.iter().position(|slot| slot.is_none()) {
                self.slots[agid] = Some(aggregate);
                return Admission::Started(agid as u8);
            }
        }
        if self.waiting.len() < self.queue_depth {
            self.waiting.push_back(aggregate);
            return Admission::Queued;
        }
        Admission::Rejected(aggregate)
    }

    fn get(&self, agid: u8) -> Option<&CmdAggregate> {
        self.slots.get(agid as usize).and_then(|slot| slot.as_ref())
    }

    fn get_mut(&mut self, agid: u8) -> Option<&mut CmdAggregate> {
        self.slots.get_mut(agid as usize).and_then(|slot| slot.as_mut())
    }

    fn release(&mut self, agid: u8) -> Option<CmdAggregate> {
        self.slots.get_mut(agid as usize).and_then(|slot| slot.take())
    }

    /// Moves the oldest waiting command into a free slot.
    fn promote_waiting(&mut self) -> Option<u8> {
        let agid: usize = self.slots.iter().position(|slot| slot.is_none())?;
        let aggregate: CmdAggregate = self.waiting.pop_front()?;
        self.slots[agid] = Some(aggregate);
        Some(agid as u8)
    }

    pub(super) fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(super) fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub(super) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.waiting.clear();
    }
}

impl SharedOpMgr {
    /// Entry point of every list command. On the primary core the list is processed run by run through an
    /// aggregate. A secondary core only ever receives lists of its own operators and processes them in one go.
    pub(super) fn issue_list_cmd(
        &mut self,
        con_id: ConnectionId,
        cmd: ListCmd,
        ops: &[ExtOpId],
        preproc: Option<PreProc>,
        callback: ListCallback,
    ) {
        if ops.is_empty() || ops.len() > MAX_OPS_PER_LIST_CMD || ops.iter().any(|op_id| !op_id.is_valid()) {
            warn!("issue_list_cmd(): malformed {:?} list of {} operators", cmd, ops.len());
            return callback(self, ListResult::new(con_id, Status::InvalidCmdParams, 0, 0));
        }
        let ops: Vec<IntOpId> = ops.iter().map(|op_id| op_id.to_int()).collect();
        if !self.is_primary() {
            return self.send_command_to_operator_list(con_id, cmd, ops, preproc, callback);
        }

        let aggregate: CmdAggregate = CmdAggregate {
            con_id,
            cmd,
            ops,
            prv_idx: 0,
            cur_idx: 0,
            count: 0,
            preproc,
            callback,
            phase: DestroyPhase::Idle,
        };
        match self.aggregates.admit(aggregate) {
            Admission::Started(agid) => {
                trace!("issue_list_cmd(): {:?} runs on aggregate {}", cmd, agid);
                self.callback_aggregate(agid, ListResult::new(con_id, Status::Ok, 0, 0))
            },
            Admission::Queued => debug!("issue_list_cmd(): {:?} waits for an aggregate", cmd),
            Admission::Rejected(aggregate) => {
                warn!("issue_list_cmd(): no aggregate for {:?}", cmd);
                let CmdAggregate { callback, .. } = aggregate;
                callback(self, ListResult::new(con_id, Status::CmdFailed, 0, ERR_NO_AGGREGATE));
            },
        }
    }

    /// Step function of an aggregate. Called with the outcome of the previous run, then dispatches the next one.
    pub(super) fn callback_aggregate(&mut self, agid: u8, result: ListResult) {
        let (cmd, con_id, preproc, phase, cur_idx, finished): (ListCmd, ConnectionId, Option<PreProc>, DestroyPhase, usize, bool) =
            match self.aggregates.get_mut(agid) {
                Some(aggregate) => {
                    aggregate.count += result.count;
                    (
                        aggregate.cmd,
                        aggregate.con_id,
                        aggregate.preproc,
                        aggregate.phase,
                        aggregate.cur_idx,
                        aggregate.cur_idx >= aggregate.ops.len(),
                    )
                },
                None => panic!("callback_aggregate(): lost aggregate {}", agid),
            };
        if result.status != Status::Ok {
            return self.finalize_aggregate(agid, result.status, result.err_code);
        }
        if finished {
            return self.finalize_aggregate(agid, Status::Ok, 0);
        }

        let (processor_id, run): (u8, Vec<IntOpId>) = match self.next_run(agid, cur_idx) {
            Some(run) => run,
            None => return self.finalize_aggregate(agid, Status::CmdFailed, ERR_OP_NOT_FOUND),
        };
        let end: usize = cur_idx + run.len();

        if processor_id == self.processor_id() {
            trace!("callback_aggregate(): local run of {} operators", run.len());
            self.advance_aggregate(agid, end);
            return self.send_command_to_operator_list(
                con_id,
                cmd,
                run,
                preproc,
                Box::new(move |opmgr: &mut SharedOpMgr, result: ListResult| opmgr.callback_aggregate(agid, result)),
            );
        }

        if let Some(preproc) = preproc {
            match phase {
                DestroyPhase::Idle => {
                    self.set_destroy_phase(agid, DestroyPhase::Probing);
                    return self.dispatch_remote_run(agid, con_id, ListCmd::RunUntilPreproc, &run, processor_id);
                },
                DestroyPhase::Probing => {
                    self.set_destroy_phase(agid, DestroyPhase::Idle);
                    if result.err_code != ERR_RUN_UNTIL_PREPROC {
                        warn!("callback_aggregate(): unexpected probe reply (err_code={:#x})", result.err_code);
                        return self.finalize_aggregate(agid, Status::CmdFailed, result.err_code);
                    }
                    for op_id in run.iter() {
                        if let Err(code) = preproc(self, *op_id) {
                            return self.finalize_aggregate(agid, Status::CmdFailed, code);
                        }
                    }
                },
            }
        }

        match cmd {
            ListCmd::Start => self.toggle_shadow_endpoints(&run, true),
            ListCmd::Stop | ListCmd::Reset => self.toggle_shadow_endpoints(&run, false),
            _ => (),
        }
        self.advance_aggregate(agid, end);
        self.dispatch_remote_run(agid, con_id, cmd, &run, processor_id)
    }

    /// Finds the maximal run of operators starting at `start` that share a processor.
    fn next_run(&self, agid: u8, start: usize) -> Option<(u8, Vec<IntOpId>)> {
        let opmgr: &OpMgr = self;
        let aggregate: &CmdAggregate = opmgr.aggregates.get(agid)?;
        let first: IntOpId = *aggregate.ops.get(start)?;
        let processor_id: u8 = match opmgr.registry.get_processor_id_from_opid(first) {
            Some(processor_id) => processor_id,
            None => {
                warn!("next_run(): no operator {:?}", first.to_ext());
                return None;
            },
        };
        let run: Vec<IntOpId> = aggregate.ops[start..]
            .iter()
            .take_while(|op_id| opmgr.registry.get_processor_id_from_opid(**op_id) == Some(processor_id))
            .copied()
            .collect();
        Some((processor_id, run))
    }

    fn advance_aggregate(&mut self, agid: u8, end: usize) {
        if let Some(aggregate) = self.aggregates.get_mut(agid) {
            aggregate.prv_idx = aggregate.cur_idx;
            aggregate.cur_idx = end;
        }
    }

    fn set_destroy_phase(&mut self, agid: u8, phase: DestroyPhase) {
        if let Some(aggregate) = self.aggregates.get_mut(agid) {
            aggregate.phase = phase;
        }
    }

    fn dispatch_remote_run(&mut self, agid: u8, con_id: ConnectionId, cmd: ListCmd, run: &[IntOpId], processor_id: u8) {
        trace!("dispatch_remote_run(): {:?} of {} operators to processor {}", cmd, run.len(), processor_id);
        if let Err(e) = self.send_kip_list_request(agid, con_id, cmd, run, processor_id) {
            warn!("dispatch_remote_run(): {:?}", e);
            self.finalize_aggregate(agid, Status::CmdFailed, ERR_TRANSPORT);
        }
    }

    /// Mirrors a remote start or stop on the local shadows of every endpoint of the run.
    fn toggle_shadow_endpoints(&mut self, run: &[IntOpId], enable: bool) {
        for op_id in run {
            let (ext_id, num_sinks, num_sources): (ExtOpId, usize, usize) =
                match self.registry.get_anycore_op_data_from_id(*op_id) {
                    Some(op) => (op.ext_id(), op.cap.max_sinks, op.cap.max_sources),
                    None => continue,
                };
            let sinks = (0..num_sinks).filter_map(|idx| create_endpoint_id(ext_id, idx, Direction::Sink));
            let sources = (0..num_sources).filter_map(|idx| create_endpoint_id(ext_id, idx, Direction::Source));
            let endpoints: Vec<u16> = sinks.chain(sources).collect();
            for endpoint_id in endpoints {
                self.streams.set_shadow_endpoint_enabled(endpoint_id, enable);
            }
        }
    }

    /// Handles the reply to a remote run. The mirrors of the operators that succeeded take on their new state.
    pub(super) fn kip_list_resp_handler(&mut self, agid: u8, result: ListResult) {
        let (cmd, run): (ListCmd, Vec<IntOpId>) = match self.aggregates.get(agid) {
            Some(aggregate) => (aggregate.cmd, aggregate.ops[aggregate.prv_idx..aggregate.cur_idx].to_vec()),
            None => panic!("kip_list_resp_handler(): lost aggregate {}", agid),
        };
        let state: Option<OpState> = match cmd {
            ListCmd::Start => Some(OpState::Running),
            ListCmd::Stop => Some(OpState::NotRunning),
            _ => None,
        };
        if let Some(state) = state {
            for op_id in run.iter().take(result.count) {
                if let Some(op) = self.registry.get_anycore_op_data_from_id_mut(*op_id) {
                    op.state = state;
                }
            }
        }
        self.callback_aggregate(agid, result)
    }

    fn finalize_aggregate(&mut self, agid: u8, status: Status, err_code: u32) {
        let aggregate: CmdAggregate = match self.aggregates.release(agid) {
            Some(aggregate) => aggregate,
            None => panic!("finalize_aggregate(): lost aggregate {}", agid),
        };
        let CmdAggregate {
            con_id,
            cmd,
            ops,
            count,
            callback,
            ..
        } = aggregate;
        if cmd == ListCmd::Destroy {
            self.remove_remote_oplist(&ops[..count.min(ops.len())]);
        }
        debug!(
            "finalize_aggregate(): {:?} done (status={:?}, count={}, err_code={:#x})",
            cmd, status, count, err_code
        );

        let next: Option<u8> = self.aggregates.promote_waiting();
        callback(self, ListResult::new(con_id, status, count, err_code));
        if let Some(next) = next {
            let con_id: ConnectionId = match self.aggregates.get(next) {
                Some(aggregate) => aggregate.con_id,
                None => return,
            };
            self.callback_aggregate(next, ListResult::new(con_id, Status::Ok, 0, 0));
        }
    }

    /// Drops the mirrors of remote operators that were destroyed. Local operators are not touched.
    pub(super) fn remove_remote_oplist(&mut self, destroyed: &[IntOpId]) {
        for op_id in destroyed {
            if self.registry.contains(OpList::Remote, *op_id) {
                let _ = self.registry.remove_op_data_from_list(*op_id, OpList::Remote);
                debug!("remove_remote_oplist(): dropped mirror of {:?}", op_id.to_ext());
            }
        }
    }

    /// Processes a list of operators that all live on this core, starting with the first. Pre-processing of the
    /// first operator runs before the request is queued.
    pub(super) fn send_command_to_operator_list(
        &mut self,
        con_id: ConnectionId,
        cmd: ListCmd,
        ops: Vec<IntOpId>,
        preproc: Option<PreProc>,
        callback: ListCallback,
    ) {
        let fail = |opmgr: &mut SharedOpMgr, callback: ListCallback, status: Status, err_code: u32| {
            callback(opmgr, ListResult::new(con_id, status, 0, err_code))
        };

        let first: IntOpId = match ops.first() {
            Some(first) => *first,
            None => return fail(self, callback, Status::InvalidCmdParams, 0),
        };
        let (owner, task_id): (ConnectionId, Option<TaskId>) = match self.registry.get_op_data_from_id(first) {
            Some(op) => (op.con_id, op.task_id),
            None => {
                warn!("send_command_to_operator_list(): no operator {:?}", first.to_ext());
                return fail(self, callback, Status::CmdFailed, ERR_OP_NOT_FOUND);
            },
        };
        if !con_id.may_command(owner) {
            warn!("send_command_to_operator_list(): {:?} does not own {:?}", con_id, first.to_ext());
            return fail(self, callback, Status::CmdFailed, ERR_NOT_OWNER);
        }
        if cmd == ListCmd::RunUntilPreproc {
            return callback(self, ListResult::new(con_id, Status::Ok, 0, ERR_RUN_UNTIL_PREPROC));
        }
        let task_id: TaskId = match task_id {
            Some(task_id) if self.sched.is_live(task_id) => task_id,
            _ => return fail(self, callback, Status::CmdFailed, ERR_OP_NOT_FOUND),
        };
        if let Some(preproc) = preproc {
            if let Err(code) = preproc(self, first) {
                return fail(self, callback, Status::CmdFailed, code);
            }
        }

        let routing: RoutingInfo = RoutingInfo {
            src_id: con_id.raw() as u32,
            dest_id: first.0 as u32,
        };
        let payload: Payload = Box::new(MultiOpRequest {
            con_id,
            cmd,
            ops,
            idx: 0,
            count: 0,
            preproc,
            callback,
        });
        self.sched
            .put_message_with_routing(task_id, OPCMD_LIST, Some(payload), routing);
    }

    /// Applies a list request to the operator it is addressed to and hands it on to the next operator, on the
    /// operator's own task.
    pub(super) fn run_list_step(&mut self, op_id: IntOpId, request: MultiOpRequest) {
        let MultiOpRequest {
            con_id,
            cmd,
            ops,
            idx,
            count,
            preproc,
            callback,
        } = request;
        if ops.get(idx) != Some(&op_id) {
            error!("run_list_step(): request for position {} reached {:?}", idx, op_id.to_ext());
            return callback(self, ListResult::new(con_id, Status::CmdFailed, count, ERR_OP_NOT_FOUND));
        }

        let step_preproc: Option<PreProc> = if idx > 0 { preproc } else { None };
        if let Err(code) = self.execute_list_cmd(op_id, con_id, cmd, step_preproc) {
            debug!("run_list_step(): {:?} failed on {:?} (err_code={:#x})", cmd, op_id.to_ext(), code);
            return callback(self, ListResult::new(con_id, Status::CmdFailed, count, code));
        }

        let count: usize = count + 1;
        let idx: usize = idx + 1;
        let next: IntOpId = match ops.get(idx) {
            Some(next) => *next,
            None => return callback(self, ListResult::new(con_id, Status::Ok, count, 0)),
        };
        let task_id: Option<TaskId> = self
            .registry
            .get_op_data_from_id(next)
            .and_then(|op| op.task_id)
            .filter(|task_id| self.sched.is_live(*task_id));
        match task_id {
            Some(task_id) => {
                let payload: Payload = Box::new(MultiOpRequest {
                    con_id,
                    cmd,
                    ops,
                    idx,
                    count,
                    preproc,
                    callback,
                });
                self.sched.put_message(task_id, OPCMD_LIST, Some(payload));
            },
            None => callback(self, ListResult::new(con_id, Status::CmdFailed, count, ERR_OP_NOT_FOUND)),
        }
    }

    fn execute_list_cmd(
        &mut self,
        op_id: IntOpId,
        con_id: ConnectionId,
        cmd: ListCmd,
        preproc: Option<PreProc>,
    ) -> Result<(), u32> {
        let owner: ConnectionId = match self.registry.get_op_data_from_id(op_id) {
            Some(op) => op.con_id,
            None => return Err(ERR_OP_NOT_FOUND),
        };
        if !con_id.may_command(owner) {
            return Err(ERR_NOT_OWNER);
        }
        if let Some(preproc) = preproc {
            preproc(self, op_id)?;
        }

        if cmd == ListCmd::Destroy {
            return self.destroy_local_operator(op_id);
        }
        let op = match self.registry.get_op_data_from_id_mut(op_id) {
            Some(op) => op,
            None => return Err(ERR_OP_NOT_FOUND),
        };
        let instance = match op.instance.as_mut() {
            Some(instance) => instance,
            None => return Err(ERR_OP_NOT_FOUND),
        };
        match cmd {
            ListCmd::Start if op.state != OpState::Running => {
                instance.start()?;
                op.state = OpState::Running;
                info!("execute_list_cmd(): started {:?}", op_id.to_ext());
            },
            ListCmd::Stop if op.state == OpState::Running => {
                instance.stop()?;
                op.state = OpState::NotRunning;
                info!("execute_list_cmd(): stopped {:?}", op_id.to_ext());
            },
            ListCmd::Reset if op.state == OpState::Running => return Err(ERR_OP_RUNNING),
            ListCmd::Reset => instance.reset()?,
            _ => (),
        }
        Ok(())
    }

    /// Destroys a stopped local operator. The operator's task is deleted from inside its own handler, so it is freed
    /// once the scheduler pass that runs it unwinds.
    fn destroy_local_operator(&mut self, op_id: IntOpId) -> Result<(), u32> {
        match self.registry.get_op_data_from_id_mut(op_id) {
            Some(op) if op.state == OpState::Running => return Err(ERR_OP_RUNNING),
            Some(op) => {
                if let Some(instance) = op.instance.as_mut() {
                    instance.destroy()?;
                }
            },
            None => return Err(ERR_OP_NOT_FOUND),
        }
        let op = self.registry.remove_op_data_from_list(op_id, OpList::Local);
        info!("destroy_local_operator(): destroyed {:?}", op_id.to_ext());
        if let Some(task_id) = op.task_id {
            self.sched.delete_task(task_id);
        }
        Ok(())
    }
}
