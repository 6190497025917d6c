// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Public command entry points. Every command reports its outcome through exactly one callback, which runs either
//! before the entry point returns or from a later scheduler pass.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::{
        capability::{
            CapabilityData,
            DownloadStatus,
            OperatorInfo,
        },
        download::DownloadProgress,
        operator_task::{
            OperatorTask,
            OPCMD_CREATE,
            OPCMD_MESSAGE,
        },
        registry::{
            OpList,
            OperatorData,
        },
        types::{
            CapId,
            ConnectionId,
            CreateCallback,
            CreateResult,
            ExtOpId,
            IntOpId,
            ListCallback,
            ListCmd,
            ListResult,
            MessageCallback,
            MessageResult,
            OpState,
            Status,
            ERR_OP_NOT_FOUND,
            ERR_OP_RUNNING,
            ERR_PREPROC_FAILED,
        },
        SharedOpMgr,
    },
    runtime::{
        fail::Fail,
        limits::MAX_OPS_PER_LIST_CMD,
        scheduler::{
            Payload,
            Priority,
            RoutingInfo,
            TaskId,
            TaskKind,
        },
    },
};
use ::std::{
    mem,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Create key: scheduler priority level of the operator's task.
pub const OPERATOR_CREATE_KEY_PRIORITY: u16 = 0x0000;
/// Create key: processor the operator runs on.
pub const OPERATOR_CREATE_KEY_PROCESSOR_ID: u16 = 0x0001;

const DEFAULT_OPERATOR_PRIORITY: Priority = Priority::Medium;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One entry of the configuration list of a create request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateKeyValue {
    pub key: u16,
    pub value: u32,
}

/// Outcome of an enumeration command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumerationResult<T> {
    pub con_id: ConnectionId,
    pub status: Status,
    /// Number of entries available, regardless of paging.
    pub total: usize,
    pub page: Vec<T>,
}

pub type EnumerationCallback<T> = Box<dyn FnOnce(&mut SharedOpMgr, EnumerationResult<T>)>;

/// Payload of [OPCMD_CREATE].
pub(super) struct CreateRequest {
    con_id: ConnectionId,
    callback: CreateCallback,
}

/// Payload of [OPCMD_MESSAGE].
pub(super) struct MessageRequest {
    con_id: ConnectionId,
    params: Vec<u16>,
    callback: MessageCallback,
}

#[derive(Clone, Copy)]
struct CreateParams {
    con_id: ConnectionId,
    cap_id: CapId,
    op_id: Option<ExtOpId>,
    priority: Priority,
    processor_id: u8,
}

/// Create request parked until its capability becomes resident.
pub(super) struct DeferredCreate {
    params: CreateParams,
    callback: CreateCallback,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CreateKeyValue {
    pub fn new(key: u16, value: u32) -> Self {
        Self { key, value }
    }
}

impl SharedOpMgr {
    /// Creates an operator of capability `cap_id` with default configuration.
    pub fn create_operator(&mut self, con_id: ConnectionId, cap_id: CapId, callback: CreateCallback) {
        self.create_operator_ex(con_id, cap_id, None, &[], callback)
    }

    /// Creates an operator of capability `cap_id`.
    ///
    /// `op_id` is only given when the primary core has already allocated the identifier. `keys` may set the priority
    /// and the processor of the operator; any other key fails the request.
    pub fn create_operator_ex(
        &mut self,
        con_id: ConnectionId,
        cap_id: CapId,
        op_id: Option<ExtOpId>,
        keys: &[CreateKeyValue],
        callback: CreateCallback,
    ) {
        let reported_id: ExtOpId = op_id.unwrap_or(ExtOpId(0));
        let fail = |opmgr: &mut SharedOpMgr, callback: CreateCallback, status: Status| {
            callback(
                opmgr,
                CreateResult {
                    con_id,
                    status,
                    op_id: reported_id,
                },
            )
        };

        if let Some(op_id) = op_id {
            if !op_id.is_valid() {
                warn!("create_operator_ex(): malformed operator id {:?}", op_id);
                return fail(self, callback, Status::InvalidCmdParams);
            }
        }
        let (priority, mut processor_id): (Priority, u8) = match self.parse_create_keys(keys) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("create_operator_ex(): {:?}", e);
                return fail(self, callback, Status::InvalidCmdParams);
            },
        };

        if processor_id != self.processor_id() {
            if !self.is_primary() {
                warn!("create_operator_ex(): secondary core cannot create on processor {}", processor_id);
                return fail(self, callback, Status::CmdFailed);
            }
            if !self.aux_started {
                if !self.config.thread_offload {
                    warn!("create_operator_ex(): processor {} has not started", processor_id);
                    return fail(self, callback, Status::CmdFailed);
                }
                info!(
                    "create_operator_ex(): processor {} has not started, creating on processor {} instead",
                    processor_id,
                    self.processor_id()
                );
                processor_id = self.processor_id();
            }
        }

        let params: CreateParams = CreateParams {
            con_id,
            cap_id,
            op_id,
            priority,
            processor_id,
        };
        match self.caps.lookup(cap_id).map(|(_, status)| status) {
            None => {
                warn!("create_operator_ex(): no capability {:?}", cap_id);
                fail(self, callback, Status::CmdFailed)
            },
            Some(None) | Some(Some(DownloadStatus::Ready)) => self.post_dnld(params, callback),
            Some(Some(DownloadStatus::Downloading)) => {
                debug!("create_operator_ex(): waiting for download of {:?}", cap_id);
                self.deferred_creates.push(DeferredCreate { params, callback });
            },
            Some(Some(DownloadStatus::Installed)) => match self.downloads.request_download(cap_id) {
                DownloadProgress::Ready => {
                    self.update_download_status(cap_id, DownloadStatus::Ready);
                    self.post_dnld(params, callback)
                },
                DownloadProgress::Pending => {
                    debug!("create_operator_ex(): download of {:?} started", cap_id);
                    self.update_download_status(cap_id, DownloadStatus::Downloading);
                    self.deferred_creates.push(DeferredCreate { params, callback });
                },
                DownloadProgress::Failed => {
                    warn!("create_operator_ex(): download of {:?} failed", cap_id);
                    fail(self, callback, Status::CmdFailed)
                },
            },
        }
    }

    fn parse_create_keys(&self, keys: &[CreateKeyValue]) -> Result<(Priority, u8), Fail> {
        let mut priority: Priority = DEFAULT_OPERATOR_PRIORITY;
        let mut processor_id: u8 = self.processor_id();
        for kv in keys {
            match kv.key {
                OPERATOR_CREATE_KEY_PRIORITY => priority = Priority::try_from(kv.value)?,
                OPERATOR_CREATE_KEY_PROCESSOR_ID => {
                    if kv.value as usize >= self.config.num_processors {
                        let cause: String = format!("no processor {}", kv.value);
                        return Err(Fail::new(libc::EINVAL, &cause));
                    }
                    processor_id = kv.value as u8;
                },
                key => {
                    let cause: String = format!("unknown create key {:#x}", key);
                    return Err(Fail::new(libc::EINVAL, &cause));
                },
            }
        }
        Ok((priority, processor_id))
    }

    fn update_download_status(&mut self, cap_id: CapId, status: DownloadStatus) {
        if let Err(e) = self.caps.set_download_status(cap_id, status) {
            warn!("update_download_status(): {:?}", e);
        }
    }

    /// Resumes the creates that wait for `cap_id`. A failed download fails them.
    pub fn cap_download_complete(&mut self, cap_id: CapId, success: bool) {
        let status: DownloadStatus = if success {
            DownloadStatus::Ready
        } else {
            DownloadStatus::Installed
        };
        self.update_download_status(cap_id, status);

        let (resumed, waiting): (Vec<DeferredCreate>, Vec<DeferredCreate>) = mem::take(&mut self.deferred_creates)
            .into_iter()
            .partition(|deferred| deferred.params.cap_id == cap_id);
        self.deferred_creates = waiting;
        for deferred in resumed {
            if success {
                self.post_dnld(deferred.params, deferred.callback);
            } else {
                let result: CreateResult = CreateResult {
                    con_id: deferred.params.con_id,
                    status: Status::CmdFailed,
                    op_id: deferred.params.op_id.unwrap_or(ExtOpId(0)),
                };
                (deferred.callback)(self, result);
            }
        }
    }

    /// Allocates the operator once its capability is resident.
    fn post_dnld(&mut self, params: CreateParams, callback: CreateCallback) {
        let con_id: ConnectionId = params.con_id;
        let fail = |opmgr: &mut SharedOpMgr, callback: CreateCallback, op_id: ExtOpId| {
            callback(
                opmgr,
                CreateResult {
                    con_id,
                    status: Status::CmdFailed,
                    op_id,
                },
            )
        };

        let cap: Rc<CapabilityData> = match self.caps.lookup(params.cap_id) {
            Some((cap, _)) => cap,
            None => {
                warn!("post_dnld(): capability {:?} is gone", params.cap_id);
                return fail(self, callback, params.op_id.unwrap_or(ExtOpId(0)));
            },
        };
        let op_id: IntOpId = match params.op_id {
            Some(op_id) if self.registry.get_anycore_op_data_from_id(op_id.to_int()).is_some() => {
                warn!("post_dnld(): operator id {:?} is in use", op_id);
                return fail(self, callback, op_id);
            },
            Some(op_id) => op_id.to_int(),
            None => match self.registry.get_next_opid() {
                Some(op_id) => op_id,
                None => return fail(self, callback, ExtOpId(0)),
            },
        };

        let mut op: OperatorData = OperatorData {
            id: op_id,
            cap,
            con_id,
            creator_client_id: con_id.send.client_id(),
            state: OpState::NotRunning,
            processor_id: params.processor_id,
            priority: params.priority,
            task_id: None,
            instance: None,
        };
        if params.processor_id != self.processor_id() {
            return self.create_remote_operator(op, callback);
        }

        let handler: Box<OperatorTask> = Box::new(OperatorTask::new(self.clone(), op_id));
        let task_id: TaskId = match self.sched.create_task(params.priority, TaskKind::Coupled, handler) {
            Ok(task_id) => task_id,
            Err(e) => {
                warn!("post_dnld(): {:?}", e);
                return fail(self, callback, op_id.to_ext());
            },
        };
        op.task_id = Some(task_id);
        self.registry.insert(OpList::Local, op);
        debug!("post_dnld(): {:?} runs on {:?}", op_id.to_ext(), task_id);

        let payload: Payload = Box::new(CreateRequest { con_id, callback });
        let routing: RoutingInfo = RoutingInfo {
            src_id: con_id.raw() as u32,
            dest_id: op_id.0 as u32,
        };
        self.sched
            .put_message_with_routing(task_id, OPCMD_CREATE, Some(payload), routing);
    }

    /// Instantiates the capability on the operator's own task.
    pub(super) fn complete_create(&mut self, op_id: IntOpId, task_id: TaskId, request: CreateRequest) {
        let CreateRequest { con_id, callback } = request;
        let ext_id: ExtOpId = op_id.to_ext();
        let (cap, info): (Rc<CapabilityData>, OperatorInfo) = match self.registry.get_op_data_from_id(op_id) {
            Some(op) => (
                op.cap.clone(),
                OperatorInfo {
                    op_id: ext_id,
                    cap_id: op.cap.id,
                    processor_id: op.processor_id,
                    priority: op.priority,
                },
            ),
            None => {
                warn!("complete_create(): {:?} vanished before creation", ext_id);
                let result: CreateResult = CreateResult {
                    con_id,
                    status: Status::CmdFailed,
                    op_id: ext_id,
                };
                return callback(self, result);
            },
        };

        let status: Status = match cap.handler.create(&info) {
            Ok(instance) => {
                if let Some(op) = self.registry.get_op_data_from_id_mut(op_id) {
                    op.instance = Some(instance);
                }
                info!("complete_create(): created {:?} (cap_id={:?})", ext_id, info.cap_id);
                Status::Ok
            },
            Err(code) => {
                warn!("complete_create(): capability refused {:?} (err_code={:#x})", ext_id, code);
                let _ = self.registry.remove_op_data_from_list(op_id, OpList::Local);
                self.sched.delete_task(task_id);
                Status::CmdFailed
            },
        };
        callback(
            self,
            CreateResult {
                con_id,
                status,
                op_id: ext_id,
            },
        );
    }

    pub fn start_operator(&mut self, con_id: ConnectionId, ops: &[ExtOpId], callback: ListCallback) {
        self.issue_list_cmd(con_id, ListCmd::Start, ops, None, callback)
    }

    pub fn stop_operator(&mut self, con_id: ConnectionId, ops: &[ExtOpId], callback: ListCallback) {
        self.issue_list_cmd(con_id, ListCmd::Stop, ops, None, callback)
    }

    /// Resets stopped operators.
    pub fn reset_operator(&mut self, con_id: ConnectionId, ops: &[ExtOpId], callback: ListCallback) {
        self.issue_list_cmd(con_id, ListCmd::Reset, ops, None, callback)
    }

    /// Destroys stopped operators. The stream endpoints of each operator are torn down first.
    pub fn destroy_operator(&mut self, con_id: ConnectionId, ops: &[ExtOpId], callback: ListCallback) {
        self.issue_list_cmd(con_id, ListCmd::Destroy, ops, Some(destroy_op_endpoints), callback)
    }

    /// Stops then destroys every operator created by the client of `con_id`. The destroy is attempted whatever the
    /// stop reports.
    pub fn destroy_ops_by_con_id(&mut self, con_id: ConnectionId, callback: ListCallback) {
        let ops: Vec<ExtOpId> = self
            .registry
            .ops_owned_by(con_id)
            .into_iter()
            .map(|op_id| op_id.to_ext())
            .collect();
        if ops.is_empty() {
            return callback(self, ListResult::new(con_id, Status::Ok, 0, 0));
        }
        if ops.len() > MAX_OPS_PER_LIST_CMD {
            warn!("destroy_ops_by_con_id(): only the first {} of {} operators", MAX_OPS_PER_LIST_CMD, ops.len());
        }
        let ops: Vec<ExtOpId> = ops.into_iter().take(MAX_OPS_PER_LIST_CMD).collect();

        debug!("destroy_ops_by_con_id(): {:?} owns {} operators", con_id, ops.len());
        let stop_ops: Vec<ExtOpId> = ops.clone();
        self.stop_operator(
            con_id,
            &stop_ops,
            Box::new(move |opmgr: &mut SharedOpMgr, result: ListResult| {
                if result.status != Status::Ok {
                    warn!(
                        "destroy_ops_by_con_id(): stop failed after {} operators (err_code={:#x})",
                        result.count, result.err_code
                    );
                }
                opmgr.destroy_operator(con_id, &ops, callback);
            }),
        );
    }

    /// Sends a message to one operator and reports its response.
    pub fn operator_message(&mut self, con_id: ConnectionId, op_id: ExtOpId, params: &[u16], callback: MessageCallback) {
        let fail = |opmgr: &mut SharedOpMgr, callback: MessageCallback, status: Status| {
            callback(
                opmgr,
                MessageResult {
                    con_id,
                    status,
                    op_id,
                    response: Vec::new(),
                },
            )
        };

        if !op_id.is_valid() || params.is_empty() {
            warn!("operator_message(): malformed request for {:?}", op_id);
            return fail(self, callback, Status::InvalidCmdParams);
        }
        let (owner, processor_id, task_id): (ConnectionId, u8, Option<TaskId>) =
            match self.registry.get_anycore_op_data_from_id(op_id.to_int()) {
                Some(op) => (op.con_id, op.processor_id, op.task_id),
                None => {
                    warn!("operator_message(): no operator {:?}", op_id);
                    return fail(self, callback, Status::CmdFailed);
                },
            };
        if !con_id.may_message(owner) {
            warn!("operator_message(): {:?} does not own {:?}", con_id, op_id);
            return fail(self, callback, Status::CmdFailed);
        }

        if processor_id != self.processor_id() {
            return self.send_remote_operator_message(con_id, op_id, params, processor_id, callback);
        }
        let task_id: TaskId = match task_id {
            Some(task_id) if self.sched.is_live(task_id) => task_id,
            _ => return fail(self, callback, Status::CmdFailed),
        };
        let payload: Payload = Box::new(MessageRequest {
            con_id,
            params: params.to_vec(),
            callback,
        });
        let routing: RoutingInfo = RoutingInfo {
            src_id: con_id.raw() as u32,
            dest_id: op_id.to_int().0 as u32,
        };
        self.sched
            .put_message_with_routing(task_id, OPCMD_MESSAGE, Some(payload), routing);
    }

    /// Hands an operator message to the capability instance, on the operator's own task.
    pub(super) fn deliver_operator_message(&mut self, op_id: IntOpId, request: MessageRequest) {
        let MessageRequest {
            con_id,
            params,
            callback,
        } = request;
        let outcome: Result<Vec<u16>, u32> = match self.registry.get_op_data_from_id_mut(op_id) {
            Some(op) => match op.instance.as_mut() {
                Some(instance) => instance.message(&params),
                None => Err(ERR_OP_NOT_FOUND),
            },
            None => Err(ERR_OP_NOT_FOUND),
        };
        let (status, response): (Status, Vec<u16>) = match outcome {
            Ok(response) => (Status::Ok, response),
            Err(code) => {
                debug!("deliver_operator_message(): {:?} failed (err_code={:#x})", op_id.to_ext(), code);
                (Status::CmdFailed, vec![code as u16])
            },
        };
        callback(
            self,
            MessageResult {
                con_id,
                status,
                op_id: op_id.to_ext(),
                response,
            },
        );
    }

    /// Runs one processing pass of a local operator.
    pub(super) fn process_operator(&mut self, op_id: IntOpId) {
        match self.registry.get_op_data_from_id_mut(op_id) {
            Some(op) if op.state == OpState::Running => {
                if let Some(instance) = op.instance.as_mut() {
                    instance.process();
                }
            },
            Some(_) => trace!("process_operator(): {:?} is not running", op_id.to_ext()),
            None => debug!("process_operator(): no operator {:?}", op_id.to_ext()),
        }
    }

    /// Raises the bg-int of a local operator, which runs one processing pass.
    pub fn kick_operator(&mut self, op_id: ExtOpId) -> Result<(), Fail> {
        let task_id: Option<TaskId> = self
            .registry
            .get_op_data_from_id(op_id.to_int())
            .and_then(|op| op.task_id);
        match task_id {
            Some(task_id) if self.sched.is_live(task_id.as_bg_int()) => {
                self.sched.raise_bg_int(task_id);
                Ok(())
            },
            _ => {
                let cause: String = format!("no local operator {:?}", op_id);
                Err(Fail::new(libc::ENOENT, &cause))
            },
        }
    }

    /// Reports a page of the operator ids, optionally only those of capability `cap_id`.
    pub fn get_opid_list_cmd(
        &mut self,
        con_id: ConnectionId,
        cap_id: Option<CapId>,
        skip: usize,
        max_count: usize,
        callback: EnumerationCallback<(ExtOpId, CapId)>,
    ) {
        if max_count == 0 {
            return callback(self, EnumerationResult::failed(con_id, Status::InvalidCmdParams));
        }
        let (total, page) = self
            .registry
            .get_opid_list(cap_id, skip, max_count.min(MAX_OPS_PER_LIST_CMD));
        callback(
            self,
            EnumerationResult {
                con_id,
                status: Status::Ok,
                total,
                page,
            },
        );
    }

    /// Reports a page of the capability ids, static ones first.
    pub fn get_capid_list_cmd(
        &mut self,
        con_id: ConnectionId,
        skip: usize,
        max_count: usize,
        callback: EnumerationCallback<CapId>,
    ) {
        if max_count == 0 {
            return callback(self, EnumerationResult::failed(con_id, Status::InvalidCmdParams));
        }
        let (total, page) = self.caps.get_capid_list(skip, max_count.min(MAX_OPS_PER_LIST_CMD));
        callback(
            self,
            EnumerationResult {
                con_id,
                status: Status::Ok,
                total,
                page,
            },
        );
    }

    /// Registers a downloadable capability. Its code is fetched when the first operator is created from it.
    pub fn install_capability(&mut self, data: CapabilityData) -> Result<(), Fail> {
        self.caps.install(data)
    }

    /// Removes a downloadable capability that no operator uses.
    pub fn uninstall_capability(&mut self, cap_id: CapId) -> Result<(), Fail> {
        let in_use: usize = self.registry.ops_count(Some(cap_id)) + self.registry.remote_ops_count(Some(cap_id));
        let waiting: bool = self.deferred_creates.iter().any(|deferred| deferred.params.cap_id == cap_id);
        if in_use > 0 || waiting {
            let cause: String = format!("capability {:?} is in use by {} operators", cap_id, in_use);
            warn!("uninstall_capability(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        self.caps.uninstall(cap_id)
    }
}

impl<T> EnumerationResult<T> {
    fn failed(con_id: ConnectionId, status: Status) -> Self {
        Self {
            con_id,
            status,
            total: 0,
            page: Vec::new(),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Tears down the stream endpoints of an operator before it is destroyed. A local operator must be stopped first.
/// A remote operator is left alone: its own core tears its endpoints down once it accepts the destroy.
pub(super) fn destroy_op_endpoints(opmgr: &mut SharedOpMgr, op_id: IntOpId) -> Result<(), u32> {
    let local_processor: u8 = opmgr.processor_id();
    let (ext_id, num_sinks, num_sources): (ExtOpId, usize, usize) =
        match opmgr.registry.get_anycore_op_data_from_id(op_id) {
            None => return Err(ERR_OP_NOT_FOUND),
            Some(op) if op.processor_id != local_processor => {
                trace!("destroy_op_endpoints(): {:?} lives on processor {}", op.ext_id(), op.processor_id);
                return Ok(());
            },
            Some(op) if op.state == OpState::Running => {
                debug!("destroy_op_endpoints(): {:?} is running", op.ext_id());
                return Err(ERR_OP_RUNNING);
            },
            Some(op) => (op.ext_id(), op.cap.max_sinks, op.cap.max_sources),
        };
    if opmgr.streams.destroy_operator_endpoints(ext_id, num_sinks, num_sources) {
        Ok(())
    } else {
        warn!("destroy_op_endpoints(): endpoints of {:?} refused teardown", ext_id);
        Err(ERR_PREPROC_FAILED)
    }
}
