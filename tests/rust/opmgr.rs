// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::kymera::{
    ensure_eq,
    opmgr::{
        capability::{
            BasicPassthrough,
            CapabilityData,
            DownloadStatus,
            CAP_ID_BASIC_PASSTHROUGH,
        },
        download::{
            CapDownloadManager,
            DownloadProgress,
        },
        registry::OpList,
        types::{
            CLIENT_ID_INTERNAL,
            CLIENT_ID_OBPM,
            ERR_NOT_OWNER,
            ERR_NO_AGGREGATE,
            ERR_OP_NOT_FOUND,
            ERR_OP_RUNNING,
            ERR_PREPROC_FAILED,
        },
        CapId,
        ConnectionId,
        ConnectionPeer,
        CreateKeyValue,
        CreateResult,
        EnumerationResult,
        ExtOpId,
        IntOpId,
        ListResult,
        MessageResult,
        OpState,
        Status,
        OPERATOR_CREATE_KEY_PRIORITY,
        OPERATOR_CREATE_KEY_PROCESSOR_ID,
    },
    Core,
    OpMgrConfig,
    Priority,
};
use common::{
    capture,
    core_with,
    create_on,
    destroy,
    events,
    holds,
    single_core,
    start,
    state_of,
    stop,
    take,
    Recorder,
    Slot,
    StreamLog,
    CAP_ID_RECORDER,
    CLIENT_A,
    CLIENT_B,
    ERR_REFUSED,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Download manager whose downloads always complete later.
struct PendingDownloads(Rc<RefCell<Vec<CapId>>>);

impl CapDownloadManager for PendingDownloads {
    fn request_download(&mut self, cap_id: CapId) -> DownloadProgress {
        self.0.borrow_mut().push(cap_id);
        DownloadProgress::Pending
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn fixture() -> Result<(Core, Recorder, Rc<RefCell<StreamLog>>)> {
    let recorder: Recorder = Recorder::default();
    let streams: Rc<RefCell<StreamLog>> = Rc::new(RefCell::new(StreamLog::default()));
    let core: Core = single_core(&recorder, &streams)?;
    Ok((core, recorder, streams))
}

fn create_with(core: &mut Core, cap_id: CapId, keys: &[CreateKeyValue]) -> Result<CreateResult> {
    let (slot, callback) = capture::<CreateResult>();
    core.opmgr
        .create_operator_ex(ConnectionId::from_client(CLIENT_A), cap_id, None, keys, callback);
    core.run()?;
    take(&slot)
}

//======================================================================================================================
// Lifecycle
//======================================================================================================================

/// Two auto-numbered operators started by one list command both end up running.
#[test]
fn start_two_operators_in_one_command() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let b: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    ensure_eq!(a != b, true);
    ensure_eq!(state_of(&core, a), Some(OpState::NotRunning));
    ensure_eq!(state_of(&core, b), Some(OpState::NotRunning));

    let result: ListResult = start(&mut [&mut core], CLIENT_A, &[a, b])?;
    ensure_eq!(result.status, Status::Ok);
    ensure_eq!(result.count, 2);
    ensure_eq!(result.con_id, ConnectionId::from_client(CLIENT_A));
    ensure_eq!(state_of(&core, a), Some(OpState::Running));
    ensure_eq!(state_of(&core, b), Some(OpState::Running));
    ensure_eq!(events(&recorder, "start"), vec![(0, a), (0, b)]);

    // Starting again is accepted and changes nothing.
    let result: ListResult = start(&mut [&mut core], CLIENT_A, &[b])?;
    ensure_eq!((result.status, result.count), (Status::Ok, 1));
    ensure_eq!(events(&recorder, "start").len(), 2);
    ensure_eq!(core.opmgr.aggregates_in_flight(), 0);
    core.shutdown();
    Ok(())
}

/// The first failing operator ends the command and the count covers the operators before it.
#[test]
fn failing_operator_stops_the_list() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let mut ops: Vec<ExtOpId> = Vec::new();
    for _ in 0..3 {
        ops.push(create_on(&mut [&mut core], CLIENT_A, 0)?);
    }
    recorder.borrow_mut().refuse_start.push(ops[1]);

    let result: ListResult = start(&mut [&mut core], CLIENT_A, &ops)?;
    ensure_eq!(
        (result.status, result.count, result.err_code),
        (Status::CmdFailed, 1, ERR_REFUSED)
    );
    ensure_eq!(state_of(&core, ops[0]), Some(OpState::Running));
    ensure_eq!(state_of(&core, ops[1]), Some(OpState::NotRunning));
    ensure_eq!(state_of(&core, ops[2]), Some(OpState::NotRunning));
    core.shutdown();
    Ok(())
}

/// Reset is refused while running and reaches the capability once stopped.
#[test]
fn reset_requires_a_stopped_operator() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    start(&mut [&mut core], CLIENT_A, &[a])?;

    let (slot, callback) = capture::<ListResult>();
    core.opmgr.reset_operator(ConnectionId::from_client(CLIENT_A), &[a], callback);
    core.run()?;
    let result: ListResult = take(&slot)?;
    ensure_eq!((result.status, result.err_code), (Status::CmdFailed, ERR_OP_RUNNING));

    stop(&mut [&mut core], CLIENT_A, &[a])?;
    let (slot, callback) = capture::<ListResult>();
    core.opmgr.reset_operator(ConnectionId::from_client(CLIENT_A), &[a], callback);
    core.run()?;
    ensure_eq!(take(&slot)?.status, Status::Ok);
    ensure_eq!(events(&recorder, "reset"), vec![(0, a)]);
    core.shutdown();
    Ok(())
}

/// Destroy tears endpoints down, frees the operator tasks and refuses running operators.
#[test]
fn destroy_frees_stopped_operators() -> Result<()> {
    let (mut core, recorder, streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let b: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    ensure_eq!(core.sched.num_allocated(), 2);

    start(&mut [&mut core], CLIENT_A, &[a])?;
    let result: ListResult = destroy(&mut [&mut core], CLIENT_A, &[a, b])?;
    ensure_eq!(
        (result.status, result.count, result.err_code),
        (Status::CmdFailed, 0, ERR_OP_RUNNING)
    );
    ensure_eq!(holds(&core, OpList::Local, a), true);

    stop(&mut [&mut core], CLIENT_A, &[a])?;
    let result: ListResult = destroy(&mut [&mut core], CLIENT_A, &[a, b])?;
    ensure_eq!((result.status, result.count), (Status::Ok, 2));
    ensure_eq!(holds(&core, OpList::Local, a), false);
    ensure_eq!(holds(&core, OpList::Local, b), false);
    ensure_eq!(streams.borrow().destroyed.clone(), vec![a, b]);
    ensure_eq!(events(&recorder, "destroy"), vec![(0, a), (0, b)]);
    ensure_eq!(core.sched.num_allocated(), 0);
    core.shutdown();
    Ok(())
}

/// An endpoint teardown refusal keeps the operator alive.
#[test]
fn destroy_honours_endpoint_refusal() -> Result<()> {
    let (mut core, _recorder, streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    streams.borrow_mut().refuse.push(a);
    let result: ListResult = destroy(&mut [&mut core], CLIENT_A, &[a])?;
    ensure_eq!((result.status, result.err_code), (Status::CmdFailed, ERR_PREPROC_FAILED));
    ensure_eq!(holds(&core, OpList::Local, a), true);
    core.shutdown();
    Ok(())
}

/// Malformed and unknown lists are rejected before any operator is touched.
#[test]
fn malformed_lists_are_rejected() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let result: ListResult = start(&mut [&mut core], CLIENT_A, &[])?;
    ensure_eq!(result.status, Status::InvalidCmdParams);
    let result: ListResult = start(&mut [&mut core], CLIENT_A, &[ExtOpId(0x1234)])?;
    ensure_eq!(result.status, Status::InvalidCmdParams);
    let result: ListResult = start(&mut [&mut core], CLIENT_A, &[IntOpId(50).to_ext()])?;
    ensure_eq!((result.status, result.err_code), (Status::CmdFailed, ERR_OP_NOT_FOUND));
    ensure_eq!(recorder.borrow().events.len(), 0);
    core.shutdown();
    Ok(())
}

//======================================================================================================================
// Ownership
//======================================================================================================================

/// Only the creating client and the privileged client may command an operator.
#[test]
fn foreign_clients_cannot_command() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    start(&mut [&mut core], CLIENT_A, &[a])?;

    let result: ListResult = stop(&mut [&mut core], CLIENT_B, &[a])?;
    ensure_eq!(
        (result.status, result.count, result.err_code),
        (Status::CmdFailed, 0, ERR_NOT_OWNER)
    );
    let result: ListResult = destroy(&mut [&mut core], CLIENT_B, &[a])?;
    ensure_eq!(result.status, Status::CmdFailed);

    let (slot, callback) = capture::<MessageResult>();
    core.opmgr
        .operator_message(ConnectionId::from_client(CLIENT_B), a, &[1], callback);
    core.run()?;
    ensure_eq!(take(&slot)?.status, Status::CmdFailed);

    ensure_eq!(state_of(&core, a), Some(OpState::Running));
    ensure_eq!(events(&recorder, "stop").len(), 0);
    ensure_eq!(events(&recorder, "message").len(), 0);

    let result: ListResult = stop(&mut [&mut core], CLIENT_ID_OBPM, &[a])?;
    ensure_eq!(result.status, Status::Ok);
    ensure_eq!(state_of(&core, a), Some(OpState::NotRunning));
    core.shutdown();
    Ok(())
}

/// Ownership follows the whole sending peer, so the same client number on another processor owns nothing.
#[test]
fn same_client_on_another_processor_cannot_command() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let intruder: ConnectionId =
        ConnectionId::new(ConnectionPeer::new(3, CLIENT_A), ConnectionPeer::new(0, CLIENT_ID_INTERNAL));
    ensure_eq!(core.opmgr.registry().ops_owned_by(intruder).len(), 0);

    let (slot, callback) = capture::<ListResult>();
    core.opmgr.start_operator(intruder, &[a], callback);
    core.run()?;
    let result: ListResult = take(&slot)?;
    ensure_eq!(
        (result.status, result.count, result.err_code),
        (Status::CmdFailed, 0, ERR_NOT_OWNER)
    );

    let (slot, callback) = capture::<MessageResult>();
    core.opmgr.operator_message(intruder, a, &[1], callback);
    core.run()?;
    ensure_eq!(take(&slot)?.status, Status::CmdFailed);

    ensure_eq!(state_of(&core, a), Some(OpState::NotRunning));
    ensure_eq!(events(&recorder, "start").len(), 0);
    ensure_eq!(events(&recorder, "message").len(), 0);
    core.shutdown();
    Ok(())
}

/// Tearing a client down stops and destroys its operators only.
#[test]
fn destroy_ops_by_con_id_spares_other_clients() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a1: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let a2: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let b1: ExtOpId = create_on(&mut [&mut core], CLIENT_B, 0)?;
    start(&mut [&mut core], CLIENT_A, &[a1])?;
    start(&mut [&mut core], CLIENT_B, &[b1])?;

    let (slot, callback) = capture::<ListResult>();
    core.opmgr.destroy_ops_by_con_id(ConnectionId::from_client(CLIENT_A), callback);
    core.run()?;
    let result: ListResult = take(&slot)?;
    ensure_eq!((result.status, result.count), (Status::Ok, 2));

    ensure_eq!(events(&recorder, "stop"), vec![(0, a1)]);
    let destroyed: Vec<ExtOpId> = events(&recorder, "destroy").into_iter().map(|(_, op)| op).collect();
    ensure_eq!(destroyed.len(), 2);
    ensure_eq!(destroyed.contains(&a1) && destroyed.contains(&a2), true);
    ensure_eq!(holds(&core, OpList::Local, b1), true);
    ensure_eq!(state_of(&core, b1), Some(OpState::Running));
    ensure_eq!(core.opmgr.registry().ops_count(None), 1);

    // A client without operators gets an immediate success.
    let (slot, callback) = capture::<ListResult>();
    core.opmgr.destroy_ops_by_con_id(ConnectionId::from_client(CLIENT_A), callback);
    ensure_eq!(take(&slot)?, ListResult::new(ConnectionId::from_client(CLIENT_A), Status::Ok, 0, 0));
    core.shutdown();
    Ok(())
}

//======================================================================================================================
// Create
//======================================================================================================================

/// Create keys select the task priority. Unknown keys and out of range values fail the request.
#[test]
fn create_keys_are_validated() -> Result<()> {
    let (mut core, _recorder, _streams) = fixture()?;
    let keys: [CreateKeyValue; 1] = [CreateKeyValue::new(OPERATOR_CREATE_KEY_PRIORITY, 4)];
    let result: CreateResult = create_with(&mut core, CAP_ID_RECORDER, &keys)?;
    ensure_eq!(result.status, Status::Ok);
    let priority: Option<Priority> = core
        .opmgr
        .registry()
        .get_op_data_from_id(result.op_id.to_int())
        .and_then(|op| op.task_id)
        .and_then(|task_id| task_id.priority());
    ensure_eq!(priority, Some(Priority::Highest));

    let rejected: [Vec<CreateKeyValue>; 3] = [
        vec![CreateKeyValue::new(OPERATOR_CREATE_KEY_PRIORITY, 9)],
        vec![CreateKeyValue::new(OPERATOR_CREATE_KEY_PROCESSOR_ID, 1)],
        vec![CreateKeyValue::new(0x0077, 0)],
    ];
    for keys in rejected.iter() {
        ensure_eq!(create_with(&mut core, CAP_ID_RECORDER, keys)?.status, Status::InvalidCmdParams);
    }
    ensure_eq!(create_with(&mut core, CapId(0x7777), &[])?.status, Status::CmdFailed);
    ensure_eq!(core.opmgr.registry().ops_count(None), 1);
    core.shutdown();
    Ok(())
}

/// Creates aimed at a secondary core that has not started run locally only with thread offload.
#[test]
fn thread_offload_redirects_to_primary() -> Result<()> {
    let recorder: Recorder = Recorder::default();
    let streams: Rc<RefCell<StreamLog>> = Rc::new(RefCell::new(StreamLog::default()));
    let keys: [CreateKeyValue; 1] = [CreateKeyValue::new(OPERATOR_CREATE_KEY_PROCESSOR_ID, 1)];

    let strict: OpMgrConfig = OpMgrConfig {
        num_processors: 2,
        ..Default::default()
    };
    let mut core: Core = core_with(strict, &recorder, &streams)?;
    ensure_eq!(create_with(&mut core, CAP_ID_RECORDER, &keys)?.status, Status::CmdFailed);
    core.shutdown();

    let offload: OpMgrConfig = OpMgrConfig {
        num_processors: 2,
        thread_offload: true,
        ..Default::default()
    };
    let mut core: Core = core_with(offload, &recorder, &streams)?;
    let result: CreateResult = create_with(&mut core, CAP_ID_RECORDER, &keys)?;
    ensure_eq!(result.status, Status::Ok);
    ensure_eq!(core.opmgr.registry().get_processor_id_from_opid(result.op_id.to_int()), Some(0));
    ensure_eq!(events(&recorder, "create"), vec![(0, result.op_id)]);
    core.shutdown();
    Ok(())
}

/// Creates of a downloadable capability wait for the download and share it.
#[test]
fn creates_wait_for_capability_download() -> Result<()> {
    let (mut core, _recorder, _streams) = fixture()?;
    let requests: Rc<RefCell<Vec<CapId>>> = Rc::new(RefCell::new(Vec::new()));
    core.opmgr
        .set_download_manager(Box::new(PendingDownloads(requests.clone())));
    let cap_id: CapId = CapId(0x4100);
    core.opmgr
        .install_capability(CapabilityData::new(cap_id, 1, 1, Rc::new(BasicPassthrough)))?;

    let con_id: ConnectionId = ConnectionId::from_client(CLIENT_A);
    let (first, callback) = capture::<CreateResult>();
    core.opmgr.create_operator(con_id, cap_id, callback);
    let (second, callback) = capture::<CreateResult>();
    core.opmgr.create_operator(con_id, cap_id, callback);
    core.run()?;
    ensure_eq!(first.borrow().is_none() && second.borrow().is_none(), true);
    ensure_eq!(requests.borrow().clone(), vec![cap_id]);
    ensure_eq!(core.opmgr.capabilities().download_status(cap_id), Some(DownloadStatus::Downloading));
    match core.opmgr.uninstall_capability(cap_id) {
        Err(e) => ensure_eq!(e.errno, libc::EBUSY),
        Ok(()) => anyhow::bail!("capability with waiting creates should not be removed"),
    }

    core.opmgr.cap_download_complete(cap_id, true);
    core.run()?;
    let (first, second): (CreateResult, CreateResult) = (take(&first)?, take(&second)?);
    ensure_eq!((first.status, second.status), (Status::Ok, Status::Ok));
    ensure_eq!(first.op_id != second.op_id, true);
    ensure_eq!(core.opmgr.capabilities().download_status(cap_id), Some(DownloadStatus::Ready));
    ensure_eq!(core.opmgr.uninstall_capability(cap_id).is_err(), true);
    core.shutdown();
    Ok(())
}

/// A failed download fails every create waiting for it.
#[test]
fn failed_download_fails_waiting_creates() -> Result<()> {
    let (mut core, _recorder, _streams) = fixture()?;
    let requests: Rc<RefCell<Vec<CapId>>> = Rc::new(RefCell::new(Vec::new()));
    core.opmgr.set_download_manager(Box::new(PendingDownloads(requests)));
    let cap_id: CapId = CapId(0x4101);
    core.opmgr
        .install_capability(CapabilityData::new(cap_id, 1, 1, Rc::new(BasicPassthrough)))?;

    let (slot, callback) = capture::<CreateResult>();
    core.opmgr
        .create_operator(ConnectionId::from_client(CLIENT_A), cap_id, callback);
    core.opmgr.cap_download_complete(cap_id, false);
    ensure_eq!(take(&slot)?.status, Status::CmdFailed);
    ensure_eq!(core.opmgr.capabilities().download_status(cap_id), Some(DownloadStatus::Installed));
    core.opmgr.uninstall_capability(cap_id)?;
    core.shutdown();
    Ok(())
}

//======================================================================================================================
// Messages and processing
//======================================================================================================================

/// Operator messages reach the capability and carry its response back.
#[test]
fn operator_message_round_trip() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;

    let (slot, callback) = capture::<MessageResult>();
    core.opmgr
        .operator_message(ConnectionId::from_client(CLIENT_A), a, &[7, 8], callback);
    ensure_eq!(slot.borrow().is_none(), true);
    core.run()?;
    let result: MessageResult = take(&slot)?;
    ensure_eq!(result.status, Status::Ok);
    ensure_eq!(result.response, vec![0, 7, 8]);
    ensure_eq!(events(&recorder, "message"), vec![(0, a)]);

    let (slot, callback) = capture::<MessageResult>();
    core.opmgr
        .operator_message(ConnectionId::from_client(CLIENT_A), a, &[], callback);
    ensure_eq!(take(&slot)?.status, Status::InvalidCmdParams);
    core.shutdown();
    Ok(())
}

/// Kicks only process running operators.
#[test]
fn kicks_process_running_operators() -> Result<()> {
    let (mut core, recorder, _streams) = fixture()?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    core.opmgr.kick_operator(a)?;
    core.run()?;
    ensure_eq!(events(&recorder, "process").len(), 0);

    start(&mut [&mut core], CLIENT_A, &[a])?;
    core.opmgr.kick_operator(a)?;
    core.opmgr.kick_operator(a)?;
    core.run()?;
    ensure_eq!(events(&recorder, "process"), vec![(0, a)]);

    match core.opmgr.kick_operator(IntOpId(60).to_ext()) {
        Err(e) => ensure_eq!(e.errno, libc::ENOENT),
        Ok(()) => anyhow::bail!("kicking an unknown operator should fail"),
    }
    core.shutdown();
    Ok(())
}

//======================================================================================================================
// Enumeration and aggregates
//======================================================================================================================

/// Operator and capability lists page with a total that ignores paging.
#[test]
fn enumeration_pages() -> Result<()> {
    let (mut core, _recorder, _streams) = fixture()?;
    let mut ops: Vec<ExtOpId> = Vec::new();
    for _ in 0..3 {
        ops.push(create_on(&mut [&mut core], CLIENT_A, 0)?);
    }
    let con_id: ConnectionId = ConnectionId::from_client(CLIENT_A);

    let (slot, callback) = capture::<EnumerationResult<(ExtOpId, CapId)>>();
    core.opmgr.get_opid_list_cmd(con_id, None, 0, 2, callback);
    let first: EnumerationResult<(ExtOpId, CapId)> = take(&slot)?;
    ensure_eq!((first.status, first.total, first.page.len()), (Status::Ok, 3, 2));

    let (slot, callback) = capture::<EnumerationResult<(ExtOpId, CapId)>>();
    core.opmgr.get_opid_list_cmd(con_id, Some(CAP_ID_RECORDER), 2, 2, callback);
    let rest: EnumerationResult<(ExtOpId, CapId)> = take(&slot)?;
    ensure_eq!((rest.total, rest.page.len()), (3, 1));
    let mut listed: Vec<ExtOpId> = first.page.iter().chain(rest.page.iter()).map(|(op, _)| *op).collect();
    listed.sort();
    ensure_eq!(listed, ops);

    let (slot, callback) = capture::<EnumerationResult<(ExtOpId, CapId)>>();
    core.opmgr
        .get_opid_list_cmd(con_id, Some(CAP_ID_BASIC_PASSTHROUGH), 0, 8, callback);
    ensure_eq!(take(&slot)?.total, 0);

    let (slot, callback) = capture::<EnumerationResult<(ExtOpId, CapId)>>();
    core.opmgr.get_opid_list_cmd(con_id, None, 0, 0, callback);
    ensure_eq!(take(&slot)?.status, Status::InvalidCmdParams);

    let (slot, callback) = capture::<EnumerationResult<CapId>>();
    core.opmgr.get_capid_list_cmd(con_id, 0, 8, callback);
    let caps: EnumerationResult<CapId> = take(&slot)?;
    ensure_eq!((caps.total, caps.page), (2, vec![CAP_ID_BASIC_PASSTHROUGH, CAP_ID_RECORDER]));
    core.shutdown();
    Ok(())
}

/// List commands beyond the aggregate pool are rejected, or queued when a queue is configured.
#[test]
fn aggregate_pool_is_bounded() -> Result<()> {
    let recorder: Recorder = Recorder::default();
    let streams: Rc<RefCell<StreamLog>> = Rc::new(RefCell::new(StreamLog::default()));
    let config: OpMgrConfig = OpMgrConfig {
        num_aggregates: 1,
        aggregate_queue_depth: 1,
        ..Default::default()
    };
    let mut core: Core = core_with(config, &recorder, &streams)?;
    let a: ExtOpId = create_on(&mut [&mut core], CLIENT_A, 0)?;
    let con_id: ConnectionId = ConnectionId::from_client(CLIENT_A);

    let mut slots: Vec<Slot<ListResult>> = Vec::new();
    for _ in 0..3 {
        let (slot, callback) = capture::<ListResult>();
        core.opmgr.start_operator(con_id, &[a], callback);
        slots.push(slot);
    }
    ensure_eq!(core.opmgr.aggregates_in_flight(), 1);
    ensure_eq!(core.opmgr.aggregates_waiting(), 1);
    ensure_eq!(take(&slots[2])?, ListResult::new(con_id, Status::CmdFailed, 0, ERR_NO_AGGREGATE));

    core.run()?;
    ensure_eq!(take(&slots[0])?.status, Status::Ok);
    ensure_eq!(take(&slots[1])?.status, Status::Ok);
    ensure_eq!(core.opmgr.aggregates_in_flight() + core.opmgr.aggregates_waiting(), 0);
    core.shutdown();
    Ok(())
}
