// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Inter-processor link between the primary core and a secondary core.
//!
//! Every frame is a sequence of 16-bit words:
//!
//! ```text
//! [msg_id, body_len, con_id, body[0], ..., body[body_len - 1], crc16]
//! ```
//!
//! The checksum covers every preceding word in little-endian byte order. A response carries the message id of its
//! request with the top bit set and the connection id of its request reversed.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::{
        commands::{
            destroy_op_endpoints,
            CreateKeyValue,
            OPERATOR_CREATE_KEY_PRIORITY,
        },
        registry::{
            OpList,
            OperatorData,
        },
        types::{
            CapId,
            ConnectionId,
            ConnectionPeer,
            CreateCallback,
            CreateResult,
            ExtOpId,
            IntOpId,
            ListCmd,
            ListResult,
            MessageCallback,
            MessageResult,
            PreProc,
            Status,
            CLIENT_ID_INTERNAL,
        },
        OpMgr,
        SharedOpMgr,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            Payload,
            Priority,
            SharedScheduler,
            TaskHandler,
            TaskId,
            TaskKind,
        },
    },
};
use ::crc::{
    Crc,
    CRC_16_IBM_SDLC,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
    TryRecvError,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const KIP_MSG_ID_START_REQ: u16 = 0x1001;
pub const KIP_MSG_ID_STOP_REQ: u16 = 0x1002;
pub const KIP_MSG_ID_RESET_REQ: u16 = 0x1003;
pub const KIP_MSG_ID_DESTROY_REQ: u16 = 0x1004;
pub const KIP_MSG_ID_RUN_UNTIL_PREPROC_REQ: u16 = 0x1005;
pub const KIP_MSG_ID_CREATE_REQ: u16 = 0x1006;
pub const KIP_MSG_ID_OPMSG_REQ: u16 = 0x1007;
/// Set in the message id of every response.
pub const KIP_MSG_ID_RESPONSE_BIT: u16 = 0x8000;

const KIP_HEADER_WORDS: usize = 3;

/// Scheduler tag of a received frame queued on the receive task.
const KIP_FRAME_TAG: u16 = 0x0100;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Decoded body of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KipMessage {
    CreateOperatorReq {
        cap_id: CapId,
        op_id: ExtOpId,
        priority: u16,
    },
    CreateOperatorRes {
        status: Status,
        op_id: ExtOpId,
    },
    ListReq {
        cmd: ListCmd,
        ops: Vec<ExtOpId>,
    },
    ListRes {
        cmd: ListCmd,
        status: Status,
        count: usize,
        err_code: u32,
    },
    OperatorMessageReq {
        op_id: ExtOpId,
        params: Vec<u16>,
    },
    OperatorMessageRes {
        status: Status,
        op_id: ExtOpId,
        response: Vec<u16>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KipFrame {
    pub con_id: ConnectionId,
    pub message: KipMessage,
}

/// One end of the link.
pub struct KipEndpoint {
    tx: Sender<Vec<u16>>,
    rx: Receiver<Vec<u16>>,
}

/// Link attached to an operator manager.
pub(super) struct KipPort {
    endpoint: KipEndpoint,
    /// Task that handles received frames.
    rx_task: TaskId,
    frames_sent: usize,
    frames_received: usize,
}

/// Request awaiting a reply from the secondary core.
pub(super) enum PendingRemote {
    Create(CreateCallback),
    Message(MessageCallback),
}

struct KipRxTask {
    opmgr: SharedOpMgr,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl KipMessage {
    fn list_msg_id(cmd: ListCmd) -> u16 {
        match cmd {
            ListCmd::Start => KIP_MSG_ID_START_REQ,
            ListCmd::Stop => KIP_MSG_ID_STOP_REQ,
            ListCmd::Reset => KIP_MSG_ID_RESET_REQ,
            ListCmd::Destroy => KIP_MSG_ID_DESTROY_REQ,
            ListCmd::RunUntilPreproc => KIP_MSG_ID_RUN_UNTIL_PREPROC_REQ,
        }
    }

    fn list_cmd(msg_id: u16) -> Option<ListCmd> {
        match msg_id {
            KIP_MSG_ID_START_REQ => Some(ListCmd::Start),
            KIP_MSG_ID_STOP_REQ => Some(ListCmd::Stop),
            KIP_MSG_ID_RESET_REQ => Some(ListCmd::Reset),
            KIP_MSG_ID_DESTROY_REQ => Some(ListCmd::Destroy),
            KIP_MSG_ID_RUN_UNTIL_PREPROC_REQ => Some(ListCmd::RunUntilPreproc),
            _ => None,
        }
    }

    /// Message id and body words.
    fn to_words(&self) -> (u16, Vec<u16>) {
        match self {
            KipMessage::CreateOperatorReq {
                cap_id,
                op_id,
                priority,
            } => (KIP_MSG_ID_CREATE_REQ, vec![cap_id.0, op_id.0, *priority]),
            KipMessage::CreateOperatorRes { status, op_id } => (
                KIP_MSG_ID_CREATE_REQ | KIP_MSG_ID_RESPONSE_BIT,
                vec![status.raw(), op_id.0],
            ),
            KipMessage::ListReq { cmd, ops } => {
                let mut body: Vec<u16> = Vec::with_capacity(ops.len() + 1);
                body.push(ops.len() as u16);
                body.extend(ops.iter().map(|op_id| op_id.0));
                (Self::list_msg_id(*cmd), body)
            },
            KipMessage::ListRes {
                cmd,
                status,
                count,
                err_code,
            } => (
                Self::list_msg_id(*cmd) | KIP_MSG_ID_RESPONSE_BIT,
                vec![status.raw(), *count as u16, *err_code as u16, (*err_code >> 16) as u16],
            ),
            KipMessage::OperatorMessageReq { op_id, params } => {
                let mut body: Vec<u16> = Vec::with_capacity(params.len() + 1);
                body.push(op_id.0);
                body.extend_from_slice(params);
                (KIP_MSG_ID_OPMSG_REQ, body)
            },
            KipMessage::OperatorMessageRes {
                status,
                op_id,
                response,
            } => {
                let mut body: Vec<u16> = Vec::with_capacity(response.len() + 2);
                body.push(status.raw());
                body.push(op_id.0);
                body.extend_from_slice(response);
                (KIP_MSG_ID_OPMSG_REQ | KIP_MSG_ID_RESPONSE_BIT, body)
            },
        }
    }

    fn from_words(msg_id: u16, body: &[u16]) -> Result<Self, Fail> {
        let is_response: bool = (msg_id & KIP_MSG_ID_RESPONSE_BIT) != 0;
        let request_id: u16 = msg_id & !KIP_MSG_ID_RESPONSE_BIT;
        let status = |raw: u16| -> Result<Status, Fail> {
            Status::from_raw(raw).ok_or_else(|| Fail::new(libc::EBADMSG, "invalid status"))
        };
        let message: Option<KipMessage> = match (request_id, is_response, body) {
            (KIP_MSG_ID_CREATE_REQ, false, [cap_id, op_id, priority]) => Some(KipMessage::CreateOperatorReq {
                cap_id: CapId(*cap_id),
                op_id: ExtOpId(*op_id),
                priority: *priority,
            }),
            (KIP_MSG_ID_CREATE_REQ, true, [raw_status, op_id]) => Some(KipMessage::CreateOperatorRes {
                status: status(*raw_status)?,
                op_id: ExtOpId(*op_id),
            }),
            (KIP_MSG_ID_OPMSG_REQ, false, [op_id, params @ ..]) => Some(KipMessage::OperatorMessageReq {
                op_id: ExtOpId(*op_id),
                params: params.to_vec(),
            }),
            (KIP_MSG_ID_OPMSG_REQ, true, [raw_status, op_id, response @ ..]) => Some(KipMessage::OperatorMessageRes {
                status: status(*raw_status)?,
                op_id: ExtOpId(*op_id),
                response: response.to_vec(),
            }),
            (id, false, [count, ops @ ..]) if ops.len() == *count as usize => {
                Self::list_cmd(id).map(|cmd| KipMessage::ListReq {
                    cmd,
                    ops: ops.iter().map(|op_id| ExtOpId(*op_id)).collect(),
                })
            },
            (id, true, [raw_status, count, err_lo, err_hi]) => match Self::list_cmd(id) {
                Some(cmd) => Some(KipMessage::ListRes {
                    cmd,
                    status: status(*raw_status)?,
                    count: *count as usize,
                    err_code: (*err_lo as u32) | ((*err_hi as u32) << 16),
                }),
                None => None,
            },
            _ => None,
        };
        match message {
            Some(message) => Ok(message),
            None => {
                let cause: String = format!("malformed body (msg_id={:#06x}, len={})", msg_id, body.len());
                Err(Fail::new(libc::EBADMSG, &cause))
            },
        }
    }
}

impl KipFrame {
    pub fn new(con_id: ConnectionId, message: KipMessage) -> Self {
        Self { con_id, message }
    }

    pub fn encode(&self) -> Vec<u16> {
        let (msg_id, body): (u16, Vec<u16>) = self.message.to_words();
        let mut words: Vec<u16> = Vec::with_capacity(KIP_HEADER_WORDS + body.len() + 1);
        words.push(msg_id);
        words.push(body.len() as u16);
        words.push(self.con_id.raw());
        words.extend(body);
        let crc: u16 = checksum(&words);
        words.push(crc);
        words
    }

    pub fn decode(words: &[u16]) -> Result<Self, Fail> {
        let (frame, crc): (&[u16], u16) = match words.split_last() {
            Some((crc, frame)) if frame.len() >= KIP_HEADER_WORDS => (frame, *crc),
            _ => return Err(Fail::new(libc::EBADMSG, "truncated frame")),
        };
        if checksum(frame) != crc {
            return Err(Fail::new(libc::EBADMSG, "checksum mismatch"));
        }
        let body_len: usize = frame[1] as usize;
        if frame.len() != KIP_HEADER_WORDS + body_len {
            let cause: String = format!("length mismatch (body_len={}, words={})", body_len, words.len());
            return Err(Fail::new(libc::EBADMSG, &cause));
        }
        Ok(Self {
            con_id: ConnectionId::from_raw(frame[2]),
            message: KipMessage::from_words(frame[0], &frame[KIP_HEADER_WORDS..])?,
        })
    }
}

impl KipEndpoint {
    /// Creates the two ends of a link.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx): (Sender<Vec<u16>>, Receiver<Vec<u16>>) = crossbeam_channel::unbounded();
        let (b_tx, a_rx): (Sender<Vec<u16>>, Receiver<Vec<u16>>) = crossbeam_channel::unbounded();
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }

    pub fn send(&self, frame: &KipFrame) -> Result<(), Fail> {
        self.tx.send(frame.encode())?;
        Ok(())
    }

    /// Receives one frame without blocking.
    pub fn try_recv(&self) -> Result<Option<KipFrame>, Fail> {
        match self.rx.try_recv() {
            Ok(words) => KipFrame::decode(&words).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl OpMgr {
    pub fn kip_frames_sent(&self) -> usize {
        self.kip.as_ref().map_or(0, |port| port.frames_sent)
    }

    pub fn kip_frames_received(&self) -> usize {
        self.kip.as_ref().map_or(0, |port| port.frames_received)
    }
}

impl SharedOpMgr {
    /// Connects this operator manager to one end of a link. Received frames are handled on a high priority task.
    pub fn attach_kip(&mut self, endpoint: KipEndpoint) -> Result<(), Fail> {
        if self.kip.is_some() {
            let cause: &str = "inter-processor link is already attached";
            error!("attach_kip(): {}", cause);
            return Err(Fail::new(libc::EBUSY, cause));
        }
        let handler: Box<KipRxTask> = Box::new(KipRxTask { opmgr: self.clone() });
        let rx_task: TaskId = self.sched.create_task(Priority::High, TaskKind::Task, handler)?;
        debug!("attach_kip(): processor {} receives on {:?}", self.processor_id(), rx_task);
        self.kip = Some(KipPort {
            endpoint,
            rx_task,
            frames_sent: 0,
            frames_received: 0,
        });
        Ok(())
    }

    /// Queues every frame received so far on the receive task. Returns the number of frames queued. Corrupt frames
    /// are dropped.
    pub fn pump_kip(&mut self) -> Result<usize, Fail> {
        let (frames, rx_task): (Vec<KipFrame>, TaskId) = match self.kip.as_mut() {
            Some(port) => {
                let mut frames: Vec<KipFrame> = Vec::new();
                loop {
                    match port.endpoint.try_recv() {
                        Ok(Some(frame)) => frames.push(frame),
                        Ok(None) => break,
                        Err(e) if e.errno == libc::EBADMSG => warn!("pump_kip(): dropping frame: {:?}", e),
                        Err(e) => return Err(e),
                    }
                }
                port.frames_received += frames.len();
                (frames, port.rx_task)
            },
            None => return Ok(0),
        };
        let count: usize = frames.len();
        for frame in frames {
            let payload: Payload = Box::new(frame);
            self.sched.put_message(rx_task, KIP_FRAME_TAG, Some(payload));
        }
        Ok(count)
    }

    fn send_kip(&mut self, frame: KipFrame) -> Result<(), Fail> {
        match self.kip.as_mut() {
            Some(port) => {
                trace!("send_kip(): {:?}", frame);
                port.endpoint.send(&frame)?;
                port.frames_sent += 1;
                Ok(())
            },
            None => Err(Fail::new(libc::ENOTCONN, "no inter-processor link")),
        }
    }

    /// Sends a reply to a request received over the link.
    fn reply(&mut self, request_con_id: ConnectionId, message: KipMessage) {
        if let Err(e) = self.send_kip(KipFrame::new(request_con_id.reversed(), message)) {
            error!("reply(): {:?}", e);
        }
    }

    /// Sends a remote run. The aggregate id travels as the client id of the receive peer.
    pub(super) fn send_kip_list_request(
        &mut self,
        agid: u8,
        con_id: ConnectionId,
        cmd: ListCmd,
        run: &[IntOpId],
        processor_id: u8,
    ) -> Result<(), Fail> {
        let message: KipMessage = KipMessage::ListReq {
            cmd,
            ops: run.iter().map(|op_id| op_id.to_ext()).collect(),
        };
        self.send_kip(KipFrame::new(con_id.with_recv(ConnectionPeer::new(processor_id, agid)), message))
    }

    /// Mirrors an operator and asks its processor to create it.
    pub(super) fn create_remote_operator(&mut self, op: OperatorData, callback: CreateCallback) {
        let con_id: ConnectionId = op.con_id;
        let op_id: IntOpId = op.id;
        let key: (u8, IntOpId) = (con_id.send.client_id(), op_id);
        if self.pending_remote.contains_key(&key) {
            warn!("create_remote_operator(): request for {:?} already pending", op_id.to_ext());
            let result: CreateResult = CreateResult {
                con_id,
                status: Status::CmdFailed,
                op_id: op_id.to_ext(),
            };
            return callback(self, result);
        }

        let frame: KipFrame = KipFrame::new(
            con_id.with_recv(ConnectionPeer::new(op.processor_id, CLIENT_ID_INTERNAL)),
            KipMessage::CreateOperatorReq {
                cap_id: op.cap.id,
                op_id: op_id.to_ext(),
                priority: op.priority.level() as u16,
            },
        );
        self.registry.insert(OpList::Remote, op);
        self.pending_remote.insert(key, PendingRemote::Create(callback));
        if let Err(e) = self.send_kip(frame) {
            warn!("create_remote_operator(): {:?}", e);
            let _ = self.registry.remove_op_data_from_list(op_id, OpList::Remote);
            if let Some(PendingRemote::Create(callback)) = self.pending_remote.remove(&key) {
                let result: CreateResult = CreateResult {
                    con_id,
                    status: Status::CmdFailed,
                    op_id: op_id.to_ext(),
                };
                callback(self, result);
            }
        }
    }

    /// Forwards an operator message to the processor of the operator.
    pub(super) fn send_remote_operator_message(
        &mut self,
        con_id: ConnectionId,
        op_id: ExtOpId,
        params: &[u16],
        processor_id: u8,
        callback: MessageCallback,
    ) {
        let key: (u8, IntOpId) = (con_id.send.client_id(), op_id.to_int());
        let failed = MessageResult {
            con_id,
            status: Status::CmdFailed,
            op_id,
            response: Vec::new(),
        };
        if self.pending_remote.contains_key(&key) {
            warn!("send_remote_operator_message(): request for {:?} already pending", op_id);
            return callback(self, failed);
        }
        let frame: KipFrame = KipFrame::new(
            con_id.with_recv(ConnectionPeer::new(processor_id, CLIENT_ID_INTERNAL)),
            KipMessage::OperatorMessageReq {
                op_id,
                params: params.to_vec(),
            },
        );
        self.pending_remote.insert(key, PendingRemote::Message(callback));
        if let Err(e) = self.send_kip(frame) {
            warn!("send_remote_operator_message(): {:?}", e);
            if let Some(PendingRemote::Message(callback)) = self.pending_remote.remove(&key) {
                callback(self, failed);
            }
        }
    }

    fn handle_kip_frame(&mut self, frame: KipFrame) {
        let KipFrame { con_id, message } = frame;
        match message {
            KipMessage::CreateOperatorReq {
                cap_id,
                op_id,
                priority,
            } => {
                let keys: [CreateKeyValue; 1] = [CreateKeyValue::new(OPERATOR_CREATE_KEY_PRIORITY, priority as u32)];
                self.create_operator_ex(
                    con_id,
                    cap_id,
                    Some(op_id),
                    &keys,
                    Box::new(move |opmgr: &mut SharedOpMgr, result: CreateResult| {
                        let message: KipMessage = KipMessage::CreateOperatorRes {
                            status: result.status,
                            op_id: result.op_id,
                        };
                        opmgr.reply(con_id, message)
                    }),
                );
            },
            KipMessage::ListReq { cmd, ops } => {
                let preproc: Option<PreProc> = match cmd {
                    ListCmd::Destroy => Some(destroy_op_endpoints),
                    _ => None,
                };
                self.issue_list_cmd(
                    con_id,
                    cmd,
                    &ops,
                    preproc,
                    Box::new(move |opmgr: &mut SharedOpMgr, result: ListResult| {
                        let message: KipMessage = KipMessage::ListRes {
                            cmd,
                            status: result.status,
                            count: result.count,
                            err_code: result.err_code,
                        };
                        opmgr.reply(con_id, message)
                    }),
                );
            },
            KipMessage::OperatorMessageReq { op_id, params } => {
                self.operator_message(
                    con_id,
                    op_id,
                    &params,
                    Box::new(move |opmgr: &mut SharedOpMgr, result: MessageResult| {
                        let message: KipMessage = KipMessage::OperatorMessageRes {
                            status: result.status,
                            op_id: result.op_id,
                            response: result.response,
                        };
                        opmgr.reply(con_id, message)
                    }),
                );
            },
            KipMessage::CreateOperatorRes { status, op_id } => {
                let con_id: ConnectionId = con_id.reversed();
                let key: (u8, IntOpId) = (con_id.send.client_id(), op_id.to_int());
                match self.pending_remote.remove(&key) {
                    Some(PendingRemote::Create(callback)) => {
                        if status != Status::Ok && self.registry.contains(OpList::Remote, op_id.to_int()) {
                            let _ = self.registry.remove_op_data_from_list(op_id.to_int(), OpList::Remote);
                        }
                        callback(self, CreateResult { con_id, status, op_id });
                    },
                    Some(pending) => {
                        warn!("handle_kip_frame(): create reply for a message request on {:?}", op_id);
                        self.pending_remote.insert(key, pending);
                    },
                    None => warn!("handle_kip_frame(): unsolicited create reply for {:?}", op_id),
                }
            },
            KipMessage::ListRes {
                status,
                count,
                err_code,
                ..
            } => {
                let con_id: ConnectionId = con_id.reversed();
                let agid: u8 = con_id.recv.client_id();
                self.kip_list_resp_handler(agid, ListResult::new(con_id, status, count, err_code));
            },
            KipMessage::OperatorMessageRes {
                status,
                op_id,
                response,
            } => {
                let con_id: ConnectionId = con_id.reversed();
                let key: (u8, IntOpId) = (con_id.send.client_id(), op_id.to_int());
                match self.pending_remote.remove(&key) {
                    Some(PendingRemote::Message(callback)) => callback(
                        self,
                        MessageResult {
                            con_id,
                            status,
                            op_id,
                            response,
                        },
                    ),
                    Some(pending) => {
                        warn!("handle_kip_frame(): message reply for a create request on {:?}", op_id);
                        self.pending_remote.insert(key, pending);
                    },
                    None => warn!("handle_kip_frame(): unsolicited message reply for {:?}", op_id),
                }
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TaskHandler for KipRxTask {
    fn on_message(&mut self, sched: &mut SharedScheduler, _id: TaskId) {
        while let Some(mut message) = sched.get_message_with_routing() {
            if message.tag != KIP_FRAME_TAG {
                warn!("on_message(): unexpected tag {:#x}", message.tag);
                continue;
            }
            match message.take_payload::<KipFrame>() {
                Some(frame) => self.opmgr.handle_kip_frame(*frame),
                None => warn!("on_message(): frame without payload"),
            }
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn checksum(words: &[u16]) -> u16 {
    let crc: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
    let mut digest = crc.digest();
    for word in words {
        digest.update(&word.to_le_bytes());
    }
    digest.finalize()
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
