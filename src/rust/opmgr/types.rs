// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::opmgr::SharedOpMgr;
use ::std::fmt;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Set in every endpoint identifier that belongs to an operator.
pub const STREAM_EP_OP_BIT: u16 = 0x4000;
/// Set in sink endpoint identifiers.
pub const STREAM_EP_SINK_BIT: u16 = 0x2000;
/// Endpoint type field.
pub const STREAM_EP_TYPE_MASK: u16 = 0xe000;
/// Type of an operator source endpoint.
pub const STREAM_EP_OP_SOURCE: u16 = STREAM_EP_OP_BIT;
/// Type of an operator sink endpoint.
pub const STREAM_EP_OP_SINK: u16 = STREAM_EP_OP_BIT | STREAM_EP_SINK_BIT;
/// Operator identifier field of an endpoint identifier.
pub const STREAM_EP_OPID_MASK: u16 = 0x1fc0;
pub const STREAM_EP_OPID_POSN: u16 = 6;
/// Channel field of an endpoint identifier.
pub const STREAM_EP_CHAN_MASK: u16 = 0x003f;

/// Client id of the privileged monitor and tuning client.
pub const CLIENT_ID_OBPM: u8 = 0x02;
/// Client id used by the operator manager itself.
pub const CLIENT_ID_INTERNAL: u8 = 0x1f;

/// Error code reported with `Status::Ok` by the first phase of a cross-core destroy.
pub const ERR_RUN_UNTIL_PREPROC: u32 = 0xfffe;
/// No command aggregate could be allocated.
pub const ERR_NO_AGGREGATE: u32 = 1;
/// An operator of the list does not exist.
pub const ERR_OP_NOT_FOUND: u32 = 2;
/// The operator must be stopped first.
pub const ERR_OP_RUNNING: u32 = 3;
/// The command came from a connection that does not own the operator.
pub const ERR_NOT_OWNER: u32 = 4;
/// Endpoint teardown refused.
pub const ERR_PREPROC_FAILED: u32 = 5;
/// The capability does not handle operator messages.
pub const ERR_UNSUPPORTED: u32 = 6;
/// The inter-processor link could not carry the request.
pub const ERR_TRANSPORT: u32 = 7;

const CLIENT_ID_MASK: u8 = 0x1f;
const PROCESSOR_ID_POSN: u8 = 5;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Internal operator identifier: a small integer unique across all cores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntOpId(pub u16);

/// External operator identifier: the internal identifier shifted into the operator-id field of an endpoint id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtOpId(pub u16);

/// Capability identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapId(pub u16);

/// Direction of an operator terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sink,
    Source,
}

/// One end of a connection: a 5-bit client id and a 3-bit processor id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionPeer(u8);

/// Connection identifier. The send peer is the requester, the receive peer the responder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId {
    pub send: ConnectionPeer,
    pub recv: ConnectionPeer,
}

/// Command status reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    CmdFailed,
    InvalidCmdParams,
}

/// Running state of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpState {
    NotRunning,
    Running,
}

/// Per-operator commands carried by list requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListCmd {
    Start,
    Stop,
    Reset,
    Destroy,
    /// Validates the request and runs no further than pre-processing.
    RunUntilPreproc,
}

/// Terminal result of a list command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListResult {
    pub con_id: ConnectionId,
    pub status: Status,
    /// Operators processed successfully before the first failure.
    pub count: usize,
    pub err_code: u32,
}

/// Terminal result of an operator creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateResult {
    pub con_id: ConnectionId,
    pub status: Status,
    pub op_id: ExtOpId,
}

/// Terminal result of an operator message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageResult {
    pub con_id: ConnectionId,
    pub status: Status,
    pub op_id: ExtOpId,
    pub response: Vec<u16>,
}

pub type ListCallback = Box<dyn FnOnce(&mut SharedOpMgr, ListResult)>;
pub type CreateCallback = Box<dyn FnOnce(&mut SharedOpMgr, CreateResult)>;
pub type MessageCallback = Box<dyn FnOnce(&mut SharedOpMgr, MessageResult)>;

/// Runs before a list command reaches an operator. An error code refuses the command.
pub type PreProc = fn(&mut SharedOpMgr, IntOpId) -> Result<(), u32>;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl IntOpId {
    pub fn to_ext(self) -> ExtOpId {
        ExtOpId(STREAM_EP_OP_BIT | ((self.0 << STREAM_EP_OPID_POSN) & STREAM_EP_OPID_MASK))
    }
}

impl ExtOpId {
    pub fn to_int(self) -> IntOpId {
        IntOpId((self.0 & STREAM_EP_OPID_MASK) >> STREAM_EP_OPID_POSN)
    }

    /// Whether the identifier has the operator bit set and nothing outside the operator-id field.
    pub fn is_valid(self) -> bool {
        (self.0 & STREAM_EP_OP_BIT) != 0
            && (self.0 & !(STREAM_EP_OP_BIT | STREAM_EP_OPID_MASK)) == 0
            && self.to_int().0 != 0
    }
}

impl ConnectionPeer {
    pub fn new(processor_id: u8, client_id: u8) -> Self {
        Self((processor_id << PROCESSOR_ID_POSN) | (client_id & CLIENT_ID_MASK))
    }

    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn client_id(self) -> u8 {
        self.0 & CLIENT_ID_MASK
    }

    pub fn processor_id(self) -> u8 {
        self.0 >> PROCESSOR_ID_POSN
    }
}

impl ConnectionId {
    pub fn new(send: ConnectionPeer, recv: ConnectionPeer) -> Self {
        Self { send, recv }
    }

    /// Connection id of a client on processor zero talking to the operator manager.
    pub fn from_client(client_id: u8) -> Self {
        Self::new(ConnectionPeer::new(0, client_id), ConnectionPeer::new(0, CLIENT_ID_INTERNAL))
    }

    pub fn from_raw(raw: u16) -> Self {
        Self::new(ConnectionPeer((raw >> 8) as u8), ConnectionPeer(raw as u8))
    }

    pub fn raw(self) -> u16 {
        ((self.send.0 as u16) << 8) | self.recv.0 as u16
    }

    /// The same connection seen from the responder.
    pub fn reversed(self) -> Self {
        Self::new(self.recv, self.send)
    }

    /// Replaces the receive peer.
    pub fn with_recv(self, recv: ConnectionPeer) -> Self {
        Self::new(self.send, recv)
    }

    /// Whether this connection may command an operator created over `owner`.
    pub fn may_command(self, owner: ConnectionId) -> bool {
        self.send == owner.send || self.send.client_id() == CLIENT_ID_OBPM
    }

    /// As [ConnectionId::may_command], also admitting the operator manager itself.
    pub fn may_message(self, owner: ConnectionId) -> bool {
        self.may_command(owner) || self.send.client_id() == CLIENT_ID_INTERNAL
    }
}

impl Status {
    pub fn raw(self) -> u16 {
        match self {
            Status::Ok => 0,
            Status::CmdFailed => 1,
            Status::InvalidCmdParams => 2,
        }
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Status::Ok),
            1 => Some(Status::CmdFailed),
            2 => Some(Status::InvalidCmdParams),
            _ => None,
        }
    }
}

impl ListResult {
    pub fn new(con_id: ConnectionId, status: Status, count: usize, err_code: u32) -> Self {
        Self {
            con_id,
            status,
            count,
            err_code,
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds the endpoint id of terminal `idx` of operator `op_id`. Returns `None` if either argument is malformed.
pub fn create_endpoint_id(op_id: ExtOpId, idx: usize, dir: Direction) -> Option<u16> {
    if (op_id.0 & STREAM_EP_TYPE_MASK) != STREAM_EP_OP_BIT || (op_id.0 & STREAM_EP_CHAN_MASK) != 0 {
        return None;
    }
    if idx & !(STREAM_EP_CHAN_MASK as usize) != 0 {
        return None;
    }
    let kind: u16 = match dir {
        Direction::Source => STREAM_EP_OP_SOURCE,
        Direction::Sink => STREAM_EP_OP_SINK,
    };
    Some(kind | (op_id.0 & STREAM_EP_OPID_MASK) | idx as u16)
}

/// Splits an operator endpoint id into its operator, terminal index and direction.
pub fn split_endpoint_id(endpoint_id: u16) -> Option<(ExtOpId, usize, Direction)> {
    let dir: Direction = match endpoint_id & STREAM_EP_TYPE_MASK {
        STREAM_EP_OP_SOURCE => Direction::Source,
        STREAM_EP_OP_SINK => Direction::Sink,
        _ => return None,
    };
    let op_id: ExtOpId = ExtOpId(STREAM_EP_OP_BIT | (endpoint_id & STREAM_EP_OPID_MASK));
    Some((op_id, (endpoint_id & STREAM_EP_CHAN_MASK) as usize, dir))
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for ExtOpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtOpId({:#06x})", self.0)
    }
}

impl fmt::Debug for ConnectionPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}:{:#04x}", self.processor_id(), self.client_id())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({:?} -> {:?})", self.send, self.recv)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
