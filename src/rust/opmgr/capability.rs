// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    opmgr::types::{
        CapId,
        ExtOpId,
        ERR_UNSUPPORTED,
    },
    runtime::{
        fail::Fail,
        scheduler::Priority,
    },
};
use ::std::rc::Rc;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Capability id of the built-in passthrough operator.
pub const CAP_ID_BASIC_PASSTHROUGH: CapId = CapId(0x0001);

/// Operator message ids understood by the passthrough operator.
pub const PASSTHROUGH_MSG_SET_GAIN: u16 = 0x0001;
pub const PASSTHROUGH_MSG_GET_GAIN: u16 = 0x0002;
pub const PASSTHROUGH_MSG_GET_FRAMES: u16 = 0x0003;

/// Error code for a malformed operator message.
pub const ERR_BAD_MESSAGE: u32 = 0x0100;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What a capability learns about the operator it instantiates.
#[derive(Clone, Copy, Debug)]
pub struct OperatorInfo {
    pub op_id: ExtOpId,
    pub cap_id: CapId,
    pub processor_id: u8,
    pub priority: Priority,
}

/// Read-only description of a capability.
pub struct CapabilityData {
    pub id: CapId,
    pub version: u32,
    pub max_sinks: usize,
    pub max_sources: usize,
    /// Bytes of instance data each operator of this capability carries.
    pub instance_data_size: usize,
    pub handler: Rc<dyn Capability>,
}

/// Residency of a downloadable capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Registered but its code is not resident.
    Installed,
    /// A download has been requested and has not completed.
    Downloading,
    Ready,
}

struct DownloadedCap {
    data: Rc<CapabilityData>,
    status: DownloadStatus,
}

/// Static capabilities followed by downloaded ones.
pub struct CapabilityTable {
    statics: Vec<Rc<CapabilityData>>,
    downloaded: Vec<DownloadedCap>,
}

/// Capability of the built-in passthrough operator.
pub struct BasicPassthrough;

struct PassthroughInstance {
    gain: u16,
    frames: u32,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Factory side of a capability.
pub trait Capability {
    /// Instantiates an operator. An error code fails the creation.
    fn create(&self, info: &OperatorInfo) -> Result<Box<dyn OperatorInstance>, u32>;
}

/// Per-operator side of a capability. Every entry point runs on the operator's own task.
pub trait OperatorInstance {
    fn start(&mut self) -> Result<(), u32> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), u32> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), u32> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), u32> {
        Ok(())
    }

    /// Handles an operator message and returns the response words.
    fn message(&mut self, _params: &[u16]) -> Result<Vec<u16>, u32> {
        Err(ERR_UNSUPPORTED)
    }

    /// Runs one processing pass. Called when the operator's bg-int is kicked.
    fn process(&mut self) {}
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CapabilityData {
    pub fn new(id: CapId, max_sinks: usize, max_sources: usize, handler: Rc<dyn Capability>) -> Self {
        Self {
            id,
            version: 1,
            max_sinks,
            max_sources,
            instance_data_size: 0,
            handler,
        }
    }
}

impl CapabilityTable {
    /// Creates a table that holds the built-in capabilities only.
    pub fn with_builtins() -> Self {
        let passthrough: CapabilityData = CapabilityData {
            instance_data_size: ::std::mem::size_of::<PassthroughInstance>(),
            ..CapabilityData::new(CAP_ID_BASIC_PASSTHROUGH, 8, 8, Rc::new(BasicPassthrough))
        };
        Self {
            statics: vec![Rc::new(passthrough)],
            downloaded: Vec::new(),
        }
    }

    fn contains(&self, cap_id: CapId) -> bool {
        self.statics.iter().any(|cap| cap.id == cap_id) || self.downloaded.iter().any(|cap| cap.data.id == cap_id)
    }

    /// Adds a capability that is always resident.
    pub fn register_static(&mut self, data: CapabilityData) -> Result<(), Fail> {
        if self.contains(data.id) {
            let cause: String = format!("capability {:?} already exists", data.id);
            error!("register_static(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }
        self.statics.push(Rc::new(data));
        Ok(())
    }

    /// Adds a downloadable capability whose code is not yet resident.
    pub fn install(&mut self, data: CapabilityData) -> Result<(), Fail> {
        if self.contains(data.id) {
            let cause: String = format!("capability {:?} already exists", data.id);
            error!("install(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }
        debug!("install(): capability {:?}", data.id);
        self.downloaded.push(DownloadedCap {
            data: Rc::new(data),
            status: DownloadStatus::Installed,
        });
        Ok(())
    }

    /// Removes a downloadable capability. Static capabilities cannot be removed.
    pub fn uninstall(&mut self, cap_id: CapId) -> Result<(), Fail> {
        match self.downloaded.iter().position(|cap| cap.data.id == cap_id) {
            Some(position) => {
                self.downloaded.remove(position);
                Ok(())
            },
            None => {
                let cause: String = format!("no downloadable capability {:?}", cap_id);
                error!("uninstall(): {}", cause);
                Err(Fail::new(libc::ENOENT, &cause))
            },
        }
    }

    /// Looks a capability up. The status is `None` for static capabilities.
    pub fn lookup(&self, cap_id: CapId) -> Option<(Rc<CapabilityData>, Option<DownloadStatus>)> {
        if let Some(cap) = self.statics.iter().find(|cap| cap.id == cap_id) {
            return Some((cap.clone(), None));
        }
        self.downloaded
            .iter()
            .find(|cap| cap.data.id == cap_id)
            .map(|cap| (cap.data.clone(), Some(cap.status)))
    }

    pub fn download_status(&self, cap_id: CapId) -> Option<DownloadStatus> {
        self.downloaded
            .iter()
            .find(|cap| cap.data.id == cap_id)
            .map(|cap| cap.status)
    }

    pub fn set_download_status(&mut self, cap_id: CapId, status: DownloadStatus) -> Result<(), Fail> {
        match self.downloaded.iter_mut().find(|cap| cap.data.id == cap_id) {
            Some(cap) => {
                trace!("set_download_status(): {:?} {:?} -> {:?}", cap_id, cap.status, status);
                cap.status = status;
                Ok(())
            },
            None => Err(Fail::new(libc::ENOENT, "no such downloadable capability")),
        }
    }

    /// Pages over static then downloaded capability ids. Returns the total number of capabilities and the page.
    pub fn get_capid_list(&self, skip: usize, max_count: usize) -> (usize, Vec<CapId>) {
        let total: usize = self.statics.len() + self.downloaded.len();
        let page: Vec<CapId> = self
            .statics
            .iter()
            .map(|cap| cap.id)
            .chain(self.downloaded.iter().map(|cap| cap.data.id))
            .skip(skip)
            .take(max_count)
            .collect();
        (total, page)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Capability for BasicPassthrough {
    fn create(&self, info: &OperatorInfo) -> Result<Box<dyn OperatorInstance>, u32> {
        trace!("create(): passthrough {:?} on processor {}", info.op_id, info.processor_id);
        Ok(Box::new(PassthroughInstance { gain: 0, frames: 0 }))
    }
}

impl OperatorInstance for PassthroughInstance {
    fn reset(&mut self) -> Result<(), u32> {
        self.frames = 0;
        Ok(())
    }

    fn message(&mut self, params: &[u16]) -> Result<Vec<u16>, u32> {
        match params {
            [PASSTHROUGH_MSG_SET_GAIN, gain] => {
                self.gain = *gain;
                Ok(vec![PASSTHROUGH_MSG_SET_GAIN])
            },
            [PASSTHROUGH_MSG_GET_GAIN] => Ok(vec![PASSTHROUGH_MSG_GET_GAIN, self.gain]),
            [PASSTHROUGH_MSG_GET_FRAMES] => Ok(vec![
                PASSTHROUGH_MSG_GET_FRAMES,
                self.frames as u16,
                (self.frames >> 16) as u16,
            ]),
            _ => Err(ERR_BAD_MESSAGE),
        }
    }

    fn process(&mut self) {
        self.frames = self.frames.wrapping_add(1);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
