// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![allow(dead_code)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::{
    anyhow,
    Result,
};
use ::kymera::{
    ensure_eq,
    opmgr::{
        capability::{
            Capability,
            CapabilityData,
            OperatorInfo,
            OperatorInstance,
        },
        registry::OpList,
        streams::StreamEndpoints,
        CapId,
        ConnectionId,
        CreateKeyValue,
        CreateResult,
        ExtOpId,
        ListResult,
        OpState,
        Status,
        OPERATOR_CREATE_KEY_PROCESSOR_ID,
    },
    Core,
    OpMgrConfig,
    SchedulerConfig,
    SharedOpMgr,
};
use ::std::{
    cell::{
        RefCell,
        RefMut,
    },
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Capability that records every lifecycle call of its operators.
pub const CAP_ID_RECORDER: CapId = CapId(0x0040);
/// Error code of a start refused by the recorder.
pub const ERR_REFUSED: u32 = 0x0200;

pub const CLIENT_A: u8 = 0x05;
pub const CLIENT_B: u8 = 0x06;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One lifecycle call seen by the recorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub processor_id: u8,
    pub op_id: ExtOpId,
    pub what: &'static str,
}

#[derive(Default)]
pub struct RecorderState {
    pub events: Vec<Event>,
    /// Operators whose start is refused with [ERR_REFUSED].
    pub refuse_start: Vec<ExtOpId>,
}

pub type Recorder = Rc<RefCell<RecorderState>>;

struct RecorderCapability {
    recorder: Recorder,
}

struct RecorderInstance {
    recorder: Recorder,
    processor_id: u8,
    op_id: ExtOpId,
}

#[derive(Default)]
pub struct StreamLog {
    /// Shadow endpoint toggles, in call order.
    pub shadows: Vec<(u16, bool)>,
    /// Operators whose endpoints were torn down.
    pub destroyed: Vec<ExtOpId>,
    /// Operators whose endpoints refuse teardown.
    pub refuse: Vec<ExtOpId>,
}

pub struct RecordingStreams(pub Rc<RefCell<StreamLog>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RecorderInstance {
    fn record(&self, what: &'static str) {
        self.recorder.borrow_mut().events.push(Event {
            processor_id: self.processor_id,
            op_id: self.op_id,
            what,
        });
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Capability for RecorderCapability {
    fn create(&self, info: &OperatorInfo) -> Result<Box<dyn OperatorInstance>, u32> {
        let instance: RecorderInstance = RecorderInstance {
            recorder: self.recorder.clone(),
            processor_id: info.processor_id,
            op_id: info.op_id,
        };
        instance.record("create");
        Ok(Box::new(instance))
    }
}

impl OperatorInstance for RecorderInstance {
    fn start(&mut self) -> Result<(), u32> {
        if self.recorder.borrow().refuse_start.contains(&self.op_id) {
            return Err(ERR_REFUSED);
        }
        self.record("start");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), u32> {
        self.record("stop");
        Ok(())
    }

    fn reset(&mut self) -> Result<(), u32> {
        self.record("reset");
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), u32> {
        self.record("destroy");
        Ok(())
    }

    /// Echoes the parameters back with the processor id prepended.
    fn message(&mut self, params: &[u16]) -> Result<Vec<u16>, u32> {
        self.record("message");
        let mut response: Vec<u16> = vec![self.processor_id as u16];
        response.extend_from_slice(params);
        Ok(response)
    }

    fn process(&mut self) {
        self.record("process");
    }
}

impl StreamEndpoints for RecordingStreams {
    fn destroy_operator_endpoints(&mut self, op_id: ExtOpId, _num_sinks: usize, _num_sources: usize) -> bool {
        let mut log: RefMut<StreamLog> = self.0.borrow_mut();
        if log.refuse.contains(&op_id) {
            return false;
        }
        log.destroyed.push(op_id);
        true
    }

    fn set_shadow_endpoint_enabled(&mut self, endpoint_id: u16, enable: bool) {
        self.0.borrow_mut().shadows.push((endpoint_id, enable));
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds a core on `processor_id` of a system of `num_processors`, with the recorder capability registered.
pub fn core(processor_id: u8, num_processors: usize, recorder: &Recorder, streams: &Rc<RefCell<StreamLog>>) -> Result<Core> {
    let opmgr_config: OpMgrConfig = OpMgrConfig {
        processor_id,
        num_processors,
        num_aggregates: 2,
        ..Default::default()
    };
    core_with(opmgr_config, recorder, streams)
}

/// Builds a core from explicit operator manager parameters, with the recorder capability registered.
pub fn core_with(opmgr_config: OpMgrConfig, recorder: &Recorder, streams: &Rc<RefCell<StreamLog>>) -> Result<Core> {
    let sched_config: SchedulerConfig = SchedulerConfig {
        processor_id: opmgr_config.processor_id,
        ..Default::default()
    };
    let mut core: Core = Core::with_configs(sched_config, opmgr_config)?;
    let handler: Rc<RecorderCapability> = Rc::new(RecorderCapability {
        recorder: recorder.clone(),
    });
    core.opmgr
        .capabilities_mut()
        .register_static(CapabilityData::new(CAP_ID_RECORDER, 1, 1, handler))?;
    core.opmgr.set_streams(Box::new(RecordingStreams(streams.clone())));
    Ok(core)
}

/// Builds a single core system.
pub fn single_core(recorder: &Recorder, streams: &Rc<RefCell<StreamLog>>) -> Result<Core> {
    core(0, 1, recorder, streams)
}

/// Builds a primary and a secondary core joined by an inter-processor link.
pub fn dual_core(recorder: &Recorder, streams: &Rc<RefCell<StreamLog>>) -> Result<(Core, Core)> {
    let mut primary: Core = core(0, 2, recorder, streams)?;
    let mut secondary: Core = core(1, 2, recorder, streams)?;
    Core::link(&mut primary, &mut secondary)?;
    Ok((primary, secondary))
}

pub type Slot<T> = Rc<RefCell<Option<T>>>;

/// Returns a slot and a callback that stores its result in the slot.
pub fn capture<T: 'static>() -> (Slot<T>, Box<dyn FnOnce(&mut SharedOpMgr, T)>) {
    let slot: Slot<T> = Rc::new(RefCell::new(None));
    let sink: Slot<T> = slot.clone();
    let callback: Box<dyn FnOnce(&mut SharedOpMgr, T)> = Box::new(move |_opmgr: &mut SharedOpMgr, result: T| {
        *sink.borrow_mut() = Some(result);
    });
    (slot, callback)
}

/// Takes the result stored in a slot, failing if the callback has not run.
pub fn take<T>(slot: &Slot<T>) -> Result<T> {
    slot.borrow_mut().take().ok_or_else(|| anyhow!("callback did not run"))
}

/// Creates a recorder operator for `client_id` on `processor_id`, through the first core, and runs every core until
/// the reply arrives.
pub fn create_on(cores: &mut [&mut Core], client_id: u8, processor_id: u8) -> Result<ExtOpId> {
    let (slot, callback) = capture::<CreateResult>();
    let keys: [CreateKeyValue; 1] = [CreateKeyValue::new(OPERATOR_CREATE_KEY_PROCESSOR_ID, processor_id as u32)];
    cores[0]
        .opmgr
        .create_operator_ex(ConnectionId::from_client(client_id), CAP_ID_RECORDER, None, &keys, callback);
    Core::run_until_idle(cores)?;
    let result: CreateResult = take(&slot)?;
    ensure_eq!(result.status, Status::Ok);
    Ok(result.op_id)
}

/// Issues a start through the first core and runs every core to completion.
pub fn start(cores: &mut [&mut Core], client_id: u8, ops: &[ExtOpId]) -> Result<ListResult> {
    let (slot, callback) = capture::<ListResult>();
    cores[0].opmgr.start_operator(ConnectionId::from_client(client_id), ops, callback);
    Core::run_until_idle(cores)?;
    take(&slot)
}

/// Issues a stop through the first core and runs every core to completion.
pub fn stop(cores: &mut [&mut Core], client_id: u8, ops: &[ExtOpId]) -> Result<ListResult> {
    let (slot, callback) = capture::<ListResult>();
    cores[0].opmgr.stop_operator(ConnectionId::from_client(client_id), ops, callback);
    Core::run_until_idle(cores)?;
    take(&slot)
}

/// Issues a destroy through the first core and runs every core to completion.
pub fn destroy(cores: &mut [&mut Core], client_id: u8, ops: &[ExtOpId]) -> Result<ListResult> {
    let (slot, callback) = capture::<ListResult>();
    cores[0].opmgr.destroy_operator(ConnectionId::from_client(client_id), ops, callback);
    Core::run_until_idle(cores)?;
    take(&slot)
}

/// State of an operator as seen by `core`, local or mirrored.
pub fn state_of(core: &Core, op_id: ExtOpId) -> Option<OpState> {
    core.opmgr
        .registry()
        .get_anycore_op_data_from_id(op_id.to_int())
        .map(|op| op.state)
}

/// Whether `core` keeps `op_id` in `list`.
pub fn holds(core: &Core, list: OpList, op_id: ExtOpId) -> bool {
    core.opmgr.registry().contains(list, op_id.to_int())
}

/// Lifecycle calls named `what`, in call order.
pub fn events(recorder: &Recorder, what: &str) -> Vec<(u8, ExtOpId)> {
    recorder
        .borrow()
        .events
        .iter()
        .filter(|event| event.what == what)
        .map(|event| (event.processor_id, event.op_id))
        .collect()
}
