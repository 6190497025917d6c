// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Operator manager.
//!
//! Creates, commands and destroys operators on one core. On the primary core, list commands are split into runs of
//! operators that live on the same processor; local runs go through the operators' tasks and remote runs go over the
//! inter-processor link to the secondary core.

mod aggregate;
mod commands;
mod operator_task;

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod capability;
pub mod download;
pub mod kip;
pub mod registry;
pub mod streams;
pub mod system;
pub mod types;

pub use self::{
    commands::{
        CreateKeyValue,
        EnumerationResult,
        OPERATOR_CREATE_KEY_PRIORITY,
        OPERATOR_CREATE_KEY_PROCESSOR_ID,
    },
    types::{
        CapId,
        ConnectionId,
        ConnectionPeer,
        CreateResult,
        ExtOpId,
        IntOpId,
        ListCmd,
        ListResult,
        MessageResult,
        OpState,
        Status,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::OpMgrConfig,
    opmgr::{
        aggregate::AggregatePool,
        capability::CapabilityTable,
        commands::DeferredCreate,
        download::{
            CapDownloadManager,
            ResidentDownloads,
        },
        kip::{
            KipPort,
            PendingRemote,
        },
        registry::OperatorRegistry,
        streams::{
            NullStreams,
            StreamEndpoints,
        },
    },
    runtime::{
        scheduler::SharedScheduler,
        SharedObject,
    },
};
use ::std::{
    collections::HashMap,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Operator manager state of one core.
pub struct OpMgr {
    config: OpMgrConfig,
    sched: SharedScheduler,
    registry: OperatorRegistry,
    caps: CapabilityTable,
    aggregates: AggregatePool,
    kip: Option<KipPort>,
    streams: Box<dyn StreamEndpoints>,
    downloads: Box<dyn CapDownloadManager>,
    /// Creates and operator messages awaiting a reply from the secondary core, by client id and operator id.
    pending_remote: HashMap<(u8, IntOpId), PendingRemote>,
    /// Creates waiting for a capability download.
    deferred_creates: Vec<DeferredCreate>,
    aux_started: bool,
}

#[derive(Clone)]
pub struct SharedOpMgr(SharedObject<OpMgr>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl OpMgr {
    pub fn new(config: OpMgrConfig, sched: SharedScheduler) -> Self {
        let num_aggregates: usize = config.num_aggregates;
        let queue_depth: usize = config.aggregate_queue_depth;
        let registry: OperatorRegistry = OperatorRegistry::new(config.is_primary(), config.max_opid);
        Self {
            config,
            sched,
            registry,
            caps: CapabilityTable::with_builtins(),
            aggregates: AggregatePool::new(num_aggregates, queue_depth),
            kip: None,
            streams: Box::new(NullStreams),
            downloads: Box::new(ResidentDownloads),
            pending_remote: HashMap::new(),
            deferred_creates: Vec::new(),
            aux_started: false,
        }
    }

    pub fn config(&self) -> &OpMgrConfig {
        &self.config
    }

    pub fn processor_id(&self) -> u8 {
        self.config.processor_id
    }

    pub fn is_primary(&self) -> bool {
        self.config.is_primary()
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.caps
    }

    pub fn capabilities_mut(&mut self) -> &mut CapabilityTable {
        &mut self.caps
    }

    /// Replaces the stream subsystem collaborator.
    pub fn set_streams(&mut self, streams: Box<dyn StreamEndpoints>) {
        self.streams = streams;
    }

    /// Replaces the capability download collaborator.
    pub fn set_download_manager(&mut self, downloads: Box<dyn CapDownloadManager>) {
        self.downloads = downloads;
    }

    /// Records whether the secondary core has started.
    pub fn set_aux_processor_started(&mut self, started: bool) {
        self.aux_started = started;
    }

    pub fn is_aux_processor_started(&self) -> bool {
        self.aux_started
    }

    /// Number of list commands holding an aggregate.
    pub fn aggregates_in_flight(&self) -> usize {
        self.aggregates.in_flight()
    }

    /// Number of list commands waiting for an aggregate.
    pub fn aggregates_waiting(&self) -> usize {
        self.aggregates.waiting()
    }

    /// Number of requests awaiting a reply from the secondary core.
    pub fn pending_remote_requests(&self) -> usize {
        self.pending_remote.len()
    }
}

impl SharedOpMgr {
    pub fn new(config: OpMgrConfig, sched: SharedScheduler) -> Self {
        Self(SharedObject::<OpMgr>::new(OpMgr::new(config, sched)))
    }

    /// Drops every operator, aggregate and pending request. Callbacks that never ran are dropped with them.
    pub fn shutdown(&mut self) {
        let dropped: usize = self.pending_remote.len() + self.aggregates.in_flight() + self.deferred_creates.len();
        if dropped > 0 {
            warn!("shutdown(): dropping {} outstanding requests", dropped);
        }
        self.pending_remote.clear();
        self.deferred_creates.clear();
        self.aggregates.clear();
        self.registry.clear();
        self.kip = None;
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedOpMgr {
    type Target = OpMgr;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedOpMgr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
