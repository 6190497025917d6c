// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::opmgr::types::ExtOpId;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Stream subsystem as seen by the operator manager.
pub trait StreamEndpoints {
    /// Tears down every endpoint of an operator. Returns `false` to refuse.
    fn destroy_operator_endpoints(&mut self, op_id: ExtOpId, num_sinks: usize, num_sources: usize) -> bool;

    /// Enables or disables the local shadow of an endpoint owned by an operator on another core.
    fn set_shadow_endpoint_enabled(&mut self, endpoint_id: u16, enable: bool);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Stream subsystem with no endpoints connected.
#[derive(Default)]
pub struct NullStreams;

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl StreamEndpoints for NullStreams {
    fn destroy_operator_endpoints(&mut self, op_id: ExtOpId, _num_sinks: usize, _num_sources: usize) -> bool {
        trace!("destroy_operator_endpoints(): {:?} has no connected endpoints", op_id);
        true
    }

    fn set_shadow_endpoint_enabled(&mut self, _endpoint_id: u16, _enable: bool) {}
}
