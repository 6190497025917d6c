// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::opmgr::types::CapId;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Answer of the download manager to a residency request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadProgress {
    /// The capability is resident now.
    Ready,
    /// The capability will be resident once [crate::SharedOpMgr::cap_download_complete] is called.
    Pending,
    Failed,
}

/// Download manager whose capabilities are always resident.
#[derive(Default)]
pub struct ResidentDownloads;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Makes downloadable capability code resident before operators are created from it.
pub trait CapDownloadManager {
    fn request_download(&mut self, cap_id: CapId) -> DownloadProgress;
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl CapDownloadManager for ResidentDownloads {
    fn request_download(&mut self, _cap_id: CapId) -> DownloadProgress {
        DownloadProgress::Ready
    }
}
