use std::sync::Arc;

use sideband_assembly::{AllocationId, OsDep, Property};

use crate::DeviceNode;

/// One entry of a bulk uses-device allocation request. The request id is
/// the uses-device clause id, so responses can be matched back.
#[derive(Clone, Debug)]
pub struct UsesRequest {
    pub request_id: String,
    pub properties: Vec<Property>,
}

/// A satisfied entry of a bulk allocation request.
#[derive(Clone, Debug)]
pub struct UsesResponse {
    pub request_id: String,
    pub allocation_id: AllocationId,
    pub device: Arc<DeviceNode>,
}

/// The domain's single authority for device capacity.
///
/// Deployment allocation walks the candidate list in order and returns
/// the first device that satisfies the processor and OS dependencies and
/// every requested property; bulk allocation answers only the requests it
/// could satisfy. Deallocation restores consumed capacity.
pub trait AllocationManager: Send + Sync {
    fn allocate_deployment(
        &self,
        request_id: &str,
        properties: &[Property],
        candidates: &[Arc<DeviceNode>],
        processor_deps: &[String],
        os_deps: &[OsDep],
    ) -> Option<(AllocationId, Arc<DeviceNode>)>;

    fn allocate(&self, requests: &[UsesRequest]) -> Vec<UsesResponse>;

    fn deallocate(&self, ids: &[AllocationId]);
}
