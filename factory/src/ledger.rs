use std::sync::Arc;

use sideband_assembly::AllocationId;
use sideband_platform::AllocationManager;
use tracing::trace;

/// An ordered list of allocation ids bound to a scope.
///
/// Every placement attempt records its allocations in a local ledger;
/// success transfers them into a longer-lived ledger, failure lets the
/// scope end and the drop releases them. Release never propagates an
/// error.
pub struct ScopedLedger {
    allocator: Arc<dyn AllocationManager>,
    ids: Vec<AllocationId>,
}

impl ScopedLedger {
    pub fn new(allocator: Arc<dyn AllocationManager>) -> Self {
        Self {
            allocator,
            ids: Vec::new(),
        }
    }

    pub fn push(&mut self, id: AllocationId) {
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Moves every id into `dest`, leaving this ledger empty.
    pub fn transfer(&mut self, dest: &mut ScopedLedger) {
        dest.ids.append(&mut self.ids);
    }

    /// Hands the ids to a longer-lived owner outside the ledger
    /// discipline (the application, on commit).
    pub fn take_all(&mut self) -> Vec<AllocationId> {
        std::mem::take(&mut self.ids)
    }

    /// Deallocates everything still owned.
    pub fn release(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        trace!(count = self.ids.len(), "releasing allocations");
        self.allocator.deallocate(&self.ids);
        self.ids.clear();
    }
}

impl Drop for ScopedLedger {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use sideband_platform::{
        AllocationManager as _,
        memory::{MemoryAllocationManager, MemoryDevice, RegistrarTable},
    };

    use super::*;

    fn allocated() -> (Arc<MemoryAllocationManager>, AllocationId) {
        let manager = Arc::new(MemoryAllocationManager::new());
        let registrars = Arc::new(RegistrarTable::default());
        let device = MemoryDevice::new("dev_1", "gpp0", &registrars);
        let node = device.node(Vec::new(), true);
        manager.add_device(Arc::clone(&node));

        let (id, _) = manager
            .allocate_deployment("req", &[], &[node], &[], &[])
            .unwrap();
        (manager, id)
    }

    #[test]
    fn drop_releases_everything() {
        let (manager, id) = allocated();
        {
            let mut ledger = ScopedLedger::new(manager.clone());
            ledger.push(id);
            assert_eq!(manager.live_count(), 1);
        }
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn transfer_moves_ownership() {
        let (manager, id) = allocated();

        let mut outer = ScopedLedger::new(manager.clone());
        {
            let mut local = ScopedLedger::new(manager.clone());
            local.push(id);
            local.transfer(&mut outer);
            assert!(local.is_empty());
        }
        // The local scope ended without releasing the transferred id.
        assert_eq!(manager.live_count(), 1);

        outer.release();
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn take_all_clears_without_releasing() {
        let (manager, id) = allocated();

        let mut ledger = ScopedLedger::new(manager.clone());
        ledger.push(id.clone());
        let taken = ledger.take_all();
        assert_eq!(taken, vec![id]);
        drop(ledger);
        assert_eq!(manager.live_count(), 1);
    }
}
