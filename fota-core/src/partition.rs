/// Dual-slot partition bookkeeping and rollback
///
/// `PartitionManager` is the only thing allowed to change the boot target. The
/// platform side (ESP-IDF `esp_ota_*` on the device) answers the role queries and
/// performs the single atomic "set boot partition" write.
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSlot {
    pub label: String,
    pub address: u32,
    pub size: u32,
    /// Image in this slot is known good (bootloader/OTA state)
    pub valid: bool,
}

impl PartitionSlot {
    /// Same physical flash region
    pub fn is_same_slot(&self, other: &PartitionSlot) -> bool {
        self.address == other.address
    }

    pub fn end_address(&self) -> u32 {
        self.address.saturating_add(self.size)
    }
}

impl fmt::Display for PartitionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ 0x{:08x}..0x{:08x} ({} KiB{})",
            self.label,
            self.address,
            self.end_address(),
            self.size / 1024,
            if self.valid { "" } else { ", unconfirmed" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError(pub String);

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PlatformError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    NoUpdatePartition,
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::NoUpdatePartition => f.write_str("partition table has no OTA update slot"),
        }
    }
}

impl std::error::Error for PartitionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Refused: the written slot is the one we are running from
    TargetIsRunning,
    Platform(PlatformError),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::TargetIsRunning => f.write_str("refusing to commit the running partition"),
            CommitError::Platform(e) => write!(f, "failed to set boot partition: {}", e),
        }
    }
}

impl std::error::Error for CommitError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackError {
    NoCandidate,
    Platform(PlatformError),
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackError::NoCandidate => f.write_str("no previous firmware to roll back to"),
            RollbackError::Platform(e) => write!(f, "failed to set boot partition: {}", e),
        }
    }
}

impl std::error::Error for RollbackError {}

/// Platform view of the OTA partition table
pub trait PartitionPlatform {
    fn running(&self) -> PartitionSlot;

    /// Slot the next update should be written to, if the table has one
    fn next_update(&self) -> Option<PartitionSlot>;

    fn last_invalid(&self) -> Option<PartitionSlot>;

    /// Slot the bootloader will pick on the next reset
    fn boot(&self) -> PartitionSlot;

    /// Atomically select `slot` for the next boot
    fn set_boot(&mut self, slot: &PartitionSlot) -> Result<(), PlatformError>;

    /// Cancel any pending bootloader rollback of the running image
    fn mark_running_valid(&mut self) -> Result<(), PlatformError>;

    /// Full device restart. Does not return on hardware.
    fn restart(&mut self);
}

/// Logical state for the current boot cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Running,
    UpdateStaged,
    RollingBack,
    Rebooting,
}

pub struct PartitionManager<P> {
    platform: P,
    state: PartitionState,
}

impl<P: PartitionPlatform> PartitionManager<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            state: PartitionState::Running,
        }
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn running_partition(&self) -> PartitionSlot {
        self.platform.running()
    }

    pub fn next_update_partition(&self) -> Result<PartitionSlot, PartitionError> {
        let running = self.platform.running();
        match self.platform.next_update() {
            Some(next) if !next.is_same_slot(&running) => Ok(next),
            _ => Err(PartitionError::NoUpdatePartition),
        }
    }

    pub fn last_invalid_partition(&self) -> Option<PartitionSlot> {
        self.platform.last_invalid()
    }

    pub fn boot_partition(&self) -> PartitionSlot {
        self.platform.boot()
    }

    /// Select `written` for the next boot. On failure nothing changes and the
    /// running firmware stays the boot target.
    pub fn commit_update(&mut self, written: &PartitionSlot) -> Result<(), CommitError> {
        let running = self.platform.running();
        if written.is_same_slot(&running) {
            log::error!("Refusing to commit {}: it is the running partition", written.label);
            return Err(CommitError::TargetIsRunning);
        }

        self.platform.set_boot(written).map_err(CommitError::Platform)?;
        self.state = PartitionState::UpdateStaged;
        log::info!("Boot partition set to {}", written);
        Ok(())
    }

    /// Restart into whatever the boot target now is. Terminal for this boot cycle.
    pub fn reboot(&mut self) {
        self.state = PartitionState::Rebooting;
        log::logger().flush();
        self.platform.restart();
    }

    /// Point the bootloader back at the other slot and restart.
    ///
    /// The candidate is the next-update slot when it differs from the running
    /// one, otherwise the recorded boot slot. A candidate equal to the running
    /// slot means there is nothing to go back to: that is reported and no restart
    /// happens.
    pub fn rollback(&mut self) -> Result<(), RollbackError> {
        let running = self.platform.running();
        log::info!("Running partition: {}", running);

        let candidate = match self.platform.next_update() {
            Some(next) if !next.is_same_slot(&running) => next,
            _ => self.platform.boot(),
        };

        if candidate.is_same_slot(&running) {
            log::warn!("No valid previous partition found or already running the previous firmware");
            return Err(RollbackError::NoCandidate);
        }

        self.state = PartitionState::RollingBack;
        log::info!("Setting boot partition to the previous firmware: {}", candidate);
        if let Err(e) = self.platform.set_boot(&candidate) {
            log::error!("Failed to set boot partition: {}", e);
            self.state = PartitionState::Running;
            return Err(RollbackError::Platform(e));
        }

        log::info!("Boot partition set successfully. Rebooting...");
        self.reboot();
        Ok(())
    }

    /// Keep the running image on bootloaders that roll back unconfirmed apps
    pub fn confirm_running(&mut self) {
        let running = self.platform.running();
        if running.valid {
            return;
        }
        match self.platform.mark_running_valid() {
            Ok(()) => log::info!("Marked running partition {} as valid", running.label),
            Err(e) => log::warn!("Failed to mark running partition valid: {}", e),
        }
    }

    pub fn log_partition_info(&self) {
        log::info!("Running partition: {}", self.platform.running());
        match self.platform.next_update() {
            Some(next) => log::info!("Next partition:    {}", next),
            None => log::warn!("Next partition:    none (no OTA slots)"),
        }
        match self.platform.last_invalid() {
            Some(invalid) => log::info!("Last invalid:      {}", invalid),
            None => log::info!("Last invalid:      none"),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_queries_pass_through() {
        let manager = PartitionManager::new(FakePlatform::two_slot());
        assert_eq!(manager.running_partition().label, "ota_0");
        assert_eq!(manager.next_update_partition().unwrap().label, "ota_1");
        assert_eq!(manager.boot_partition().label, "ota_0");
        assert!(manager.last_invalid_partition().is_none());
        assert_eq!(manager.state(), PartitionState::Running);
    }

    #[test]
    fn test_single_slot_table_has_no_update_partition() {
        let manager = PartitionManager::new(FakePlatform::single_slot());
        assert_eq!(manager.next_update_partition(), Err(PartitionError::NoUpdatePartition));
    }

    #[test]
    fn test_commit_sets_boot_target() {
        let mut manager = PartitionManager::new(FakePlatform::two_slot());
        let next = manager.next_update_partition().unwrap();
        manager.commit_update(&next).unwrap();

        assert_eq!(manager.state(), PartitionState::UpdateStaged);
        assert_eq!(manager.boot_partition().label, "ota_1");
        assert_eq!(manager.platform().restarts, 0);
    }

    #[test]
    fn test_commit_running_slot_is_refused() {
        let mut manager = PartitionManager::new(FakePlatform::two_slot());
        let running = manager.running_partition();
        assert_eq!(manager.commit_update(&running), Err(CommitError::TargetIsRunning));
        assert!(manager.platform().set_boot_calls.is_empty());
    }

    #[test]
    fn test_commit_platform_failure_leaves_running_active() {
        let mut platform = FakePlatform::two_slot();
        platform.fail_set_boot = true;
        let mut manager = PartitionManager::new(platform);
        let next = manager.next_update_partition().unwrap();

        assert!(matches!(manager.commit_update(&next), Err(CommitError::Platform(_))));
        assert_eq!(manager.state(), PartitionState::Running);
        assert_eq!(manager.boot_partition().label, "ota_0");
    }

    #[test]
    fn test_rollback_targets_other_slot_and_restarts() {
        let mut manager = PartitionManager::new(FakePlatform::two_slot());
        manager.rollback().unwrap();

        assert_eq!(manager.state(), PartitionState::Rebooting);
        assert_eq!(manager.platform().set_boot_calls.len(), 1);
        assert_eq!(manager.platform().set_boot_calls[0].label, "ota_1");
        assert_eq!(manager.platform().restarts, 1);
    }

    #[test]
    fn test_rollback_falls_back_to_boot_slot() {
        // Next slot reported as the running one; the recorded boot slot differs
        let mut platform = FakePlatform::two_slot();
        platform.next = Some(platform.running.clone());
        platform.boot = slot("ota_1", 0x0011_0000);
        let mut manager = PartitionManager::new(platform);

        manager.rollback().unwrap();
        assert_eq!(manager.platform().set_boot_calls[0].label, "ota_1");
    }

    #[test]
    fn test_rollback_without_candidate_does_not_restart() {
        let mut manager = PartitionManager::new(FakePlatform::single_slot());
        assert_eq!(manager.rollback(), Err(RollbackError::NoCandidate));
        assert_eq!(manager.platform().restarts, 0);
        assert!(manager.platform().set_boot_calls.is_empty());
        assert_eq!(manager.state(), PartitionState::Running);
    }

    #[test]
    fn test_rollback_set_boot_failure_does_not_restart() {
        let mut platform = FakePlatform::two_slot();
        platform.fail_set_boot = true;
        let mut manager = PartitionManager::new(platform);

        assert!(matches!(manager.rollback(), Err(RollbackError::Platform(_))));
        assert_eq!(manager.platform().restarts, 0);
        assert_eq!(manager.state(), PartitionState::Running);
    }

    #[test]
    fn test_confirm_running_marks_unconfirmed_image() {
        let mut platform = FakePlatform::two_slot();
        platform.running.valid = false;
        let mut manager = PartitionManager::new(platform);
        manager.confirm_running();
        assert!(manager.running_partition().valid);
    }

    proptest! {
        #[test]
        fn prop_rollback_never_targets_running(
            running in 0u32..4,
            next in proptest::option::of(0u32..4),
            boot in 0u32..4,
        ) {
            let addr = |i: u32| 0x0001_0000 + i * 0x0010_0000;
            let platform = FakePlatform {
                running: slot("running", addr(running)),
                next: next.map(|n| slot("next", addr(n))),
                boot: slot("boot", addr(boot)),
                last_invalid: None,
                fail_set_boot: false,
                set_boot_calls: Vec::new(),
                restarts: 0,
            };
            let mut manager = PartitionManager::new(platform);
            match manager.rollback() {
                Ok(()) => {
                    let target = &manager.platform().set_boot_calls[0];
                    prop_assert_ne!(target.address, addr(running));
                    prop_assert_eq!(manager.platform().restarts, 1);
                }
                Err(RollbackError::NoCandidate) => {
                    prop_assert!(manager.platform().set_boot_calls.is_empty());
                    prop_assert_eq!(manager.platform().restarts, 0);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
