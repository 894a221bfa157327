/// Update cycle orchestration: fetch, compare, download, commit, reboot
///
/// The controller is driven from the single control loop. Each `tick` first
/// looks at the rollback input; only when it is not asserted does the polling
/// cycle run, and only once per poll interval.
use crate::download::{DownloadError, DownloadRequest, FirmwareDownloader, WriteTarget};
use crate::manifest::{FetchError, VersionManifestFetcher};
use crate::partition::{CommitError, PartitionManager, PartitionPlatform, PartitionState, RollbackError};
use crate::transport::HttpsClient;
use crate::version::FirmwareVersion;
use std::time::{Duration, Instant};

/// Result of one check-and-update cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    FetchFailed(FetchError),
    UpToDate,
    DownloadFailed(DownloadError),
    CommitFailed(CommitError),
    /// New image is the boot target and the restart has been issued
    Restarting { version: FirmwareVersion },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due this tick
    Idle,
    /// A restart is already under way; nothing else will run
    Halted,
    RolledBack,
    RollbackRefused(RollbackError),
    /// Rollback input still held after a refused attempt
    RollbackHeld,
    Checked(UpdateCheck),
}

pub struct OtaUpdateController<C, P, W> {
    fetcher: VersionManifestFetcher<C>,
    downloader: FirmwareDownloader<C>,
    partitions: PartitionManager<P>,
    target: W,
    running_version: FirmwareVersion,
    poll_interval: Duration,
    last_check: Instant,
    verify_checksum: bool,
    rollback_latched: bool,
}

impl<C, P, W> OtaUpdateController<C, P, W>
where
    C: HttpsClient,
    P: PartitionPlatform,
    W: WriteTarget,
{
    pub fn new(
        fetcher: VersionManifestFetcher<C>,
        downloader: FirmwareDownloader<C>,
        partitions: PartitionManager<P>,
        target: W,
        running_version: FirmwareVersion,
        poll_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            fetcher,
            downloader,
            partitions,
            target,
            running_version,
            poll_interval,
            last_check: now,
            verify_checksum: true,
            rollback_latched: false,
        }
    }

    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksum = enabled;
        self
    }

    pub fn running_version(&self) -> &FirmwareVersion {
        &self.running_version
    }

    pub fn partitions(&self) -> &PartitionManager<P> {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut PartitionManager<P> {
        &mut self.partitions
    }

    pub fn target(&self) -> &W {
        &self.target
    }

    /// One scheduling tick. `rollback_asserted` is the current level of the
    /// rollback input.
    pub fn tick(&mut self, now: Instant, rollback_asserted: bool) -> TickOutcome {
        if self.partitions.state() == PartitionState::Rebooting {
            return TickOutcome::Halted;
        }

        if rollback_asserted {
            if self.rollback_latched {
                return TickOutcome::RollbackHeld;
            }
            log::info!("Rollback pin triggered. Rolling back to previous firmware.");
            return match self.partitions.rollback() {
                Ok(()) => TickOutcome::RolledBack,
                Err(e) => {
                    log::warn!("Rollback refused: {}", e);
                    self.rollback_latched = true;
                    TickOutcome::RollbackRefused(e)
                }
            };
        }
        self.rollback_latched = false;

        if now.saturating_duration_since(self.last_check) < self.poll_interval {
            return TickOutcome::Idle;
        }
        self.last_check = now;
        TickOutcome::Checked(self.check_for_update())
    }

    /// Run a full cycle now, regardless of the poll interval
    pub fn check_for_update(&mut self) -> UpdateCheck {
        log::info!("Checking for firmware update...");

        let manifest = match self.fetcher.fetch() {
            Ok(m) => m,
            Err(e) => {
                log::error!("Failed to fetch version info: {}", e);
                return UpdateCheck::FetchFailed(e);
            }
        };

        log::info!(
            "Current firmware version: {}, latest: {}",
            self.running_version,
            manifest.version
        );
        if !manifest.version.differs_from(&self.running_version) {
            log::info!("No new firmware available");
            return UpdateCheck::UpToDate;
        }

        log::info!("New firmware available: {}", manifest.version);
        let slot = match self.partitions.next_update_partition() {
            Ok(slot) => slot,
            Err(e) => {
                log::error!("{}", e);
                return UpdateCheck::DownloadFailed(DownloadError::NoUpdatePartition);
            }
        };

        let request = DownloadRequest {
            uri: &manifest.binary_location,
            slot: &slot,
            expected_length: None,
            sha256: manifest.sha256.as_deref().filter(|_| self.verify_checksum),
        };
        if let Err(e) = self.downloader.download(&request, &mut self.target) {
            log::error!("Firmware download failed: {}", e);
            return UpdateCheck::DownloadFailed(e);
        }

        if let Err(e) = self.target.finalize() {
            log::error!("Update not finished? Something went wrong! {}", e);
            return UpdateCheck::DownloadFailed(DownloadError::CommitFailed(e));
        }

        if let Err(e) = self.partitions.commit_update(&slot) {
            log::error!("Commit failed, staying on {}: {}", self.running_version, e);
            return UpdateCheck::CommitFailed(e);
        }

        log::info!("Update successfully completed. Rebooting...");
        self.partitions.reboot();
        UpdateCheck::Restarting { version: manifest.version }
    }
}
