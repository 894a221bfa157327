//! FOTA Core - Hardware-independent logic for the ESP32 firmware update agent
//!
//! Everything in here builds and tests on the host. The firmware crate plugs the
//! ESP-IDF flash, HTTPS, Wi-Fi and MQTT services in through the traits defined in
//! `transport`, `download`, `partition` and `connectivity`.

pub mod command;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod credentials;
pub mod download;
pub mod gesture;
pub mod manifest;
pub mod partition;
pub mod telemetry;
pub mod transport;
pub mod version;

pub use command::Command;
pub use config::AgentConfig;
pub use connectivity::{ConnectionEvents, ConnectivityState, ConnectivitySupervisor, Topics};
pub use controller::{OtaUpdateController, TickOutcome, UpdateCheck};
pub use credentials::Credentials;
pub use download::{DownloadError, DownloadRequest, FirmwareDownloader, FlashError, WriteTarget};
pub use gesture::{ResetGesture, ResetGestureDetector};
pub use manifest::{FetchError, ManifestDescriptor, VersionManifestFetcher};
pub use partition::{PartitionManager, PartitionPlatform, PartitionSlot, PartitionState};
pub use telemetry::{CounterTelemetry, PublishError, TelemetryBuffer};
pub use version::FirmwareVersion;
