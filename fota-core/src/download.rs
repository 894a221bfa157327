/// Streams a firmware image from HTTPS straight into a flash write target
///
/// Memory use is one fixed chunk buffer no matter how large the image is. The
/// target is begun with the server-reported length, so an image without a
/// length (or with length zero) never touches flash.
use crate::partition::PartitionSlot;
use crate::transport::{self, HttpStream, HttpsClient, TransportError, HTTP_OK};
use sha2::{Digest, Sha256};
use std::fmt;

const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// Not enough room or the slot could not be opened
    Begin(String),
    Write(String),
    /// Image validation failed while closing the slot
    Finalize(String),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::Begin(msg) => write!(f, "begin failed: {}", msg),
            FlashError::Write(msg) => write!(f, "write failed: {}", msg),
            FlashError::Finalize(msg) => write!(f, "finalize failed: {}", msg),
        }
    }
}

impl std::error::Error for FlashError {}

/// Flash write target for one update at a time
pub trait WriteTarget {
    fn begin(&mut self, slot: &PartitionSlot, size: u64) -> Result<(), FlashError>;

    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError>;

    /// Close the slot and validate the image. Does not change the boot target.
    fn finalize(&mut self) -> Result<(), FlashError>;

    /// Drop a partially written image
    fn abort(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Request failed or the server did not answer 200
    Network(TransportError),
    InvalidLength {
        reported: Option<u64>,
        expected: Option<u64>,
    },
    NoUpdatePartition,
    Flash(FlashError),
    /// Stream ended before `expected` bytes; `cause` is set when the transport failed
    ShortWrite {
        written: u64,
        expected: u64,
        cause: Option<TransportError>,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
    },
    CommitFailed(FlashError),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Network(e) => write!(f, "firmware request failed: {}", e),
            DownloadError::InvalidLength { reported, expected } => write!(
                f,
                "content length invalid or zero (reported {:?}, expected {:?})",
                reported, expected
            ),
            DownloadError::NoUpdatePartition => f.write_str("no partition available for the update"),
            DownloadError::Flash(e) => write!(f, "flash {}", e),
            DownloadError::ShortWrite {
                written,
                expected,
                cause: None,
            } => write!(f, "written {} of {} bytes", written, expected),
            DownloadError::ShortWrite {
                written,
                expected,
                cause: Some(e),
            } => write!(f, "written {} of {} bytes: {}", written, expected, e),
            DownloadError::ChecksumMismatch { expected, actual } => {
                write!(f, "sha256 mismatch: expected {}, got {}", expected, actual)
            }
            DownloadError::CommitFailed(e) => write!(f, "update not finished: {}", e),
        }
    }
}

impl std::error::Error for DownloadError {}

pub struct DownloadRequest<'a> {
    pub uri: &'a str,
    pub slot: &'a PartitionSlot,
    /// Length the caller already knows about, checked against the server's
    pub expected_length: Option<u64>,
    /// Lowercase hex SHA-256 to verify before returning
    pub sha256: Option<&'a str>,
}

pub struct FirmwareDownloader<C> {
    client: C,
    authorization: String,
}

impl<C: HttpsClient> FirmwareDownloader<C> {
    pub fn new(client: C, token: &str) -> Self {
        Self {
            client,
            authorization: transport::authorization_value(token),
        }
    }

    /// Download `request.uri` into `target`, returning the bytes written.
    ///
    /// On any failure after `begin` the target is aborted. On success the target
    /// is left open for the caller to finalize.
    pub fn download<W: WriteTarget>(
        &mut self,
        request: &DownloadRequest<'_>,
        target: &mut W,
    ) -> Result<u64, DownloadError> {
        log::info!("Starting firmware download from {}", request.uri);

        let headers = [("Authorization", self.authorization.as_str())];
        let mut stream = self
            .client
            .get(request.uri, &headers)
            .map_err(DownloadError::Network)?;

        let status = stream.status();
        if status != HTTP_OK {
            return Err(DownloadError::Network(TransportError::Status(status)));
        }

        let reported = stream.content_length();
        let length = match reported {
            Some(n) if n > 0 => n,
            _ => {
                return Err(DownloadError::InvalidLength {
                    reported,
                    expected: request.expected_length,
                })
            }
        };
        if let Some(expected) = request.expected_length {
            if expected != length {
                return Err(DownloadError::InvalidLength {
                    reported,
                    expected: Some(expected),
                });
            }
        }
        log::info!("Firmware size: {} bytes -> {}", length, request.slot.label);

        target.begin(request.slot, length).map_err(DownloadError::Flash)?;

        match stream_into(&mut stream, target, length, request.sha256.is_some()) {
            Ok(digest) => {
                if let (Some(expected), Some(actual)) = (request.sha256, digest) {
                    if !expected.eq_ignore_ascii_case(&actual) {
                        target.abort();
                        return Err(DownloadError::ChecksumMismatch {
                            expected: expected.to_string(),
                            actual,
                        });
                    }
                    log::info!("Image sha256 verified");
                }
                log::info!("Firmware update successfully written!");
                Ok(length)
            }
            Err(e) => {
                log::error!("Firmware update failed! {}", e);
                target.abort();
                Err(e)
            }
        }
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

/// Copy exactly `length` bytes from `stream` to `target`, returning the hex
/// digest when `hash` is set
fn stream_into<S: HttpStream, W: WriteTarget>(
    stream: &mut S,
    target: &mut W,
    length: u64,
    hash: bool,
) -> Result<Option<String>, DownloadError> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut hasher = hash.then(Sha256::new);
    let mut written: u64 = 0;
    let mut next_report = 10;
    let mut cause = None;

    while written < length {
        let want = (length - written).min(CHUNK_SIZE as u64) as usize;
        let n = match stream.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                // The transport gave up; what was written is all we get
                log::warn!("Stream ended early: {}", e);
                cause = Some(e);
                break;
            }
        };

        target.write(&buf[..n]).map_err(DownloadError::Flash)?;
        if let Some(h) = hasher.as_mut() {
            h.update(&buf[..n]);
        }
        written += n as u64;

        let progress = written * 100 / length;
        if progress >= next_report {
            log::info!("Download progress: {}% ({} / {})", progress, written, length);
            next_report = (progress / 10 + 1) * 10;
        }
    }

    if written != length {
        return Err(DownloadError::ShortWrite {
            written,
            expected: length,
            cause,
        });
    }

    Ok(hasher.map(|h| {
        h.finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()
    }))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records what would have been flashed
    #[derive(Default)]
    pub struct FakeFlash {
        pub begun: Option<(String, u64)>,
        pub data: Vec<u8>,
        pub finalized: bool,
        pub aborted: bool,
        pub fail_begin: bool,
        pub fail_write_at: Option<usize>,
        pub fail_finalize: bool,
    }

    impl WriteTarget for FakeFlash {
        fn begin(&mut self, slot: &PartitionSlot, size: u64) -> Result<(), FlashError> {
            if self.fail_begin {
                return Err(FlashError::Begin("not enough space".to_string()));
            }
            self.begun = Some((slot.label.clone(), size));
            self.data.clear();
            self.finalized = false;
            self.aborted = false;
            Ok(())
        }

        fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
            if let Some(limit) = self.fail_write_at {
                if self.data.len() + chunk.len() > limit {
                    return Err(FlashError::Write("ESP_FAIL".to_string()));
                }
            }
            self.data.extend_from_slice(chunk);
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), FlashError> {
            if self.fail_finalize {
                return Err(FlashError::Finalize("ESP_ERR_OTA_VALIDATE_FAILED".to_string()));
            }
            self.finalized = true;
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }
}
