/// Remote version manifest: `{"version": "...", "bin_url": "..."}`
use crate::transport::{self, HttpStream, HttpsClient, TransportError, HTTP_OK};
use crate::version::FirmwareVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

// Manifests are a few hundred bytes; anything bigger is not ours
const MAX_MANIFEST_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub version: FirmwareVersion,
    #[serde(rename = "bin_url")]
    pub binary_location: String,
    /// Hex SHA-256 of the image, optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    version: String,
    bin_url: String,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Unreachable, refused, or any non-200 answer
    Network(TransportError),
    Parse(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(e) => write!(f, "manifest request failed: {}", e),
            FetchError::Parse(msg) => write!(f, "malformed manifest: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl ManifestDescriptor {
    /// Parse a manifest body. Both fields are required and trimmed; a missing or
    /// non-string field fails closed.
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        let raw: RawManifest =
            serde_json::from_slice(body).map_err(|e| FetchError::Parse(e.to_string()))?;

        let binary_location = raw.bin_url.trim().to_string();
        if binary_location.is_empty() {
            return Err(FetchError::Parse("empty bin_url".to_string()));
        }

        let sha256 = raw
            .sha256
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        Ok(Self {
            version: FirmwareVersion::new(raw.version),
            binary_location,
            sha256,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Manifest URL with a cache-busting nonce appended
pub fn manifest_request_url(base: &str, nonce: u32) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, nonce)
}

pub struct VersionManifestFetcher<C> {
    client: C,
    manifest_url: String,
    authorization: String,
    nonce: u32,
}

impl<C: HttpsClient> VersionManifestFetcher<C> {
    /// `nonce_seed` should come from a hardware RNG on the device; zero is remapped
    pub fn new(client: C, manifest_url: &str, token: &str, nonce_seed: u32) -> Self {
        Self {
            client,
            manifest_url: manifest_url.to_string(),
            authorization: transport::authorization_value(token),
            nonce: if nonce_seed == 0 { 0x9E37_79B9 } else { nonce_seed },
        }
    }

    fn next_nonce(&mut self) -> u32 {
        // xorshift32
        let mut x = self.nonce;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.nonce = x;
        x
    }

    /// One GET of the manifest. No retries; the caller owns the cadence.
    pub fn fetch(&mut self) -> Result<ManifestDescriptor, FetchError> {
        let nonce = self.next_nonce();
        let url = manifest_request_url(&self.manifest_url, nonce);
        log::debug!("[HTTPS] GET {}", url);

        let headers = [("Authorization", self.authorization.as_str())];
        let mut stream = self.client.get(&url, &headers).map_err(FetchError::Network)?;

        let status = stream.status();
        if status != HTTP_OK {
            return Err(FetchError::Network(TransportError::Status(status)));
        }

        let body = transport::read_body(&mut stream, MAX_MANIFEST_BYTES).map_err(FetchError::Network)?;
        ManifestDescriptor::parse(&body)
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}
