/// Wi-Fi credentials record stored as two lines: SSID, then password
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Self {
        Self {
            ssid: ssid.trim().to_string(),
            password: password.trim().to_string(),
        }
    }

    /// Parse the file contents. Both lines are trimmed and must be non-empty.
    pub fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let ssid = lines.next()?.trim();
        let password = lines.next()?.trim();
        if ssid.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self::new(ssid, password))
    }

    pub fn to_file_contents(&self) -> String {
        format!("{}\n{}\n", self.ssid, self.password)
    }

    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }
}

// Keep the password out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"********")
            .finish()
    }
}
