/// Inbound command topic payloads: `{"state": "0"|"1"}`
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Off,
    On,
    /// Well-formed JSON with a `state` we do not know
    Unknown(String),
}

/// Parse a command payload. Returns `None` for anything that is not a JSON
/// object with a `state` field.
pub fn parse_command(payload: &[u8]) -> Option<Command> {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Failed to parse command JSON: {}", e);
            return None;
        }
    };

    let state = match value.get("state")? {
        Value::String(s) => s.trim().to_string(),
        // Some publishers send the bare number
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };

    Some(match state.as_str() {
        "0" => Command::Off,
        "1" => Command::On,
        _ => Command::Unknown(state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_off() {
        assert_eq!(parse_command(br#"{"state":"1"}"#), Some(Command::On));
        assert_eq!(parse_command(br#"{"state":"0"}"#), Some(Command::Off));
        assert_eq!(parse_command(br#"{"state":1}"#), Some(Command::On));
    }

    #[test]
    fn test_unknown_state() {
        assert_eq!(parse_command(br#"{"state":"blink"}"#), Some(Command::Unknown("blink".to_string())));
    }

    #[test]
    fn test_malformed_is_ignored() {
        assert_eq!(parse_command(b"state=1"), None);
        assert_eq!(parse_command(br#"{"level":"1"}"#), None);
    }
}
