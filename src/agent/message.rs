//! Command messages clients may post to the agent.

use serde::Deserialize;
use serde_json::Value;

/// Recognized client commands. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl ClientMessage {
  /// Parse a message payload; None for any unrecognized shape.
  pub fn parse(payload: &Value) -> Option<Self> {
    Self::deserialize(payload).ok()
  }
}

/// What the message handler did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
  /// Skip-waiting applied; `left_waiting` is true if the agent moved out of waiting now
  SkipWaiting { left_waiting: bool },
  /// Payload not recognized, nothing happened
  Ignored,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn only_skip_waiting_is_recognized() {
    assert_eq!(
      ClientMessage::parse(&json!({ "type": "SKIP_WAITING" })),
      Some(ClientMessage::SkipWaiting)
    );
    assert_eq!(ClientMessage::parse(&json!({ "type": "OTHER" })), None);
    assert_eq!(ClientMessage::parse(&json!({})), None);
    assert_eq!(ClientMessage::parse(&json!({ "type": "skip_waiting" })), None);
    assert_eq!(ClientMessage::parse(&json!("SKIP_WAITING")), None);
    assert_eq!(ClientMessage::parse(&Value::Null), None);
  }
}
