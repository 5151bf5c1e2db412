//! Outbound message shapes
//!
//! Embedded players disagree on what a control message looks like, so every
//! command is sent once per registered encoder. A new player family is
//! supported by registering another encoder, not by special-casing here.

use serde_json::{json, Value};

use super::command::PlayerCommand;
use super::BridgeMessage;

/// Turns an abstract command into one concrete cross-boundary message
pub trait CommandEncoder: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn encode(&self, command: &PlayerCommand) -> BridgeMessage;
}

/// `{ type: "player", command, value }`
pub struct StructuredEncoder;

impl CommandEncoder for StructuredEncoder {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn encode(&self, command: &PlayerCommand) -> BridgeMessage {
        BridgeMessage::Structured(json!({
            "type": "player",
            "command": command.name(),
            "value": command.value(),
        }))
    }
}

/// JSON text `{"event": ..., "data": ...}` for players that only accept strings
pub struct JsonTextEncoder;

impl CommandEncoder for JsonTextEncoder {
    fn name(&self) -> &'static str {
        "json-text"
    }

    fn encode(&self, command: &PlayerCommand) -> BridgeMessage {
        let body = json!({
            "event": command.name(),
            "data": command.value(),
        });
        BridgeMessage::Text(body.to_string())
    }
}

/// `{ action, value }`
pub struct ActionEncoder;

impl CommandEncoder for ActionEncoder {
    fn name(&self) -> &'static str {
        "action"
    }

    fn encode(&self, command: &PlayerCommand) -> BridgeMessage {
        BridgeMessage::Structured(json!({
            "action": command.name(),
            "value": command.value(),
        }))
    }
}

/// The three shapes every bridge sends by default
pub fn default_encoders() -> Vec<Box<dyn CommandEncoder>> {
    vec![
        Box::new(StructuredEncoder),
        Box::new(JsonTextEncoder),
        Box::new(ActionEncoder),
    ]
}

/// Adapter-side recognition of any of the shapes above.
///
/// This is what the injected script does in the player surface; native
/// players behind a `PlayerSurface` use it directly.
pub fn decode_command(message: &BridgeMessage) -> Option<PlayerCommand> {
    let parsed;
    let data = match message {
        BridgeMessage::Structured(value) => value,
        BridgeMessage::Text(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
    };

    let name = ["command", "action", "event"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))?;
    let value = ["value", "data"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_f64));

    PlayerCommand::from_parts(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_default_shape_decodes_back() {
        let commands = [
            PlayerCommand::Play,
            PlayerCommand::Pause,
            PlayerCommand::Seek(0.0),
            PlayerCommand::Seek(93.25),
            PlayerCommand::GetTime,
        ];
        for encoder in default_encoders() {
            for command in commands {
                let message = encoder.encode(&command);
                assert_eq!(decode_command(&message), Some(command), "encoder {}", encoder.name());
            }
        }
    }

    #[test]
    fn test_json_text_shape_is_a_string() {
        let message = JsonTextEncoder.encode(&PlayerCommand::Seek(12.0));
        match message {
            BridgeMessage::Text(text) => {
                let v: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["event"], "seek");
                assert_eq!(v["data"], 12.0);
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ignores_unrelated_traffic() {
        assert!(decode_command(&BridgeMessage::Text("not json".into())).is_none());
        assert!(decode_command(&BridgeMessage::Structured(json!({ "foo": 1 }))).is_none());
        assert!(decode_command(&BridgeMessage::Structured(json!({ "command": "rewind" }))).is_none());
        // seek without a position is meaningless
        assert!(decode_command(&BridgeMessage::Structured(json!({ "action": "seek" }))).is_none());
    }
}
