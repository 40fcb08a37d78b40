use serde_json::Value;

use crate::types::Team;

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Join { name: String, team: Team },
    Claim { x: i32, y: i32 },
    Chat { text: String },
    Heartbeat,
    Ping { t: f64 },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "join" => {
            let name = object.get("name")?.as_str()?.to_string();
            let team = Team::parse(object.get("team")?.as_str()?)?;
            Some(ParsedClientMessage::Join { name, team })
        }
        "claim" => {
            let x = parse_coordinate(object.get("x"))?;
            let y = parse_coordinate(object.get("y"))?;
            Some(ParsedClientMessage::Claim { x, y })
        }
        "chat" => {
            let text = object.get("text")?.as_str()?.to_string();
            Some(ParsedClientMessage::Chat { text })
        }
        "heartbeat" => Some(ParsedClientMessage::Heartbeat),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_coordinate(value: Option<&Value>) -> Option<i32> {
    let value = value?;
    if let Some(number) = value.as_i64() {
        return i32::try_from(number).ok();
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() && number.fract() == 0.0 {
            let floored = number as i64;
            return i32::try_from(floored).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_join_message() {
        let parsed = parse_client_message(r#"{"type":"join","name":"Alice","team":"blue"}"#)
            .expect("join message should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Join {
                name: "Alice".to_string(),
                team: Team::Blue,
            }
        );
    }

    #[test]
    fn parse_join_rejects_unknown_team() {
        assert!(parse_client_message(r#"{"type":"join","name":"A","team":"red"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"join","name":"A"}"#).is_none());
    }

    #[test]
    fn parse_claim_message() {
        let parsed = parse_client_message(r#"{"type":"claim","x":3,"y":97}"#)
            .expect("claim message should parse");
        assert_eq!(parsed, ParsedClientMessage::Claim { x: 3, y: 97 });
    }

    #[test]
    fn parse_claim_accepts_out_of_grid_coordinates() {
        // Bounds are the engine's call; the protocol only guards the type.
        let parsed = parse_client_message(r#"{"type":"claim","x":-1,"y":100}"#);
        assert_eq!(parsed, Some(ParsedClientMessage::Claim { x: -1, y: 100 }));
    }

    #[test]
    fn parse_claim_rejects_non_integer_coordinates() {
        assert!(parse_client_message(r#"{"type":"claim","x":1.5,"y":2}"#).is_none());
        assert!(parse_client_message(r#"{"type":"claim","x":"3","y":2}"#).is_none());
        assert!(parse_client_message(r#"{"type":"claim","x":4294967296,"y":2}"#).is_none());
    }

    #[test]
    fn parse_chat_message() {
        let parsed = parse_client_message(r#"{"type":"chat","text":"go blue"}"#)
            .expect("chat message should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Chat {
                text: "go blue".to_string(),
            }
        );
    }

    #[test]
    fn parse_heartbeat_message() {
        assert_eq!(
            parse_client_message(r#"{"type":"heartbeat"}"#),
            Some(ParsedClientMessage::Heartbeat)
        );
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        assert!(matches!(
            parse_client_message(r#"{"type":"ping","t":12.5}"#),
            Some(ParsedClientMessage::Ping { .. })
        ));
        assert!(parse_client_message(r#"{"type":"ping"}"#).is_none());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(parse_client_message(r#"{"type":"dance"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }
}
