use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        user_id: String,
        conversation_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "partial")] Partial {
        content: String,
    },
    #[serde(rename = "done")] Done {
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_round_trips_through_tagged_json() {
        let raw = r#"{"type":"chat","user_id":"u1","conversation_id":"c1","content":"hi"}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        let ClientMessage::Chat { user_id, conversation_id, content } = parsed;
        assert_eq!(user_id, "u1");
        assert_eq!(conversation_id, "c1");
        assert_eq!(content, "hi");
    }

    #[test]
    fn server_messages_serialize_with_type_tag() {
        let json = serde_json::to_string(&ServerMessage::Partial { content: "tok".into() }).unwrap();
        assert!(json.contains(r#""type":"partial""#));
        let json = serde_json::to_string(&ServerMessage::Typing).unwrap();
        assert_eq!(json, r#"{"type":"typing"}"#);
    }
}
