use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Gateway-assigned message identifier; LLOneBot sends numbers, some
/// OneBot implementations send strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Num(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Num(n) => write!(f, "{n}"),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LenientInt {
    Int(i64),
    Text(String),
}

impl LenientInt {
    fn as_i64(&self) -> Option<i64> {
        match self {
            LenientInt::Int(n) => Some(*n),
            LenientInt::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderInfo {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
}

impl SenderInfo {
    /// Group card when set, then nickname, then a fixed fallback.
    pub fn display_name(&self) -> &str {
        [self.card.as_deref(), self.nickname.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .unwrap_or("未知用户")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Image {
        url: Option<String>,
        file: Option<String>,
    },
    Video {
        file: Option<String>,
    },
    Mention(String),
    Sticker(String),
    Reply(String),
    Unknown(String),
}

fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Segment {
    pub fn from_value(raw: &Value) -> Segment {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let data = raw.get("data");
        let field = |name: &str| value_text(data.and_then(|d| d.get(name)));

        match kind {
            "text" => Segment::Text(field("text").unwrap_or_default()),
            "image" => Segment::Image {
                url: field("url").filter(|u| !u.is_empty()),
                file: field("file").filter(|f| !f.is_empty()),
            },
            "video" => Segment::Video {
                file: field("file").filter(|f| !f.is_empty()),
            },
            "at" => Segment::Mention(field("qq").unwrap_or_else(|| "all".to_string())),
            "face" => Segment::Sticker(field("id").unwrap_or_default()),
            "reply" => Segment::Reply(field("id").unwrap_or_default()),
            other => Segment::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Segments(Vec<Segment>),
    Malformed,
}

impl From<Value> for MessageBody {
    fn from(raw: Value) -> Self {
        match raw {
            Value::Array(items) => {
                MessageBody::Segments(items.iter().map(Segment::from_value).collect())
            }
            _ => MessageBody::Malformed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawChatMessage {
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    message_seq: Option<LenientInt>,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    user_id: Option<LenientInt>,
    #[serde(default)]
    sender: SenderInfo,
    /// `None` only when the key is absent; an explicit `null` is kept.
    #[serde(default, deserialize_with = "present_value")]
    message: Option<Value>,
}

fn present_value<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(d).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawChatMessage")]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub message_seq: Option<i64>,
    pub time: i64,
    pub user_id: i64,
    pub sender: SenderInfo,
    pub body: MessageBody,
}

impl From<RawChatMessage> for ChatMessage {
    fn from(raw: RawChatMessage) -> Self {
        let message_seq = raw.message_seq.as_ref().and_then(LenientInt::as_i64);
        let message_id = raw.message_id.unwrap_or_else(|| {
            MessageId::Text(format!("msgid_{}", message_seq.unwrap_or_default()))
        });
        ChatMessage {
            message_id,
            message_seq,
            time: raw.time,
            user_id: raw
                .user_id
                .as_ref()
                .and_then(LenientInt::as_i64)
                .unwrap_or_default(),
            sender: raw.sender,
            body: raw
                .message
                .map(MessageBody::from)
                .unwrap_or(MessageBody::Segments(Vec::new())),
        }
    }
}

/// OneBot action response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: Option<i64>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub wording: Option<String>,
}

impl GatewayReply {
    pub fn is_ok(&self) -> bool {
        self.status == "ok" && self.retcode == Some(0)
    }

    pub fn failure_text(&self) -> String {
        let detail = self
            .wording
            .as_deref()
            .or(self.msg.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown error");
        format!(
            "status={} retcode={} msg={detail}",
            if self.status.is_empty() {
                "missing"
            } else {
                self.status.as_str()
            },
            self.retcode
                .map(|c| c.to_string())
                .unwrap_or_else(|| "missing".to_string()),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryData {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, GatewayReply, HistoryData, MessageBody, MessageId, Segment};
    use serde_json::json;

    #[test]
    fn chat_message_reads_llonebot_shape() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "message_id": 1882,
            "message_seq": "4410",
            "time": 1747900000,
            "user_id": 10001,
            "sender": {"nickname": "小明", "card": ""},
            "message": [
                {"type": "text", "data": {"text": "看这个"}},
                {"type": "image", "data": {"file": "A1B2.jpg", "url": "https://gchat.qpic.cn/x"}},
                {"type": "at", "data": {"qq": 10002}},
                {"type": "face", "data": {"id": "14"}},
                {"type": "reply", "data": {"id": 1870}},
                {"type": "json", "data": {"data": "{}"}}
            ]
        }))
        .expect("deserialize");

        assert_eq!(msg.message_id, MessageId::Num(1882));
        assert_eq!(msg.message_seq, Some(4410));
        assert_eq!(msg.sender.display_name(), "小明");
        let MessageBody::Segments(segments) = msg.body else {
            panic!("expected segments");
        };
        assert_eq!(segments[0], Segment::Text("看这个".to_string()));
        assert_eq!(
            segments[1],
            Segment::Image {
                url: Some("https://gchat.qpic.cn/x".to_string()),
                file: Some("A1B2.jpg".to_string()),
            }
        );
        assert_eq!(segments[2], Segment::Mention("10002".to_string()));
        assert_eq!(segments[3], Segment::Sticker("14".to_string()));
        assert_eq!(segments[4], Segment::Reply("1870".to_string()));
        assert_eq!(segments[5], Segment::Unknown("json".to_string()));
    }

    #[test]
    fn missing_id_is_synthesized_from_seq() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"message_seq": 77, "time": 1})).expect("deserialize");
        assert_eq!(msg.message_id, MessageId::Text("msgid_77".to_string()));
        assert_eq!(msg.body, MessageBody::Segments(Vec::new()));
        assert_eq!(msg.sender.display_name(), "未知用户");
    }

    #[test]
    fn non_list_message_is_malformed() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "message_id": "abc",
            "time": 1,
            "message": "[CQ:face,id=1]"
        }))
        .expect("deserialize");
        assert_eq!(msg.body, MessageBody::Malformed);
    }

    #[test]
    fn null_message_is_malformed_but_absent_is_empty() {
        let null_body: ChatMessage =
            serde_json::from_value(json!({"message_id": 1, "time": 1, "message": null}))
                .expect("deserialize");
        assert_eq!(null_body.body, MessageBody::Malformed);

        let absent: ChatMessage =
            serde_json::from_value(json!({"message_id": 2, "time": 1})).expect("deserialize");
        assert_eq!(absent.body, MessageBody::Segments(Vec::new()));
    }

    #[test]
    fn null_or_missing_messages_is_an_empty_page() {
        let null_page: HistoryData =
            serde_json::from_value(json!({"messages": null})).expect("null messages");
        assert!(null_page.messages.is_empty());
        let missing: HistoryData = serde_json::from_value(json!({})).expect("missing messages");
        assert!(missing.messages.is_empty());
    }

    #[test]
    fn mention_without_target_means_all() {
        let seg = Segment::from_value(&json!({"type": "at", "data": {}}));
        assert_eq!(seg, Segment::Mention("all".to_string()));
    }

    #[test]
    fn reply_requires_ok_status_and_zero_retcode() {
        let ok: GatewayReply =
            serde_json::from_value(json!({"status": "ok", "retcode": 0, "data": null}))
                .expect("ok");
        assert!(ok.is_ok());

        let failed: GatewayReply = serde_json::from_value(
            json!({"status": "failed", "retcode": 1200, "msg": "group not found"}),
        )
        .expect("failed");
        assert!(!failed.is_ok());
        assert!(failed.failure_text().contains("group not found"));

        let missing: GatewayReply =
            serde_json::from_value(json!({"status": "ok"})).expect("missing retcode");
        assert!(!missing.is_ok());
    }
}
