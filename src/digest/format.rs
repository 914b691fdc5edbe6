use anyhow::{Result, anyhow};
use chrono::{Local, TimeZone};
use chrono_tz::Tz;
use std::path::PathBuf;
use tracing::debug;

use crate::digest::media::{ImageSource, MediaOutcome};
use crate::onebot::types::{ChatMessage, MessageBody, Segment};

pub const MALFORMED_MESSAGE: &str = "[消息格式错误]";
const UNKNOWN_FILE: &str = "未知";

/// Wall clock used for the `HH:MM:SS` prefix of each prompt line.
#[derive(Debug, Clone, Copy)]
pub enum DisplayClock {
    Local,
    Zone(Tz),
}

impl DisplayClock {
    pub fn from_name(name: Option<&str>) -> Result<Self> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => Ok(DisplayClock::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(DisplayClock::Zone)
                .map_err(|_| anyhow!("unknown timezone `{name}`")),
        }
    }

    pub fn hms(&self, epoch_secs: i64) -> String {
        let formatted = match self {
            DisplayClock::Local => Local
                .timestamp_opt(epoch_secs, 0)
                .single()
                .map(|t| t.format("%H:%M:%S").to_string()),
            DisplayClock::Zone(tz) => tz
                .timestamp_opt(epoch_secs, 0)
                .single()
                .map(|t| t.format("%H:%M:%S").to_string()),
        };
        formatted.unwrap_or_else(|| "--:--:--".to_string())
    }
}

fn file_label(file: Option<&str>) -> &str {
    file.unwrap_or(UNKNOWN_FILE)
}

/// Render one message's segments into a single line of prompt text.
///
/// Every successfully normalized image is pushed onto `images` and replaced by
/// `《图片N》`, where `N` continues from `counter`. Failed images leave an
/// inline bracket and do not consume a number. Returns the text and the next
/// free placeholder number.
pub fn format_segments(
    body: &MessageBody,
    context_id: &str,
    source: &dyn ImageSource,
    images: &mut Vec<PathBuf>,
    counter: usize,
) -> (String, usize) {
    let segments = match body {
        MessageBody::Segments(segments) => segments,
        MessageBody::Malformed => return (MALFORMED_MESSAGE.to_string(), counter),
    };

    let mut out = String::new();
    let mut next = counter;
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Image {
                url: Some(url),
                file,
            } => match source.normalize(url, file.as_deref(), context_id) {
                MediaOutcome::Ready(image) => {
                    out.push_str(&format!("《图片{next}{}》", image.annotation));
                    images.push(image.path);
                    next += 1;
                }
                MediaOutcome::Skipped(note) => out.push_str(&format!(
                    "[图片: {}{note} (处理失败或不支持)]",
                    file_label(file.as_deref())
                )),
            },
            Segment::Image { url: None, file } => {
                out.push_str(&format!("[图片: {} (无URL)]", file_label(file.as_deref())))
            }
            Segment::Video { file } => out.push_str(&format!(
                "[视频: {} (帧提取未实现)]",
                file_label(file.as_deref())
            )),
            Segment::Mention(target) => {
                out.push('@');
                out.push_str(target);
            }
            Segment::Sticker(id) => out.push_str(&format!("[表情ID:{id}]")),
            Segment::Reply(id) => out.push_str(&format!("[回复消息ID:{id}]")),
            Segment::Unknown(kind) => debug!(kind = %kind, context_id, "segment kind not rendered"),
        }
    }
    (out, next)
}

/// `HH:MM:SS name(user_id): text` for one message.
pub fn format_line(
    msg: &ChatMessage,
    clock: &DisplayClock,
    source: &dyn ImageSource,
    images: &mut Vec<PathBuf>,
    counter: usize,
) -> (String, usize) {
    let context_id = msg.message_id.to_string();
    let (text, next) = format_segments(&msg.body, &context_id, source, images, counter);
    let line = format!(
        "{} {}({}): {text}",
        clock.hms(msg.time),
        msg.sender.display_name(),
        msg.user_id
    );
    (line, next)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{DisplayClock, MALFORMED_MESSAGE, format_line, format_segments};
    use crate::digest::media::{Annotation, ImageSource, MediaOutcome, NormalizedImage};
    use crate::onebot::types::{ChatMessage, MessageBody, MessageId, Segment, SenderInfo};
    use std::cell::RefCell;
    use std::path::PathBuf;

    /// Images whose URL contains `fail` are skipped; `.gif` URLs come back
    /// as derived frames.
    #[derive(Default)]
    pub(crate) struct StubImages {
        pub(crate) calls: RefCell<Vec<String>>,
    }

    impl ImageSource for StubImages {
        fn normalize(&self, url: &str, suggested: Option<&str>, context_id: &str) -> MediaOutcome {
            self.calls.borrow_mut().push(format!("{context_id}:{url}"));
            let name = suggested.unwrap_or("anon.jpg");
            if url.contains("fail") {
                return MediaOutcome::Skipped(Annotation::DownloadFailed(name.to_string()));
            }
            let annotation = if url.ends_with(".gif") {
                Annotation::FromGif
            } else {
                Annotation::Plain
            };
            MediaOutcome::Ready(NormalizedImage {
                path: PathBuf::from("/cache").join(name),
                annotation,
            })
        }
    }

    fn image(url: Option<&str>, file: Option<&str>) -> Segment {
        Segment::Image {
            url: url.map(str::to_string),
            file: file.map(str::to_string),
        }
    }

    #[test]
    fn every_segment_kind_renders() {
        let body = MessageBody::Segments(vec![
            Segment::Text("hi ".to_string()),
            Segment::Mention("all".to_string()),
            Segment::Text(" ".to_string()),
            Segment::Sticker("14".to_string()),
            Segment::Reply("1870".to_string()),
            Segment::Video {
                file: Some("clip.mp4".to_string()),
            },
            image(None, Some("lost.jpg")),
            Segment::Unknown("json".to_string()),
        ]);
        let stub = StubImages::default();
        let mut images = Vec::new();
        let (text, next) = format_segments(&body, "1", &stub, &mut images, 1);

        assert_eq!(
            text,
            "hi @all [表情ID:14][回复消息ID:1870][视频: clip.mp4 (帧提取未实现)][图片: lost.jpg (无URL)]"
        );
        assert_eq!(next, 1);
        assert!(images.is_empty());
        assert!(stub.calls.borrow().is_empty());
    }

    #[test]
    fn failed_image_does_not_consume_a_placeholder() {
        let body = MessageBody::Segments(vec![
            image(Some("https://x/fail.jpg"), Some("a.jpg")),
            image(Some("https://x/ok.jpg"), Some("b.jpg")),
        ]);
        let mut images = Vec::new();
        let (text, next) = format_segments(&body, "1", &StubImages::default(), &mut images, 1);

        assert_eq!(
            text,
            "[图片: a.jpg (下载失败: a.jpg) (处理失败或不支持)]《图片1》"
        );
        assert_eq!(next, 2);
        assert_eq!(images, vec![PathBuf::from("/cache/b.jpg")]);
    }

    #[test]
    fn counter_continues_from_caller_and_carries_annotation() {
        let body = MessageBody::Segments(vec![image(Some("https://x/y.gif"), Some("y.gif"))]);
        let mut images = vec![PathBuf::from("/cache/earlier.jpg")];
        let (text, next) = format_segments(&body, "1", &StubImages::default(), &mut images, 2);
        assert_eq!(text, "《图片2 (来自GIF)》");
        assert_eq!(next, 3);
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn malformed_body_renders_fixed_error() {
        let mut images = Vec::new();
        let (text, next) = format_segments(
            &MessageBody::Malformed,
            "1",
            &StubImages::default(),
            &mut images,
            4,
        );
        assert_eq!(text, MALFORMED_MESSAGE);
        assert_eq!(next, 4);
    }

    #[test]
    fn line_has_clock_sender_and_user_id() {
        let msg = ChatMessage {
            message_id: MessageId::Num(5),
            message_seq: Some(5),
            time: 1_700_000_000,
            user_id: 10001,
            sender: SenderInfo {
                nickname: Some("nick".to_string()),
                card: Some("群名片".to_string()),
            },
            body: MessageBody::Segments(vec![image(Some("https://x/ok.jpg"), None)]),
        };
        let clock = DisplayClock::from_name(Some("Asia/Shanghai")).expect("tz");
        let stub = StubImages::default();
        let mut images = Vec::new();
        let (line, _) = format_line(&msg, &clock, &stub, &mut images, 1);

        assert_eq!(line, "06:13:20 群名片(10001): 《图片1》");
        assert_eq!(*stub.calls.borrow(), vec!["5:https://x/ok.jpg".to_string()]);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(DisplayClock::from_name(Some("Nowhere/City")).is_err());
        assert!(matches!(
            DisplayClock::from_name(Some("  ")),
            Ok(DisplayClock::Local)
        ));
    }
}
