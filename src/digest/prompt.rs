use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::digest::format::{DisplayClock, format_line};
use crate::digest::media::ImageSource;
use crate::onebot::types::ChatMessage;

pub const DEFAULT_PROMPT_TEMPLATE: &str = concat!(
    "这是过去{hours}小时的部分QQ群聊记录。其中《图片N》代表按顺序提供的第N张图（部分图片可能来自GIF等）。\n",
    "请用中文结合所有文本和图片信息进行分析和回应。请按照以下指示和结构进行回复：\n\n",
    "1.  **主要讨论方向概述**：\n",
    "    简要总结过去{hours}小时内群聊的整体讨论方向或最核心的主题,同一个方向的不同事件应该分别说明。如果无明显核心，请说明情况。\n\n",
    "2.  **详细主题分析**：\n",
    "    请分条列举各个具体讨论主题。对于每个主题：\n",
    "    a.  首先，给出该主题的**总结**，这部分内容不要超过50字。\n",
    "    b.  然后，在总结之后，紧接着给出相关的**原始聊天记录片段**。这部分请严格使用大括号 {} 包围，并且括号内部的每一条相关原始消息都以 `<<时间,用户名,用户id,发言>>` 的格式独立成行。注意每一个部分给出的聊天记录片段不要超过80行\n",
    "    例如一个主题的格式：\n",
    "游戏讨论总结：昨晚大家主要讨论了新发布的游戏A，特别是其画面和玩法。\n",
    "{<<22:30:05,玩家小明,10001,游戏A的风景太美了《图片5》>>\n",
    "<<22:31:00,玩家小红,10002,是啊，操作手感也不错，就是有点肝。>>\n",
    "<<22:35:10,群主,10000,我还没买，看你们聊得挺热闹《图片6》。>>}\n\n",
    "    请确保每个主题的总结和对应的原始记录块清晰配对。引用图片时继续使用《图片N》。注意识别群友的反语与调侃。\n",
    "    如果没有识别出任何明确的讨论主题，请在“详细主题分析”部分说明“未能识别出明确的独立讨论主题”。\n\n",
    "群聊记录开始：\n",
);

/// Final prompt text plus the images it references, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub text: String,
    pub images: Vec<PathBuf>,
}

pub fn render_prefix(template: &str, lookback_hours: u64) -> String {
    template.replace("{hours}", &lookback_hours.to_string())
}

pub fn load_prefix(template_path: Option<&Path>, lookback_hours: u64) -> Result<String> {
    let template = match template_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt template {}", path.display()))?,
        None => DEFAULT_PROMPT_TEMPLATE.to_string(),
    };
    Ok(render_prefix(&template, lookback_hours))
}

/// Format `messages` (already in chronological order) into one prompt.
/// `None` means there was nothing to report.
pub fn assemble(
    messages: &[ChatMessage],
    prefix: &str,
    clock: &DisplayClock,
    source: &dyn ImageSource,
) -> Option<PromptBundle> {
    if messages.is_empty() {
        return None;
    }

    let mut images = Vec::new();
    let mut counter = 1usize;
    let mut lines = Vec::with_capacity(messages.len());
    for msg in messages {
        let (line, next) = format_line(msg, clock, source, &mut images, counter);
        lines.push(line);
        counter = next;
    }

    let mut text = String::with_capacity(prefix.len() + lines.iter().map(String::len).sum::<usize>());
    text.push_str(prefix);
    text.push_str(&lines.join("\n"));
    Some(PromptBundle { text, images })
}
