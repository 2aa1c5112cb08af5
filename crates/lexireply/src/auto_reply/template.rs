//! 内联片段语法
//!
//! 把文本中的 `[image.URL]`、`[at.ID]` 等方括号命令拆分为回复片段，
//! 方便在命令行或旧词库中用一行文本描述图文混排的回复。
//!
//! | 命令 | 片段 |
//! |---|---|
//! | `[image.URL]` / `[图片.URL]` | `Segment::Image` |
//! | `[at.ID]` / `[艾特.ID]`，`[at]` 表示发送者 | `Segment::Mention` |
//! | `[face.ID]` / `[表情.ID]` | `Segment::Face` |
//! | `[reply]` / `[回复]`，`[reply.ID]` | `Segment::Quote` |
//! | `[record.URL]` / `[语音.URL]` | `Segment::Voice` |
//! | `[poke.ID]` / `[戳.ID]`，`[poke]` 表示发送者 | `Segment::Poke` |
//!
//! `[poke.ID.GROUP]` 中的群号部分会被忽略，戳一戳总是发往当前会话。
//!
//! 无法识别的方括号内容保持为文本。

use crate::auto_reply::types::Segment;

fn command_segment(content: &str) -> Option<Segment> {
    let (head, arg) = match content.split_once('.') {
        Some((head, arg)) => (head, Some(arg)),
        None => (content, None),
    };
    let head = head.trim().to_lowercase();
    match (head.as_str(), arg) {
        ("image" | "图片", Some(url)) if !url.trim().is_empty() => {
            Some(Segment::Image(url.trim().to_string()))
        }
        ("record" | "语音", Some(url)) if !url.trim().is_empty() => {
            Some(Segment::Voice(url.trim().to_string()))
        }
        ("face" | "表情", Some(id)) if !id.trim().is_empty() => {
            Some(Segment::Face(id.trim().to_string()))
        }
        ("at" | "艾特", target) => Some(Segment::Mention(
            target.map(|t| t.trim().to_string()).unwrap_or_default(),
        )),
        ("poke" | "戳", target) => {
            let target = target
                .and_then(|t| t.split('.').next())
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            Some(Segment::Poke(target))
        }
        ("reply" | "回复", None) => Some(Segment::Quote(None)),
        ("reply" | "回复", Some(id)) => {
            let id = id.trim();
            Some(Segment::Quote((!id.is_empty()).then(|| id.to_string())))
        }
        _ => None,
    }
}

/// 解析内联片段
///
/// # 示例
///
/// ```
/// use lexireply::auto_reply::template::parse_inline;
/// use lexireply::auto_reply::Segment;
///
/// let segments = parse_inline("[at]你好[image.cat.png]");
/// assert_eq!(segments, vec![
///     Segment::Mention(String::new()),
///     Segment::Text("你好".into()),
///     Segment::Image("cat.png".into()),
/// ]);
/// ```
pub fn parse_inline(text: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '[' {
            if let Some(offset) = chars[i + 1..].iter().position(|c| *c == ']') {
                let close = i + 1 + offset;
                let content: String = chars[i + 1..close].iter().collect();
                if let Some(segment) = command_segment(&content) {
                    if !buffer.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut buffer)));
                    }
                    segments.push(segment);
                    i = close + 1;
                    continue;
                }
            }
        }
        buffer.push(chars[i]);
        i += 1;
    }

    if !buffer.is_empty() {
        segments.push(Segment::Text(buffer));
    }
    segments
}

/// 把片段还原为内联文本，是 [`parse_inline`] 的逆操作
pub fn render_inline(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.clone(),
            Segment::Image(url) => format!("[image.{}]", url),
            Segment::Mention(target) if target.is_empty() => "[at]".to_string(),
            Segment::Mention(target) => format!("[at.{}]", target),
            Segment::Face(id) => format!("[face.{}]", id),
            Segment::Quote(None) => "[reply]".to_string(),
            Segment::Quote(Some(id)) => format!("[reply.{}]", id),
            Segment::Voice(url) => format!("[record.{}]", url),
            Segment::Poke(target) if target.is_empty() => "[poke]".to_string(),
            Segment::Poke(target) => format!("[poke.{}]", target),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(parse_inline("hello"), vec![Segment::text("hello")]);
        assert!(parse_inline("").is_empty());
    }

    #[test]
    fn test_all_commands() {
        let segments = parse_inline("[回复][艾特.123]看[图片.a.png][表情.14][语音.v.amr]");
        assert_eq!(
            segments,
            vec![
                Segment::Quote(None),
                Segment::Mention("123".into()),
                Segment::text("看"),
                Segment::Image("a.png".into()),
                Segment::Face("14".into()),
                Segment::Voice("v.amr".into()),
            ]
        );
    }

    #[test]
    fn test_poke_command() {
        assert_eq!(
            parse_inline("[poke]戳[戳.42][poke.42.9000]"),
            vec![
                Segment::Poke(String::new()),
                Segment::text("戳"),
                Segment::Poke("42".into()),
                Segment::Poke("42".into()),
            ]
        );
        assert_eq!(
            render_inline(&[Segment::Poke(String::new()), Segment::Poke("7".into())]),
            "[poke][poke.7]"
        );
    }

    #[test]
    fn test_unknown_brackets_stay_text() {
        assert_eq!(
            parse_inline("[n.1] and [foo.bar] [image.]"),
            vec![Segment::text("[n.1] and [foo.bar] [image.]")]
        );
        assert_eq!(parse_inline("a [ b"), vec![Segment::text("a [ b")]);
    }

    #[test]
    fn test_render_roundtrip() {
        let source = "[reply]hi [at.42] look [image.http://x/y.png]";
        assert_eq!(render_inline(&parse_inline(source)), source);
    }
}
