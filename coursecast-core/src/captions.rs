//! Captions, the course index message and the course summary texts.
//!
//! Everything here renders to the Telegram HTML subset (`<b>`, `<i>`,
//! `<a href>`). Text that comes from the filesystem is always escaped.

use std::fs;
use std::path::PathBuf;

use crate::model::{Module, Video, DOC_TAG};

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Title shown for a video: its file name without the extension.
pub fn display_title(title: &str) -> &str {
    match title.rfind('.') {
        Some(dot) if dot > 0 => &title[..dot],
        _ => title,
    }
}

/// `#Doc001` style tag of archive part `index` (1-based).
pub fn doc_tag(index: usize) -> String {
    format!("#{}{:03}", DOC_TAG, index)
}

pub fn video_tag(video: &Video) -> String {
    format!("#{}", video.id)
}

pub fn video_caption(video: &Video, part_index: usize, part_count: usize) -> String {
    let mut caption = format!(
        "{} {} - {}\n{}",
        video_tag(video),
        video.sequence,
        escape_html(display_title(&video.title)),
        escape_html(&video.module)
    );
    if part_count > 1 {
        caption.push_str(&format!(" [Part {part_index}/{part_count}]"));
    }
    caption
}

pub fn archive_caption(index: usize, count: usize) -> String {
    format!(
        "{} 🗂 <b>Support Material</b>\nFile {index}/{count}",
        doc_tag(index)
    )
}

/// Index message built up while units are delivered.
#[derive(Debug, Default, Clone)]
pub struct IndexBuilder {
    docs: Vec<String>,
    modules: Vec<(String, Vec<String>)>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_doc(&mut self, index: usize) {
        self.docs.push(doc_tag(index));
    }

    pub fn start_module(&mut self, name: &str) {
        self.modules.push((name.to_string(), Vec::new()));
    }

    /// Adds `video` under the most recently started module.
    pub fn add_video(&mut self, video: &Video) {
        match self.modules.last_mut() {
            Some((_, tags)) => tags.push(video_tag(video)),
            None => self.modules.push((video.module.clone(), vec![video_tag(video)])),
        }
    }

    pub fn has_videos(&self) -> bool {
        self.modules.iter().any(|(_, tags)| !tags.is_empty())
    }

    pub fn render(&self) -> String {
        let mut out = String::from("⚠️ <b>Course Menu</b> ⚠️\n\n");
        out.push_str("Tap a hashtag to jump to it.\n\n");
        out.push_str("📂 <b>Files</b>\n");
        if self.docs.is_empty() {
            out.push_str("<i>No support material.</i>\n");
        } else {
            out.push_str(&self.docs.join(" "));
            out.push('\n');
        }

        for (name, tags) in self.modules.iter().filter(|(_, tags)| !tags.is_empty()) {
            out.push_str(&format!("\n📁 <b>{}</b>\n", escape_html(name)));
            out.push_str(&tags.join(" "));
            out.push('\n');
        }
        out
    }
}

pub fn course_card(
    name: &str,
    total_bytes: u64,
    total_secs: u64,
    logo: Option<&str>,
    invite: Option<&str>,
) -> String {
    let mut card = format!(
        "🎓 <b>{}</b>\n\n💾 | Total size: {} GB\n⏳ | Total duration: {}",
        escape_html(name),
        format_gib(total_bytes),
        format_duration(total_secs)
    );
    if let Some(logo) = logo.filter(|l| !l.is_empty()) {
        card.push_str(&format!("\n\n{}", escape_html(logo)));
    }
    if let Some(link) = invite.filter(|l| !l.is_empty()) {
        card.push_str(&format!(
            "\n\n👉 <a href=\"{}\"><b>OPEN THE COURSE</b></a> 👈",
            escape_html(link)
        ));
    }
    card
}

/// Plain-text chat description (no markup is rendered there).
pub fn chat_description(total_bytes: u64, total_secs: u64, invite: Option<&str>, logo: Option<&str>) -> String {
    let mut text = format!(
        "Size: {} GB\nDuration: {}",
        format_gib(total_bytes),
        format_duration(total_secs)
    );
    if let Some(link) = invite.filter(|l| !l.is_empty()) {
        text.push_str(&format!("\nInvite: {link}"));
    }
    if let Some(logo) = logo.filter(|l| !l.is_empty()) {
        text.push_str(&format!("\n\n{logo}"));
    }
    text
}

/// Combined size of the assets that still exist on disk.
pub fn assets_size(paths: &[PathBuf]) -> u64 {
    paths
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

pub fn videos_size(modules: &[Module]) -> u64 {
    modules.iter().flat_map(|m| m.videos.iter()).map(|v| v.size).sum()
}

/// `Xh YYm`.
pub fn format_duration(secs: u64) -> String {
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

/// Bytes as GiB with two decimals.
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(seq: u32, title: &str, module: &str) -> Video {
        Video {
            path: PathBuf::from(format!("/c/{module}/{title}")),
            file_name: title.to_string(),
            title: title.to_string(),
            module: module.to_string(),
            sequence: seq,
            id: Video::id_for(seq),
            size: 0,
            duration_secs: None,
        }
    }

    #[test]
    fn video_caption_marks_parts_only_when_split() {
        let v = video(1, "1 - Welcome.mp4", "01 - Intro");
        assert_eq!(video_caption(&v, 1, 1), "#F001 1 - 1 - Welcome\n01 - Intro");
        assert_eq!(
            video_caption(&v, 2, 3),
            "#F001 1 - 1 - Welcome\n01 - Intro [Part 2/3]"
        );
    }

    #[test]
    fn user_text_is_escaped() {
        let v = video(7, "a<b> & c.mkv", "Tips & <Tricks>");
        assert_eq!(
            video_caption(&v, 1, 1),
            "#F007 7 - a&lt;b&gt; &amp; c\nTips &amp; &lt;Tricks&gt;"
        );
        assert!(course_card("R&D", 0, 0, None, None).contains("<b>R&amp;D</b>"));
    }

    #[test]
    fn archive_caption_and_tags() {
        assert_eq!(doc_tag(1), "#Doc001");
        assert_eq!(archive_caption(2, 3), "#Doc002 🗂 <b>Support Material</b>\nFile 2/3");
    }

    #[test]
    fn index_lists_docs_then_modules() {
        let mut index = IndexBuilder::new();
        index.add_doc(1);
        index.start_module("01 - Intro");
        index.add_video(&video(1, "a.mp4", "01 - Intro"));
        index.add_video(&video(2, "b.mp4", "01 - Intro"));
        index.start_module("02 - Empty");
        assert!(index.has_videos());

        let text = index.render();
        assert!(text.starts_with("⚠️ <b>Course Menu</b> ⚠️"));
        assert!(text.contains("📂 <b>Files</b>\n#Doc001\n"));
        assert!(text.contains("📁 <b>01 - Intro</b>\n#F001 #F002\n"));
        assert!(!text.contains("02 - Empty"));
    }

    #[test]
    fn index_without_docs_says_so() {
        let index = IndexBuilder::new();
        assert!(!index.has_videos());
        assert!(index.render().contains("<i>No support material.</i>"));
    }

    #[test]
    fn stats_formatting() {
        assert_eq!(format_duration(3 * 3600 + 5 * 60 + 59), "3h 05m");
        assert_eq!(format_duration(0), "0h 00m");
        assert_eq!(format_gib(1_610_612_736), "1.50");
        let desc = chat_description(1_073_741_824, 600, Some("https://t.me/+abc"), None);
        assert_eq!(desc, "Size: 1.00 GB\nDuration: 0h 10m\nInvite: https://t.me/+abc");
    }

    #[test]
    fn title_extension_is_stripped_once() {
        assert_eq!(display_title("lesson.part.mp4"), "lesson.part");
        assert_eq!(display_title(".hidden"), ".hidden");
        assert_eq!(display_title("noext"), "noext");
    }
}
