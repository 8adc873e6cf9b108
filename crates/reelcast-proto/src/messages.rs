//! Text of every message the pipeline posts.

use crate::protocol::{ItemDescriptor, TransferOption};

const RULE: &str = "━━━━━━━━━━━━━━━━━━";

/// Caption for the poster announcement.
pub fn announce_caption(item: &ItemDescriptor, signature: Option<&str>) -> String {
    let mut text = format!("📽️ *MOVIE:* {}\n\n", item.title);
    text.push_str(&format!("📅 *Year:* {}\n", item.year));
    text.push_str(&format!("⭐ *Rating:* {}/10\n", item.rating));
    if let Some(runtime) = item.runtime {
        text.push_str(&format!("⏳ *Runtime:* {} min\n", runtime));
    }
    if !item.genres.is_empty() {
        text.push_str(&format!("📂 *Genre:* {}\n", item.genres.join(", ")));
    }
    text.push('\n');
    text.push_str(RULE);
    if let Some(sig) = signature.filter(|s| !s.is_empty()) {
        text.push('\n');
        text.push_str(sig);
    }
    text
}

pub fn status_placeholder() -> String {
    "⏳ *Status:* Preparing download...".to_string()
}

pub fn progress(title: &str, percent: f32) -> String {
    format!(
        "⏳ *Downloading:* {}\n📊 *Progress:* {}%",
        title,
        format_percent(percent)
    )
}

pub fn completed(title: &str) -> String {
    format!("✅ *COMPLETED:* {}\n{}\n🍿 Added to the channel.", title, RULE)
}

pub fn failed(title: &str) -> String {
    format!("❌ *FAILED:* {}", title)
}

/// Caption attached to the delivered media file.
pub fn document_caption(item: &ItemDescriptor, details: &str) -> String {
    format!("🎬 *{}*\n\n{}\n\n🍿 *Enjoy Your Movie!*", item.title, details)
}

/// Metadata block for the document caption: year, rating, quality (with
/// release kind) and size.
pub fn file_details(item: &ItemDescriptor, option: &TransferOption) -> String {
    let mut text = format!(
        "📅 *Year:* {}\n⭐ *Rating:* {}/10\n🎞️ *Quality:* {}",
        item.year, item.rating, option.quality
    );
    if let Some(kind) = option.kind.as_deref().filter(|k| !k.is_empty()) {
        text.push_str(&format!(" ({})", kind));
    }
    if let Some(size) = option.size.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("\n💾 *Size:* {}", size));
    }
    text
}

pub fn subtitle_caption(title: &str) -> String {
    format!("🎬 *{}*\n💬 Subtitles for this movie.", title)
}

/// `55.0` -> `"55"`, `12.3` -> `"12.3"`.
pub fn format_percent(percent: f32) -> String {
    if percent.fract() == 0.0 {
        format!("{}", percent as u32)
    } else {
        format!("{:.1}", percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nova() -> ItemDescriptor {
        ItemDescriptor {
            title: "Nova (2024)".to_string(),
            year: 2024,
            rating: 6.4,
            genres: vec!["Horror".to_string(), "Thriller".to_string()],
            runtime: None,
            poster_url: None,
            options: Vec::new(),
        }
    }

    #[test]
    fn test_announce_caption_skips_unknown_runtime() {
        let text = announce_caption(&nova(), None);
        assert!(text.starts_with("📽️ *MOVIE:* Nova (2024)"));
        assert!(text.contains("⭐ *Rating:* 6.4/10"));
        assert!(text.contains("📂 *Genre:* Horror, Thriller"));
        assert!(!text.contains("Runtime"));
        assert!(text.ends_with(RULE));
    }

    #[test]
    fn test_announce_caption_appends_signature() {
        let mut item = nova();
        item.runtime = Some(98);
        let text = announce_caption(&item, Some("_reelcast_"));
        assert!(text.contains("⏳ *Runtime:* 98 min"));
        assert!(text.ends_with("_reelcast_"));
    }

    #[test]
    fn test_document_caption_carries_details() {
        let option = TransferOption {
            hash: "ABC".to_string(),
            quality: "720p".to_string(),
            kind: Some("web".to_string()),
            size: Some("1.2 GB".to_string()),
        };
        let text = document_caption(&nova(), &file_details(&nova(), &option));
        assert!(text.starts_with("🎬 *Nova (2024)*"));
        assert!(text.contains("🎞️ *Quality:* 720p (web)"));
        assert!(text.contains("💾 *Size:* 1.2 GB"));
    }

    #[test]
    fn test_file_details_without_kind_or_size() {
        let option = TransferOption {
            hash: "ABC".to_string(),
            quality: "1080p".to_string(),
            kind: None,
            size: None,
        };
        let text = file_details(&nova(), &option);
        assert!(text.ends_with("🎞️ *Quality:* 1080p"));
        assert!(!text.contains("Size"));
    }

    #[test]
    fn test_progress_percent_rendering() {
        assert_eq!(format_percent(55.0), "55");
        assert_eq!(format_percent(12.34), "12.3");
        assert!(progress("Nova (2024)", 100.0).ends_with("*Progress:* 100%"));
    }
}
