//! Telegram message formatting.

use unicode_segmentation::UnicodeSegmentation;

use crate::models::Post;

/// Maximum characters Telegram accepts in one message.
pub const TELEGRAM_MAX_CHARS: usize = 4096;

const ELLIPSIS: &str = "…";

/// Format a post for delivery with `parse_mode=HTML`.
///
/// Text parts are HTML-escaped. If the message would exceed
/// [`TELEGRAM_MAX_CHARS`], the post content is shortened on a grapheme
/// boundary so the header, URL and analysis stay intact. An analysis too
/// long to fit even then is shortened as well, sharing the room with the
/// content. Escaped entities are never split.
pub fn format_message(handle: &str, post: &Post, analysis: &str) -> String {
    let head = format!(
        "New tweet from @{}:\n\n",
        html_escape::encode_text(handle)
    );
    let link = format!("\n\n{}", html_escape::encode_text(&post.url));
    let analysis = analysis.trim();
    let label = if analysis.is_empty() {
        ""
    } else {
        "\n\n<b>Analysis:</b>\n"
    };

    let content = html_escape::encode_text(&post.content);
    let escaped_analysis = html_escape::encode_text(analysis);
    let content_len = content.chars().count();
    let analysis_len = escaped_analysis.chars().count();

    let frame = head.chars().count() + link.chars().count() + label.chars().count();
    if frame + content_len + analysis_len <= TELEGRAM_MAX_CHARS {
        return format!("{head}{content}{link}{label}{escaped_analysis}");
    }

    let ellipsis = ELLIPSIS.chars().count();
    let room = TELEGRAM_MAX_CHARS.saturating_sub(frame);
    if analysis_len + ellipsis <= room {
        let shortened = truncate_escaped(&post.content, room - analysis_len - ellipsis);
        return format!("{head}{shortened}{ELLIPSIS}{link}{label}{escaped_analysis}");
    }

    // Content keeps at most half the room; the analysis gets the rest.
    let content_part = if content_len <= room / 2 {
        content.into_owned()
    } else {
        let shortened = truncate_escaped(&post.content, (room / 2).saturating_sub(ellipsis));
        format!("{shortened}{ELLIPSIS}")
    };
    let analysis_budget = room
        .saturating_sub(content_part.chars().count())
        .saturating_sub(ellipsis);
    let shortened = truncate_escaped(analysis, analysis_budget);
    format!("{head}{content_part}{link}{label}{shortened}{ELLIPSIS}")
}

/// Escape `text` grapheme by grapheme, stopping before `budget` chars.
fn truncate_escaped(text: &str, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let escaped = html_escape::encode_text(grapheme);
        let len = escaped.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(&escaped);
        used += len;
    }
    out
}
