use std::borrow::Cow;

use scraper::Html;
use unicode_width::UnicodeWidthChar;

/// Plain text of an HTML fragment.
///
/// Concatenates every text node depth-first in document order, adding no
/// separators of its own. The HTML5 parser recovers from any input, so this
/// never fails: broken markup yields whatever text the parser salvaged, and
/// empty input yields an empty string.
///
/// ```
/// use gator::util::extract_text;
///
/// assert_eq!(extract_text("<p>Hello <b>World</b></p>"), "Hello World");
/// ```
pub fn extract_text(fragment: &str) -> String {
    if fragment.is_empty() {
        return String::new();
    }

    Html::parse_fragment(fragment)
        .root_element()
        .text()
        .collect()
}

/// Ellipsis appended by [`truncate_to_width`]
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Shorten `s` to at most `max_width` terminal columns, appending `...` when cut.
///
/// Wide characters (CJK, emoji) count as two columns. Widths too narrow for
/// the ellipsis get a plain prefix instead.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let total: usize = s.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width > ELLIPSIS_WIDTH {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    } else {
        (max_width, "")
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Remove control characters and ANSI escape sequences from feed-supplied
/// text before it reaches the terminal.
///
/// Tab, newline and carriage return are kept. CSI sequences (`ESC [ ... final`)
/// and OSC sequences (`ESC ] ... BEL` or `ESC ] ... ESC \`) are dropped whole.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_stripped_control(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameters run until a final byte in 0x40..=0x7e
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}
