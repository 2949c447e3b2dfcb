use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';

fn is_stripped_control(c: char) -> bool {
    c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Strip control characters and ANSI escape sequences from untrusted text.
///
/// Removes C0 controls except tab, newline and carriage return, DEL, CSI
/// sequences (`ESC [` up to a final byte in `@..=~`), OSC sequences
/// (`ESC ]` up to BEL or `ESC \`), and bare ESC.
///
/// Clean input is returned borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != ESC {
            if !is_stripped_control(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameters and intermediates run until the final byte
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == BEL {
                        break;
                    }
                    if c == ESC && chars.peek() == Some(&'\\') {
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

/// Single-line display label: controls stripped, surrounding whitespace
/// trimmed. `None` when nothing printable is left.
pub fn clean_label(s: &str) -> Option<String> {
    let stripped = strip_control_chars(s);
    let trimmed = stripped.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_borrowed() {
        assert!(matches!(strip_control_chars("Plan to Read"), Cow::Borrowed(_)));
        assert!(matches!(strip_control_chars(""), Cow::Borrowed(_)));
    }

    #[test]
    fn test_keeps_tab_newline_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_removes_c0_and_del() {
        assert_eq!(strip_control_chars("a\x00b\x08c\x7fd"), "abcd");
    }

    #[test]
    fn test_removes_csi_sequences() {
        assert_eq!(strip_control_chars("\x1b[1;31mRed\x1b[0m"), "Red");
        assert_eq!(strip_control_chars("up\x1b[2Award"), "upward");
    }

    #[test]
    fn test_removes_osc_sequences() {
        assert_eq!(strip_control_chars("\x1b]0;title\x07after"), "after");
        assert_eq!(strip_control_chars("\x1b]8;;http://x\x1b\\link"), "link");
    }

    #[test]
    fn test_removes_bare_esc() {
        assert_eq!(strip_control_chars("a\x1bb"), "ab");
        assert_eq!(strip_control_chars("trailing\x1b"), "trailing");
    }

    #[test]
    fn test_unicode_survives() {
        assert_eq!(strip_control_chars("進撃\x1b[0mの巨人"), "進撃の巨人");
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("  Reading \n"), Some("Reading".to_string()));
        assert_eq!(clean_label("\x1b[31m \x1b[0m"), None);
        assert_eq!(clean_label(""), None);
    }
}
