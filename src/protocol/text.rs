// src/protocol/text.rs

const COLOR_ESCAPE: u8 = 0x0C;

fn is_printable(c: u8) -> bool {
    c >= 0x20 && c != 0x7F
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | 0x0B | b'\r')
}

/// Strips colour escapes and control characters from a wire string and
/// keeps at most `max_len` characters.
///
/// With `whitespace` set, tabs and line breaks survive the filter; names and
/// map names are filtered without it.
pub fn filter_text(src: &[u8], whitespace: bool, max_len: usize) -> String {
    let mut out = String::with_capacity(src.len().min(max_len));
    let mut count = 0;
    let mut bytes = src.iter().copied();

    while let Some(c) = bytes.next() {
        if count >= max_len {
            break;
        }
        if c == 0 {
            break;
        }
        if c == COLOR_ESCAPE {
            // The colour code is the following byte.
            if bytes.next().is_none() {
                break;
            }
            continue;
        }
        if !is_printable(c) && !(whitespace && is_space(c)) {
            continue;
        }
        out.push(char::from(c));
        count += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_codes_removed() {
        assert_eq!(filter_text(b"\x0c3red\x0c7name", false, 15), "redname");
        assert_eq!(filter_text(b"trailing\x0c", false, 15), "trailing");
    }

    #[test]
    fn test_whitespace_handling() {
        assert_eq!(filter_text(b"a\tb\nc", false, 32), "abc");
        assert_eq!(filter_text(b"a\tb\nc", true, 32), "a\tb\nc");
        assert_eq!(filter_text(b"two words", false, 32), "two words");
    }

    #[test]
    fn test_length_limit_counts_kept_chars() {
        assert_eq!(filter_text(b"\x01\x02abcdef", false, 3), "abc");
        assert_eq!(filter_text(b"abc\x7fdef", false, 59), "abcdef");
    }
}
