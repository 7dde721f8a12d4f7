//! Removal of terminal control sequences from captured output.
//!
//! The REPL colours its output even on a dumb terminal.  Only the sequences
//! it emits are recognised: `ESC [` followed by digits and semicolons and a
//! final `m`, `G`, `K` or `H`.  Anything else passes through untouched.

/// Strip escape sequences from `buf` in place, returning the new length.
///
/// Bytes past the returned length are unspecified.
pub fn strip_escapes(buf: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;
    while read < buf.len() {
        if let Some(n) = escape_len(&buf[read..]) {
            read += n;
            continue;
        }
        let run = buf[read..]
            .iter()
            .position(|&c| c == 0x1b)
            .map_or(buf.len() - read, |p| p.max(1));
        buf.copy_within(read..read + run, write);
        read += run;
        write += run;
    }
    write
}

/// Owned copy of `bytes` with escape sequences removed.
pub fn stripped(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    let len = strip_escapes(&mut out);
    out.truncate(len);
    out
}

/// Length of the escape sequence at the start of `s`, if there is one.
fn escape_len(s: &[u8]) -> Option<usize> {
    let params = s.strip_prefix(b"\x1b[")?;
    let n = params
        .iter()
        .take_while(|c| c.is_ascii_digit() || **c == b';')
        .count();
    match params.get(n) {
        Some(b'm' | b'G' | b'K' | b'H') => Some(2 + n + 1),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_wrapped_value() {
        let mut buf = b"\x1b[1m{ a = 1; }\x1b[0m".to_vec();
        let len = strip_escapes(&mut buf);
        assert_eq!(&buf[..len], b"{ a = 1; }");
    }

    #[test]
    fn colour_with_parameters() {
        assert_eq!(
            stripped(b"{ x = \x1b[35;1mtrue\x1b[0m; }"),
            b"{ x = true; }".to_vec()
        );
    }

    #[test]
    fn cursor_and_erase_sequences() {
        assert_eq!(stripped(b"\x1b[K\x1b[1Gnix-repl> \x1b[H"), b"nix-repl> ".to_vec());
        assert_eq!(stripped(b"\x1b[m"), Vec::<u8>::new());
    }

    #[test]
    fn unknown_sequences_are_kept() {
        assert_eq!(stripped(b"a\x1b[2Jb"), b"a\x1b[2Jb".to_vec());
        assert_eq!(stripped(b"\x1b]0;title\x07"), b"\x1b]0;title\x07".to_vec());
        assert_eq!(stripped(b"tail\x1b["), b"tail\x1b[".to_vec());
        assert_eq!(stripped(b"\x1b\x1b[0m!"), b"\x1b!".to_vec());
    }

    #[test]
    fn plain_text_is_unchanged() {
        let mut buf = b"[ 1 2 3 ]".to_vec();
        assert_eq!(strip_escapes(&mut buf), 9);
        assert_eq!(buf, b"[ 1 2 3 ]");
    }
}
