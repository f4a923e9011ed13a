//! Deterministic cleanup of raw PTY output.
//!
//! The session layer hands the caller only what the command itself printed:
//! CRLF is normalized, terminal escape sequences and presentation-only
//! control characters are dropped, prompt strings are removed, marker lines
//! are filtered, and a verbatim echo of the command at the head is stripped.
//! Matching is exact everywhere; no fuzzy recovery.

use std::borrow::Cow;

/// Decode accumulated bytes as UTF-8, holding back an incomplete trailing
/// sequence (a chunked read may split a multi-byte character).
pub fn decode_utf8_prefix(buf: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(buf) {
        Ok(s) => Cow::Borrowed(s),
        Err(e) if e.error_len().is_none() => {
            // Incomplete final sequence: decode the valid prefix only.
            String::from_utf8_lossy(&buf[..e.valid_up_to()])
        }
        Err(_) => String::from_utf8_lossy(buf),
    }
}

/// `\r\n` becomes `\n`; a bare carriage return is presentation-only (cursor
/// reset for progress bars) and is dropped.
pub fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "")
}

/// Strip ANSI escape sequences (CSI, OSC, two-byte ESC pairs) and control
/// characters other than newline and tab.
pub fn strip_control_sequences(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // parameter and intermediate bytes, then one final byte
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii() && (0x20..=0x3f).contains(&(next as u8)) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if let Some(&next) = chars.peek() {
                        if next.is_ascii() && (0x40..=0x7e).contains(&(next as u8)) {
                            chars.next();
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC runs until BEL or ST (ESC \)
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
                Some(_) => {
                    chars.next();
                }
                None => {}
            }
        } else if c.is_control() && c != '\n' && c != '\t' {
            // bell, backspace, and friends
        } else {
            result.push(c);
        }
    }
    result
}

/// Remove every occurrence of the given prompt strings.
pub fn strip_prompts(s: &str, prompts: &[&str]) -> String {
    let mut result = s.to_string();
    for prompt in prompts {
        result = result.replace(prompt, "");
    }
    result
}

/// Remove lines that contain any of the given markers. Markers are fresh
/// per call, so a matching line can only be wrapper chrome, never command
/// output.
pub fn drop_marker_lines(s: &str, markers: &[&str]) -> String {
    if markers.is_empty() {
        return s.to_string();
    }
    s.split_inclusive('\n')
        .filter(|line| !markers.iter().any(|m| line.contains(m)))
        .collect()
}

/// If the output begins with a verbatim echo of the command, remove it once
/// (together with one following newline). Anything less than an exact match
/// is left alone.
pub fn strip_echoed_command(output: &str, command: &str) -> String {
    let command = command.trim();
    if command.is_empty() {
        return output.to_string();
    }
    let lead = output.len() - output.trim_start().len();
    if let Some(rest) = output[lead..].strip_prefix(command) {
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        return rest.to_string();
    }
    output.to_string()
}

/// The full pipeline applied to the raw bytes-before-the-sentinel of a
/// wrapped command.
pub fn sanitize_output(raw: &str, command: &str, prompts: &[&str], markers: &[&str]) -> String {
    let normalized = normalize_newlines(raw);
    let plain = strip_control_sequences(&normalized);
    let without_markers = drop_marker_lines(&plain, markers);
    let without_prompts = strip_prompts(&without_markers, prompts);
    strip_echoed_command(&without_prompts, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn crlf_normalizes_and_bare_cr_drops() {
        assert_eq!(normalize_newlines("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(normalize_newlines("50%\r100%\r\n"), "50%100%\n");
    }

    #[test]
    fn csi_and_osc_sequences_are_removed() {
        assert_eq!(
            strip_control_sequences("\x1b[31mred\x1b[0m plain"),
            "red plain"
        );
        assert_eq!(strip_control_sequences("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_control_sequences("\x1b[?2004hready"), "ready");
        assert_eq!(strip_control_sequences("bell\x07 kept\ttab\n"), "bell kept\ttab\n");
    }

    #[test]
    fn echoed_command_is_stripped_exactly_once() {
        assert_eq!(strip_echoed_command("echo hi\nhi\n", "echo hi"), "hi\n");
        assert_eq!(
            strip_echoed_command("hi\n", "echo hi"),
            "hi\n",
            "absent echo leaves output unchanged"
        );
        assert_eq!(
            strip_echoed_command("echo hiX\n", "echo hi"),
            "X\n",
            "prefix match is verbatim, not line-based"
        );
    }

    #[test]
    fn marker_lines_disappear_with_their_newline() {
        let s = "out\nEC=$?; echo \"SOUT:\"'abc123'\nmore\n";
        assert_eq!(drop_marker_lines(s, &["abc123"]), "out\nmore\n");
    }

    #[test]
    fn incomplete_utf8_tail_is_held_back() {
        // 0xe2 0x82 is the first two bytes of '€'
        let bytes = [b'o', b'k', 0xe2, 0x82];
        assert_eq!(decode_utf8_prefix(&bytes), "ok");
        assert_eq!(decode_utf8_prefix("ok€".as_bytes()), "ok€");
    }

    #[test]
    fn pipeline_removes_prompts_and_wrapper_chrome() {
        let raw = "echo hi\r\nhi\r\nPS1MARK>";
        let clean = sanitize_output(raw, "echo hi", &["PS1MARK>"], &[]);
        assert_eq!(clean, "hi\n");
    }

    proptest! {
        // Plain output that contains no markers, prompts, or control bytes
        // comes through untouched apart from CRLF normalization.
        #[test]
        fn plain_output_is_preserved(s in "[a-zA-Z0-9 _./-]{0,64}") {
            let raw = format!("{s}\r\n");
            let clean = sanitize_output(&raw, "cmd!", &["NOPROMPT>"], &["nonce!"]);
            prop_assert_eq!(clean, format!("{s}\n"));
        }

        #[test]
        fn sanitize_is_idempotent(s in "[ -~]{0,64}") {
            let once = sanitize_output(&s, "", &["NOPROMPT>"], &[]);
            let twice = sanitize_output(&once, "", &["NOPROMPT>"], &[]);
            prop_assert_eq!(once, twice);
        }
    }
}
