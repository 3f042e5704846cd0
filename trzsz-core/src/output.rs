//! Helpers for terminal output around a transfer.

/// Output longer than this cannot be the echo of a `trz` command.
const MAX_ECHO_LEN: usize = 100;

/// Remove VT100 sequences and trailing line breaks from a short output.
///
/// Returns `None` for output too long to be a command echo.
pub fn strip_server_output(output: &[u8]) -> Option<String> {
    if output.len() > MAX_ECHO_LEN {
        return None;
    }
    let mut buf = Vec::with_capacity(output.len());
    let mut skip_vt100 = false;
    for &b in output {
        if skip_vt100 {
            if b.is_ascii_alphabetic() {
                skip_vt100 = false;
            }
        } else if b == 0x1b {
            skip_vt100 = true;
        } else {
            buf.push(b);
        }
    }
    while matches!(buf.last(), Some(b'\r' | b'\n')) {
        buf.pop();
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Remove tmux status line redraws (`ESC P = … ESC P = … ESC \`).
///
/// An incomplete redraw truncates the line at its start.
pub fn strip_tmux_status_line(line: &str) -> String {
    const BEGIN: &str = "\x1bP=";
    const END: &str = "\x1b\\";
    let mut buf = line.to_string();
    loop {
        let Some(begin) = buf.find(BEGIN) else {
            return buf;
        };
        let after_begin = begin + BEGIN.len();
        let Some(mid) = buf[after_begin..].find(BEGIN) else {
            buf.truncate(begin);
            return buf;
        };
        let after_mid = after_begin + mid + BEGIN.len();
        let Some(end) = buf[after_mid..].find(END) else {
            buf.truncate(begin);
            return buf;
        };
        buf.replace_range(begin..after_mid + end + END.len(), "");
    }
}

/// Summary sent in the client's `EXIT` frame.
///
/// ```text
/// Saved 2 files/directories to /tmp
/// - a.txt
/// - b.txt
/// ```
pub fn format_saved_files(names: &[String], destination: Option<&str>) -> String {
    let mut msg = format!(
        "Saved {} {}",
        names.len(),
        if names.len() > 1 {
            "files/directories"
        } else {
            "file/directory"
        }
    );
    if let Some(dest) = destination.filter(|d| !d.is_empty()) {
        msg.push_str(" to ");
        msg.push_str(dest);
    }
    for name in names {
        msg.push_str("\r\n- ");
        msg.push_str(name);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_command_echo() {
        assert_eq!(strip_server_output(b"trz\r\n").as_deref(), Some("trz"));
        assert_eq!(
            strip_server_output(b"\x1b[01;32mtrz -d\x1b[00m\r\n").as_deref(),
            Some("trz -d")
        );
        assert_eq!(strip_server_output(&[b'x'; 101]), None);
    }

    #[test]
    fn strip_tmux_status() {
        assert_eq!(strip_tmux_status_line("#SUCC:13"), "#SUCC:13");
        assert_eq!(
            strip_tmux_status_line("#SU\x1bP=1s\x1b\\status\x1bP=2s\x1b\\CC:13"),
            "#SUCC:13"
        );
        assert_eq!(strip_tmux_status_line("#SUCC:13\x1bP=1s\x1b\\sta"), "#SUCC:13");
        assert_eq!(
            strip_tmux_status_line("#SUCC:13\x1bP=1s\x1b\\sta\x1bP=2s"),
            "#SUCC:13"
        );
    }

    #[test]
    fn saved_files_summary() {
        assert_eq!(
            format_saved_files(&["a.txt".into()], Some("/tmp")),
            "Saved 1 file/directory to /tmp\r\n- a.txt"
        );
        assert_eq!(
            format_saved_files(&["a".into(), "b".into()], None),
            "Saved 2 files/directories\r\n- a\r\n- b"
        );
    }
}
