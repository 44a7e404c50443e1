//! Pure ANSI/VT escape-sequence stripping and grid-based layout
//! reconstruction (§4.1). `strip` has no hidden state and is safe to call
//! from any thread.

use std::sync::LazyLock;

use regex::bytes::Regex;

const MAX_GRID_DIM: usize = 500;
const DEFAULT_COL_PAD: usize = 80;
const RELATIVE_MOVE_MIN_ROWS: usize = 50;
const CURSOR_HOME_ROW_THRESHOLD: usize = 10;
const CURSOR_HOME_LOOKAHEAD_BYTES: usize = 100;

static OSC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\x1b\][^\x07]*?(\x07|\x1b\\)").unwrap());
static CSI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").unwrap());
static ESC_SINGLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b[a-zA-Z]").unwrap());
static CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\([0B]").unwrap());
static CURSOR_POS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9]*(;[0-9]*)?[HFfGdABCD]").unwrap());
static DIM_SEQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[(?P<p1>[0-9]*)(?:;(?P<p2>[0-9]*))?(?P<fin>[HFfGdABCD])").unwrap()
});

/// Turn a byte string that may contain CSI/OSC/cursor-positioning/charset
/// escapes into plain text, reconstructing on-screen layout (§4.1).
pub fn strip(bytes: &[u8], cols: usize) -> String {
    if !CURSOR_POS_RE.is_match(bytes) {
        return fast_strip(bytes);
    }
    grid_strip(bytes, cols)
}

fn fast_strip(bytes: &[u8]) -> String {
    let mut buf = OSC_RE.replace_all(bytes, &b""[..]).into_owned();
    buf = CSI_RE.replace_all(&buf, &b""[..]).into_owned();
    buf = ESC_SINGLE_RE.replace_all(&buf, &b""[..]).into_owned();
    buf = CHARSET_RE.replace_all(&buf, &b""[..]).into_owned();
    String::from_utf8_lossy(&buf).replace('\r', "")
}

fn parse_param(bytes: Option<&[u8]>) -> usize {
    match bytes {
        None => 1,
        Some(b) if b.is_empty() => 1,
        Some(b) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1),
    }
}

fn prescan_dims(bytes: &[u8], cols_param: usize) -> (usize, usize) {
    let mut max_row = 0usize;
    let mut max_col = 0usize;
    let mut has_relative = false;
    let newline_count = bytes.iter().filter(|&&b| b == b'\n').count();

    for caps in DIM_SEQ_RE.captures_iter(bytes) {
        let fin = &caps["fin"][0];
        match fin {
            b'H' | b'F' | b'f' => {
                max_row = max_row.max(parse_param(caps.name("p1").map(|m| m.as_bytes())));
                max_col = max_col.max(parse_param(caps.name("p2").map(|m| m.as_bytes())));
            }
            b'G' => {
                max_col = max_col.max(parse_param(caps.name("p1").map(|m| m.as_bytes())));
            }
            b'd' => {
                max_row = max_row.max(parse_param(caps.name("p1").map(|m| m.as_bytes())));
            }
            b'A' | b'B' | b'C' | b'D' => {
                has_relative = true;
            }
            _ => {}
        }
    }

    let rows = max_row
        .max(newline_count + 1)
        .max(if has_relative { RELATIVE_MOVE_MIN_ROWS } else { 0 })
        .min(MAX_GRID_DIM);
    let cols = (max_col + DEFAULT_COL_PAD).max(cols_param).min(MAX_GRID_DIM);
    (rows.max(1), cols.max(1))
}

fn utf8_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

/// Find the end index (exclusive) of an escape sequence starting at
/// `bytes[i]` (which must be `0x1B`). Returns `i + 1` if the sequence is
/// truncated or unrecognized (treat the ESC byte alone as consumed).
fn escape_len(bytes: &[u8], i: usize) -> usize {
    let Some(&next) = bytes.get(i + 1) else {
        return bytes.len();
    };
    match next {
        b'[' => {
            let mut j = i + 2;
            while j < bytes.len() {
                let b = bytes[j];
                j += 1;
                if (0x40..=0x7E).contains(&b) {
                    break;
                }
            }
            j
        }
        b']' => {
            let mut j = i + 2;
            while j < bytes.len() {
                if bytes[j] == 0x07 {
                    j += 1;
                    break;
                }
                if bytes[j] == 0x1b && bytes.get(j + 1) == Some(&b'\\') {
                    j += 2;
                    break;
                }
                j += 1;
            }
            j
        }
        b'(' => (i + 3).min(bytes.len()),
        _ => i + 2,
    }
}

/// DEC Special Graphics line-drawing substitution for a single ASCII byte.
fn dec_special_graphics(b: u8) -> Option<char> {
    Some(match b {
        b'q' => '─',
        b'x' => '│',
        b'l' => '┌',
        b'k' => '┐',
        b'm' => '└',
        b'j' => '┘',
        b'n' => '┼',
        b't' => '├',
        b'u' => '┤',
        b'v' => '┴',
        b'w' => '┬',
        b'`' => '◆',
        b'a' => '▒',
        b'f' => '°',
        b'g' => '±',
        b'~' => '·',
        _ => return None,
    })
}

/// Scan forward from `start` (skipping any escape sequences encountered)
/// up to `budget` considered bytes, looking for a printable byte.
fn printable_within(bytes: &[u8], start: usize, budget: usize) -> bool {
    let mut i = start;
    let mut considered = 0usize;
    while i < bytes.len() && considered < budget {
        let b = bytes[i];
        if b == 0x1b {
            i = escape_len(bytes, i);
            continue;
        }
        considered += 1;
        if b != b'\r' && b != b'\n' && (b >= 0x20 || b >= 0x80) {
            return true;
        }
        i += 1;
    }
    false
}

fn grid_strip(bytes: &[u8], cols_param: usize) -> String {
    let (rows, cols) = prescan_dims(bytes, cols_param);
    let mut grid: Vec<Vec<char>> = vec![vec![' '; cols]; rows];
    let mut row = 0usize;
    let mut col = 0usize;
    let mut graphics = false;

    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0x1b {
            if bytes.get(i + 1) == Some(&b'[') {
                let end = escape_len(bytes, i);
                let seq = &bytes[i + 2..end.saturating_sub(1)];
                let fin = bytes.get(end.saturating_sub(1)).copied();
                apply_csi(seq, fin, &mut grid, &mut row, &mut col, rows, cols, bytes, end);
                i = end;
                continue;
            } else if bytes.get(i + 1) == Some(&b'(') {
                match bytes.get(i + 2) {
                    Some(b'0') => graphics = true,
                    Some(b'B') => graphics = false,
                    _ => {}
                }
                i = escape_len(bytes, i);
                continue;
            } else {
                i = escape_len(bytes, i);
                continue;
            }
        }
        if b == b'\r' {
            col = 0;
            i += 1;
            continue;
        }
        if b == b'\n' {
            row = (row + 1).min(rows - 1);
            col = 0;
            i += 1;
            continue;
        }

        let len = utf8_len(b);
        let end = (i + len).min(bytes.len());
        let ch = if len == 1 {
            if graphics {
                dec_special_graphics(b).unwrap_or(b as char)
            } else {
                b as char
            }
        } else {
            std::str::from_utf8(&bytes[i..end])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or('\u{FFFD}')
        };
        if row < rows && col < cols {
            grid[row][col] = ch;
        }
        col = (col + 1).min(cols.saturating_sub(1));
        i = end.max(i + 1);
    }

    let mut lines: Vec<String> = grid
        .into_iter()
        .map(|r| r.into_iter().collect::<String>().trim_end().to_string())
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[allow(clippy::too_many_arguments)]
fn apply_csi(
    params: &[u8],
    fin: Option<u8>,
    grid: &mut [Vec<char>],
    row: &mut usize,
    col: &mut usize,
    rows: usize,
    cols: usize,
    full_bytes: &[u8],
    seq_end: usize,
) {
    let Some(fin) = fin else { return };
    let mut parts = params.splitn(2, |&b| b == b';');
    let p1 = parts.next().filter(|s| !s.is_empty());
    let p2 = parts.next().filter(|s| !s.is_empty());

    match fin {
        b'H' | b'F' | b'f' => {
            let target_row = parse_param(p1);
            let target_col = parse_param(p2);
            if target_row == 1 && target_col == 1 && *row >= CURSOR_HOME_ROW_THRESHOLD {
                if printable_within(full_bytes, seq_end, CURSOR_HOME_LOOKAHEAD_BYTES) {
                    for line in grid.iter_mut() {
                        line.iter_mut().for_each(|c| *c = ' ');
                    }
                }
            }
            *row = (target_row - 1).min(rows - 1);
            *col = (target_col - 1).min(cols - 1);
        }
        b'G' => {
            *col = (parse_param(p1) - 1).min(cols - 1);
        }
        b'd' => {
            *row = (parse_param(p1) - 1).min(rows - 1);
        }
        b'A' => {
            let n = parse_param(p1);
            *row = row.saturating_sub(n);
        }
        b'B' => {
            let n = parse_param(p1);
            *row = (*row + n).min(rows - 1);
        }
        b'C' => {
            let n = parse_param(p1);
            *col = (*col + n).min(cols - 1);
        }
        b'D' => {
            let n = parse_param(p1);
            *col = col.saturating_sub(n);
        }
        b'K' => {
            let mode = p1.map(parse_param_zero_ok).unwrap_or(0);
            let line = &mut grid[*row];
            match mode {
                1 => line[..=*col].iter_mut().for_each(|c| *c = ' '),
                2 => line.iter_mut().for_each(|c| *c = ' '),
                _ => line[*col..].iter_mut().for_each(|c| *c = ' '),
            }
        }
        b'J' => {
            let mode = p1.map(parse_param_zero_ok).unwrap_or(0);
            match mode {
                1 => {
                    for line in grid.iter_mut().take(*row) {
                        line.iter_mut().for_each(|c| *c = ' ');
                    }
                    grid[*row][..=*col].iter_mut().for_each(|c| *c = ' ');
                }
                2 => {
                    for line in grid.iter_mut() {
                        line.iter_mut().for_each(|c| *c = ' ');
                    }
                }
                _ => {
                    grid[*row][*col..].iter_mut().for_each(|c| *c = ' ');
                    for line in grid.iter_mut().skip(*row + 1) {
                        line.iter_mut().for_each(|c| *c = ' ');
                    }
                }
            }
        }
        _ => {}
    }
}

fn parse_param_zero_ok(bytes: &[u8]) -> usize {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_idempotent() {
        let input = b"\x1b[31mhello\x1b[0m world\r\n";
        let once = strip(input, 80);
        let twice = strip(once.as_bytes(), 80);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_output_contains_no_escape_byte() {
        let input = b"\x1b[1;1HCPU\x1b[1;40HMEM";
        let out = strip(input, 80);
        assert!(!out.bytes().any(|b| b == 0x1b));
    }

    #[test]
    fn test_fast_path_strips_sgr_and_carriage_return() {
        let input = b"\x1b[31mred\x1b[0m\r\n";
        assert_eq!(strip(input, 80), "red\n");
    }

    #[test]
    fn test_mixed_cursor_positioning_scenario() {
        // S4: two status fields placed at column 1 and column 40.
        let input = b"\x1b[1;1HCPU\x1b[1;40HMEM\x1b[2;1H50%\x1b[2;40H8GB";
        let out = strip(input, 80);
        let expected = format!("CPU{}MEM\n50%{}8GB", " ".repeat(36), " ".repeat(36));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_dec_special_graphics_mapping() {
        let input = b"\x1b(0lqqqk\x1b(B\x1b[2;1H";
        let out = strip(input, 80);
        assert!(out.contains('┌'));
        assert!(out.contains('─'));
        assert!(out.contains('┐'));
    }

    #[test]
    fn test_erase_line_mode_2_clears_whole_line() {
        let input = b"hello\r\x1b[2K\x1b[2;1Hworld";
        let out = strip(input, 80);
        assert!(!out.contains("hello"));
        assert!(out.contains("world"));
    }

    #[test]
    fn test_pure_cursor_park_does_not_clear_grid() {
        let input = b"top line content\x1b[2;1H\x1b[1;1H";
        let out = strip(input, 80);
        assert!(out.contains("top line content"));
    }

    #[test]
    fn test_relative_movement_widens_row_bound() {
        let input = b"\x1b[1;1Hstart\x1b[5B\x1b[1;1Hagain";
        // just assert it doesn't panic and produces output containing both
        let out = strip(input, 80);
        assert!(out.contains("again"));
    }
}
