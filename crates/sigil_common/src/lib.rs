use std::fmt::Write;

/// Bytes per hexdump line.
const WIDTH: usize = 8;

/// Format a byte slice as a hexdump: address column, hex column, printable
/// gutter. Runs of identical lines collapse into a single `*`, so dumping a
/// mostly-empty memory arena stays readable.
///
/// ```
/// let dump = sigil_common::hexdump(b"sigil\0\0\0\0\0");
/// assert!(dump.starts_with("00000000"));
/// assert!(dump.contains("|sigil...|"));
/// ```
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;
    let mut eliding = false;
    while offset < bytes.len() {
        let line = &bytes[offset..(offset + WIDTH).min(bytes.len())];
        let repeat =
            offset >= WIDTH && line.len() == WIDTH && bytes[offset - WIDTH..offset] == *line;
        if repeat {
            if !eliding {
                out.push_str("*\n");
                eliding = true;
            }
        } else {
            eliding = false;
            let _ = write!(out, "{offset:08x} ");
            for i in 0..WIDTH {
                match line.get(i) {
                    Some(b) => {
                        let _ = write!(out, " {b:02x}");
                    }
                    None => out.push_str("   "),
                }
            }
            out.push_str("  |");
            for &b in line {
                out.push(if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                });
            }
            out.push_str("|\n");
        }
        offset += line.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_a_short_line() {
        assert_eq!(hexdump(b"Hi"), "00000000  48 69                    |Hi|\n");
    }

    #[test]
    fn non_printable_bytes_become_dots() {
        let dump = hexdump(&[0x00, 0x41, 0xff]);
        assert!(dump.ends_with("|.A.|\n"));
    }

    #[test]
    fn repeated_lines_collapse() {
        let mut bytes = vec![0u8; 32];
        bytes[31] = 1;
        let lines: Vec<String> = hexdump(&bytes).lines().map(str::to_string).collect();
        // First zero line, one `*`, then the line that differs.
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "*");
        assert!(lines[2].starts_with("00000018"));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(hexdump(&[]), "");
    }
}
