//! Typed access to `name = value;` statements inside a block of DTS text.
//!
//! Lookups are first-match and word-bounded: a search for `framerate` never
//! matches the tail of `qcom,mdss-dsi-panel-framerate`. Writers splice the
//! buffer in place; the remainder after the replaced span shifts by the length
//! delta, so callers may hold a buffer that grows or shrinks.

/// Byte offsets of one located property statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Statement {
    /// Start of the property name.
    name: usize,
    /// First byte after `=`.
    value: usize,
    /// Offset of the terminating `;` or `}`.
    end: usize,
}

/// Returns true for bytes that may continue a property identifier.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b',' | b'#')
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Finds the `;` or `}` ending the statement that starts at `from`.
/// Terminators inside quoted strings do not count.
fn statement_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes.get(from..)?.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b';' | b'}' => return Some(from + offset),
            _ => {}
        }
    }
    None
}

fn locate(content: &str, name: &str, from: usize) -> Option<Statement> {
    if name.is_empty() {
        return None;
    }
    let bytes = content.as_bytes();
    let mut search = from;
    while let Some(rel) = content.get(search..)?.find(name) {
        let start = search + rel;
        let after = start + name.len();
        search = after;

        if start > 0 && is_ident_byte(bytes[start - 1]) {
            continue;
        }
        let eq = skip_ws(bytes, after);
        if bytes.get(eq) != Some(&b'=') {
            continue;
        }
        let value = eq + 1;
        let end = statement_end(bytes, value)?;
        return Some(Statement {
            name: start,
            value,
            end,
        });
    }
    None
}

/// Returns the offsets of `<` and `>` when both lie inside the statement.
fn cell_span(content: &str, stmt: &Statement) -> Option<(usize, usize)> {
    let region = &content[stmt.value..stmt.end];
    let open = region.find('<')?;
    let close = open + region[open..].find('>')?;
    Some((stmt.value + open, stmt.value + close))
}

/// Parses a single numeric literal: hex when `0x`/`0X` prefixed, else decimal.
///
/// The whole (trimmed) string must be the literal.
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.get(..2) {
        Some("0x" | "0X") => u64::from_str_radix(&text[2..], 16).ok(),
        _ if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => text.parse().ok(),
        _ => None,
    }
}

/// Formats a value the way every writer emits cells.
pub fn format_cells(value: u64) -> String {
    format!("<{:#x}>", value)
}

/// Reads the first cell of a `<...>` property.
///
/// Returns `None` when the property is absent, is not bracketed before its
/// terminator, or its first cell is not a number.
pub fn get_numeric(content: &str, name: &str) -> Option<u64> {
    let stmt = locate(content, name, 0)?;
    let (open, close) = cell_span(content, &stmt)?;
    let first = content[open + 1..close].split_whitespace().next()?;
    parse_number(first)
}

/// Rewrites the `<...>` span of a property as `<0xHEX>`.
///
/// Returns false, leaving the buffer untouched, when the property or its
/// brackets cannot be found.
pub fn set_numeric(content: &mut String, name: &str, value: u64) -> bool {
    let Some(stmt) = locate(content, name, 0) else {
        return false;
    };
    let Some((open, close)) = cell_span(content, &stmt) else {
        return false;
    };
    content.replace_range(open..=close, &format_cells(value));
    true
}

/// Returns the raw value text between `=` and the terminator, without leading
/// whitespace.
pub fn get_raw<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let stmt = locate(content, name, 0)?;
    let raw = content[stmt.value..stmt.end].trim_start();
    (!raw.is_empty()).then_some(raw)
}

/// Replaces the raw value text of a property verbatim.
pub fn set_raw(content: &mut String, name: &str, raw: &str) -> bool {
    let Some(stmt) = locate(content, name, 0) else {
        return false;
    };
    let start = skip_ws(content.as_bytes(), stmt.value).min(stmt.end);
    content.replace_range(start..stmt.end, raw);
    true
}

/// Rewrites the line holding `stmt` and returns the offset just past the
/// new line, or `None` when the statement does not end in `;`.
fn rewrite_line(content: &mut String, stmt: Statement, name: &str, value: u64) -> Option<usize> {
    if content.as_bytes()[stmt.end] != b';' {
        return None;
    }
    let line_start = content[..stmt.name].rfind('\n').map_or(0, |nl| nl + 1);
    let indent: String = content[line_start..stmt.name]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    let line = format!("{indent}{name} = {};", format_cells(value));
    content.replace_range(line_start..=stmt.end, &line);
    Some(line_start + line.len())
}

/// Replaces the whole line holding a property with a canonical
/// `name = <0xHEX>;`, keeping the line's indentation.
pub fn rewrite_whole_line(content: &mut String, name: &str, value: u64) -> bool {
    locate(content, name, 0)
        .and_then(|stmt| rewrite_line(content, stmt, name, value))
        .is_some()
}

/// Applies [`rewrite_whole_line`] to every occurrence of a property and
/// returns how many lines were rewritten.
pub fn rewrite_all_occurrences(content: &mut String, name: &str, value: u64) -> usize {
    let mut count = 0;
    let mut pos = 0;
    while let Some(stmt) = locate(content, name, pos) {
        match rewrite_line(content, stmt, name, value) {
            Some(next) => {
                count += 1;
                pos = next;
            }
            None => pos = stmt.end + 1,
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "timing@wqhd_sdc_144 {\n\
        \t\tcell-index = <0x3>;\n\
        \t\tqcom,mdss-dsi-panel-framerate = <144>;\n\
        \t\tqcom,mdss-dsi-panel-clockrate = <0x568bc300>;\n\
        \t\tqcom,mdss-dsi-panel-name = \"AE084; dsc}cmd\";\n\
        \t\tqcom,mdss-dsi-panel-jitter = <0x2 0x1>;\n\
        \t};";

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x90"), Some(144));
        assert_eq!(parse_number("0X1A90"), Some(6800));
        assert_eq!(parse_number(" 60 "), Some(60));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("12ab"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_get_numeric_hex_and_decimal() {
        assert_eq!(get_numeric(BLOCK, "cell-index"), Some(3));
        assert_eq!(get_numeric(BLOCK, "qcom,mdss-dsi-panel-framerate"), Some(144));
        assert_eq!(
            get_numeric(BLOCK, "qcom,mdss-dsi-panel-clockrate"),
            Some(0x568bc300)
        );
        assert_eq!(get_numeric(BLOCK, "qcom,mdss-dsi-panel-jitter"), Some(2));
    }

    #[test]
    fn test_get_numeric_word_boundary() {
        assert_eq!(get_numeric(BLOCK, "framerate"), None);
        assert_eq!(get_numeric(BLOCK, "index"), None);
        assert_eq!(get_numeric(BLOCK, "qcom,mdss-dsi-panel"), None);
    }

    #[test]
    fn test_get_numeric_requires_brackets_before_terminator() {
        let text = "a = \"x\";\nb = <0x5>;";
        assert_eq!(get_numeric(text, "a"), None);
        assert_eq!(get_numeric(text, "b"), Some(5));
        assert_eq!(get_numeric("missing = <1>;", "absent"), None);
    }

    #[test]
    fn test_get_numeric_zero_is_not_missing() {
        assert_eq!(get_numeric("x = <0x0>;", "x"), Some(0));
    }

    #[test]
    fn test_set_numeric_shifts_tail() {
        let mut block = BLOCK.to_string();
        assert!(set_numeric(&mut block, "cell-index", 0x15));
        assert!(block.contains("cell-index = <0x15>;"));
        assert!(set_numeric(&mut block, "qcom,mdss-dsi-panel-clockrate", 0x1));
        assert!(block.contains("qcom,mdss-dsi-panel-clockrate = <0x1>;"));
        // Decimal input is rewritten as hex.
        assert!(set_numeric(&mut block, "qcom,mdss-dsi-panel-framerate", 150));
        assert!(block.contains("qcom,mdss-dsi-panel-framerate = <0x96>;"));
        assert!(block.ends_with("= <0x2 0x1>;\n\t};"));
        assert!(block.contains("\"AE084; dsc}cmd\""));
    }

    #[test]
    fn test_set_numeric_missing_is_noop() {
        let mut block = BLOCK.to_string();
        assert!(!set_numeric(&mut block, "qcom,mdss-mdp-transfer-time-us", 1));
        assert!(!set_numeric(&mut block, "qcom,mdss-dsi-panel-name", 1));
        assert_eq!(block, BLOCK);
    }

    #[test]
    fn test_raw_round_trip_with_quoted_terminators() {
        assert_eq!(
            get_raw(BLOCK, "qcom,mdss-dsi-panel-name"),
            Some("\"AE084; dsc}cmd\"")
        );
        assert_eq!(get_raw(BLOCK, "cell-index"), Some("<0x3>"));

        let mut block = BLOCK.to_string();
        assert!(set_raw(&mut block, "cell-index", "<0x7>"));
        assert!(set_raw(&mut block, "qcom,mdss-dsi-panel-name", "\"short\""));
        assert!(block.contains("\t\tcell-index = <0x7>;\n"));
        assert!(block.contains("qcom,mdss-dsi-panel-name = \"short\";"));
        assert!(!set_raw(&mut block, "absent", "<1>"));
    }

    #[test]
    fn test_rewrite_whole_line_keeps_indent() {
        let mut text = String::from("node {\n\t\tclk = \"garbled\" ;\n\t\tnext = <1>;\n};");
        assert!(rewrite_whole_line(&mut text, "clk", 0x568bc300));
        assert_eq!(
            text,
            "node {\n\t\tclk = <0x568bc300>;\n\t\tnext = <1>;\n};"
        );
    }

    #[test]
    fn test_rewrite_whole_line_at_buffer_start() {
        let mut text = String::from("clk = <1>;\nother = <2>;");
        assert!(rewrite_whole_line(&mut text, "clk", 2));
        assert_eq!(text, "clk = <0x2>;\nother = <2>;");
    }

    #[test]
    fn test_rewrite_all_occurrences() {
        let mut text = String::from(
            "a {\n  qcom,max = <1>;\n};\nb {\n    qcom,max = <0x2 0x3>;\n    qcom,maximum = <4>;\n};\n",
        );
        assert_eq!(rewrite_all_occurrences(&mut text, "qcom,max", 0xff), 2);
        assert_eq!(
            text,
            "a {\n  qcom,max = <0xff>;\n};\nb {\n    qcom,max = <0xff>;\n    qcom,maximum = <4>;\n};\n"
        );
        assert_eq!(rewrite_all_occurrences(&mut text, "absent", 1), 0);
    }
}
