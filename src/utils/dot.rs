//! DOT output helpers.
//!
//! CFG listings are emitted as Graphviz record-free box nodes whose labels hold
//! one IR operation per line.

/// Escapes a string for use inside a double-quoted DOT label.
///
/// Line breaks become left-justified `\l` breaks so IR listings line up.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::escape_dot;
///
/// assert_eq!(escape_dot("r1 = \"x\""), "r1 = \\\"x\\\"");
/// assert_eq!(escape_dot("a\nb"), "a\\lb");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\l"),
            '\r' => {}
            '<' | '>' | '{' | '}' | '|' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_dot_plain() {
        assert_eq!(escape_dot("INT_ADD r1, r2"), "INT_ADD r1, r2");
    }

    #[test]
    fn test_escape_dot_specials() {
        assert_eq!(escape_dot("path\\x"), "path\\\\x");
        assert_eq!(escape_dot("a<b>"), "a\\<b\\>");
        assert_eq!(escape_dot("{x|y}"), "\\{x\\|y\\}");
    }

    #[test]
    fn test_escape_dot_newlines() {
        assert_eq!(escape_dot("line1\r\nline2"), "line1\\lline2");
    }
}
