//! Common descriptor parsing
//!
//! Cursor over descriptor text plus the primitives shared by the type,
//! function and descriptor-file parsers: names, single expected characters
//! and `name=value` sections.

use crate::error::{fail, DfiError, DfiResult};
use crate::position::Position;

/// Extra characters accepted in header/annotation names
pub const NAME_EXTRA: &str = ".";

/// Extra characters accepted in header/annotation values
pub const VALUE_EXTRA: &str = ".<>{}[]?;:~!@#$%^&*()_+-=,/\\'\"";

/// Cursor over descriptor text
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    input: &'a str,
    position: Position,
}

impl<'a> Cursor<'a> {
    /// Create a new cursor at the start of the input
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: Position::start(),
        }
    }

    /// Get the current character
    pub fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Consume and return the current character
    pub fn next_char(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position.advance(ch);
        Some(ch)
    }

    /// Consume the current character if it equals `expected`
    pub fn consume_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn offset(&self) -> usize {
        self.position.offset
    }

    /// Unconsumed input
    pub fn remaining(&self) -> &'a str {
        &self.input[self.position.offset..]
    }

    pub fn is_eof(&self) -> bool {
        self.position.offset >= self.input.len()
    }

    /// Input consumed between `start` and the current position
    pub fn slice_from(&self, start: Position) -> &'a str {
        &self.input[start.offset..self.position.offset]
    }
}

/// What `eat_char` expects next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Char(char),
    /// The input must be exhausted
    Eof,
}

pub(crate) fn describe_char(ch: Option<char>) -> String {
    match ch {
        Some(c) => format!("{:?}", c),
        None => "EOF".to_string(),
    }
}

fn is_name_char(ch: char, also_accept: &str) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || also_accept.contains(ch)
}

/// Parse an identifier: ASCII alphanumerics and `_`
pub fn parse_name(cursor: &mut Cursor<'_>) -> DfiResult<String> {
    parse_name_also_accept(cursor, "")
}

/// Parse an identifier extended with the characters in `also_accept`.
/// Stops at the first non-matching character without consuming it.
pub fn parse_name_also_accept(cursor: &mut Cursor<'_>, also_accept: &str) -> DfiResult<String> {
    let start = cursor.position();
    while let Some(ch) = cursor.peek() {
        if !is_name_char(ch, also_accept) {
            break;
        }
        cursor.next_char();
    }
    let name = cursor.slice_from(start);
    if name.is_empty() {
        return fail(DfiError::EmptyName { position: start });
    }
    Ok(name.to_string())
}

/// Consume exactly one expected character.
///
/// `Expected::Char('\0')` is lenient: it consumes a NUL if present and is a
/// no-op otherwise. `Expected::Eof` consumes nothing and fails unless the
/// input is exhausted.
pub fn eat_char(cursor: &mut Cursor<'_>, expected: Expected) -> DfiResult<()> {
    let position = cursor.position();
    let found = cursor.peek();
    match expected {
        Expected::Eof if found.is_none() => Ok(()),
        Expected::Char('\0') => {
            cursor.consume_if('\0');
            Ok(())
        }
        Expected::Char(c) if found == Some(c) => {
            cursor.next_char();
            Ok(())
        }
        _ => {
            let expected = match expected {
                Expected::Char(c) => format!("{:?}", c),
                Expected::Eof => "EOF".to_string(),
            };
            fail(DfiError::UnexpectedToken {
                expected,
                found: describe_char(found),
                position,
            })
        }
    }
}

/// Accept either a newline or the end of input
pub(crate) fn eat_line_end(cursor: &mut Cursor<'_>) -> DfiResult<()> {
    if cursor.is_eof() {
        return Ok(());
    }
    eat_char(cursor, Expected::Char('\n'))
}

/// Parse one `name=value\n` line
pub fn parse_name_value(cursor: &mut Cursor<'_>) -> DfiResult<(String, String)> {
    let name = parse_name_also_accept(cursor, NAME_EXTRA)?;
    eat_char(cursor, Expected::Char('='))?;
    let value_start = cursor.position();
    if !cursor.peek().is_some_and(|ch| is_name_char(ch, VALUE_EXTRA)) {
        return fail(DfiError::EmptyValue {
            name,
            position: value_start,
        });
    }
    let value = parse_name_also_accept(cursor, VALUE_EXTRA)?;
    eat_char(cursor, Expected::Char('\n'))?;
    Ok((name, value))
}

/// Parse `name=value\n` lines until end of input or the next `:section`
pub fn parse_name_value_section(cursor: &mut Cursor<'_>) -> DfiResult<Vec<(String, String)>> {
    let mut entries = Vec::new();
    while let Some(ch) = cursor.peek() {
        if ch == ':' {
            break;
        }
        entries.push(parse_name_value(cursor)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_stack;

    #[test]
    fn test_parse_name_empty_stream_fails() {
        let mut cursor = Cursor::new("");
        assert!(matches!(
            parse_name(&mut cursor),
            Err(DfiError::EmptyName { .. })
        ));
        error_stack::clear();
    }

    #[test]
    fn test_parse_name_consumes_to_eof() {
        let mut cursor = Cursor::new("valid_name");
        assert_eq!(parse_name(&mut cursor).unwrap(), "valid_name");
        assert!(cursor.is_eof());
    }

    #[test]
    fn test_parse_name_stops_at_invalid_char() {
        let mut cursor = Cursor::new("invalid-name");
        assert_eq!(parse_name(&mut cursor).unwrap(), "invalid");
        assert_eq!(cursor.peek(), Some('-'));
    }

    #[test]
    fn test_parse_name_also_accept() {
        let mut cursor = Cursor::new("add(DD)D=rest");
        assert_eq!(
            parse_name_also_accept(&mut cursor, "()").unwrap(),
            "add(DD)D"
        );
        assert_eq!(cursor.peek(), Some('='));
    }

    #[test]
    fn test_eat_char_mismatch_reports_position() {
        error_stack::clear();
        let mut cursor = Cursor::new("ab");
        eat_char(&mut cursor, Expected::Char('a')).unwrap();
        let error = eat_char(&mut cursor, Expected::Char('=')).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Error parsing, expected token '=' got 'b' at position 1 (line 1, column 2)"
        );
        assert_eq!(error_stack::len(), 1);
        error_stack::clear();
    }

    #[test]
    fn test_eat_char_eof_and_nul() {
        let mut cursor = Cursor::new("x");
        assert!(eat_char(&mut cursor, Expected::Char('\0')).is_ok());
        assert_eq!(cursor.peek(), Some('x'));
        assert!(eat_char(&mut cursor, Expected::Eof).is_err());
        cursor.next_char();
        assert!(eat_char(&mut cursor, Expected::Eof).is_ok());
        error_stack::clear();
    }

    #[test]
    fn test_name_value_section() {
        let mut cursor = Cursor::new("name1=value1\nname2=value2\n");
        let entries = parse_name_value_section(&mut cursor).unwrap();
        assert_eq!(
            entries,
            vec![
                ("name1".to_string(), "value1".to_string()),
                ("name2".to_string(), "value2".to_string()),
            ]
        );
    }

    #[test]
    fn test_name_value_section_stops_at_section() {
        let mut cursor = Cursor::new("version=1.0.0\n:types\n");
        let entries = parse_name_value_section(&mut cursor).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, "1.0.0");
        assert_eq!(cursor.peek(), Some(':'));
    }

    #[test]
    fn test_name_value_section_empty_name() {
        error_stack::clear();
        let mut cursor = Cursor::new("=value1\nname2=value2\n");
        assert!(parse_name_value_section(&mut cursor).is_err());
        assert_eq!(error_stack::pop().as_deref(), Some("Parsed empty name"));
    }

    #[test]
    fn test_name_value_section_empty_value() {
        error_stack::clear();
        let mut cursor = Cursor::new("name1=\n");
        let error = parse_name_value_section(&mut cursor).unwrap_err();
        assert!(matches!(error, DfiError::EmptyValue { .. }));
        assert_eq!(error_stack::len(), 1);
        error_stack::clear();
    }

    #[test]
    fn test_empty_value_keeps_earlier_messages_on_full_stack() {
        error_stack::clear();
        error_stack::set_capacity(2);
        error_stack::push("first");
        error_stack::push("second");
        let mut cursor = Cursor::new("name1=\n");
        let error = parse_name_value(&mut cursor).unwrap_err();
        assert_eq!(error_stack::drain(), vec![error.to_string(), "second".to_string()]);
        error_stack::set_capacity(error_stack::DEFAULT_CAPACITY);
    }

    #[test]
    fn test_name_value_section_missing_newline() {
        error_stack::clear();
        let mut cursor = Cursor::new("name1=value1");
        let error = parse_name_value_section(&mut cursor).unwrap_err();
        assert!(error.to_string().contains("expected token '\\n' got EOF at position 12"));
        error_stack::clear();
    }

    #[test]
    fn test_name_value_section_missing_equals() {
        error_stack::clear();
        let mut cursor = Cursor::new("name1 value1\n");
        let error = parse_name_value_section(&mut cursor).unwrap_err();
        assert!(error.to_string().contains("expected token '=' got ' ' at position 5"));
        error_stack::clear();
    }
}
