//! Tabular span parser for pseudo-file text.
//!
//! Parsing never copies cell text. Each cell is recorded as a byte span into
//! the decoded text, stored column-major so a whole column can be scanned
//! without touching the others. Tables are reused across reads: rows are
//! resized in place and every cell is rewritten on each parse.

use std::ops::Range;

use thiserror::Error;

/// Error type for parsing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The tokenizer closed a different number of rows than the newline scan
    /// predicted. The file format has drifted.
    #[error("parsed {parsed} rows, expected {expected}")]
    RowCount { expected: usize, parsed: usize },

    #[error("invalid number {text:?} at column {col}, row {row}")]
    Number {
        col: usize,
        row: usize,
        text: String,
    },
}

/// How a line is split into cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tokenizer {
    /// Runs of non-whitespace separated by runs of whitespace
    /// (`/proc/stat`, `time_in_state`).
    Whitespace,
    /// `key: value rest` lines (`/proc/meminfo`). Column 0 is the key
    /// including the colon, column 1 the first word after it and column 2
    /// the remainder of the line.
    KeyValue,
}

/// Spans of one column.
#[derive(Debug, Clone, Default)]
pub struct Column {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
}

/// Column-major table of `(offset, length)` cell spans.
#[derive(Debug, Clone, Default)]
pub struct SpanTable {
    columns: Vec<Column>,
    rows: usize,
}

impl SpanTable {
    /// Creates an empty table with a fixed column capacity.
    pub fn with_columns(columns: usize) -> Self {
        Self {
            columns: vec![Column::default(); columns],
            rows: 0,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Byte range of a cell, or `None` when out of bounds.
    pub fn span(&self, col: usize, row: usize) -> Option<Range<usize>> {
        let column = self.columns.get(col)?;
        if row >= self.rows {
            return None;
        }
        let start = column.offsets[row];
        Some(start..start + column.lengths[row])
    }

    /// Text of a cell; empty for out-of-bounds cells.
    pub fn cell<'a>(&self, text: &'a str, col: usize, row: usize) -> &'a str {
        self.span(col, row)
            .and_then(|range| text.get(range))
            .unwrap_or("")
    }

    /// Parses a cell as an unsigned integer. Missing cells parse as zero.
    pub fn parse_u64(&self, text: &str, col: usize, row: usize) -> Result<u64, ParseError> {
        let cell = self.cell(text, col, row);
        if cell.is_empty() {
            return Ok(0);
        }
        cell.parse().map_err(|_| ParseError::Number {
            col,
            row,
            text: cell.to_string(),
        })
    }

    /// Finds the first row whose cell in `col` equals `needle`.
    pub fn find_row(&self, text: &str, col: usize, needle: &str) -> Option<usize> {
        (0..self.rows).find(|&row| self.cell(text, col, row) == needle)
    }

    fn resize_rows(&mut self, rows: usize) {
        for column in &mut self.columns {
            column.offsets.resize(rows, 0);
            column.lengths.resize(rows, 0);
        }
        self.rows = rows;
    }

    /// Resets every cell of `row` to an empty span at `at`.
    fn clear_row(&mut self, row: usize, at: usize) {
        for column in &mut self.columns {
            column.offsets[row] = at;
            column.lengths[row] = 0;
        }
    }

    fn set(&mut self, col: usize, row: usize, start: usize, end: usize) {
        if let Some(column) = self.columns.get_mut(col) {
            column.offsets[row] = start;
            column.lengths[row] = end - start;
        }
    }
}

/// Counts rows the way the parser will close them: one per newline, plus a
/// final row when the text does not end with a newline.
///
/// Returns `(rows, has_trailing_newline)`. Empty text has no rows.
pub fn count_rows(text: &str) -> (usize, bool) {
    let bytes = text.as_bytes();
    let Some(&last) = bytes.last() else {
        return (0, true);
    };
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    let trailing = last == b'\n';
    (newlines + usize::from(!trailing), trailing)
}

/// Fills `table` with the spans of `text`.
///
/// Exactly `expected_rows` rows are parsed; rows past that are ignored, as
/// are cells past the table's column capacity. `expected_rows` is normally
/// `count_rows(text).0`, optionally capped by the caller.
pub fn parse(
    table: &mut SpanTable,
    text: &str,
    expected_rows: usize,
    has_trailing_newline: bool,
    tokenizer: Tokenizer,
) -> Result<(), ParseError> {
    table.resize_rows(expected_rows);
    let bytes = text.as_bytes();
    let mut row = 0;
    let mut start = 0;
    while row < expected_rows && start < bytes.len() {
        let end = line_end(bytes, start);
        table.clear_row(row, start);
        match tokenizer {
            Tokenizer::Whitespace => split_whitespace(table, bytes, row, start, end),
            Tokenizer::KeyValue => split_key_value(table, bytes, row, start, end),
        }
        if end == bytes.len() && !has_trailing_newline {
            // Unterminated last line: end of buffer closes the row.
            row += 1;
            break;
        }
        row += 1;
        start = end + 1;
    }
    if row != expected_rows {
        return Err(ParseError::RowCount {
            expected: expected_rows,
            parsed: row,
        });
    }
    Ok(())
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| from + p)
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\r' || b == 0x0b || b == 0x0c
}

fn split_whitespace(table: &mut SpanTable, bytes: &[u8], row: usize, start: usize, end: usize) {
    let mut col = 0;
    let mut i = start;
    while i < end && col < table.column_count() {
        while i < end && is_blank(bytes[i]) {
            i += 1;
        }
        if i == end {
            break;
        }
        let token = i;
        while i < end && !is_blank(bytes[i]) {
            i += 1;
        }
        table.set(col, row, token, i);
        col += 1;
    }
}

fn split_key_value(table: &mut SpanTable, bytes: &[u8], row: usize, start: usize, end: usize) {
    let Some(colon) = bytes[start..end].iter().position(|&b| b == b':') else {
        // No key on this line; keep it as a bare key cell.
        table.set(0, row, start, end);
        return;
    };
    let colon = start + colon;
    table.set(0, row, start, colon + 1);

    let mut i = colon + 1;
    while i < end && is_blank(bytes[i]) {
        i += 1;
    }
    let value = i;
    while i < end && !is_blank(bytes[i]) {
        i += 1;
    }
    table.set(1, row, value, i);

    while i < end && is_blank(bytes[i]) {
        i += 1;
    }
    let mut rest_end = end;
    while rest_end > i && is_blank(bytes[rest_end - 1]) {
        rest_end -= 1;
    }
    table.set(2, row, i, rest_end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(text: &str, columns: usize, tokenizer: Tokenizer) -> SpanTable {
        let mut table = SpanTable::with_columns(columns);
        let (rows, trailing) = count_rows(text);
        parse(&mut table, text, rows, trailing, tokenizer).unwrap();
        table
    }

    fn cells(table: &SpanTable, text: &str) -> Vec<Vec<String>> {
        (0..table.row_count())
            .map(|r| {
                (0..table.column_count())
                    .map(|c| table.cell(text, c, r).to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_count_rows() {
        assert_eq!(count_rows(""), (0, true));
        assert_eq!(count_rows("a\n"), (1, true));
        assert_eq!(count_rows("a\nb"), (2, false));
        assert_eq!(count_rows("a\n\nb\n"), (3, true));
    }

    #[test]
    fn test_parse_proc_stat_lines() {
        let text = "cpu  100 0 50 200 0 0 0\ncpu0 100 0 50 200 0 0 0\n";
        let table = parse_all(text, 8, Tokenizer::Whitespace);

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(text, 0, 0), "cpu");
        assert_eq!(table.cell(text, 1, 0), "100");
        assert_eq!(table.cell(text, 4, 0), "200");
        assert_eq!(table.cell(text, 0, 1), "cpu0");
        assert_eq!(table.parse_u64(text, 3, 1).unwrap(), 50);
    }

    #[test]
    fn test_trailing_newline_equivalence() {
        let with = "cpu  1 2 3\ncpu0 4 5 6\n";
        let without = "cpu  1 2 3\ncpu0 4 5 6";
        let a = parse_all(with, 4, Tokenizer::Whitespace);
        let b = parse_all(without, 4, Tokenizer::Whitespace);

        assert_eq!(a.row_count(), b.row_count());
        for r in 0..a.row_count() {
            for c in 0..a.column_count() {
                assert_eq!(a.span(c, r), b.span(c, r), "cell ({}, {})", c, r);
            }
        }
    }

    #[test]
    fn test_columns_beyond_capacity_are_truncated() {
        let text = "cpu  1 2 3 4 5 6 7 8 9 10\n";
        let table = parse_all(text, 8, Tokenizer::Whitespace);
        assert_eq!(table.column_count(), 8);
        assert_eq!(table.cell(text, 7, 0), "7");
        assert_eq!(table.cell(text, 8, 0), "");
    }

    #[test]
    fn test_row_limit() {
        let text = "cpu  1\ncpu0 1\ncpu1 1\nintr 5\n";
        let mut table = SpanTable::with_columns(2);
        let (rows, trailing) = count_rows(text);
        parse(&mut table, text, rows.min(2), trailing, Tokenizer::Whitespace).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(text, 0, 1), "cpu0");
    }

    #[test]
    fn test_row_limit_on_unterminated_file() {
        let text = "cpu  1\ncpu0 1\ncpu1 1";
        let mut table = SpanTable::with_columns(2);
        let (rows, trailing) = count_rows(text);
        assert_eq!(rows, 3);
        parse(&mut table, text, 2, trailing, Tokenizer::Whitespace).unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_short_rows_are_cleared() {
        let mut table = SpanTable::with_columns(3);
        let first = "a b c\n";
        parse(&mut table, first, 1, true, Tokenizer::Whitespace).unwrap();
        assert_eq!(table.cell(first, 2, 0), "c");

        let second = "a\n";
        parse(&mut table, second, 1, true, Tokenizer::Whitespace).unwrap();
        assert_eq!(table.cell(second, 1, 0), "");
        assert_eq!(table.cell(second, 2, 0), "");
    }

    #[test]
    fn test_empty_lines_are_rows() {
        let text = "a\n\nb\n";
        let table = parse_all(text, 1, Tokenizer::Whitespace);
        assert_eq!(cells(&table, text), vec![vec!["a"], vec![""], vec!["b"]]);
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut table = SpanTable::with_columns(2);
        let err = parse(&mut table, "a\nb\n", 3, true, Tokenizer::Whitespace).unwrap_err();
        assert_eq!(
            err,
            ParseError::RowCount {
                expected: 3,
                parsed: 2
            }
        );
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16384000 kB\nHugePages_Total:       0\nMemFree:  8192000 kB";
        let table = parse_all(text, 3, Tokenizer::KeyValue);
        assert_eq!(
            cells(&table, text),
            vec![
                vec!["MemTotal:", "16384000", "kB"],
                vec!["HugePages_Total:", "0", ""],
                vec!["MemFree:", "8192000", "kB"],
            ]
        );
        assert_eq!(table.find_row(text, 0, "MemFree:"), Some(2));
    }

    #[test]
    fn test_parse_key_value_with_tabs() {
        let text = "Name:\tbash\nVmRSS:\t   5120 kB\n";
        let table = parse_all(text, 3, Tokenizer::KeyValue);
        assert_eq!(table.cell(text, 1, 0), "bash");
        assert_eq!(table.cell(text, 1, 1), "5120");
        assert_eq!(table.cell(text, 2, 1), "kB");
    }

    #[test]
    fn test_parse_u64_errors() {
        let text = "cpu  12x\n";
        let table = parse_all(text, 2, Tokenizer::Whitespace);
        assert!(matches!(
            table.parse_u64(text, 1, 0),
            Err(ParseError::Number { col: 1, row: 0, .. })
        ));
        assert_eq!(table.parse_u64(text, 5, 0).unwrap(), 0);
    }

    #[test]
    fn test_replacement_char_inside_token() {
        let text = "cpu\u{FFFD} 12\n";
        let table = parse_all(text, 2, Tokenizer::Whitespace);
        assert_eq!(table.cell(text, 0, 0), "cpu\u{FFFD}");
        assert_eq!(table.cell(text, 1, 0), "12");
    }
}
