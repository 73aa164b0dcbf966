//! Read-only text table interface consumed by renderers.

use std::borrow::Cow;

use unicode_width::UnicodeWidthStr;

use crate::collector::engine::Generation;

/// Bounding box of rendered text, in metric units relative to the text origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CellBounds {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Smallest box containing both.
    pub fn union(self, other: CellBounds) -> CellBounds {
        CellBounds {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

/// A table of text cells addressed by `(column, row)`.
pub trait TextTable {
    fn column_count(&self) -> usize;

    fn row_count(&self) -> usize;

    /// Text of one cell; out-of-range cells are empty.
    fn cell_text(&self, col: usize, row: usize) -> Cow<'_, str>;

    /// Per-column union of every cell's bounds under `metric`.
    ///
    /// Meant to run once per layout pass, not per frame.
    fn measure_all_cells(&self, metric: &dyn Fn(&str) -> CellBounds) -> Vec<CellBounds> {
        (0..self.column_count())
            .map(|c| {
                (0..self.row_count())
                    .map(|r| metric(&self.cell_text(c, r)))
                    .fold(CellBounds::default(), CellBounds::union)
            })
            .collect()
    }
}

/// One line of monospace terminal cells per string.
pub fn terminal_metric(text: &str) -> CellBounds {
    CellBounds {
        left: 0,
        top: 0,
        right: i32::try_from(text.width()).unwrap_or(i32::MAX),
        bottom: 1,
    }
}

/// Renders `table` as right-aligned columns separated by two spaces; the
/// first column is left-aligned.
pub fn render_plain(table: &dyn TextTable) -> String {
    let widths = table.measure_all_cells(&terminal_metric);
    let mut out = String::new();
    for r in 0..table.row_count() {
        let mut line = String::new();
        for (c, bounds) in widths.iter().enumerate() {
            let text = table.cell_text(c, r);
            let pad = usize::try_from(bounds.width())
                .unwrap_or(0)
                .saturating_sub(text.width());
            if c > 0 {
                line.push_str("  ");
                line.extend(std::iter::repeat_n(' ', pad));
                line.push_str(&text);
            } else {
                line.push_str(&text);
                line.extend(std::iter::repeat_n(' ', pad));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

impl TextTable for Generation {
    fn column_count(&self) -> usize {
        Generation::column_count(self)
    }

    fn row_count(&self) -> usize {
        Generation::row_count(self)
    }

    fn cell_text(&self, col: usize, row: usize) -> Cow<'_, str> {
        Cow::Borrowed(Generation::cell_text(self, col, row))
    }
}
