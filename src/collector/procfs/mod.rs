//! Reading and tokenizing Linux pseudo-files.
//!
//! `source` turns an open handle into decoded text on every read, `parser`
//! turns that text into a span table without copying cells.

pub mod parser;
pub mod source;

pub use parser::{ParseError, SpanTable, Tokenizer, count_rows, parse};
pub use source::{PseudoFileSource, decode_lossy};
