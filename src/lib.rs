//! # LI Log Parser
//!
//! An incremental decoder for versioned LI binary instrument logs (`.li`)
//! with converters to comma-separated text and NumPy array files.
//!
//! ## Features
//!
//! - **Pull-based decoding**: feed arbitrarily fragmented bytes, query
//!   decoded rows on demand
//! - **Backpressure hints**: the reader reports exactly how many bytes it
//!   needs before it can make progress
//! - **Dual wire variants**: the fixed-layout V1 format and the framed,
//!   self-describing V2 format
//! - **Bit-packed fields**: signed, unsigned and float fields of
//!   arbitrary bit width, with exact sign extension
//! - **Calibration pipelines**: per-channel operation chains compiled
//!   from the stream's own descriptor strings
//!
//! ## Quick Start
//!
//! ```no_run
//! use lilog_parser::{CsvWriter, NpyWriter};
//! use std::fs::File;
//!
//! // Convert a capture to CSV
//! let stats = CsvWriter::new().convert(
//!     File::open("data.li")?,
//!     File::create("data.csv")?,
//! )?;
//! println!("{}", stats.summary());
//!
//! // Or to a NumPy array
//! NpyWriter::new().convert(File::open("data.li")?, File::create("data.npy")?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Incremental Decoding
//!
//! For custom consumers, drive the [`LogReader`] directly:
//!
//! ```no_run
//! use lilog_parser::LogReader;
//!
//! let mut reader = LogReader::new();
//! let source = std::fs::read("data.li")?;
//! let mut offset = 0;
//!
//! // Feed what the reader asks for, then drain rows
//! loop {
//!     let want = reader.suggested_put()? as usize;
//!     let take = want.max(1).min(source.len() - offset);
//!     if take == 0 {
//!         break;
//!     }
//!     reader.put(&source[offset..offset + take]);
//!     offset += take;
//!
//!     let width = match reader.row_bytes() {
//!         Ok(width) => width as usize / 8,
//!         Err(e) if e.is_need_more_data() => continue,
//!         Err(e) => return Err(e.into()),
//!     };
//!     let mut row = vec![0.0; width];
//!     loop {
//!         match reader.next_row(&mut row) {
//!             Ok(()) => println!("{:?}", row),
//!             Err(e) if e.is_need_more_data() => break,
//!             Err(e) => return Err(e.into()),
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, Error>`. [`Error::NeedMoreData`] is
//! the expected retry signal of the incremental loop; bad-format and
//! corrupt-stream errors are terminal — the reader refuses all further
//! queries once the stream has violated the format.

// Public API modules
pub mod error;
pub mod reader;
pub mod writer;

// Re-export commonly used types
pub use error::{Error, Result};
pub use formats::npy::NpyWriter;
pub use reader::LogReader;
pub use writer::{CsvWriter, WriteStats};

// Internal modules (public but not part of the high-level API)
pub mod bitcopy;
pub mod formats;
pub mod framing;
pub mod number;
pub mod parse;
pub mod queue;
