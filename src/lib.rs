//! gzseek - random access into gzip files
//!
//! A gzip stream normally has to be decoded from the beginning: the deflate
//! payload is a single bit stream whose Huffman tables and 32 KiB history
//! window depend on everything decoded before. This crate pays that cost
//! once. [`build_index`] decompresses the whole first stream and snapshots
//! the full decoder state (bit accumulator, tables, history ring, pending
//! copy) roughly every [`SPAN`] bytes of output. [`extract`] then serves
//! reads from any uncompressed offset by seeking the compressed file to the
//! nearest earlier snapshot, rebuilding the decoder in that exact state,
//! and decoding at most one span of prefix.
//!
//! Modeled on zran from the zlib contrib examples. Only single-stream gzip
//! files are supported; data after the first stream's trailer is ignored.
//!
//! ```no_run
//! # fn main() -> gzseek::GzseekResult<()> {
//! let index = gzseek::build_index("big.gz")?;
//! let got = gzseek::extract("big.gz", &index, 5 << 20, 4096)?;
//! assert!(got.data.len() <= 4096);
//! # Ok(())
//! # }
//! ```

mod byte_reader;
mod error;
mod gunzip;
mod huffman;
mod index;
mod index_file;
mod inflate;

pub use error::{GzseekError, GzseekResult};
pub use gunzip::{GzipHeader, GzipReader};
pub use index::{build_index, extract, Extraction, Index, Point, SPAN};
