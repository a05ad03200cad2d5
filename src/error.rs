// Error taxonomy
//
// Two classes of failure exist in this crate and they never mix:
// - IndexError: build/open-fatal conditions. No partial index is ever
//   returned; callers are expected to rebuild.
// - ReadError: per-read rejection codes. The read is never scored and no
//   MatchedRead is emitted; batch callers tally these and move on.

use thiserror::Error;

/// Fatal errors while building, saving or opening the genome index tables.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the expected format cookie.
    #[error("not a word index file: bad cookie {found:#010x} (expected {expected:#010x})")]
    BadCookie { found: u32, expected: u32 },

    /// The file was written by an incompatible format version.
    #[error("unsupported index version {found} (this build reads version {supported})")]
    Version { found: u32, supported: u32 },

    /// The file is shorter than its header claims.
    #[error("truncated index file: {0}")]
    Truncated(String),

    /// Companion index files disagree on shared parameters.
    #[error("index parameter mismatch: {0}")]
    ParameterMismatch(String),

    /// The reference is too short to hold even one word.
    #[error("reference too short to index: {length} symbols, word size {word_size}")]
    ReferenceTooShort { length: u64, word_size: u32 },

    /// Configuration rejected before the build started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Per-read rejection codes. These are not scoring outcomes: a rejected
/// read was never looked up in the index at all.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// Read and quality strings must describe the same symbols.
    #[error("read length {read_len} does not match quality length {qual_len}")]
    LengthMismatch { read_len: usize, qual_len: usize },

    /// Indexed lookup needs at least two usable words to disambiguate.
    #[error("read yields {usable} usable index words; at least {required} required")]
    TooFewWords { usable: usize, required: usize },

    /// The read cannot hold a single index word.
    #[error("read too short: {len} symbols, word size {word_size}")]
    TooShort { len: usize, word_size: usize },
}
