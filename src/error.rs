/// Custom Result type for ovlstore operations, wrapping the crate [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the ovlstore library.
///
/// Each pipeline stage owns a sub-enum; everything a stage detects is fatal
/// to that stage except text-format parse errors, which the bulk converters
/// log and skip.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors in record packing, quality encoding, or text conversion
    #[error("Error in record codec: {0}")]
    CodecError(#[from] CodecError),

    /// Errors while reading overlap files or the store
    #[error("Error reading: {0}")]
    ReadError(#[from] ReadError),

    /// Errors while writing overlap files or the store
    #[error("Error writing: {0}")]
    WriteError(#[from] WriteError),

    /// Invalid configuration, detected before any data is processed
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Errors raised by the bucketize stage
    #[error("Error bucketizing: {0}")]
    BucketError(#[from] BucketError),

    /// Errors raised by the bucket-sort stage
    #[error("Error sorting bucket: {0}")]
    SortError(#[from] SortError),

    /// Errors raised by the index/merge stage
    #[error("Error merging segments: {0}")]
    MergeError(#[from] MergeError),

    /// Index well-formedness errors
    #[error("Error in store index: {0}")]
    IndexError(#[from] IndexError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors in the overlap record codec.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// A packed payload word carried an unknown kind tag.
    ///
    /// Tag 0 is reserved so that an all-zero word (the classic corruption
    /// pattern) never decodes as a valid record.
    #[error("Invalid record kind tag {tag} in payload word {word:#018x}")]
    InvalidKind { tag: u8, word: u64 },

    /// A hang magnitude exceeds the representable range
    #[error("Hang {value} out of range [-{limit}, {limit}]")]
    HangOutOfRange { value: i32, limit: i32 },

    /// A trim/seed position exceeds the read-length bit width
    #[error("Position {value} out of range [0, {limit}]")]
    PositionOutOfRange { value: u32, limit: u32 },

    /// A text dump line did not parse; the line is skipped by converters
    #[error("Malformed {expected}-field overlap line ({found} fields): '{line}'")]
    MalformedLine {
        line: String,
        found: usize,
        expected: usize,
    },
}

/// Errors while reading binary overlap data.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// A partial record at the end of a stream.
    ///
    /// The parameter is the number of trailing bytes that did not form a
    /// whole record.
    #[error("Partial record at end of stream ({0} bytes)")]
    PartialRecord(usize),

    /// Seek requested on a non-seekable source (stdin or compressed)
    #[error("Cannot seek overlap file '{0}'")]
    NotSeekable(String),

    /// The reader ran past the store's highest block file
    #[error("Ran past block file {0:04} while records remain in the index")]
    MissingBlockFile(u32),

    /// The `ovs` header carried the wrong magic bytes
    #[error("Invalid store magic in '{0}'")]
    InvalidMagic(String),

    /// The `ovs` header carried an unsupported version
    #[error("Unsupported store version {0}")]
    InvalidVersion(u64),

    /// The index file size is not a whole number of offset records
    #[error("Index file '{0}' is not a whole number of offset records ({1} bytes)")]
    RaggedIndex(String, u64),
}

/// Errors while writing binary overlap data.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The single-pass store writer received records out of order.
    ///
    /// The writer has no sort buffer; a decrease in `a_iid` is fatal, never
    /// a silent reorder.
    #[error(
        "Overlap out of order: last a_iid {last}, incoming a:{a_iid} b:{b_iid}"
    )]
    MisorderedOverlap { last: u32, a_iid: u32, b_iid: u32 },

    /// An overlap arrived keyed under the reserved ID 0, possibly corrupt
    /// input data
    #[error("Overlap has a_iid 0 (b_iid {b_iid}); 0 never owns a record")]
    ZeroReadId { b_iid: u32 },

    /// The store path cannot be stdin/stdout
    #[error("Store path cannot be '-'")]
    StdStreamStore,

    /// Refusing to overwrite a directory that already holds a valid store
    #[error("'{0}' is already a valid overlap store")]
    StoreExists(String),
}

/// Invalid configuration, detected before any data is processed.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The derived bucket count exceeds the open-file capability
    #[error(
        "Bucketizing needs {needed} slice files but only {limit} may be open; \
         raise the memory budget or lower the bucket count"
    )]
    TooManyBuckets { needed: u64, limit: usize },

    /// A sizing pass found no overlaps at all
    #[error("No overlaps found in any input file")]
    NoOverlaps,

    /// A required stage parameter is zero
    #[error("{0} must be non-zero")]
    ZeroParameter(&'static str),

    /// A filter mode needs per-fragment library information
    #[error("Filter mode '{0}' requires a fragment library table")]
    MissingFragInfo(&'static str),
}

/// Errors raised by the bucketize stage.
#[derive(thiserror::Error, Debug)]
pub enum BucketError {
    /// An overlap's IDs are zero or at/above the read-count bound.
    ///
    /// This indicates a damaged input file; the record is never dropped
    /// silently.
    #[error(
        "Overlap has IDs out of range (max_iid {max_iid}), possibly corrupt \
         input data: {record}"
    )]
    IdOutOfRange { record: String, max_iid: u32 },

    /// A record mapped to a slice beyond the opened bucket files
    #[error(
        "Too many bucket files when adding overlap {record}: slice {slice}, \
         iid_per_bucket {iid_per_bucket}, slices {num_slices}"
    )]
    SliceOutOfRange {
        record: String,
        slice: u64,
        iid_per_bucket: u64,
        num_slices: u32,
    },
}

/// Errors raised by the bucket-sort stage.
#[derive(thiserror::Error, Debug)]
pub enum SortError {
    /// A slice held a different number of records than its side file claimed
    #[error(
        "Slice '{slice}' holds {found} overlaps but sliceSizes expected \
         {expected}; upstream bucketize output is corrupt"
    )]
    CountMismatch {
        slice: String,
        expected: u64,
        found: u64,
    },

    /// A slice file is claimed by the side file but absent on disk
    #[error("{expected} overlaps claim to exist in slice '{slice}', but file not found")]
    MissingSlice { slice: String, expected: u64 },

    /// A job's sliceSizes side file is truncated
    #[error("Short read on '{path}': {found} slice counts instead of {expected}")]
    ShortSliceSizes {
        path: String,
        found: usize,
        expected: usize,
    },
}

/// Errors raised by the index/merge stage.
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    /// One or more sorted segments are missing files; each missing file is
    /// logged before this error is returned.
    #[error("{failed} segments, out of {expected}, are incomplete")]
    IncompleteSegments { failed: u32, expected: u32 },

    /// A segment's local index does not start where the store left off
    #[error("Segment {segment:04} starts with iid {found}, but store is only up to {expected}")]
    SegmentOutOfOrder {
        segment: u32,
        found: u32,
        expected: u32,
    },

    /// The freshly written index failed verification
    #[error("Merged index failed verification with {0} errors")]
    VerifyFailed(u64),
}

/// Index well-formedness errors, reported by the verifier.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// `a_iid` jumped backward between adjacent index entries
    #[error("Index decreased from {from} to {to}")]
    Decreased { from: u32, to: u32 },

    /// `a_iid` skipped one or more values between adjacent index entries
    #[error("Gap between {from} and {to}")]
    Gap { from: u32, to: u32 },
}
