//! # ovlstore
//!
//! A disk-resident, sorted, partitioned store of pairwise sequence-overlap
//! records, indexed by the "A" read identifier.
//!
//! The store is built by a three-stage external-sort pipeline, each stage an
//! independent batch job over disjoint files:
//!
//! 1. **Bucketize** ([`bucketize`]): fan an arbitrary-order stream of
//!    overlaps out into contiguous-ID buckets, emitting the symmetric
//!    partner of every mirrorable record along the way.
//! 2. **Sort** ([`sort`]): load one bucket, order it by `(a_iid, b_iid)`,
//!    and write a sorted block file plus a local offset index.
//! 3. **Merge** ([`merge`]): splice the per-bucket indexes into one dense
//!    global index, filling entries for reads that own no overlaps, and
//!    write the store header.
//!
//! A finished store is immutable. [`StoreReader`] provides sequential and
//! ID-range-bounded scans over it; [`StoreWriter`] is the legacy
//! single-pass build path for small, pre-sorted inputs.
//!
//! ## On-disk layout
//!
//! ```text
//! store/
//!   ovs              StoreInfo header
//!   idx              dense OffsetRecord array, one entry per read ID
//!   0001, 0002, ...  block files of packed overlap records
//! ```
//!
//! Build-time intermediates (`bucket####/slice###`, `####.idx`,
//! `####.ovs`) are deleted once the merge verifies clean.

pub mod bucketize;
pub mod merge;
pub mod read;
pub mod record;
pub mod sort;
pub mod write;

mod error;
mod file;
mod info;

pub use bucketize::{Bucketizer, BucketizerConfig, FilterMode, FragmentInfo, Partition};
pub use error::{
    BucketError, CodecError, ConfigError, Error, IndexError, MergeError, ReadError, Result,
    SortError, WriteError,
};
pub use file::{Framing, OverlapFileReader, OverlapFileWriter};
pub use info::{OffsetRecord, StoreInfo, StoreLayout};
pub use merge::{merge_segments, test_index, MergerConfig};
pub use read::StoreReader;
pub use record::{Overlap, OverlapDat, PackedOverlap, RawDat, SeedDat, TrimDat};
pub use sort::{sort_bucket, SorterConfig};
pub use write::StoreWriter;

/// Magic bytes identifying the `ovs` store-info header.
pub const STORE_MAGIC: [u8; 8] = *b"ovlstore";

/// Store format version.
pub const STORE_VERSION: u64 = 1;

/// Bit width of a quantized error rate.
pub const ERATE_BITS: u32 = 12;

/// Largest encodable quality value (saturation point of the codec).
pub const MAX_EVALUE: u16 = (1 << ERATE_BITS) - 1;

/// Bit width of a read position; positions and hangs are bounded by it.
pub const MAX_READ_LEN_BITS: u32 = 11;

/// Largest representable read position.
pub const MAX_READ_LEN: u32 = (1 << MAX_READ_LEN_BITS) - 1;

/// Largest representable hang magnitude.
pub const MAX_HANG: i32 = (1 << MAX_READ_LEN_BITS) - 1;

/// Bytes per record in full framing (`a_iid`, `b_iid`, payload word).
pub const FULL_RECORD_BYTES: usize = 16;

/// Bytes per record in store-block framing (`b_iid`, payload word).
pub const STORE_RECORD_BYTES: usize = 12;

/// Default cap on overlaps per block file: one gigabyte of store records.
pub const DEFAULT_OVERLAPS_PER_FILE: u64 = 1024 * 1024 * 1024 / STORE_RECORD_BYTES as u64;
