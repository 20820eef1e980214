//! Store metadata: the `ovs` header, index records, and path layout.

use std::fs;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};

use crate::error::{ReadError, Result};
use crate::{STORE_MAGIC, STORE_VERSION};

/// One entry of the dense store index: where read `a_iid`'s overlaps live.
///
/// A read with no overlaps still owns an entry; its `num_olaps` is zero and
/// its position points at the next record that does exist, so a range scan
/// can start at any ID without probing.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OffsetRecord {
    pub a_iid: u32,
    pub fileno: u32,
    pub offset: u32,
    pub num_olaps: u32,
}

/// The `ovs` store header, written last and validated on every open.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct StoreInfo {
    magic: u64,
    version: u64,
    max_read_len_bits: u64,
    overlaps_per_file: u64,
    smallest_iid: u64,
    largest_iid: u64,
    overlaps_total: u64,
    highest_file_index: u64,
}

impl StoreInfo {
    /// A header for an empty store; ID bounds start inverted and tighten
    /// as overlaps are noted.
    #[must_use]
    pub fn new(overlaps_per_file: u64) -> Self {
        Self {
            magic: u64::from_le_bytes(STORE_MAGIC),
            version: STORE_VERSION,
            max_read_len_bits: u64::from(crate::MAX_READ_LEN_BITS),
            overlaps_per_file,
            smallest_iid: u64::MAX,
            largest_iid: 0,
            overlaps_total: 0,
            highest_file_index: 0,
        }
    }

    /// Loads and validates a header.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.len() != std::mem::size_of::<Self>() {
            return Err(ReadError::InvalidMagic(path.display().to_string()).into());
        }
        let info: Self = bytemuck::pod_read_unaligned(&bytes);
        if info.magic != u64::from_le_bytes(STORE_MAGIC) {
            return Err(ReadError::InvalidMagic(path.display().to_string()).into());
        }
        if info.version != STORE_VERSION {
            return Err(ReadError::InvalidVersion(info.version).into());
        }
        Ok(info)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, bytemuck::bytes_of(self))?;
        Ok(())
    }

    /// Accounts for one overlap landing in block file `fileno`.
    pub fn note_overlap(&mut self, a_iid: u32, fileno: u32) {
        self.smallest_iid = self.smallest_iid.min(u64::from(a_iid));
        self.largest_iid = self.largest_iid.max(u64::from(a_iid));
        self.overlaps_total += 1;
        self.highest_file_index = self.highest_file_index.max(u64::from(fileno));
    }

    /// Folds a sorted segment's header into the merged store header.
    pub fn merge(&mut self, other: &StoreInfo) {
        if other.overlaps_total == 0 {
            return;
        }
        self.smallest_iid = self.smallest_iid.min(other.smallest_iid);
        self.largest_iid = self.largest_iid.max(other.largest_iid);
        self.overlaps_total += other.overlaps_total;
        self.highest_file_index = self.highest_file_index.max(other.highest_file_index);
    }

    #[must_use]
    pub fn smallest_iid(&self) -> u32 {
        if self.overlaps_total == 0 {
            0
        } else {
            self.smallest_iid as u32
        }
    }

    #[must_use]
    pub fn largest_iid(&self) -> u32 {
        self.largest_iid as u32
    }

    #[must_use]
    pub fn num_overlaps(&self) -> u64 {
        self.overlaps_total
    }

    #[must_use]
    pub fn overlaps_per_file(&self) -> u64 {
        self.overlaps_per_file
    }

    #[must_use]
    pub fn highest_file_index(&self) -> u32 {
        self.highest_file_index as u32
    }
}

/// Path arithmetic for a store directory and its build intermediates.
///
/// ```text
/// store/
///   ovs  idx  0001 0002 ...          the finished store
///   bucket0001/slice001[.zst]        bucketizer output, per input job
///   bucket0001/sliceSizes
///   0001.idx  0001.ovs               sorter output, per bucket
///   idx.fixed                        verifier repair output
/// ```
#[derive(Clone, Debug)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn info_path(&self) -> PathBuf {
        self.root.join("ovs")
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join("idx")
    }

    #[must_use]
    pub fn fixed_index_path(&self) -> PathBuf {
        self.root.join("idx.fixed")
    }

    #[must_use]
    pub fn block_path(&self, fileno: u32) -> PathBuf {
        self.root.join(format!("{fileno:04}"))
    }

    #[must_use]
    pub fn bucket_dir(&self, job: u32) -> PathBuf {
        self.root.join(format!("bucket{job:04}"))
    }

    #[must_use]
    pub fn slice_path(&self, job: u32, slice: u32, compressed: bool) -> PathBuf {
        let name = if compressed {
            format!("slice{slice:03}.zst")
        } else {
            format!("slice{slice:03}")
        };
        self.bucket_dir(job).join(name)
    }

    #[must_use]
    pub fn slice_sizes_path(&self, job: u32) -> PathBuf {
        self.bucket_dir(job).join("sliceSizes")
    }

    #[must_use]
    pub fn segment_index_path(&self, bucket: u32) -> PathBuf {
        self.root.join(format!("{bucket:04}.idx"))
    }

    #[must_use]
    pub fn segment_info_path(&self, bucket: u32) -> PathBuf {
        self.root.join(format!("{bucket:04}.ovs"))
    }

    /// True once the directory holds a complete store.
    #[must_use]
    pub fn is_store(&self) -> bool {
        self.info_path().is_file() && self.index_path().is_file()
    }
}
