//! Read-only range scans over a finished store.
//!
//! The dense index is memory-mapped; entry `iid` says where read
//! `iid`'s overlaps start and how many there are (the reserved ID 0 gets
//! a zero-count entry like any other read). Records for consecutive
//! IDs are contiguous across the block files, so a scan seeks once and
//! then streams, rolling to the next block file on end-of-file. The roll
//! is driven by EOF rather than by the index because a single read's
//! records may straddle a file boundary under the legacy writer.

use std::fs::File;

use memmap2::Mmap;

use crate::error::{ReadError, Result};
use crate::file::{Framing, OverlapFileReader};
use crate::info::{OffsetRecord, StoreInfo, StoreLayout};
use crate::record::Overlap;

pub struct StoreReader {
    layout: StoreLayout,
    info: StoreInfo,
    index: Mmap,
    num_entries: u32,
    block: OverlapFileReader,
    block_no: u32,
    cur_iid: u32,
    remaining: u32,
    hi: u32,
}

impl StoreReader {
    /// Opens a store and positions at the first overlap.
    pub fn open<P: AsRef<std::path::Path>>(store: P) -> Result<Self> {
        let layout = StoreLayout::new(store);
        let info = StoreInfo::load(layout.info_path())?;

        let index_file = File::open(layout.index_path())?;
        let index = unsafe { Mmap::map(&index_file)? };
        if index.len() % std::mem::size_of::<OffsetRecord>() != 0 {
            return Err(ReadError::RaggedIndex(
                layout.index_path().display().to_string(),
                index.len() as u64,
            )
            .into());
        }
        let num_entries = (index.len() / std::mem::size_of::<OffsetRecord>()) as u32;

        let block = OverlapFileReader::open(layout.block_path(1), Framing::Store)?;
        let mut reader = Self {
            layout,
            info,
            index,
            num_entries,
            block,
            block_no: 1,
            cur_iid: 1,
            remaining: 0,
            hi: 0,
        };
        reader.reset_range()?;
        Ok(reader)
    }

    #[must_use]
    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    fn entry(&self, iid: u32) -> Option<OffsetRecord> {
        if iid >= self.num_entries {
            return None;
        }
        let at = iid as usize * std::mem::size_of::<OffsetRecord>();
        Some(bytemuck::pod_read_unaligned(
            &self.index[at..at + std::mem::size_of::<OffsetRecord>()],
        ))
    }

    /// Restricts the scan to reads `lo..=hi` and rewinds to its start.
    ///
    /// Bounds are clamped to the IDs the store knows about; a range that
    /// misses every overlap simply scans empty.
    pub fn set_range(&mut self, lo: u32, hi: u32) -> Result<()> {
        let lo = lo.max(1);
        let hi = hi.min(self.info.largest_iid());
        self.hi = hi;
        if lo > hi {
            self.cur_iid = hi.wrapping_add(1);
            self.remaining = 0;
            return Ok(());
        }

        // the entry tells us where this read's records start; gap entries
        // already point at the next record that exists
        let Some(entry) = self.entry(lo) else {
            self.cur_iid = hi.wrapping_add(1);
            self.remaining = 0;
            return Ok(());
        };
        self.cur_iid = lo;
        self.remaining = entry.num_olaps;
        self.block_no = entry.fileno;
        self.block =
            OverlapFileReader::open(self.layout.block_path(entry.fileno), Framing::Store)?;
        self.block.seek_to_record(u64::from(entry.offset))?;
        Ok(())
    }

    /// Rewinds to a scan of every overlap in the store.
    pub fn reset_range(&mut self) -> Result<()> {
        self.set_range(1, self.info.largest_iid())
    }

    /// Overlaps a range scan would return, from the index alone.
    #[must_use]
    pub fn num_overlaps_in_range(&self, lo: u32, hi: u32) -> u64 {
        let lo = lo.max(1);
        let hi = hi.min(self.info.largest_iid());
        (lo..=hi)
            .filter_map(|iid| self.entry(iid))
            .map(|e| u64::from(e.num_olaps))
            .sum()
    }

    /// Returns the next overlap in the range, with `a_iid` reconstructed
    /// from the index, or `None` when the range is exhausted.
    pub fn read_next(&mut self) -> Result<Option<Overlap>> {
        loop {
            if self.cur_iid > self.hi {
                return Ok(None);
            }
            if self.remaining == 0 {
                self.cur_iid += 1;
                if self.cur_iid > self.hi {
                    return Ok(None);
                }
                self.remaining = self.entry(self.cur_iid).map_or(0, |e| e.num_olaps);
                continue;
            }
            match self.block.read_overlap()? {
                Some(mut packed) => {
                    packed.a_iid = self.cur_iid;
                    self.remaining -= 1;
                    return Ok(Some(packed.unpack()?));
                }
                None => self.roll_block()?,
            }
        }
    }

    /// Advances to the next block file at EOF; records owed to the index
    /// must exist in some later file.
    fn roll_block(&mut self) -> Result<()> {
        if self.block_no >= self.info.highest_file_index() {
            return Err(ReadError::MissingBlockFile(self.block_no + 1).into());
        }
        self.block_no += 1;
        self.block =
            OverlapFileReader::open(self.layout.block_path(self.block_no), Framing::Store)?;
        Ok(())
    }
}
