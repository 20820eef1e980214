//! Stage two of the store build: sort one bucket into a block file.
//!
//! A sort job gathers its bucket's slice from every bucketize job,
//! cross-checks the record counts against each job's `sliceSizes` side
//! file, sorts in memory, and writes three outputs: the final block file
//! `NNNN` (store framing), a local index `NNNN.idx` covering the bucket's
//! ID range with gap entries for reads owning no overlaps, and a segment
//! header `NNNN.ovs`.
//!
//! The block file is written in its final place; the merge stage only
//! splices indexes and never moves overlap data.

use std::fs::{self, File};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use crate::error::{ConfigError, Result, SortError};
use crate::file::{Framing, OverlapFileReader, OverlapFileWriter};
use crate::info::{OffsetRecord, StoreInfo, StoreLayout};
use crate::record::PackedOverlap;
use crate::DEFAULT_OVERLAPS_PER_FILE;

#[derive(Clone, Debug)]
pub struct SorterConfig {
    /// Store directory holding the bucketize output.
    pub store: PathBuf,
    /// Which bucket to sort, 1-based; also the block file number.
    pub bucket: u32,
    /// Total number of buckets, for sanity checks only.
    pub num_buckets: u32,
    /// Number of bucketize jobs that contributed slices.
    pub num_jobs: u32,
}

/// Sorts one bucket and writes its block file, index, and header.
///
/// Returns the number of overlaps in the bucket. An empty bucket still
/// writes all three files so the merge stage can tell "ran and found
/// nothing" from "never ran".
pub fn sort_bucket(config: &SorterConfig) -> Result<u64> {
    if config.bucket == 0 || config.bucket > config.num_buckets {
        return Err(ConfigError::ZeroParameter("bucket number").into());
    }
    if config.num_jobs == 0 {
        return Err(ConfigError::ZeroParameter("job count").into());
    }

    let layout = StoreLayout::new(&config.store);
    let mut records = load_bucket(&layout, config)?;

    info!(
        "sorting bucket {:04}: {} overlaps",
        config.bucket,
        records.len()
    );
    records.sort_unstable();

    write_segment(&layout, config.bucket, &records)?;
    Ok(records.len() as u64)
}

/// Reads this bucket's slice from every bucketize job, verifying each
/// against the job's recorded count.
fn load_bucket(layout: &StoreLayout, config: &SorterConfig) -> Result<Vec<PackedOverlap>> {
    let mut records = Vec::new();
    for job in 1..=config.num_jobs {
        let expected = read_slice_size(layout, job, config.bucket)?;
        if expected == 0 {
            continue;
        }
        records.reserve(expected as usize);

        let plain = layout.slice_path(job, config.bucket, false);
        let path = if plain.is_file() {
            plain
        } else {
            layout.slice_path(job, config.bucket, true)
        };
        if !path.is_file() {
            return Err(SortError::MissingSlice {
                slice: path.display().to_string(),
                expected,
            }
            .into());
        }

        let mut reader = OverlapFileReader::open(&path, Framing::Full)?;
        let mut found = 0;
        while let Some(packed) = reader.read_overlap()? {
            records.push(packed);
            found += 1;
        }
        if found != expected {
            return Err(SortError::CountMismatch {
                slice: path.display().to_string(),
                expected,
                found,
            }
            .into());
        }
    }
    Ok(records)
}

/// Pulls one bucket's count out of a job's `sliceSizes` side file.
fn read_slice_size(layout: &StoreLayout, job: u32, bucket: u32) -> Result<u64> {
    let path = layout.slice_sizes_path(job);
    let mut file = File::open(&path)?;
    let len = file.metadata()?.len() as usize / std::mem::size_of::<u64>();
    if len <= bucket as usize {
        return Err(SortError::ShortSliceSizes {
            path: path.display().to_string(),
            found: len,
            expected: bucket as usize + 1,
        }
        .into());
    }
    // entry 0 is unused; entry `bucket` holds this bucket's count
    let mut count = 0;
    for _ in 0..=bucket {
        count = file.read_u64::<LittleEndian>()?;
    }
    Ok(count)
}

/// Writes the sorted block file plus its local index and header.
fn write_segment(layout: &StoreLayout, bucket: u32, records: &[PackedOverlap]) -> Result<()> {
    let mut writer = OverlapFileWriter::create(layout.block_path(bucket), Framing::Store)?;
    let mut info = StoreInfo::new(DEFAULT_OVERLAPS_PER_FILE);
    let mut index: Vec<OffsetRecord> = Vec::new();

    let mut pos = 0u32;
    for rec in records {
        writer.write_overlap(rec)?;
        info.note_overlap(rec.a_iid, bucket);
        match index.last_mut() {
            Some(last) if last.a_iid == rec.a_iid => last.num_olaps += 1,
            _ => {
                // fill the gap since the previous read with entries that
                // point at this record
                let from = index.last().map_or(rec.a_iid, |l| l.a_iid + 1);
                for iid in from..rec.a_iid {
                    index.push(OffsetRecord {
                        a_iid: iid,
                        fileno: bucket,
                        offset: pos,
                        num_olaps: 0,
                    });
                }
                index.push(OffsetRecord {
                    a_iid: rec.a_iid,
                    fileno: bucket,
                    offset: pos,
                    num_olaps: 1,
                });
            }
        }
        pos += 1;
    }
    writer.finish()?;

    fs::write(
        layout.segment_index_path(bucket),
        bytemuck::cast_slice(&index),
    )?;
    info.save(layout.segment_info_path(bucket))?;
    Ok(())
}
