//! Stage three of the store build: splice the per-bucket indexes into
//! one dense global index and seal the store.
//!
//! Block files were written in their final place by the sorter, so this
//! stage never touches overlap data. It concatenates the local indexes
//! in bucket order, manufacturing a zero-count entry for every read ID
//! that owns no overlaps (the reserved ID 0, interior gaps, and IDs past
//! the last overlap, up to `max_iid`) so the index is dense over the
//! whole ID space. Each filler
//! points at the next record that does exist, letting a range scan start
//! anywhere.
//!
//! The store is only sealed, and intermediates only deleted, after the
//! fresh index verifies clean.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::error::{IndexError, MergeError, ReadError, Result};
use crate::info::{OffsetRecord, StoreInfo, StoreLayout};
use crate::DEFAULT_OVERLAPS_PER_FILE;

#[derive(Clone, Debug)]
pub struct MergerConfig {
    pub store: PathBuf,
    pub num_buckets: u32,
    /// Highest read ID the index must cover.
    pub max_iid: u32,
    /// Remove bucket directories and segment files once the merged index
    /// verifies clean.
    pub delete_intermediates: bool,
}

/// Zero-count index entries for a run of reads owning no overlaps, each
/// pointing at the next record that exists.
struct GapFiller {
    next_iid: u32,
    end: u32,
    fileno: u32,
    offset: u32,
}

impl GapFiller {
    fn new(from: u32, to_exclusive: u32, next_fileno: u32, next_offset: u32) -> Self {
        Self {
            next_iid: from,
            end: to_exclusive,
            fileno: next_fileno,
            offset: next_offset,
        }
    }
}

impl Iterator for GapFiller {
    type Item = OffsetRecord;

    fn next(&mut self) -> Option<OffsetRecord> {
        if self.next_iid >= self.end {
            return None;
        }
        let entry = OffsetRecord {
            a_iid: self.next_iid,
            fileno: self.fileno,
            offset: self.offset,
            num_olaps: 0,
        };
        self.next_iid += 1;
        Some(entry)
    }
}

/// Merges every sorted segment into the final store.
///
/// Returns the sealed store header. Fails without touching the store if
/// any segment is incomplete, and without deleting intermediates if the
/// merged index does not verify.
pub fn merge_segments(config: &MergerConfig) -> Result<StoreInfo> {
    let layout = StoreLayout::new(&config.store);
    check_segments_complete(&layout, config.num_buckets)?;

    let mut index: Vec<OffsetRecord> = Vec::with_capacity(config.max_iid as usize + 1);
    let mut info = StoreInfo::new(DEFAULT_OVERLAPS_PER_FILE);
    // ID 0 never owns a record but still gets an index entry
    let mut next_iid = 0u32;
    // where a record after the last real one would land
    let mut end_fileno = 1u32;
    let mut end_offset = 0u32;

    for bucket in 1..=config.num_buckets {
        let segment = load_segment_index(&layout.segment_index_path(bucket))?;
        info.merge(&StoreInfo::load(layout.segment_info_path(bucket))?);
        let (Some(first), Some(last)) = (segment.first(), segment.last()) else {
            continue;
        };
        if first.a_iid < next_iid {
            return Err(MergeError::SegmentOutOfOrder {
                segment: bucket,
                found: first.a_iid,
                expected: next_iid,
            }
            .into());
        }
        index.extend(GapFiller::new(next_iid, first.a_iid, first.fileno, first.offset));
        next_iid = last.a_iid + 1;
        end_fileno = last.fileno;
        end_offset = last.offset + last.num_olaps;
        index.extend(segment);
    }
    index.extend(GapFiller::new(
        next_iid,
        config.max_iid + 1,
        end_fileno,
        end_offset,
    ));

    fs::write(layout.index_path(), bytemuck::cast_slice(&index))?;
    info.save(layout.info_path())?;
    info!(
        "merged {} segments: {} overlaps over reads {}..{}",
        config.num_buckets,
        info.num_overlaps(),
        info.smallest_iid(),
        info.largest_iid()
    );

    let errors = test_index(&config.store, false)?;
    if errors > 0 {
        return Err(MergeError::VerifyFailed(errors).into());
    }

    if config.delete_intermediates {
        delete_intermediates(&layout, config.num_buckets)?;
    }
    Ok(info)
}

/// Confirms every sort job finished; each missing file is logged before
/// the stage gives up.
fn check_segments_complete(layout: &StoreLayout, num_buckets: u32) -> Result<()> {
    let mut failed = 0;
    for bucket in 1..=num_buckets {
        for path in [
            layout.block_path(bucket),
            layout.segment_index_path(bucket),
            layout.segment_info_path(bucket),
        ] {
            if !path.is_file() {
                error!("segment {bucket:04} is missing '{}'", path.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(MergeError::IncompleteSegments {
            failed,
            expected: num_buckets,
        }
        .into());
    }
    Ok(())
}

fn load_segment_index(path: &Path) -> Result<Vec<OffsetRecord>> {
    let bytes = fs::read(path)?;
    let entry = std::mem::size_of::<OffsetRecord>();
    if bytes.len() % entry != 0 {
        return Err(ReadError::RaggedIndex(path.display().to_string(), bytes.len() as u64).into());
    }
    Ok(bytes
        .chunks_exact(entry)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Checks the global index for decreases and gaps in the ID sequence.
///
/// Returns the number of bad entries; each one is logged. With `fix`
/// set, a repaired copy with a strictly continuous ID sequence is
/// written to `idx.fixed` for inspection, never over the live index.
pub fn test_index<P: AsRef<Path>>(store: P, fix: bool) -> Result<u64> {
    let layout = StoreLayout::new(store);
    let mut index = load_segment_index(&layout.index_path())?;

    let mut errors = 0u64;
    let mut expected = index.first().map_or(0, |e| e.a_iid);
    for entry in &mut index {
        if entry.a_iid != expected {
            let problem = if entry.a_iid < expected {
                IndexError::Decreased {
                    from: expected.wrapping_sub(1),
                    to: entry.a_iid,
                }
            } else {
                IndexError::Gap {
                    from: expected.wrapping_sub(1),
                    to: entry.a_iid,
                }
            };
            error!("{problem}");
            errors += 1;
            if fix {
                entry.a_iid = expected;
            }
        }
        expected = expected.wrapping_add(1);
    }

    if fix && errors > 0 {
        fs::write(layout.fixed_index_path(), bytemuck::cast_slice(&index))?;
        info!(
            "wrote repaired index with {errors} corrected entries to '{}'",
            layout.fixed_index_path().display()
        );
    }
    Ok(errors)
}

fn delete_intermediates(layout: &StoreLayout, num_buckets: u32) -> Result<()> {
    for entry in fs::read_dir(layout.root())? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("bucket")
            && entry.file_type()?.is_dir()
        {
            fs::remove_dir_all(entry.path())?;
        }
    }
    for bucket in 1..=num_buckets {
        fs::remove_file(layout.segment_index_path(bucket))?;
        fs::remove_file(layout.segment_info_path(bucket))?;
    }
    Ok(())
}
