//! Legacy single-pass store construction.
//!
//! Takes a stream that is already sorted by `a_iid` and lays down block
//! files, index, and header in one pass, with no sort buffer. Block
//! files roll on a fixed record count, so one read's records may
//! straddle a file boundary; the reader handles that by rolling on EOF.
//! Useful for small inputs and for rewriting an existing store; the
//! bucketize/sort/merge pipeline replaces it at scale.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::{Result, WriteError};
use crate::file::{Framing, OverlapFileWriter};
use crate::info::{OffsetRecord, StoreInfo, StoreLayout};
use crate::record::PackedOverlap;
use crate::DEFAULT_OVERLAPS_PER_FILE;

pub struct StoreWriter {
    layout: StoreLayout,
    info: StoreInfo,
    index: Vec<OffsetRecord>,
    block: OverlapFileWriter,
    fileno: u32,
    in_file: u64,
    overlaps_per_file: u64,
    last_iid: u32,
    /// Index entries are padded out to this ID at close.
    max_iid: Option<u32>,
}

impl StoreWriter {
    /// Creates a new store directory.
    ///
    /// Refuses the standard streams and refuses to clobber a directory
    /// that already holds a finished store. With `max_iid` given, the
    /// index is padded to cover every read ID; otherwise it ends at the
    /// last read seen.
    pub fn create<P: AsRef<Path>>(store: P, max_iid: Option<u32>) -> Result<Self> {
        Self::with_overlaps_per_file(store, max_iid, DEFAULT_OVERLAPS_PER_FILE)
    }

    pub fn with_overlaps_per_file<P: AsRef<Path>>(
        store: P,
        max_iid: Option<u32>,
        overlaps_per_file: u64,
    ) -> Result<Self> {
        let store = store.as_ref();
        if store == Path::new("-") {
            return Err(WriteError::StdStreamStore.into());
        }
        let layout = StoreLayout::new(store);
        if layout.is_store() {
            return Err(WriteError::StoreExists(store.display().to_string()).into());
        }
        fs::create_dir_all(layout.root())?;

        let block = OverlapFileWriter::create(layout.block_path(1), Framing::Store)?;
        // ID 0 never owns a record; its entry points at the first one
        let index = vec![OffsetRecord {
            a_iid: 0,
            fileno: 1,
            offset: 0,
            num_olaps: 0,
        }];
        Ok(Self {
            layout,
            info: StoreInfo::new(overlaps_per_file),
            index,
            block,
            fileno: 1,
            in_file: 0,
            overlaps_per_file,
            last_iid: 0,
            max_iid,
        })
    }

    /// Appends one overlap; `a_iid` must be non-zero and never decrease.
    pub fn append(&mut self, ovl: &PackedOverlap) -> Result<()> {
        if ovl.a_iid == 0 {
            return Err(WriteError::ZeroReadId { b_iid: ovl.b_iid }.into());
        }
        if ovl.a_iid < self.last_iid {
            return Err(WriteError::MisorderedOverlap {
                last: self.last_iid,
                a_iid: ovl.a_iid,
                b_iid: ovl.b_iid,
            }
            .into());
        }
        if self.in_file >= self.overlaps_per_file {
            self.roll_block()?;
        }

        match self.index.last_mut() {
            Some(last) if last.a_iid == ovl.a_iid => last.num_olaps += 1,
            _ => {
                // reads between the previous one and this one own nothing;
                // their entries point here
                self.index.extend((self.last_iid + 1..ovl.a_iid).map(|iid| OffsetRecord {
                    a_iid: iid,
                    fileno: self.fileno,
                    offset: self.in_file as u32,
                    num_olaps: 0,
                }));
                self.index.push(OffsetRecord {
                    a_iid: ovl.a_iid,
                    fileno: self.fileno,
                    offset: self.in_file as u32,
                    num_olaps: 1,
                });
            }
        }

        self.block.write_overlap(ovl)?;
        self.in_file += 1;
        self.info.note_overlap(ovl.a_iid, self.fileno);
        self.last_iid = ovl.a_iid;
        Ok(())
    }

    fn roll_block(&mut self) -> Result<()> {
        let done = std::mem::replace(
            &mut self.block,
            OverlapFileWriter::create(self.layout.block_path(self.fileno + 1), Framing::Store)?,
        );
        done.finish()?;
        self.fileno += 1;
        self.in_file = 0;
        Ok(())
    }

    /// Seals the store: pads the index, writes `idx` and `ovs`.
    pub fn close(mut self) -> Result<StoreInfo> {
        self.block.finish()?;
        if let Some(max_iid) = self.max_iid {
            self.index
                .extend((self.last_iid + 1..=max_iid).map(|iid| OffsetRecord {
                    a_iid: iid,
                    fileno: self.fileno,
                    offset: self.in_file as u32,
                    num_olaps: 0,
                }));
        }
        fs::write(self.layout.index_path(), bytemuck::cast_slice(&self.index))?;
        self.info.save(self.layout.info_path())?;
        info!(
            "store '{}' sealed: {} overlaps in {} block files",
            self.layout.root().display(),
            self.info.num_overlaps(),
            self.fileno
        );
        Ok(self.info)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::read::StoreReader;
    use crate::record::{Overlap, OverlapDat, RawDat};
    use std::path::PathBuf;

    fn temp_store(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("ovlstore_write_{}_{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn overlap(a: u32, b: u32) -> PackedOverlap {
        Overlap {
            a_iid: a,
            b_iid: b,
            dat: OverlapDat::Raw(RawDat {
                a_hang: 2,
                b_hang: -2,
                flipped: true,
                orig_evalue: 30,
                corr_evalue: 30,
            }),
        }
        .pack()
        .unwrap()
    }

    #[test]
    fn test_write_then_read_back() {
        let store = temp_store("roundtrip");
        let mut writer = StoreWriter::create(&store, Some(10)).unwrap();
        for ovl in [overlap(2, 5), overlap(2, 9), overlap(4, 1)] {
            writer.append(&ovl).unwrap();
        }
        let info = writer.close().unwrap();
        assert_eq!(info.num_overlaps(), 3);
        assert_eq!(info.smallest_iid(), 2);
        assert_eq!(info.largest_iid(), 4);

        let mut reader = StoreReader::open(&store).unwrap();
        let mut seen = Vec::new();
        while let Some(ovl) = reader.read_next().unwrap() {
            seen.push((ovl.a_iid, ovl.b_iid));
        }
        assert_eq!(seen, vec![(2, 5), (2, 9), (4, 1)]);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_records_straddle_block_files() {
        let store = temp_store("straddle");
        // 2 records per file; read 1 owns 5, spanning three block files
        let mut writer = StoreWriter::with_overlaps_per_file(&store, Some(3), 2).unwrap();
        for b in 2..=6 {
            writer.append(&overlap(1, b)).unwrap();
        }
        writer.append(&overlap(3, 1)).unwrap();
        let info = writer.close().unwrap();
        assert_eq!(info.highest_file_index(), 3);

        let layout = StoreLayout::new(&store);
        assert_eq!(fs::metadata(layout.block_path(1)).unwrap().len(), 24);
        assert_eq!(fs::metadata(layout.block_path(3)).unwrap().len(), 24);

        let mut reader = StoreReader::open(&store).unwrap();
        let mut seen = Vec::new();
        while let Some(ovl) = reader.read_next().unwrap() {
            seen.push((ovl.a_iid, ovl.b_iid));
        }
        assert_eq!(
            seen,
            vec![(1, 2), (1, 3), (1, 4), (1, 5), (1, 6), (3, 1)]
        );

        // a range excluding read 1 still lands mid-stream correctly
        reader.set_range(2, 3).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().a_iid, 3);
        assert!(reader.read_next().unwrap().is_none());
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_misordered_append_is_fatal() {
        let store = temp_store("misorder");
        let mut writer = StoreWriter::create(&store, None).unwrap();
        writer.append(&overlap(5, 1)).unwrap();
        let err = writer.append(&overlap(4, 2)).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::MisorderedOverlap {
                last: 5,
                a_iid: 4,
                b_iid: 2,
            })
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_zero_a_iid_is_fatal() {
        let store = temp_store("zeroid");
        let mut writer = StoreWriter::create(&store, Some(4)).unwrap();
        let err = writer.append(&overlap(0, 2)).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::ZeroReadId { b_iid: 2 })
        ));

        // a valid stream after the rejection still reads back cleanly
        writer.append(&overlap(1, 2)).unwrap();
        writer.close().unwrap();
        let mut reader = StoreReader::open(&store).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().a_iid, 1);
        assert!(reader.read_next().unwrap().is_none());
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_refuses_std_streams_and_existing_store() {
        assert!(matches!(
            StoreWriter::create("-", None),
            Err(crate::Error::WriteError(WriteError::StdStreamStore))
        ));

        let store = temp_store("exists");
        let mut writer = StoreWriter::create(&store, Some(2)).unwrap();
        writer.append(&overlap(1, 2)).unwrap();
        writer.close().unwrap();
        assert!(matches!(
            StoreWriter::create(&store, None),
            Err(crate::Error::WriteError(WriteError::StoreExists(_)))
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_index_is_dense_with_padding() {
        let store = temp_store("dense");
        let mut writer = StoreWriter::create(&store, Some(8)).unwrap();
        writer.append(&overlap(3, 1)).unwrap();
        writer.append(&overlap(6, 2)).unwrap();
        writer.close().unwrap();

        let bytes = fs::read(StoreLayout::new(&store).index_path()).unwrap();
        let index: Vec<OffsetRecord> = bytes
            .chunks_exact(std::mem::size_of::<OffsetRecord>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(index.len(), 9);
        assert_eq!(
            index.iter().map(|e| (e.a_iid, e.num_olaps)).collect::<Vec<_>>(),
            vec![
                (0, 0),
                (1, 0),
                (2, 0),
                (3, 1),
                (4, 0),
                (5, 0),
                (6, 1),
                (7, 0),
                (8, 0)
            ]
        );
        // ID 0 and the leading gaps point at the first record, interior
        // gaps at read 6
        assert_eq!(index[0].offset, 0);
        assert_eq!(index[2].offset, 0);
        assert_eq!(index[4].offset, 1);
        assert_eq!(index[8].offset, 2);
        fs::remove_dir_all(&store).unwrap();
    }
}
