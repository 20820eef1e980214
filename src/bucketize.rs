//! Stage one of the store build: fan overlaps out into ID-range buckets.
//!
//! Each bucketize job reads one batch of overlapper output and appends
//! every record to the slice file owning its `a_iid` range, under the
//! job's own `bucket####/` directory so concurrent jobs never share a
//! file. Mirrorable records are written twice, once per direction, which
//! is what lets the sorter see every overlap touching a read without a
//! second pass over the inputs.
//!
//! A `sliceSizes` side file records the per-slice record counts; the
//! sorter refuses to run if the counts and the files disagree.

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{info, warn};

use crate::error::{BucketError, ConfigError, Result};
use crate::file::{Framing, OverlapFileReader, OverlapFileWriter};
use crate::info::StoreLayout;
use crate::record::{encode_quality, OverlapDat, PackedOverlap};
use crate::FULL_RECORD_BYTES;

/// Error-rate ceiling for an overlap to be usable by trimming.
const TRIM_ERATE_CEILING: f64 = 0.08;

/// File handles held back from the slice-writer budget for inputs and
/// side files.
const RESERVED_HANDLES: usize = 16;

/// How the ID space is split into buckets.
#[derive(Clone, Copy, Debug)]
pub enum Partition {
    /// A fixed number of buckets.
    Files(u32),
    /// As many buckets as fit a per-sort memory budget, derived from the
    /// input file sizes. Inputs must be real files for this; streams have
    /// no size to measure.
    MemoryBytes(u64),
}

/// Which overlaps a bucketize job keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Keep everything.
    All,
    /// Keep overlaps usable by read trimming: error rate at or below the
    /// trimming ceiling.
    Trim,
    /// Keep duplicate-detection candidates: same library on both reads,
    /// neither read opted out, and not already claimed by trimming.
    Dedup,
}

/// Per-fragment library assignments and dedup opt-outs, loaded from a
/// whitespace-separated table of `iid library skip` rows.
#[derive(Clone, Debug, Default)]
pub struct FragmentInfo {
    iid_to_lib: Vec<u32>,
    skip: Vec<bool>,
}

impl FragmentInfo {
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut frags = FragmentInfo::default();
        for line in fs::read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(iid), Some(lib), Some(skip)) =
                (fields.next(), fields.next(), fields.next())
            else {
                warn!("skipping short fragment table row: '{line}'");
                continue;
            };
            let (Ok(iid), Ok(lib)) = (iid.parse::<usize>(), lib.parse::<u32>()) else {
                warn!("skipping unparsable fragment table row: '{line}'");
                continue;
            };
            if frags.iid_to_lib.len() <= iid {
                frags.iid_to_lib.resize(iid + 1, 0);
                frags.skip.resize(iid + 1, false);
            }
            frags.iid_to_lib[iid] = lib;
            frags.skip[iid] = skip == "1";
        }
        Ok(frags)
    }

    #[must_use]
    pub fn library(&self, iid: u32) -> u32 {
        self.iid_to_lib.get(iid as usize).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_skipped(&self, iid: u32) -> bool {
        self.skip.get(iid as usize).copied().unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct BucketizerConfig {
    /// Store directory; intermediates land under it.
    pub store: PathBuf,
    /// This job's 1-based number; names the `bucket####` directory.
    pub job: u32,
    /// Read-count bound; valid IDs are strictly below it.
    pub max_iid: u32,
    pub partition: Partition,
    /// Drop overlaps whose error rate exceeds this; raw records are
    /// judged on the corrected rate, trim records on their single evalue,
    /// seed records pass.
    pub max_error_rate: Option<f64>,
    pub filter: FilterMode,
    /// Compress slice files with zstd.
    pub compress: bool,
    /// Open-file budget for this process, queried by the caller; slice
    /// writers beyond it are a configuration error, not an `open` crash.
    pub max_open_files: usize,
}

#[derive(Debug, Default)]
struct SkipCounts {
    low_quality: u64,
    not_trimmable: u64,
    wrong_library: u64,
    opted_out: u64,
}

/// One bucketize job: opens every slice writer up front, streams the
/// inputs through the filters, and seals the bucket with its side file.
pub struct Bucketizer {
    layout: StoreLayout,
    config: BucketizerConfig,
    inputs: Vec<PathBuf>,
    frags: Option<FragmentInfo>,
    writers: Vec<OverlapFileWriter>,
    iid_per_bucket: u64,
    num_slices: u32,
    max_evalue: Option<u16>,
    trim_ceiling: u16,
    saved: u64,
    skips: SkipCounts,
}

impl Bucketizer {
    pub fn new(
        config: BucketizerConfig,
        inputs: Vec<PathBuf>,
        frags: Option<FragmentInfo>,
    ) -> Result<Self> {
        if config.max_iid == 0 {
            return Err(ConfigError::ZeroParameter("max_iid").into());
        }
        if config.job == 0 {
            return Err(ConfigError::ZeroParameter("job").into());
        }
        if config.filter == FilterMode::Dedup && frags.is_none() {
            return Err(ConfigError::MissingFragInfo("dedup").into());
        }

        let iid_per_bucket = iid_per_bucket(&config, &inputs)?;
        // the largest valid ID is max_iid - 1
        let num_slices = (u64::from(config.max_iid - 1) / iid_per_bucket + 1) as u32;

        let limit = config.max_open_files.saturating_sub(RESERVED_HANDLES);
        if num_slices as usize > limit {
            return Err(ConfigError::TooManyBuckets {
                needed: u64::from(num_slices),
                limit,
            }
            .into());
        }

        let layout = StoreLayout::new(&config.store);
        fs::create_dir_all(layout.bucket_dir(config.job))?;

        let mut writers = Vec::with_capacity(num_slices as usize);
        for slice in 1..=num_slices {
            let path = layout.slice_path(config.job, slice, config.compress);
            writers.push(OverlapFileWriter::create(path, Framing::Full)?);
        }

        info!(
            "bucketize job {}: {} slices of {} IDs each",
            config.job, num_slices, iid_per_bucket
        );

        Ok(Self {
            max_evalue: config.max_error_rate.map(encode_quality),
            trim_ceiling: encode_quality(TRIM_ERATE_CEILING),
            layout,
            config,
            inputs,
            frags,
            writers,
            iid_per_bucket,
            num_slices,
            saved: 0,
            skips: SkipCounts::default(),
        })
    }

    /// IDs covered by each slice.
    #[must_use]
    pub fn iid_per_bucket(&self) -> u64 {
        self.iid_per_bucket
    }

    #[must_use]
    pub fn num_slices(&self) -> u32 {
        self.num_slices
    }

    /// Streams every input file through the filters into the slices.
    pub fn run(&mut self) -> Result<()> {
        let inputs = std::mem::take(&mut self.inputs);
        for path in &inputs {
            info!("bucketizing '{}'", path.display());
            let mut reader = OverlapFileReader::open(path, Framing::Full)?;
            while let Some(packed) = reader.read_overlap()? {
                self.add(packed)?;
            }
        }
        Ok(())
    }

    fn add(&mut self, packed: PackedOverlap) -> Result<()> {
        if packed.a_iid == 0
            || packed.b_iid == 0
            || packed.a_iid >= self.config.max_iid
            || packed.b_iid >= self.config.max_iid
        {
            return Err(BucketError::IdOutOfRange {
                record: packed.to_string(),
                max_iid: self.config.max_iid,
            }
            .into());
        }

        let ovl = packed.unpack()?;
        if !self.keep(&ovl.dat, ovl.a_iid, ovl.b_iid) {
            return Ok(());
        }

        self.write_to_slice(&packed)?;
        if let Some(mirror) = ovl.flip() {
            self.write_to_slice(&mirror.pack()?)?;
        }
        self.saved += 1;
        Ok(())
    }

    fn keep(&mut self, dat: &OverlapDat, a_iid: u32, b_iid: u32) -> bool {
        let evalue = match dat {
            OverlapDat::Raw(r) => r.corr_evalue,
            OverlapDat::Trim(t) => t.evalue,
            OverlapDat::Seed(_) => 0,
        };
        // seed records carry no error rate and are exempt from the ceiling
        if let Some(cap) = self.max_evalue {
            if !matches!(dat, OverlapDat::Seed(_)) && evalue > cap {
                self.skips.low_quality += 1;
                return false;
            }
        }
        let trimmable = evalue <= self.trim_ceiling;
        match self.config.filter {
            FilterMode::All => true,
            FilterMode::Trim => {
                if trimmable {
                    true
                } else {
                    self.skips.not_trimmable += 1;
                    false
                }
            }
            FilterMode::Dedup => {
                // frags presence is checked at construction
                let Some(frags) = &self.frags else { return false };
                if trimmable {
                    self.skips.not_trimmable += 1;
                    false
                } else if frags.library(a_iid) != frags.library(b_iid) {
                    self.skips.wrong_library += 1;
                    false
                } else if frags.is_skipped(a_iid) {
                    self.skips.opted_out += 1;
                    false
                } else {
                    true
                }
            }
        }
    }

    fn write_to_slice(&mut self, packed: &PackedOverlap) -> Result<()> {
        let slice = u64::from(packed.a_iid) / self.iid_per_bucket + 1;
        if slice > u64::from(self.num_slices) {
            return Err(BucketError::SliceOutOfRange {
                record: packed.to_string(),
                slice,
                iid_per_bucket: self.iid_per_bucket,
                num_slices: self.num_slices,
            }
            .into());
        }
        self.writers[(slice - 1) as usize].write_overlap(packed)
    }

    /// Seals the bucket: closes the slices and writes `sliceSizes`.
    ///
    /// Returns the number of input overlaps kept (mirrored copies are not
    /// counted twice).
    pub fn finish(self) -> Result<u64> {
        let sizes_path = self.layout.slice_sizes_path(self.config.job);
        let mut counts = Vec::with_capacity(self.writers.len() + 1);
        counts.push(0u64);
        for writer in self.writers {
            counts.push(writer.finish()?);
        }

        let mut sizes = fs::File::create(sizes_path)?;
        for count in &counts {
            sizes.write_u64::<LittleEndian>(*count)?;
        }

        info!(
            "bucketize job {} done: {} overlaps kept, {} low quality, \
             {} not trimmable, {} wrong library, {} opted out",
            self.config.job,
            self.saved,
            self.skips.low_quality,
            self.skips.not_trimmable,
            self.skips.wrong_library,
            self.skips.opted_out,
        );
        Ok(self.saved)
    }
}

/// Derives the ID span of one bucket.
///
/// Under a memory budget, each bucket must sort in RAM, so the span is
/// sized from the expected overlaps per read: every input record fans out
/// to two sort records, and the total is spread evenly over the ID space.
fn iid_per_bucket(config: &BucketizerConfig, inputs: &[PathBuf]) -> Result<u64> {
    match config.partition {
        Partition::Files(n) => {
            if n == 0 {
                return Err(ConfigError::ZeroParameter("bucket count").into());
            }
            Ok(u64::from(config.max_iid).div_ceil(u64::from(n)))
        }
        Partition::MemoryBytes(bytes) => {
            if bytes == 0 {
                return Err(ConfigError::ZeroParameter("memory budget").into());
            }
            let mut num_overlaps = 0u64;
            for path in inputs {
                num_overlaps += 2 * (fs::metadata(path)?.len() / FULL_RECORD_BYTES as u64);
            }
            if num_overlaps == 0 {
                return Err(ConfigError::NoOverlaps.into());
            }
            let overlaps_per_bucket = bytes / FULL_RECORD_BYTES as u64;
            let overlaps_per_iid = num_overlaps / u64::from(config.max_iid) + 1;
            Ok(overlaps_per_bucket / overlaps_per_iid + 1)
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::record::{Overlap, RawDat, TrimDat};
    use byteorder::ReadBytesExt;
    use std::io::Read;

    fn temp_store(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ovlstore_bucketize_{}_{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn raw_overlap(a: u32, b: u32, corr: u16) -> PackedOverlap {
        Overlap {
            a_iid: a,
            b_iid: b,
            dat: OverlapDat::Raw(RawDat {
                a_hang: 10,
                b_hang: -10,
                flipped: false,
                orig_evalue: corr,
                corr_evalue: corr,
            }),
        }
        .pack()
        .unwrap()
    }

    fn write_input(path: &Path, records: &[PackedOverlap]) {
        let mut writer = OverlapFileWriter::create(path, Framing::Full).unwrap();
        for r in records {
            writer.write_overlap(r).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_slice_sizes(path: &Path) -> Vec<u64> {
        let mut file = fs::File::open(path).unwrap();
        let mut sizes = Vec::new();
        loop {
            match file.read_u64::<LittleEndian>() {
                Ok(v) => sizes.push(v),
                Err(_) => break,
            }
        }
        sizes
    }

    fn config(store: &Path, partition: Partition) -> BucketizerConfig {
        BucketizerConfig {
            store: store.to_path_buf(),
            job: 1,
            max_iid: 100,
            partition,
            max_error_rate: None,
            filter: FilterMode::All,
            compress: false,
            max_open_files: 1024,
        }
    }

    #[test]
    fn test_fan_out_and_mirror() {
        let store = temp_store("fanout");
        let input = store.join("input.ovb");
        // a=5 lands in slice 1, b=95 mirrors into slice 4
        write_input(&input, &[raw_overlap(5, 95, 100)]);

        let cfg = config(&store, Partition::Files(4));
        let mut bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        assert_eq!(bucketizer.iid_per_bucket(), 25);
        assert_eq!(bucketizer.num_slices(), 4);
        bucketizer.run().unwrap();
        assert_eq!(bucketizer.finish().unwrap(), 1);

        let layout = StoreLayout::new(&store);
        let sizes = read_slice_sizes(&layout.slice_sizes_path(1));
        assert_eq!(sizes, vec![0, 1, 0, 0, 1]);

        let mut reader =
            OverlapFileReader::open(layout.slice_path(1, 4, false), Framing::Full).unwrap();
        let mirrored = reader.read_overlap().unwrap().unwrap();
        assert_eq!(mirrored.a_iid, 95);
        assert_eq!(mirrored.b_iid, 5);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_mirror_negates_hangs() {
        let store = temp_store("mirror");
        let input = store.join("input.ovb");
        write_input(&input, &[raw_overlap(1, 2, 100)]);

        let mut bucketizer =
            Bucketizer::new(config(&store, Partition::Files(1)), vec![input], None).unwrap();
        bucketizer.run().unwrap();
        bucketizer.finish().unwrap();

        let layout = StoreLayout::new(&store);
        let mut reader =
            OverlapFileReader::open(layout.slice_path(1, 1, false), Framing::Full).unwrap();
        let original = reader.read_overlap().unwrap().unwrap().unpack().unwrap();
        let mirror = reader.read_overlap().unwrap().unwrap().unpack().unwrap();
        let (OverlapDat::Raw(o), OverlapDat::Raw(m)) = (original.dat, mirror.dat) else {
            panic!("wrong kind");
        };
        assert_eq!((o.a_hang, o.b_hang), (10, -10));
        assert_eq!((m.a_hang, m.b_hang), (-10, 10));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_id_out_of_range_is_fatal() {
        let store = temp_store("badid");
        let input = store.join("input.ovb");
        write_input(&input, &[raw_overlap(5, 101, 100)]);

        let mut bucketizer =
            Bucketizer::new(config(&store, Partition::Files(2)), vec![input], None).unwrap();
        let err = bucketizer.run().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::BucketError(BucketError::IdOutOfRange { .. })
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_error_rate_filter() {
        let store = temp_store("erate");
        let input = store.join("input.ovb");
        write_input(
            &input,
            &[
                raw_overlap(1, 2, encode_quality(0.01)),
                raw_overlap(3, 4, encode_quality(0.05)),
            ],
        );

        let mut cfg = config(&store, Partition::Files(1));
        cfg.max_error_rate = Some(0.02);
        let mut bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        bucketizer.run().unwrap();
        assert_eq!(bucketizer.finish().unwrap(), 1);

        let sizes = read_slice_sizes(&StoreLayout::new(&store).slice_sizes_path(1));
        assert_eq!(sizes, vec![0, 2]);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_error_rate_filter_covers_trim_records() {
        let store = temp_store("eratetrim");
        let input = store.join("input.ovb");
        let trim = |a: u32, b: u32, erate: f64| {
            Overlap {
                a_iid: a,
                b_iid: b,
                dat: OverlapDat::Trim(TrimDat {
                    evalue: encode_quality(erate),
                    ..TrimDat::default()
                }),
            }
            .pack()
            .unwrap()
        };
        write_input(&input, &[trim(1, 2, 0.01), trim(3, 4, 0.30)]);

        let mut cfg = config(&store, Partition::Files(1));
        cfg.max_error_rate = Some(0.02);
        let mut bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        bucketizer.run().unwrap();
        assert_eq!(bucketizer.finish().unwrap(), 1);

        let sizes = read_slice_sizes(&StoreLayout::new(&store).slice_sizes_path(1));
        assert_eq!(sizes, vec![0, 2]);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_trim_filter_drops_high_error() {
        let store = temp_store("trim");
        let input = store.join("input.ovb");
        let good = Overlap {
            a_iid: 1,
            b_iid: 2,
            dat: OverlapDat::Trim(TrimDat {
                fwd: true,
                a_beg: 0,
                a_end: 100,
                b_beg: 0,
                b_end: 100,
                evalue: encode_quality(0.05),
            }),
        }
        .pack()
        .unwrap();
        let bad = Overlap {
            a_iid: 3,
            b_iid: 4,
            dat: OverlapDat::Trim(TrimDat {
                evalue: encode_quality(0.20),
                ..TrimDat::default()
            }),
        }
        .pack()
        .unwrap();
        write_input(&input, &[good, bad]);

        let mut cfg = config(&store, Partition::Files(1));
        cfg.filter = FilterMode::Trim;
        let mut bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        bucketizer.run().unwrap();
        assert_eq!(bucketizer.finish().unwrap(), 1);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_dedup_requires_fragment_table() {
        let store = temp_store("dedupcfg");
        let mut cfg = config(&store, Partition::Files(1));
        cfg.filter = FilterMode::Dedup;
        assert!(matches!(
            Bucketizer::new(cfg, vec![], None),
            Err(crate::Error::ConfigError(ConfigError::MissingFragInfo(_)))
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_dedup_filter_rules() {
        let store = temp_store("dedup");
        let input = store.join("input.ovb");
        // all high-error so the trim path does not claim them
        write_input(
            &input,
            &[
                raw_overlap(1, 2, encode_quality(0.20)), // same library, kept
                raw_overlap(1, 3, encode_quality(0.20)), // cross library
                raw_overlap(4, 2, encode_quality(0.20)), // A opted out
            ],
        );
        let table = store.join("frags.tsv");
        fs::write(&table, "1 10 0\n2 10 0\n3 20 0\n4 10 1\n").unwrap();

        let mut cfg = config(&store, Partition::Files(1));
        cfg.filter = FilterMode::Dedup;
        let frags = FragmentInfo::from_tsv(&table).unwrap();
        let mut bucketizer = Bucketizer::new(cfg, vec![input], Some(frags)).unwrap();
        bucketizer.run().unwrap();
        assert_eq!(bucketizer.finish().unwrap(), 1);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_memory_partition_sizing() {
        let store = temp_store("memory");
        let input = store.join("input.ovb");
        let records: Vec<PackedOverlap> =
            (1..=50).map(|i| raw_overlap(i, i + 50, 100)).collect();
        write_input(&input, &records);

        // 100 sort records over 100 IDs rounds up to 2 per ID; a 320-byte
        // budget holds 20 records, so 20/2 + 1 = 11 IDs per bucket
        let cfg = config(&store, Partition::MemoryBytes(320));
        let bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        assert_eq!(bucketizer.iid_per_bucket(), 11);
        assert_eq!(bucketizer.num_slices(), 10);
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_slice_count_over_file_budget() {
        let store = temp_store("fdlimit");
        let mut cfg = config(&store, Partition::Files(50));
        cfg.max_open_files = RESERVED_HANDLES + 10;
        assert!(matches!(
            Bucketizer::new(cfg, vec![], None),
            Err(crate::Error::ConfigError(ConfigError::TooManyBuckets { limit: 10, .. }))
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_empty_inputs_with_memory_budget() {
        let store = temp_store("empty");
        let cfg = config(&store, Partition::MemoryBytes(1 << 20));
        assert!(matches!(
            Bucketizer::new(cfg, vec![], None),
            Err(crate::Error::ConfigError(ConfigError::NoOverlaps))
        ));
        fs::remove_dir_all(&store).unwrap();
    }

    #[test]
    fn test_compressed_slices() {
        let store = temp_store("zst");
        let input = store.join("input.ovb");
        write_input(&input, &[raw_overlap(1, 2, 100)]);

        let mut cfg = config(&store, Partition::Files(1));
        cfg.compress = true;
        let mut bucketizer = Bucketizer::new(cfg, vec![input], None).unwrap();
        bucketizer.run().unwrap();
        bucketizer.finish().unwrap();

        let layout = StoreLayout::new(&store);
        assert!(layout.slice_path(1, 1, true).is_file());
        let mut reader =
            OverlapFileReader::open(layout.slice_path(1, 1, true), Framing::Full).unwrap();
        assert!(reader.read_overlap().unwrap().is_some());
        fs::remove_dir_all(&store).unwrap();
    }
}
