//! Flat binary overlap files.
//!
//! Two framings share one reader/writer pair. Full framing (16 bytes per
//! record) carries both read IDs and is used for overlapper output and
//! bucket slices. Store framing (12 bytes) drops `a_iid`, which a store
//! block file reconstructs from the index.
//!
//! The path `"-"` names the standard streams. A `.zst` suffix selects
//! zstd stream compression; compressed sources and the standard streams
//! cannot seek.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ReadError, Result};
use crate::record::PackedOverlap;
use crate::{FULL_RECORD_BYTES, STORE_RECORD_BYTES};

const IO_BUFFER_BYTES: usize = 1024 * 1024;

/// Buffer capacity rounded down to a whole number of records, so a
/// flush or refill never splits one.
fn buffer_bytes(framing: Framing) -> usize {
    IO_BUFFER_BYTES / framing.record_bytes() * framing.record_bytes()
}

/// On-disk record framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// `a_iid`, `b_iid`, payload word.
    Full,
    /// `b_iid`, payload word; `a_iid` comes from the store index.
    Store,
}

impl Framing {
    /// Bytes per record under this framing.
    #[must_use]
    pub fn record_bytes(self) -> usize {
        match self {
            Framing::Full => FULL_RECORD_BYTES,
            Framing::Store => STORE_RECORD_BYTES,
        }
    }
}

fn is_zstd(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "zst")
}

enum Sink {
    Plain(BufWriter<File>),
    Stdout(BufWriter<io::Stdout>),
    Zstd(zstd::stream::AutoFinishEncoder<'static, BufWriter<File>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Stdout(w) => w.write(buf),
            Sink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Stdout(w) => w.flush(),
            Sink::Zstd(w) => w.flush(),
        }
    }
}

/// Writes packed overlap records to a file, stdout, or a zstd stream.
pub struct OverlapFileWriter {
    sink: Sink,
    framing: Framing,
    written: u64,
}

impl OverlapFileWriter {
    /// Creates (or truncates) an overlap file.
    ///
    /// Compression is chosen by the path suffix, stdout by the path `"-"`.
    pub fn create<P: AsRef<Path>>(path: P, framing: Framing) -> Result<Self> {
        let path = path.as_ref();
        let sink = if path == Path::new("-") {
            Sink::Stdout(BufWriter::with_capacity(buffer_bytes(framing), io::stdout()))
        } else {
            let file = BufWriter::with_capacity(buffer_bytes(framing), File::create(path)?);
            if is_zstd(path) {
                Sink::Zstd(zstd::Encoder::new(file, 0)?.auto_finish())
            } else {
                Sink::Plain(file)
            }
        };
        Ok(Self {
            sink,
            framing,
            written: 0,
        })
    }

    /// Appends one record.
    pub fn write_overlap(&mut self, ovl: &PackedOverlap) -> Result<()> {
        if self.framing == Framing::Full {
            self.sink.write_u32::<LittleEndian>(ovl.a_iid)?;
        }
        self.sink.write_u32::<LittleEndian>(ovl.b_iid)?;
        self.sink.write_u64::<LittleEndian>(ovl.dat)?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn num_written(&self) -> u64 {
        self.written
    }

    /// Flushes and closes the file, returning the record count.
    pub fn finish(mut self) -> Result<u64> {
        self.sink.flush()?;
        Ok(self.written)
    }
}

enum Source {
    Plain(BufReader<File>),
    Stdin(BufReader<io::Stdin>),
    Zstd(zstd::Decoder<'static, BufReader<File>>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Stdin(r) => r.read(buf),
            Source::Zstd(r) => r.read(buf),
        }
    }
}

/// Reads packed overlap records from a file, stdin, or a zstd stream.
pub struct OverlapFileReader {
    source: Source,
    framing: Framing,
    path: PathBuf,
}

impl OverlapFileReader {
    /// Opens an overlap file; `"-"` reads stdin, `.zst` decompresses.
    pub fn open<P: AsRef<Path>>(path: P, framing: Framing) -> Result<Self> {
        let path = path.as_ref();
        let source = if path == Path::new("-") {
            Source::Stdin(BufReader::with_capacity(buffer_bytes(framing), io::stdin()))
        } else if is_zstd(path) {
            Source::Zstd(zstd::Decoder::new(File::open(path)?)?)
        } else {
            Source::Plain(BufReader::with_capacity(buffer_bytes(framing), File::open(path)?))
        };
        Ok(Self {
            source,
            framing,
            path: path.to_path_buf(),
        })
    }

    /// Reads the next record, or `None` at a clean end of stream.
    ///
    /// Store-framed records come back with `a_iid` zero; the caller owns
    /// reconstructing it from the index. Trailing bytes that do not form
    /// a whole record are an error, never silently dropped.
    pub fn read_overlap(&mut self) -> Result<Option<PackedOverlap>> {
        let want = self.framing.record_bytes();
        let mut buf = [0u8; FULL_RECORD_BYTES];
        let mut got = 0;
        while got < want {
            let n = self.source.read(&mut buf[got..want])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        if got == 0 {
            return Ok(None);
        }
        if got < want {
            return Err(ReadError::PartialRecord(got).into());
        }
        let mut cursor = &buf[..want];
        let a_iid = if self.framing == Framing::Full {
            cursor.read_u32::<LittleEndian>()?
        } else {
            0
        };
        Ok(Some(PackedOverlap {
            a_iid,
            b_iid: cursor.read_u32::<LittleEndian>()?,
            dat: cursor.read_u64::<LittleEndian>()?,
        }))
    }

    /// Positions the reader at record `recno`.
    ///
    /// Only plain files can seek; stdin and compressed streams return
    /// [`ReadError::NotSeekable`].
    pub fn seek_to_record(&mut self, recno: u64) -> Result<()> {
        let offset = recno * self.framing.record_bytes() as u64;
        match &mut self.source {
            Source::Plain(r) => {
                r.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
            Source::Stdin(_) | Source::Zstd(_) => {
                Err(ReadError::NotSeekable(self.path.display().to_string()).into())
            }
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ovlstore_file_{}_{name}", std::process::id()))
    }

    fn sample(n: u32) -> Vec<PackedOverlap> {
        (1..=n)
            .map(|i| PackedOverlap {
                a_iid: i,
                b_iid: i * 2 + 1,
                dat: (1u64 << 62) | u64::from(i) * 37,
            })
            .collect()
    }

    #[test]
    fn test_buffer_is_a_record_multiple() {
        assert_eq!(buffer_bytes(Framing::Full), 1024 * 1024);
        assert_eq!(buffer_bytes(Framing::Store), 1_048_572);
        assert_eq!(buffer_bytes(Framing::Store) % STORE_RECORD_BYTES, 0);
    }

    #[test]
    fn test_full_framing_round_trip() {
        let path = temp_path("full");
        let records = sample(100);
        let mut writer = OverlapFileWriter::create(&path, Framing::Full).unwrap();
        for r in &records {
            writer.write_overlap(r).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 100);
        assert_eq!(fs::metadata(&path).unwrap().len(), 1600);

        let mut reader = OverlapFileReader::open(&path, Framing::Full).unwrap();
        let mut seen = Vec::new();
        while let Some(r) = reader.read_overlap().unwrap() {
            seen.push(r);
        }
        assert_eq!(seen, records);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_store_framing_drops_a_iid() {
        let path = temp_path("store");
        let records = sample(10);
        let mut writer = OverlapFileWriter::create(&path, Framing::Store).unwrap();
        for r in &records {
            writer.write_overlap(r).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 120);

        let mut reader = OverlapFileReader::open(&path, Framing::Store).unwrap();
        for r in &records {
            let got = reader.read_overlap().unwrap().unwrap();
            assert_eq!(got.a_iid, 0);
            assert_eq!(got.b_iid, r.b_iid);
            assert_eq!(got.dat, r.dat);
        }
        assert!(reader.read_overlap().unwrap().is_none());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_zstd_round_trip() {
        let path = temp_path("comp.zst");
        let records = sample(1000);
        let mut writer = OverlapFileWriter::create(&path, Framing::Full).unwrap();
        for r in &records {
            writer.write_overlap(r).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = OverlapFileReader::open(&path, Framing::Full).unwrap();
        let mut count = 0;
        while let Some(r) = reader.read_overlap().unwrap() {
            assert_eq!(r, records[count]);
            count += 1;
        }
        assert_eq!(count, 1000);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_partial_record_is_an_error() {
        let path = temp_path("partial");
        fs::write(&path, [0u8; FULL_RECORD_BYTES + 5]).unwrap();
        let mut reader = OverlapFileReader::open(&path, Framing::Full).unwrap();
        assert!(reader.read_overlap().unwrap().is_some());
        assert!(matches!(
            reader.read_overlap(),
            Err(crate::Error::ReadError(ReadError::PartialRecord(5)))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_seek_to_record() {
        let path = temp_path("seek");
        let records = sample(50);
        let mut writer = OverlapFileWriter::create(&path, Framing::Full).unwrap();
        for r in &records {
            writer.write_overlap(r).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = OverlapFileReader::open(&path, Framing::Full).unwrap();
        reader.seek_to_record(30).unwrap();
        assert_eq!(reader.read_overlap().unwrap().unwrap(), records[30]);
        reader.seek_to_record(0).unwrap();
        assert_eq!(reader.read_overlap().unwrap().unwrap(), records[0]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_compressed_cannot_seek() {
        let path = temp_path("noseek.zst");
        let mut writer = OverlapFileWriter::create(&path, Framing::Full).unwrap();
        writer.write_overlap(&sample(1)[0]).unwrap();
        writer.finish().unwrap();

        let mut reader = OverlapFileReader::open(&path, Framing::Full).unwrap();
        assert!(matches!(
            reader.seek_to_record(0),
            Err(crate::Error::ReadError(ReadError::NotSeekable(_)))
        ));
        fs::remove_file(&path).unwrap();
    }
}
