//! Overlap record model and payload codec.
//!
//! Every overlap is 16 bytes on the wire: two `u32` read identifiers and a
//! `u64` payload word whose top two bits select the record kind. Tag 0 is
//! reserved so an all-zero word never decodes as a valid record.
//!
//! Payload layouts, least-significant bit first:
//!
//! ```text
//! RAW  (tag 1): orig_evalue:12  corr_evalue:12  flipped:1  a_hang+2048:12  b_hang+2048:12
//! TRIM (tag 2): evalue:12  fwd:1  a_beg:11  a_end:11  b_beg:11  b_end:11
//! SEED (tag 3): a_pos:11  b_pos:11  k_count:11  k_len:11  fwd:1  palindrome:1
//! ```

mod quality;
mod text;

pub use quality::{decode_quality, encode_quality, ERATE_SCALE};
pub use text::{lines_to_binary, parse_raw_line, parse_trim_line};

use std::cmp::Ordering;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::{CodecError, Result};
use crate::{ERATE_BITS, MAX_EVALUE, MAX_HANG, MAX_READ_LEN, MAX_READ_LEN_BITS};

const KIND_SHIFT: u32 = 62;
const KIND_RAW: u64 = 1;
const KIND_TRIM: u64 = 2;
const KIND_SEED: u64 = 3;

const ERATE_MASK: u64 = (1 << ERATE_BITS) - 1;
const POS_MASK: u64 = (1 << MAX_READ_LEN_BITS) - 1;
const HANG_BITS: u32 = ERATE_BITS;
const HANG_MASK: u64 = (1 << HANG_BITS) - 1;
const HANG_BIAS: i64 = 1 << (HANG_BITS - 1);

/// An overlap record in wire form: identifiers plus the still-packed
/// payload word. This is the unit of bucketizing and sorting; nothing in
/// the sort path ever decodes the payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedOverlap {
    pub a_iid: u32,
    pub b_iid: u32,
    pub dat: u64,
}

impl PackedOverlap {
    /// Decodes the payload word into a typed overlap.
    pub fn unpack(self) -> Result<Overlap> {
        Ok(Overlap {
            a_iid: self.a_iid,
            b_iid: self.b_iid,
            dat: OverlapDat::unpack(self.dat)?,
        })
    }
}

/// Store order: primary `a_iid`, secondary `b_iid`, then the raw payload
/// word so that ties break deterministically.
impl Ord for PackedOverlap {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.a_iid, self.b_iid, self.dat).cmp(&(other.a_iid, other.b_iid, other.dat))
    }
}

impl PartialOrd for PackedOverlap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackedOverlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a:{} b:{} dat:{:#018x}", self.a_iid, self.b_iid, self.dat)
    }
}

/// A fully decoded overlap record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overlap {
    pub a_iid: u32,
    pub b_iid: u32,
    pub dat: OverlapDat,
}

impl Overlap {
    /// Re-encodes the payload, validating field ranges.
    pub fn pack(&self) -> Result<PackedOverlap> {
        Ok(PackedOverlap {
            a_iid: self.a_iid,
            b_iid: self.b_iid,
            dat: self.dat.pack()?,
        })
    }

    /// Produces the same overlap as seen from the B read, or `None` for
    /// record kinds that are not mirrorable.
    ///
    /// Raw overlaps swap their hangs when the reads run in opposite
    /// orientations and negate them otherwise. Trim overlaps swap the
    /// A and B intervals, crossing the endpoint pairs for reversed
    /// alignments. Seed records carry positions meaningful only from the
    /// A read and cannot be mirrored.
    #[must_use]
    pub fn flip(&self) -> Option<Overlap> {
        let dat = match self.dat {
            OverlapDat::Raw(r) => {
                let (a_hang, b_hang) = if r.flipped {
                    (r.b_hang, r.a_hang)
                } else {
                    (-r.a_hang, -r.b_hang)
                };
                OverlapDat::Raw(RawDat { a_hang, b_hang, ..r })
            }
            OverlapDat::Trim(t) => {
                let (a_beg, a_end, b_beg, b_end) = if t.fwd {
                    (t.b_beg, t.b_end, t.a_beg, t.a_end)
                } else {
                    (t.b_end, t.b_beg, t.a_end, t.a_beg)
                };
                OverlapDat::Trim(TrimDat {
                    a_beg,
                    a_end,
                    b_beg,
                    b_end,
                    ..t
                })
            }
            OverlapDat::Seed(_) => return None,
        };
        Some(Overlap {
            a_iid: self.b_iid,
            b_iid: self.a_iid,
            dat,
        })
    }
}

impl fmt::Display for Overlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.a_iid, self.b_iid)?;
        match self.dat {
            OverlapDat::Raw(r) => write!(
                f,
                "{} {} {} {:.4} {:.4}",
                if r.flipped { 'I' } else { 'N' },
                r.a_hang,
                r.b_hang,
                decode_quality(r.orig_evalue),
                decode_quality(r.corr_evalue),
            ),
            OverlapDat::Trim(t) => write!(
                f,
                "{} {} {} {} {} {:.4}",
                if t.fwd { 'f' } else { 'r' },
                t.a_beg,
                t.a_end,
                t.b_beg,
                t.b_end,
                decode_quality(t.evalue),
            ),
            OverlapDat::Seed(s) => write!(
                f,
                "{} {} {} {} {} {}",
                if s.fwd { 'f' } else { 'r' },
                s.a_pos,
                s.b_pos,
                s.k_count,
                s.k_len,
                if s.palindrome { 'p' } else { '-' },
            ),
        }
    }
}

/// The typed payload of an overlap record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapDat {
    Raw(RawDat),
    Trim(TrimDat),
    Seed(SeedDat),
}

/// A raw dovetail/containment alignment between two full reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawDat {
    /// Offset of the B read's start from the A read's start.
    pub a_hang: i32,
    /// Offset of the B read's end from the A read's end.
    pub b_hang: i32,
    /// True if the B read aligns reverse-complemented.
    pub flipped: bool,
    /// Quality as computed by the overlapper.
    pub orig_evalue: u16,
    /// Quality after error correction; filters judge this field.
    pub corr_evalue: u16,
}

/// A partial alignment between trimmed read intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrimDat {
    pub fwd: bool,
    pub a_beg: u32,
    pub a_end: u32,
    pub b_beg: u32,
    pub b_end: u32,
    pub evalue: u16,
}

/// A shared-kmer seed match; positions are relative to the A read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedDat {
    pub fwd: bool,
    pub palindrome: bool,
    pub a_pos: u32,
    pub b_pos: u32,
    pub k_count: u32,
    pub k_len: u32,
}

fn check_hang(value: i32) -> Result<u64> {
    if value.unsigned_abs() > MAX_HANG as u32 {
        return Err(CodecError::HangOutOfRange {
            value,
            limit: MAX_HANG,
        }
        .into());
    }
    Ok((i64::from(value) + HANG_BIAS) as u64)
}

fn check_pos(value: u32) -> Result<u64> {
    if value > MAX_READ_LEN {
        return Err(CodecError::PositionOutOfRange {
            value,
            limit: MAX_READ_LEN,
        }
        .into());
    }
    Ok(u64::from(value))
}

fn unbias_hang(field: u64) -> i32 {
    (field as i64 - HANG_BIAS) as i32
}

impl OverlapDat {
    /// Packs the payload into a single word, validating field ranges.
    ///
    /// Quality values above [`MAX_EVALUE`] are clamped rather than
    /// rejected, matching the saturating quality codec.
    pub fn pack(&self) -> Result<u64> {
        match *self {
            OverlapDat::Raw(r) => {
                let a_hang = check_hang(r.a_hang)?;
                let b_hang = check_hang(r.b_hang)?;
                Ok((KIND_RAW << KIND_SHIFT)
                    | u64::from(r.orig_evalue.min(MAX_EVALUE))
                    | (u64::from(r.corr_evalue.min(MAX_EVALUE)) << 12)
                    | (u64::from(r.flipped) << 24)
                    | (a_hang << 25)
                    | (b_hang << 37))
            }
            OverlapDat::Trim(t) => Ok((KIND_TRIM << KIND_SHIFT)
                | u64::from(t.evalue.min(MAX_EVALUE))
                | (u64::from(t.fwd) << 12)
                | (check_pos(t.a_beg)? << 13)
                | (check_pos(t.a_end)? << 24)
                | (check_pos(t.b_beg)? << 35)
                | (check_pos(t.b_end)? << 46)),
            OverlapDat::Seed(s) => Ok((KIND_SEED << KIND_SHIFT)
                | check_pos(s.a_pos)?
                | (check_pos(s.b_pos)? << 11)
                | (check_pos(s.k_count)? << 22)
                | (check_pos(s.k_len)? << 33)
                | (u64::from(s.fwd) << 44)
                | (u64::from(s.palindrome) << 45)),
        }
    }

    /// Decodes a payload word, rejecting the reserved kind tag.
    pub fn unpack(word: u64) -> Result<OverlapDat> {
        match word >> KIND_SHIFT {
            KIND_RAW => Ok(OverlapDat::Raw(RawDat {
                orig_evalue: (word & ERATE_MASK) as u16,
                corr_evalue: ((word >> 12) & ERATE_MASK) as u16,
                flipped: (word >> 24) & 1 == 1,
                a_hang: unbias_hang((word >> 25) & HANG_MASK),
                b_hang: unbias_hang((word >> 37) & HANG_MASK),
            })),
            KIND_TRIM => Ok(OverlapDat::Trim(TrimDat {
                evalue: (word & ERATE_MASK) as u16,
                fwd: (word >> 12) & 1 == 1,
                a_beg: ((word >> 13) & POS_MASK) as u32,
                a_end: ((word >> 24) & POS_MASK) as u32,
                b_beg: ((word >> 35) & POS_MASK) as u32,
                b_end: ((word >> 46) & POS_MASK) as u32,
            })),
            KIND_SEED => Ok(OverlapDat::Seed(SeedDat {
                a_pos: (word & POS_MASK) as u32,
                b_pos: ((word >> 11) & POS_MASK) as u32,
                k_count: ((word >> 22) & POS_MASK) as u32,
                k_len: ((word >> 33) & POS_MASK) as u32,
                fwd: (word >> 44) & 1 == 1,
                palindrome: (word >> 45) & 1 == 1,
            })),
            tag => Err(CodecError::InvalidKind {
                tag: tag as u8,
                word,
            }
            .into()),
        }
    }
}
