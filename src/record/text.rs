//! Text dump format for overlap records.
//!
//! One record per line, whitespace separated. Raw overlaps carry seven
//! fields, trim overlaps eight:
//!
//! ```text
//! a_iid b_iid I|N a_hang b_hang orig_erate corr_erate
//! a_iid b_iid f|r a_beg a_end b_beg b_end erate
//! ```
//!
//! Error rates are fraction-error, re-quantized through the quality codec
//! on the way in.

use std::io::BufRead;

use log::warn;

use crate::error::{CodecError, Error, Result};
use crate::file::OverlapFileWriter;
use crate::record::quality::encode_quality;
use crate::record::{Overlap, OverlapDat, RawDat, TrimDat};

fn malformed(line: &str, found: usize, expected: usize) -> Error {
    CodecError::MalformedLine {
        line: line.to_string(),
        found,
        expected,
    }
    .into()
}

fn field<T: std::str::FromStr>(line: &str, fields: &[&str], idx: usize) -> Result<T> {
    fields[idx]
        .parse()
        .map_err(|_| malformed(line, idx + 1, fields.len()))
}

/// Parses one raw-overlap dump line.
pub fn parse_raw_line(line: &str) -> Result<Overlap> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 7 {
        return Err(malformed(line, fields.len(), 7));
    }
    let flipped = match fields[2] {
        "I" => true,
        "N" => false,
        _ => return Err(malformed(line, 3, 7)),
    };
    Ok(Overlap {
        a_iid: field(line, &fields, 0)?,
        b_iid: field(line, &fields, 1)?,
        dat: OverlapDat::Raw(RawDat {
            flipped,
            a_hang: field(line, &fields, 3)?,
            b_hang: field(line, &fields, 4)?,
            orig_evalue: encode_quality(field(line, &fields, 5)?),
            corr_evalue: encode_quality(field(line, &fields, 6)?),
        }),
    })
}

/// Parses one trim-overlap dump line.
pub fn parse_trim_line(line: &str) -> Result<Overlap> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 8 {
        return Err(malformed(line, fields.len(), 8));
    }
    let fwd = match fields[2] {
        "f" => true,
        "r" => false,
        _ => return Err(malformed(line, 3, 8)),
    };
    Ok(Overlap {
        a_iid: field(line, &fields, 0)?,
        b_iid: field(line, &fields, 1)?,
        dat: OverlapDat::Trim(TrimDat {
            fwd,
            a_beg: field(line, &fields, 3)?,
            a_end: field(line, &fields, 4)?,
            b_beg: field(line, &fields, 5)?,
            b_end: field(line, &fields, 6)?,
            evalue: encode_quality(field(line, &fields, 7)?),
        }),
    })
}

/// Converts a text dump back to packed binary records.
///
/// Lines that fail to parse or pack are logged and skipped; the record
/// stream keeps going. Returns the number of records written.
pub fn lines_to_binary<R: BufRead>(
    input: R,
    parse: fn(&str) -> Result<Overlap>,
    out: &mut OverlapFileWriter,
) -> Result<u64> {
    let mut written = 0;
    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let packed = match parse(&line).and_then(|ovl| ovl.pack()) {
            Ok(p) => p,
            Err(Error::CodecError(e)) => {
                warn!("skipping line {}: {e}", lineno + 1);
                continue;
            }
            Err(e) => return Err(e),
        };
        out.write_overlap(&packed)?;
        written += 1;
    }
    Ok(written)
}
