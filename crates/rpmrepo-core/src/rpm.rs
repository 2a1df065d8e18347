//! Binary RPM header decoding.
//!
//! Only the lead, the signature header and the main header are read; the
//! compressed payload that follows is never touched.

use rpmrepo_schema::{Checksum, Digest, Header, PackageDescriptor, TagValue};
use thiserror::Error;

pub const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
pub const HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];
pub const LEAD_SIZE: usize = 96;

const INDEX_ENTRY_SIZE: usize = 16;
const HEADER_PREAMBLE: usize = 16;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("not an RPM file: bad lead magic")]
    BadLead,

    #[error("bad {section} header magic")]
    BadMagic { section: &'static str },

    #[error("{section} header truncated at byte {offset}")]
    Truncated { section: &'static str, offset: usize },

    #[error("entry for tag {tag} points outside the data store")]
    OutOfBounds { tag: u32 },

    #[error("unsupported entry type {kind} for tag {tag}")]
    UnsupportedType { tag: u32, kind: u32 },
}

/// A decoded main header plus its byte span inside the file.
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub header: Header,
    pub range: (u64, u64),
}

/// Header-decoding collaborator used by the add workflow.
pub trait HeaderDecoder: Send + Sync {
    /// Decode the main header of a package image.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the image is not a well-formed RPM.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedHeader, DecodeError>;
}

/// Decoder for the on-disk RPM v3/v4 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmHeaderReader;

impl HeaderDecoder for RpmHeaderReader {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedHeader, DecodeError> {
        if bytes.len() < LEAD_SIZE || bytes[..4] != LEAD_MAGIC {
            return Err(DecodeError::BadLead);
        }
        let (_, sig_end) = read_section(bytes, LEAD_SIZE, "signature")?;
        let start = sig_end.next_multiple_of(8);
        let (header, end) = read_section(bytes, start, "main")?;
        Ok(DecodedHeader {
            header,
            range: (start as u64, end as u64),
        })
    }
}

fn be_u32(bytes: &[u8], at: usize, section: &'static str) -> Result<u32, DecodeError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(DecodeError::Truncated { section, offset: at })
}

/// Parse one header structure starting at `start`; returns it with its end offset.
fn read_section(
    bytes: &[u8],
    start: usize,
    section: &'static str,
) -> Result<(Header, usize), DecodeError> {
    let magic = bytes
        .get(start..start + 4)
        .ok_or(DecodeError::Truncated { section, offset: start })?;
    if magic != HEADER_MAGIC {
        return Err(DecodeError::BadMagic { section });
    }
    let count = be_u32(bytes, start + 8, section)? as usize;
    let store_len = be_u32(bytes, start + 12, section)? as usize;
    let index = start + HEADER_PREAMBLE;
    let bounds = count
        .checked_mul(INDEX_ENTRY_SIZE)
        .and_then(|len| index.checked_add(len))
        .and_then(|store| Some((store, store.checked_add(store_len)?)));
    let Some((store, end)) = bounds.filter(|&(_, end)| end <= bytes.len()) else {
        return Err(DecodeError::Truncated { section, offset: bytes.len() });
    };
    let data = &bytes[store..end];

    let mut header = Header::new();
    for i in 0..count {
        let at = index + i * INDEX_ENTRY_SIZE;
        let tag = be_u32(bytes, at, section)?;
        let kind = be_u32(bytes, at + 4, section)?;
        let offset = be_u32(bytes, at + 8, section)? as usize;
        let n = be_u32(bytes, at + 12, section)? as usize;
        if let Some(value) = read_value(data, tag, kind, offset, n)? {
            header.insert_raw(tag, value);
        }
    }
    Ok((header, end))
}

fn read_value(
    data: &[u8],
    tag: u32,
    kind: u32,
    offset: usize,
    count: usize,
) -> Result<Option<TagValue>, DecodeError> {
    let oob = DecodeError::OutOfBounds { tag };
    let span = |len: Option<usize>| {
        len.and_then(|len| offset.checked_add(len))
            .and_then(|end| data.get(offset..end))
            .ok_or(DecodeError::OutOfBounds { tag })
    };
    let ints = |width: usize| -> Result<Vec<i64>, DecodeError> {
        let raw = span(width.checked_mul(count))?;
        Ok(raw
            .chunks_exact(width)
            .map(|c| match width {
                1 => i64::from(c[0]),
                2 => i64::from(u16::from_be_bytes([c[0], c[1]])),
                4 => i64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]])),
                _ => i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
            })
            .collect())
    };
    let value = match kind {
        0 => return Ok(None),
        1 | 2 => TagValue::Int(ints(1)?),
        3 => TagValue::Int(ints(2)?),
        4 => TagValue::Int(ints(4)?),
        5 => TagValue::Int(ints(8)?),
        6 => {
            let mut strings = c_strings(data.get(offset..).ok_or(oob)?, 1, tag)?;
            TagValue::Str(strings.pop().unwrap_or_default())
        }
        7 => TagValue::Bin(span(Some(count))?.to_vec()),
        8 | 9 => TagValue::StrArray(c_strings(data.get(offset..).ok_or(oob)?, count, tag)?),
        _ => return Err(DecodeError::UnsupportedType { tag, kind }),
    };
    Ok(Some(value))
}

/// Read `count` NUL-terminated strings from the front of `data`.
///
/// Every string takes at least its terminator, so a count above the
/// remaining length is rejected before anything is allocated.
fn c_strings(data: &[u8], count: usize, tag: u32) -> Result<Vec<String>, DecodeError> {
    if count > data.len() {
        return Err(DecodeError::OutOfBounds { tag });
    }
    let mut out = Vec::with_capacity(count);
    let mut rest = data;
    for _ in 0..count {
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::OutOfBounds { tag })?;
        out.push(String::from_utf8_lossy(&rest[..nul]).into_owned());
        rest = &rest[nul + 1..];
    }
    Ok(out)
}

/// Concrete descriptor: a decoded header plus file facts.
#[derive(Debug, Clone)]
pub struct RpmPackage {
    header: Header,
    size: u64,
    checksum: Checksum,
    location: String,
    range: (u64, u64),
}

impl RpmPackage {
    pub fn new(header: Header, size: u64, checksum: Checksum, location: impl Into<String>) -> Self {
        Self {
            header,
            size,
            checksum,
            location: location.into(),
            range: (0, 0),
        }
    }

    /// Digest and decode a complete package image.
    ///
    /// # Errors
    ///
    /// Propagates the decoder's [`DecodeError`].
    pub fn from_bytes(
        bytes: &[u8],
        digest: Digest,
        location: impl Into<String>,
        decoder: &dyn HeaderDecoder,
    ) -> Result<Self, DecodeError> {
        let decoded = decoder.decode(bytes)?;
        Ok(Self {
            header: decoded.header,
            size: bytes.len() as u64,
            checksum: digest.compute(bytes),
            location: location.into(),
            range: decoded.range,
        })
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }
}

impl PackageDescriptor for RpmPackage {
    fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_range(&self) -> (u64, u64) {
        self.range
    }
}
