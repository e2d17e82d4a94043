//! H.264 Annex-B byte-stream helpers.
//!
//! The sink consumes whole access units. Producers that only have a raw
//! elementary stream (for example an `.h264` file) use [`AccessUnits`] to cut
//! it at access-unit boundaries without decoding anything beyond the NAL
//! header and the first bit of the slice header.

/// NAL unit types that matter for access-unit boundaries
pub mod nal_type {
    pub const SLICE: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// One NAL unit located inside a byte stream
#[derive(Debug, Clone, Copy)]
pub struct NalUnit<'a> {
    /// Offset of the start code preceding this unit
    pub offset: usize,
    /// Offset one past the last byte of this unit
    pub end: usize,
    /// NAL bytes without the start code
    pub payload: &'a [u8],
}

impl NalUnit<'_> {
    /// The `nal_unit_type` field of the NAL header
    pub fn nal_type(&self) -> u8 {
        self.payload.first().map_or(0, |b| b & 0x1f)
    }

    /// Whether this unit carries coded slice data
    pub fn is_slice(&self) -> bool {
        matches!(self.nal_type(), nal_type::SLICE | nal_type::IDR)
    }

    /// Whether `first_mb_in_slice` is zero, i.e. the slice opens a new picture.
    ///
    /// `first_mb_in_slice` is the first ue(v) field of the slice header and
    /// encodes zero as a single `1` bit.
    pub fn is_first_slice(&self) -> bool {
        self.payload.get(1).is_some_and(|b| b & 0x80 != 0)
    }
}

/// Locate the next start code at or after `from`.
///
/// Returns the start code offset and its length (3 or 4 bytes).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > from && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Iterator over the NAL units of an Annex-B byte stream.
///
/// Bytes before the first start code are skipped.
pub struct NalUnits<'a> {
    data: &'a [u8],
    next: Option<(usize, usize)>,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next: find_start_code(data, 0),
        }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, code_len) = self.next?;
        let payload_start = offset + code_len;
        let following = find_start_code(self.data, payload_start);
        let end = following.map_or(self.data.len(), |(pos, _)| pos);
        self.next = following;

        Some(NalUnit {
            offset,
            end,
            payload: &self.data[payload_start..end],
        })
    }
}

fn starts_access_unit(nal: &NalUnit<'_>, unit_has_slice: bool) -> bool {
    match nal.nal_type() {
        nal_type::AUD => true,
        nal_type::SEI | nal_type::SPS | nal_type::PPS => unit_has_slice,
        nal_type::SLICE | nal_type::IDR => unit_has_slice && nal.is_first_slice(),
        _ => false,
    }
}

/// Iterator over the access units of an Annex-B byte stream.
///
/// Each item is a contiguous byte range that keeps its start codes, ready to
/// be written to the sink as-is. In-band parameter sets stay attached to the
/// picture that follows them.
pub struct AccessUnits<'a> {
    data: &'a [u8],
    nals: std::iter::Peekable<NalUnits<'a>>,
}

impl<'a> AccessUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            nals: NalUnits::new(data).peekable(),
        }
    }
}

impl<'a> Iterator for AccessUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.nals.next()?;
        let begin = first.offset;
        let mut end = first.end;
        let mut has_slice = first.is_slice();

        while let Some(nal) = self.nals.peek() {
            if starts_access_unit(nal, has_slice) {
                break;
            }
            has_slice |= nal.is_slice();
            end = nal.end;
            self.nals.next();
        }

        Some(&self.data[begin..end])
    }
}
