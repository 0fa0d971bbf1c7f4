//! Segment layout resolved from a program's linker map.

use mapfile::MapFile;

use crate::CexeError;

/// The four segments of the section table, in their fixed on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Text,
    Data,
    Rodata,
    Bss,
}

impl Segment {
    pub const ALL: [Segment; 4] = [Segment::Text, Segment::Data, Segment::Rodata, Segment::Bss];

    pub fn name(&self) -> &'static str {
        match self {
            Segment::Text => "text",
            Segment::Data => "data",
            Segment::Rodata => "rodata",
            Segment::Bss => "bss",
        }
    }

    pub fn tag(&self) -> [u8; 2] {
        match self {
            Segment::Text => *b"te",
            Segment::Data => *b"da",
            Segment::Rodata => *b"ro",
            Segment::Bss => *b"bs",
        }
    }
}

/// One segment's placement relative to the physical load address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub offset: i64,
    pub size: i32,
}

/// Full layout: the physical load address plus one span per segment.
/// The table always carries all four segments; a zero-size segment keeps
/// its slot and is marked absent in the encoded entry.
#[derive(Debug, Clone, Copy)]
pub struct SegmentLayout {
    pub phys: u64,
    spans: [SegmentSpan; 4],
}

impl SegmentLayout {
    /// Resolves `phys` and every `__<segment>_start`/`__<segment>_end`
    /// pair from the map. All symbols are required.
    pub fn from_map(map: &MapFile) -> Result<Self, CexeError> {
        let phys = map.require("phys")?;
        let mut spans = [SegmentSpan { offset: 0, size: 0 }; 4];
        for (slot, segment) in spans.iter_mut().zip(Segment::ALL) {
            let start = map.require(&format!("__{}_start", segment.name()))?;
            let end = map.require(&format!("__{}_end", segment.name()))?;
            *slot = SegmentSpan {
                offset: start as i64 - phys as i64,
                size: (end as i64 - start as i64) as i32,
            };
        }
        Ok(SegmentLayout { phys, spans })
    }

    pub fn span(&self, segment: Segment) -> SegmentSpan {
        self.spans[segment as usize]
    }

    /// Spans in on-disk section order.
    pub fn spans(&self) -> impl Iterator<Item = (Segment, SegmentSpan)> + '_ {
        Segment::ALL.into_iter().map(|s| (s, self.span(s)))
    }
}
