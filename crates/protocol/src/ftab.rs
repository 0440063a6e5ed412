//! FTAB firmware table.
//!
//! RTKit co-processor firmware ships as an `ftab`: a 48-byte header
//! carrying the table tag (`rkos` for a runnable OS image), then 16-byte
//! entry descriptors, then the entry payloads. Four-character tags are
//! stored little-endian on disk, so `rkos` appears as `sokr` in a hex
//! dump.

use std::fmt;

pub const FTAB_HEADER_LEN: usize = 48;
pub const FTAB_ENTRY_LEN: usize = 16;

pub const FTAB_MAGIC: FourCc = FourCc(*b"ftab");
pub const TAG_RKOS: FourCc = FourCc(*b"rkos");
pub const TAG_RRKO: FourCc = FourCc(*b"rrko");

/// Four-character code in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub fn from_le(v: u32) -> Self {
        let b = v.to_le_bytes();
        Self([b[3], b[2], b[1], b[0]])
    }

    pub fn to_le(self) -> u32 {
        u32::from_le_bytes([self.0[3], self.0[2], self.0[1], self.0[0]])
    }
}

impl From<[u8; 4]> for FourCc {
    fn from(b: [u8; 4]) -> Self {
        Self(b)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in &self.0 {
            if c.is_ascii_graphic() {
                write!(f, "{}", c as char)?;
            } else {
                write!(f, "\\x{c:02x}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FtabError {
    #[error("Buffer of {0} bytes is too small for an ftab header")]
    Truncated(usize),
    #[error("Bad ftab magic {0}")]
    BadMagic(FourCc),
    #[error("Entry {index} ({tag}) extends past the end of the table")]
    EntryOutOfBounds { index: usize, tag: FourCc },
    #[error("Entry {0} already present")]
    DuplicateEntry(FourCc),
}

#[derive(Debug, Clone)]
pub struct FtabEntry {
    pub tag: FourCc,
    pub data: Vec<u8>,
    pad: u32,
}

#[derive(Debug, Clone)]
pub struct Ftab {
    /// First two words are fixed (1, 0xFFFFFFFF); the rest are opaque and
    /// round-tripped untouched.
    preamble: [u32; 8],
    pub tag: FourCc,
    pad: u32,
    entries: Vec<FtabEntry>,
}

impl Ftab {
    pub fn parse(data: &[u8]) -> Result<Self, FtabError> {
        if data.len() < FTAB_HEADER_LEN {
            return Err(FtabError::Truncated(data.len()));
        }

        let word = |off: usize| {
            u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
        };

        let mut preamble = [0u32; 8];
        for (i, w) in preamble.iter_mut().enumerate() {
            *w = word(i * 4);
        }

        let tag = FourCc::from_le(word(0x20));
        let magic = FourCc::from_le(word(0x24));
        if magic != FTAB_MAGIC {
            return Err(FtabError::BadMagic(magic));
        }
        let num_entries = word(0x28) as usize;
        let pad = word(0x2c);

        let mut entries = Vec::with_capacity(num_entries);
        for index in 0..num_entries {
            let base = FTAB_HEADER_LEN + index * FTAB_ENTRY_LEN;
            if base + FTAB_ENTRY_LEN > data.len() {
                return Err(FtabError::Truncated(data.len()));
            }
            let entry_tag = FourCc::from_le(word(base));
            let offset = word(base + 4) as usize;
            let size = word(base + 8) as usize;
            let entry_pad = word(base + 12);

            if offset + size > data.len() {
                return Err(FtabError::EntryOutOfBounds {
                    index,
                    tag: entry_tag,
                });
            }

            entries.push(FtabEntry {
                tag: entry_tag,
                data: data[offset..offset + size].to_vec(),
                pad: entry_pad,
            });
        }

        Ok(Self {
            preamble,
            tag,
            pad,
            entries,
        })
    }

    pub fn write(&self) -> Vec<u8> {
        let payload: usize = self.entries.iter().map(|e| e.data.len()).sum();
        let mut out = Vec::with_capacity(
            FTAB_HEADER_LEN + self.entries.len() * FTAB_ENTRY_LEN + payload,
        );

        for w in self.preamble {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.extend_from_slice(&self.tag.to_le().to_le_bytes());
        out.extend_from_slice(&FTAB_MAGIC.to_le().to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.pad.to_le_bytes());

        // Payloads are packed back to back after the descriptor table
        let mut offset = FTAB_HEADER_LEN + self.entries.len() * FTAB_ENTRY_LEN;
        for entry in &self.entries {
            out.extend_from_slice(&entry.tag.to_le().to_le_bytes());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry.pad.to_le_bytes());
            offset += entry.data.len();
        }
        for entry in &self.entries {
            out.extend_from_slice(&entry.data);
        }

        out
    }

    pub fn entries(&self) -> &[FtabEntry] {
        &self.entries
    }

    pub fn get_entry(&self, tag: FourCc) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.data.as_slice())
    }

    pub fn add_entry(&mut self, tag: FourCc, data: Vec<u8>) -> Result<(), FtabError> {
        if self.get_entry(tag).is_some() {
            return Err(FtabError::DuplicateEntry(tag));
        }
        self.entries.push(FtabEntry { tag, data, pad: 0 });

        Ok(())
    }
}

/// An empty table with the canonical fixed words, mostly for tests.
pub fn new_table(tag: FourCc) -> Ftab {
    let mut preamble = [0u32; 8];
    preamble[0] = 1;
    preamble[1] = 0xFFFF_FFFF;

    Ftab {
        preamble,
        tag,
        pad: 0,
        entries: Vec::new(),
    }
}
