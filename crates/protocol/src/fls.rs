//! FLS firmware load script container.
//!
//! A load script is a flat sequence of tagged elements, each prefixed by
//! `{type: u32 LE, size: u32 LE}` where `size` counts payload bytes only.
//! One header element leads, ELF segment records repeat, a signature
//! element closes the signed region, and a ticket slot may follow. The
//! script stays device-loadable as long as re-serialization concatenates
//! the elements in parsed order.

pub mod element {
    pub const HEADER: u32 = 0x01;
    pub const ELF_SEGMENT: u32 = 0x02;
    pub const SIGNATURE: u32 = 0x03;
    pub const TICKET: u32 = 0x04;
}

#[derive(Debug, thiserror::Error)]
pub enum FlsError {
    #[error("Element header at offset {0} is truncated")]
    TruncatedHeader(usize),
    #[error("Element at offset {offset} claims {claimed} bytes but only {left} remain")]
    TruncatedPayload {
        offset: usize,
        claimed: usize,
        left: usize,
    },
    #[error("Load script has no signature element")]
    NoSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlsElement {
    pub kind: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Fls {
    elements: Vec<FlsElement>,
}

impl Fls {
    pub fn parse(data: &[u8]) -> Result<Self, FlsError> {
        let mut elements = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            if data.len() - offset < 8 {
                return Err(FlsError::TruncatedHeader(offset));
            }
            let word = |at: usize| {
                u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
            };
            let kind = word(offset);
            let size = word(offset + 4) as usize;
            let left = data.len() - offset - 8;
            if size > left {
                return Err(FlsError::TruncatedPayload {
                    offset,
                    claimed: size,
                    left,
                });
            }

            elements.push(FlsElement {
                kind,
                data: data[offset + 8..offset + 8 + size].to_vec(),
            });
            offset += 8 + size;
        }

        Ok(Self { elements })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let total: usize = self.elements.iter().map(|e| 8 + e.data.len()).sum();
        let mut out = Vec::with_capacity(total);

        for elem in &self.elements {
            out.extend_from_slice(&elem.kind.to_le_bytes());
            out.extend_from_slice(&(elem.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&elem.data);
        }

        out
    }

    pub fn elements(&self) -> &[FlsElement] {
        &self.elements
    }

    fn find(&self, kind: u32) -> Option<&FlsElement> {
        self.elements.iter().find(|e| e.kind == kind)
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.find(element::HEADER).map(|e| e.data.as_slice())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.find(element::SIGNATURE).map(|e| e.data.as_slice())
    }

    pub fn ticket(&self) -> Option<&[u8]> {
        self.find(element::TICKET).map(|e| e.data.as_slice())
    }

    pub fn segment_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.kind == element::ELF_SEGMENT)
            .count()
    }

    /// Replaces the signature region. A script without one cannot be
    /// re-signed.
    pub fn update_sig_blob(&mut self, blob: &[u8]) -> Result<(), FlsError> {
        let elem = self
            .elements
            .iter_mut()
            .find(|e| e.kind == element::SIGNATURE)
            .ok_or(FlsError::NoSignature)?;
        elem.data = blob.to_vec();

        Ok(())
    }

    /// Sets the ticket slot, appending one when the script has none yet.
    pub fn insert_ticket(&mut self, ticket: &[u8]) {
        match self
            .elements
            .iter_mut()
            .find(|e| e.kind == element::TICKET)
        {
            Some(elem) => elem.data = ticket.to_vec(),
            None => self.elements.push(FlsElement {
                kind: element::TICKET,
                data: ticket.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_element(buf: &mut Vec<u8>, kind: u32, data: &[u8]) {
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
    }

    fn fixture() -> Vec<u8> {
        let mut buf = Vec::new();
        push_element(&mut buf, element::HEADER, b"bootcore");
        push_element(&mut buf, element::ELF_SEGMENT, &[0x7f; 16]);
        push_element(&mut buf, element::ELF_SEGMENT, &[0x10; 4]);
        push_element(&mut buf, element::SIGNATURE, &[0x22; 8]);
        buf
    }

    #[test]
    fn round_trip() {
        let raw = fixture();
        let fls = Fls::parse(&raw).unwrap();
        assert_eq!(fls.segment_count(), 2);
        assert_eq!(fls.serialize(), raw);
    }

    #[test]
    fn sig_blob_replaces_signature_region() {
        let mut fls = Fls::parse(&fixture()).unwrap();
        fls.update_sig_blob(&[0xAA, 0xBB]).unwrap();

        assert_eq!(fls.signature(), Some(&[0xAA, 0xBB][..]));
        // Reparse of the serialized form sees the same regions
        let again = Fls::parse(&fls.serialize()).unwrap();
        assert_eq!(again.signature(), Some(&[0xAA, 0xBB][..]));
        assert_eq!(again.header(), Some(&b"bootcore"[..]));
    }

    #[test]
    fn ticket_slot_is_created_then_overwritten() {
        let mut fls = Fls::parse(&fixture()).unwrap();
        assert_eq!(fls.ticket(), None);

        fls.insert_ticket(&[0xBB; 3]);
        assert_eq!(fls.ticket(), Some(&[0xBB; 3][..]));

        fls.insert_ticket(&[0xCC; 5]);
        assert_eq!(fls.ticket(), Some(&[0xCC; 5][..]));
        // Still a single slot
        let serialized = fls.serialize();
        let again = Fls::parse(&serialized).unwrap();
        assert_eq!(
            again
                .elements()
                .iter()
                .filter(|e| e.kind == element::TICKET)
                .count(),
            1
        );
    }

    #[test]
    fn unsigned_script_cannot_be_signed() {
        let mut buf = Vec::new();
        push_element(&mut buf, element::HEADER, b"x");
        let mut fls = Fls::parse(&buf).unwrap();
        assert!(matches!(
            fls.update_sig_blob(&[0x01]),
            Err(FlsError::NoSignature)
        ));
    }

    #[test]
    fn truncation_detected() {
        let mut raw = fixture();
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            Fls::parse(&raw),
            Err(FlsError::TruncatedPayload { .. })
        ));

        assert!(matches!(
            Fls::parse(&[0x01, 0x00, 0x00]),
            Err(FlsError::TruncatedHeader(0))
        ));
    }
}
