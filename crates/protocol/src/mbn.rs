//! MBN modem binary container.
//!
//! A signed Qualcomm image: a 40-byte header of ten little-endian words,
//! the code payload, the signature, then the cert chain. Signing replaces
//! the signature region in place; the overall length never changes.

use log::warn;

pub const MBN_HEADER_LEN: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum MbnError {
    #[error("Buffer of {0} bytes is too small for an MBN header")]
    Truncated(usize),
    #[error("Signature region ({offset}+{len}) exceeds image of {total} bytes")]
    BadSignatureRegion {
        offset: usize,
        len: usize,
        total: usize,
    },
    #[error("Signature blob of {got} bytes does not fit region of {expected} bytes")]
    SignatureLength { got: usize, expected: usize },
}

/// The fixed header. Field names follow the flash programmer convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbnHeader {
    pub image_id: u32,
    pub flash_parti_ver: u32,
    pub image_src: u32,
    pub image_dest_ptr: u32,
    pub image_size: u32,
    pub code_size: u32,
    pub signature_ptr: u32,
    pub signature_size: u32,
    pub cert_chain_ptr: u32,
    pub cert_chain_size: u32,
}

impl MbnHeader {
    fn parse(buf: &[u8]) -> Self {
        let word = |idx: usize| {
            let off = idx * 4;
            u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
        };

        Self {
            image_id: word(0),
            flash_parti_ver: word(1),
            image_src: word(2),
            image_dest_ptr: word(3),
            image_size: word(4),
            code_size: word(5),
            signature_ptr: word(6),
            signature_size: word(7),
            cert_chain_ptr: word(8),
            cert_chain_size: word(9),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mbn {
    header: MbnHeader,
    data: Vec<u8>,
    sig_offset: usize,
}

impl Mbn {
    pub fn parse(data: &[u8]) -> Result<Self, MbnError> {
        if data.len() < MBN_HEADER_LEN {
            return Err(MbnError::Truncated(data.len()));
        }

        let header = MbnHeader::parse(data);
        let sig_len = header.signature_size as usize;
        let trailer = sig_len + header.cert_chain_size as usize;
        if trailer > data.len() - MBN_HEADER_LEN {
            return Err(MbnError::BadSignatureRegion {
                offset: data.len().saturating_sub(trailer),
                len: sig_len,
                total: data.len(),
            });
        }
        let sig_offset = data.len() - trailer;

        if header.image_size as usize + MBN_HEADER_LEN != data.len() {
            warn!(
                "MBN image_size {} disagrees with buffer of {} bytes",
                header.image_size,
                data.len()
            );
        }

        Ok(Self {
            header,
            data: data.to_vec(),
            sig_offset,
        })
    }

    pub fn header(&self) -> &MbnHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn signature(&self) -> &[u8] {
        &self.data[self.sig_offset..self.sig_offset + self.header.signature_size as usize]
    }

    /// Splices a signature blob over the signature region.
    ///
    /// The blob must match the region exactly; MBN signatures are
    /// fixed-size and the image length must not move.
    pub fn update_sig_blob(&mut self, blob: &[u8]) -> Result<(), MbnError> {
        let expected = self.header.signature_size as usize;
        if blob.len() != expected {
            return Err(MbnError::SignatureLength {
                got: blob.len(),
                expected,
            });
        }

        self.data[self.sig_offset..self.sig_offset + expected].copy_from_slice(blob);

        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.data.clone()
    }
}
