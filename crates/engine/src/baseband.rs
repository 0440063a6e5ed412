//! Baseband firmware archive signer.
//!
//! The baseband ships as a zip of modem images. Signing splices the TSS
//! response's per-element signature blobs into the matching MBN/FLS
//! members, strips everything unrelated, and, when the device presented
//! a nonce, embeds the `BBTicket` so the modem can verify freshness.

use std::collections::HashSet;
use std::path::Path;

use log::debug;
use plist::Dictionary;
use restore_protocol::fls::{Fls, FlsError};
use restore_protocol::mbn::{Mbn, MbnError};
use restore_protocol::value::DictExt;

use crate::zipedit::{ZipEditError, ZipEditor};

/// Signature-blob element names and the archive members they live in.
const ELEMENT_FILES: &[(&str, &str)] = &[
    ("RamPSI", "psi_ram.fls"),
    ("FlashPSI", "psi_flash.fls"),
    ("eDBL", "dbl.mbn"),
    ("RestoreDBL", "restoredbl.mbn"),
    ("DBL", "dbl.mbn"),
    ("ENANDPRG", "ENPRG.mbn"),
    ("RestoreSBL1", "restoresbl1.mbn"),
    ("SBL1", "sbl1.mbn"),
    ("RestorePSI", "restorepsi.bin"),
    ("PSI", "psi_ram.bin"),
    ("RestorePSI2", "restorepsi2.bin"),
    ("PSI2", "psi_ram2.bin"),
    ("Misc", "multi_image.mbn"),
];

/// Member that receives the spliced ticket on FLS-family basebands.
const EBL_FILE: &str = "ebl.fls";
/// Member added to carry the ticket on MBN-family basebands.
const TICKET_FILE: &str = "bbticket.der";

/// Extensions that survive cleanup when a nonce is present.
const FIRMWARE_EXTENSIONS: &[&str] = &[".fls", ".mbn", ".elf", ".bin"];

#[derive(Debug, thiserror::Error)]
pub enum BasebandError {
    #[error("TSS response has no BasebandFirmware dictionary")]
    NoFirmwareDict,

    #[error("Unknown firmware element {0}")]
    UnknownElement(String),

    #[error("Element {element} maps to {file}, which the archive does not contain")]
    MissingFile { element: String, file: String },

    #[error("TSS response has no BBTicket")]
    MissingTicket,

    #[error("Mbn error: {0}")]
    Mbn(#[from] MbnError),

    #[error("Fls error: {0}")]
    Fls(#[from] FlsError),

    #[error("Archive error: {0}")]
    Archive(#[from] ZipEditError),
}

fn file_for_element(element: &str) -> Option<&'static str> {
    ELEMENT_FILES
        .iter()
        .find(|(name, _)| *name == element)
        .map(|(_, file)| *file)
}

fn is_firmware_file(name: &str) -> bool {
    FIRMWARE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Patches every `<element>-Blob` of the TSS response into the archive at
/// `path`, prunes unrelated members, and embeds the ticket when `nonce`
/// was presented. The archive is rewritten in place.
pub fn sign_archive(
    path: &Path,
    bbtss: &Dictionary,
    nonce: Option<&[u8]>,
) -> Result<(), BasebandError> {
    let firmware = bbtss
        .dict_item("BasebandFirmware")
        .ok_or(BasebandError::NoFirmwareDict)?;

    let mut archive = ZipEditor::open(path)?;
    let mut signed: HashSet<usize> = HashSet::new();
    let mut signed_fls = false;

    for (key, value) in firmware.iter() {
        let key: &str = key.as_ref();
        let Some(element) = key.strip_suffix("-Blob") else {
            continue;
        };
        let Some(blob) = value.as_data() else {
            continue;
        };

        let file = file_for_element(element)
            .ok_or_else(|| BasebandError::UnknownElement(element.into()))?;
        let index = archive
            .index_of(file)
            .ok_or_else(|| BasebandError::MissingFile {
                element: element.into(),
                file: file.into(),
            })?;

        debug!("Signing {element} ({file})");
        let patched = if file.ends_with(".fls") {
            let mut fls = Fls::parse(archive.entry_data(index))?;
            fls.update_sig_blob(blob)?;
            signed_fls = true;
            fls.serialize()
        } else {
            let mut mbn = Mbn::parse(archive.entry_data(index))?;
            mbn.update_sig_blob(blob)?;
            mbn.serialize()
        };
        archive.replace(index, patched);
        signed.insert(index);
    }

    // Everything unsigned goes, except that a nonce-carrying restore
    // keeps the remaining firmware images the modem still loads.
    archive.retain(|index, name| {
        signed.contains(&index) || (nonce.is_some() && is_firmware_file(name))
    });

    if nonce.is_some() {
        let ticket = firmware
            .data_item("BBTicket")
            .or_else(|| bbtss.data_item("BBTicket"))
            .ok_or(BasebandError::MissingTicket)?;

        if signed_fls {
            let index = archive
                .index_of(EBL_FILE)
                .ok_or_else(|| BasebandError::MissingFile {
                    element: "BBTicket".into(),
                    file: EBL_FILE.into(),
                })?;
            let mut ebl = Fls::parse(archive.entry_data(index))?;
            ebl.insert_ticket(ticket);
            archive.replace(index, ebl.serialize());
        } else {
            archive.add(TICKET_FILE, ticket.to_vec());
        }
    }

    archive.commit()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Value;
    use restore_protocol::fls::element;
    use restore_protocol::value::data;
    use std::io::Write;
    use std::path::PathBuf;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn fls_bytes(sig: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (kind, payload) in [
            (element::HEADER, b"hdr".as_slice()),
            (element::ELF_SEGMENT, &[0x7f; 8]),
            (element::SIGNATURE, sig),
        ] {
            buf.extend_from_slice(&kind.to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
        }
        buf
    }

    fn mbn_bytes(sig_len: u32) -> Vec<u8> {
        let code_len = 8u32;
        let mut buf = Vec::new();
        let words = [
            0u32,
            0,
            0,
            0,
            code_len + sig_len, // image_size
            code_len,
            0,
            sig_len,
            0,
            0, // no cert chain
        ];
        for w in words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf.extend_from_slice(&vec![0x11; code_len as usize]);
        buf.extend_from_slice(&vec![0x00; sig_len as usize]);
        buf
    }

    fn write_zip(dir: &Path, members: &[(&str, Vec<u8>)]) -> PathBuf {
        let path = dir.join("bbfw.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, bytes) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn response(entries: &[(&str, Vec<u8>)]) -> Dictionary {
        let mut firmware = Dictionary::new();
        for (key, blob) in entries {
            firmware.insert((*key).into(), data(blob.clone()));
        }
        let mut resp = Dictionary::new();
        resp.insert("BasebandFirmware".into(), Value::Dictionary(firmware));
        resp
    }

    #[test]
    fn fls_with_nonce_gets_spliced_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            &[
                ("psi_ram.fls", fls_bytes(&[0x00; 4])),
                ("ebl.fls", fls_bytes(&[0x01; 4])),
                ("unrelated.txt", b"junk".to_vec()),
            ],
        );
        let resp = response(&[
            ("RamPSI-Blob", vec![0xAA; 4]),
            ("BBTicket", vec![0xBB; 6]),
        ]);

        sign_archive(&path, &resp, Some(&[0x99; 20])).unwrap();

        let archive = ZipEditor::open(&path).unwrap();
        let psi = Fls::parse(archive.data_by_name("psi_ram.fls").unwrap()).unwrap();
        assert_eq!(psi.signature(), Some(&[0xAA; 4][..]));
        let ebl = Fls::parse(archive.data_by_name("ebl.fls").unwrap()).unwrap();
        assert_eq!(ebl.ticket(), Some(&[0xBB; 6][..]));
        assert!(archive.index_of("unrelated.txt").is_none());
    }

    #[test]
    fn mbn_only_with_nonce_gets_ticket_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            &[
                ("sbl1.mbn", mbn_bytes(4)),
                ("restoresbl1.mbn", mbn_bytes(4)),
            ],
        );
        let resp = response(&[
            ("SBL1-Blob", vec![0xAA; 4]),
            ("RestoreSBL1-Blob", vec![0xAB; 4]),
            ("BBTicket", vec![0xBB; 6]),
        ]);

        sign_archive(&path, &resp, Some(&[0x99; 20])).unwrap();

        let archive = ZipEditor::open(&path).unwrap();
        assert_eq!(archive.data_by_name("bbticket.der").unwrap(), &[0xBB; 6]);
        let sbl = Mbn::parse(archive.data_by_name("sbl1.mbn").unwrap()).unwrap();
        assert_eq!(sbl.signature(), &[0xAA; 4]);
    }

    #[test]
    fn no_nonce_keeps_signed_members_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            &[
                ("sbl1.mbn", mbn_bytes(4)),
                ("dbl.mbn", mbn_bytes(4)),
                ("notes.txt", b"x".to_vec()),
            ],
        );
        let resp = response(&[("SBL1-Blob", vec![0xCC; 4])]);

        sign_archive(&path, &resp, None).unwrap();

        let archive = ZipEditor::open(&path).unwrap();
        assert_eq!(archive.len(), 1);
        let sbl = Mbn::parse(archive.data_by_name("sbl1.mbn").unwrap()).unwrap();
        assert_eq!(sbl.signature(), &[0xCC; 4]);
    }

    #[test]
    fn missing_member_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_zip(dir.path(), &[("sbl1.mbn", mbn_bytes(4))]);
        let resp = response(&[("RamPSI-Blob", vec![0xAA; 4])]);

        assert!(matches!(
            sign_archive(&path, &resp, None),
            Err(BasebandError::MissingFile { .. })
        ));
    }
}
