//! Zip archive rewriter.
//!
//! The baseband signer edits an archive heavily: members are patched,
//! replaced, added and dropped. To keep recorded member indices valid
//! across deletions, the editor loads the whole archive up front, edits
//! in memory, and rebuilds the file on commit.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum ZipEditError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("No such member: {0}")]
    NotFound(String),
}

struct Entry {
    name: String,
    data: Vec<u8>,
}

pub struct ZipEditor {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl ZipEditor {
    /// Opens an archive and loads every file member into memory.
    pub fn open(path: &Path) -> Result<Self, ZipEditError> {
        let file = std::fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut member = archive.by_index(index)?;
            if member.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(member.size() as usize);
            member.read_to_end(&mut data)?;
            entries.push(Entry {
                name: member.name().to_string(),
                data,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.entries[index].name
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn entry_data(&self, index: usize) -> &[u8] {
        &self.entries[index].data
    }

    pub fn data_by_name(&self, name: &str) -> Result<&[u8], ZipEditError> {
        self.index_of(name)
            .map(|i| self.entry_data(i))
            .ok_or_else(|| ZipEditError::NotFound(name.into()))
    }

    pub fn replace(&mut self, index: usize, data: Vec<u8>) {
        self.entries[index].data = data;
    }

    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.entries.push(Entry {
            name: name.into(),
            data,
        });
    }

    /// Drops every member the predicate rejects. Indices passed to the
    /// predicate are the pre-removal ones, so an index set recorded
    /// earlier stays meaningful.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &str) -> bool) {
        let mut index = 0;
        self.entries.retain(|entry| {
            let keep_it = keep(index, &entry.name);
            index += 1;
            keep_it
        });
    }

    /// Rebuilds the archive on disk with the current member set.
    pub fn commit(self) -> Result<(), ZipEditError> {
        let file = std::fs::File::create(&self.path)?;
        let mut writer = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in &self.entries {
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(&entry.data)?;
        }
        writer.finish()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path) -> PathBuf {
        let path = dir.join("fixture.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in [
            ("psi_ram.fls", b"AAAA".as_slice()),
            ("ebl.fls", b"BBBB"),
            ("unrelated.txt", b"hello"),
        ] {
            writer.start_file(name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn read_replace_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());

        let mut editor = ZipEditor::open(&path).unwrap();
        assert_eq!(editor.len(), 3);
        assert_eq!(editor.data_by_name("ebl.fls").unwrap(), b"BBBB");

        let idx = editor.index_of("psi_ram.fls").unwrap();
        editor.replace(idx, b"patched".to_vec());
        editor.add("bbticket.der", vec![0xBB; 4]);
        editor.commit().unwrap();

        let editor = ZipEditor::open(&path).unwrap();
        assert_eq!(editor.data_by_name("psi_ram.fls").unwrap(), b"patched");
        assert_eq!(editor.data_by_name("bbticket.der").unwrap(), &[0xBB; 4]);
        assert_eq!(editor.len(), 4);
    }

    #[test]
    fn retain_uses_stable_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());

        let mut editor = ZipEditor::open(&path).unwrap();
        // Keep index 1 only; removal of index 0 must not shift it
        editor.retain(|index, _| index == 1);
        editor.commit().unwrap();

        let editor = ZipEditor::open(&path).unwrap();
        assert_eq!(editor.len(), 1);
        assert_eq!(editor.name(0), "ebl.fls");
    }

    #[test]
    fn missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let editor = ZipEditor::open(&path).unwrap();
        assert!(matches!(
            editor.data_by_name("nope"),
            Err(ZipEditError::NotFound(_))
        ));
    }
}
