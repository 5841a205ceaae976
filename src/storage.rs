// ===================== storage.rs =====================
//! Named-file storage the recorder writes to and uploads from.
//!
//! No rename, no transactions: the only guard against appending to a stale
//! recording is deleting it before creating a new one.

use std::{
    cell::RefCell,
    collections::HashMap,
    fs::{self, File},
    io::{self, Cursor, Read, Write},
    path::PathBuf,
    rc::Rc,
};

use log::debug;

use crate::error::{Error, Result};

pub trait StorageSink {
    type Writer: Write;
    type Reader: Read;

    fn exists(&self, name: &str) -> bool;

    /// Removes `name`; a missing file is not an error.
    fn delete(&mut self, name: &str) -> Result<()>;

    /// Creates (or truncates) `name` for sequential writes.
    fn create_for_write(&mut self, name: &str) -> Result<Self::Writer>;

    fn open_for_read(&self, name: &str) -> Result<Self::Reader>;

    fn size(&self, reader: &Self::Reader) -> io::Result<u64>;

    /// Flushes and releases a writer. Readers are released by drop.
    fn close(&mut self, writer: Self::Writer) -> io::Result<()>;
}

// ───────── files under a mount point (SD card on the device) ─────────

pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl StorageSink for DirStorage {
    type Writer = File;
    type Reader = File;

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => {
                debug!("deleted {name}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(name, e)),
        }
    }

    fn create_for_write(&mut self, name: &str) -> Result<File> {
        File::create(self.path(name)).map_err(|e| Error::storage(name, e))
    }

    fn open_for_read(&self, name: &str) -> Result<File> {
        File::open(self.path(name)).map_err(|e| Error::storage(name, e))
    }

    fn size(&self, reader: &File) -> io::Result<u64> {
        Ok(reader.metadata()?.len())
    }

    fn close(&mut self, mut writer: File) -> io::Result<()> {
        writer.flush()?;
        writer.sync_all()
    }
}

// ───────── in-RAM medium ─────────

type Files = Rc<RefCell<HashMap<String, Vec<u8>>>>;

/// RAM-backed storage. Clones share the same files, so a test can keep a
/// handle while the controller owns another.
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Files,
    unavailable: Rc<RefCell<bool>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a missing or full medium: create/open fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.borrow_mut() = unavailable;
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.borrow().len()
    }

    fn check_available(&self, name: &str) -> Result<()> {
        if *self.unavailable.borrow() {
            return Err(Error::storage(name, io::Error::new(io::ErrorKind::Other, "medium unavailable")));
        }
        Ok(())
    }
}

pub struct MemWriter {
    files: Files,
    name: String,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.borrow_mut();
        let file = files
            .get_mut(&self.name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file deleted while open"))?;
        file.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageSink for MemStorage {
    type Writer = MemWriter;
    type Reader = Cursor<Vec<u8>>;

    fn exists(&self, name: &str) -> bool {
        self.files.borrow().contains_key(name)
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        self.files.borrow_mut().remove(name);
        Ok(())
    }

    fn create_for_write(&mut self, name: &str) -> Result<MemWriter> {
        self.check_available(name)?;
        self.files.borrow_mut().insert(name.to_owned(), Vec::new());
        Ok(MemWriter { files: self.files.clone(), name: name.to_owned() })
    }

    fn open_for_read(&self, name: &str) -> Result<Cursor<Vec<u8>>> {
        self.check_available(name)?;
        self.contents(name)
            .map(Cursor::new)
            .ok_or_else(|| Error::storage(name, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn size(&self, reader: &Cursor<Vec<u8>>) -> io::Result<u64> {
        Ok(reader.get_ref().len() as u64)
    }

    fn close(&mut self, mut writer: MemWriter) -> io::Result<()> {
        writer.flush()
    }
}
