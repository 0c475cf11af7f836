use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Interface for backing storage. Reads past the current size yield zero bytes.
pub trait Storage {
    /// Current size of the underlying storage.
    fn size(&self) -> u64;

    /// Read from the underlying storage.
    fn read(&mut self, off: u64, bytes: &mut [u8]) -> std::io::Result<()>;

    /// Write to the underlying storage, extending it as needed.
    fn write(&mut self, off: u64, bytes: &[u8]) -> std::io::Result<()>;

    /// Flush buffered writes to durable storage.
    fn sync(&mut self) -> std::io::Result<()>;
}

/// Storage implemented using std::fs::File.
pub struct FileStorage {
    file: File,
    size: u64,
}

impl FileStorage {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl Storage for FileStorage {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, off: u64, bytes: &mut [u8]) -> std::io::Result<()> {
        for b in bytes.iter_mut() {
            *b = 0;
        }
        if off >= self.size {
            return Ok(());
        }
        let avail = (self.size - off).min(bytes.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(&mut bytes[..avail])
    }

    fn write(&mut self, off: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(bytes)?;
        self.size = self.size.max(off + bytes.len() as u64);
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all()
    }
}

/// In-memory storage, used for tests and for databases without a directory.
#[derive(Default)]
pub struct MemStorage {
    data: Vec<u8>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, off: u64, bytes: &mut [u8]) -> std::io::Result<()> {
        for b in bytes.iter_mut() {
            *b = 0;
        }
        let off = off as usize;
        if off < self.data.len() {
            let avail = (self.data.len() - off).min(bytes.len());
            bytes[..avail].copy_from_slice(&self.data[off..off + avail]);
        }
        Ok(())
    }

    fn write(&mut self, off: u64, bytes: &[u8]) -> std::io::Result<()> {
        let end = off as usize + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[off as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
