use std::{
    collections::HashMap,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Bytes held in memory for early parts before they go to disk.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

enum Pending {
    Memory(Vec<u8>),
    Spilled(PathBuf),
}

/// Writes parts of one track file strictly in position order.
///
/// Parts arriving early are held until every part before them has been
/// written. Once the held bytes would exceed the memory limit, further early
/// parts are spilled to `<file>.<pos>.part` next to the track file.
pub struct Merger {
    file: File,
    path: PathBuf,
    pending: HashMap<usize, Pending>,
    next: usize,
    size: usize,
    stored_bytes: usize,
    buffered_bytes: usize,
    memory_limit: usize,
}

impl Merger {
    pub fn new(size: usize, path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            path: path.to_path_buf(),
            pending: HashMap::new(),
            next: 0,
            size,
            stored_bytes: 0,
            buffered_bytes: 0,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        })
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn write(&mut self, pos: usize, buf: Vec<u8>) -> io::Result<()> {
        self.stored_bytes += buf.len();

        if pos == self.next {
            self.file.write_all(&buf)?;
            self.next += 1;
            return self.flush();
        }

        if self.buffered_bytes + buf.len() > self.memory_limit {
            let spill = self.spill_path(pos);
            std::fs::write(&spill, &buf)?;
            self.pending.insert(pos, Pending::Spilled(spill));
        } else {
            self.buffered_bytes += buf.len();
            self.pending.insert(pos, Pending::Memory(buf));
        }

        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        while let Some(pending) = self.pending.remove(&self.next) {
            match pending {
                Pending::Memory(buf) => {
                    self.buffered_bytes -= buf.len();
                    self.file.write_all(&buf)?;
                }
                Pending::Spilled(spill) => {
                    self.file.write_all(&std::fs::read(&spill)?)?;
                    std::fs::remove_file(&spill)?;
                }
            }

            self.next += 1;
        }

        self.file.flush()
    }

    fn spill_path(&self, pos: usize) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{pos}.part"));
        self.path.with_file_name(name)
    }

    /// Every part was written.
    pub fn finished(&self) -> bool {
        self.pending.is_empty() && self.next >= self.size
    }

    pub fn stored(&self) -> usize {
        self.stored_bytes
    }
}
