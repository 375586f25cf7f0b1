//! The scratch buffer the worker reads from.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// How a write session treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Start over: create or truncate the file.
    Truncate,
    /// Continue after the bytes already written.
    Append,
}

/// A single reusable file holding the active request's bytes.
///
/// Sessions on the buffer are strictly sequential; the engine only ever has
/// one open at a time.
#[derive(Debug)]
pub struct ScratchBuffer {
    path: PathBuf,
    /// Removes the file on drop when the buffer owns it.
    _temp: Option<TempPath>,
}

impl ScratchBuffer {
    /// Create a uniquely named file in `dir` (or the system temp dir) that is
    /// deleted when the buffer is dropped.
    pub fn temporary(dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("streat-").suffix(".scratch");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let temp = file.into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// Use a caller-managed path. The file is left in place on drop.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a write session.
    pub async fn open(&self, mode: SessionMode) -> io::Result<ScratchSession> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            SessionMode::Truncate => options.write(true).truncate(true),
            SessionMode::Append => options.append(true),
        };
        let file = options.open(&self.path).await?;
        Ok(ScratchSession {
            file: BufWriter::new(file),
            written: 0,
        })
    }
}

/// An open write session on the scratch buffer.
#[derive(Debug)]
pub struct ScratchSession {
    file: BufWriter<File>,
    written: u64,
}

impl ScratchSession {
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written in this session.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and close. Once this returns, a reader sees every written byte.
    pub async fn finish(mut self) -> io::Result<u64> {
        self.file.flush().await?;
        Ok(self.written)
    }
}
