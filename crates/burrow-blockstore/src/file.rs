//! Backing block file
//!
//! A single seekable file split into fixed-size clusters; cluster `i` starts at
//! byte `i * cluster_size`. The file grows in allocation-unit steps as clusters
//! near its end are written, but never past the store size.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The cluster-addressed file behind a cache store
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    cluster_size: u64,
    allocation_unit: u64,
    len: u64,
}

impl BlockFile {
    /// Open or create the file at `path`
    pub fn open(path: impl AsRef<Path>, cluster_size: u64, allocation_unit: u64) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            cluster_size,
            allocation_unit,
            len,
        })
    }

    /// Open an existing file without write access, so every write fails
    #[cfg(test)]
    pub(crate) fn open_read_only(
        path: impl AsRef<Path>,
        cluster_size: u64,
        allocation_unit: u64,
    ) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            cluster_size,
            allocation_unit,
            len,
        })
    }

    /// Current length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow or truncate the file to exactly `len` bytes
    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Make sure `cluster` fits, growing by whole allocation units up to `limit`
    fn reserve(&mut self, cluster: u64, limit: u64) -> io::Result<()> {
        let end = (cluster + 1) * self.cluster_size;
        if end <= self.len {
            return Ok(());
        }
        if end > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cluster {} lies beyond the store bound", cluster),
            ));
        }
        let grown = end.div_ceil(self.allocation_unit) * self.allocation_unit;
        let target = grown.min(limit);
        tracing::debug!(from = self.len, to = target, "Growing block file");
        self.set_len(target)
    }

    /// Write one cluster's worth (or less) of data at the start of `cluster`
    pub fn write_cluster(&mut self, cluster: u64, data: &[u8], limit: u64) -> io::Result<()> {
        debug_assert!(data.len() as u64 <= self.cluster_size);
        self.reserve(cluster, limit)?;
        self.file.seek(SeekFrom::Start(cluster * self.cluster_size))?;
        self.file.write_all(data)
    }

    /// Fill `buf` from the start of `cluster`
    ///
    /// Fails if the cluster lies past the end of the file.
    pub fn read_cluster(&mut self, cluster: u64, buf: &mut [u8]) -> io::Result<()> {
        let offset = cluster * self.cluster_size;
        if offset + buf.len() as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("cluster {} lies past the end of the block file", cluster),
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    /// Flush written data to disk
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}
