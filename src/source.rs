//! Where the bytes of a DDF come from.
use super::*;
use memmap::{Mmap, MmapOptions};
use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::Path,
};

/// A forward-only supply of bytes that knows where it is.
pub trait ByteSource {
    /// Fill `buf` from the current position.
    ///
    /// Returns fewer bytes than requested only at the end of the source.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Bytes read so far.
    fn position(&self) -> u64;

    /// Total size of the source.
    fn length(&self) -> u64;

    fn is_at_end(&self) -> bool {
        self.position() >= self.length()
    }
}

/// Reads from any seekable stream, usually a buffered file.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    position: u64,
    length: u64,
}
impl<R> StreamSource<R>
where
    R: Read + Seek,
{
    /// Wrap `inner`, starting at its current position.
    pub fn new(mut inner: R) -> Result<Self> {
        let position = inner.stream_position()?;
        let length = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self {
            inner,
            position,
            length,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
impl<R> ByteSource for StreamSource<R>
where
    R: Read + Seek,
{
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> u64 {
        self.length
    }
}

/// A read-only memory map of a whole file.
#[derive(Debug)]
pub struct MappedFile(Mmap);
impl MappedFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self(mmap))
    }
}
impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reads from bytes that are already in memory, e.g. a memory mapped file.
#[derive(Debug)]
pub struct SliceSource<B> {
    data: B,
    position: usize,
}
impl<B> SliceSource<B>
where
    B: AsRef<[u8]>,
{
    pub fn new(data: B) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.data.as_ref()[self.position..]
    }
}
impl<B> ByteSource for SliceSource<B>
where
    B: AsRef<[u8]>,
{
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.remaining();
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn length(&self) -> u64 {
        self.data.as_ref().len() as u64
    }
}
