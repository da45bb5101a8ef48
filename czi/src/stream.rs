use std::{fs::File, io, path::Path};

use memmap2::Mmap;

/// Random-access input. Implementations must support concurrent reads; the
/// accessors do not serialize their calls.
pub trait Stream: Send + Sync {
	/// Reads up to `buf.len()` bytes at `offset`, returning the number of
	/// bytes read (short only at end of data).
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

	fn len(&self) -> u64;

	fn is_empty(&self) -> bool { self.len() == 0 }
}

pub(crate) fn read_exact_at(stream: &dyn Stream, offset: u64, buf: &mut [u8]) -> io::Result<()> {
	let read = stream.read_at(offset, buf)?;
	if read != buf.len() {
		return Err(io::Error::new(
			io::ErrorKind::UnexpectedEof,
			format!("read {} bytes at offset {}, wanted {}", read, offset, buf.len()),
		));
	}

	Ok(())
}

/// A memory-mapped file.
pub struct FileStream {
	map: Mmap,
}

impl FileStream {
	pub fn open(path: &Path) -> io::Result<Self> {
		let file = File::open(path)?;
		Ok(Self {
			map: unsafe { Mmap::map(&file)? },
		})
	}

	pub fn as_slice(&self) -> &[u8] { &self.map }
}

impl Stream for FileStream {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
		let data: &[u8] = &self.map;
		if offset >= data.len() as u64 {
			return Ok(0);
		}

		let available = &data[offset as usize..];
		let n = buf.len().min(available.len());
		buf[..n].copy_from_slice(&available[..n]);
		Ok(n)
	}

	fn len(&self) -> u64 { self.map.len() as u64 }
}

/// An in-memory byte buffer, mainly for tests and synthetic documents.
pub struct MemoryStream {
	data: Vec<u8>,
}

impl MemoryStream {
	pub fn new(data: Vec<u8>) -> Self { Self { data } }
}

impl Stream for MemoryStream {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
		if offset >= self.data.len() as u64 {
			return Ok(0);
		}

		let available = &self.data[offset as usize..];
		let n = buf.len().min(available.len());
		buf[..n].copy_from_slice(&available[..n]);
		Ok(n)
	}

	fn len(&self) -> u64 { self.data.len() as u64 }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn memory_stream_reads() {
		let stream = MemoryStream::new(vec![1, 2, 3, 4, 5]);
		let mut buf = [0u8; 3];
		assert_eq!(stream.read_at(1, &mut buf).unwrap(), 3);
		assert_eq!(buf, [2, 3, 4]);

		// short read at the end, empty past it
		assert_eq!(stream.read_at(4, &mut buf).unwrap(), 1);
		assert_eq!(stream.read_at(9, &mut buf).unwrap(), 0);
	}

	#[test]
	fn read_exact_at_rejects_short_reads() {
		let stream = MemoryStream::new(vec![1, 2, 3]);
		let mut buf = [0u8; 4];
		assert!(read_exact_at(&stream, 0, &mut buf).is_err());
		let mut buf = [0u8; 3];
		assert!(read_exact_at(&stream, 0, &mut buf).is_ok());
	}
}
