//! A minimal single-file tile container used by the command-line tools and
//! the tests as the concrete stream/repository collaborator.
//!
//! Layout (everything little-endian):
//! * `[0..4]`: Magic number: `[99, 122, 116, 115]`.
//! * `[4..6]`: The format version.
//! * `[6..8]`: Empty space. Must be 0.
//! * `[8..12]`: The number of directory entries.
//! * `[12..20]`: The offset of the directory table (from the beginning of the
//!   file).
//! * `[20..32]`: Empty space, for future use. Must be 0.
//! * `[32..table_offset]`: The sub-block payloads, back to back.
//! * `[table_offset..]`: `entry_count` fixed-size directory records.

use std::{
	fs::File,
	io::{Seek, SeekFrom, Write},
	path::Path,
	sync::RwLock,
};

use crate::{
	coord::ALL_DIMENSIONS,
	stream::FileStream,
	subblock::StreamRepository,
	CompressionMode, Coordinate, Error, IntRect, IntSize, PixelType, PyramidType,
	ReadOnlyDirectory, SubBlockEntry, WriterDirectory,
};

const MAGIC: [u8; 4] = [99, 122, 116, 115];
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: u64 = 32;
const ENTRY_SIZE: usize = 2 + 36 + 1 + 4 + 16 + 8 + 1 + 4 + 1 + 8 + 8;

fn serialize_entry(entry: &SubBlockEntry, out: &mut Vec<u8>) {
	let mut valid = 0u16;
	let mut values = [0i32; 9];
	for (i, dim) in ALL_DIMENSIONS.iter().enumerate() {
		if let Some(v) = entry.coordinate.get(*dim) {
			valid |= 1 << i;
			values[i] = v;
		}
	}

	out.extend_from_slice(&valid.to_le_bytes());
	for v in values {
		out.extend_from_slice(&v.to_le_bytes());
	}

	out.push(entry.m_index.is_some() as u8);
	out.extend_from_slice(&entry.m_index.unwrap_or(0).to_le_bytes());

	out.extend_from_slice(&entry.logical_rect.x.to_le_bytes());
	out.extend_from_slice(&entry.logical_rect.y.to_le_bytes());
	out.extend_from_slice(&entry.logical_rect.w.to_le_bytes());
	out.extend_from_slice(&entry.logical_rect.h.to_le_bytes());
	out.extend_from_slice(&entry.physical_size.w.to_le_bytes());
	out.extend_from_slice(&entry.physical_size.h.to_le_bytes());

	out.push(entry.pixel_type.as_raw());
	out.extend_from_slice(&entry.compression.as_raw().to_le_bytes());
	out.push(entry.pyramid_type.as_raw());

	out.extend_from_slice(&entry.file_position.to_le_bytes());
	out.extend_from_slice(&entry.data_size.to_le_bytes());
}

fn deserialize_entry(record: &[u8]) -> Result<SubBlockEntry, Error> {
	let i32_at = |off: usize| i32::from_le_bytes(record[off..off + 4].try_into().unwrap());
	let u32_at = |off: usize| u32::from_le_bytes(record[off..off + 4].try_into().unwrap());
	let u64_at = |off: usize| u64::from_le_bytes(record[off..off + 8].try_into().unwrap());

	let valid = u16::from_le_bytes(record[0..2].try_into().unwrap());
	let mut coordinate = Coordinate::new();
	for (i, dim) in ALL_DIMENSIONS.iter().enumerate() {
		if valid & (1 << i) != 0 {
			coordinate.set(*dim, i32_at(2 + i * 4));
		}
	}

	let m_index = if record[38] != 0 { Some(i32_at(39)) } else { None };

	let logical_rect = IntRect::new(i32_at(43), i32_at(47), i32_at(51), i32_at(55));
	let physical_size = IntSize {
		w: u32_at(59),
		h: u32_at(63),
	};

	if !logical_rect.is_valid() || physical_size.w == 0 || physical_size.h == 0 {
		return Err(Error::UnsupportedFormat("directory entry with an empty extent".into()));
	}

	let pixel_type = PixelType::from_raw(record[67]);
	if pixel_type == PixelType::Invalid {
		return Err(Error::UnsupportedFormat(format!(
			"directory entry with unknown pixel type {}",
			record[67]
		)));
	}

	Ok(SubBlockEntry {
		coordinate,
		m_index,
		logical_rect,
		physical_size,
		pixel_type,
		compression: CompressionMode::from_raw(i32_at(68)),
		pyramid_type: PyramidType::from_raw(record[72]),
		file_position: u64_at(73),
		data_size: u64_at(81),
	})
}

struct Locked {
	file: File,
	directory: WriterDirectory,
	next_offset: u64,
}

/// Appends sub-blocks to a new container file. Payloads are written as they
/// arrive; [`TileStoreBuilder::finish`] writes the directory table and the
/// final header.
pub struct TileStoreBuilder {
	locked: RwLock<Locked>,
}

impl TileStoreBuilder {
	pub fn create(path: &Path) -> Result<Self, Error> {
		let mut file = File::create(path)?;
		file.write_all(&[0u8; HEADER_SIZE as usize])?;

		Ok(Self {
			locked: RwLock::new(Locked {
				file,
				directory: WriterDirectory::new(),
				next_offset: HEADER_SIZE,
			}),
		})
	}

	/// Appends a payload and its directory entry; `file_position` and
	/// `data_size` of the entry are filled in here. Returns false (and writes
	/// nothing) if the directory rejects the entry as a duplicate.
	pub fn add_sub_block(&self, mut entry: SubBlockEntry, payload: &[u8]) -> Result<bool, Error> {
		tracy::zone!("Write sub-block");

		let mut locked = self.locked.write().unwrap();
		entry.file_position = locked.next_offset;
		entry.data_size = payload.len() as u64;

		if !locked.directory.try_add(entry) {
			return Ok(false);
		}

		locked.file.seek(SeekFrom::Start(entry.file_position))?;
		locked.file.write_all(payload)?;
		locked.next_offset += payload.len() as u64;
		Ok(true)
	}

	pub fn sub_block_count(&self) -> usize { self.locked.read().unwrap().directory.len() }

	pub fn finish(self) -> Result<(), Error> {
		tracy::zone!("Finish store");

		let mut locked = self.locked.into_inner().unwrap();
		let table_offset = locked.next_offset;
		let count = locked.directory.len() as u32;

		let mut table = Vec::with_capacity(count as usize * ENTRY_SIZE);
		locked.directory.for_each(|_, entry| {
			serialize_entry(entry, &mut table);
			true
		});

		locked.file.seek(SeekFrom::Start(table_offset))?;
		locked.file.write_all(&table)?;

		let mut header = [0u8; HEADER_SIZE as usize];
		header[0..4].copy_from_slice(&MAGIC);
		header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
		header[8..12].copy_from_slice(&count.to_le_bytes());
		header[12..20].copy_from_slice(&table_offset.to_le_bytes());
		locked.file.seek(SeekFrom::Start(0))?;
		locked.file.write_all(&header)?;
		locked.file.flush()?;

		Ok(())
	}
}

/// Opens a container file and returns the repository the accessors consume.
pub fn open_store(path: &Path) -> Result<StreamRepository<FileStream>, Error> {
	let stream = FileStream::open(path)?;
	let data = stream.as_slice();

	if data.len() < HEADER_SIZE as usize {
		return Err(Error::UnsupportedFormat("file too small for a store header".into()));
	}

	if data[0..4] != MAGIC {
		return Err(Error::UnsupportedFormat("bad magic number".into()));
	}

	let version = u16::from_le_bytes(data[4..6].try_into().unwrap());
	if version != FORMAT_VERSION {
		return Err(Error::UnsupportedFormat(format!(
			"unknown format version {}",
			version
		)));
	}

	let count = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
	let table_offset = u64::from_le_bytes(data[12..20].try_into().unwrap()) as usize;

	let table_end = count
		.checked_mul(ENTRY_SIZE)
		.and_then(|size| table_offset.checked_add(size))
		.filter(|&end| end <= data.len())
		.ok_or_else(|| Error::UnsupportedFormat("directory table is out of bounds".into()))?;

	let mut directory = ReadOnlyDirectory::new();
	for record in data[table_offset..table_end].chunks_exact(ENTRY_SIZE) {
		let entry = deserialize_entry(record)?;
		if entry
			.file_position
			.checked_add(entry.data_size)
			.map_or(true, |end| end > table_offset as u64)
		{
			return Err(Error::UnsupportedFormat("payload is out of bounds".into()));
		}

		directory.add(entry);
	}
	directory.adding_finished();

	Ok(StreamRepository::new(directory, stream))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		compress, coord::Dimension, subblock::SubBlockRepository, Bitmap, ZstdCompressParams,
	};

	fn temp_path(name: &str) -> std::path::PathBuf {
		let mut path = std::env::temp_dir();
		path.push(format!("czi-store-test-{}-{}", std::process::id(), name));
		path
	}

	fn gray8_entry(x: i32, y: i32, size: u32, m: i32) -> SubBlockEntry {
		SubBlockEntry {
			coordinate: Coordinate::from_pairs(&[(Dimension::C, 0)]),
			m_index: Some(m),
			logical_rect: IntRect::new(x, y, size as i32, size as i32),
			physical_size: IntSize { w: size, h: size },
			pixel_type: PixelType::Gray8,
			compression: CompressionMode::Zstd0,
			pyramid_type: PyramidType::None,
			file_position: 0,
			data_size: 0,
		}
	}

	#[test]
	fn write_and_read_back() {
		let path = temp_path("roundtrip");
		{
			let builder = TileStoreBuilder::create(&path).unwrap();
			for (i, (x, y)) in [(0, 0), (8, 0), (0, 8)].iter().enumerate() {
				let bitmap = Bitmap::new(PixelType::Gray8, 8, 8).unwrap();
				{
					let mut lock = bitmap.lock();
					for row in 0..8 {
						lock.row_mut(row).fill(i as u8 + 1);
					}
				}
				let payload = compress::compress_bitmap(
					&bitmap,
					CompressionMode::Zstd0,
					&ZstdCompressParams::default(),
				)
				.unwrap();
				assert!(builder
					.add_sub_block(gray8_entry(*x, *y, 8, i as i32), &payload)
					.unwrap());
			}
			builder.finish().unwrap();
		}

		let repo = open_store(&path).unwrap();
		assert_eq!(repo.directory().len(), 3);
		assert_eq!(
			repo.statistics().bounding_box,
			IntRect::new(0, 0, 16, 16)
		);

		// find the tile at (8, 0) and check its pixels survived
		let mut index = None;
		repo.enum_subset(None, Some(&IntRect::new(8, 0, 1, 1)), true, &mut |i, _| {
			index = Some(i);
			true
		});
		let sub_block = repo.read_sub_block(index.unwrap()).unwrap();
		let bitmap = sub_block.bitmap().unwrap();
		assert_eq!(bitmap.lock().row(3)[5], 2);

		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn duplicate_entries_are_not_written() {
		let path = temp_path("duplicates");
		let builder = TileStoreBuilder::create(&path).unwrap();
		assert!(builder
			.add_sub_block(gray8_entry(0, 0, 4, 0), &[0u8; 16])
			.unwrap());
		assert!(!builder
			.add_sub_block(gray8_entry(4, 4, 4, 0), &[0u8; 16])
			.unwrap());
		assert_eq!(builder.sub_block_count(), 1);
		builder.finish().unwrap();

		// the rejected payload must not leak into the file
		let repo = open_store(&path).unwrap();
		assert_eq!(repo.directory().len(), 1);
		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn open_rejects_foreign_files() {
		let path = temp_path("foreign");
		std::fs::write(&path, b"not a tile store at all, promise").unwrap();
		assert!(open_store(&path).is_err());
		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn entry_serialization_roundtrip() {
		let mut entry = gray8_entry(-5, 7, 16, 3);
		entry.coordinate.set(Dimension::S, 2);
		entry.file_position = 12345;
		entry.data_size = 678;

		let mut buf = Vec::new();
		serialize_entry(&entry, &mut buf);
		assert_eq!(buf.len(), ENTRY_SIZE);

		let back = deserialize_entry(&buf).unwrap();
		assert_eq!(back.coordinate, entry.coordinate);
		assert_eq!(back.m_index, entry.m_index);
		assert_eq!(back.logical_rect, entry.logical_rect);
		assert_eq!(back.physical_size, entry.physical_size);
		assert_eq!(back.pixel_type, entry.pixel_type);
		assert_eq!(back.compression, entry.compression);
		assert_eq!(back.file_position, 12345);
		assert_eq!(back.data_size, 678);
	}
}
