use std::sync::Arc;

use crate::{
	coord::Dimension,
	statistics::SubBlockStatistics,
	stream::{read_exact_at, Stream},
	Bitmap, Coordinate, DecoderRegistry, Error, IntRect, ReadOnlyDirectory, SubBlockEntry,
};

/// A sub-block pulled from the document: its directory entry plus the raw
/// (still encoded) payload.
pub struct SubBlock {
	pub info: SubBlockEntry,
	pub data: Arc<[u8]>,
}

impl SubBlock {
	/// Decodes the payload into a bitmap via the decoder registry.
	pub fn bitmap(&self) -> Result<Bitmap, Error> {
		let decoder = DecoderRegistry::global().get(self.info.compression)?;
		decoder.decode(
			&self.data,
			self.info.pixel_type,
			self.info.physical_size.w,
			self.info.physical_size.h,
		)
	}
}

/// What the accessors need from the document: directory queries plus payload
/// retrieval.
pub trait SubBlockRepository: Send + Sync {
	/// Visits every entry compatible with `plane` intersecting `roi`,
	/// optionally restricted to layer 0. The visitor returns `false` to stop.
	fn enum_subset(
		&self, plane: Option<&Coordinate>, roi: Option<&IntRect>, only_layer0: bool,
		visitor: &mut dyn FnMut(i32, &SubBlockEntry) -> bool,
	);

	fn read_sub_block(&self, index: i32) -> Result<SubBlock, Error>;

	fn statistics(&self) -> &SubBlockStatistics;

	/// An arbitrary entry of the given channel, used to determine the output
	/// pixel type when the caller does not specify one.
	fn sub_block_info_for_channel(&self, channel: i32) -> Option<SubBlockEntry>;
}

/// The standard repository: a frozen directory over a random-access stream.
pub struct StreamRepository<S: Stream> {
	directory: ReadOnlyDirectory,
	stream: S,
}

impl<S: Stream> StreamRepository<S> {
	pub fn new(directory: ReadOnlyDirectory, stream: S) -> Self { Self { directory, stream } }

	pub fn directory(&self) -> &ReadOnlyDirectory { &self.directory }

	pub fn directory_mut(&mut self) -> &mut ReadOnlyDirectory { &mut self.directory }
}

impl<S: Stream> SubBlockRepository for StreamRepository<S> {
	fn enum_subset(
		&self, plane: Option<&Coordinate>, roi: Option<&IntRect>, only_layer0: bool,
		visitor: &mut dyn FnMut(i32, &SubBlockEntry) -> bool,
	) {
		self.directory.enum_subset(plane, roi, only_layer0, visitor);
	}

	fn read_sub_block(&self, index: i32) -> Result<SubBlock, Error> {
		tracy::zone!("Read sub-block");

		let info = *self
			.directory
			.get(index)
			.ok_or_else(|| Error::InvalidArgument(format!("no sub-block with index {}", index)))?;

		let mut data = vec![0u8; info.data_size as usize];
		read_exact_at(&self.stream, info.file_position, &mut data)?;

		Ok(SubBlock {
			info,
			data: data.into(),
		})
	}

	fn statistics(&self) -> &SubBlockStatistics { self.directory.statistics() }

	fn sub_block_info_for_channel(&self, channel: i32) -> Option<SubBlockEntry> {
		let mut found = None;
		self.directory.for_each(|_, entry| {
			let matches = match entry.coordinate.get(Dimension::C) {
				Some(c) => c == channel,
				// entries without a channel dimension belong to every channel
				None => true,
			};
			if matches {
				found = Some(*entry);
				false
			} else {
				true
			}
		});

		found
	}
}
