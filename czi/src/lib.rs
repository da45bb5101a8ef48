//! A library for working with tiled, multi-dimensional microscopy images.
//!
//! A document is a large virtual canvas composed of many small rectangular
//! sub-blocks. Every sub-block carries a coordinate in a discrete index space
//! (channel C, Z-plane Z, time T, rotation R, scene S, illumination I, phase
//! H, view V, block B), an optional mosaic index M, a logical rectangle on
//! the canvas and the extent of its stored pixels. Stored extent == logical
//! extent marks a full-resolution ("layer 0") tile; smaller stored extents
//! form the pyramid layers used for zoomed-out rendering.
//!
//! ## Payload formats
//!
//! Sub-block payloads come in four flavors:
//! * **Uncompressed**: the pixels with minimal stride, little-endian.
//! * **JPEG-XR**: a bare JPEG-XR codestream, no wrapper.
//! * **zstd (plain)**: exactly one zstd frame holding
//!   `width * bytes_per_pel * height` bytes.
//! * **zstd (chunked)**: a small header, then one zstd frame.
//!
//! The chunked header starts with a size field counting the whole header
//! including itself, encoded as an MSB-continuation varint of at most three
//! bytes (so at most 0x3FFFFF). Chunks follow, each introduced by an id
//! encoded the same way. The only defined chunk is id 1 with a single payload
//! byte; its bit 0 states that the frame content was split into a low-byte
//! plane followed by a high-byte plane before compression (only meaningful
//! for the 16-bit-per-component pixel types). So `03 01 01` announces the
//! byte-split, `03 01 00` denies it, and a bare `01` is the legal short form
//! for "no preprocessing". Unknown chunks are rejected since their length
//! cannot be known.
//!
//! ## Rendering
//!
//! The accessors compose a region of interest of a single plane: the
//! [`SingleChannelTileAccessor`](accessor::SingleChannelTileAccessor) blits
//! the layer-0 tiles unscaled, the
//! [`SingleChannelScalingTileAccessor`](accessor::SingleChannelScalingTileAccessor)
//! picks the pyramid layer just above a requested zoom factor and scales it
//! with a nearest-neighbor kernel. Decoded tiles can be held in a
//! [`SubBlockCache`] with memory- and count-bounded eviction.

use std::{
	error::Error as StdError,
	fmt::{Debug, Display, Formatter},
};

mod accessor;
mod bitmap;
mod bitonal;
mod cache;
mod compositor;
mod compress;
mod coord;
mod cover;
mod decoder;
mod directory;
mod lohi;
mod ops;
mod pixel;
mod statistics;
mod store;
mod stream;
mod subblock;

pub use accessor::{
	compose_single_channel_tiles, compose_single_tile, AccessorOptions,
	SingleChannelPyramidLayerTileAccessor, SingleChannelScalingTileAccessor,
	SingleChannelTileAccessor,
};
pub use bitmap::{Bitmap, BitmapLock, BitonalBitmap};
pub use bitonal::copy_at;
pub use cache::{
	CacheStatistics, PruneOptions, SubBlockCache, CACHE_STAT_ELEMENTS_COUNT, CACHE_STAT_MEMORY_USAGE,
};
pub use compositor::{
	compose_multi_channel_bgr24, compose_multi_channel_bgra32, lut_from_gamma, ChannelInfo,
};
pub use compress::{
	compress_bitmap, compress_zstd0, compress_zstd0_alloc, compress_zstd1, compress_zstd1_alloc,
	jxr_encode, max_compressed_size_zstd0, max_compressed_size_zstd1, JxrChroma, JxrEncodeParams,
	JxrOverlap, ZstdCompressParams,
};
pub use coord::{Coordinate, DimBounds, Dimension, ALL_DIMENSIONS};
pub use cover::CoverageCalculator;
pub use decoder::{DecoderRegistry, ImageDecoder};
pub use directory::{
	PixelTypeForChannel, ReadOnlyDirectory, ReaderWriterDirectory, SubBlockEntry, WriterDirectory,
};
pub use lohi::{pack, unpack};
pub use ops::{
	bgr48_swap_red_blue, copy, copy_with_offset, fill, md5_of_bitmap, nn_resize,
};
pub use pixel::{
	CompressionMode, DblRect, IntRect, IntSize, PixelType, PyramidType, Rgb8Color, RgbFloatColor,
};
pub use statistics::{
	try_determine_pyramid_layer_info, PyramidLayerInfo, PyramidLayerStatistics, PyramidStatistics,
	SceneBoundingBoxes, StatisticsBuilder, SubBlockStatistics, NO_SCENE,
};
pub use store::{open_store, TileStoreBuilder};
pub use stream::{FileStream, MemoryStream, Stream};
pub use subblock::{StreamRepository, SubBlock, SubBlockRepository};

pub enum Error {
	/// A caller-supplied value is out of range or inconsistent.
	InvalidArgument(String),
	/// The requested pixel-type pair has no converter.
	UnsupportedPixelConversion { from: PixelType, to: PixelType },
	/// No sub-block was found to derive the output pixel type from.
	CouldNotDeterminePixelType,
	/// A payload or header failed to parse or decode.
	CorruptCompressedData(String),
	/// The destination buffer cannot hold the encoder output; retry with a
	/// larger buffer (see the `max_compressed_size` helpers).
	InsufficientOutputBuffer,
	/// The data is recognized but not supported.
	UnsupportedFormat(String),
	/// A plane coordinate lies outside the range covered by the document.
	OutOfRangeCoordinate,
	Io(std::io::Error),
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
		match self {
			Self::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
			Self::UnsupportedPixelConversion { from, to } => {
				write!(f, "No conversion from pixel type {} to {}", from, to)
			},
			Self::CouldNotDeterminePixelType => write!(f, "Could not determine the pixel type"),
			Self::CorruptCompressedData(what) => write!(f, "Corrupt compressed data: {}", what),
			Self::InsufficientOutputBuffer => write!(f, "The output buffer is too small"),
			Self::UnsupportedFormat(what) => write!(f, "Unsupported format: {}", what),
			Self::OutOfRangeCoordinate => write!(f, "Coordinate out of range"),
			Self::Io(x) => write!(f, "IO error: {}", x),
		}
	}
}

impl Debug for Error {
	fn fmt(&self, f: &mut Formatter) -> std::fmt::Result { Display::fmt(self, f) }
}

impl StdError for Error {}

impl From<std::io::Error> for Error {
	fn from(x: std::io::Error) -> Self { Self::Io(x) }
}
