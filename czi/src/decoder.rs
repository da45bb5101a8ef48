use std::{io::Cursor, sync::OnceLock};

use crate::{lohi, ops, Bitmap, CompressionMode, Error, PixelType};

/// Decodes one sub-block payload into a bitmap. The expected pixel type and
/// extent come from the directory entry and are validated against the
/// stream's own declaration.
pub trait ImageDecoder: Send + Sync {
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error>;
}

/// The set of payload decoders, resolved once at startup.
#[derive(Default)]
pub struct DecoderRegistry {
	uncompressed: UncompressedDecoder,
	jxr: JxrDecoder,
	zstd0: Zstd0Decoder,
	zstd1: Zstd1Decoder,
}

impl DecoderRegistry {
	pub fn global() -> &'static DecoderRegistry {
		static REGISTRY: OnceLock<DecoderRegistry> = OnceLock::new();
		REGISTRY.get_or_init(DecoderRegistry::default)
	}

	pub fn get(&self, mode: CompressionMode) -> Result<&dyn ImageDecoder, Error> {
		match mode {
			CompressionMode::Uncompressed => Ok(&self.uncompressed),
			CompressionMode::JpgXr => Ok(&self.jxr),
			CompressionMode::Zstd0 => Ok(&self.zstd0),
			CompressionMode::Zstd1 => Ok(&self.zstd1),
			other => Err(Error::UnsupportedFormat(format!(
				"no decoder for compression mode {:?}",
				other
			))),
		}
	}
}

/// "Decoder" for uncompressed payloads: the pixels with minimal stride in
/// little-endian canonical order. Big-endian hosts byte-swap the 16-bit
/// component types on load.
#[derive(Default)]
pub struct UncompressedDecoder;

impl ImageDecoder for UncompressedDecoder {
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		let stride = width * pixel_type.bytes_per_pel();
		let expected = stride as usize * height as usize;
		if data.len() < expected {
			return Err(Error::CorruptCompressedData(format!(
				"uncompressed payload holds {} bytes, expected {}",
				data.len(),
				expected
			)));
		}

		let bitmap = Bitmap::from_data(pixel_type, width, height, stride, data)?;
		ops::convert_to_host_byte_order(&bitmap);
		Ok(bitmap)
	}
}

#[derive(Default)]
pub struct JxrDecoder;

fn jxr_error(e: jpegxr::JXRError) -> Error {
	Error::CorruptCompressedData(format!("jpeg-xr decoder: {}", e))
}

enum JxrPostprocess {
	None,
	SwapRb24,
	StripFourthByte,
	SwapRb48,
}

impl ImageDecoder for JxrDecoder {
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		tracy::zone!("Decode jpeg-xr");

		use jpegxr::PixelFormat as Jxr;

		let mut decoder = jpegxr::ImageDecode::with_reader(Cursor::new(data)).map_err(jxr_error)?;
		let (w, h) = decoder.get_size().map_err(jxr_error)?;
		if w != width as i32 || h != height as i32 {
			return Err(Error::CorruptCompressedData(format!(
				"jpeg-xr stream is {}x{}, directory says {}x{}",
				w, h, width, height
			)));
		}

		// we answer the stream's own format with the closest supported one
		let format = decoder.get_pixel_format().map_err(jxr_error)?;
		let (decoded_type, stream_bpp, post) = match format {
			Jxr::PixelFormat24bppBGR => (PixelType::Bgr24, 3, JxrPostprocess::None),
			Jxr::PixelFormat24bppRGB => (PixelType::Bgr24, 3, JxrPostprocess::SwapRb24),
			Jxr::PixelFormat32bppBGR | Jxr::PixelFormat32bppBGRA => {
				(PixelType::Bgr24, 4, JxrPostprocess::StripFourthByte)
			},
			Jxr::PixelFormat8bppGray => (PixelType::Gray8, 1, JxrPostprocess::None),
			Jxr::PixelFormat16bppGray => (PixelType::Gray16, 2, JxrPostprocess::None),
			// the codec emits RGB48, the canonical in-memory order is BGR
			Jxr::PixelFormat48bppRGB => (PixelType::Bgr48, 6, JxrPostprocess::SwapRb48),
			Jxr::PixelFormat32bppGrayFloat => (PixelType::Gray32Float, 4, JxrPostprocess::None),
			other => {
				return Err(Error::UnsupportedFormat(format!(
					"jpeg-xr stream pixel format {:?} is not supported",
					other
				)))
			},
		};

		if decoded_type != pixel_type {
			return Err(Error::CorruptCompressedData(format!(
				"jpeg-xr stream decodes to {}, directory says {}",
				decoded_type, pixel_type
			)));
		}

		let stream_stride = width as usize * stream_bpp;
		let mut buffer = vec![0u8; stream_stride * height as usize];
		decoder.copy_all(&mut buffer, stream_stride).map_err(jxr_error)?;

		match post {
			JxrPostprocess::None => {
				Bitmap::from_data(pixel_type, width, height, stream_stride as u32, &buffer)
			},
			JxrPostprocess::SwapRb24 => {
				for px in buffer.chunks_exact_mut(3) {
					px.swap(0, 2);
				}
				Bitmap::from_data(pixel_type, width, height, stream_stride as u32, &buffer)
			},
			JxrPostprocess::StripFourthByte => {
				let mut packed = vec![0u8; width as usize * 3 * height as usize];
				for (dst, src) in packed.chunks_exact_mut(3).zip(buffer.chunks_exact(4)) {
					dst.copy_from_slice(&src[..3]);
				}
				Bitmap::from_data(pixel_type, width, height, width * 3, &packed)
			},
			JxrPostprocess::SwapRb48 => {
				let bitmap = Bitmap::from_data(pixel_type, width, height, stream_stride as u32, &buffer)?;
				ops::bgr48_swap_red_blue(&bitmap)?;
				Ok(bitmap)
			},
		}
	}
}

#[derive(Default)]
pub struct Zstd0Decoder;

impl ImageDecoder for Zstd0Decoder {
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		tracy::zone!("Decode zstd0");
		decode_zstd_frame(data, pixel_type, width, height, false)
	}
}

#[derive(Default)]
pub struct Zstd1Decoder;

impl ImageDecoder for Zstd1Decoder {
	fn decode(&self, data: &[u8], pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		tracy::zone!("Decode zstd1");

		let header = parse_zstd1_header(data)?;
		if header.size >= data.len() {
			return Err(Error::CorruptCompressedData(
				"chunked zstd payload ends after its header".into(),
			));
		}

		if header.lohi_packed && !matches!(pixel_type, PixelType::Gray16 | PixelType::Bgr48) {
			return Err(Error::CorruptCompressedData(format!(
				"low/high byte packing was requested for pixel type {}, it is only defined for gray16 and bgr48",
				pixel_type
			)));
		}

		decode_zstd_frame(&data[header.size..], pixel_type, width, height, header.lohi_packed)
	}
}

pub(crate) struct Zstd1Header {
	/// Total header length in bytes.
	pub size: usize,
	/// Whether the frame content is split into low-byte/high-byte planes.
	pub lohi_packed: bool,
}

/// Parses the chunked header: a varint size field (MSB continuation, at most
/// three bytes), then chunks. The only defined chunk is id 1 with a one-byte
/// payload whose bit 0 flags the low/high-byte preprocessing. Unknown chunks
/// are an error, not skipped.
pub(crate) fn parse_zstd1_header(data: &[u8]) -> Result<Zstd1Header, Error> {
	let fail = || Error::CorruptCompressedData("invalid chunked zstd header".into());

	if data.is_empty() {
		return Err(fail());
	}

	// the only sizes produced so far: 1 (no chunks) and 3 (chunk 1)
	match data[0] {
		1 => Ok(Zstd1Header {
			size: 1,
			lohi_packed: false,
		}),
		3 => {
			if data.len() < 3 {
				return Err(fail());
			}
			if data[1] != 1 {
				// no other chunk type is defined; a decoder that skipped here
				// could not know the chunk's length
				return Err(fail());
			}
			Ok(Zstd1Header {
				size: 3,
				lohi_packed: data[2] & 1 == 1,
			})
		},
		_ => Err(fail()),
	}
}

fn decode_zstd_frame(
	data: &[u8], pixel_type: PixelType, width: u32, height: u32, lohi_packed: bool,
) -> Result<Bitmap, Error> {
	let bytes_per_pel = pixel_type.bytes_per_pel();
	let expected = width as u64 * bytes_per_pel as u64 * height as u64;

	match zstd::zstd_safe::get_frame_content_size(data) {
		Ok(Some(size)) if size == expected => {},
		Ok(Some(size)) => {
			return Err(Error::CorruptCompressedData(format!(
				"frame holds {} bytes, expected {}",
				size, expected
			)))
		},
		Ok(None) => {
			return Err(Error::CorruptCompressedData(
				"the decompressed size cannot be determined".into(),
			))
		},
		Err(_) => {
			return Err(Error::CorruptCompressedData(
				"the compressed data is not recognized".into(),
			))
		},
	}

	let mut decompressor = zstd::bulk::Decompressor::new()
		.map_err(|e| Error::CorruptCompressedData(format!("zstd: {}", e)))?;

	if lohi_packed {
		let mut planes = vec![0u8; expected as usize];
		let written = decompressor
			.decompress_to_buffer(data, &mut planes[..])
			.map_err(|e| Error::CorruptCompressedData(format!("zstd: {}", e)))?;
		if written as u64 != expected {
			return Err(Error::CorruptCompressedData("short zstd frame".into()));
		}

		let bitmap = Bitmap::new(pixel_type, width, height)?;
		{
			let mut lock = bitmap.lock();
			let stride = lock.stride;
			lohi::pack(&planes, width * bytes_per_pel / 2, height, stride, lock.data_mut())?;
		}
		Ok(bitmap)
	} else {
		// with minimal stride the frame can be expanded straight into the bitmap
		let bitmap = Bitmap::new_packed(pixel_type, width, height)?;
		{
			let mut lock = bitmap.lock();
			let written = decompressor
				.decompress_to_buffer(data, &mut lock.data_mut()[..])
				.map_err(|e| Error::CorruptCompressedData(format!("zstd: {}", e)))?;
			if written as u64 != expected {
				return Err(Error::CorruptCompressedData("short zstd frame".into()));
			}
		}
		Ok(bitmap)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_short_form() {
		let h = parse_zstd1_header(&[0x01]).unwrap();
		assert_eq!(h.size, 1);
		assert!(!h.lohi_packed);
	}

	#[test]
	fn header_chunk1() {
		let h = parse_zstd1_header(&[0x03, 0x01, 0x01]).unwrap();
		assert_eq!(h.size, 3);
		assert!(h.lohi_packed);

		let h = parse_zstd1_header(&[0x03, 0x01, 0x00]).unwrap();
		assert!(!h.lohi_packed);
	}

	#[test]
	fn header_rejects_unknown_chunks_and_sizes() {
		assert!(parse_zstd1_header(&[]).is_err());
		assert!(parse_zstd1_header(&[0x03, 0x02, 0x00]).is_err());
		assert!(parse_zstd1_header(&[0x02, 0x01]).is_err());
		assert!(parse_zstd1_header(&[0x03, 0x01]).is_err());
		assert!(parse_zstd1_header(&[0x81]).is_err());
	}

	#[test]
	fn zstd0_roundtrip_gray16() {
		// 2x1 gray16 pixels 0x1234 0x5678, little-endian canonical layout
		let raw = [0x34u8, 0x12, 0x78, 0x56];
		let frame = zstd::bulk::compress(&raw, 0).unwrap();
		let bm = Zstd0Decoder
			.decode(&frame, PixelType::Gray16, 2, 1)
			.unwrap();
		let lock = bm.lock();
		assert_eq!(lock.row(0), &raw);
	}

	#[test]
	fn zstd1_packed_and_unpacked_decode_identically() {
		let raw = [0x34u8, 0x12, 0x78, 0x56];
		let planes = [0x34u8, 0x78, 0x12, 0x56];

		let mut packed_payload = vec![0x03, 0x01, 0x01];
		packed_payload.extend(zstd::bulk::compress(&planes, 0).unwrap());
		let a = Zstd1Decoder
			.decode(&packed_payload, PixelType::Gray16, 2, 1)
			.unwrap();

		let mut plain_payload = vec![0x03, 0x01, 0x00];
		plain_payload.extend(zstd::bulk::compress(&raw, 0).unwrap());
		let b = Zstd1Decoder
			.decode(&plain_payload, PixelType::Gray16, 2, 1)
			.unwrap();

		assert_eq!(a.lock().row(0), &raw);
		assert_eq!(b.lock().row(0), &raw);
	}

	#[test]
	fn zstd1_packing_bit_requires_16bit_pixels() {
		let mut payload = vec![0x03, 0x01, 0x01];
		payload.extend(zstd::bulk::compress(&[0u8; 4], 0).unwrap());
		assert!(Zstd1Decoder
			.decode(&payload, PixelType::Gray8, 2, 2)
			.is_err());
	}

	#[test]
	fn zstd0_content_size_mismatch_is_rejected() {
		let frame = zstd::bulk::compress(&[0u8; 10], 0).unwrap();
		match Zstd0Decoder.decode(&frame, PixelType::Gray8, 2, 2) {
			Err(Error::CorruptCompressedData(_)) => {},
			other => panic!("expected CorruptCompressedData, got {:?}", other.err()),
		}
	}

	#[test]
	fn uncompressed_payload_roundtrip() {
		let raw = [1u8, 2, 3, 4, 5, 6];
		let bm = UncompressedDecoder
			.decode(&raw, PixelType::Bgr24, 2, 1)
			.unwrap();
		let lock = bm.lock();
		assert_eq!(lock.row(0), &raw);
	}

	#[test]
	fn registry_resolves_known_modes() {
		let registry = DecoderRegistry::global();
		assert!(registry.get(CompressionMode::Zstd0).is_ok());
		assert!(registry.get(CompressionMode::Zstd1).is_ok());
		assert!(registry.get(CompressionMode::JpgXr).is_ok());
		assert!(registry.get(CompressionMode::Uncompressed).is_ok());
		assert!(registry.get(CompressionMode::Jpg).is_err());
	}
}
