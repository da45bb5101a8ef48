use std::{
	alloc::{alloc_zeroed, dealloc, Layout},
	sync::atomic::{AtomicI32, Ordering},
};

use crate::{Error, IntSize, PixelType};

const ALLOC_ALIGNMENT: usize = 32;

/// An owned pixel buffer. The backing allocation is at least 32-byte aligned,
/// rows are `stride` bytes apart with `stride >= width * bytes_per_pel`.
///
/// Direct memory access goes through [`Bitmap::lock`], which returns a guard
/// carrying `{ptr, stride, size}`. Locks are counted; the count is a
/// debug-time assertion (exclusion is provided by ownership, not by the
/// count), and dropping a bitmap while a leaked lock is still outstanding is
/// a fatal programming error.
pub struct Bitmap {
	pixel_type: PixelType,
	width: u32,
	height: u32,
	stride: u32,
	data: *mut u8,
	layout: Layout,
	lock_count: AtomicI32,
}

unsafe impl Send for Bitmap {}
unsafe impl Sync for Bitmap {}

impl Bitmap {
	/// Creates a bitmap with the default stride (minimal stride rounded up to
	/// a multiple of four bytes).
	pub fn new(pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		let min_stride = width
			.checked_mul(pixel_type.bytes_per_pel())
			.and_then(|s| s.checked_add(3))
			.ok_or_else(|| Error::InvalidArgument("bitmap width out of range".into()))?;
		Self::with_stride(pixel_type, width, height, min_stride / 4 * 4)
	}

	/// Creates a bitmap with minimal stride (`width * bytes_per_pel`).
	pub fn new_packed(pixel_type: PixelType, width: u32, height: u32) -> Result<Bitmap, Error> {
		Self::with_stride(pixel_type, width, height, width * pixel_type.bytes_per_pel())
	}

	pub fn with_stride(pixel_type: PixelType, width: u32, height: u32, stride: u32) -> Result<Bitmap, Error> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidArgument("bitmap extent must be positive".into()));
		}

		if stride < width * pixel_type.bytes_per_pel() {
			return Err(Error::InvalidArgument(format!(
				"stride {} is below the minimum {} for width {} and pixel type {}",
				stride,
				width * pixel_type.bytes_per_pel(),
				width,
				pixel_type
			)));
		}

		// rows must stay aligned to the component size
		let component = match pixel_type {
			PixelType::Gray16 | PixelType::Bgr48 => 2,
			PixelType::Gray32Float | PixelType::Gray32 | PixelType::Bgr96Float => 4,
			PixelType::Gray64Float | PixelType::Gray64ComplexFloat | PixelType::Bgr192ComplexFloat => 8,
			_ => 1,
		};
		if stride % component != 0 {
			return Err(Error::InvalidArgument(format!(
				"stride {} is not a multiple of the {}-byte component of {}",
				stride, component, pixel_type
			)));
		}

		let size = stride as usize * height as usize;
		let layout = Layout::from_size_align(size.max(1), ALLOC_ALIGNMENT)
			.map_err(|_| Error::InvalidArgument("bitmap size out of range".into()))?;
		let data = unsafe { alloc_zeroed(layout) };
		if data.is_null() {
			panic!("allocation of {} bytes for a bitmap failed", size);
		}

		Ok(Bitmap {
			pixel_type,
			width,
			height,
			stride,
			data,
			layout,
			lock_count: AtomicI32::new(0),
		})
	}

	/// Creates a bitmap from pixel data laid out with the given source stride.
	pub fn from_data(
		pixel_type: PixelType, width: u32, height: u32, src_stride: u32, data: &[u8],
	) -> Result<Bitmap, Error> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidArgument("bitmap extent must be positive".into()));
		}

		let min_stride = width as usize * pixel_type.bytes_per_pel() as usize;
		if (src_stride as usize) < min_stride {
			return Err(Error::InvalidArgument("source stride too small".into()));
		}

		if data.len() < src_stride as usize * (height as usize - 1) + min_stride {
			return Err(Error::InvalidArgument("source buffer too small".into()));
		}

		let bitmap = Bitmap::new(pixel_type, width, height)?;
		{
			let lock = bitmap.lock();
			for y in 0..height as usize {
				let src = &data[y * src_stride as usize..y * src_stride as usize + min_stride];
				unsafe {
					std::ptr::copy_nonoverlapping(
						src.as_ptr(),
						lock.ptr.add(y * lock.stride as usize),
						min_stride,
					);
				}
			}
		}

		Ok(bitmap)
	}

	pub fn pixel_type(&self) -> PixelType { self.pixel_type }

	pub fn width(&self) -> u32 { self.width }

	pub fn height(&self) -> u32 { self.height }

	pub fn stride(&self) -> u32 { self.stride }

	pub fn size(&self) -> IntSize {
		IntSize {
			w: self.width,
			h: self.height,
		}
	}

	/// Approximate memory footprint, `height * stride`.
	pub fn memory_cost(&self) -> u64 { self.stride as u64 * self.height as u64 }

	pub fn lock(&self) -> BitmapLock {
		self.lock_count.fetch_add(1, Ordering::AcqRel);
		BitmapLock {
			ptr: self.data,
			stride: self.stride,
			size: self.stride as usize * self.height as usize,
			bitmap: self,
		}
	}

	pub fn lock_count(&self) -> i32 { self.lock_count.load(Ordering::Acquire) }
}

impl Drop for Bitmap {
	fn drop(&mut self) {
		let count = self.lock_count.load(Ordering::Acquire);
		if count != 0 {
			// a leaked lock guard; continuing would hand out a dangling pointer
			panic!("bitmap destroyed with lock count {}", count);
		}

		unsafe { dealloc(self.data, self.layout) };
	}
}

/// Scoped access to the pixels of a [`Bitmap`]; the lock count is released on
/// drop. Concurrent locks are allowed.
pub struct BitmapLock<'a> {
	pub ptr: *mut u8,
	pub stride: u32,
	pub size: usize,
	bitmap: &'a Bitmap,
}

impl BitmapLock<'_> {
	pub fn row(&self, y: u32) -> &[u8] {
		debug_assert!(y < self.bitmap.height);
		let width_bytes = self.bitmap.width as usize * self.bitmap.pixel_type.bytes_per_pel() as usize;
		unsafe { std::slice::from_raw_parts(self.ptr.add(y as usize * self.stride as usize), width_bytes) }
	}

	pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
		debug_assert!(y < self.bitmap.height);
		let width_bytes = self.bitmap.width as usize * self.bitmap.pixel_type.bytes_per_pel() as usize;
		unsafe {
			std::slice::from_raw_parts_mut(self.ptr.add(y as usize * self.stride as usize), width_bytes)
		}
	}

	/// The whole buffer, rows `stride` bytes apart.
	pub fn data(&self) -> &[u8] { unsafe { std::slice::from_raw_parts(self.ptr, self.size) } }

	pub fn data_mut(&mut self) -> &mut [u8] {
		unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
	}
}

impl Drop for BitmapLock<'_> {
	fn drop(&mut self) {
		let previous = self.bitmap.lock_count.fetch_sub(1, Ordering::AcqRel);
		if previous < 1 {
			self.bitmap.lock_count.fetch_add(1, Ordering::AcqRel);
			panic!("bitmap lock/unlock balance violated");
		}
	}
}

/// A 1-bit-per-pixel bitmap; bits are packed MSB-first within each byte
/// (bit 7 is x = 0).
pub struct BitonalBitmap {
	width: u32,
	height: u32,
	stride: u32,
	data: Vec<u8>,
}

impl BitonalBitmap {
	pub fn new(width: u32, height: u32) -> Result<BitonalBitmap, Error> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidArgument("bitonal extent must be positive".into()));
		}

		let stride = (width + 7) / 8;
		Ok(BitonalBitmap {
			width,
			height,
			stride,
			data: vec![0; stride as usize * height as usize],
		})
	}

	pub fn width(&self) -> u32 { self.width }

	pub fn height(&self) -> u32 { self.height }

	pub fn stride(&self) -> u32 { self.stride }

	pub fn size(&self) -> IntSize {
		IntSize {
			w: self.width,
			h: self.height,
		}
	}

	pub fn data(&self) -> &[u8] { &self.data }

	pub fn data_mut(&mut self) -> &mut [u8] { &mut self.data }
}
