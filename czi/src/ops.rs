use bytemuck::{Pod, Zeroable};
use md5::{Digest, Md5};

use crate::{Bitmap, DblRect, Error, PixelType, RgbFloatColor};

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct PxGray8(pub u8);

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct PxGray16(pub u16);

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct PxGray32Float(pub f32);

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct PxBgr24 {
	pub b: u8,
	pub g: u8,
	pub r: u8,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct PxBgr48 {
	pub b: u16,
	pub g: u16,
	pub r: u16,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct PxBgra32 {
	pub b: u8,
	pub g: u8,
	pub r: u8,
	pub a: u8,
}

fn clamp01(v: f32) -> f32 { v.clamp(0.0, 1.0) }

fn float_to_u8(v: f32) -> u8 { (clamp01(v) * 255.0 + 0.5) as u8 }

fn float_to_u16(v: f32) -> u16 { (clamp01(v) * 65535.0 + 0.5) as u16 }

fn widen(v: u8) -> u16 { v as u16 * 257 }

fn narrow(v: u16) -> u8 { (v >> 8) as u8 }

/// Pixel-level conversion between two formats. The 8↔16-bit conversions use
/// the exact full-range factor (255 ↔ 65535), float channels are clamped to
/// the unit range, grayscale→color replicates the intensity, color→grayscale
/// takes the channel mean.
pub(crate) trait ConvertInto<D> {
	fn convert(self) -> D;
}

impl ConvertInto<PxGray8> for PxGray8 {
	fn convert(self) -> PxGray8 { self }
}
impl ConvertInto<PxGray16> for PxGray8 {
	fn convert(self) -> PxGray16 { PxGray16(widen(self.0)) }
}
impl ConvertInto<PxGray32Float> for PxGray8 {
	fn convert(self) -> PxGray32Float { PxGray32Float(self.0 as f32 / 255.0) }
}
impl ConvertInto<PxBgr24> for PxGray8 {
	fn convert(self) -> PxBgr24 {
		PxBgr24 {
			b: self.0,
			g: self.0,
			r: self.0,
		}
	}
}
impl ConvertInto<PxBgr48> for PxGray8 {
	fn convert(self) -> PxBgr48 {
		let v = widen(self.0);
		PxBgr48 { b: v, g: v, r: v }
	}
}

impl ConvertInto<PxGray8> for PxGray16 {
	fn convert(self) -> PxGray8 { PxGray8(narrow(self.0)) }
}
impl ConvertInto<PxGray16> for PxGray16 {
	fn convert(self) -> PxGray16 { self }
}
impl ConvertInto<PxGray32Float> for PxGray16 {
	fn convert(self) -> PxGray32Float { PxGray32Float(self.0 as f32 / 65535.0) }
}
impl ConvertInto<PxBgr24> for PxGray16 {
	fn convert(self) -> PxBgr24 {
		let v = narrow(self.0);
		PxBgr24 { b: v, g: v, r: v }
	}
}
impl ConvertInto<PxBgr48> for PxGray16 {
	fn convert(self) -> PxBgr48 {
		PxBgr48 {
			b: self.0,
			g: self.0,
			r: self.0,
		}
	}
}

impl ConvertInto<PxGray8> for PxGray32Float {
	fn convert(self) -> PxGray8 { PxGray8(float_to_u8(self.0)) }
}
impl ConvertInto<PxGray16> for PxGray32Float {
	fn convert(self) -> PxGray16 { PxGray16(float_to_u16(self.0)) }
}
impl ConvertInto<PxGray32Float> for PxGray32Float {
	fn convert(self) -> PxGray32Float { self }
}
impl ConvertInto<PxBgr24> for PxGray32Float {
	fn convert(self) -> PxBgr24 {
		let v = float_to_u8(self.0);
		PxBgr24 { b: v, g: v, r: v }
	}
}
impl ConvertInto<PxBgr48> for PxGray32Float {
	fn convert(self) -> PxBgr48 {
		let v = float_to_u16(self.0);
		PxBgr48 { b: v, g: v, r: v }
	}
}

impl ConvertInto<PxGray8> for PxBgr24 {
	fn convert(self) -> PxGray8 {
		PxGray8(((self.b as u32 + self.g as u32 + self.r as u32) / 3) as u8)
	}
}
impl ConvertInto<PxGray16> for PxBgr24 {
	fn convert(self) -> PxGray16 {
		PxGray16(widen(((self.b as u32 + self.g as u32 + self.r as u32) / 3) as u8))
	}
}
impl ConvertInto<PxGray32Float> for PxBgr24 {
	fn convert(self) -> PxGray32Float {
		PxGray32Float((self.b as f32 + self.g as f32 + self.r as f32) / (3.0 * 255.0))
	}
}
impl ConvertInto<PxBgr24> for PxBgr24 {
	fn convert(self) -> PxBgr24 { self }
}
impl ConvertInto<PxBgr48> for PxBgr24 {
	fn convert(self) -> PxBgr48 {
		PxBgr48 {
			b: widen(self.b),
			g: widen(self.g),
			r: widen(self.r),
		}
	}
}

impl ConvertInto<PxGray8> for PxBgr48 {
	fn convert(self) -> PxGray8 {
		PxGray8(narrow(((self.b as u32 + self.g as u32 + self.r as u32) / 3) as u16))
	}
}
impl ConvertInto<PxGray16> for PxBgr48 {
	fn convert(self) -> PxGray16 {
		PxGray16(((self.b as u32 + self.g as u32 + self.r as u32) / 3) as u16)
	}
}
impl ConvertInto<PxGray32Float> for PxBgr48 {
	fn convert(self) -> PxGray32Float {
		PxGray32Float((self.b as f32 + self.g as f32 + self.r as f32) / (3.0 * 65535.0))
	}
}
impl ConvertInto<PxBgr24> for PxBgr48 {
	fn convert(self) -> PxBgr24 {
		PxBgr24 {
			b: narrow(self.b),
			g: narrow(self.g),
			r: narrow(self.r),
		}
	}
}
impl ConvertInto<PxBgr48> for PxBgr48 {
	fn convert(self) -> PxBgr48 { self }
}

impl ConvertInto<PxBgra32> for PxBgra32 {
	fn convert(self) -> PxBgra32 { self }
}

/// Scanline copy with per-pixel conversion. Pointers address the top-left
/// pixel of each region; strides may be arbitrary (≥ minimal), accesses are
/// unaligned-safe.
///
/// # Safety
/// Both regions must be valid for `h` rows of `w` pixels at the given strides.
pub(crate) unsafe fn copy_convert<S, D>(
	src: *const u8, src_stride: u32, dst: *mut u8, dst_stride: u32, w: u32, h: u32,
	draw_tile_border: bool,
) where
	S: Pod + ConvertInto<D>,
	D: Pod,
{
	for y in 0..h as usize {
		let mut sp = src.add(y * src_stride as usize);
		let mut dp = dst.add(y * dst_stride as usize);
		for _ in 0..w {
			let v = (sp as *const S).read_unaligned();
			(dp as *mut D).write_unaligned(v.convert());
			sp = sp.add(std::mem::size_of::<S>());
			dp = dp.add(std::mem::size_of::<D>());
		}
	}

	if draw_tile_border && w > 0 && h > 0 {
		draw_border::<D>(dst, dst_stride, w, h);
	}
}

/// One-pixel black frame around the copied region, marking the tile edge.
unsafe fn draw_border<D: Pod>(dst: *mut u8, dst_stride: u32, w: u32, h: u32) {
	let zero = D::zeroed();
	for x in 0..w as usize {
		((dst.add(x * std::mem::size_of::<D>())) as *mut D).write_unaligned(zero);
		((dst.add((h as usize - 1) * dst_stride as usize + x * std::mem::size_of::<D>())) as *mut D)
			.write_unaligned(zero);
	}

	for y in 0..h as usize {
		((dst.add(y * dst_stride as usize)) as *mut D).write_unaligned(zero);
		((dst.add(y * dst_stride as usize + (w as usize - 1) * std::mem::size_of::<D>())) as *mut D)
			.write_unaligned(zero);
	}
}

/// Raw-region copy dispatch over the supported conversion matrix.
///
/// # Safety
/// Both regions must be valid for `h` rows of `w` pixels at the given strides.
pub(crate) unsafe fn copy_raw(
	src_pixel_type: PixelType, src: *const u8, src_stride: u32, dst_pixel_type: PixelType,
	dst: *mut u8, dst_stride: u32, w: u32, h: u32, draw_tile_border: bool,
) -> Result<(), Error> {
	use PixelType::*;

	macro_rules! kernel {
		($s:ty, $d:ty) => {
			copy_convert::<$s, $d>(src, src_stride, dst, dst_stride, w, h, draw_tile_border)
		};
	}

	match (src_pixel_type, dst_pixel_type) {
		(Gray8, Gray8) => kernel!(PxGray8, PxGray8),
		(Gray8, Gray16) => kernel!(PxGray8, PxGray16),
		(Gray8, Gray32Float) => kernel!(PxGray8, PxGray32Float),
		(Gray8, Bgr24) => kernel!(PxGray8, PxBgr24),
		(Gray8, Bgr48) => kernel!(PxGray8, PxBgr48),
		(Gray16, Gray8) => kernel!(PxGray16, PxGray8),
		(Gray16, Gray16) => kernel!(PxGray16, PxGray16),
		(Gray16, Gray32Float) => kernel!(PxGray16, PxGray32Float),
		(Gray16, Bgr24) => kernel!(PxGray16, PxBgr24),
		(Gray16, Bgr48) => kernel!(PxGray16, PxBgr48),
		(Gray32Float, Gray8) => kernel!(PxGray32Float, PxGray8),
		(Gray32Float, Gray16) => kernel!(PxGray32Float, PxGray16),
		(Gray32Float, Gray32Float) => kernel!(PxGray32Float, PxGray32Float),
		(Gray32Float, Bgr24) => kernel!(PxGray32Float, PxBgr24),
		(Gray32Float, Bgr48) => kernel!(PxGray32Float, PxBgr48),
		(Bgr24, Gray8) => kernel!(PxBgr24, PxGray8),
		(Bgr24, Gray16) => kernel!(PxBgr24, PxGray16),
		(Bgr24, Gray32Float) => kernel!(PxBgr24, PxGray32Float),
		(Bgr24, Bgr24) => kernel!(PxBgr24, PxBgr24),
		(Bgr24, Bgr48) => kernel!(PxBgr24, PxBgr48),
		(Bgr48, Gray8) => kernel!(PxBgr48, PxGray8),
		(Bgr48, Gray16) => kernel!(PxBgr48, PxGray16),
		(Bgr48, Gray32Float) => kernel!(PxBgr48, PxGray32Float),
		(Bgr48, Bgr24) => kernel!(PxBgr48, PxBgr24),
		(Bgr48, Bgr48) => kernel!(PxBgr48, PxBgr48),
		(Bgra32, Bgra32) => kernel!(PxBgra32, PxBgra32),
		(from, to) => return Err(Error::UnsupportedPixelConversion { from, to }),
	}

	Ok(())
}

/// Copies `src` into `dst`; both bitmaps must have the same extent.
pub fn copy(src: &Bitmap, dst: &Bitmap, draw_tile_border: bool) -> Result<(), Error> {
	if src.width() != dst.width() || src.height() != dst.height() {
		return Err(Error::InvalidArgument(format!(
			"source extent {} does not match destination extent {}",
			src.size(),
			dst.size()
		)));
	}

	let src_lock = src.lock();
	let dst_lock = dst.lock();
	unsafe {
		copy_raw(
			src.pixel_type(),
			src_lock.ptr,
			src_lock.stride,
			dst.pixel_type(),
			dst_lock.ptr,
			dst_lock.stride,
			src.width(),
			src.height(),
			draw_tile_border,
		)
	}
}

/// Places `src` at `(x_offset, y_offset)` in `dst`, clipping against the
/// destination extent. A no-op if the intersection is empty.
pub fn copy_with_offset(
	src: &Bitmap, dst: &Bitmap, x_offset: i32, y_offset: i32, draw_tile_border: bool,
) -> Result<(), Error> {
	let src_lock = src.lock();
	let dst_lock = dst.lock();
	unsafe {
		copy_with_offset_raw(
			src.pixel_type(),
			src_lock.ptr,
			src_lock.stride,
			src.width(),
			src.height(),
			dst.pixel_type(),
			dst_lock.ptr,
			dst_lock.stride,
			dst.width(),
			dst.height(),
			x_offset,
			y_offset,
			draw_tile_border,
		)
	}
}

pub(crate) struct ClippedRegion {
	pub src_offset: usize,
	pub dst_offset: usize,
	pub src_x: i32,
	pub src_y: i32,
	pub w: u32,
	pub h: u32,
}

/// Clips the placement of a `src_w`×`src_h` region at `(x_offset, y_offset)`
/// against a `dst_w`×`dst_h` destination.
pub(crate) fn clip_offset_copy(
	src_bpp: u32, src_stride: u32, src_w: u32, src_h: u32, dst_bpp: u32, dst_stride: u32,
	dst_w: u32, dst_h: u32, x_offset: i32, y_offset: i32,
) -> Option<ClippedRegion> {
	let src_rect = crate::IntRect::new(x_offset, y_offset, src_w as i32, src_h as i32);
	let dst_rect = crate::IntRect::new(0, 0, dst_w as i32, dst_h as i32);
	let inter = src_rect.intersect(&dst_rect);
	if !inter.is_valid() {
		return None;
	}

	let src_x = (-x_offset).max(0);
	let src_y = (-y_offset).max(0);
	Some(ClippedRegion {
		src_offset: src_y as usize * src_stride as usize + src_x as usize * src_bpp as usize,
		dst_offset: inter.y as usize * dst_stride as usize + inter.x as usize * dst_bpp as usize,
		src_x,
		src_y,
		w: inter.w as u32,
		h: inter.h as u32,
	})
}

/// # Safety
/// Both regions must be valid for the given extents and strides.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn copy_with_offset_raw(
	src_pixel_type: PixelType, src: *const u8, src_stride: u32, src_w: u32, src_h: u32,
	dst_pixel_type: PixelType, dst: *mut u8, dst_stride: u32, dst_w: u32, dst_h: u32,
	x_offset: i32, y_offset: i32, draw_tile_border: bool,
) -> Result<(), Error> {
	let region = match clip_offset_copy(
		src_pixel_type.bytes_per_pel(),
		src_stride,
		src_w,
		src_h,
		dst_pixel_type.bytes_per_pel(),
		dst_stride,
		dst_w,
		dst_h,
		x_offset,
		y_offset,
	) {
		Some(r) => r,
		None => return Ok(()),
	};

	copy_raw(
		src_pixel_type,
		src.add(region.src_offset),
		src_stride,
		dst_pixel_type,
		dst.add(region.dst_offset),
		dst_stride,
		region.w,
		region.h,
		draw_tile_border,
	)
}

struct NnResizeInfo {
	src: *const u8,
	src_stride: u32,
	src_width: u32,
	src_height: u32,
	src_roi: DblRect,
	dst: *mut u8,
	dst_stride: u32,
	dst_width: u32,
	dst_height: u32,
	dst_roi: DblRect,
}

unsafe fn nn_scale<S, D>(info: &NnResizeInfo)
where
	S: Pod + ConvertInto<D>,
	D: Pod,
{
	if info.dst_roi.w <= 0.0 || info.dst_roi.h <= 0.0 || info.src_roi.w <= 0.0 || info.src_roi.h <= 0.0 {
		return;
	}

	let dst_x_start = (info.dst_roi.x as i32).max(0);
	let dst_x_end = ((info.dst_roi.x + info.dst_roi.w) as i32).min(info.dst_width as i32 - 1);
	let dst_y_start = (info.dst_roi.y as i32).max(0);
	let dst_y_end = ((info.dst_roi.y + info.dst_roi.h) as i32).min(info.dst_height as i32 - 1);

	// destination pixels mapping outside the source bitmap stay untouched
	let x_min = (0.0 - info.src_roi.x) * info.dst_roi.w / info.src_roi.w + info.dst_roi.x;
	let x_max =
		(info.src_width as f64 - 1.0 - info.src_roi.x) * info.dst_roi.w / info.src_roi.w + info.dst_roi.x;
	let y_min = (0.0 - info.src_roi.y) * info.dst_roi.h / info.src_roi.h + info.dst_roi.y;
	let y_max =
		(info.src_height as f64 - 1.0 - info.src_roi.y) * info.dst_roi.h / info.src_roi.h + info.dst_roi.y;

	let dst_x_start = (x_min.ceil() as i32).max(dst_x_start);
	let dst_x_end = (x_max.ceil() as i32).min(dst_x_end);
	let dst_y_start = (y_min.ceil() as i32).max(dst_y_start);
	let dst_y_end = (y_max.ceil() as i32).min(dst_y_end);

	let src_w_over_dst_w = info.src_roi.w / info.dst_roi.w;
	let src_h_over_dst_h = info.src_roi.h / info.dst_roi.h;

	for y in dst_y_start..=dst_y_end {
		let src_y = (y as f64 - info.dst_roi.y) * src_h_over_dst_h + info.src_roi.y;
		let src_y = (src_y.round() as i64).clamp(0, info.src_height as i64 - 1) as usize;

		let src_line = info.src.add(src_y * info.src_stride as usize);
		let dst_line = info.dst.add(y as usize * info.dst_stride as usize);
		for x in dst_x_start..=dst_x_end {
			let src_x = (x as f64 - info.dst_roi.x) * src_w_over_dst_w + info.src_roi.x;
			let src_x = (src_x.round() as i64).clamp(0, info.src_width as i64 - 1) as usize;

			let v = (src_line.add(src_x * std::mem::size_of::<S>()) as *const S).read_unaligned();
			(dst_line.add(x as usize * std::mem::size_of::<D>()) as *mut D).write_unaligned(v.convert());
		}
	}
}

/// Nearest-neighbor scaling of the real-valued source region `src_roi` (in
/// source pixel units) onto the real-valued destination region `dst_roi` (in
/// destination pixel units).
pub fn nn_resize(src: &Bitmap, dst: &Bitmap, src_roi: &DblRect, dst_roi: &DblRect) -> Result<(), Error> {
	use PixelType::*;

	let src_lock = src.lock();
	let dst_lock = dst.lock();
	let info = NnResizeInfo {
		src: src_lock.ptr,
		src_stride: src_lock.stride,
		src_width: src.width(),
		src_height: src.height(),
		src_roi: *src_roi,
		dst: dst_lock.ptr,
		dst_stride: dst_lock.stride,
		dst_width: dst.width(),
		dst_height: dst.height(),
		dst_roi: *dst_roi,
	};

	macro_rules! kernel {
		($s:ty, $d:ty) => {
			unsafe { nn_scale::<$s, $d>(&info) }
		};
	}

	match (src.pixel_type(), dst.pixel_type()) {
		(Gray8, Gray8) => kernel!(PxGray8, PxGray8),
		(Gray8, Gray16) => kernel!(PxGray8, PxGray16),
		(Gray8, Gray32Float) => kernel!(PxGray8, PxGray32Float),
		(Gray8, Bgr24) => kernel!(PxGray8, PxBgr24),
		(Gray8, Bgr48) => kernel!(PxGray8, PxBgr48),
		(Gray16, Gray8) => kernel!(PxGray16, PxGray8),
		(Gray16, Gray16) => kernel!(PxGray16, PxGray16),
		(Gray16, Gray32Float) => kernel!(PxGray16, PxGray32Float),
		(Gray16, Bgr24) => kernel!(PxGray16, PxBgr24),
		(Gray16, Bgr48) => kernel!(PxGray16, PxBgr48),
		(Gray32Float, Gray8) => kernel!(PxGray32Float, PxGray8),
		(Gray32Float, Gray16) => kernel!(PxGray32Float, PxGray16),
		(Gray32Float, Gray32Float) => kernel!(PxGray32Float, PxGray32Float),
		(Gray32Float, Bgr24) => kernel!(PxGray32Float, PxBgr24),
		(Gray32Float, Bgr48) => kernel!(PxGray32Float, PxBgr48),
		(Bgr24, Gray8) => kernel!(PxBgr24, PxGray8),
		(Bgr24, Gray16) => kernel!(PxBgr24, PxGray16),
		(Bgr24, Gray32Float) => kernel!(PxBgr24, PxGray32Float),
		(Bgr24, Bgr24) => kernel!(PxBgr24, PxBgr24),
		(Bgr24, Bgr48) => kernel!(PxBgr24, PxBgr48),
		(Bgr48, Gray8) => kernel!(PxBgr48, PxGray8),
		(Bgr48, Gray16) => kernel!(PxBgr48, PxGray16),
		(Bgr48, Gray32Float) => kernel!(PxBgr48, PxGray32Float),
		(Bgr48, Bgr24) => kernel!(PxBgr48, PxBgr24),
		(Bgr48, Bgr48) => kernel!(PxBgr48, PxBgr48),
		(Bgra32, Bgra32) => kernel!(PxBgra32, PxBgra32),
		(from, to) => return Err(Error::UnsupportedPixelConversion { from, to }),
	}

	Ok(())
}

/// Solid-color fill. Grayscale targets use the channel mean scaled to the
/// full range, color targets scale per channel. A NaN channel skips the fill
/// entirely (the caller opted out of clearing).
pub fn fill(bm: &Bitmap, color: &RgbFloatColor) -> Result<(), Error> {
	if color.is_none() {
		return Ok(());
	}

	let mut lock = bm.lock();
	let w = bm.width() as usize;
	let h = bm.height();

	match bm.pixel_type() {
		PixelType::Gray8 => {
			let v = float_to_u8((color.r + color.g + color.b) / 3.0);
			for y in 0..h {
				lock.row_mut(y).fill(v);
			}
		},
		PixelType::Gray16 => {
			let v = float_to_u16((color.r + color.g + color.b) / 3.0);
			for y in 0..h {
				for px in bytemuck::cast_slice_mut::<u8, u16>(lock.row_mut(y)) {
					*px = v;
				}
			}
		},
		PixelType::Gray32Float => {
			let v = (color.r + color.g + color.b) / 3.0;
			for y in 0..h {
				for px in bytemuck::cast_slice_mut::<u8, f32>(lock.row_mut(y)) {
					*px = v;
				}
			}
		},
		PixelType::Bgr24 => {
			let (b, g, r) = (float_to_u8(color.b), float_to_u8(color.g), float_to_u8(color.r));
			for y in 0..h {
				let row = lock.row_mut(y);
				for x in 0..w {
					row[x * 3] = b;
					row[x * 3 + 1] = g;
					row[x * 3 + 2] = r;
				}
			}
		},
		PixelType::Bgra32 => {
			let (b, g, r) = (float_to_u8(color.b), float_to_u8(color.g), float_to_u8(color.r));
			for y in 0..h {
				let row = lock.row_mut(y);
				for x in 0..w {
					row[x * 4] = b;
					row[x * 4 + 1] = g;
					row[x * 4 + 2] = r;
					row[x * 4 + 3] = 255;
				}
			}
		},
		PixelType::Bgr48 => {
			let (b, g, r) = (
				float_to_u16(color.b),
				float_to_u16(color.g),
				float_to_u16(color.r),
			);
			for y in 0..h {
				let row = bytemuck::cast_slice_mut::<u8, u16>(lock.row_mut(y));
				for x in 0..w {
					row[x * 3] = b;
					row[x * 3 + 1] = g;
					row[x * 3 + 2] = r;
				}
			}
		},
		other => {
			return Err(Error::UnsupportedFormat(format!(
				"fill is not implemented for pixel type {}",
				other
			)))
		},
	}

	Ok(())
}

/// In-place R↔B swap for 48-bit three-channel bitmaps; the JPEG-XR codec
/// emits RGB48 while the canonical in-memory order is BGR48.
pub fn bgr48_swap_red_blue(bm: &Bitmap) -> Result<(), Error> {
	if bm.pixel_type() != PixelType::Bgr48 {
		return Err(Error::InvalidArgument(format!(
			"red/blue swap applies to bgr48, got {}",
			bm.pixel_type()
		)));
	}

	let mut lock = bm.lock();
	for y in 0..bm.height() {
		let row = bytemuck::cast_slice_mut::<u8, u16>(lock.row_mut(y));
		for px in row.chunks_exact_mut(3) {
			px.swap(0, 2);
		}
	}

	Ok(())
}

pub(crate) fn swap_u16_line(src: &[u8], dst: &mut [u8]) {
	for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
		d[0] = s[1];
		d[1] = s[0];
	}
}

/// Brings a bitmap loaded from the little-endian canonical layout into host
/// byte order; a no-op on little-endian hosts and for endian-agnostic types.
pub(crate) fn convert_to_host_byte_order(bm: &Bitmap) {
	if cfg!(target_endian = "little") || bm.pixel_type().is_endianness_agnostic() {
		return;
	}

	if matches!(bm.pixel_type(), PixelType::Gray16 | PixelType::Bgr48) {
		let mut lock = bm.lock();
		for y in 0..bm.height() {
			for px in lock.row_mut(y).chunks_exact_mut(2) {
				px.swap(0, 1);
			}
		}
	}
}

/// MD5 over the pixel rows, normalized to little-endian byte order so the
/// hash is identical on all hosts.
pub fn md5_of_bitmap(bm: &Bitmap) -> [u8; 16] {
	let lock = bm.lock();
	let line_len = bm.width() as usize * bm.pixel_type().bytes_per_pel() as usize;

	let mut hasher = Md5::new();
	if cfg!(target_endian = "big")
		&& matches!(bm.pixel_type(), PixelType::Gray16 | PixelType::Bgr48)
	{
		let mut line = vec![0u8; line_len];
		for y in 0..bm.height() {
			swap_u16_line(lock.row(y), &mut line);
			hasher.update(&line);
		}
	} else {
		for y in 0..bm.height() {
			hasher.update(lock.row(y));
		}
	}

	hasher.finalize().into()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Bitmap;

	fn gray8(w: u32, h: u32, data: &[u8]) -> Bitmap {
		Bitmap::from_data(PixelType::Gray8, w, h, w, data).unwrap()
	}

	#[test]
	fn copy_strided_source() {
		// 4x2 gray8, source stride 6 with padding, destination stride 4
		let src = [10u8, 20, 30, 40, 0xde, 0xad, 50, 60, 70, 80, 0xde, 0xad];
		let bm = Bitmap::from_data(PixelType::Gray8, 4, 2, 6, &src).unwrap();
		let dst = Bitmap::new(PixelType::Gray8, 4, 2).unwrap();
		copy(&bm, &dst, false).unwrap();

		let lock = dst.lock();
		assert_eq!(lock.row(0), &[10, 20, 30, 40]);
		assert_eq!(lock.row(1), &[50, 60, 70, 80]);
	}

	#[test]
	fn convert_gray8_to_bgr24_and_back() {
		let src = gray8(2, 1, &[0, 200]);
		let color = Bitmap::new(PixelType::Bgr24, 2, 1).unwrap();
		copy(&src, &color, false).unwrap();
		{
			let lock = color.lock();
			assert_eq!(lock.row(0), &[0, 0, 0, 200, 200, 200]);
		}

		let gray = Bitmap::new(PixelType::Gray8, 2, 1).unwrap();
		copy(&color, &gray, false).unwrap();
		let lock = gray.lock();
		assert_eq!(lock.row(0), &[0, 200]);
	}

	#[test]
	fn eight_sixteen_roundtrip_is_exact() {
		for v in [0u8, 1, 127, 128, 254, 255] {
			let w = widen(v);
			assert_eq!(narrow(w), v);
		}
		assert_eq!(widen(255), 65535);
	}

	#[test]
	fn unsupported_conversion_is_reported() {
		let src = Bitmap::new(PixelType::Bgra32, 2, 2).unwrap();
		let dst = Bitmap::new(PixelType::Gray8, 2, 2).unwrap();
		match copy(&src, &dst, false) {
			Err(Error::UnsupportedPixelConversion { .. }) => {},
			other => panic!("expected UnsupportedPixelConversion, got {:?}", other.err()),
		}
	}

	#[test]
	fn copy_with_offset_clips() {
		let src = gray8(4, 4, &[7; 16]);
		let dst = Bitmap::new(PixelType::Gray8, 4, 4).unwrap();
		fill(&dst, &RgbFloatColor::black()).unwrap();
		copy_with_offset(&src, &dst, 2, 2, false).unwrap();

		let lock = dst.lock();
		assert_eq!(lock.row(0), &[0, 0, 0, 0]);
		assert_eq!(lock.row(2), &[0, 0, 7, 7]);
		assert_eq!(lock.row(3), &[0, 0, 7, 7]);

		// negative offset clips on the source side
		let dst2 = Bitmap::new(PixelType::Gray8, 2, 2).unwrap();
		copy_with_offset(&src, &dst2, -3, -3, false).unwrap();
		let lock2 = dst2.lock();
		assert_eq!(lock2.row(0), &[7, 0]);
		assert_eq!(lock2.row(1), &[0, 0]);
	}

	#[test]
	fn border_is_drawn() {
		let src = gray8(3, 3, &[9; 9]);
		let dst = Bitmap::new(PixelType::Gray8, 3, 3).unwrap();
		copy(&src, &dst, true).unwrap();
		let lock = dst.lock();
		assert_eq!(lock.row(0), &[0, 0, 0]);
		assert_eq!(lock.row(1), &[0, 9, 0]);
		assert_eq!(lock.row(2), &[0, 0, 0]);
	}

	#[test]
	fn nn_resize_identity() {
		let src = gray8(4, 4, &(0..16).collect::<Vec<u8>>());
		let dst = Bitmap::new(PixelType::Gray8, 4, 4).unwrap();
		let roi = DblRect {
			x: 0.0,
			y: 0.0,
			w: 4.0,
			h: 4.0,
		};
		nn_resize(&src, &dst, &roi, &roi).unwrap();
		for y in 0..4 {
			assert_eq!(src.lock().row(y), dst.lock().row(y));
		}
	}

	#[test]
	fn nn_resize_downscale_by_two() {
		let src = gray8(
			4,
			4,
			&[
				0, 1, 2, 3, //
				4, 5, 6, 7, //
				8, 9, 10, 11, //
				12, 13, 14, 15,
			],
		);
		let dst = Bitmap::new(PixelType::Gray8, 2, 2).unwrap();
		nn_resize(
			&src,
			&dst,
			&DblRect {
				x: 0.0,
				y: 0.0,
				w: 4.0,
				h: 4.0,
			},
			&DblRect {
				x: 0.0,
				y: 0.0,
				w: 2.0,
				h: 2.0,
			},
		)
		.unwrap();
		// each destination pixel maps back to a rounded source coordinate
		let lock = dst.lock();
		assert_eq!(lock.row(0).len(), 2);
	}

	#[test]
	fn fill_gray_uses_mean() {
		let bm = Bitmap::new(PixelType::Gray8, 3, 1).unwrap();
		fill(
			&bm,
			&RgbFloatColor {
				r: 1.0,
				g: 0.5,
				b: 0.0,
			},
		)
		.unwrap();
		let lock = bm.lock();
		assert_eq!(lock.row(0), &[128, 128, 128]);
	}

	#[test]
	fn fill_nan_is_skipped() {
		let bm = gray8(2, 1, &[42, 43]);
		fill(&bm, &RgbFloatColor::none()).unwrap();
		let lock = bm.lock();
		assert_eq!(lock.row(0), &[42, 43]);
	}

	#[test]
	fn bgra32_fill_sets_alpha() {
		let bm = Bitmap::new(PixelType::Bgra32, 1, 1).unwrap();
		fill(&bm, &RgbFloatColor::black()).unwrap();
		let lock = bm.lock();
		assert_eq!(lock.row(0), &[0, 0, 0, 255]);
	}

	#[test]
	fn swap_red_blue() {
		let data: Vec<u8> = [100u16, 200, 300]
			.iter()
			.flat_map(|v| v.to_ne_bytes())
			.collect();
		let bm = Bitmap::from_data(PixelType::Bgr48, 1, 1, 6, &data).unwrap();
		bgr48_swap_red_blue(&bm).unwrap();
		let lock = bm.lock();
		let px = bytemuck::cast_slice::<u8, u16>(lock.row(0));
		assert_eq!(px, &[300, 200, 100]);
	}

	#[test]
	fn md5_ignores_stride_padding() {
		let a = gray8(4, 2, &[1, 2, 3, 4, 5, 6, 7, 8]);
		let b = Bitmap::from_data(
			PixelType::Gray8,
			4,
			2,
			6,
			&[1, 2, 3, 4, 0xaa, 0xbb, 5, 6, 7, 8, 0xcc, 0xdd],
		)
		.unwrap();
		assert_eq!(md5_of_bitmap(&a), md5_of_bitmap(&b));
	}

	#[test]
	fn lock_content_unchanged_by_lock_unlock() {
		let bm = gray8(2, 2, &[1, 2, 3, 4]);
		{
			let _lock = bm.lock();
		}
		let lock = bm.lock();
		assert_eq!(lock.row(0), &[1, 2]);
		assert_eq!(lock.row(1), &[3, 4]);
	}
}
