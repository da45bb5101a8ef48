use crate::{Bitmap, Error, PixelType, Rgb8Color};

/// Per-channel settings for the multi-channel composition. The gradation is
/// either the black/white-point ramp or, when `lut` is given, a lookup table
/// (256 entries for 8-bit channels, 65536 for 16-bit channels) which then
/// replaces the ramp.
#[derive(Copy, Clone)]
pub struct ChannelInfo<'a> {
	pub weight: f32,
	pub enable_tinting: bool,
	pub tinting_color: Rgb8Color,
	pub black_point: f32,
	pub white_point: f32,
	pub lut: Option<&'a [u8]>,
}

impl Default for ChannelInfo<'_> {
	fn default() -> Self {
		Self {
			weight: 1.0,
			enable_tinting: false,
			tinting_color: Rgb8Color { r: 255, g: 255, b: 255 },
			black_point: 0.0,
			white_point: 1.0,
			lut: None,
		}
	}
}

impl ChannelInfo<'_> {
	fn tint(&self) -> [f32; 3] {
		if self.enable_tinting {
			[
				self.tinting_color.b as f32 / 255.0,
				self.tinting_color.g as f32 / 255.0,
				self.tinting_color.r as f32 / 255.0,
			]
		} else {
			[1.0, 1.0, 1.0]
		}
	}

	fn ramp(&self, v: f32) -> f32 {
		if self.white_point <= self.black_point {
			return if v >= self.black_point { 1.0 } else { 0.0 };
		}

		((v - self.black_point) / (self.white_point - self.black_point)).clamp(0.0, 1.0)
	}
}

fn expected_lut_len(pixel_type: PixelType) -> Option<usize> {
	match pixel_type {
		PixelType::Gray8 | PixelType::Bgr24 => Some(256),
		PixelType::Gray16 | PixelType::Bgr48 => Some(65536),
		_ => None,
	}
}

fn check_channels(channels: &[(&Bitmap, ChannelInfo)]) -> Result<(u32, u32), Error> {
	let (first, _) = channels
		.first()
		.ok_or_else(|| Error::InvalidArgument("no channels to compose".into()))?;
	let (w, h) = (first.width(), first.height());

	for (bitmap, info) in channels {
		if bitmap.width() != w || bitmap.height() != h {
			return Err(Error::InvalidArgument(format!(
				"channel bitmap is {}, expected {}",
				bitmap.size(),
				first.size()
			)));
		}

		if let Some(lut) = info.lut {
			match expected_lut_len(bitmap.pixel_type()) {
				Some(len) if lut.len() == len => {},
				Some(len) => {
					return Err(Error::InvalidArgument(format!(
						"lookup table holds {} entries, {} required for {}",
						lut.len(),
						len,
						bitmap.pixel_type()
					)))
				},
				None => {
					return Err(Error::InvalidArgument(format!(
						"lookup tables are not defined for {}",
						bitmap.pixel_type()
					)))
				},
			}
		}
	}

	Ok((w, h))
}

/// Accumulates `weight * map(src) * tint` per destination component.
fn accumulate(acc: &mut [f32], w: u32, bitmap: &Bitmap, info: &ChannelInfo) -> Result<(), Error> {
	let lock = bitmap.lock();
	let tint = info.tint();
	let weight = info.weight;

	let map8 = |v: u8, info: &ChannelInfo| -> f32 {
		match info.lut {
			Some(lut) => lut[v as usize] as f32 / 255.0,
			None => info.ramp(v as f32 / 255.0),
		}
	};
	let map16 = |v: u16, info: &ChannelInfo| -> f32 {
		match info.lut {
			Some(lut) => lut[v as usize] as f32 / 255.0,
			None => info.ramp(v as f32 / 65535.0),
		}
	};

	for y in 0..bitmap.height() {
		let row = lock.row(y);
		let acc_row = &mut acc[y as usize * w as usize * 3..(y as usize + 1) * w as usize * 3];
		match bitmap.pixel_type() {
			PixelType::Gray8 => {
				for (x, &v) in row.iter().enumerate() {
					let m = weight * map8(v, info);
					for c in 0..3 {
						acc_row[x * 3 + c] += m * tint[c];
					}
				}
			},
			PixelType::Gray16 => {
				for (x, v) in bytemuck::cast_slice::<u8, u16>(row).iter().enumerate() {
					let m = weight * map16(*v, info);
					for c in 0..3 {
						acc_row[x * 3 + c] += m * tint[c];
					}
				}
			},
			PixelType::Gray32Float => {
				for (x, v) in bytemuck::cast_slice::<u8, f32>(row).iter().enumerate() {
					let m = weight * info.ramp(v.clamp(0.0, 1.0));
					for c in 0..3 {
						acc_row[x * 3 + c] += m * tint[c];
					}
				}
			},
			PixelType::Bgr24 => {
				for (x, px) in row.chunks_exact(3).enumerate() {
					for c in 0..3 {
						acc_row[x * 3 + c] += weight * map8(px[c], info) * tint[c];
					}
				}
			},
			PixelType::Bgr48 => {
				for (x, px) in bytemuck::cast_slice::<u8, u16>(row).chunks_exact(3).enumerate() {
					for c in 0..3 {
						acc_row[x * 3 + c] += weight * map16(px[c], info) * tint[c];
					}
				}
			},
			other => {
				return Err(Error::UnsupportedFormat(format!(
					"multi-channel composition is not defined for {}",
					other
				)))
			},
		}
	}

	Ok(())
}

fn compose(channels: &[(&Bitmap, ChannelInfo)]) -> Result<(u32, u32, Vec<f32>), Error> {
	let (w, h) = check_channels(channels)?;
	let mut acc = vec![0f32; w as usize * h as usize * 3];
	for (bitmap, info) in channels {
		accumulate(&mut acc, w, bitmap, info)?;
	}

	Ok((w, h, acc))
}

fn to_byte(v: f32) -> u8 { (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8 }

/// Composes N same-sized channel bitmaps into a BGR24 bitmap:
/// `out = Σ weight_i * map_i(src_i) * tint_i`, clamped per component.
pub fn compose_multi_channel_bgr24(channels: &[(&Bitmap, ChannelInfo)]) -> Result<Bitmap, Error> {
	tracy::zone!("Compose channels");

	let (w, h, acc) = compose(channels)?;
	let dest = Bitmap::new(PixelType::Bgr24, w, h)?;
	{
		let mut lock = dest.lock();
		for y in 0..h {
			let row = lock.row_mut(y);
			let acc_row = &acc[y as usize * w as usize * 3..];
			for x in 0..w as usize * 3 {
				row[x] = to_byte(acc_row[x]);
			}
		}
	}

	Ok(dest)
}

/// BGRA32 variant; every output pixel receives the constant `alpha`.
pub fn compose_multi_channel_bgra32(
	alpha: u8, channels: &[(&Bitmap, ChannelInfo)],
) -> Result<Bitmap, Error> {
	tracy::zone!("Compose channels");

	let (w, h, acc) = compose(channels)?;
	let dest = Bitmap::new(PixelType::Bgra32, w, h)?;
	{
		let mut lock = dest.lock();
		for y in 0..h {
			let row = lock.row_mut(y);
			let acc_row = &acc[y as usize * w as usize * 3..];
			for x in 0..w as usize {
				row[x * 4] = to_byte(acc_row[x * 3]);
				row[x * 4 + 1] = to_byte(acc_row[x * 3 + 1]);
				row[x * 4 + 2] = to_byte(acc_row[x * 3 + 2]);
				row[x * 4 + 3] = alpha;
			}
		}
	}

	Ok(dest)
}

/// Iterates towards the parameter of the adjusted gamma curve
/// `y = ((ax + 1)^G - 1) / ((a + 1)^G - 1)`, whose slope at the origin stays
/// finite for gamma < 1.
fn toe_slope_parameter(gamma: f64) -> f64 {
	const TOLERANCE: f64 = 0.0001;
	if (gamma - 0.5).abs() < TOLERANCE {
		return 224.0;
	}
	if (gamma - 0.45).abs() < TOLERANCE {
		return 287.806332841221;
	}

	let gamma2 = gamma * gamma;
	let factor = 1.0 / (gamma2 * gamma2);
	let mut result: f64 = 224.0;
	for _ in 0..200 {
		let start = result;
		result = factor * ((start + 1.0).powf(gamma) - 1.0);
		if (start - result).abs() < 0.000001 {
			break;
		}
	}

	result
}

/// Builds an 8-bit gradation table from black point, white point and gamma.
/// Below the black point the table is 0, above the white point 255; gamma
/// values below 1 use the toe-slope-adjusted curve.
pub fn lut_from_gamma(element_count: usize, black_point: f32, white_point: f32, gamma: f32) -> Vec<u8> {
	let mut lut = Vec::with_capacity(element_count);

	let low = (black_point as f64 * element_count as f64) as usize;
	let high = (white_point as f64 * element_count as f64) as usize;
	let low = low.min(element_count);
	let high = high.min(element_count);

	lut.resize(low, 0);

	let gamma = gamma as f64;
	if gamma < 1.0 {
		let a = toe_slope_parameter(gamma);
		let denominator = (a + 1.0).powf(gamma) - 1.0;
		for i in low..high {
			let x = (i - low) as f64 / (high - low - 1) as f64;
			let v = 255.0 * ((a * x + 1.0).powf(gamma) - 1.0) / denominator;
			lut.push(v.clamp(0.0, 255.0) as u8);
		}
	} else {
		for i in low..high {
			let x = (i - low) as f64 / (high - low - 1) as f64;
			let v = 255.0 * x.powf(gamma);
			lut.push(v.clamp(0.0, 255.0) as u8);
		}
	}

	lut.resize(element_count, 255);
	lut
}

#[cfg(test)]
mod tests {
	use super::*;

	fn gray8(w: u32, h: u32, data: &[u8]) -> Bitmap {
		Bitmap::from_data(PixelType::Gray8, w, h, w, data).unwrap()
	}

	#[test]
	fn two_tinted_channels_sum() {
		let red = gray8(2, 1, &[255, 0]);
		let green = gray8(2, 1, &[0, 255]);

		let channels = [
			(
				&red,
				ChannelInfo {
					enable_tinting: true,
					tinting_color: Rgb8Color { r: 255, g: 0, b: 0 },
					..ChannelInfo::default()
				},
			),
			(
				&green,
				ChannelInfo {
					enable_tinting: true,
					tinting_color: Rgb8Color { r: 0, g: 255, b: 0 },
					..ChannelInfo::default()
				},
			),
		];

		let out = compose_multi_channel_bgr24(&channels).unwrap();
		let lock = out.lock();
		// first pixel pure red, second pure green (b, g, r order)
		assert_eq!(lock.row(0), &[0, 0, 255, 0, 255, 0]);
	}

	#[test]
	fn weight_scales_and_output_clamps() {
		let a = gray8(1, 1, &[255]);
		let b = gray8(1, 1, &[255]);
		let channels = [
			(&a, ChannelInfo { weight: 0.75, ..ChannelInfo::default() }),
			(&b, ChannelInfo { weight: 0.75, ..ChannelInfo::default() }),
		];

		let out = compose_multi_channel_bgr24(&channels).unwrap();
		let lock = out.lock();
		assert_eq!(lock.row(0), &[255, 255, 255]);
	}

	#[test]
	fn black_white_points_stretch() {
		let src = gray8(3, 1, &[63, 127, 191]);
		let channels = [(
			&src,
			ChannelInfo {
				black_point: 0.25,
				white_point: 0.75,
				..ChannelInfo::default()
			},
		)];

		let out = compose_multi_channel_bgr24(&channels).unwrap();
		let lock = out.lock();
		assert_eq!(lock.row(0)[0], 0);
		assert!((lock.row(0)[3] as i32 - 127).abs() <= 2);
		assert_eq!(lock.row(0)[6], 255);
	}

	#[test]
	fn lut_overrides_ramp() {
		let src = gray8(2, 1, &[0, 10]);
		let mut lut = vec![0u8; 256];
		lut[10] = 200;
		let channels = [(
			&src,
			ChannelInfo {
				lut: Some(&lut),
				..ChannelInfo::default()
			},
		)];

		let out = compose_multi_channel_bgr24(&channels).unwrap();
		let lock = out.lock();
		assert_eq!(lock.row(0), &[0, 0, 0, 200, 200, 200]);
	}

	#[test]
	fn wrong_lut_size_is_rejected() {
		let src = gray8(1, 1, &[0]);
		let lut = vec![0u8; 16];
		let channels = [(
			&src,
			ChannelInfo {
				lut: Some(&lut),
				..ChannelInfo::default()
			},
		)];
		assert!(compose_multi_channel_bgr24(&channels).is_err());
	}

	#[test]
	fn bgra_output_carries_alpha() {
		let src = gray8(1, 1, &[128]);
		let out =
			compose_multi_channel_bgra32(77, &[(&src, ChannelInfo::default())]).unwrap();
		let lock = out.lock();
		assert_eq!(lock.row(0)[3], 77);
	}

	#[test]
	fn gamma_one_is_linear() {
		let lut = lut_from_gamma(256, 0.0, 1.0, 1.0);
		assert_eq!(lut.len(), 256);
		assert_eq!(lut[0], 0);
		assert_eq!(lut[255], 255);
		assert!((lut[128] as i32 - 128).abs() <= 1);
	}

	#[test]
	fn gamma_below_one_lifts_midtones() {
		let lut = lut_from_gamma(256, 0.0, 1.0, 0.45);
		assert_eq!(lut[0], 0);
		assert_eq!(lut[255], 255);
		assert!(lut[64] > 64);
	}

	#[test]
	fn black_white_points_pin_table_ends() {
		let lut = lut_from_gamma(256, 0.25, 0.75, 1.0);
		assert_eq!(lut[0], 0);
		assert_eq!(lut[63], 0);
		assert_eq!(lut[192], 255);
		assert_eq!(lut[255], 255);
	}
}
