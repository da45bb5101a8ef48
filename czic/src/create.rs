use std::{
	path::PathBuf,
	sync::atomic::{AtomicUsize, Ordering},
};

use clap::Args;
use czi::{
	Bitmap, CompressionMode, Coordinate, Dimension, IntRect, IntSize, PixelType, PyramidType,
	SubBlockEntry, TileStoreBuilder, ZstdCompressParams,
};
use rayon::prelude::*;

#[derive(Args)]
/// Generate a synthetic tiled document.
pub struct Create {
	#[clap(short = 'o', long = "out")]
	output: PathBuf,
	#[clap(short = 's', long = "scenes", default_value_t = 1)]
	scenes: u32,
	#[clap(short = 'n', long = "tiles", default_value_t = 4)]
	tiles_per_side: u32,
	#[clap(short = 't', long = "tile-size", default_value_t = 256)]
	tile_size: u32,
	#[clap(short = 'p', long = "pixel-type", default_value = "gray8")]
	pixel_type: String,
	#[clap(short = 'c', long = "compression", default_value = "zstd1")]
	compression: String,
	/// Split 16-bit samples into byte planes before compression.
	#[clap(long = "lohi")]
	lohi: bool,
	/// Number of pyramid layers (minification factor 2) above layer 0.
	#[clap(long = "pyramid-layers", default_value_t = 2)]
	pyramid_layers: u32,
}

fn parse_pixel_type(s: &str) -> Option<PixelType> {
	match s {
		"gray8" => Some(PixelType::Gray8),
		"gray16" => Some(PixelType::Gray16),
		"bgr24" => Some(PixelType::Bgr24),
		_ => None,
	}
}

fn parse_compression(s: &str) -> Option<CompressionMode> {
	match s {
		"none" | "uncompressed" => Some(CompressionMode::Uncompressed),
		"zstd0" => Some(CompressionMode::Zstd0),
		"zstd1" => Some(CompressionMode::Zstd1),
		_ => None,
	}
}

/// A deterministic test pattern over canvas coordinates: diagonal ramps with
/// a per-scene phase shift.
fn sample(scene: u32, x: i64, y: i64) -> u16 {
	let v = (x + 2 * y + scene as i64 * 8192) & 0xffff;
	v as u16
}

fn make_tile(
	pixel_type: PixelType, scene: u32, origin_x: i64, origin_y: i64, size: u32, step: i64,
) -> Bitmap {
	let bitmap = Bitmap::new(pixel_type, size, size).unwrap();
	{
		let mut lock = bitmap.lock();
		for y in 0..size {
			let row = lock.row_mut(y);
			for x in 0..size as usize {
				let v = sample(
					scene,
					origin_x + x as i64 * step,
					origin_y + y as i64 * step,
				);
				match pixel_type {
					PixelType::Gray8 => row[x] = (v >> 8) as u8,
					PixelType::Gray16 => {
						row[x * 2..x * 2 + 2].copy_from_slice(&v.to_le_bytes())
					},
					PixelType::Bgr24 => {
						row[x * 3] = (v >> 8) as u8;
						row[x * 3 + 1] = (v >> 4) as u8;
						row[x * 3 + 2] = v as u8;
					},
					_ => unreachable!(),
				}
			}
		}
	}
	bitmap
}

pub fn create(create: Create) {
	let pixel_type = match parse_pixel_type(&create.pixel_type) {
		Some(x) => x,
		None => {
			eprintln!("Unknown pixel type '{}'", create.pixel_type);
			return;
		},
	};
	let compression = match parse_compression(&create.compression) {
		Some(x) => x,
		None => {
			eprintln!("Unknown compression '{}'", create.compression);
			return;
		},
	};

	let builder = match TileStoreBuilder::create(&create.output) {
		Ok(x) => x,
		Err(e) => {
			eprintln!("Error creating output: {}", e);
			return;
		},
	};

	let params = ZstdCompressParams {
		level: 0,
		lohi_packing: create.lohi,
	};

	let tile = create.tile_size;
	let side = create.tiles_per_side;
	let scene_extent = (tile * side) as i64;
	let scene_gap = scene_extent / 4;

	struct Job {
		scene: u32,
		layer: u32,
		tx: u32,
		ty: u32,
	}

	let mut jobs = Vec::new();
	for scene in 0..create.scenes {
		for tx in 0..side {
			for ty in 0..side {
				jobs.push(Job {
					scene,
					layer: 0,
					tx,
					ty,
				});
			}
		}

		// one covering tile per pyramid layer
		for layer in 1..=create.pyramid_layers {
			jobs.push(Job {
				scene,
				layer,
				tx: 0,
				ty: 0,
			});
		}
	}

	let total = jobs.len();
	let counter = AtomicUsize::new(0);
	let errors = AtomicUsize::new(0);

	jobs.into_par_iter().for_each(|job| {
		tracy::zone!("Generate tile");

		let scene_x = job.scene as i64 * (scene_extent + scene_gap);
		let mut coordinate = Coordinate::from_pairs(&[(Dimension::C, 0), (Dimension::T, 0)]);
		if create.scenes > 1 {
			coordinate.set(Dimension::S, job.scene as i32);
		}

		let result = if job.layer == 0 {
			let origin_x = scene_x + (job.tx * tile) as i64;
			let origin_y = (job.ty * tile) as i64;
			let bitmap = make_tile(pixel_type, job.scene, origin_x, origin_y, tile, 1);
			let entry = SubBlockEntry {
				coordinate,
				m_index: Some((job.ty * side + job.tx) as i32),
				logical_rect: IntRect::new(
					origin_x as i32,
					origin_y as i32,
					tile as i32,
					tile as i32,
				),
				physical_size: IntSize { w: tile, h: tile },
				pixel_type,
				compression,
				pyramid_type: PyramidType::None,
				file_position: 0,
				data_size: 0,
			};
			czi::compress_bitmap(&bitmap, compression, &params)
				.and_then(|payload| builder.add_sub_block(entry, &payload))
		} else {
			let step = 1i64 << job.layer;
			let stored = (scene_extent / step) as u32;
			let bitmap = make_tile(pixel_type, job.scene, scene_x, 0, stored, step);
			let entry = SubBlockEntry {
				coordinate,
				m_index: None,
				logical_rect: IntRect::new(scene_x as i32, 0, scene_extent as i32, scene_extent as i32),
				physical_size: IntSize { w: stored, h: stored },
				pixel_type,
				compression,
				pyramid_type: PyramidType::SingleSubBlock,
				file_position: 0,
				data_size: 0,
			};
			czi::compress_bitmap(&bitmap, compression, &params)
				.and_then(|payload| builder.add_sub_block(entry, &payload))
		};

		match result {
			Ok(true) => {},
			Ok(false) => {
				log::warn!("duplicate tile was skipped");
			},
			Err(e) => {
				eprintln!("Error writing tile: {}", e);
				errors.fetch_add(1, Ordering::Relaxed);
			},
		}

		let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
		print!("\r{}/{}", done, total);
	});
	println!();

	if errors.load(Ordering::Relaxed) != 0 {
		eprintln!("Finished with errors, output may be incomplete");
	}

	match builder.finish() {
		Ok(()) => println!("Wrote {}", create.output.display()),
		Err(e) => eprintln!("Error saving output: {}", e),
	}
}
