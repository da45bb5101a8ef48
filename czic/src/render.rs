use std::{fs::File, io::BufWriter, path::PathBuf, sync::Arc};

use clap::Args;
use czi::{
	AccessorOptions, Bitmap, Coordinate, IntRect, PixelType, PruneOptions, RgbFloatColor,
	SingleChannelScalingTileAccessor, SubBlockCache, CACHE_STAT_ELEMENTS_COUNT,
	CACHE_STAT_MEMORY_USAGE,
};
use png::{BitDepth, ColorType, Encoder};

#[derive(Args)]
/// Render a region of a document to a PNG.
pub struct Render {
	input: PathBuf,
	#[clap(short = 'o', long = "out")]
	output: PathBuf,
	/// Plane coordinate, e.g. "C0" or "C0T2Z5".
	#[clap(short = 'p', long = "plane", default_value = "C0")]
	plane: String,
	/// Region of interest as x,y,w,h; defaults to the document bounding box.
	#[clap(short = 'r', long = "roi")]
	roi: Option<String>,
	#[clap(short = 'z', long = "zoom", default_value_t = 1.0)]
	zoom: f32,
	/// Background gray level in [0, 1].
	#[clap(short = 'b', long = "background", default_value_t = 0.0)]
	background: f32,
	/// Draw a one-pixel border around every tile.
	#[clap(long = "tile-border")]
	tile_border: bool,
	/// Bound for the sub-block cache, in MiB.
	#[clap(long = "cache-mb")]
	cache_mb: Option<u64>,
}

fn parse_roi(s: &str) -> Option<IntRect> {
	let mut split = s.split(',');
	let x = split.next()?.trim().parse().ok()?;
	let y = split.next()?.trim().parse().ok()?;
	let w = split.next()?.trim().parse().ok()?;
	let h = split.next()?.trim().parse().ok()?;
	split.next().is_none().then(|| IntRect::new(x, y, w, h))
}

pub fn render(render: Render) {
	let repo = match czi::open_store(&render.input) {
		Ok(x) => x,
		Err(e) => {
			eprintln!("Error opening document: {}", e);
			return;
		},
	};

	let plane = match Coordinate::parse(&render.plane) {
		Ok(x) => x,
		Err(e) => {
			eprintln!("Error parsing plane coordinate: {}", e);
			return;
		},
	};

	let roi = match &render.roi {
		Some(s) => match parse_roi(s) {
			Some(r) => r,
			None => {
				eprintln!("Error parsing roi '{}', expected x,y,w,h", s);
				return;
			},
		},
		None => repo.directory().statistics().bounding_box,
	};
	if !roi.is_valid() {
		eprintln!("The region of interest {} is empty", roi);
		return;
	}

	let cache = render.cache_mb.map(|_| Arc::new(SubBlockCache::new()));
	let options = AccessorOptions {
		background_color: RgbFloatColor::gray(render.background),
		draw_tile_border: render.tile_border,
		use_visibility_check: true,
		cache: cache.clone(),
		..AccessorOptions::default()
	};

	let accessor = SingleChannelScalingTileAccessor::new(&repo);
	let bitmap = {
		tracy::zone!("Render");
		match accessor.get(&roi, &plane, render.zoom, &options) {
			Ok(x) => x,
			Err(e) => {
				eprintln!("Error rendering: {}", e);
				return;
			},
		}
	};

	if let (Some(cache), Some(limit)) = (&cache, render.cache_mb) {
		cache.prune(&PruneOptions {
			max_memory_usage: limit * 1024 * 1024,
			max_sub_block_count: u64::MAX,
		});
		let stats = cache.statistics(CACHE_STAT_MEMORY_USAGE | CACHE_STAT_ELEMENTS_COUNT);
		log::info!(
			"cache: {} sub-blocks, {} bytes",
			stats.elements_count,
			stats.memory_usage
		);
	}

	match write_png(&render.output, &bitmap) {
		Ok(()) => println!("Wrote {}", render.output.display()),
		Err(e) => eprintln!("Error writing PNG: {}", e),
	}
}

fn write_png(path: &PathBuf, bitmap: &Bitmap) -> Result<(), Box<dyn std::error::Error>> {
	tracy::zone!("Write PNG");

	let file = File::create(path)?;
	let mut writer = BufWriter::new(file);
	let mut encoder = Encoder::new(&mut writer, bitmap.width(), bitmap.height());

	let lock = bitmap.lock();
	let w = bitmap.width() as usize;
	let h = bitmap.height();

	let data = match bitmap.pixel_type() {
		PixelType::Gray8 => {
			encoder.set_color(ColorType::Grayscale);
			encoder.set_depth(BitDepth::Eight);
			let mut data = Vec::with_capacity(w * h as usize);
			for y in 0..h {
				data.extend_from_slice(lock.row(y));
			}
			data
		},
		PixelType::Gray16 => {
			encoder.set_color(ColorType::Grayscale);
			encoder.set_depth(BitDepth::Sixteen);
			// png wants big-endian samples
			let mut data = Vec::with_capacity(w * h as usize * 2);
			for y in 0..h {
				for px in lock.row(y).chunks_exact(2) {
					data.push(px[1]);
					data.push(px[0]);
				}
			}
			data
		},
		PixelType::Bgr24 => {
			encoder.set_color(ColorType::Rgb);
			encoder.set_depth(BitDepth::Eight);
			let mut data = Vec::with_capacity(w * h as usize * 3);
			for y in 0..h {
				for px in lock.row(y).chunks_exact(3) {
					data.extend_from_slice(&[px[2], px[1], px[0]]);
				}
			}
			data
		},
		PixelType::Bgra32 => {
			encoder.set_color(ColorType::Rgba);
			encoder.set_depth(BitDepth::Eight);
			let mut data = Vec::with_capacity(w * h as usize * 4);
			for y in 0..h {
				for px in lock.row(y).chunks_exact(4) {
					data.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
				}
			}
			data
		},
		other => return Err(format!("cannot write {} as PNG", other).into()),
	};

	let mut png_writer = encoder.write_header()?;
	png_writer.write_image_data(&data)?;
	png_writer.finish()?;
	Ok(())
}
