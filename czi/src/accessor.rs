use std::{collections::HashSet, sync::Arc};

use crate::{
	coord::Dimension,
	cover::CoverageCalculator,
	ops,
	statistics::{try_determine_pyramid_layer_info, PyramidLayerInfo},
	subblock::SubBlockRepository,
	Bitmap, CompressionMode, Coordinate, DblRect, Error, IntRect, IntSize, PixelType,
	RgbFloatColor, SubBlockCache, SubBlockEntry,
};

/// Options shared by the tile accessors.
#[derive(Clone)]
pub struct AccessorOptions {
	/// Background the destination is cleared with; any NaN channel skips the
	/// clearing.
	pub background_color: RgbFloatColor,
	/// Stable-sort the tiles ascending by m-index (highest m-index ends up on
	/// top). Otherwise tiles are painted in directory order.
	pub sort_by_m: bool,
	/// Draw a one-pixel black frame around every painted tile.
	pub draw_tile_border: bool,
	/// Skip reading tiles that later tiles cover completely.
	pub use_visibility_check: bool,
	/// When given, only sub-blocks with a scene index in this set take part.
	pub scene_filter: Option<HashSet<i32>>,
	/// Decoded-bitmap cache consulted before reading from the stream.
	pub cache: Option<Arc<SubBlockCache>>,
	/// Keep uncompressed sub-blocks out of the cache; reading them again is
	/// cheap.
	pub cache_only_compressed: bool,
}

impl Default for AccessorOptions {
	fn default() -> Self {
		Self {
			background_color: RgbFloatColor::none(),
			sort_by_m: true,
			draw_tile_border: false,
			use_visibility_check: false,
			scene_filter: None,
			cache: None,
			cache_only_compressed: true,
		}
	}
}

/// Places one decoded tile into the destination; the offset is the tile
/// position relative to the destination origin.
pub fn compose_single_tile(
	dest: &Bitmap, source: &Bitmap, x: i32, y: i32, draw_tile_border: bool,
) -> Result<(), Error> {
	ops::copy_with_offset(source, dest, x, y, draw_tile_border)
}

/// Composes tiles pulled from `get_tile` into `dest`, whose top-left corner
/// sits at `(x_pos, y_pos)` on the canvas. `get_tile` returns the tile bitmap
/// plus its canvas position, or `None` when the index is exhausted.
pub fn compose_single_channel_tiles(
	mut get_tile: impl FnMut(i32) -> Option<(Arc<Bitmap>, i32, i32)>, dest: &Bitmap, x_pos: i32,
	y_pos: i32, draw_tile_border: bool,
) -> Result<(), Error> {
	for index in 0.. {
		match get_tile(index) {
			Some((tile, x, y)) => {
				compose_single_tile(dest, &tile, x - x_pos, y - y_pos, draw_tile_border)?
			},
			None => break,
		}
	}

	Ok(())
}

/// A plane coordinate pinning a dimension to a value outside the range the
/// document covers cannot address anything.
fn check_plane_coordinate(
	repository: &dyn SubBlockRepository, plane: &Coordinate,
) -> Result<(), Error> {
	let bounds = &repository.statistics().dim_bounds;
	let mut out_of_range = false;
	plane.for_each_valid(|dim, value| {
		if let Some((start, size)) = bounds.get(dim) {
			if value < start || value >= start + size {
				out_of_range = true;
				return false;
			}
		}
		true
	});

	if out_of_range {
		Err(Error::OutOfRangeCoordinate)
	} else {
		Ok(())
	}
}

fn determine_pixel_type(
	repository: &dyn SubBlockRepository, plane: &Coordinate,
) -> Result<PixelType, Error> {
	let channel = plane.get(Dimension::C).unwrap_or(0);
	repository
		.sub_block_info_for_channel(channel)
		.map(|info| info.pixel_type)
		.ok_or(Error::CouldNotDeterminePixelType)
}

fn scene_allowed(entry: &SubBlockEntry, filter: Option<&HashSet<i32>>) -> bool {
	match (filter, entry.coordinate.get(Dimension::S)) {
		(Some(filter), Some(scene)) => filter.contains(&scene),
		_ => true,
	}
}

fn fetch_tile_bitmap(
	repository: &dyn SubBlockRepository, options: &AccessorOptions, index: i32,
	compression: CompressionMode,
) -> Result<Arc<Bitmap>, Error> {
	if let Some(cache) = &options.cache {
		if let Some(bitmap) = cache.get(index) {
			return Ok(bitmap);
		}
	}

	let sub_block = repository.read_sub_block(index)?;
	let bitmap = Arc::new(sub_block.bitmap()?);

	if let Some(cache) = &options.cache {
		if !options.cache_only_compressed || compression != CompressionMode::Uncompressed {
			cache.add(index, bitmap.clone());
		}
	}

	Ok(bitmap)
}

/// Marks tiles whose visible part of the ROI is completely painted over by
/// tiles later in the z-order.
fn hidden_tiles(rects: &[IntRect], roi: &IntRect) -> Vec<bool> {
	let mut hidden = vec![false; rects.len()];
	let mut cover = CoverageCalculator::new();
	for (i, rect) in rects.iter().enumerate().rev() {
		let visible = rect.intersect(roi);
		if cover.is_completely_covered(&visible) {
			hidden[i] = true;
		} else {
			cover.add_rectangle(&visible);
		}
	}

	hidden
}

/// Composes the layer-0 tiles of a single plane, unscaled: every tile whose
/// logical rectangle intersects the ROI is decoded and blitted at its canvas
/// position.
pub struct SingleChannelTileAccessor<'a> {
	repository: &'a dyn SubBlockRepository,
}

impl<'a> SingleChannelTileAccessor<'a> {
	pub fn new(repository: &'a dyn SubBlockRepository) -> Self { Self { repository } }

	/// Renders the ROI into a new bitmap; the pixel type is taken from an
	/// arbitrary sub-block of the plane's channel.
	pub fn get(&self, roi: &IntRect, plane: &Coordinate, options: &AccessorOptions) -> Result<Bitmap, Error> {
		let pixel_type = determine_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, options)
	}

	pub fn get_with_pixel_type(
		&self, pixel_type: PixelType, roi: &IntRect, plane: &Coordinate, options: &AccessorOptions,
	) -> Result<Bitmap, Error> {
		if !roi.is_valid() {
			return Err(Error::InvalidArgument(format!("invalid roi {}", roi)));
		}

		let dest = Bitmap::new(pixel_type, roi.w as u32, roi.h as u32)?;
		self.get_into(&dest, roi.x, roi.y, plane, options)?;
		Ok(dest)
	}

	/// Renders into an existing bitmap; the bitmap extent defines the ROI
	/// size, `(x_pos, y_pos)` its canvas position.
	pub fn get_into(
		&self, dest: &Bitmap, x_pos: i32, y_pos: i32, plane: &Coordinate, options: &AccessorOptions,
	) -> Result<(), Error> {
		tracy::zone!("Compose tiles");

		check_plane_coordinate(self.repository, plane)?;
		ops::fill(dest, &options.background_color)?;

		let roi = IntRect::new(x_pos, y_pos, dest.width() as i32, dest.height() as i32);
		let mut candidates: Vec<(i32, SubBlockEntry)> = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(&roi), true, &mut |index, entry| {
				if scene_allowed(entry, options.scene_filter.as_ref()) {
					candidates.push((index, *entry));
				}
				true
			});

		if options.sort_by_m {
			candidates.sort_by_key(|(_, entry)| entry.m_index.unwrap_or(i32::MAX));
		}

		let hidden = if options.use_visibility_check {
			let rects: Vec<IntRect> = candidates.iter().map(|(_, e)| e.logical_rect).collect();
			hidden_tiles(&rects, &roi)
		} else {
			vec![false; candidates.len()]
		};

		for ((index, entry), hidden) in candidates.iter().zip(hidden) {
			if hidden {
				continue;
			}

			let bitmap = fetch_tile_bitmap(self.repository, options, *index, entry.compression)?;
			compose_single_tile(
				dest,
				&bitmap,
				entry.logical_rect.x - x_pos,
				entry.logical_rect.y - y_pos,
				options.draw_tile_border,
			)?;
		}

		Ok(())
	}
}

/// Composes the tiles of one specific pyramid layer, unscaled: the
/// destination lives in the layer's own pixel grid, so a layer-N composite is
/// `minification_factor^N` times smaller than the layer-0 ROI it covers.
pub struct SingleChannelPyramidLayerTileAccessor<'a> {
	repository: &'a dyn SubBlockRepository,
}

impl<'a> SingleChannelPyramidLayerTileAccessor<'a> {
	pub fn new(repository: &'a dyn SubBlockRepository) -> Self { Self { repository } }

	fn scale_of(layer: &PyramidLayerInfo) -> Result<i64, Error> {
		if layer.is_not_identified() {
			return Err(Error::InvalidArgument(
				"cannot address the unidentified pyramid layer".into(),
			));
		}

		let mut scale = 1i64;
		for _ in 0..layer.pyramid_layer_no {
			scale *= layer.minification_factor as i64;
		}
		Ok(scale)
	}

	pub fn calc_size(roi: &IntRect, layer: &PyramidLayerInfo) -> Result<IntSize, Error> {
		let scale = Self::scale_of(layer)?;
		Ok(IntSize {
			w: (roi.w as i64 / scale) as u32,
			h: (roi.h as i64 / scale) as u32,
		})
	}

	pub fn get(
		&self, roi: &IntRect, plane: &Coordinate, layer: &PyramidLayerInfo,
		options: &AccessorOptions,
	) -> Result<Bitmap, Error> {
		let pixel_type = determine_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, layer, options)
	}

	pub fn get_with_pixel_type(
		&self, pixel_type: PixelType, roi: &IntRect, plane: &Coordinate, layer: &PyramidLayerInfo,
		options: &AccessorOptions,
	) -> Result<Bitmap, Error> {
		tracy::zone!("Compose pyramid layer");

		let size = Self::calc_size(roi, layer)?;
		if size.w == 0 || size.h == 0 {
			return Err(Error::InvalidArgument(format!(
				"roi {} is empty on pyramid layer {}",
				roi, layer.pyramid_layer_no
			)));
		}

		check_plane_coordinate(self.repository, plane)?;

		let dest = Bitmap::new(pixel_type, size.w, size.h)?;
		ops::fill(&dest, &options.background_color)?;

		let scale = Self::scale_of(layer)?;
		let mut candidates: Vec<(i32, SubBlockEntry)> = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(roi), false, &mut |index, entry| {
				if scene_allowed(entry, options.scene_filter.as_ref()) && Self::on_layer(entry, layer) {
					candidates.push((index, *entry));
				}
				true
			});

		if options.sort_by_m {
			candidates.sort_by_key(|(_, entry)| entry.m_index.unwrap_or(i32::MAX));
		}

		for (index, entry) in &candidates {
			let bitmap = fetch_tile_bitmap(self.repository, options, *index, entry.compression)?;
			// tile positions in layer-0 units map onto the layer's grid
			let x = ((entry.logical_rect.x - roi.x) as f64 / scale as f64).round() as i32;
			let y = ((entry.logical_rect.y - roi.y) as f64 / scale as f64).round() as i32;
			compose_single_tile(&dest, &bitmap, x, y, options.draw_tile_border)?;
		}

		Ok(dest)
	}

	fn on_layer(entry: &SubBlockEntry, layer: &PyramidLayerInfo) -> bool {
		match try_determine_pyramid_layer_info(entry) {
			Some(info) if layer.pyramid_layer_no == 0 => info.is_layer0(),
			Some(info) => {
				info.minification_factor == layer.minification_factor
					&& info.pyramid_layer_no == layer.pyramid_layer_no
			},
			None => false,
		}
	}
}

struct ScalingCandidate {
	index: i32,
	logical_rect: IntRect,
	physical_size: IntSize,
	zoom: f32,
	compression: CompressionMode,
}

/// Composes a plane at a requested zoom factor, selecting the pyramid layer
/// whose zoom is just above the request and scaling it down with the
/// nearest-neighbor kernel.
pub struct SingleChannelScalingTileAccessor<'a> {
	repository: &'a dyn SubBlockRepository,
}

impl<'a> SingleChannelScalingTileAccessor<'a> {
	pub fn new(repository: &'a dyn SubBlockRepository) -> Self { Self { repository } }

	/// The exact output extent for the given ROI and zoom; subject to
	/// truncation, so callers pre-allocating the destination must use this.
	pub fn calc_size(roi: &IntRect, zoom: f32) -> IntSize {
		IntSize {
			w: (roi.w as f32 * zoom) as u32,
			h: (roi.h as f32 * zoom) as u32,
		}
	}

	pub fn get(
		&self, roi: &IntRect, plane: &Coordinate, zoom: f32, options: &AccessorOptions,
	) -> Result<Bitmap, Error> {
		let pixel_type = determine_pixel_type(self.repository, plane)?;
		self.get_with_pixel_type(pixel_type, roi, plane, zoom, options)
	}

	pub fn get_with_pixel_type(
		&self, pixel_type: PixelType, roi: &IntRect, plane: &Coordinate, zoom: f32,
		options: &AccessorOptions,
	) -> Result<Bitmap, Error> {
		let size = Self::calc_size(roi, zoom);
		if size.w == 0 || size.h == 0 {
			return Err(Error::InvalidArgument(format!(
				"roi {} at zoom {} yields an empty output",
				roi, zoom
			)));
		}

		let dest = Bitmap::new(pixel_type, size.w, size.h)?;
		self.internal_get(&dest, roi, plane, zoom, options)?;
		Ok(dest)
	}

	pub fn get_into(
		&self, dest: &Bitmap, roi: &IntRect, plane: &Coordinate, zoom: f32,
		options: &AccessorOptions,
	) -> Result<(), Error> {
		let expected = Self::calc_size(roi, zoom);
		if expected.w != dest.width() || expected.h != dest.height() {
			return Err(Error::InvalidArgument(format!(
				"destination is {}, expected {} for roi {} at zoom {}",
				dest.size(),
				expected,
				roi,
				zoom
			)));
		}

		self.internal_get(dest, roi, plane, zoom, options)
	}

	fn internal_get(
		&self, dest: &Bitmap, roi: &IntRect, plane: &Coordinate, zoom: f32,
		options: &AccessorOptions,
	) -> Result<(), Error> {
		tracy::zone!("Compose scaled tiles");

		if !(zoom > 0.0) {
			return Err(Error::InvalidArgument(format!("zoom {} must be positive", zoom)));
		}

		check_plane_coordinate(self.repository, plane)?;
		ops::fill(dest, &options.background_color)?;

		let scenes = self.determine_involved_scenes(roi, options.scene_filter.as_ref());
		log::debug!(
			"scaling accessor: plane {} roi {} zoom {} scenes {:?}",
			plane,
			roi,
			zoom,
			scenes
		);

		if scenes.len() <= 1 {
			// a single scene (or no scene dimension at all): no need to group
			let candidates = self.collect(roi, plane, Some(&scenes));
			self.paint(dest, roi, candidates, zoom, options)?;
		} else {
			// pyramid selection must not mix scenes, so every scene gets its
			// own pass
			for scene in scenes {
				let mut scene_plane = *plane;
				scene_plane.set(Dimension::S, scene);
				let candidates = self.collect(roi, &scene_plane, None);
				self.paint(dest, roi, candidates, zoom, options)?;
			}
		}

		Ok(())
	}

	fn determine_involved_scenes(&self, roi: &IntRect, filter: Option<&HashSet<i32>>) -> Vec<i32> {
		self.repository
			.statistics()
			.scene_bounding_boxes
			.iter()
			.filter(|&(scene, boxes)| {
				filter.map_or(true, |f| f.contains(scene)) && boxes.bounding_box.intersects_with(roi)
			})
			.map(|(&scene, _)| scene)
			.collect()
	}

	fn collect(&self, roi: &IntRect, plane: &Coordinate, allowed_scenes: Option<&[i32]>) -> Vec<ScalingCandidate> {
		let mut candidates = Vec::new();
		self.repository
			.enum_subset(Some(plane), Some(roi), false, &mut |index, entry| {
				if let (Some(allowed), Some(scene)) = (allowed_scenes, entry.coordinate.get(Dimension::S)) {
					if !allowed.contains(&scene) {
						return true;
					}
				}

				candidates.push(ScalingCandidate {
					index,
					logical_rect: entry.logical_rect,
					physical_size: entry.physical_size,
					zoom: entry.zoom(),
					compression: entry.compression,
				});
				true
			});

		candidates
	}

	fn paint(
		&self, dest: &Bitmap, roi: &IntRect, mut candidates: Vec<ScalingCandidate>, zoom: f32,
		options: &AccessorOptions,
	) -> Result<(), Error> {
		candidates.sort_by(|a, b| a.zoom.total_cmp(&b.zoom));

		// the pivot is the first candidate at or above the requested zoom; if
		// the request is below the coarsest pyramid layer, nothing is painted
		let pivot = match candidates.iter().position(|c| c.zoom >= zoom) {
			Some(p) => p,
			None => return Ok(()),
		};

		let start_zoom = candidates[pivot].zoom;
		let selected: Vec<&ScalingCandidate> = candidates[pivot..]
			.iter()
			.take_while(|c| c.zoom < start_zoom * 1.9)
			.collect();

		let hidden = if options.use_visibility_check {
			let rects: Vec<IntRect> = selected.iter().map(|c| c.logical_rect).collect();
			hidden_tiles(&rects, roi)
		} else {
			vec![false; selected.len()]
		};

		for (candidate, hidden) in selected.iter().zip(hidden) {
			if hidden {
				continue;
			}

			log::debug!(
				"drawing sub-block {}: logical {} stored {}",
				candidate.index,
				candidate.logical_rect,
				candidate.physical_size
			);
			self.scale_blt(dest, roi, candidate, options)?;
		}

		Ok(())
	}

	fn scale_blt(
		&self, dest: &Bitmap, roi: &IntRect, candidate: &ScalingCandidate, options: &AccessorOptions,
	) -> Result<(), Error> {
		let logical = &candidate.logical_rect;
		let intersect = logical.intersect(roi);
		if !intersect.is_valid() {
			return Ok(());
		}

		// normalized position of the intersection within the tile and the roi
		let src_left = (intersect.x - logical.x) as f64 / logical.w as f64;
		let src_top = (intersect.y - logical.y) as f64 / logical.h as f64;
		let src_right = (intersect.x + intersect.w - logical.x) as f64 / logical.w as f64;
		let src_bottom = (intersect.y + intersect.h - logical.y) as f64 / logical.h as f64;

		let dst_left = (intersect.x - roi.x) as f64 / roi.w as f64;
		let dst_top = (intersect.y - roi.y) as f64 / roi.h as f64;
		let dst_right = (intersect.x + intersect.w - roi.x) as f64 / roi.w as f64;
		let dst_bottom = (intersect.y + intersect.h - roi.y) as f64 / roi.h as f64;

		// scale to stored pixels on the source side, output pixels on the
		// destination side
		let src_roi = DblRect {
			x: src_left * candidate.physical_size.w as f64,
			y: src_top * candidate.physical_size.h as f64,
			w: (src_right - src_left) * candidate.physical_size.w as f64,
			h: (src_bottom - src_top) * candidate.physical_size.h as f64,
		};
		let dst_roi = DblRect {
			x: dst_left * dest.width() as f64,
			y: dst_top * dest.height() as f64,
			w: (dst_right - dst_left) * dest.width() as f64,
			h: (dst_bottom - dst_top) * dest.height() as f64,
		};

		let bitmap = fetch_tile_bitmap(self.repository, options, candidate.index, candidate.compression)?;
		ops::nn_resize(&bitmap, dest, &src_roi, &dst_roi)
	}
}
