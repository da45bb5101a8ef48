use std::collections::BTreeMap;

use crate::{coord::Dimension, DimBounds, IntRect, SubBlockEntry};

/// Scene index used for the pyramid bucket of entries carrying no
/// S-dimension.
pub const NO_SCENE: i32 = i32::MAX;

#[derive(Copy, Clone, Debug)]
pub struct SceneBoundingBoxes {
	/// Bounding box over all entries of the scene.
	pub bounding_box: IntRect,
	/// Bounding box over the scene's layer-0 entries only.
	pub bounding_box_layer0: IntRect,
}

/// Aggregate information over the entries of a sub-block directory.
#[derive(Clone, Debug)]
pub struct SubBlockStatistics {
	pub sub_block_count: u32,
	pub min_m_index: Option<i32>,
	pub max_m_index: Option<i32>,
	pub bounding_box: IntRect,
	pub bounding_box_layer0: IntRect,
	pub dim_bounds: DimBounds,
	pub scene_bounding_boxes: BTreeMap<i32, SceneBoundingBoxes>,
}

impl Default for SubBlockStatistics {
	fn default() -> Self {
		Self {
			sub_block_count: 0,
			min_m_index: None,
			max_m_index: None,
			bounding_box: IntRect::invalid(),
			bounding_box_layer0: IntRect::invalid(),
			dim_bounds: DimBounds::new(),
			scene_bounding_boxes: BTreeMap::new(),
		}
	}
}

/// Identification of a pyramid layer: the factor by which adjacent layers
/// shrink and the layer number (0 = full resolution). `0xff`/`0xff` marks an
/// entry whose logical/physical ratio matched no known ladder.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PyramidLayerInfo {
	pub minification_factor: u8,
	pub pyramid_layer_no: u8,
}

impl PyramidLayerInfo {
	pub const NOT_IDENTIFIED: PyramidLayerInfo = PyramidLayerInfo {
		minification_factor: 0xff,
		pyramid_layer_no: 0xff,
	};

	pub fn is_layer0(&self) -> bool { self.pyramid_layer_no == 0 }

	pub fn is_not_identified(&self) -> bool {
		self.minification_factor == 0xff && self.pyramid_layer_no == 0xff
	}

	fn scale(&self) -> i64 {
		let mut v = self.minification_factor as i64;
		for _ in 0..self.pyramid_layer_no.saturating_sub(1) {
			v *= self.minification_factor as i64;
		}
		v
	}
}

#[derive(Copy, Clone, Debug)]
pub struct PyramidLayerStatistics {
	pub layer_info: PyramidLayerInfo,
	pub count: u32,
}

/// Per-scene catalogue of pyramid layers. Entries without a scene are grouped
/// under [`NO_SCENE`].
#[derive(Clone, Default, Debug)]
pub struct PyramidStatistics {
	pub scene_pyramid_statistics: BTreeMap<i32, Vec<PyramidLayerStatistics>>,
}

struct LadderRung {
	value: f64,
	delta_min: f64,
	delta_max: f64,
	pyramid_layer: u8,
}

impl LadderRung {
	fn is_in_range(&self, v: f64) -> bool {
		v >= self.value - self.delta_min && v <= self.value + self.delta_max
	}
}

const LADDER_FACTOR2: [LadderRung; 10] = [
	LadderRung { value: 2.0, delta_min: 0.1, delta_max: 0.1, pyramid_layer: 1 },
	LadderRung { value: 4.0, delta_min: 0.2, delta_max: 0.2, pyramid_layer: 2 },
	LadderRung { value: 8.0, delta_min: 0.4, delta_max: 0.4, pyramid_layer: 3 },
	LadderRung { value: 16.0, delta_min: 0.8, delta_max: 0.8, pyramid_layer: 4 },
	LadderRung { value: 32.0, delta_min: 1.0, delta_max: 1.0, pyramid_layer: 5 },
	LadderRung { value: 64.0, delta_min: 1.0, delta_max: 1.0, pyramid_layer: 6 },
	LadderRung { value: 128.0, delta_min: 1.0, delta_max: 1.0, pyramid_layer: 7 },
	LadderRung { value: 256.0, delta_min: 2.0, delta_max: 2.0, pyramid_layer: 8 },
	LadderRung { value: 512.0, delta_min: 4.0, delta_max: 4.0, pyramid_layer: 9 },
	LadderRung { value: 1024.0, delta_min: 10.0, delta_max: 10.0, pyramid_layer: 10 },
];

const LADDER_FACTOR3: [LadderRung; 7] = [
	LadderRung { value: 3.0, delta_min: 0.1, delta_max: 0.1, pyramid_layer: 1 },
	LadderRung { value: 9.0, delta_min: 0.2, delta_max: 0.2, pyramid_layer: 2 },
	LadderRung { value: 27.0, delta_min: 0.8, delta_max: 0.8, pyramid_layer: 3 },
	LadderRung { value: 81.0, delta_min: 1.5, delta_max: 1.5, pyramid_layer: 4 },
	LadderRung { value: 243.0, delta_min: 2.0, delta_max: 2.0, pyramid_layer: 5 },
	LadderRung { value: 729.0, delta_min: 5.0, delta_max: 5.0, pyramid_layer: 6 },
	LadderRung { value: 2187.0, delta_min: 15.0, delta_max: 15.0, pyramid_layer: 7 },
];

/// Infers the pyramid layer of an entry from its logical/physical ratio by
/// matching the factor-of-2 and factor-of-3 ladders.
pub fn try_determine_pyramid_layer_info(entry: &SubBlockEntry) -> Option<PyramidLayerInfo> {
	if entry.is_layer0() {
		return Some(PyramidLayerInfo {
			minification_factor: 0,
			pyramid_layer_no: 0,
		});
	}

	let minification = entry.logical_rect.w as f64 / entry.physical_size.w as f64;

	for rung in &LADDER_FACTOR2 {
		if rung.is_in_range(minification) {
			return Some(PyramidLayerInfo {
				minification_factor: 2,
				pyramid_layer_no: rung.pyramid_layer,
			});
		}
	}

	for rung in &LADDER_FACTOR3 {
		if rung.is_in_range(minification) {
			return Some(PyramidLayerInfo {
				minification_factor: 3,
				pyramid_layer_no: rung.pyramid_layer,
			});
		}
	}

	None
}

/// Maintains both statistics structures incrementally as entries are added.
#[derive(Default)]
pub struct StatisticsBuilder {
	statistics: SubBlockStatistics,
	pyramid: PyramidStatistics,
	pyramid_dirty: bool,
}

impl StatisticsBuilder {
	pub fn new() -> Self { Self::default() }

	pub fn clear(&mut self) {
		self.statistics = SubBlockStatistics::default();
		self.pyramid = PyramidStatistics::default();
		self.pyramid_dirty = false;
	}

	pub fn update(&mut self, entry: &SubBlockEntry) {
		self.statistics.bounding_box.union_with(&entry.logical_rect);
		if entry.is_layer0() {
			self.statistics.bounding_box_layer0.union_with(&entry.logical_rect);
		}

		entry.coordinate.for_each_valid(|dim, value| {
			self.statistics.dim_bounds.extend(dim, value);
			true
		});

		if let Some(m) = entry.m_index {
			self.statistics.min_m_index =
				Some(self.statistics.min_m_index.map_or(m, |v| v.min(m)));
			self.statistics.max_m_index =
				Some(self.statistics.max_m_index.map_or(m, |v| v.max(m)));
		}

		if let Some(scene) = entry.coordinate.get(Dimension::S) {
			let boxes = self
				.statistics
				.scene_bounding_boxes
				.entry(scene)
				.or_insert(SceneBoundingBoxes {
					bounding_box: IntRect::invalid(),
					bounding_box_layer0: IntRect::invalid(),
				});
			boxes.bounding_box.union_with(&entry.logical_rect);
			if entry.is_layer0() {
				boxes.bounding_box_layer0.union_with(&entry.logical_rect);
			}
		}

		let layer_info =
			try_determine_pyramid_layer_info(entry).unwrap_or(PyramidLayerInfo::NOT_IDENTIFIED);
		let scene = entry.coordinate.get(Dimension::S).unwrap_or(NO_SCENE);
		let catalogue = self
			.pyramid
			.scene_pyramid_statistics
			.entry(scene)
			.or_default();
		match catalogue.iter_mut().find(|s| s.layer_info == layer_info) {
			Some(s) => s.count += 1,
			None => catalogue.push(PyramidLayerStatistics {
				layer_info,
				count: 1,
			}),
		}
		self.pyramid_dirty = true;

		self.statistics.sub_block_count += 1;
	}

	/// Brings each scene's catalogue into its stable order: layer 0 first,
	/// then ascending by factor^layer, unidentified entries last.
	pub fn consolidate(&mut self) {
		if !self.pyramid_dirty {
			return;
		}

		for catalogue in self.pyramid.scene_pyramid_statistics.values_mut() {
			catalogue.sort_by(|a, b| {
				let rank = |info: &PyramidLayerInfo| -> (u8, i64) {
					if info.is_layer0() {
						(0, 0)
					} else if info.is_not_identified() {
						(2, 0)
					} else {
						(1, info.scale())
					}
				};
				rank(&a.layer_info).cmp(&rank(&b.layer_info))
			});
		}

		self.pyramid_dirty = false;
	}

	pub fn statistics(&self) -> &SubBlockStatistics { &self.statistics }

	pub fn pyramid_statistics(&mut self) -> &PyramidStatistics {
		self.consolidate();
		&self.pyramid
	}
}
