use std::{
	cmp::Ordering,
	collections::{BTreeMap, HashMap, HashSet},
};

use crate::{
	coord::Dimension,
	statistics::{PyramidStatistics, StatisticsBuilder, SubBlockStatistics},
	CompressionMode, Coordinate, IntRect, IntSize, PixelType, PyramidType,
};

/// One sub-block as recorded in the directory: its coordinate in the index
/// space, its placement on the canvas, and where the parser finds the encoded
/// payload.
#[derive(Copy, Clone, Debug)]
pub struct SubBlockEntry {
	pub coordinate: Coordinate,
	/// Mosaic tile index, distinguishing tiles that share a plane coordinate.
	pub m_index: Option<i32>,
	/// Position and extent in the canvas pixel coordinate system.
	pub logical_rect: IntRect,
	/// Extent of the stored (possibly downsampled) pixels.
	pub physical_size: IntSize,
	pub pixel_type: PixelType,
	pub compression: CompressionMode,
	pub pyramid_type: PyramidType,
	/// Opaque payload location, handed back to the stream layer.
	pub file_position: u64,
	pub data_size: u64,
}

impl SubBlockEntry {
	/// Layer-0 entries store their pixels at full resolution.
	pub fn is_layer0(&self) -> bool {
		self.logical_rect.w == self.physical_size.w as i32
			&& self.logical_rect.h == self.physical_size.h as i32
	}

	/// `physical / logical` ratio; 1.0 for layer-0 tiles.
	pub fn zoom(&self) -> f32 { self.physical_size.w as f32 / self.logical_rect.w as f32 }

	/// Two entries are coordinate-equal iff their coordinates agree on every
	/// valid dimension, both carry the same valid m-index, and both are
	/// layer-0. Pyramid entries sharing a coordinate are allowed.
	pub fn is_coordinate_equal(a: &SubBlockEntry, b: &SubBlockEntry) -> bool {
		a.coordinate == b.coordinate
			&& a.m_index.is_some()
			&& a.m_index == b.m_index
			&& a.is_layer0()
			&& b.is_layer0()
	}

	#[cfg(test)]
	pub(crate) fn test_default() -> Self {
		SubBlockEntry {
			coordinate: Coordinate::new(),
			m_index: None,
			logical_rect: IntRect::new(0, 0, 1, 1),
			physical_size: IntSize { w: 1, h: 1 },
			pixel_type: PixelType::Gray8,
			compression: CompressionMode::Uncompressed,
			pyramid_type: PyramidType::None,
			file_position: 0,
			data_size: 0,
		}
	}
}

fn entry_matches(
	entry: &SubBlockEntry, plane: Option<&Coordinate>, roi: Option<&IntRect>, only_layer0: bool,
) -> bool {
	if only_layer0 && !entry.is_layer0() {
		return false;
	}

	if let Some(plane) = plane {
		if !plane.matches(&entry.coordinate) {
			return false;
		}
	}

	if let Some(roi) = roi {
		if !roi.intersects_with(&entry.logical_rect) {
			return false;
		}
	}

	true
}

/// The directory of a document opened for reading: append-only while the
/// parser populates it, frozen afterwards, then freely shareable.
#[derive(Default)]
pub struct ReadOnlyDirectory {
	entries: Vec<SubBlockEntry>,
	statistics: StatisticsBuilder,
	frozen: bool,
}

impl ReadOnlyDirectory {
	pub fn new() -> Self { Self::default() }

	pub fn add(&mut self, entry: SubBlockEntry) {
		assert!(!self.frozen, "directory no longer accepts entries");
		self.statistics.update(&entry);
		self.entries.push(entry);
	}

	pub fn adding_finished(&mut self) {
		self.frozen = true;
		self.statistics.consolidate();
	}

	pub fn len(&self) -> usize { self.entries.len() }

	pub fn is_empty(&self) -> bool { self.entries.is_empty() }

	pub fn get(&self, index: i32) -> Option<&SubBlockEntry> { self.entries.get(index as usize) }

	pub fn statistics(&self) -> &SubBlockStatistics { self.statistics.statistics() }

	pub fn pyramid_statistics(&mut self) -> &PyramidStatistics { self.statistics.pyramid_statistics() }

	/// Visits every entry in insertion order; the visitor returns `false` to
	/// stop.
	pub fn for_each(&self, mut visitor: impl FnMut(i32, &SubBlockEntry) -> bool) {
		for (i, entry) in self.entries.iter().enumerate() {
			if !visitor(i as i32, entry) {
				return;
			}
		}
	}

	/// Visits every entry compatible with `plane` whose logical rectangle
	/// intersects `roi` (when given), optionally restricted to layer 0.
	pub fn enum_subset(
		&self, plane: Option<&Coordinate>, roi: Option<&IntRect>, only_layer0: bool,
		mut visitor: impl FnMut(i32, &SubBlockEntry) -> bool,
	) {
		for (i, entry) in self.entries.iter().enumerate() {
			if entry_matches(entry, plane, roi, only_layer0) && !visitor(i as i32, entry) {
				return;
			}
		}
	}
}

/// Sort key of the writer directory: zoom descending (lower pyramid layers
/// first), then coordinate, entries with a valid m-index before those
/// without, m-index ascending, then x and y. A sequence number keeps the
/// order total.
struct WriterKey {
	zoom: f32,
	coordinate: Coordinate,
	m_index: Option<i32>,
	x: i32,
	y: i32,
	seq: u64,
}

impl WriterKey {
	fn of(entry: &SubBlockEntry, seq: u64) -> Self {
		Self {
			zoom: entry.zoom(),
			coordinate: entry.coordinate,
			m_index: entry.m_index,
			x: entry.logical_rect.x,
			y: entry.logical_rect.y,
			seq,
		}
	}
}

impl Ord for WriterKey {
	fn cmp(&self, other: &Self) -> Ordering {
		other
			.zoom
			.total_cmp(&self.zoom)
			.then_with(|| self.coordinate.cmp(&other.coordinate))
			.then_with(|| match (self.m_index, other.m_index) {
				(Some(a), Some(b)) => a.cmp(&b),
				(Some(_), None) => Ordering::Less,
				(None, Some(_)) => Ordering::Greater,
				(None, None) => self.x.cmp(&other.x).then(self.y.cmp(&other.y)),
			})
			.then(self.seq.cmp(&other.seq))
	}
}

impl PartialOrd for WriterKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for WriterKey {
	fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for WriterKey {}

/// The directory of a document being authored. Entries are kept sorted for
/// serialization, and an entry that is coordinate-equal to an existing one is
/// rejected.
#[derive(Default)]
pub struct WriterDirectory {
	entries: BTreeMap<WriterKey, SubBlockEntry>,
	layer0_keys: HashSet<(Coordinate, i32)>,
	next_seq: u64,
	statistics: StatisticsBuilder,
	pixel_type_for_channel: PixelTypeForChannel,
}

impl WriterDirectory {
	pub fn new() -> Self { Self::default() }

	/// Adds the entry unless an entry with an equal coordinate already exists;
	/// returns whether it was added.
	pub fn try_add(&mut self, entry: SubBlockEntry) -> bool {
		let layer0_key = match entry.m_index {
			Some(m) if entry.is_layer0() => Some((entry.coordinate, m)),
			_ => None,
		};

		if let Some(key) = &layer0_key {
			if self.layer0_keys.contains(key) {
				return false;
			}
		}

		if let Some(key) = layer0_key {
			self.layer0_keys.insert(key);
		}

		self.statistics.update(&entry);
		self.pixel_type_for_channel.add(&entry);
		self.entries.insert(WriterKey::of(&entry, self.next_seq), entry);
		self.next_seq += 1;
		true
	}

	pub fn len(&self) -> usize { self.entries.len() }

	pub fn is_empty(&self) -> bool { self.entries.is_empty() }

	/// Visits the entries in their serialization order.
	pub fn for_each(&self, mut visitor: impl FnMut(usize, &SubBlockEntry) -> bool) {
		for (i, entry) in self.entries.values().enumerate() {
			if !visitor(i, entry) {
				return;
			}
		}
	}

	pub fn statistics(&self) -> &SubBlockStatistics { self.statistics.statistics() }

	pub fn pyramid_statistics(&mut self) -> &PyramidStatistics { self.statistics.pyramid_statistics() }

	pub fn pixel_type_for_channel(&self) -> &PixelTypeForChannel { &self.pixel_type_for_channel }
}

/// The first pixel type seen per channel index, plus a fallback for entries
/// without a C-dimension.
#[derive(Default)]
pub struct PixelTypeForChannel {
	per_channel: HashMap<i32, PixelType>,
	no_channel: Option<PixelType>,
}

impl PixelTypeForChannel {
	fn add(&mut self, entry: &SubBlockEntry) {
		match entry.coordinate.get(Dimension::C) {
			Some(c) => {
				self.per_channel.entry(c).or_insert(entry.pixel_type);
			},
			None => {
				if self.no_channel.is_none() {
					self.no_channel = Some(entry.pixel_type);
				}
			},
		}
	}

	pub fn get(&self, channel: i32) -> Option<PixelType> { self.per_channel.get(&channel).copied() }

	pub fn get_no_channel(&self) -> Option<PixelType> { self.no_channel }
}

/// A directory supporting in-place modification. Every entry has a stable
/// integer key; statistics are rebuilt lazily after modifications.
#[derive(Default)]
pub struct ReaderWriterDirectory {
	entries: BTreeMap<i32, SubBlockEntry>,
	next_key: i32,
	statistics: StatisticsBuilder,
	statistics_current: bool,
	statistics_consolidated: bool,
	modified: bool,
}

impl ReaderWriterDirectory {
	pub fn new() -> Self {
		Self {
			statistics_current: true,
			..Self::default()
		}
	}

	pub fn add(&mut self, entry: SubBlockEntry) -> i32 {
		let key = self.next_key;
		self.next_key += 1;
		// no need to update when the statistics are already stale
		if self.statistics_current {
			self.statistics.update(&entry);
			self.statistics_consolidated = false;
		}
		self.entries.insert(key, entry);
		self.modified = true;
		key
	}

	/// Adds the entry unless an entry with an equal coordinate already exists.
	pub fn try_add(&mut self, entry: SubBlockEntry) -> Option<i32> {
		if self
			.entries
			.values()
			.any(|existing| SubBlockEntry::is_coordinate_equal(existing, &entry))
		{
			return None;
		}

		Some(self.add(entry))
	}

	pub fn get(&self, key: i32) -> Option<&SubBlockEntry> { self.entries.get(&key) }

	pub fn try_modify(&mut self, key: i32, entry: SubBlockEntry) -> bool {
		match self.entries.get_mut(&key) {
			Some(slot) => {
				*slot = entry;
				self.statistics_current = false;
				self.statistics_consolidated = false;
				self.modified = true;
				true
			},
			None => false,
		}
	}

	pub fn try_remove(&mut self, key: i32) -> Option<SubBlockEntry> {
		let removed = self.entries.remove(&key);
		if removed.is_some() {
			self.statistics_current = false;
			self.statistics_consolidated = false;
			self.modified = true;
		}
		removed
	}

	pub fn len(&self) -> usize { self.entries.len() }

	pub fn is_empty(&self) -> bool { self.entries.is_empty() }

	pub fn is_modified(&self) -> bool { self.modified }

	pub fn clear_modified(&mut self) { self.modified = false; }

	pub fn for_each(&self, mut visitor: impl FnMut(i32, &SubBlockEntry) -> bool) {
		for (&key, entry) in &self.entries {
			if !visitor(key, entry) {
				return;
			}
		}
	}

	pub fn enum_subset(
		&self, plane: Option<&Coordinate>, roi: Option<&IntRect>, only_layer0: bool,
		mut visitor: impl FnMut(i32, &SubBlockEntry) -> bool,
	) {
		for (&key, entry) in &self.entries {
			if entry_matches(entry, plane, roi, only_layer0) && !visitor(key, entry) {
				return;
			}
		}
	}

	pub fn statistics(&mut self) -> &SubBlockStatistics {
		self.rebuild_if_stale();
		self.statistics.statistics()
	}

	pub fn pyramid_statistics(&mut self) -> &PyramidStatistics {
		self.rebuild_if_stale();
		self.statistics.pyramid_statistics()
	}

	fn rebuild_if_stale(&mut self) {
		if self.statistics_current {
			return;
		}

		self.statistics.clear();
		for entry in self.entries.values() {
			self.statistics.update(entry);
		}
		self.statistics_current = true;
		self.statistics_consolidated = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn layer0_at(x: i32, y: i32, size: i32, coord: Coordinate, m: Option<i32>) -> SubBlockEntry {
		SubBlockEntry {
			coordinate: coord,
			m_index: m,
			logical_rect: IntRect::new(x, y, size, size),
			physical_size: IntSize {
				w: size as u32,
				h: size as u32,
			},
			..SubBlockEntry::test_default()
		}
	}

	fn pyramid_at(x: i32, y: i32, size: i32, stored: u32, coord: Coordinate, m: Option<i32>) -> SubBlockEntry {
		SubBlockEntry {
			coordinate: coord,
			m_index: m,
			logical_rect: IntRect::new(x, y, size, size),
			physical_size: IntSize { w: stored, h: stored },
			..SubBlockEntry::test_default()
		}
	}

	fn c0() -> Coordinate { Coordinate::from_pairs(&[(Dimension::C, 0)]) }

	#[test]
	fn read_only_enum_subset_filters() {
		let mut dir = ReadOnlyDirectory::new();
		dir.add(layer0_at(0, 0, 100, c0(), Some(0)));
		dir.add(layer0_at(100, 0, 100, c0(), Some(1)));
		dir.add(layer0_at(
			0,
			0,
			100,
			Coordinate::from_pairs(&[(Dimension::C, 1)]),
			Some(0),
		));
		dir.add(pyramid_at(0, 0, 200, 100, c0(), None));
		dir.adding_finished();

		let mut seen = Vec::new();
		dir.enum_subset(Some(&c0()), None, true, |i, _| {
			seen.push(i);
			true
		});
		assert_eq!(seen, vec![0, 1]);

		let roi = IntRect::new(150, 0, 10, 10);
		let mut seen = Vec::new();
		dir.enum_subset(Some(&c0()), Some(&roi), false, |i, _| {
			seen.push(i);
			true
		});
		assert_eq!(seen, vec![1, 3]);

		// early stop
		let mut count = 0;
		dir.enum_subset(None, None, false, |_, _| {
			count += 1;
			false
		});
		assert_eq!(count, 1);
	}

	#[test]
	#[should_panic]
	fn read_only_rejects_add_after_freeze() {
		let mut dir = ReadOnlyDirectory::new();
		dir.adding_finished();
		dir.add(layer0_at(0, 0, 10, c0(), None));
	}

	#[test]
	fn writer_rejects_duplicate_layer0() {
		let mut dir = WriterDirectory::new();
		assert!(dir.try_add(layer0_at(0, 0, 100, c0(), Some(5))));
		// same coordinate, same m-index, layer 0 again -> rejected
		assert!(!dir.try_add(layer0_at(50, 50, 100, c0(), Some(5))));
		// different m-index is fine
		assert!(dir.try_add(layer0_at(100, 0, 100, c0(), Some(6))));
		// a pyramid entry with the same coordinate and m-index is allowed
		assert!(dir.try_add(pyramid_at(0, 0, 200, 100, c0(), Some(5))));
		// entries without m-index are never considered duplicates
		assert!(dir.try_add(layer0_at(0, 0, 100, c0(), None)));
		assert!(dir.try_add(layer0_at(0, 0, 100, c0(), None)));
		assert_eq!(dir.len(), 5);
	}

	#[test]
	fn writer_orders_by_zoom_then_m() {
		let mut dir = WriterDirectory::new();
		dir.try_add(pyramid_at(0, 0, 200, 100, c0(), None));
		dir.try_add(layer0_at(0, 0, 100, c0(), Some(1)));
		dir.try_add(layer0_at(100, 0, 100, c0(), Some(0)));

		let mut order = Vec::new();
		dir.for_each(|_, e| {
			order.push((e.zoom(), e.m_index));
			true
		});

		// layer-0 entries (zoom 1) come first, m ascending; the pyramid entry last
		assert_eq!(order[0], (1.0, Some(0)));
		assert_eq!(order[1], (1.0, Some(1)));
		assert_eq!(order[2], (0.5, None));
	}

	#[test]
	fn writer_tracks_pixel_type_per_channel() {
		let mut dir = WriterDirectory::new();
		let mut e = layer0_at(0, 0, 10, c0(), Some(0));
		e.pixel_type = PixelType::Gray16;
		dir.try_add(e);

		assert_eq!(dir.pixel_type_for_channel().get(0), Some(PixelType::Gray16));
		assert_eq!(dir.pixel_type_for_channel().get(1), None);
	}

	#[test]
	fn reader_writer_modify_and_remove_rebuild_statistics() {
		let mut dir = ReaderWriterDirectory::new();
		let a = dir.add(layer0_at(0, 0, 100, c0(), Some(0)));
		let b = dir.add(layer0_at(100, 0, 100, c0(), Some(1)));

		assert_eq!(dir.statistics().bounding_box, IntRect::new(0, 0, 200, 100));

		let mut moved = *dir.get(b).unwrap();
		moved.logical_rect = IntRect::new(500, 0, 100, 100);
		assert!(dir.try_modify(b, moved));
		assert_eq!(dir.statistics().bounding_box, IntRect::new(0, 0, 600, 100));

		assert!(dir.try_remove(b).is_some());
		assert_eq!(dir.statistics().bounding_box, IntRect::new(0, 0, 100, 100));

		assert!(dir.get(a).is_some());
		assert!(dir.get(b).is_none());
		assert!(!dir.try_modify(b, moved));
	}

	#[test]
	fn reader_writer_try_add_rejects_coordinate_equal() {
		let mut dir = ReaderWriterDirectory::new();
		assert!(dir.try_add(layer0_at(0, 0, 100, c0(), Some(0))).is_some());
		assert!(dir.try_add(layer0_at(10, 0, 100, c0(), Some(0))).is_none());
		assert!(dir.try_add(pyramid_at(0, 0, 200, 100, c0(), Some(0))).is_some());
	}
}
