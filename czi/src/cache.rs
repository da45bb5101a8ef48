use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use crate::Bitmap;

/// Bounds for [`SubBlockCache::prune`]. Entries are evicted least recently
/// accessed first until both bounds hold; a bound left at `u64::MAX` is
/// inactive.
#[derive(Copy, Clone, Debug)]
pub struct PruneOptions {
	pub max_memory_usage: u64,
	pub max_sub_block_count: u64,
}

impl Default for PruneOptions {
	fn default() -> Self {
		Self {
			max_memory_usage: u64::MAX,
			max_sub_block_count: u64::MAX,
		}
	}
}

/// Field selectors for [`SubBlockCache::statistics`].
pub const CACHE_STAT_MEMORY_USAGE: u8 = 1;
pub const CACHE_STAT_ELEMENTS_COUNT: u8 = 2;

#[derive(Copy, Clone, Default, Debug)]
pub struct CacheStatistics {
	pub validity_mask: u8,
	pub memory_usage: u64,
	pub elements_count: u64,
}

struct CacheRecord {
	bitmap: Arc<Bitmap>,
	last_used: u64,
	cost: u64,
}

#[derive(Default)]
struct CacheState {
	records: HashMap<i32, CacheRecord>,
	memory_usage: u64,
	tick: u64,
}

/// A bounded cache of decoded sub-block bitmaps, keyed by sub-block index.
/// `add` and a successful `get` both count as an access for the eviction
/// order. Pruning is never automatic; callers decide when to call
/// [`SubBlockCache::prune`]. All operations are internally synchronized.
#[derive(Default)]
pub struct SubBlockCache {
	state: Mutex<CacheState>,
}

impl SubBlockCache {
	pub fn new() -> Self { Self::default() }

	/// A strong reference to the cached bitmap; eviction after this call does
	/// not invalidate it.
	pub fn get(&self, sub_block_index: i32) -> Option<Arc<Bitmap>> {
		let mut state = self.state.lock().unwrap();
		state.tick += 1;
		let tick = state.tick;
		state.records.get_mut(&sub_block_index).map(|record| {
			record.last_used = tick;
			record.bitmap.clone()
		})
	}

	/// Inserts or overwrites the bitmap for the given index.
	pub fn add(&self, sub_block_index: i32, bitmap: Arc<Bitmap>) {
		let cost = bitmap.memory_cost();
		let mut state = self.state.lock().unwrap();
		state.tick += 1;
		let record = CacheRecord {
			bitmap,
			last_used: state.tick,
			cost,
		};

		if let Some(previous) = state.records.insert(sub_block_index, record) {
			state.memory_usage -= previous.cost;
		}
		state.memory_usage += cost;
	}

	/// Evicts least-recently-accessed entries until both bounds of `options`
	/// hold.
	pub fn prune(&self, options: &PruneOptions) {
		let mut state = self.state.lock().unwrap();
		if state.memory_usage <= options.max_memory_usage
			&& state.records.len() as u64 <= options.max_sub_block_count
		{
			return;
		}

		let mut by_age: Vec<(i32, u64)> = state
			.records
			.iter()
			.map(|(&index, record)| (index, record.last_used))
			.collect();
		by_age.sort_by_key(|&(_, last_used)| last_used);

		for (index, _) in by_age {
			if state.memory_usage <= options.max_memory_usage
				&& state.records.len() as u64 <= options.max_sub_block_count
			{
				break;
			}

			if let Some(removed) = state.records.remove(&index) {
				state.memory_usage -= removed.cost;
			}
		}
	}

	/// A consistent snapshot of the fields selected by `mask`.
	pub fn statistics(&self, mask: u8) -> CacheStatistics {
		let state = self.state.lock().unwrap();
		let mut stats = CacheStatistics {
			validity_mask: mask & (CACHE_STAT_MEMORY_USAGE | CACHE_STAT_ELEMENTS_COUNT),
			..CacheStatistics::default()
		};

		if mask & CACHE_STAT_MEMORY_USAGE != 0 {
			stats.memory_usage = state.memory_usage;
		}

		if mask & CACHE_STAT_ELEMENTS_COUNT != 0 {
			stats.elements_count = state.records.len() as u64;
		}

		stats
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::PixelType;

	fn bitmap_of_size(side: u32) -> Arc<Bitmap> {
		Arc::new(Bitmap::new(PixelType::Gray8, side, side).unwrap())
	}

	#[test]
	fn add_overwrites() {
		let cache = SubBlockCache::new();
		let a = bitmap_of_size(4);
		let b = bitmap_of_size(8);
		cache.add(1, a);
		cache.add(1, b.clone());

		let got = cache.get(1).unwrap();
		assert!(Arc::ptr_eq(&got, &b));
		let stats = cache.statistics(CACHE_STAT_MEMORY_USAGE | CACHE_STAT_ELEMENTS_COUNT);
		assert_eq!(stats.elements_count, 1);
		assert_eq!(stats.memory_usage, b.memory_cost());
	}

	#[test]
	fn prune_by_memory_keeps_most_recently_accessed() {
		let cache = SubBlockCache::new();
		// three bitmaps of 1 MiB each at keys 10, 11, 12
		for key in [10, 11, 12] {
			cache.add(key, bitmap_of_size(1024));
		}

		// touching 10 makes 11 the least recently used
		assert!(cache.get(10).is_some());

		cache.prune(&PruneOptions {
			max_memory_usage: 2 * 1024 * 1024,
			max_sub_block_count: u64::MAX,
		});

		let stats = cache.statistics(CACHE_STAT_MEMORY_USAGE | CACHE_STAT_ELEMENTS_COUNT);
		assert_eq!(stats.elements_count, 2);
		assert!(stats.memory_usage <= 2 * 1024 * 1024);
		assert!(cache.get(11).is_none());
		assert!(cache.get(10).is_some());
		assert!(cache.get(12).is_some());
	}

	#[test]
	fn prune_by_count() {
		let cache = SubBlockCache::new();
		for key in 0..5 {
			cache.add(key, bitmap_of_size(16));
		}

		cache.prune(&PruneOptions {
			max_memory_usage: u64::MAX,
			max_sub_block_count: 2,
		});

		let stats = cache.statistics(CACHE_STAT_ELEMENTS_COUNT);
		assert_eq!(stats.elements_count, 2);
		// the two newest survive
		assert!(cache.get(3).is_some());
		assert!(cache.get(4).is_some());
	}

	#[test]
	fn eviction_does_not_invalidate_held_references() {
		let cache = SubBlockCache::new();
		cache.add(0, bitmap_of_size(16));
		let held = cache.get(0).unwrap();

		cache.prune(&PruneOptions {
			max_memory_usage: 0,
			max_sub_block_count: u64::MAX,
		});
		assert!(cache.get(0).is_none());
		assert_eq!(held.width(), 16);
	}

	#[test]
	fn statistics_mask_selects_fields() {
		let cache = SubBlockCache::new();
		cache.add(0, bitmap_of_size(16));

		let stats = cache.statistics(CACHE_STAT_ELEMENTS_COUNT);
		assert_eq!(stats.validity_mask, CACHE_STAT_ELEMENTS_COUNT);
		assert_eq!(stats.elements_count, 1);
		assert_eq!(stats.memory_usage, 0);
	}

	#[test]
	fn concurrent_access() {
		let cache = Arc::new(SubBlockCache::new());
		let mut handles = Vec::new();
		for t in 0..4 {
			let cache = cache.clone();
			handles.push(std::thread::spawn(move || {
				for i in 0..50 {
					let key = (t * 50 + i) as i32;
					cache.add(key, Arc::new(Bitmap::new(PixelType::Gray8, 8, 8).unwrap()));
					let _ = cache.get(key);
					if i % 10 == 0 {
						cache.prune(&PruneOptions {
							max_memory_usage: u64::MAX,
							max_sub_block_count: 64,
						});
					}
				}
			}));
		}

		for handle in handles {
			handle.join().unwrap();
		}

		let stats = cache.statistics(CACHE_STAT_ELEMENTS_COUNT | CACHE_STAT_MEMORY_USAGE);
		assert!(stats.elements_count <= 200);
	}
}
