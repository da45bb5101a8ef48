use crate::IntRect;

/// Tracks a running union of axis-aligned rectangles as a list of pairwise
/// disjoint pieces, answering "is this rectangle completely covered?". Used
/// by the accessors to skip tiles that later tiles paint over entirely.
#[derive(Default)]
pub struct CoverageCalculator {
	splitters: Vec<IntRect>,
}

impl CoverageCalculator {
	pub fn new() -> Self { Self::default() }

	pub fn add_rectangle(&mut self, rectangle: &IntRect) {
		let mut work = vec![*rectangle];

		'work: while let Some(rect) = work.pop() {
			if !rect.is_valid() {
				continue;
			}

			for (i, splitter) in self.splitters.iter().enumerate() {
				if !splitter.intersects_with(&rect) {
					continue;
				}

				if splitter.contains(&rect) {
					// nothing new
					continue 'work;
				}

				if rect.contains(splitter) {
					// the new rectangle swallows an existing piece
					self.splitters.remove(i);
					work.push(rect);
					continue 'work;
				}

				// partial overlap: split the new rectangle against this piece
				// and retry with the non-overlapping parts
				let (pieces, count) = split_into_non_overlapping(splitter, &rect);
				work.extend_from_slice(&pieces[..count]);
				continue 'work;
			}

			self.splitters.push(rect);
		}
	}

	/// Area of the intersection of `query` with the covered region.
	pub fn covered_area_in(&self, query: &IntRect) -> i64 {
		if !query.is_valid() {
			return 0;
		}

		self.splitters
			.iter()
			.map(|r| r.intersect(query).area())
			.sum()
	}

	pub fn is_completely_covered(&self, query: &IntRect) -> bool {
		if !query.is_valid() {
			return true;
		}

		self.covered_area_in(query) == query.area()
	}
}

/// Cuts `b` into at most four pieces that do not overlap `a`. Precondition:
/// the rectangles overlap partially (neither contains the other).
fn split_into_non_overlapping(a: &IntRect, b: &IntRect) -> ([IntRect; 4], usize) {
	let mut result = [IntRect::invalid(); 4];
	let mut n = 0;

	if b.x >= a.x && b.x + b.w <= a.x + a.w {
		if a.y > b.y {
			result[n] = IntRect::new(b.x, b.y, b.w, a.y - b.y);
			n += 1;
		}
		if b.y + b.h > a.y + a.h {
			result[n] = IntRect::new(b.x, a.y + a.h, b.w, b.y + b.h - a.y - a.h);
			n += 1;
		}
	} else if b.x < a.x && b.x + b.w <= a.x + a.w {
		result[n] = IntRect::new(b.x, b.y, a.x - b.x, b.h);
		n += 1;
		if b.y < a.y {
			result[n] = IntRect::new(a.x, b.y, b.x + b.w - a.x, a.y - b.y);
			n += 1;
		}
		if b.y + b.h > a.y + a.h {
			result[n] = IntRect::new(a.x, a.y + a.h, b.x + b.w - a.x, b.y + b.h - a.y - a.h);
			n += 1;
		}
	} else if b.x >= a.x && b.x + b.w > a.x + a.w {
		result[n] = IntRect::new(a.x + a.w, b.y, b.x + b.w - a.x - a.w, b.h);
		n += 1;
		if b.y < a.y {
			result[n] = IntRect::new(b.x, b.y, a.x + a.w - b.x, a.y - b.y);
			n += 1;
		}
		if b.y + b.h > a.y + a.h {
			result[n] = IntRect::new(b.x, a.y + a.h, a.x + a.w - b.x, b.y + b.h - a.y - a.h);
			n += 1;
		}
	} else {
		result[n] = IntRect::new(b.x, b.y, a.x - b.x, b.h);
		n += 1;
		result[n] = IntRect::new(a.x + a.w, b.y, b.x + b.w - a.x - a.w, b.h);
		n += 1;
		if a.y > b.y {
			result[n] = IntRect::new(a.x, b.y, a.w, a.y - b.y);
			n += 1;
		} else if a.y + a.h > b.y && a.y + a.h < b.y + b.h {
			result[n] = IntRect::new(a.x, a.y + a.h, a.w, b.y + b.h - a.y - a.h);
			n += 1;
		}
	}

	(result, n)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_rectangle_covers_itself() {
		let mut cover = CoverageCalculator::new();
		let r = IntRect::new(10, 10, 20, 20);
		cover.add_rectangle(&r);
		assert!(cover.is_completely_covered(&r));
		assert!(cover.is_completely_covered(&IntRect::new(15, 15, 5, 5)));
		assert!(!cover.is_completely_covered(&IntRect::new(5, 10, 20, 20)));
	}

	#[test]
	fn two_halves_cover_the_union() {
		let mut cover = CoverageCalculator::new();
		cover.add_rectangle(&IntRect::new(0, 0, 10, 20));
		cover.add_rectangle(&IntRect::new(10, 0, 10, 20));
		assert!(cover.is_completely_covered(&IntRect::new(0, 0, 20, 20)));
		assert!(!cover.is_completely_covered(&IntRect::new(0, 0, 21, 20)));
	}

	#[test]
	fn overlapping_rectangles_count_area_once() {
		let mut cover = CoverageCalculator::new();
		cover.add_rectangle(&IntRect::new(0, 0, 10, 10));
		cover.add_rectangle(&IntRect::new(5, 5, 10, 10));
		assert_eq!(cover.covered_area_in(&IntRect::new(0, 0, 15, 15)), 175);
	}

	#[test]
	fn contained_rectangle_changes_nothing() {
		let mut cover = CoverageCalculator::new();
		cover.add_rectangle(&IntRect::new(0, 0, 10, 10));
		cover.add_rectangle(&IntRect::new(2, 2, 3, 3));
		assert_eq!(cover.covered_area_in(&IntRect::new(0, 0, 10, 10)), 100);
	}

	#[test]
	fn swallowing_rectangle_replaces_pieces() {
		let mut cover = CoverageCalculator::new();
		cover.add_rectangle(&IntRect::new(2, 2, 3, 3));
		cover.add_rectangle(&IntRect::new(6, 6, 2, 2));
		cover.add_rectangle(&IntRect::new(0, 0, 10, 10));
		assert!(cover.is_completely_covered(&IntRect::new(0, 0, 10, 10)));
	}

	#[test]
	fn cross_pattern_coverage() {
		// a plus sign out of two overlapping bars
		let mut cover = CoverageCalculator::new();
		cover.add_rectangle(&IntRect::new(4, 0, 2, 10));
		cover.add_rectangle(&IntRect::new(0, 4, 10, 2));
		assert_eq!(cover.covered_area_in(&IntRect::new(0, 0, 10, 10)), 2 * 10 + 2 * 10 - 4);
		assert!(cover.is_completely_covered(&IntRect::new(4, 0, 2, 10)));
		assert!(cover.is_completely_covered(&IntRect::new(0, 4, 10, 2)));
		assert!(!cover.is_completely_covered(&IntRect::new(0, 0, 2, 2)));
	}

	#[test]
	fn invalid_query_counts_as_covered() {
		let cover = CoverageCalculator::new();
		assert!(cover.is_completely_covered(&IntRect::invalid()));
		assert!(!cover.is_completely_covered(&IntRect::new(0, 0, 1, 1)));
	}

	#[test]
	fn randomized_against_naive_grid() {
		let mut cover = CoverageCalculator::new();
		let mut grid = [[false; 32]; 32];
		let mut state = 0xdeadbeefu32;
		let mut next = move || {
			state = state.wrapping_mul(1664525).wrapping_add(1013904223);
			state >> 16
		};

		for _ in 0..40 {
			let x = (next() % 24) as i32;
			let y = (next() % 24) as i32;
			let w = (next() % 8 + 1) as i32;
			let h = (next() % 8 + 1) as i32;
			cover.add_rectangle(&IntRect::new(x, y, w, h));
			for gy in y..y + h {
				for gx in x..x + w {
					grid[gy as usize][gx as usize] = true;
				}
			}
		}

		for _ in 0..60 {
			let x = (next() % 24) as i32;
			let y = (next() % 24) as i32;
			let w = (next() % 8 + 1) as i32;
			let h = (next() % 8 + 1) as i32;
			let query = IntRect::new(x, y, w, h);

			let mut area = 0i64;
			for gy in y..y + h {
				for gx in x..x + w {
					if grid[gy as usize][gx as usize] {
						area += 1;
					}
				}
			}

			assert_eq!(cover.covered_area_in(&query), area, "query {}", query);
			assert_eq!(cover.is_completely_covered(&query), area == query.area());
		}
	}
}
