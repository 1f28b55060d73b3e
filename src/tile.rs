//! Quadtile spatial index keys.
//!
//! Lon/lat are quantised onto a 65536 x 65536 grid and the two 16-bit
//! coordinates are Morton-interleaved into a `u32`, so spatially close nodes
//! sort close together in the `node_tiles` table. A query box is covered by a
//! short list of inclusive Morton ranges; rows fetched from those ranges are a
//! superset of the box and are filtered exactly afterwards.

use crate::geom::Bbox;

pub const TILE_BITS: u32 = 16;
const GRID_MAX: f64 = ((1u32 << TILE_BITS) - 1) as f64;

/// Levels below the query's own size that the covering may refine to.
/// Each extra level at most quadruples the range count along the border.
const COVER_EXTRA_LEVELS: u32 = 3;

pub fn tile_x(lon: f64) -> u32 {
    (((lon + 180.0) / 360.0) * GRID_MAX).round().clamp(0.0, GRID_MAX) as u32
}

pub fn tile_y(lat: f64) -> u32 {
    (((lat + 90.0) / 180.0) * GRID_MAX).round().clamp(0.0, GRID_MAX) as u32
}

fn spread(v: u32) -> u32 {
    let mut v = v & 0x0000_ffff;
    v = (v | (v << 8)) & 0x00ff_00ff;
    v = (v | (v << 4)) & 0x0f0f_0f0f;
    v = (v | (v << 2)) & 0x3333_3333;
    v = (v | (v << 1)) & 0x5555_5555;
    v
}

/// x bits land on even positions, y bits on odd positions.
pub fn interleave(x: u32, y: u32) -> u32 {
    spread(x) | (spread(y) << 1)
}

pub fn tile_for_point(lat: f64, lon: f64) -> u32 {
    interleave(tile_x(lon), tile_y(lat))
}

#[derive(Debug, Clone, Copy)]
struct GridRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Sorted, merged, inclusive Morton ranges covering `bbox`. An inverted box
/// covers nothing.
pub fn tile_ranges(bbox: &Bbox) -> Vec<(u32, u32)> {
    let q = GridRect {
        x0: tile_x(bbox.min_lon),
        y0: tile_y(bbox.min_lat),
        x1: tile_x(bbox.max_lon),
        y1: tile_y(bbox.max_lat),
    };
    if q.x1 < q.x0 || q.y1 < q.y0 {
        return Vec::new();
    }

    let span = q.x1.saturating_sub(q.x0).max(q.y1.saturating_sub(q.y0)) + 1;
    let span_bits = (32 - (span - 1).leading_zeros()).min(TILE_BITS);
    let max_level = (TILE_BITS - span_bits + COVER_EXTRA_LEVELS).min(TILE_BITS);

    let mut raw = Vec::new();
    cover(0, 0, 0, q, max_level, &mut raw);

    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(raw.len());
    for (lo, hi) in raw {
        match merged.last_mut() {
            Some(last) if last.1.checked_add(1) == Some(lo) => last.1 = hi,
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

fn cover(cx: u32, cy: u32, level: u32, q: GridRect, max_level: u32, out: &mut Vec<(u32, u32)>) {
    let shift = TILE_BITS - level;
    let size = 1u32 << shift;
    let (lo_x, lo_y) = (cx << shift, cy << shift);
    let (hi_x, hi_y) = (lo_x + (size - 1), lo_y + (size - 1));

    if hi_x < q.x0 || lo_x > q.x1 || hi_y < q.y0 || lo_y > q.y1 {
        return;
    }

    let inside = lo_x >= q.x0 && hi_x <= q.x1 && lo_y >= q.y0 && hi_y <= q.y1;
    if inside || level == max_level {
        let start = (interleave(cx, cy) as u64) << (2 * shift);
        let len = 1u64 << (2 * shift);
        out.push((start as u32, (start + len - 1) as u32));
        return;
    }

    // Children in Morton order keep `out` sorted.
    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        cover(cx * 2 + dx, cy * 2 + dy, level + 1, q, max_level, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(ranges: &[(u32, u32)], tile: u32) -> bool {
        ranges.iter().any(|(lo, hi)| tile >= *lo && tile <= *hi)
    }

    #[test]
    fn interleave_places_bits() {
        assert_eq!(interleave(1, 0), 1);
        assert_eq!(interleave(0, 1), 2);
        assert_eq!(interleave(3, 3), 15);
        assert_eq!(interleave(0xffff, 0xffff), u32::MAX);
    }

    #[test]
    fn whole_world_is_one_range() {
        let r = tile_ranges(&Bbox::new(-180.0, -90.0, 180.0, 90.0));
        assert_eq!(r, vec![(0, u32::MAX)]);
    }

    #[test]
    fn ranges_sorted_and_disjoint() {
        let r = tile_ranges(&Bbox::new(13.30, 52.50, 13.45, 52.55));
        assert!(!r.is_empty());
        for w in r.windows(2) {
            assert!(w[0].1 < w[1].0);
        }
        assert!(r.len() < 1100);
    }

    #[test]
    fn every_point_in_box_is_covered() {
        let b = Bbox::new(-0.5, 51.2, 0.3, 51.7);
        let ranges = tile_ranges(&b);
        for i in 0..=20 {
            for j in 0..=20 {
                let lon = b.min_lon + (b.max_lon - b.min_lon) * (i as f64) / 20.0;
                let lat = b.min_lat + (b.max_lat - b.min_lat) * (j as f64) / 20.0;
                assert!(covered(&ranges, tile_for_point(lat, lon)), "{lat},{lon}");
            }
        }
    }

    #[test]
    fn degenerate_point_box() {
        let ranges = tile_ranges(&Bbox::point(10.0, 20.0));
        assert!(covered(&ranges, tile_for_point(10.0, 20.0)));
    }

    #[test]
    fn inverted_box_covers_nothing() {
        assert!(tile_ranges(&Bbox::new(2.0, 0.0, 1.0, 1.0)).is_empty());
        assert!(tile_ranges(&Bbox::new(0.0, 1.0, 1.0, 0.0)).is_empty());
    }
}
