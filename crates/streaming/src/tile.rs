//! Fixed tile grid over the equirectangular world texture.
//!
//! Tile `x` grows eastward from longitude -180, tile `y` grows southward from
//! the north pole, matching the `v` axis of `foundation::geo_to_uv`.

use std::collections::BTreeSet;
use std::fmt;

use foundation::{GeoBounds, UvCoordinate, geo_to_uv};
use serde::{Deserialize, Serialize};

/// Tile address in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Opaque content path used by tile stores.
    pub fn content_path(&self) -> String {
        format!("tiles/{}_{}.png", self.x, self.y)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

/// Signed pixel position relative to a tile's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelOffset {
    pub x: i64,
    pub y: i64,
}

/// Rectangle in global texture pixels. `x` may be any column in
/// `[0, texture_width)`; the rectangle may extend past the east edge, in which
/// case it continues on the west edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileGrid {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Default for TileGrid {
    /// 8×4 tiles of 2048² pixels: a 16384×8192 world texture.
    fn default() -> Self {
        Self {
            tiles_x: 8,
            tiles_y: 4,
            tile_width: 2048,
            tile_height: 2048,
        }
    }
}

impl TileGrid {
    /// Zero dimensions are raised to 1.
    pub fn new(tiles_x: u32, tiles_y: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            tiles_x: tiles_x.max(1),
            tiles_y: tiles_y.max(1),
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
        }
    }

    pub fn texture_width(&self) -> u64 {
        self.tiles_x as u64 * self.tile_width as u64
    }

    pub fn texture_height(&self) -> u64 {
        self.tiles_y as u64 * self.tile_height as u64
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    pub fn contains(&self, id: TileId) -> bool {
        id.x < self.tiles_x && id.y < self.tiles_y
    }

    /// Every tile in row-major order.
    pub fn all_tiles(&self) -> Vec<TileId> {
        (0..self.tiles_y)
            .flat_map(|y| (0..self.tiles_x).map(move |x| TileId::new(x, y)))
            .collect()
    }

    pub fn affected_tiles(&self, bounds: &GeoBounds) -> BTreeSet<TileId> {
        get_affected_tiles(bounds, self.tiles_x, self.tiles_y)
    }

    /// Pixel position of `uv` relative to the top-left corner of `tile`.
    ///
    /// When `uv` lies inside `tile` this is the fractional remainder of
    /// `uv * tiles` scaled by the tile size. Points outside the tile give
    /// negative or oversized offsets, which is what blitting a rectangle that
    /// starts in a neighbouring tile needs.
    pub fn pixel_offset_within_tile(&self, uv: UvCoordinate, tile: TileId) -> PixelOffset {
        let gx = (uv.u * self.texture_width() as f64).floor() as i64;
        let gy = (uv.v * self.texture_height() as f64).floor() as i64;
        PixelOffset {
            x: gx - tile.x as i64 * self.tile_width as i64,
            y: gy - tile.y as i64 * self.tile_height as i64,
        }
    }

    /// Target rectangle of `bounds` in global texture pixels, at least 1×1.
    pub fn footprint(&self, bounds: &GeoBounds) -> PixelRect {
        let origin =
            self.pixel_offset_within_tile(geo_to_uv(bounds.north_west()), TileId::new(0, 0));

        let tex_w = self.texture_width() as f64;
        let tex_h = self.texture_height() as f64;
        let u_end = unwrapped_u_end(bounds);
        let v_end = geo_to_uv(bounds.south_east()).v;

        let x_end = (u_end * tex_w).ceil() as i64;
        let y_end = (v_end * tex_h).ceil() as i64;

        PixelRect {
            x: origin.x,
            y: origin.y,
            width: (x_end - origin.x).max(1) as u32,
            height: (y_end - origin.y).max(1) as u32,
        }
    }

    /// Offsets at which `rect` must be drawn into `tile`, one per horizontal
    /// wrap copy that intersects it. Empty when they do not overlap.
    pub fn placements(&self, rect: &PixelRect, tile: TileId) -> Vec<PixelOffset> {
        let tw = self.tile_width as i64;
        let th = self.tile_height as i64;
        let ox = tile.x as i64 * tw;
        let oy = tile.y as i64 * th;

        if rect.y >= oy + th || rect.y + rect.height as i64 <= oy {
            return Vec::new();
        }

        let tex_w = self.texture_width() as i64;
        [-tex_w, 0, tex_w]
            .into_iter()
            .map(|shift| rect.x + shift)
            .filter(|&rx| rx < ox + tw && rx + rect.width as i64 > ox)
            .map(|rx| PixelOffset {
                x: rx - ox,
                y: rect.y - oy,
            })
            .collect()
    }
}

/// Every tile overlapped by `bounds` on a `tiles_x × tiles_y` grid.
///
/// Column indices wrap modulo `tiles_x`, so rectangles crossing the
/// antimeridian pick up both edge columns; row indices clamp at the poles.
/// Eastern and southern edges are exclusive: a rectangle ending exactly on a
/// tile boundary does not touch the next tile.
pub fn get_affected_tiles(bounds: &GeoBounds, tiles_x: u32, tiles_y: u32) -> BTreeSet<TileId> {
    let mut tiles = BTreeSet::new();
    if tiles_x == 0 || tiles_y == 0 {
        return tiles;
    }

    let north_west = geo_to_uv(bounds.north_west());
    let south_east = geo_to_uv(bounds.south_east());
    let u_end = unwrapped_u_end(bounds);

    let tx = tiles_x as i64;
    let x_first = (north_west.u * tx as f64).floor() as i64;
    let x_last = last_index(u_end * tx as f64).max(x_first);
    let columns = (x_last - x_first + 1).min(tx);

    let ty = tiles_y as i64;
    let y_first = ((north_west.v * ty as f64).floor() as i64).clamp(0, ty - 1);
    let y_last = last_index(south_east.v * ty as f64).clamp(y_first, ty - 1);

    for step in 0..columns {
        let x = (x_first + step).rem_euclid(tx) as u32;
        for y in y_first..=y_last {
            tiles.insert(TileId::new(x, y as u32));
        }
    }
    tiles
}

/// Eastern edge in `u`, exceeding 1.0 when `bounds` crosses the antimeridian.
fn unwrapped_u_end(bounds: &GeoBounds) -> f64 {
    (bounds.long_min() + 180.0 + bounds.long_span()) / 360.0
}

fn last_index(exclusive_edge: f64) -> i64 {
    exclusive_edge.ceil() as i64 - 1
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use foundation::{GeoBounds, GeoCoordinate, UvCoordinate, calculate_drawing_bounds};
    use pretty_assertions::assert_eq;

    use super::{PixelOffset, PixelRect, TileGrid, TileId, get_affected_tiles};

    fn xs(tiles: &BTreeSet<TileId>) -> Vec<u32> {
        let set: BTreeSet<u32> = tiles.iter().map(|t| t.x).collect();
        set.into_iter().collect()
    }

    #[test]
    fn antimeridian_bounds_hit_both_edge_columns() {
        let bounds = GeoBounds::new(-5.0, 5.0, 170.0, -170.0);
        let tiles = get_affected_tiles(&bounds, 8, 4);
        assert!(!tiles.is_empty());
        assert_eq!(xs(&tiles), vec![0, 7]);
        assert!(tiles.iter().all(|t| t.y == 1 || t.y == 2));
    }

    #[test]
    fn full_row_returns_each_column_once() {
        let band = GeoBounds::latitude_band(10.0, 20.0);
        let tiles = get_affected_tiles(&band, 8, 4);
        assert_eq!(tiles.len(), 8);
        assert_eq!(xs(&tiles), (0..8).collect::<Vec<_>>());
        assert!(tiles.iter().all(|t| t.y == 1));
    }

    #[test]
    fn zoomed_out_near_pole_covers_whole_row_without_duplicates() {
        let bounds = calculate_drawing_bounds(GeoCoordinate::new(88.0, 33.0), 1.0);
        let tiles = get_affected_tiles(&bounds, 8, 4);
        assert_eq!(tiles.len(), 8);
        assert_eq!(xs(&tiles).len(), 8);
    }

    #[test]
    fn wide_crossing_bounds_do_not_duplicate() {
        // 350 degrees wide, crossing the antimeridian.
        let bounds = GeoBounds::new(0.0, 1.0, 5.0, -5.0);
        let tiles = get_affected_tiles(&bounds, 8, 4);
        assert_eq!(tiles.len(), 8);
    }

    #[test]
    fn poles_clamp_rows() {
        let north = get_affected_tiles(&GeoBounds::new(80.0, 90.0, 0.0, 10.0), 8, 4);
        assert_eq!(north.into_iter().collect::<Vec<_>>(), vec![TileId::new(4, 0)]);

        let south = get_affected_tiles(&GeoBounds::new(-90.0, -80.0, 0.0, 10.0), 8, 4);
        assert_eq!(south.into_iter().collect::<Vec<_>>(), vec![TileId::new(4, 3)]);
    }

    #[test]
    fn edge_on_tile_boundary_is_exclusive() {
        // -135 is the boundary between columns 0 and 1; 45 between rows 0 and 1.
        let bounds = GeoBounds::new(45.0, 60.0, -170.0, -135.0);
        let tiles = get_affected_tiles(&bounds, 8, 4);
        assert_eq!(tiles.into_iter().collect::<Vec<_>>(), vec![TileId::new(0, 0)]);
    }

    #[test]
    fn pixel_offset_is_fractional_remainder_inside_tile() {
        let grid = TileGrid::new(8, 4, 100, 100);
        let uv = UvCoordinate::new(0.3125, 0.625);
        // u * 8 = 2.5, v * 4 = 2.5
        let off = grid.pixel_offset_within_tile(uv, TileId::new(2, 2));
        assert_eq!(off, PixelOffset { x: 50, y: 50 });

        let neighbour = grid.pixel_offset_within_tile(uv, TileId::new(3, 2));
        assert_eq!(neighbour, PixelOffset { x: -50, y: 50 });
    }

    #[test]
    fn footprint_of_crossing_bounds_extends_past_east_edge() {
        let grid = TileGrid::new(8, 4, 100, 100);
        let bounds = GeoBounds::new(-45.0, 45.0, 135.0, -135.0);
        let rect = grid.footprint(&bounds);
        assert_eq!(
            rect,
            PixelRect {
                x: 700,
                y: 100,
                width: 200,
                height: 200,
            }
        );

        let west = grid.placements(&rect, TileId::new(0, 1));
        assert_eq!(west, vec![PixelOffset { x: -100, y: 0 }]);
        let east = grid.placements(&rect, TileId::new(7, 1));
        assert_eq!(east, vec![PixelOffset { x: 0, y: 0 }]);
        assert!(grid.placements(&rect, TileId::new(3, 1)).is_empty());
        assert!(grid.placements(&rect, TileId::new(7, 3)).is_empty());
    }

    #[test]
    fn footprint_pixels_stay_inside_affected_tiles() {
        let grid = TileGrid::new(8, 4, 64, 64);
        for (lat, lon, zoom) in [(0.0, 0.0, 5.0), (60.0, 179.0, 2.0), (-89.0, -10.0, 1.0)] {
            let bounds = calculate_drawing_bounds(GeoCoordinate::new(lat, lon), zoom);
            let rect = grid.footprint(&bounds);
            let affected = grid.affected_tiles(&bounds);
            for tile in grid.all_tiles() {
                if !grid.placements(&rect, tile).is_empty() {
                    assert!(affected.contains(&tile), "{tile} drawn but not affected");
                }
            }
        }
    }

    #[test]
    fn grid_dimensions() {
        let grid = TileGrid::default();
        assert_eq!(grid.texture_width(), 16_384);
        assert_eq!(grid.texture_height(), 8_192);
        assert_eq!(grid.tile_count(), 32);
        assert_eq!(grid.all_tiles().len(), 32);
        assert!(grid.contains(TileId::new(7, 3)));
        assert!(!grid.contains(TileId::new(8, 0)));
        assert_eq!(TileId::new(3, 1).content_path(), "tiles/3_1.png");
    }
}
