//! The 2-D mesh of tiles.
//!
//! The device owns every tile and the inter-tile connection table, built at
//! construction for the four cardinal directions. Connections are name
//! relations; the device resolves them through its port lookup and drains
//! one message per connection per tick, which realizes the one-tick-per-hop
//! latency.

use std::collections::HashMap;

use cgra_core::{CARDINAL_SIDES, Side, SimError, Tickable};
use cgra_fabric::Connection;
use cgra_tile::{ExecMode, Tile};

/// A rectangular mesh of tiles with boundary ports by side.
pub struct Device {
    width: u32,
    height: u32,
    /// Row-major: index `y * width + x`.
    tiles: Vec<Tile>,
    /// Inter-tile links, one per direction per adjacent pair.
    links: Vec<Connection>,
    /// Port-name lookup: tile index and side.
    port_index: HashMap<String, (usize, Side)>,
}

impl Device {
    /// Build a `width x height` mesh, wiring each tile to its cardinal
    /// neighbours.
    ///
    /// # Panics
    ///
    /// Panics on a zero-sized grid.
    #[must_use]
    pub fn new(width: u32, height: u32, mode: ExecMode) -> Self {
        assert!(width > 0 && height > 0, "mesh must be at least 1x1");
        let mut tiles = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                tiles.push(Tile::new(x, y, mode));
            }
        }

        let mut links = Vec::new();
        let mut port_index = HashMap::new();
        for y in 0..height {
            for x in 0..width {
                let index = (y * width + x) as usize;
                for side in Side::all() {
                    port_index.insert(tiles[index].local_port_name(side), (index, side));
                }
                for side in CARDINAL_SIDES {
                    let Some((dx, dy)) = side.delta() else {
                        continue;
                    };
                    let (nx, ny) = (i64::from(x) + dx, i64::from(y) + dy);
                    if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
                        continue;
                    }
                    let neighbour = (ny as u32 * width + nx as u32) as usize;
                    let local = tiles[index].local_port_name(side);
                    let remote = tiles[neighbour].local_port_name(side.opposite());
                    tiles[index].set_remote_port(side, remote.clone());
                    links.push(Connection::new(local, remote));
                }
            }
        }

        Self {
            width,
            height,
            tiles,
            links,
            port_index,
        }
    }

    /// Grid dimensions as `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn tile_index(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "tile ({x},{y}) outside {}x{} mesh",
            self.width,
            self.height
        );
        (y * self.width + x) as usize
    }

    /// Tile handle. Panics on out-of-range coordinates.
    #[must_use]
    pub fn tile(&self, x: u32, y: u32) -> &Tile {
        &self.tiles[self.tile_index(x, y)]
    }

    pub fn tile_mut(&mut self, x: u32, y: u32) -> &mut Tile {
        let index = self.tile_index(x, y);
        &mut self.tiles[index]
    }

    /// Coordinates of the boundary tiles on `side`, within the half-open
    /// column (north/south) or row (west/east) range.
    ///
    /// # Panics
    ///
    /// Panics when `side` is not cardinal.
    #[must_use]
    pub fn side_tiles(&self, side: Side, range: std::ops::Range<u32>) -> Vec<(u32, u32)> {
        match side {
            Side::North => range.map(|x| (x, 0)).collect(),
            Side::South => range.map(|x| (x, self.height - 1)).collect(),
            Side::West => range.map(|y| (0, y)).collect(),
            Side::East => range.map(|y| (self.width - 1, y)).collect(),
            other => panic!("side_tiles on non-boundary side {other}"),
        }
    }

    /// Names of the boundary tile ports on `side` within `range`.
    #[must_use]
    pub fn side_ports(&self, side: Side, range: std::ops::Range<u32>) -> Vec<String> {
        self.side_tiles(side, range)
            .into_iter()
            .map(|(x, y)| self.tile(x, y).local_port_name(side))
            .collect()
    }

    /// Extent of a boundary side: width for north/south, height for
    /// west/east.
    #[must_use]
    pub fn side_extent(&self, side: Side) -> u32 {
        match side {
            Side::North | Side::South => self.width,
            _ => self.height,
        }
    }

    /// Preload one word of a tile's local memory.
    pub fn write_memory(&mut self, x: u32, y: u32, addr: usize, value: u32) {
        self.tile_mut(x, y).write_memory(addr, value);
    }

    /// Read one word of a tile's local memory.
    #[must_use]
    pub fn read_memory(&self, x: u32, y: u32, addr: usize) -> u32 {
        self.tile(x, y).read_memory(addr)
    }

    /// Resolve a tile port name.
    #[must_use]
    pub(crate) fn lookup_port(&self, name: &str) -> Option<(usize, Side)> {
        self.port_index.get(name).copied()
    }

    pub(crate) fn tile_by_index_mut(&mut self, index: usize) -> &mut Tile {
        &mut self.tiles[index]
    }

    pub(crate) fn tiles_mut(&mut self) -> impl Iterator<Item = &mut Tile> {
        self.tiles.iter_mut()
    }

    /// Whether every tile is between blocks.
    #[must_use]
    pub fn all_idle(&self) -> bool {
        self.tiles.iter().all(Tile::is_idle)
    }

    /// Move one message per inter-tile link from source outgoing to
    /// destination incoming, capacity permitting.
    fn drain_links(&mut self) -> bool {
        let mut progress = false;
        for i in 0..self.links.len() {
            let (src_name, dst_name) = {
                let link = &self.links[i];
                (link.src().to_string(), link.dst().to_string())
            };
            let Some((si, ss)) = self.lookup_port(&src_name) else {
                continue;
            };
            let Some((di, ds)) = self.lookup_port(&dst_name) else {
                continue;
            };
            if self.tiles[si].port(ss).peek_outgoing().is_none()
                || !self.tiles[di].port(ds).can_deliver()
            {
                continue;
            }
            if let Some(msg) = self.tiles[si].port_mut(ss).retrieve_outgoing() {
                if self.tiles[di].port_mut(ds).deliver(msg).is_ok() {
                    progress = true;
                }
            }
        }
        progress
    }
}

impl Tickable for Device {
    /// Tick every tile, then drain the inter-tile links. Tokens sent this
    /// tick arrive at the neighbour's incoming buffer and are received by
    /// its next tick, never earlier.
    fn tick(&mut self) -> Result<bool, SimError> {
        let mut progress = false;
        for tile in &mut self.tiles {
            progress |= tile.tick()?;
        }
        progress |= self.drain_links();
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_indexing() {
        let device = Device::new(3, 2, ExecMode::Sync);
        assert_eq!(device.size(), (3, 2));
        assert_eq!(device.tile(2, 1).x(), 2);
        assert_eq!(device.tile(2, 1).y(), 1);
    }

    #[test]
    #[should_panic(expected = "outside 3x2 mesh")]
    fn out_of_range_tile_panics() {
        let device = Device::new(3, 2, ExecMode::Sync);
        let _ = device.tile(3, 0);
    }

    #[test]
    fn side_port_indexing() {
        let device = Device::new(3, 2, ExecMode::Sync);
        assert_eq!(
            device.side_ports(Side::North, 0..3),
            vec!["tile(0,0).North", "tile(1,0).North", "tile(2,0).North"]
        );
        assert_eq!(
            device.side_ports(Side::South, 1..3),
            vec!["tile(1,1).South", "tile(2,1).South"]
        );
        assert_eq!(
            device.side_ports(Side::East, 0..2),
            vec!["tile(2,0).East", "tile(2,1).East"]
        );
    }

    #[test]
    fn interior_remote_ports_face_each_other() {
        let device = Device::new(2, 1, ExecMode::Sync);
        // Messages out of (0,0).East must be addressed to (1,0).West; the
        // link table carries the same relation.
        assert!(
            device
                .links
                .iter()
                .any(|l| l.src() == "tile(0,0).East" && l.dst() == "tile(1,0).West")
        );
        assert!(
            device
                .links
                .iter()
                .any(|l| l.src() == "tile(1,0).West" && l.dst() == "tile(0,0).East")
        );
    }

    #[test]
    fn memory_passthrough() {
        let mut device = Device::new(2, 2, ExecMode::Sync);
        device.write_memory(1, 1, 5, 77);
        assert_eq!(device.read_memory(1, 1, 5), 77);
        assert_eq!(device.read_memory(0, 0, 5), 0);
    }
}
