//! The boundary driver and its run loop.
//!
//! The driver owns one multi-channel port per boundary tile port, wired
//! during device registration, plus the feed-in/collect task queues. Its
//! `run` loop plays the host engine: each virtual tick it runs feed tasks,
//! drains boundary links, ticks the device, drains the memory bridge, and
//! runs collect tasks, until every task has finished.

use std::collections::BTreeMap;
use std::ops::Range;

use cgra_core::{
    CARDINAL_SIDES, Color, Data, Msg, MsgKind, Side, SimError, Tickable, Ticks,
};
use cgra_fabric::{Connection, MultiPort};

use crate::device::Device;
use crate::dram::Dram;
use crate::tasks::{CollectTask, FeedTask};

/// The boundary driver.
pub struct Driver {
    device: Device,
    /// Driver-side ports by name; ordered so wiring and drains are
    /// deterministic.
    ports: BTreeMap<String, MultiPort>,
    /// Links from driver ports into boundary tile ports.
    to_tile: Vec<Connection>,
    /// Links from boundary tile ports back into driver ports.
    from_tile: Vec<Connection>,
    feeds: Vec<FeedTask>,
    collects: Vec<CollectTask>,
    dram: Option<Dram>,
    now: Ticks,
}

impl Driver {
    /// Take ownership of the device and wire every boundary port.
    ///
    /// For each cardinal side, one driver port per boundary tile port is
    /// created, two directional links are recorded, and the driver port is
    /// installed as the tile's remote port for that side.
    #[must_use]
    pub fn new(mut device: Device) -> Self {
        let mut ports = BTreeMap::new();
        let mut to_tile = Vec::new();
        let mut from_tile = Vec::new();
        for side in CARDINAL_SIDES {
            let extent = device.side_extent(side);
            for (i, (x, y)) in device.side_tiles(side, 0..extent).into_iter().enumerate() {
                let driver_name = driver_port_name(side, i);
                let tile_name = device.tile(x, y).local_port_name(side);
                ports.insert(driver_name.clone(), MultiPort::new(driver_name.clone()));
                to_tile.push(Connection::new(driver_name.clone(), tile_name.clone()));
                from_tile.push(Connection::new(tile_name, driver_name.clone()));
                device.tile_mut(x, y).set_remote_port(side, driver_name);
            }
        }
        Self {
            device,
            ports,
            to_tile,
            from_tile,
            feeds: Vec::new(),
            collects: Vec::new(),
            dram: None,
            now: Ticks::ZERO,
        }
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    #[must_use]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Attach a DRAM model and wire every tile's router port to it.
    pub fn attach_dram(&mut self, size: usize) {
        let dram = Dram::new("dram", size);
        let (width, height) = self.device.size();
        for y in 0..height {
            for x in 0..width {
                let name = dram.name().to_string();
                self.device.tile_mut(x, y).set_remote_port(Side::Router, name);
            }
        }
        self.dram = Some(dram);
    }

    #[must_use]
    pub fn dram(&self) -> Option<&Dram> {
        self.dram.as_ref()
    }

    pub fn dram_mut(&mut self) -> Option<&mut Dram> {
        self.dram.as_mut()
    }

    /// Queue a feed-in task over the boundary ports of `side` in `range`.
    pub fn add_feed_task(
        &mut self,
        data: Vec<u32>,
        side: Side,
        range: Range<u32>,
        stride: usize,
        color: Color,
    ) {
        assert!(stride > 0, "feed stride must be positive");
        let ports: Vec<String> = range
            .clone()
            .map(|i| driver_port_name(side, i as usize))
            .collect();
        let peers: Vec<String> = self
            .device
            .side_tiles(side, range)
            .into_iter()
            .map(|(x, y)| self.device.tile(x, y).local_port_name(side))
            .collect();
        self.feeds.push(FeedTask {
            data,
            side,
            ports,
            peers,
            stride,
            color,
            round: 0,
        });
    }

    /// Queue a collect task expecting `len` tokens from `side` in `range`.
    /// Returns the task id for output retrieval after the run.
    pub fn add_collect_task(
        &mut self,
        len: usize,
        side: Side,
        range: Range<u32>,
        stride: usize,
        color: Color,
    ) -> usize {
        assert!(stride > 0, "collect stride must be positive");
        let ports: Vec<String> = range
            .map(|i| driver_port_name(side, i as usize))
            .collect();
        self.collects.push(CollectTask {
            out: vec![None; len],
            side,
            ports,
            stride,
            color,
            round: 0,
        });
        self.collects.len() - 1
    }

    /// A finished (or in-progress) collect task, by id.
    #[must_use]
    pub fn collect_task(&self, id: usize) -> &CollectTask {
        &self.collects[id]
    }

    /// Preload one word of a tile's local memory.
    pub fn write_memory(&mut self, x: u32, y: u32, addr: usize, value: u32) {
        self.device.write_memory(x, y, addr, value);
    }

    /// Read one word of a tile's local memory, for result extraction.
    #[must_use]
    pub fn read_memory(&self, x: u32, y: u32, addr: usize) -> u32 {
        self.device.read_memory(x, y, addr)
    }

    #[must_use]
    pub fn tasks_finished(&self) -> bool {
        self.feeds.iter().all(FeedTask::finished)
            && self.collects.iter().all(CollectTask::finished)
    }

    /// Run until every task finishes.
    ///
    /// Returns the tick count at completion. Errors with
    /// [`SimError::Stalled`] when a tick makes no progress while tasks
    /// remain, and [`SimError::Exhausted`] at the tick budget.
    pub fn run(&mut self, max_ticks: u64) -> Result<Ticks, SimError> {
        loop {
            if self.tasks_finished() {
                return Ok(self.now);
            }
            if self.now.get() >= max_ticks {
                return Err(SimError::Exhausted(max_ticks));
            }
            let progress = self.tick()?;
            if !progress {
                return Err(SimError::Stalled(self.now.get()));
            }
        }
    }

    fn run_feed_tasks(&mut self) -> bool {
        let mut progress = false;
        let mut feeds = std::mem::take(&mut self.feeds);
        for task in &mut feeds {
            if task.finished() {
                continue;
            }
            // The whole round issues together or waits: every port in the
            // range must have send capacity on the task's channel.
            let ready = task.ports.iter().all(|name| {
                self.ports.get_mut(name).is_some_and(|port| {
                    port.set_channel(task.color.index());
                    port.can_send()
                })
            });
            if !ready {
                tracing::trace!(side = %task.side, "feed round backpressured");
                continue;
            }
            for (i, name) in task.ports.iter().enumerate() {
                let index = task.data_index(i);
                let Some(&value) = task.data.get(index) else {
                    break;
                };
                let Some(port) = self.ports.get_mut(name) else {
                    continue;
                };
                let msg = Msg::move_token(
                    name.clone(),
                    task.peers[i].clone(),
                    task.color,
                    Data::scalar(value),
                )
                .stamped(self.now.get() as f64);
                port.set_channel(task.color.index());
                if port.send(msg).is_err() {
                    tracing::warn!(port = %name, "feed send refused after capacity check");
                }
            }
            task.round += 1;
            progress = true;
            if task.finished() {
                tracing::debug!(side = %task.side, rounds = task.round, "feed task finished");
            }
        }
        // Finished feed tasks are discarded.
        feeds.retain(|task| !task.finished());
        self.feeds = feeds;
        progress
    }

    fn run_collect_tasks(&mut self) -> bool {
        let mut progress = false;
        for task in &mut self.collects {
            if task.finished() {
                continue;
            }
            let all_have = task
                .ports
                .iter()
                .all(|name| self.ports.get(name).is_some_and(|p| p.peek_incoming().is_some()));
            if !all_have {
                continue;
            }
            for (i, name) in task.ports.iter().enumerate() {
                let Some(msg) = self.ports.get_mut(name).and_then(MultiPort::retrieve_incoming)
                else {
                    continue;
                };
                let slot = task.slot_index(i);
                if slot >= task.out.len() {
                    continue;
                }
                if let MsgKind::Move { data, .. } = msg.kind {
                    task.out[slot] = Some(data);
                }
            }
            task.round += 1;
            progress = true;
            if task.finished() {
                tracing::debug!(side = %task.side, rounds = task.round, "collect task finished");
            }
        }
        progress
    }

    /// Drain driver ports into boundary tile ports, one message per link.
    fn drain_to_tile(&mut self) -> bool {
        let mut progress = false;
        for i in 0..self.to_tile.len() {
            let (src, dst) = {
                let link = &self.to_tile[i];
                (link.src().to_string(), link.dst().to_string())
            };
            let Some((tile_index, side)) = self.device.lookup_port(&dst) else {
                continue;
            };
            let has_msg = self
                .ports
                .get(&src)
                .is_some_and(|p| p.peek_outgoing().is_some());
            if !has_msg
                || !self
                    .device
                    .tile_by_index_mut(tile_index)
                    .port(side)
                    .can_deliver()
            {
                continue;
            }
            let Some(msg) = self.ports.get_mut(&src).and_then(MultiPort::retrieve_outgoing)
            else {
                continue;
            };
            if self
                .device
                .tile_by_index_mut(tile_index)
                .port_mut(side)
                .deliver(msg)
                .is_ok()
            {
                progress = true;
            }
        }
        progress
    }

    /// Drain boundary tile ports into driver ports, one message per link.
    fn drain_from_tile(&mut self) -> bool {
        let mut progress = false;
        for i in 0..self.from_tile.len() {
            let (src, dst) = {
                let link = &self.from_tile[i];
                (link.src().to_string(), link.dst().to_string())
            };
            let Some((tile_index, side)) = self.device.lookup_port(&src) else {
                continue;
            };
            let deliverable = self.ports.get(&dst).is_some_and(MultiPort::can_deliver);
            if !deliverable
                || self
                    .device
                    .tile_by_index_mut(tile_index)
                    .port(side)
                    .peek_outgoing()
                    .is_none()
            {
                continue;
            }
            let Some(msg) = self
                .device
                .tile_by_index_mut(tile_index)
                .port_mut(side)
                .retrieve_outgoing()
            else {
                continue;
            };
            if let Some(port) = self.ports.get_mut(&dst) {
                if port.deliver(msg).is_ok() {
                    progress = true;
                }
            }
        }
        progress
    }

    /// Move router-port requests to the DRAM model, service it, and deliver
    /// responses back to the requesting tiles.
    fn drain_dram(&mut self) -> bool {
        let Some(dram) = self.dram.as_mut() else {
            return false;
        };
        let mut progress = false;
        for tile in self.device.tiles_mut() {
            if let Some(msg) = tile.port_mut(Side::Router).retrieve_outgoing() {
                dram.enqueue(msg);
                progress = true;
            }
        }
        progress |= dram.tick();
        // Deliver what fits; backpressured responses go back in the queue.
        for _ in 0..dram.pending_responses() {
            let Some(response) = dram.pop_response() else {
                break;
            };
            let Some((tile_index, side)) = self.device.lookup_port(&response.dst) else {
                tracing::warn!(dst = %response.dst, "DRAM response to unknown port, dropped");
                continue;
            };
            let tile = self.device.tile_by_index_mut(tile_index);
            if tile.port(side).can_deliver() {
                if tile.port_mut(side).deliver(response).is_ok() {
                    progress = true;
                }
            } else {
                dram.requeue_response(response);
            }
        }
        progress
    }
}

impl Tickable for Driver {
    /// One virtual tick: feeds, boundary delivery, device, memory bridge,
    /// collects.
    fn tick(&mut self) -> Result<bool, SimError> {
        let mut progress = self.run_feed_tasks();
        progress |= self.drain_to_tile();
        progress |= self.device.tick()?;
        progress |= self.drain_from_tile();
        progress |= self.drain_dram();
        progress |= self.run_collect_tasks();
        self.now += Ticks::new(1);
        Ok(progress)
    }
}

fn driver_port_name(side: Side, index: usize) -> String {
    format!("driver.{side}[{index}]")
}
