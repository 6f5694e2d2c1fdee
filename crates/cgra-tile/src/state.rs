//! Tile-local architectural state.

use std::collections::HashMap;

use cgra_core::{Color, Data, InstructionGroup, NUM_COLORS, NUM_SIDES, Operand, Side};

/// Registers per tile.
pub const NUM_REGISTERS: usize = 64;

/// Local memory size in 32-bit words.
pub const MEMORY_WORDS: usize = 1024;

/// Scheduling discipline for instruction groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Per-group barrier: the whole group issues together or stalls.
    #[default]
    Sync,
    /// Per-operation eligibility within the group, tracked by reservation
    /// state.
    Async,
}

/// Async-mode bookkeeping for the current instruction group.
///
/// Rebuilt from scratch on every group entry; never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// `true` while the operation at this index has not yet executed.
    pub pending: Vec<bool>,
    /// Count of operations in the group that have not yet executed.
    pub ops_left: usize,
    /// Remaining reads expected from each `(color, side)` source within the
    /// group. Ports are ref-counted; registers and immediates are not.
    ref_counts: HashMap<(Color, Side), u32>,
}

impl Reservation {
    /// Fresh reservation state for one instruction group.
    #[must_use]
    pub fn for_group(group: &InstructionGroup) -> Self {
        let mut ref_counts: HashMap<(Color, Side), u32> = HashMap::new();
        for op in &group.ops {
            for src in &op.src {
                if let Operand::Port { side, color } = src {
                    *ref_counts.entry((*color, *side)).or_insert(0) += 1;
                }
            }
        }
        Self {
            pending: vec![true; group.ops.len()],
            ops_left: group.ops.len(),
            ref_counts,
        }
    }

    /// Record one read from a port source. Returns `true` when no further
    /// reads are expected and the port slot should be released.
    pub fn decrement_ref_count(&mut self, color: Color, side: Side) -> bool {
        match self.ref_counts.get_mut(&(color, side)) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.ref_counts.remove(&(color, side));
                true
            }
            // Reads outside the scanned set (boundary grants) release at once.
            None => true,
        }
    }

    /// Remaining expected reads for a port source.
    #[must_use]
    pub fn ref_count(&self, color: Color, side: Side) -> u32 {
        self.ref_counts.get(&(color, side)).copied().unwrap_or(0)
    }
}

/// All architectural state of one tile.
#[derive(Debug, Clone)]
pub struct TileState {
    /// Tile coordinate in the mesh.
    pub x: u32,
    pub y: u32,
    /// Scheduling discipline.
    pub mode: ExecMode,
    /// Register file. First read of a never-written register yields the
    /// masked zero token.
    pub registers: Vec<Data>,
    /// Local scratchpad memory, word-addressed.
    pub memory: Vec<u32>,
    /// Most recently delivered token per `(color, direction)`.
    pub recv_head: Vec<Vec<Data>>,
    /// Whether `recv_head` holds an unconsumed token.
    pub recv_ready: Vec<Vec<bool>>,
    /// Token queued for the outbound connection per `(color, direction)`.
    pub send_head: Vec<Vec<Data>>,
    /// Whether `send_head` is occupied.
    pub send_busy: Vec<Vec<bool>>,
    /// Latched address for the next DRAM request on the router port.
    pub addr_buf: Option<u64>,
    /// Whether the next router-port request is a write.
    pub to_write_memory: bool,
    /// Destinations of an in-flight `LD`, completed when the data-ready
    /// response arrives.
    pub pending_load_dst: Vec<Operand>,
    /// Named one-shot flags (`GRANT_ONCE`, `PHI_CONST`).
    pub states: HashMap<String, bool>,
    /// Selected entry block, when running.
    pub block: Option<usize>,
    /// Program counter within the block; -1 means uninitialized.
    pub pc: i64,
    /// Branch override applied at the next PC advance.
    pub next_pc: Option<usize>,
    /// Async-mode reservation state for the current group.
    pub reservation: Option<Reservation>,
}

impl TileState {
    #[must_use]
    pub fn new(x: u32, y: u32, mode: ExecMode) -> Self {
        Self {
            x,
            y,
            mode,
            registers: vec![Data::default(); NUM_REGISTERS],
            memory: vec![0; MEMORY_WORDS],
            recv_head: vec![vec![Data::default(); NUM_SIDES]; NUM_COLORS],
            recv_ready: vec![vec![false; NUM_SIDES]; NUM_COLORS],
            send_head: vec![vec![Data::default(); NUM_SIDES]; NUM_COLORS],
            send_busy: vec![vec![false; NUM_SIDES]; NUM_COLORS],
            addr_buf: None,
            to_write_memory: false,
            pending_load_dst: Vec::new(),
            states: HashMap::new(),
            block: None,
            pc: -1,
            next_pc: None,
            reservation: None,
        }
    }

    /// Reset control state to uninitialized, keeping registers and memory.
    pub fn reset_control(&mut self) {
        self.pc = -1;
        self.block = None;
        self.next_pc = None;
        self.reservation = None;
    }
}
