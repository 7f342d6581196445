use std::fmt;

use serde::Deserialize;

use crate::memory::{encode_value, Addr, Memory};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

pub const DEFAULT_CACHE_SIZE: usize = 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 8;
pub const DEFAULT_HIT_LATENCY: usize = 1;
pub const DEFAULT_MISS_PENALTY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheGeometry {
    pub size: usize,
    pub block_size: usize,
    pub hit_latency: usize,
    pub miss_penalty: usize,
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            hit_latency: DEFAULT_HIT_LATENCY,
            miss_penalty: DEFAULT_MISS_PENALTY,
        }
    }
}

impl CacheGeometry {
    pub fn num_blocks(&self) -> usize {
        self.size / self.block_size
    }
}

/// one line of the cache. `base` is the address of the miss that filled it,
/// which need not be block aligned.
#[derive(Debug, Clone)]
pub struct CacheBlock {
    data: Vec<u8>,
    base: i64,
    tag: i64,
    valid: bool,
    dirty: bool,
}

impl CacheBlock {
    fn new(block_size: usize) -> Self {
        Self {
            data: vec![0; block_size],
            base: 0,
            tag: 0,
            valid: false,
            dirty: false,
        }
    }
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn base(&self) -> Addr {
        Addr::new(self.base)
    }
    pub fn tag(&self) -> i64 {
        self.tag
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    fn covers(&self, addr: i64, size: usize) -> bool {
        self.valid
            && addr >= self.base
            && addr.saturating_add(size as i64) <= self.base.saturating_add(self.data.len() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAccess {
    pub hit: bool,
    pub latency: usize,
    pub data: Vec<u8>,
}

pub struct Cache {
    geometry: CacheGeometry,
    blocks: Vec<CacheBlock>,
    memory: Memory,
    hits: usize,
    misses: usize,
}

impl Cache {
    pub fn new(geometry: CacheGeometry) -> Self {
        Self {
            geometry,
            blocks: vec![CacheBlock::new(geometry.block_size); geometry.num_blocks()],
            memory: Memory::new(),
            hits: 0,
            misses: 0,
        }
    }
    pub fn geometry(&self) -> CacheGeometry {
        self.geometry
    }
    pub fn reconfigure(&mut self, geometry: CacheGeometry) {
        self.geometry = geometry;
        self.reset();
    }
    pub fn index(&self, addr: i64) -> usize {
        let block = addr.div_euclid(self.geometry.block_size as i64);
        block.rem_euclid(self.blocks.len() as i64) as usize
    }
    fn tag_of(&self, addr: i64) -> i64 {
        addr.div_euclid(self.geometry.block_size as i64)
            .div_euclid(self.blocks.len() as i64)
    }
    fn fill(&mut self, index: usize, addr: i64) {
        let tag = self.tag_of(addr);
        let block_size = self.geometry.block_size;
        let block = &mut self.blocks[index];
        if block.valid && block.dirty {
            log::trace!("evict dirty block at {}", Addr::new(block.base));
            self.memory.write(block.base, &block.data);
        }
        block.data = self.memory.read(addr, block_size);
        block.base = addr;
        block.tag = tag;
        block.valid = true;
        block.dirty = false;
    }
    fn latency(&self, hit: bool) -> usize {
        if hit {
            self.geometry.hit_latency
        } else {
            self.geometry.miss_penalty
        }
    }
    pub fn load(&mut self, addr: i64, size: usize) -> CacheAccess {
        let index = self.index(addr);
        let hit = self.blocks[index].covers(addr, size);
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.fill(index, addr);
        }
        let block = &self.blocks[index];
        let offset = (addr - block.base) as usize;
        let end = (offset + size).min(block.data.len());
        let mut data = block.data[offset..end].to_vec();
        data.resize(size, 0);
        CacheAccess {
            hit,
            latency: self.latency(hit),
            data,
        }
    }
    /// hit test and latency of a store, without touching any state.
    pub fn probe_store(&self, addr: i64, size: usize) -> CacheAccess {
        let hit = self.blocks[self.index(addr)].covers(addr, size);
        CacheAccess {
            hit,
            latency: self.latency(hit),
            data: Vec::new(),
        }
    }
    /// write-allocate; memory sees the bytes only on eviction.
    pub fn store(&mut self, addr: i64, bytes: &[u8]) -> CacheAccess {
        let index = self.index(addr);
        let hit = self.blocks[index].covers(addr, bytes.len());
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.fill(index, addr);
        }
        let block = &mut self.blocks[index];
        let offset = (addr - block.base) as usize;
        let end = (offset + bytes.len()).min(block.data.len());
        block.data[offset..end].copy_from_slice(&bytes[..end - offset]);
        block.dirty = true;
        CacheAccess {
            hit,
            latency: self.latency(hit),
            data: Vec::new(),
        }
    }
    pub fn reset(&mut self) {
        self.blocks = vec![CacheBlock::new(self.geometry.block_size); self.geometry.num_blocks()];
        self.hits = 0;
        self.misses = 0;
    }
    pub fn reset_memory(&mut self) {
        self.memory.reset();
    }
    pub fn initialize_memory(&mut self, addr: i64, value: f64, size: usize) {
        self.memory.write(addr, &encode_value(value, size));
    }
    pub fn read_memory(&self, addr: i64, len: usize) -> Vec<u8> {
        self.memory.read(addr, len)
    }
    pub fn blocks(&self) -> &[CacheBlock] {
        &self.blocks
    }
    pub fn hits(&self) -> usize {
        self.hits
    }
    pub fn misses(&self) -> usize {
        self.misses
    }
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
    pub fn get_view(&self, only_valid: bool) -> CacheView<'_> {
        CacheView {
            cache: self,
            only_valid,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheGeometry::default())
    }
}

pub struct CacheView<'a> {
    cache: &'a Cache,
    only_valid: bool,
}

impl fmt::Display for CacheView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.cache;
        let g = c.geometry;
        writeln!(
            f,
            "Cache ({} bytes, {} byte blocks, hit {} / miss {}) {{",
            g.size, g.block_size, g.hit_latency, g.miss_penalty
        )?;
        for (i, b) in c.blocks.iter().enumerate() {
            if self.only_valid && !b.valid {
                continue;
            }
            let data: Vec<_> = b.data.iter().map(|x| format!("{x:02x}")).collect();
            writeln!(
                f,
                "  {i:>4}: {} {} base {} tag {:>4} [{}]",
                if b.valid { "V" } else { "-" },
                if b.dirty { "D" } else { "-" },
                b.base(),
                b.tag,
                data.join(" ")
            )?;
        }
        writeln!(
            f,
            "  hits: {}, misses: {}, hit rate: {:.2}%",
            c.hits,
            c.misses,
            c.hit_rate() * 100.0
        )?;
        write!(f, "}}")
    }
}

#[cfg(feature = "stat")]
impl AddStats for Cache {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(stat::CacheStat {
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
            dirty: self.blocks.iter().filter(|b| b.valid && b.dirty).count(),
        }));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    pub struct CacheStat {
        pub hits: usize,
        pub misses: usize,
        pub hit_rate: f64,
        pub dirty: usize,
    }

    impl Stat for CacheStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ CacheStat {
        fn header(&self) -> &'static str {
            "cache"
        }
        fn width(&self) -> usize {
            28
        }
    }

    impl fmt::Display for &'_ CacheStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "  hits: {:>18}", self.hits)?;
            writeln!(f, "  misses: {:>16}", self.misses)?;
            let rate = format!("{:.2} %", self.hit_rate * 100.0);
            writeln!(f, "  hit rate: {rate:>14}")?;
            write!(f, "  dirty blocks: {:>10}", self.dirty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decode_value;

    #[test]
    fn test_miss_then_hit() {
        let mut c = Cache::default();
        c.initialize_memory(16, 42.0, 8);
        let a = c.load(16, 8);
        assert!(!a.hit);
        assert_eq!(a.latency, DEFAULT_MISS_PENALTY);
        assert_eq!(decode_value(&a.data), 42.0);
        let a = c.load(16, 4);
        assert!(a.hit);
        assert_eq!(a.latency, DEFAULT_HIT_LATENCY);
        assert_eq!((c.hits(), c.misses()), (1, 1));
    }

    #[test]
    fn test_floating_base() {
        let mut c = Cache::default();
        // filled from 4, so the block covers [4, 12)
        c.load(4, 4);
        assert!(c.probe_store(8, 4).hit);
        assert!(!c.probe_store(0, 4).hit);
        assert_eq!(c.blocks()[0].base(), Addr::new(4));
    }

    #[test]
    fn test_probe_does_not_mutate() {
        let c = Cache::default();
        let a = c.probe_store(0, 8);
        assert!(!a.hit);
        assert_eq!((c.hits(), c.misses()), (0, 0));
        assert!(!c.blocks()[0].is_valid());
    }

    #[test]
    fn test_write_back_on_eviction() {
        let mut c = Cache::default();
        c.store(0, &encode_value(7.0, 8));
        // write-back: memory not updated yet
        assert_eq!(decode_value(&c.read_memory(0, 8)), 0.0);
        // 1024 maps to the same index and evicts the dirty block
        c.load(1024, 8);
        assert_eq!(decode_value(&c.read_memory(0, 8)), 7.0);
        let a = c.load(0, 8);
        assert!(!a.hit);
        assert_eq!(decode_value(&a.data), 7.0);
    }

    #[test]
    fn test_reset_keeps_memory() {
        let mut c = Cache::default();
        c.initialize_memory(32, 5.0, 4);
        c.load(32, 4);
        c.reset();
        assert_eq!((c.hits(), c.misses()), (0, 0));
        assert!(c.blocks().iter().all(|b| !b.is_valid()));
        assert_eq!(decode_value(&c.read_memory(32, 4)), 5.0);
        c.reset_memory();
        assert_eq!(decode_value(&c.read_memory(32, 4)), 0.0);
    }

    #[test]
    fn test_access_at_top_of_address_space() {
        let mut c = Cache::default();
        let a = c.load(i64::MAX, 8);
        assert!(!a.hit);
        assert_eq!(a.data, vec![0; 8]);
        c.store(i64::MAX - 4, &encode_value(3.0, 8));
        assert!(c.load(i64::MAX - 4, 8).hit);
    }

    #[test]
    fn test_negative_address_index() {
        let c = Cache::default();
        assert_eq!(c.index(-8), 127);
    }
}
