use std::fmt::Display;

pub const MEMORY_BYTE_SIZE: usize = 65536usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(i64);

impl Addr {
    pub fn new(v: i64) -> Self {
        Self(v)
    }
    pub fn inner(self) -> i64 {
        self.0
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-{:#06x}", self.0.unsigned_abs())
        } else {
            write!(f, "{:#06x}", self.0)
        }
    }
}

/// flat byte-addressable backing store.
/// accesses outside of it read zeros and drop writes.
pub struct Memory {
    inner: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            inner: vec![0; MEMORY_BYTE_SIZE],
        }
    }
    fn index(&self, addr: i64) -> Option<usize> {
        usize::try_from(addr).ok().filter(|&a| a < self.inner.len())
    }
    pub fn read(&self, addr: i64, len: usize) -> Vec<u8> {
        (0..len as i64)
            .map(|i| {
                addr.checked_add(i)
                    .and_then(|a| self.index(a))
                    .map(|a| self.inner[a])
                    .unwrap_or(0)
            })
            .collect()
    }
    pub fn write(&mut self, addr: i64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            if let Some(a) = addr.checked_add(i as i64).and_then(|a| self.index(a)) {
                self.inner[a] = *b;
            }
        }
    }
    pub fn len(&self) -> usize {
        self.inner.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
    pub fn reset(&mut self) {
        self.inner.fill(0);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// truncates `value` to an integer and keeps its lowest `size` bytes,
/// little-endian.
pub fn encode_value(value: f64, size: usize) -> Vec<u8> {
    let bytes = (value as i64).to_le_bytes();
    bytes[..size.min(8)].to_vec()
}

/// reads up to 8 little-endian bytes as an integer. shorter sequences are
/// zero-extended.
pub fn decode_value(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    i64::from_le_bytes(buf) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory() {
        let mut m = Memory::new();
        m.write(8, &[1, 2, 3]);
        assert_eq!(m.read(7, 5), vec![0, 1, 2, 3, 0]);
        m.write(MEMORY_BYTE_SIZE as i64 - 1, &[9, 9]);
        assert_eq!(m.read(MEMORY_BYTE_SIZE as i64 - 1, 2), vec![9, 0]);
        assert_eq!(m.read(-2, 3), vec![0, 0, 0]);
        m.write(i64::MAX - 1, &[1, 2, 3]);
        assert_eq!(m.read(i64::MAX - 1, 4), vec![0, 0, 0, 0]);
        m.reset();
        assert_eq!(m.read(8, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(encode_value(100.0, 8), vec![0x64, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_value(258.9, 4), vec![2, 1, 0, 0]);
        assert_eq!(decode_value(&[0x64, 0, 0, 0, 0, 0, 0, 0]), 100.0);
        // narrow accesses come back unsigned
        assert_eq!(decode_value(&encode_value(-1.0, 4)), 4294967295.0);
        assert_eq!(decode_value(&encode_value(-1.0, 8)), -1.0);
    }

    #[test]
    fn test_addr_display() {
        assert_eq!(Addr::new(16).to_string(), "0x0010");
        assert_eq!(Addr::new(-4).to_string(), "-0x0004");
    }
}
