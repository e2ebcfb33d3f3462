//! MurmurHash64A implementation
//!
//! 指纹和计划哈希都必须跨进程重启保持一致，因此不能使用标准库的
//! `DefaultHasher`（其算法不保证跨版本稳定）。这里实现的是 64 位的
//! MurmurHash64A，输入按小端字节序处理，与平台无关。

use std::hash::Hasher;

const M: u64 = 0xc6a4_a793_5bd1_e995;
const R: u32 = 47;

/// 指纹使用的默认种子
pub const DEFAULT_SEED: u64 = 0x5350_4c41_4e00_0001;

/// Compute MurmurHash64A for byte data with a given seed
pub fn murmurhash64a(data: &[u8], seed: u64) -> u64 {
    let mut h: u64 = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    // Handle remaining bytes
    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate().rev() {
            h ^= (*byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^ (h >> R)
}

/// Compute MurmurHash64A for string data with a given seed
pub fn murmurhash64a_str(s: &str, seed: u64) -> u64 {
    murmurhash64a(s.as_bytes(), seed)
}

/// A Hasher implementation that buffers its input and hashes it with MurmurHash64A
///
/// 所有整数都以小端字节序写入缓冲区，`write_usize` 固定按 64 位写入，
/// 保证 32/64 位平台得到相同结果。
#[derive(Debug)]
pub struct MurmurHasher {
    seed: u64,
    buffer: Vec<u8>,
}

impl MurmurHasher {
    /// Create a new MurmurHasher with the default seed
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create a new MurmurHasher with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        MurmurHasher {
            seed,
            buffer: Vec::new(),
        }
    }

    /// 已写入的字节数
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for MurmurHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for MurmurHasher {
    fn finish(&self) -> u64 {
        murmurhash64a(&self.buffer, self.seed)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn write_u8(&mut self, i: u8) {
        self.buffer.push(i);
    }

    fn write_u16(&mut self, i: u16) {
        self.buffer.extend_from_slice(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.buffer.extend_from_slice(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.buffer.extend_from_slice(&i.to_le_bytes());
    }

    fn write_i64(&mut self, i: i64) {
        self.buffer.extend_from_slice(&i.to_le_bytes());
    }

    fn write_usize(&mut self, i: usize) {
        self.buffer.extend_from_slice(&(i as u64).to_le_bytes());
    }
}
