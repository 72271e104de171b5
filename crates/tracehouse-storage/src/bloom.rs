//! Sharded Bloom Filter over Trace Ids
//!
//! Each block carries a bloom filter so the query path can skip blocks that
//! definitely do not contain a trace id without fetching block data.
//!
//! ## Why Sharded?
//!
//! Readers page bloom filters independently of block data. Splitting the
//! filter into shards of roughly `bloom_shard_size_bytes` keeps each fetch
//! small; a lookup touches exactly one shard, selected by a CRC32 of the
//! trace id. Shard routing is part of the on-disk contract: the same trace
//! id must land in the same shard at write and read time.
//!
//! ## False Positives
//!
//! - `might_contain(id) == false`: the trace is definitely not in the block
//! - `might_contain(id) == true`: the trace might be in the block, at the
//!   configured false positive rate (default 1%)

use bloomfilter::Bloom;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Hard cap on shard count, regardless of configuration.
const MAX_SHARDS: usize = 128;

const BLOOM_FORMAT_VERSION: u8 = 1;

/// Bloom filter split into fixed shards routed by trace id.
pub struct ShardedBloomFilter {
    shards: Vec<Bloom<[u8]>>,
    item_count: u64,
}

impl ShardedBloomFilter {
    /// Create a filter sized for `expected_items` at false positive rate
    /// `fp`, with enough shards that each stays near `shard_size_bytes`.
    pub fn new(expected_items: usize, fp: f64, shard_size_bytes: usize) -> Self {
        let shard_count = shard_count_for(expected_items, fp, shard_size_bytes);
        let per_shard = (expected_items / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| Bloom::new_for_fp_rate(per_shard, fp))
            .collect();
        Self {
            shards,
            item_count: 0,
        }
    }

    fn shard_for(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize % self.shards.len()
    }

    pub fn add(&mut self, key: &[u8]) {
        let shard = self.shard_for(key);
        self.shards[shard].set(key);
        self.item_count += 1;
    }

    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.shards[self.shard_for(key)].check(key)
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Serialize for storage.
    ///
    /// Format: `[version u8][shard_count u32][item_count u64]` then per
    /// shard `[num_bits u64][num_hashes u32][sip_keys 4x u64][bitmap_len
    /// u32][bitmap]`, all little-endian.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(BLOOM_FORMAT_VERSION);
        buf.put_u32_le(self.shards.len() as u32);
        buf.put_u64_le(self.item_count);

        for shard in &self.shards {
            let bitmap = shard.bitmap();
            let sip_keys = shard.sip_keys();
            buf.put_u64_le(shard.number_of_bits());
            buf.put_u32_le(shard.number_of_hash_functions());
            for (k0, k1) in sip_keys {
                buf.put_u64_le(k0);
                buf.put_u64_le(k1);
            }
            buf.put_u32_le(bitmap.len() as u32);
            buf.put_slice(&bitmap);
        }
        buf.freeze()
    }

    /// Reconstruct a filter serialized by [`Self::to_bytes`].
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(raw);

        let version = reader.read_u8()?;
        if version != BLOOM_FORMAT_VERSION {
            return Err(Error::Bloom(format!("unsupported version {version}")));
        }
        let shard_count = reader.read_u32_le()? as usize;
        if shard_count == 0 || shard_count > MAX_SHARDS {
            return Err(Error::Bloom(format!("invalid shard count {shard_count}")));
        }
        let item_count = reader.read_u64_le()?;

        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let num_bits = reader.read_u64_le()?;
            let num_hashes = reader.read_u32_le()?;
            let sip_keys = [
                (reader.read_u64_le()?, reader.read_u64_le()?),
                (reader.read_u64_le()?, reader.read_u64_le()?),
            ];
            let bitmap_len = reader.read_u32_le()? as usize;
            let bitmap = reader.read_slice(bitmap_len)?;
            shards.push(Bloom::from_existing(bitmap, num_bits, num_hashes, sip_keys));
        }

        Ok(Self { shards, item_count })
    }
}

fn shard_count_for(expected_items: usize, fp: f64, shard_size_bytes: usize) -> usize {
    // Optimal bits per item for the target false positive rate:
    // m/n = -ln(fp) / ln(2)^2
    let bits_per_item = -(fp.ln()) / (2f64.ln() * 2f64.ln());
    let total_bytes = (expected_items as f64 * bits_per_item / 8.0).ceil() as usize;
    total_bytes
        .div_ceil(shard_size_bytes.max(1))
        .clamp(1, MAX_SHARDS)
}

struct Reader<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { raw, pos: 0 }
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.raw.len() - self.pos < len {
            return Err(Error::Bloom("truncated bloom data".to_string()));
        }
        let out = &self.raw[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.read_slice(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.read_slice(8)?);
        Ok(u64::from_le_bytes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_check() {
        let mut bloom = ShardedBloomFilter::new(1000, 0.01, 100_000);
        bloom.add(b"trace-1");
        bloom.add(b"trace-2");

        assert!(bloom.might_contain(b"trace-1"));
        assert!(bloom.might_contain(b"trace-2"));
        assert_eq!(bloom.item_count(), 2);
    }

    #[test]
    fn test_absent_key_usually_misses() {
        let mut bloom = ShardedBloomFilter::new(1000, 0.01, 100_000);
        for i in 0..100 {
            bloom.add(format!("trace-{i}").as_bytes());
        }

        let false_positives = (0..1000)
            .filter(|i| bloom.might_contain(format!("absent-{i}").as_bytes()))
            .count();
        // 1% target rate; allow generous slack
        assert!(false_positives < 100, "too many false positives: {false_positives}");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut bloom = ShardedBloomFilter::new(500, 0.01, 4096);
        for i in 0..200 {
            bloom.add(format!("trace-{i}").as_bytes());
        }

        let raw = bloom.to_bytes();
        let restored = ShardedBloomFilter::from_bytes(&raw).expect("from_bytes");

        assert_eq!(restored.shard_count(), bloom.shard_count());
        assert_eq!(restored.item_count(), 200);
        for i in 0..200 {
            assert!(restored.might_contain(format!("trace-{i}").as_bytes()));
        }
    }

    #[test]
    fn test_small_shard_size_creates_multiple_shards() {
        let bloom = ShardedBloomFilter::new(100_000, 0.01, 1024);
        assert!(bloom.shard_count() > 1);
    }

    #[test]
    fn test_shard_count_is_bounded() {
        let bloom = ShardedBloomFilter::new(100_000_000, 0.001, 16);
        assert_eq!(bloom.shard_count() as usize, MAX_SHARDS);
    }

    #[test]
    fn test_zero_expected_items_still_valid() {
        let mut bloom = ShardedBloomFilter::new(0, 0.01, 100_000);
        bloom.add(b"x");
        assert!(bloom.might_contain(b"x"));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(ShardedBloomFilter::from_bytes(&[]).is_err());
        assert!(ShardedBloomFilter::from_bytes(&[9, 0, 0, 0, 0]).is_err());
    }
}
