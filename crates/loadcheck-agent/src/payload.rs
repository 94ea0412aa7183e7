use loadcheck_store::{PayloadError, PayloadSink, PayloadSource};
use rand::Rng;

const CHUNK: usize = 16 * 1024;
const FILL: u8 = b'a';

/// A synthesized payload of a fixed size, hashed as it streams out.
///
/// With `fail_at` set, the source raises a `PayloadError` once production
/// reaches that offset, simulating a client-side read failure mid-transfer.
pub struct GeneratedPayload {
    total: u64,
    produced: u64,
    fail_at: Option<u64>,
    hasher: blake3::Hasher,
    buf: Vec<u8>,
}

impl GeneratedPayload {
    pub fn new(total: u64) -> Self {
        GeneratedPayload {
            total,
            produced: 0,
            fail_at: None,
            hasher: blake3::Hasher::new(),
            buf: vec![FILL; CHUNK],
        }
    }

    /// Inject a failure at the given byte offset.
    pub fn failing_at(total: u64, offset: u64) -> Self {
        let mut payload = Self::new(total);
        payload.fail_at = Some(offset);
        payload
    }

    /// Digest of the bytes produced so far. Equals the whole payload's
    /// digest once the source is drained.
    pub fn digest(&self) -> blake3::Hash {
        self.hasher.finalize()
    }
}

impl PayloadSource for GeneratedPayload {
    fn total_size(&self) -> u64 {
        self.total
    }

    fn next_chunk(&mut self) -> Result<Option<&[u8]>, PayloadError> {
        if let Some(fail_at) = self.fail_at {
            if self.produced >= fail_at {
                return Err(PayloadError::new(format!(
                    "injected read failure at offset {fail_at}"
                )));
            }
        }
        if self.produced >= self.total {
            return Ok(None);
        }
        let n = (self.total - self.produced).min(CHUNK as u64) as usize;
        self.produced += n as u64;
        self.hasher.update(&self.buf[..n]);
        Ok(Some(&self.buf[..n]))
    }
}

/// A retrieval sink that hashes and counts what it receives instead of
/// keeping it.
#[derive(Default)]
pub struct DigestSink {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl DigestSink {
    pub fn new() -> Self {
        DigestSink::default()
    }

    pub fn digest(&self) -> blake3::Hash {
        self.hasher.finalize()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl PayloadSink for DigestSink {
    fn write(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }
}

/// Roll fault injection for one transfer attempt: with probability
/// `percent`/100 the transfer fails at a uniformly chosen offset within the
/// payload. Each attempt rolls independently.
pub fn fault_offset<R: Rng>(rng: &mut R, percent: u8, size: u64) -> Option<u64> {
    if percent == 0 || size == 0 {
        return None;
    }
    if rng.gen_range(0u8..100) < percent {
        Some(rng.gen_range(0..size))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn drain(source: &mut GeneratedPayload) -> Result<Vec<u8>, PayloadError> {
        let mut out = Vec::new();
        while let Some(chunk) = source.next_chunk()? {
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    #[test]
    fn test_payload_produces_exact_size_and_fill() {
        let mut source = GeneratedPayload::new(CHUNK as u64 * 2 + 17);
        let data = drain(&mut source).unwrap();
        assert_eq!(data.len(), CHUNK * 2 + 17);
        assert!(data.iter().all(|b| *b == FILL));
        assert_eq!(source.digest(), blake3::hash(&data));
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let mut source = GeneratedPayload::new(0);
        assert!(drain(&mut source).unwrap().is_empty());
    }

    #[test]
    fn test_injected_failure_fires_once_offset_reached() {
        let mut source = GeneratedPayload::failing_at(CHUNK as u64 * 3, CHUNK as u64 + 1);
        // First chunk is below the failure offset.
        assert!(source.next_chunk().is_ok());
        assert!(source.next_chunk().is_err());
    }

    #[test]
    fn test_failure_at_zero_fails_immediately() {
        let mut source = GeneratedPayload::failing_at(100, 0);
        assert!(source.next_chunk().is_err());
    }

    #[test]
    fn test_digest_sink_matches_source() {
        let mut source = GeneratedPayload::new(1000);
        let mut sink = DigestSink::new();
        while let Some(chunk) = source.next_chunk().unwrap() {
            // Sink sees the same byte stream the store would.
            let copied = chunk.to_vec();
            sink.write(&copied);
        }
        assert_eq!(sink.bytes_written(), 1000);
        assert_eq!(sink.digest(), source.digest());
    }

    #[test]
    fn test_fault_offset_edges() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(fault_offset(&mut rng, 0, 1000), None);
            let offset = fault_offset(&mut rng, 100, 1000);
            assert!(matches!(offset, Some(o) if o < 1000));
        }
        assert_eq!(fault_offset(&mut rng, 100, 0), None);
    }
}
