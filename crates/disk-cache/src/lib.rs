//! On-disk TTL'd blob cache for candles and ticker info.
//!
//! Entries are stored one file per key in a binary envelope:
//! `magic(4)="CHE1" | ver(u8)=1 | stored_at(i64 unix-ms, LE) | payload_len(u32, LE) | payload`.
//! Writes go to a temp file and are renamed into place, so a crashed writer
//! never leaves a half-file. Corrupt or unreadable entries are removed and
//! reported as a MISS.

use chrono::Utc;
use screener_core::{CandleInterval, ScreenError, ScreenResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAGIC: &[u8; 4] = b"CHE1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 4;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Info,
    Candles,
}

/// Cache key: ticker + kind, with an interval for candle entries.
#[derive(Debug, Clone)]
pub struct CacheKey {
    pub ticker: String,
    pub kind: CacheKind,
    pub interval: Option<CandleInterval>,
}

impl CacheKey {
    pub fn info(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            kind: CacheKind::Info,
            interval: None,
        }
    }

    pub fn candles(ticker: &str, interval: CandleInterval) -> Self {
        Self {
            ticker: ticker.to_string(),
            kind: CacheKind::Candles,
            interval: Some(interval),
        }
    }

    /// Filesystem-safe file name. `.` in tickers becomes `_`.
    fn file_name(&self) -> String {
        let safe = self.ticker.replace('.', "_");
        match self.kind {
            CacheKind::Info => format!("{}_info.bin", safe),
            CacheKind::Candles => format!(
                "{}_candles_{}.bin",
                safe,
                self.interval.unwrap_or(CandleInterval::Daily).as_str()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub dir: PathBuf,
}

/// The only writer of the cache directory. Safe under concurrent use from
/// multiple workers: writes are atomic renames, readers tolerate MISS, and
/// two writers racing on one key leave one of the two values.
pub struct DiskCache {
    dir: PathBuf,
    ttl_info: Duration,
    ttl_candles: Duration,
}

impl DiskCache {
    pub fn new(dir: &Path, ttl_info_min: u64, ttl_candles_min: u64) -> ScreenResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            ttl_info: Duration::from_secs(ttl_info_min * 60),
            ttl_candles: Duration::from_secs(ttl_candles_min * 60),
        })
    }

    fn ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Info => self.ttl_info,
            CacheKind::Candles => self.ttl_candles,
        }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Fresh payload for the key, or `None` on absence, staleness or
    /// corruption. Freshness is evaluated against the wall-clock at read
    /// time.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        let bytes = std::fs::read(&path).ok()?;

        let (stored_at_ms, payload) = match decode(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("removing corrupt cache entry {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis().saturating_sub(stored_at_ms);
        if age_ms < 0 || age_ms as u128 >= self.ttl(key.kind).as_millis() {
            return None;
        }

        Some(payload)
    }

    /// Atomic write: temp file in the cache dir, then rename over the key.
    pub fn put(&self, key: &CacheKey, payload: &[u8]) -> ScreenResult<()> {
        let envelope = encode(Utc::now().timestamp_millis(), payload);
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".{}.tmp-{}-{}",
            key.file_name(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));
        std::fs::write(&tmp, &envelope)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove every entry older than the given age. Returns the count of
    /// removed files.
    pub fn clear(&self, older_than: Duration) -> ScreenResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stale = match std::fs::read(&path).ok().as_deref().map(decode) {
                Some(Ok((stored_at_ms, _))) => {
                    now_ms.saturating_sub(stored_at_ms) as u128 >= older_than.as_millis()
                }
                // Unreadable or corrupt: evict.
                _ => true,
            };
            if stale {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> ScreenResult<CacheStats> {
        let mut file_count = 0usize;
        let mut total_bytes = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                file_count += 1;
                total_bytes += entry.metadata()?.len();
            }
        }
        Ok(CacheStats {
            file_count,
            total_bytes,
            dir: self.dir.clone(),
        })
    }
}

/// Build the binary envelope around a payload.
pub fn encode(stored_at_ms: i64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&stored_at_ms.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parse an envelope, verifying magic, version and payload length.
pub fn decode(bytes: &[u8]) -> ScreenResult<(i64, Vec<u8>)> {
    if bytes.len() < HEADER_LEN {
        return Err(ScreenError::CacheCorrupt("truncated header".to_string()));
    }
    if &bytes[..4] != MAGIC {
        return Err(ScreenError::CacheCorrupt("bad magic".to_string()));
    }
    if bytes[4] != VERSION {
        return Err(ScreenError::CacheCorrupt(format!(
            "unsupported version {}",
            bytes[4]
        )));
    }
    let stored_at_ms = i64::from_le_bytes(bytes[5..13].try_into().unwrap());
    let payload_len = u32::from_le_bytes(bytes[13..17].try_into().unwrap()) as usize;
    if bytes.len() != HEADER_LEN + payload_len {
        return Err(ScreenError::CacheCorrupt(format!(
            "payload length mismatch: header says {}, file has {}",
            payload_len,
            bytes.len() - HEADER_LEN
        )));
    }
    Ok((stored_at_ms, bytes[HEADER_LEN..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &Path) -> DiskCache {
        DiskCache::new(dir, 30, 30).unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::candles("CBA.AX", CandleInterval::Daily);

        cache.put(&key, b"hello candles").unwrap();
        assert_eq!(cache.get(&key).unwrap(), b"hello candles");
    }

    #[test]
    fn miss_on_absent_key() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        assert!(cache.get(&CacheKey::info("AAPL")).is_none());
    }

    #[test]
    fn dotted_tickers_map_to_safe_file_names() {
        let key = CacheKey::candles("CBA.AX", CandleInterval::Daily);
        assert_eq!(key.file_name(), "CBA_AX_candles_1d.bin");
        let key = CacheKey::info("BRK.B");
        assert_eq!(key.file_name(), "BRK_B_info.bin");
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");

        // An envelope stamped 31 minutes in the past, against a 30-min TTL.
        let old = Utc::now().timestamp_millis() - 31 * 60 * 1000;
        std::fs::write(tmp.path().join(key.file_name()), encode(old, b"old")).unwrap();

        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn fresh_entry_survives_within_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");

        let recent = Utc::now().timestamp_millis() - 60 * 1000;
        std::fs::write(tmp.path().join(key.file_name()), encode(recent, b"fresh")).unwrap();

        assert_eq!(cache.get(&key).unwrap(), b"fresh");
    }

    #[test]
    fn corrupt_magic_is_miss_and_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");
        let path = tmp.path().join(key.file_name());

        std::fs::write(&path, b"NOPE-not-an-envelope").unwrap();
        assert!(cache.get(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn truncated_payload_is_miss_and_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");
        let path = tmp.path().join(key.file_name());

        let mut envelope = encode(Utc::now().timestamp_millis(), b"full payload");
        envelope.truncate(envelope.len() - 3);
        std::fs::write(&path, envelope).unwrap();

        assert!(cache.get(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn version_mismatch_is_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");
        let path = tmp.path().join(key.file_name());

        let mut envelope = encode(Utc::now().timestamp_millis(), b"payload");
        envelope[4] = 9;
        std::fs::write(&path, envelope).unwrap();

        assert!(cache.get(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn last_writer_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());
        let key = CacheKey::info("AAPL");

        cache.put(&key, b"first").unwrap();
        cache.put(&key, b"second").unwrap();
        assert_eq!(cache.get(&key).unwrap(), b"second");
    }

    #[test]
    fn clear_removes_old_entries_only() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());

        let old = Utc::now().timestamp_millis() - 3 * 24 * 3600 * 1000;
        std::fs::write(tmp.path().join("OLD_info.bin"), encode(old, b"x")).unwrap();
        cache.put(&CacheKey::info("NEW"), b"y").unwrap();

        let removed = cache.clear(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get(&CacheKey::info("NEW")).is_some());
    }

    #[test]
    fn stats_counts_files_and_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path());

        cache.put(&CacheKey::info("A"), b"aa").unwrap();
        cache.put(&CacheKey::info("B"), b"bbbb").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, (HEADER_LEN * 2 + 2 + 4) as u64);
    }

    #[test]
    fn envelope_round_trip() {
        let envelope = encode(1234567890123, b"payload bytes");
        let (ts, payload) = decode(&envelope).unwrap();
        assert_eq!(ts, 1234567890123);
        assert_eq!(payload, b"payload bytes");
    }
}
