// =============================================================================
// Event Tailer — follows the rotating unified JSONL file
// =============================================================================
//
// Selects the most recently modified file matching `unified_pattern` under
// `data_dir`, seeks back `backfill_mb` from end-of-file for context, then
// reads forward in chunks, splitting on newlines. Malformed lines are
// logged and skipped. When the file shrinks or a newer file appears the
// tailer reopens and resumes from offset 0 of the new file. End-of-file
// yields a short sleep, never an error to the caller.
// =============================================================================

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::events::FeedEvent;

const READ_CHUNK_BYTES: usize = 64 * 1024;
const EOF_SLEEP_MS: u64 = 100;
/// How often to re-glob for a rotated (newer) file while idle at EOF.
const ROTATION_CHECK_EVERY: u32 = 20;

// =============================================================================
// Stats
// =============================================================================

/// Lock-free counters exposed for the periodic tailer metric.
#[derive(Debug, Default)]
pub struct TailerStats {
    pub events_total: AtomicU64,
    pub malformed_total: AtomicU64,
    pub unknown_type_total: AtomicU64,
    pub current_offset: AtomicU64,
    /// Timestamp (epoch seconds) of the last parsed line, as a bit-cast f64.
    last_event_ts_bits: AtomicU64,
}

impl TailerStats {
    pub fn record_event(&self, ts: Option<f64>) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ts) = ts {
            self.last_event_ts_bits.store(ts.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn last_event_ts(&self) -> Option<f64> {
        let bits = self.last_event_ts_bits.load(Ordering::Relaxed);
        if bits == 0 {
            None
        } else {
            Some(f64::from_bits(bits))
        }
    }
}

// =============================================================================
// Tailer
// =============================================================================

pub struct EventTailer {
    data_dir: PathBuf,
    pattern: String,
    backfill_bytes: u64,
    pub stats: Arc<TailerStats>,

    file: Option<File>,
    current_path: Option<PathBuf>,
    offset: u64,
    buf: Vec<u8>,
    pending: std::collections::VecDeque<FeedEvent>,
    eof_polls: u32,
}

impl EventTailer {
    pub fn new(data_dir: impl Into<PathBuf>, pattern: impl Into<String>, backfill_mb: u64) -> Self {
        Self {
            data_dir: data_dir.into(),
            pattern: pattern.into(),
            backfill_bytes: backfill_mb * 1024 * 1024,
            stats: Arc::new(TailerStats::default()),
            file: None,
            current_path: None,
            offset: 0,
            buf: Vec::new(),
            pending: std::collections::VecDeque::new(),
            eof_polls: 0,
        }
    }

    /// Most recently modified file matching the pattern, if any.
    pub fn select_latest(dir: &Path, pattern: &str) -> Option<PathBuf> {
        let full = dir.join(pattern);
        let full = full.to_str()?;

        let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in glob::glob(full).ok()? {
            let path = match entry {
                Ok(p) => p,
                Err(_) => continue,
            };
            let modified = match path.metadata().and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            match &best {
                Some((t, _)) if *t >= modified => {}
                _ => best = Some((modified, path)),
            }
        }
        best.map(|(_, p)| p)
    }

    /// Next parsed event. Waits across EOF and rotation; only returns an
    /// error for unrecoverable I/O (the data directory disappearing or a
    /// read failing on an open handle), which the caller maps to exit
    /// code 2.
    pub async fn next_event(&mut self) -> Result<FeedEvent> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(ev);
            }

            if self.file.is_none() {
                self.open_latest().await?;
            }

            let n = self.read_chunk().await?;
            if n == 0 {
                self.eof_polls += 1;
                if self.eof_polls % ROTATION_CHECK_EVERY == 0 {
                    self.check_rotation().await?;
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(EOF_SLEEP_MS)).await;
            } else {
                self.eof_polls = 0;
                self.drain_lines();
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn open_latest(&mut self) -> Result<()> {
        loop {
            if !self.data_dir.is_dir() {
                anyhow::bail!("data directory {} does not exist", self.data_dir.display());
            }
            match Self::select_latest(&self.data_dir, &self.pattern) {
                Some(path) => {
                    let mut file = File::open(&path)
                        .await
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    let len = file
                        .metadata()
                        .await
                        .with_context(|| format!("failed to stat {}", path.display()))?
                        .len();

                    // Backfill: seek back a bounded distance, then skip the
                    // (likely partial) first line.
                    let start = len.saturating_sub(self.backfill_bytes);
                    file.seek(SeekFrom::Start(start))
                        .await
                        .context("failed to seek for backfill")?;
                    self.offset = start;
                    self.buf.clear();
                    if start > 0 {
                        self.skip_partial_first_line(&mut file).await?;
                    }

                    info!(
                        path = %path.display(),
                        start_offset = self.offset,
                        file_len = len,
                        "tailing unified event file"
                    );

                    self.file = Some(file);
                    self.current_path = Some(path);
                    self.stats.current_offset.store(self.offset, Ordering::Relaxed);
                    return Ok(());
                }
                None => {
                    debug!(
                        dir = %self.data_dir.display(),
                        pattern = %self.pattern,
                        "no unified file yet — waiting"
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn skip_partial_first_line(&mut self, file: &mut File) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            let n = file.read(&mut byte).await.context("read during backfill skip")?;
            if n == 0 {
                return Ok(());
            }
            self.offset += 1;
            if byte[0] == b'\n' {
                return Ok(());
            }
        }
    }

    async fn read_chunk(&mut self) -> Result<usize> {
        let file = self.file.as_mut().context("tailer has no open file")?;
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let n = file.read(&mut chunk).await.context("event file read failed")?;
        if n > 0 {
            self.buf.extend_from_slice(&chunk[..n]);
            self.offset += n as u64;
            self.stats.current_offset.store(self.offset, Ordering::Relaxed);
        }
        Ok(n)
    }

    /// Split the buffer on newlines, parse each complete line, keep the
    /// trailing partial line buffered.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match FeedEvent::parse_line(line) {
                Ok(FeedEvent::Other) => {
                    self.stats.unknown_type_total.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ev) => {
                    self.stats.record_event(ev.epoch_secs());
                    self.pending.push_back(ev);
                }
                Err(e) => {
                    self.stats.malformed_total.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, line_len = line.len(), "skipping malformed event line");
                }
            }
        }
    }

    /// Detect rotation: the tracked file shrank, or a newer file matches the
    /// pattern. Either way, reopen from offset 0 of the newest file.
    async fn check_rotation(&mut self) -> Result<()> {
        let (Some(path), Some(file)) = (&self.current_path, &self.file) else {
            return Ok(());
        };

        let shrunk = match file.metadata().await {
            Ok(m) => m.len() < self.offset,
            // The open handle keeps a deleted file alive; a stat failure on
            // the path means it was replaced.
            Err(_) => true,
        };

        let newer = Self::select_latest(&self.data_dir, &self.pattern)
            .map(|latest| &latest != path)
            .unwrap_or(false);

        if shrunk || newer {
            info!(
                path = %path.display(),
                shrunk,
                newer,
                "event file rotated — reopening"
            );
            self.file = None;
            self.current_path = None;
            self.buf.clear();
            // Resume from the start of the new file, no backfill seek.
            let saved = self.backfill_bytes;
            self.backfill_bytes = u64::MAX;
            let result = self.open_latest().await;
            self.backfill_bytes = saved;
            result?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        f.flush().unwrap();
    }

    fn quote_line(ts: u64, bid: f64) -> String {
        format!(
            r#"{{"type":"quote","t":{ts},"sym":"ESU25_FUT_CME","chart":3,"bid":{bid},"ask":{}}}"#,
            bid + 0.25
        )
    }

    #[test]
    fn select_latest_prefers_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("mia_unified_20250907.jsonl");
        let new = dir.path().join("mia_unified_20250908.jsonl");
        std::fs::write(&old, "x\n").unwrap();
        std::fs::write(&new, "y\n").unwrap();
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let f = std::fs::File::options().write(true).open(&old).unwrap();
        f.set_modified(past).unwrap();

        let picked = EventTailer::select_latest(dir.path(), "mia_unified_*.jsonl").unwrap();
        assert_eq!(picked, new);
    }

    #[test]
    fn select_latest_ignores_non_matching() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.jsonl"), "x\n").unwrap();
        assert!(EventTailer::select_latest(dir.path(), "mia_unified_*.jsonl").is_none());
    }

    #[tokio::test]
    async fn tails_existing_lines_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mia_unified_20250908.jsonl");
        write_lines(&path, &[&quote_line(1_757_350_800, 6500.0)]);

        let mut tailer = EventTailer::new(dir.path(), "mia_unified_*.jsonl", 20);
        let ev = tailer.next_event().await.unwrap();
        assert_eq!(ev.symbol(), Some("ESU25_FUT_CME"));

        // Append while tailing.
        write_lines(&path, &[&quote_line(1_757_350_801, 6500.25)]);
        let ev2 = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            tailer.next_event(),
        )
        .await
        .expect("appended line should arrive")
        .unwrap();
        match ev2 {
            FeedEvent::Quote(q) => assert!((q.bid - 6500.25).abs() < f64::EPSILON),
            other => panic!("wrong variant: {other:?}"),
        }
        assert_eq!(tailer.stats.events_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mia_unified_20250908.jsonl");
        write_lines(
            &path,
            &[
                "{broken json",
                &quote_line(1_757_350_800, 6500.0),
            ],
        );

        let mut tailer = EventTailer::new(dir.path(), "mia_unified_*.jsonl", 20);
        let ev = tailer.next_event().await.unwrap();
        assert!(matches!(ev, FeedEvent::Quote(_)));
        assert_eq!(tailer.stats.malformed_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mia_unified_20250908.jsonl");
        let lines: Vec<String> = (0..50)
            .map(|i| quote_line(1_757_350_800 + i, 6500.0 + i as f64 * 0.25))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_lines(&path, &refs);

        let mut tailer = EventTailer::new(dir.path(), "mia_unified_*.jsonl", 20);
        let mut last_ts = 0.0;
        for _ in 0..50 {
            let ev = tailer.next_event().await.unwrap();
            let ts = ev.epoch_secs().unwrap();
            assert!(ts > last_ts, "events out of order: {ts} after {last_ts}");
            last_ts = ts;
        }
    }

    #[tokio::test]
    async fn backfill_seek_skips_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mia_unified_20250908.jsonl");
        // ~2 MB of lines so a 1 MB backfill starts mid-file.
        let lines: Vec<String> = (0..20_000)
            .map(|i| quote_line(1_757_000_000 + i, 6500.0))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_lines(&path, &refs);

        let mut tailer = EventTailer::new(dir.path(), "mia_unified_*.jsonl", 1);
        // First event parses cleanly (partial line at the seek point skipped).
        let ev = tailer.next_event().await.unwrap();
        assert!(matches!(ev, FeedEvent::Quote(_)));
        assert_eq!(tailer.stats.malformed_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rotation_to_newer_file_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let day1 = dir.path().join("mia_unified_20250908.jsonl");
        write_lines(&day1, &[&quote_line(1_757_350_800, 6500.0)]);

        let mut tailer = EventTailer::new(dir.path(), "mia_unified_*.jsonl", 20);
        tailer.next_event().await.unwrap();

        // New day's file appears with fresh content.
        let day2 = dir.path().join("mia_unified_20250909.jsonl");
        write_lines(&day2, &[&quote_line(1_757_437_200, 6510.0)]);

        let ev = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            tailer.next_event(),
        )
        .await
        .expect("rotated file should be picked up")
        .unwrap();
        match ev {
            FeedEvent::Quote(q) => assert!((q.bid - 6510.0).abs() < f64::EPSILON),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
