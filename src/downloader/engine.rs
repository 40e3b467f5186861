//! Ranged Download Engine
//!
//! One download = one HEAD probe plus N parallel byte-range workers, each
//! streaming its slice to `tmp/<id>/chunk_i.tmp`. Chunks are merged in index
//! order into a randomly named output file. Cancellation is cooperative:
//! checked at entry, after the probe, inside every stream loop, and after
//! the workers join.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::progress::DownloadProgress;

/// Result of the HEAD probe.
#[derive(Debug, Clone)]
pub struct HeadInfo {
    pub size: u64,
    /// File extension without the dot, e.g. `mp4`.
    pub extension: String,
}

pub struct RangedDownloadEngine {
    http: reqwest::Client,
}

impl RangedDownloadEngine {
    pub fn new() -> Self {
        // Chunk GETs stream for as long as the transfer takes; only the
        // connect phase is bounded.
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");
        Self { http }
    }

    /// HEAD the URL to learn size and file extension.
    pub async fn probe(&self, url: &str) -> anyhow::Result<HeadInfo> {
        let response = self.http.head(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HEAD failed: HTTP {}", response.status());
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| anyhow::anyhow!("Server did not report Content-Length"))?;
        if size == 0 {
            anyhow::bail!("Server reported zero Content-Length");
        }

        let disposition_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_disposition_filename);
        let extension = disposition_name
            .as_deref()
            .and_then(extension_of)
            .or_else(|| extension_of(url.split('?').next().unwrap_or(url)))
            .unwrap_or_else(|| "mp4".to_string());

        Ok(HeadInfo { size, extension })
    }

    /// Run the full ranged transfer. Returns the merged output file path.
    pub async fn download<F>(
        &self,
        url: &str,
        tmp_dir: &Path,
        out_dir: &Path,
        workers: usize,
        cancel: &CancellationToken,
        progress_callback: F,
    ) -> anyhow::Result<PathBuf>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            anyhow::bail!("Download cancelled");
        }

        let info = self.probe(url).await?;
        if cancel.is_cancelled() {
            anyhow::bail!("Download cancelled");
        }

        let ranges = partition_ranges(info.size, workers as u64);
        tracing::info!(
            "Starting ranged download: {} bytes in {} ranges -> {:?}",
            info.size,
            ranges.len(),
            tmp_dir
        );

        tokio::fs::create_dir_all(tmp_dir).await?;

        let total_downloaded = Arc::new(AtomicU64::new(0));
        let progress_callback = Arc::new(progress_callback);
        let started = Instant::now();

        let mut handles = Vec::with_capacity(ranges.len());
        for (index, (start, end)) in ranges.iter().copied().enumerate() {
            let http = self.http.clone();
            let url = url.to_string();
            let chunk_path = tmp_dir.join(format!("chunk_{}.tmp", index));
            let cancel = cancel.clone();
            let total_downloaded = Arc::clone(&total_downloaded);
            let progress_callback = Arc::clone(&progress_callback);
            let total_size = info.size;

            handles.push(tokio::spawn(async move {
                download_range(
                    &http,
                    &url,
                    &chunk_path,
                    start,
                    end,
                    &cancel,
                    &total_downloaded,
                    total_size,
                    started,
                    progress_callback.as_ref(),
                )
                .await
            }));
        }

        let mut failure: Option<anyhow::Error> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure = Some(failure.unwrap_or(e)),
                Err(e) => failure = Some(failure.unwrap_or_else(|| anyhow::anyhow!(e))),
            }
        }

        if cancel.is_cancelled() {
            remove_dir_best_effort(tmp_dir).await;
            anyhow::bail!("Download cancelled");
        }
        if let Some(e) = failure {
            remove_dir_best_effort(tmp_dir).await;
            return Err(e);
        }

        // Merge in chunk index order, then drop the chunk directory.
        let token = random_token();
        let output = out_dir.join(format!("{}.{}", token, info.extension));
        tokio::fs::create_dir_all(out_dir).await?;
        merge_chunks(tmp_dir, ranges.len(), &output).await?;
        remove_dir_best_effort(tmp_dir).await;

        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            info.size as f64 / elapsed
        } else {
            0.0
        };
        progress_callback(DownloadProgress {
            downloaded_bytes: info.size,
            total_bytes: info.size,
            speed_bytes_per_sec: speed,
            percentage: 100.0,
        });

        tracing::info!(
            "Download completed: {} bytes at {} -> {:?}",
            info.size,
            super::progress::format_bytes_per_sec(speed),
            output
        );
        Ok(output)
    }
}

impl Default for RangedDownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream one byte range to its chunk file, reporting aggregate progress at
/// roughly each 10% of the chunk.
#[allow(clippy::too_many_arguments)]
async fn download_range<F>(
    http: &reqwest::Client,
    url: &str,
    chunk_path: &Path,
    start: u64,
    end: u64,
    cancel: &CancellationToken,
    total_downloaded: &AtomicU64,
    total_size: u64,
    started: Instant,
    progress_callback: &F,
) -> anyhow::Result<()>
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    let chunk_len = end - start + 1;
    let response = http
        .get(url)
        .header(reqwest::header::RANGE, format!("bytes={}-{}", start, end))
        .send()
        .await?;
    let status = response.status();
    if status != reqwest::StatusCode::PARTIAL_CONTENT && !status.is_success() {
        anyhow::bail!("Range request failed: HTTP {}", status);
    }

    let mut file = tokio::fs::File::create(chunk_path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut last_decile: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        if cancel.is_cancelled() {
            anyhow::bail!("Download cancelled");
        }

        let chunk = chunk_result?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        let total = total_downloaded.fetch_add(chunk.len() as u64, Ordering::Relaxed)
            + chunk.len() as u64;

        let decile = written * 10 / chunk_len;
        if decile > last_decile {
            last_decile = decile;
            let elapsed = started.elapsed().as_secs_f64();
            progress_callback(DownloadProgress::new(total, total_size, elapsed));
        }
    }
    file.flush().await?;

    if written != chunk_len {
        anyhow::bail!(
            "Range {}-{} truncated: got {} of {} bytes",
            start,
            end,
            written,
            chunk_len
        );
    }
    Ok(())
}

/// Split `[0, size)` into `workers` contiguous inclusive ranges. The last
/// range absorbs the remainder. Degenerates to a single range when the file
/// is smaller than the worker count.
pub fn partition_ranges(size: u64, workers: u64) -> Vec<(u64, u64)> {
    let workers = workers.max(1);
    let base = size / workers;
    if base == 0 {
        return vec![(0, size - 1)];
    }
    (0..workers)
        .map(|i| {
            let start = i * base;
            let end = if i == workers - 1 {
                size - 1
            } else {
                (i + 1) * base - 1
            };
            (start, end)
        })
        .collect()
}

async fn merge_chunks(tmp_dir: &Path, count: usize, output: &Path) -> anyhow::Result<()> {
    let mut out = tokio::fs::File::create(output).await?;
    for index in 0..count {
        let chunk_path = tmp_dir.join(format!("chunk_{}.tmp", index));
        let mut chunk = tokio::fs::File::open(&chunk_path).await?;
        tokio::io::copy(&mut chunk, &mut out).await?;
    }
    out.flush().await?;
    Ok(())
}

async fn remove_dir_best_effort(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::debug!("Failed to remove chunk dir {:?}: {}", dir, e);
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
    })
}

fn extension_of(name: &str) -> Option<String> {
    let tail = name.rsplit('/').next()?;
    let (_, ext) = tail.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_exactly_without_overlap() {
        let size = 100 * 1024 * 1024;
        let ranges = partition_ranges(size, 4);
        assert_eq!(
            ranges,
            vec![
                (0, 26_214_399),
                (26_214_400, 52_428_799),
                (52_428_800, 78_643_199),
                (78_643_200, 104_857_599),
            ]
        );
        let covered: u64 = ranges.iter().map(|(s, e)| e - s + 1).sum();
        assert_eq!(covered, size);
    }

    #[test]
    fn partition_last_range_absorbs_remainder() {
        let ranges = partition_ranges(10, 3);
        assert_eq!(ranges, vec![(0, 2), (3, 5), (6, 9)]);
    }

    #[test]
    fn partition_degenerates_for_tiny_files() {
        assert_eq!(partition_ranges(3, 8), vec![(0, 2)]);
        assert_eq!(partition_ranges(1, 1), vec![(0, 0)]);
    }

    #[test]
    fn disposition_filename_parse() {
        assert_eq!(
            parse_disposition_filename("attachment; filename=\"ep01.mkv\"").unwrap(),
            "ep01.mkv"
        );
        assert!(parse_disposition_filename("inline").is_none());
    }

    #[test]
    fn extension_detection() {
        assert_eq!(extension_of("https://cdn/x/ep01.MP4").unwrap(), "mp4");
        assert_eq!(extension_of("ep01.mkv").unwrap(), "mkv");
        assert!(extension_of("https://cdn/stream").is_none());
        assert!(extension_of("file.").is_none());
    }

    #[tokio::test]
    async fn merge_preserves_chunk_order() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("dl");
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        for (i, content) in ["aaa", "bbb", "cc"].iter().enumerate() {
            tokio::fs::write(tmp.join(format!("chunk_{}.tmp", i)), content)
                .await
                .unwrap();
        }
        let out = dir.path().join("merged.bin");
        merge_chunks(&tmp, 3, &out).await.unwrap();
        let merged = tokio::fs::read_to_string(&out).await.unwrap();
        assert_eq!(merged, "aaabbbcc");
    }
}
