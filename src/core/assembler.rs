//! 片段合并器
//!
//! 按播放列表顺序把片段逐个追加到输出文件，每个片段写入后立即删除，
//! 临时目录的空间随合并进度逐步释放。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::core::error_handling::DownloadError;
use crate::core::models::Manifest;
use crate::core::observer::{DownloadObserver, TracingObserver};
use crate::utils::file_utils::{sanitize_filename_with_budget, OUTPUT_NAME_BUDGET};

/// 合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// 实际写入的输出文件
    pub output: PathBuf,
    /// 播放列表中的片段数
    pub expected: usize,
    /// 已合并的片段数
    pub processed: usize,
    /// 输出总字节数
    pub bytes: u64,
}

impl AssemblyReport {
    pub fn is_complete(&self) -> bool {
        self.expected == self.processed
    }
}

pub struct SegmentAssembler {
    buffer_size: usize,
    observer: Arc<dyn DownloadObserver>,
}

impl Default for SegmentAssembler {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl SegmentAssembler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            observer: TracingObserver::shared(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Output path actually used for `output`: the file name is cut to the
    /// output budget, extension preserved.
    pub fn output_path(output: &Path) -> PathBuf {
        sanitize_filename_with_budget(output, OUTPUT_NAME_BUDGET)
    }

    /// Concatenates the manifest's segments from `segment_dir` into `output`.
    ///
    /// Stops at the first missing or unreadable segment; the partial output
    /// stays on disk and the error carries how many segments made it in.
    pub async fn combine(
        &self,
        manifest: &Manifest,
        segment_dir: &Path,
        output: &Path,
    ) -> Result<AssemblyReport, DownloadError> {
        let output = Self::output_path(output);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::info!(
            "combining {} segments into {}",
            manifest.len(),
            output.display()
        );

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&output)
            .await?;

        let expected = manifest.len();
        let mut processed = 0;
        let mut bytes = 0u64;
        let mut buffer = vec![0u8; self.buffer_size];

        for segment in manifest.iter() {
            let path = segment_dir.join(segment.file_name());
            let assembly_error = || DownloadError::Assembly {
                segment: path.clone(),
                expected,
                processed,
            };

            let mut input = File::open(&path).await.map_err(|_| assembly_error())?;
            loop {
                let read = input.read(&mut buffer).await.map_err(|_| assembly_error())?;
                if read == 0 {
                    break;
                }
                out.write_all(&buffer[..read]).await?;
                bytes += read as u64;
            }
            drop(input);

            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("failed to remove segment {}: {}", path.display(), e);
            }
            processed += 1;
            self.observer.segment_combined(segment.position, expected, &path);
        }

        out.flush().await?;
        out.sync_all().await?;

        Ok(AssemblyReport {
            output,
            expected,
            processed,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write_segments(dir: &Path, manifest: &Manifest, bodies: &[&[u8]]) {
        for (segment, body) in manifest.iter().zip(bodies) {
            tokio::fs::write(dir.join(segment.file_name()), body).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_combine_in_manifest_order() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::from_identifiers(["c.ts", "a.ts", "b.ts"]);
        write_segments(dir.path(), &manifest, &[b"CCC", b"A", b"BB"]).await;
        let output = dir.path().join("out/video.ts");

        let report = SegmentAssembler::default()
            .combine(&manifest, dir.path(), &output)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.bytes, 6);
        assert_eq!(std::fs::read(&report.output).unwrap(), b"CCCABB");
        for segment in manifest.iter() {
            assert!(!dir.path().join(segment.file_name()).exists());
        }
    }

    #[tokio::test]
    async fn test_missing_segment_aborts_and_keeps_partial_output() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::from_identifiers(["a.ts", "b.ts", "c.ts"]);
        write_segments(dir.path(), &manifest, &[b"A"]).await;
        tokio::fs::write(dir.path().join(manifest.segments[2].file_name()), b"C")
            .await
            .unwrap();
        let output = dir.path().join("video.ts");

        let err = SegmentAssembler::new(2)
            .combine(&manifest, dir.path(), &output)
            .await
            .unwrap_err();

        match err {
            DownloadError::Assembly {
                expected, processed, ..
            } => {
                assert_eq!(expected, 3);
                assert_eq!(processed, 1);
            }
            other => panic!("expected assembly error, got {other:?}"),
        }
        assert_eq!(std::fs::read(&output).unwrap(), b"A");
        assert!(!dir.path().join(manifest.segments[0].file_name()).exists());
        assert!(dir.path().join(manifest.segments[2].file_name()).exists());
    }

    #[tokio::test]
    async fn test_long_output_name_is_cut() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::from_identifiers(["a.ts"]);
        write_segments(dir.path(), &manifest, &[b"A"]).await;
        let output = dir.path().join(format!("{}.ts", "名".repeat(120)));

        let report = SegmentAssembler::default()
            .combine(&manifest, dir.path(), &output)
            .await
            .unwrap();

        let name = report.output.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= OUTPUT_NAME_BUDGET);
        assert!(name.ends_with(".ts"));
        assert_eq!(std::fs::read(&report.output).unwrap(), b"A");
    }
}
