//! Elementary stream recording
//!
//! Appends every video payload of a pushed stream to
//! `<record_dir>/<stream_id>.<ext>`, the raw bitstream without framing.

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::codec::CodecKind;

pub struct Recorder {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

impl Recorder {
    /// Create (or truncate) the recording file for `stream_id`
    pub async fn create(dir: &Path, stream_id: &str, codec: CodecKind) -> std::io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.{}", file_stem(stream_id), codec.file_extension()));
        let file = File::create(&path).await?;
        tracing::info!("Recording {} to {}", stream_id, path.display());

        Ok(Self {
            path,
            file: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.file.write_all(payload).await?;
        self.bytes_written += payload.len() as u64;
        Ok(())
    }

    /// Flush buffered data to disk
    pub async fn finish(mut self) -> std::io::Result<u64> {
        self.file.flush().await?;
        Ok(self.bytes_written)
    }
}

/// Stream ids come from the network; keep them inside the record directory
fn file_stem(stream_id: &str) -> String {
    let stem: String = stream_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "stream".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_sanitized() {
        assert_eq!(file_stem("camera_stream"), "camera_stream");
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_stem(""), "stream");
    }

    #[tokio::test]
    async fn test_records_payloads() {
        let dir = std::env::temp_dir().join(format!("relay-recorder-{}", uuid::Uuid::new_v4()));
        let mut recorder = Recorder::create(&dir, "cam", CodecKind::H264).await.unwrap();
        let path = recorder.path().to_path_buf();

        recorder.write(&[0, 0, 0, 1, 0x65]).await.unwrap();
        recorder.write(&[0, 0, 0, 1, 0x41]).await.unwrap();
        assert_eq!(recorder.finish().await.unwrap(), 10);

        assert_eq!(path.file_name().unwrap(), "cam.h264");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![0, 0, 0, 1, 0x65, 0, 0, 0, 1, 0x41]);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
