use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use bytestring::ByteString;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::NotificationPayload;
use crate::utils::sanitize_file_name;

type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

/// Persists one audit record per dispatched notification, grouped by
/// application: newline-delimited JSON appended to
/// `<dir>/<app>.log`. Every record is checked against the notification
/// schema before it is written.
pub struct AuditWriter {
    dir: PathBuf,
    writers: DashMap<ByteString, Arc<RwLock<RecordWriter>>>,
}

impl AuditWriter {
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into(), writers: DashMap::default() }
    }

    pub async fn save(&self, app: &str, payload: &NotificationPayload) -> Result<()> {
        payload.validate()?;
        let data = serde_json::to_vec(payload)?;
        let writer = self
            .writers
            .entry(ByteString::from(app))
            .or_insert_with(|| {
                let file_name = self.dir.join(format!("{}.log", sanitize_file_name(app)));
                Arc::new(RwLock::new(RecordWriter::new(file_name)))
            })
            .value()
            .clone();
        let mut writer = writer.write().await;
        writer.log(data.as_slice()).await.map_err(|e| Error::Persistence(anyhow!("{e:?}")))
    }
}

struct RecordWriter {
    file_name: PathBuf,
    file: Option<File>,
}

impl RecordWriter {
    fn new(file_name: PathBuf) -> Self {
        Self { file_name, file: None }
    }

    #[inline]
    async fn log(&mut self, msg: &[u8]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(msg).await?;
            file.write_all(b"\n").await?;
        } else {
            Self::create_dirs(&self.file_name).await?;
            let mut file =
                OpenOptions::new().create(true).append(true).open(&self.file_name).await?;
            file.write_all(msg).await?;
            file.write_all(b"\n").await?;
            self.file.replace(file);
        }
        Ok(())
    }

    #[inline]
    async fn create_dirs(path: &Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}
