use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::mail::MailMessage;

use super::{Transport, TransportError};

/// Writes every message as an RFC 5322 `.eml` file into a directory.
#[derive(Debug)]
pub struct FileTransport {
    directory: PathBuf,
}

impl FileTransport {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn send(&self, message: &MailMessage) -> Result<bool, TransportError> {
        let rendered = message.render()?;

        tokio::fs::create_dir_all(&self.directory).await?;

        let file_name = format!(
            "{}-{}.eml",
            Utc::now().format("%Y%m%d-%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.directory.join(file_name);
        tokio::fs::write(&path, rendered).await?;

        tracing::debug!(path = %path.display(), subject = %message.subject, "Mail written to file");

        Ok(true)
    }
}
