//! Object store for site images (officer portraits, event banners, hero slides).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use opendal::services::{Memory, S3};
use opendal::Operator;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFolder {
    Officers,
    Events,
    Hero,
}

impl ImageFolder {
    fn prefix(self) -> &'static str {
        match self {
            ImageFolder::Officers => "officers",
            ImageFolder::Events => "events",
            ImageFolder::Hero => "hero",
        }
    }
}

/// An image sent inline by the CMS: a file name plus base64 content, with or
/// without a `data:` URL prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpload {
    pub name: String,
    pub data: String,
}

impl ImageUpload {
    fn decode(&self) -> AppResult<Vec<u8>> {
        let payload = match self.data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => self.data.as_str(),
        };
        STANDARD
            .decode(payload.trim())
            .map_err(|_| AppError::validation("Image data is not valid base64"))
    }
}

#[derive(Clone)]
pub struct ImageStore {
    op: Operator,
    public_url: String,
}

impl ImageStore {
    pub fn new(op: Operator, public_url: impl Into<String>) -> Self {
        Self {
            op,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let op = match &config.object_storage {
            Some(s3) => Operator::new(
                S3::default()
                    .endpoint(&s3.endpoint)
                    .bucket(&s3.bucket)
                    .region(&s3.region)
                    .access_key_id(&s3.access_key_id)
                    .secret_access_key(&s3.secret_access_key),
            )?
            .finish(),
            None => Operator::new(Memory::default())?.finish(),
        };
        Ok(Self::new(op, config.public_url.clone()))
    }

    pub fn in_memory(public_url: &str) -> anyhow::Result<Self> {
        Ok(Self::new(Operator::new(Memory::default())?.finish(), public_url))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Stores the image under `{folder}/{unix_millis}-{name}` and returns its public URL.
    pub async fn upload(&self, folder: ImageFolder, image: &ImageUpload) -> AppResult<String> {
        let bytes = image.decode()?;
        let key = format!(
            "{}/{}-{}",
            folder.prefix(),
            chrono::Utc::now().timestamp_millis(),
            sanitize_name(&image.name)
        );

        self.op.write(&key, bytes).await.map_err(|e| {
            tracing::error!(key = %key, "Image upload failed: {}", e);
            AppError::Storage(format!("image upload failed: {}", e))
        })?;

        tracing::info!(key = %key, "Image uploaded");
        Ok(self.url_for(&key))
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    pub fn key_for(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_url)
            .map(|k| k.trim_start_matches('/'))
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    /// Best-effort removal; failures are logged and swallowed.
    pub async fn delete_by_url(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        let Some(key) = self.key_for(url) else {
            tracing::warn!(url = %url, "Image URL is not managed by this store, skipping delete");
            return;
        };
        if let Err(e) = self.op.delete(&key).await {
            tracing::warn!(key = %key, "Failed to delete image: {}", e);
        }
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: &str) -> ImageUpload {
        ImageUpload {
            name: name.to_string(),
            data: format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG fake")),
        }
    }

    #[tokio::test]
    async fn upload_then_delete() {
        let store = ImageStore::in_memory("https://cdn.test/site").unwrap();
        let url = store.upload(ImageFolder::Officers, &png("jane doe.png")).await.unwrap();
        assert!(url.starts_with("https://cdn.test/site/officers/"));
        assert!(url.ends_with("-jane_doe.png"));

        let key = store.key_for(&url).unwrap();
        let stored = store.operator().read(&key).await.unwrap().to_vec();
        assert_eq!(stored, b"\x89PNG fake");

        store.delete_by_url(&url).await;
        assert!(store.operator().read(&key).await.is_err());
    }

    #[tokio::test]
    async fn foreign_url_delete_is_ignored() {
        let store = ImageStore::in_memory("https://cdn.test/site").unwrap();
        store.delete_by_url("https://elsewhere.example/x.png").await;
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected() {
        let store = ImageStore::in_memory("https://cdn.test").unwrap();
        let bad = ImageUpload {
            name: "x.png".into(),
            data: "!!!".into(),
        };
        let err = store.upload(ImageFolder::Hero, &bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
