use anyhow::{anyhow, Context};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub content_type: String,
}

/// Files stored under `{workspace}/blobs/`, addressed by relative path.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let root = workspace.join("blobs");
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob root {}", root.to_string_lossy()))?;
        Ok(Self { root })
    }

    pub fn store(&self, path: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<BlobRef> {
        let dst = self.resolve(path)?;
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        std::fs::write(&dst, bytes)
            .with_context(|| format!("failed to write blob {}", dst.to_string_lossy()))?;
        log::info!("stored blob {} ({} bytes)", path, bytes.len());
        Ok(BlobRef {
            path: path.to_string(),
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
            content_type: content_type.to_string(),
        })
    }

    /// Persistent URL for a stored blob.
    pub fn url(&self, blob: &BlobRef) -> anyhow::Result<String> {
        let p = self.resolve(&blob.path)?;
        if !p.is_file() {
            return Err(anyhow!("blob not found: {}", blob.path));
        }
        let abs = std::fs::canonicalize(&p)
            .with_context(|| format!("failed to resolve {}", p.to_string_lossy()))?;
        Ok(format!("file://{}", abs.to_string_lossy()))
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(path);
        let clean = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(anyhow!("invalid blob path: {:?}", path));
        }
        Ok(self.root.join(rel))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Replaces characters that would change the meaning of a storage path.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
