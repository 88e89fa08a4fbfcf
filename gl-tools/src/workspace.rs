use crate::error::{MutationError, Result};
use async_trait::async_trait;
use gl_core::{DiffPreview, MutationRunner};
use std::path::{Component, Path, PathBuf};

/// A validated mutation with its normalized parameters and a diff preview,
/// ready to be queued for approval. The preview reflects the file at staging
/// time; the apply step re-validates against the file as it is then.
#[derive(Debug, Clone)]
pub struct StagedMutation {
    pub kind: String,
    pub parameters: serde_json::Value,
    pub preview: DiffPreview,
}

/// Stages and applies file mutations inside a configured root directory.
pub struct WorkspaceMutator {
    root_dir: PathBuf,
    file_bytes_max: usize,
}

impl WorkspaceMutator {
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(MutationError::InvalidArguments(
                "root_dir is required".to_string(),
            ));
        }
        Ok(Self {
            root_dir,
            file_bytes_max: 1_000_000,
        })
    }

    pub fn with_file_bytes_max(mut self, file_bytes_max: usize) -> Self {
        self.file_bytes_max = file_bytes_max;
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        matches!(kind, "edit" | "write" | "delete")
    }

    /// Validates a proposed mutation against the live workspace and builds
    /// its diff preview without touching any file.
    pub async fn stage(&self, kind: &str, parameters: &serde_json::Value) -> Result<StagedMutation> {
        match kind {
            "edit" => self.stage_edit(parameters).await,
            "write" => self.stage_write(parameters).await,
            "delete" => self.stage_delete(parameters).await,
            other => Err(MutationError::InvalidArguments(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }

    async fn stage_edit(&self, parameters: &serde_json::Value) -> Result<StagedMutation> {
        let path = require_string(parameters, "path")?;
        let old_string = require_string(parameters, "old_string")?;
        let new_string = require_string(parameters, "new_string")?;
        let resolved = self.resolve_path(&path)?;

        let current = self.read_existing(&resolved, &path).await?;
        let updated = replace_unique(&current, &old_string, &new_string)?;

        Ok(StagedMutation {
            kind: "edit".to_string(),
            parameters: serde_json::json!({
                "path": path,
                "old_string": old_string,
                "new_string": new_string,
            }),
            preview: DiffPreview {
                file_path: path,
                old_content: Some(current),
                new_content: Some(updated),
            },
        })
    }

    async fn stage_write(&self, parameters: &serde_json::Value) -> Result<StagedMutation> {
        let path = require_string(parameters, "path")?;
        let content = require_string(parameters, "content")?;
        let resolved = self.resolve_path(&path)?;
        self.check_content_size(&content)?;

        let old_content = if tokio::fs::try_exists(&resolved).await? {
            Some(self.read_file(&resolved).await?)
        } else {
            None
        };

        Ok(StagedMutation {
            kind: "write".to_string(),
            parameters: serde_json::json!({
                "path": path,
                "content": content,
            }),
            preview: DiffPreview {
                file_path: path,
                old_content,
                new_content: Some(content),
            },
        })
    }

    async fn stage_delete(&self, parameters: &serde_json::Value) -> Result<StagedMutation> {
        let path = require_string(parameters, "path")?;
        let resolved = self.resolve_path(&path)?;
        let current = self.read_existing(&resolved, &path).await?;

        Ok(StagedMutation {
            kind: "delete".to_string(),
            parameters: serde_json::json!({ "path": path }),
            preview: DiffPreview {
                file_path: path,
                old_content: Some(current),
                new_content: None,
            },
        })
    }

    async fn apply_edit(&self, parameters: &serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(parameters, "path")?;
        let old_string = require_string(parameters, "old_string")?;
        let new_string = require_string(parameters, "new_string")?;
        let resolved = self.resolve_path(&path)?;

        // Re-validate against the file as it is now, not as it was staged.
        let current = self.read_existing(&resolved, &path).await?;
        let updated = replace_unique(&current, &old_string, &new_string)?;
        self.write_file(&resolved, &updated).await?;

        Ok(serde_json::json!({ "status": "edited", "path": path }))
    }

    async fn apply_write(&self, parameters: &serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(parameters, "path")?;
        let content = require_string(parameters, "content")?;
        let resolved = self.resolve_path(&path)?;
        self.write_file(&resolved, &content).await?;

        Ok(serde_json::json!({
            "status": "written",
            "path": path,
            "bytes_written": content.len(),
        }))
    }

    async fn apply_delete(&self, parameters: &serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(parameters, "path")?;
        let resolved = self.resolve_path(&path)?;
        if !tokio::fs::try_exists(&resolved).await? {
            return Err(MutationError::FileNotFound(path));
        }
        tokio::fs::remove_file(&resolved).await?;

        Ok(serde_json::json!({ "status": "deleted", "path": path }))
    }

    fn resolve_path(&self, user_path: &str) -> Result<PathBuf> {
        let rel = Path::new(user_path);
        if rel.is_absolute() {
            return Err(MutationError::Unauthorized(
                "absolute paths are not allowed".to_string(),
            ));
        }

        for component in rel.components() {
            match component {
                Component::ParentDir => {
                    return Err(MutationError::Unauthorized(
                        "path traversal is not allowed".to_string(),
                    ));
                }
                Component::CurDir | Component::Normal(_) => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(MutationError::Unauthorized("invalid path".to_string()));
                }
            }
        }

        Ok(self.root_dir.join(rel))
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.len() > self.file_bytes_max {
            return Err(MutationError::ExecutionFailed(format!(
                "file too large: {} bytes (max {})",
                bytes.len(),
                self.file_bytes_max
            )));
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    async fn read_existing(&self, resolved: &Path, user_path: &str) -> Result<String> {
        if !tokio::fs::try_exists(resolved).await? {
            return Err(MutationError::FileNotFound(user_path.to_string()));
        }
        self.read_file(resolved).await
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.check_content_size(content)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    fn check_content_size(&self, content: &str) -> Result<()> {
        if content.len() > self.file_bytes_max {
            return Err(MutationError::ExecutionFailed(format!(
                "content too large: {} bytes (max {})",
                content.len(),
                self.file_bytes_max
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MutationRunner for WorkspaceMutator {
    #[tracing::instrument(level = "info", skip_all, fields(kind = %kind))]
    async fn run(
        &self,
        kind: &str,
        parameters: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let outcome = match kind {
            "edit" => self.apply_edit(parameters).await,
            "write" => self.apply_write(parameters).await,
            "delete" => self.apply_delete(parameters).await,
            other => Err(MutationError::InvalidArguments(format!(
                "unknown operation kind: {other}"
            ))),
        };
        Ok(outcome?)
    }
}

/// Replaces `old_string` with `new_string`, requiring exactly one occurrence
/// so an ambiguous edit never lands in the wrong place.
fn replace_unique(content: &str, old_string: &str, new_string: &str) -> Result<String> {
    if old_string.is_empty() {
        return Err(MutationError::InvalidArguments(
            "old_string must not be empty".to_string(),
        ));
    }
    let count = content.matches(old_string).count();
    if count == 0 {
        return Err(MutationError::ExecutionFailed(
            "old_string not found in file".to_string(),
        ));
    }
    if count > 1 {
        return Err(MutationError::ExecutionFailed(format!(
            "found {count} occurrences of old_string, expected exactly 1"
        )));
    }
    Ok(content.replacen(old_string, new_string, 1))
}

pub(crate) fn require_string(args: &serde_json::Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(MutationError::InvalidArguments(format!(
            "missing key: {key}"
        )));
    };
    match v {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Err(MutationError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}
