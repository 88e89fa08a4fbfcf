//! Configuration scaffolding for `greenlight init`.
//!
//! Writes the config template and creates the workspace root without
//! overwriting an existing config unless forced.

use crate::config::{self, GreenlightConfig};
use anyhow::Result;
use std::path::{Path, PathBuf};

const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/greenlight.toml");

#[derive(Debug, Clone)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub created_config: bool,
    pub workspace_root: PathBuf,
}

pub async fn initialize(config_path: Option<PathBuf>, force: bool) -> Result<InitReport> {
    let config_path = config_path.unwrap_or_else(config::default_config_path);
    let created_config = write_config_template(&config_path, force).await?;

    let (cfg, _) = GreenlightConfig::load_with_path(Some(config_path.clone())).await?;
    let workspace_root = cfg.workspace_root_path()?;
    tokio::fs::create_dir_all(&workspace_root)
        .await
        .map_err(|e| anyhow::anyhow!("create workspace root {}: {e}", workspace_root.display()))?;

    Ok(InitReport {
        config_path,
        created_config,
        workspace_root,
    })
}

/// Returns true when the template was written, false when an existing
/// config was kept.
async fn write_config_template(path: &Path, force: bool) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) if !force => return Ok(false),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(anyhow::anyhow!(
                "inspect config path {}: {err}",
                path.display()
            ));
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("create config dir {}: {e}", parent.display()))?;
    }
    tokio::fs::write(path, CONFIG_TEMPLATE)
        .await
        .map_err(|e| anyhow::anyhow!("write config template {}: {e}", path.display()))?;
    Ok(true)
}
