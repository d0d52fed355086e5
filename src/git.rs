//! Repository checkouts through the `git` command line

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Resolves repository URLs to local working trees
#[derive(Debug, Clone)]
pub struct GitService {
    checkout_dir: PathBuf,
}

impl GitService {
    pub fn new(checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkout_dir: checkout_dir.into(),
        }
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    /// Local working tree for `url`.
    ///
    /// An existing local directory is used in place. Remote URLs are shallow
    /// cloned under the checkout dir, or fast-forwarded if already cloned.
    pub async fn checkout(&self, url: &str, branch: Option<&str>) -> Result<PathBuf> {
        let local = Path::new(url);
        if local.is_dir() {
            debug!("Using local directory {}", url);
            return Ok(local.to_path_buf());
        }

        let target = self.checkout_dir.join(extract_repo_name(url));
        if target.join(".git").is_dir() {
            info!("Pulling {} into {}", url, target.display());
            run_git(&["pull", "--ff-only"], Some(&target)).await?;
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.checkout_dir)
            .await
            .with_context(|| format!("creating checkout dir {}", self.checkout_dir.display()))?;

        info!("Cloning {} into {}", url, target.display());
        let target_arg = target.to_string_lossy().into_owned();
        let mut args = vec!["clone", "--depth", "1"];
        if let Some(branch) = branch {
            args.push("--branch");
            args.push(branch);
        }
        args.push(url);
        args.push(&target_arg);
        run_git(&args, None).await?;

        Ok(target)
    }
}

async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("running git {}", args.join(" ")))?;

    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Short repository name from an HTTP(S) URL, an SSH `host:owner/repo`
/// address or a local path
pub fn extract_repo_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let tail = if trimmed.contains("://") {
        trimmed.rsplit('/').next()
    } else if let Some((_, path)) = trimmed.split_once(':').filter(|(host, _)| is_ssh_host(host)) {
        path.rsplit('/').next()
    } else {
        Path::new(trimmed).file_name().and_then(|n| n.to_str())
    };

    match tail {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "repository".to_string(),
    }
}

// Excludes Windows drive letters like `C:`
fn is_ssh_host(host: &str) -> bool {
    host.len() > 1 && !host.contains('/')
}
