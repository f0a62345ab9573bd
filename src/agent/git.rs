use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, bail};

use super::bead::Credential;
use crate::process::{SpawnOptions, spawn_with_timeout};

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);
const RESET_TIMEOUT: Duration = Duration::from_secs(60);
const CLONE_DEPTH: &str = "50";

/// Source checkout plus handoff directory for one pipeline run.
///
/// Both directories are removed when the guard drops, whatever the outcome.
#[derive(Debug)]
pub struct Checkout {
    pub repo_dir: PathBuf,
    pub handoff_dir: PathBuf,
}

impl Checkout {
    pub fn new(repo_dir: PathBuf, handoff_dir: PathBuf) -> Self {
        Self {
            repo_dir,
            handoff_dir,
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        for dir in [&self.repo_dir, &self.handoff_dir] {
            if let Err(e) = std::fs::remove_dir_all(dir)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %dir.display(), error = %e, "failed to clean up checkout");
            }
        }
    }
}

pub type HarnessFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Repository operations the pipeline depends on.
pub trait RepoHarness: Send + Sync {
    fn checkout<'a>(
        &'a self,
        repo_url: &'a str,
        credential: Option<&'a Credential>,
    ) -> HarnessFuture<'a, Checkout>;

    /// Discard every uncommitted change in the checkout.
    fn reset<'a>(&'a self, repo_dir: &'a Path) -> HarnessFuture<'a, ()>;
}

/// Harness backed by the `git` CLI.
pub struct GitHarness {
    root: PathBuf,
}

impl GitHarness {
    /// Checkouts are created under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn clone_repo(
        &self,
        repo_url: &str,
        credential: Option<&Credential>,
    ) -> anyhow::Result<Checkout> {
        let run_id = hex::encode(rand::random::<[u8; 4]>());
        let checkout = Checkout::new(
            self.root.join(format!("repo-{run_id}")),
            self.root.join(format!("handoff-{run_id}")),
        );
        tokio::fs::create_dir_all(&checkout.handoff_dir)
            .await
            .with_context(|| format!("creating {}", checkout.handoff_dir.display()))?;

        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            CLONE_DEPTH.to_string(),
            repo_url.to_string(),
            checkout.repo_dir.to_string_lossy().into_owned(),
        ];
        let options = SpawnOptions::new(CLONE_TIMEOUT).env(clone_env(credential));
        let out = spawn_with_timeout("git", &args, &options).await?;
        if !out.success() {
            bail!(
                "git clone failed (exit {}): {}",
                out.exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                out.stderr.trim()
            );
        }
        tracing::info!(repo_url, path = %checkout.repo_dir.display(), "repository cloned");
        Ok(checkout)
    }

    async fn reset_repo(&self, repo_dir: &Path) -> anyhow::Result<()> {
        let args = ["reset", "--hard", "HEAD"].map(String::from);
        let out = spawn_with_timeout("git", &args, &reset_options(repo_dir)).await?;
        if !out.success() {
            bail!("git reset failed: {}", out.stderr.trim());
        }
        Ok(())
    }
}

impl RepoHarness for GitHarness {
    fn checkout<'a>(
        &'a self,
        repo_url: &'a str,
        credential: Option<&'a Credential>,
    ) -> HarnessFuture<'a, Checkout> {
        Box::pin(self.clone_repo(repo_url, credential))
    }

    fn reset<'a>(&'a self, repo_dir: &'a Path) -> HarnessFuture<'a, ()> {
        Box::pin(self.reset_repo(repo_dir))
    }
}

/// Resets never see the credential.
fn reset_options(repo_dir: &Path) -> SpawnOptions {
    SpawnOptions::new(RESET_TIMEOUT)
        .cwd(repo_dir)
        .env(clone_env(None))
}

/// Just enough environment for an SSH clone, ignoring system git config.
pub fn clone_env(credential: Option<&Credential>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = ["HOME", "PATH", "SSH_AUTH_SOCK"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
        .collect();
    env.insert("GIT_CONFIG_NOSYSTEM".into(), "1".into());
    if let Some(credential) = credential {
        env.insert(credential.var.clone(), credential.value.clone());
    }
    env
}
