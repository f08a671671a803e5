/*!
Helpers de harness de test

Logs, attente active sur condition, répertoire de données jetable.
*/

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

/// Installe un subscriber tracing qui écrit via le harness de test.
/// Appelable depuis chaque test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("netwatch_kernel=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Teste `check` toutes les `every` jusqu'à succès ou `timeout`.
/// Renvoie si la condition a été remplie.
pub async fn wait_until<F>(timeout: Duration, every: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(every).await;
    }
}

/// Répertoire temporaire supprimé au drop
pub struct TempDataDir {
    dir: TempDir,
}

impl TempDataDir {
    pub fn new() -> Result<Self> {
        Ok(Self { dir: tempfile::tempdir()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Emplacement du store de test ; le fichier n'existe pas encore
    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("data").join("netwatch.json")
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn wait_until_reports_success_and_timeout() {
        let calls = AtomicUsize::new(0);
        let met = wait_until(Duration::from_secs(1), Duration::from_millis(5), || {
            calls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;
        assert!(met);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let met = wait_until(Duration::from_millis(30), Duration::from_millis(5), || false).await;
        assert!(!met);
    }

    #[test]
    fn temp_dir_files() {
        let dir = TempDataDir::new().unwrap();
        let path = dir.write_file("netwatch.yaml", "hosts: []\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hosts: []\n");
        assert!(dir.store_path().starts_with(dir.path()));
        assert!(!dir.store_path().exists());
    }
}
