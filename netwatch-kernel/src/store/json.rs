/*!
 * STORE JSON - Hôtes et résultats dans un seul fichier JSON
 *
 * RÔLE :
 * Implémentation par défaut de `HostRegistry` + `ResultStore`, sans base de
 * données : un document `{hosts, results}` chargé en mémoire au démarrage.
 *
 * FONCTIONNEMENT :
 * - Tout le document vit derrière un seul lock (parking_lot)
 * - `session()` = accès exclusif ; `commit()` écrit fichier temporaire + rename
 * - Un lot (`append_batch`) = une session = une seule écriture disque
 * - Écriture ratée ou session non commitée : les changements restent en
 *   mémoire (visibles aux requêtes) et partent sur disque au prochain commit
 * - Rétention : au plus `max_results_per_host` résultats par hôte (0 = illimité)
 *
 * Les appels sont bloquants (IO disque) : depuis tokio, passer par
 * `spawn_blocking`.
 */

use super::{HostRegistry, ResultQuery, ResultStore, StoreError};
use crate::models::ProbeResult;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    hosts: Vec<String>,
    results: Vec<ProbeResult>, // ordre d'ajout, plus ancien d'abord
}

pub struct JsonStore {
    /// Fichier cible ; None = store purement mémoire
    path: Option<PathBuf>,
    /// Plafond de résultats par hôte, 0 = illimité
    max_results_per_host: usize,
    /// Document complet, source de vérité
    doc: Mutex<Document>,
    /// Nombre d'écritures disque réussies depuis l'ouverture
    writes: AtomicU64,
}

impl JsonStore {
    /// Charge `path` s'il existe, sinon part d'un document vide.
    /// Le fichier est créé au premier commit.
    pub fn open(path: impl Into<PathBuf>, max_results_per_host: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Document::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Document::default()
        };
        info!(
            path = %path.display(),
            hosts = doc.hosts.len(),
            results = doc.results.len(),
            "store opened"
        );
        Ok(Self {
            path: Some(path),
            max_results_per_host,
            doc: Mutex::new(doc),
            writes: AtomicU64::new(0),
        })
    }

    /// Store qui ne touche jamais le disque
    pub fn in_memory(max_results_per_host: usize) -> Self {
        Self {
            path: None,
            max_results_per_host,
            doc: Mutex::new(Document::default()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Nombre d'écritures disque réussies (toujours 0 en mémoire)
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Accès exclusif au document jusqu'au drop de la session
    pub fn session(&self) -> StoreSession<'_> {
        StoreSession {
            store: self,
            doc: self.doc.lock(),
            dirty: false,
        }
    }

    fn persist(&self, doc: &Document) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(path = %path.display(), writes, "store persisted");
        Ok(())
    }
}

pub struct StoreSession<'a> {
    store: &'a JsonStore,
    doc: MutexGuard<'a, Document>,
    dirty: bool,
}

impl StoreSession<'_> {
    pub fn hosts(&self) -> &[String] {
        &self.doc.hosts
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.doc.hosts.iter().any(|h| h == host)
    }

    pub fn add_host(&mut self, host: &str) -> Result<(), StoreError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(StoreError::InvalidHost(host.to_string()));
        }
        if self.has_host(host) {
            return Err(StoreError::Conflict(host.to_string()));
        }
        self.doc.hosts.push(host.to_string());
        self.dirty = true;
        Ok(())
    }

    pub fn remove_host(&mut self, host: &str) -> Result<usize, StoreError> {
        let Some(pos) = self.doc.hosts.iter().position(|h| h == host) else {
            return Err(StoreError::NotFound(host.to_string()));
        };
        self.doc.hosts.remove(pos);
        self.dirty = true;
        Ok(self.delete_by_host(host))
    }

    /// Ajoute puis élague les plus anciens résultats de l'hôte au-delà du plafond
    pub fn append(&mut self, result: ProbeResult) {
        let cap = self.store.max_results_per_host;
        let host = result.host().to_string();
        self.doc.results.push(result);
        self.dirty = true;

        if cap == 0 {
            return;
        }
        let count = self.doc.results.iter().filter(|r| r.host() == host).count();
        if count > cap {
            let mut excess = count - cap;
            self.doc.results.retain(|r| {
                if excess > 0 && r.host() == host {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    pub fn query(&self, query: &ResultQuery) -> Vec<ProbeResult> {
        // Reverse append order first so equal timestamps stay newest-first.
        let mut results: Vec<ProbeResult> = self
            .doc
            .results
            .iter()
            .rev()
            .filter(|r| query.host.as_deref().map_or(true, |h| r.host() == h))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        results.truncate(query.limit);
        results
    }

    pub fn delete_all(&mut self) -> usize {
        let count = self.doc.results.len();
        self.doc.results.clear();
        self.dirty |= count > 0;
        count
    }

    pub fn delete_by_host(&mut self, host: &str) -> usize {
        let before = self.doc.results.len();
        self.doc.results.retain(|r| r.host() != host);
        let count = before - self.doc.results.len();
        self.dirty |= count > 0;
        count
    }

    /// Écrit le document si la session l'a modifié. En cas d'échec, les
    /// changements restent en mémoire, non persistés.
    pub fn commit(mut self) -> Result<(), StoreError> {
        if self.dirty {
            self.store.persist(&self.doc)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Drop for StoreSession<'_> {
    fn drop(&mut self) {
        if self.dirty && self.store.path.is_some() {
            warn!("store session ended without a successful commit; changes kept in memory, not yet persisted");
        }
    }
}

impl HostRegistry for JsonStore {
    fn list_hosts(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.session().hosts().to_vec())
    }

    fn add_host(&self, host: &str) -> Result<(), StoreError> {
        let mut session = self.session();
        session.add_host(host)?;
        session.commit()?;
        info!(host = host.trim(), "host added");
        Ok(())
    }

    fn remove_host(&self, host: &str) -> Result<usize, StoreError> {
        let mut session = self.session();
        let deleted = session.remove_host(host)?;
        session.commit()?;
        info!(host, deleted, "host removed");
        Ok(deleted)
    }
}

impl ResultStore for JsonStore {
    fn append(&self, result: ProbeResult) -> Result<(), StoreError> {
        let mut session = self.session();
        session.append(result);
        session.commit()
    }

    fn append_batch(&self, results: Vec<ProbeResult>) -> Result<usize, StoreError> {
        if results.is_empty() {
            return Ok(0);
        }
        let count = results.len();
        let mut session = self.session();
        for result in results {
            session.append(result);
        }
        session.commit()?;
        Ok(count)
    }

    fn query(&self, query: &ResultQuery) -> Result<Vec<ProbeResult>, StoreError> {
        Ok(self.session().query(query))
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut session = self.session();
        let deleted = session.delete_all();
        session.commit()?;
        info!(deleted, "all results deleted");
        Ok(deleted)
    }

    fn delete_by_host(&self, host: &str) -> Result<usize, StoreError> {
        let mut session = self.session();
        let deleted = session.delete_by_host(host);
        session.commit()?;
        info!(host, deleted, "host results deleted");
        Ok(deleted)
    }
}
