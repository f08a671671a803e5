/*!
 * STORE - Collaborateurs de persistance du moniteur
 *
 * RÔLE :
 * Deux interfaces, en général servies par le même objet :
 * - [`HostRegistry`] : l'ensemble des hôtes surveillés (uniques, sensibles à la casse)
 * - [`ResultStore`] : la série de résultats, en ajout seul
 *
 * FONCTIONNEMENT :
 * - Supprimer un hôte supprime aussi ses résultats
 * - Traits synchrones et potentiellement bloquants (IO) : le moniteur les
 *   appelle via `tokio::task::spawn_blocking`, jamais à travers un `.await`
 */

mod json;

pub use json::{JsonStore, StoreSession};

use crate::models::ProbeResult;
use serde::Deserialize;

pub const DEFAULT_QUERY_LIMIT: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("host already registered: {0}")]
    Conflict(String),
    #[error("unknown host: {0}")]
    NotFound(String),
    #[error("invalid host name: {0:?}")]
    InvalidHost(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filtre de [`ResultStore::query`]. Résultats du plus récent au plus ancien.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResultQuery {
    /// None = tous les hôtes
    pub host: Option<String>,
    /// Nombre maximum de résultats renvoyés
    pub limit: usize,
}

impl Default for ResultQuery {
    fn default() -> Self {
        Self { host: None, limit: DEFAULT_QUERY_LIMIT }
    }
}

impl ResultQuery {
    pub fn for_host(host: impl Into<String>, limit: usize) -> Self {
        Self { host: Some(host.into()), limit }
    }
}

pub trait HostRegistry: Send + Sync {
    fn list_hosts(&self) -> Result<Vec<String>, StoreError>;

    /// `InvalidHost` pour un nom vide, `Conflict` pour un doublon
    fn add_host(&self, host: &str) -> Result<(), StoreError>;

    /// Retire l'hôte et tous ses résultats ; renvoie le nombre de résultats supprimés
    fn remove_host(&self, host: &str) -> Result<usize, StoreError>;
}

pub trait ResultStore: Send + Sync {
    /// Un `Err` signale que le résultat n'est pas (encore) persisté ; selon
    /// l'implémentation il peut rester visible en mémoire.
    fn append(&self, result: ProbeResult) -> Result<(), StoreError>;

    /// Ajoute un lot de résultats ; renvoie le nombre ajouté. Par défaut un
    /// `append` par résultat, à surcharger pour n'écrire qu'une fois.
    fn append_batch(&self, results: Vec<ProbeResult>) -> Result<usize, StoreError> {
        let count = results.len();
        for result in results {
            self.append(result)?;
        }
        Ok(count)
    }

    fn query(&self, query: &ResultQuery) -> Result<Vec<ProbeResult>, StoreError>;
    fn delete_all(&self) -> Result<usize, StoreError>;
    fn delete_by_host(&self, host: &str) -> Result<usize, StoreError>;
}

/// Les deux collaborateurs derrière un seul handle
pub trait Store: HostRegistry + ResultStore {}

impl<T: HostRegistry + ResultStore> Store for T {}
