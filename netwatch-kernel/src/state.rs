use parking_lot::Mutex;
use std::sync::Arc;

/// Valeur partagée sous lock, entre le moniteur et la couche HTTP.
///
/// Les écritures remplacent toute la valeur sous le lock : un lecteur voit
/// toujours une valeur issue d'une seule écriture.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Copie de la valeur courante
pub fn read_state<T: Clone>(state: &Shared<T>) -> T {
    state.lock().clone()
}

/// Remplace la valeur, renvoie l'ancienne
pub fn replace_state<T>(state: &Shared<T>, value: T) -> T {
    std::mem::replace(&mut *state.lock(), value)
}
