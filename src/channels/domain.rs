//! Registro de suscriptores (patrón Observer).
//!
//! Cada canal de notificación del monitor es un `Listeners<T>`: una colección de
//! callbacks registrados con `subscribe` y retirados con `unsubscribe`.
//!
//! # Semántica de Entrega
//! * **Síncrona:** `emit` invoca a cada suscriptor dentro del contexto que dispara
//!   el evento y retorna cuando todos terminaron.
//! * **Sin orden:** el orden entre suscriptores no está definido.
//! * **Reentrante:** un suscriptor puede suscribir o desuscribir durante `emit`;
//!   el cambio aplica a partir de la siguiente notificación.


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use dashmap::DashMap;


/// Identificador devuelto al suscribirse; se usa para desuscribirse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);


/// Contador global: los identificadores no se repiten entre registros distintos.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);


type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;


pub struct Listeners<T> {
    callbacks: DashMap<SubscriptionId, Callback<T>>,
}


impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            callbacks: DashMap::new(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Retorna `true` si el suscriptor existía.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Notifica `event` a todos los suscriptores registrados.
    pub fn emit(&self, event: &T) {
        // Se copian los callbacks antes de invocarlos para no retener los locks
        // de DashMap mientras corre código del suscriptor.
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}


impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}


impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("subscribers", &self.len())
            .finish()
    }
}
