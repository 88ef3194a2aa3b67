//! Preference storage boundary
//!
//! The engine does not persist anything itself. A host that remembers
//! column widths or visibility plugs in a [`PreferenceStore`]; the engine
//! only ever loads a key or saves (or deletes) it.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Key-value persistence for user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Loads a stored value, `None` if absent.
    async fn load(&self, key: &str) -> Option<serde_json::Value>;

    /// Stores a value. `None` deletes the key.
    async fn save(&self, key: &str, value: Option<serde_json::Value>);
}

/// A preference store that lives only as long as the process.
///
/// # Example
///
/// ```
/// use lazygrid_lib::prefs::InMemoryPreferences;
///
/// let prefs = InMemoryPreferences::new();
/// assert!(prefs.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    store: DashMap<String, serde_json::Value>,
}

impl InMemoryPreferences {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    async fn load(&self, key: &str) -> Option<serde_json::Value> {
        self.store.get(key).map(|entry| entry.value().clone())
    }

    async fn save(&self, key: &str, value: Option<serde_json::Value>) {
        match value {
            Some(value) => {
                self.store.insert(key.to_string(), value);
            }
            None => {
                self.store.remove(key);
            }
        }
    }
}

/// A typed view of one preference key.
///
/// Values are stored as JSON. A stored value that no longer deserializes
/// into `T` reads as absent.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Arc;
///
/// use lazygrid_lib::prefs::{InMemoryPreferences, Preference};
///
/// # tokio_test_block(async {
/// let store = Arc::new(InMemoryPreferences::new());
/// let widths: Preference<HashMap<String, f64>> = Preference::new(store, "grid.widths");
///
/// widths.save(&HashMap::from([("name".to_string(), 180.0)])).await?;
/// assert_eq!(widths.load().await.and_then(|w| w.get("name").copied()), Some(180.0));
/// # Ok::<(), serde_json::Error>(())
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Preference<T> {
    store: Arc<dyn PreferenceStore>,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Preference<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Binds a key of a store.
    pub fn new(store: Arc<dyn PreferenceStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _marker: PhantomData,
        }
    }

    /// The bound key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the value, `None` if absent or unreadable.
    pub async fn load(&self) -> Option<T> {
        let raw = self.store.load(&self.key).await?;
        match serde_json::from_value(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring unreadable preference '{}': {}", self.key, e);
                None
            }
        }
    }

    /// Stores the value.
    pub async fn save(&self, value: &T) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_value(value)?;
        self.store.save(&self.key, Some(raw)).await;
        Ok(())
    }

    /// Deletes the value.
    pub async fn clear(&self) {
        self.store.save(&self.key, None).await;
    }
}

impl<T> std::fmt::Debug for Preference<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preference").field("key", &self.key).finish()
    }
}
