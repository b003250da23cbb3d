use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tabwire_core::{Error, Message, Result};

/// Opaque tab identifier assigned by the browser.
pub type TabHandle = i64;

/// The browser boundary: tab creation/teardown, per-tab delivery, and the
/// stream of load-complete signals. Implemented by the WebSocket bridge
/// in production and by in-memory fakes in tests.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn create_tab(&self, url: &str) -> Result<TabHandle>;

    async fn close_tab(&self, handle: TabHandle) -> Result<()>;

    /// Delivery is ordered per tab by the underlying transport.
    async fn send_to_tab(&self, handle: TabHandle, message: Message) -> Result<()>;

    /// Load-complete signals for all tabs; receivers filter by handle.
    fn subscribe_loads(&self) -> broadcast::Receiver<TabHandle>;
}

#[derive(Debug, Clone)]
struct TabEntry {
    handle: TabHandle,
    loaded: bool,
}

/// Owns the mapping from logical tab name to live tab handle. No other
/// component mutates entries.
pub struct TabRegistry {
    driver: Arc<dyn BrowserDriver>,
    tabs: Mutex<HashMap<String, TabEntry>>,
    // Serializes creations so two racing opens of one name cannot both
    // miss the lookup and double-create.
    open_lock: tokio::sync::Mutex<()>,
    load_timeout: Duration,
}

impl TabRegistry {
    pub fn new(driver: Arc<dyn BrowserDriver>, load_timeout: Duration) -> Self {
        Self {
            driver,
            tabs: Mutex::new(HashMap::new()),
            open_lock: tokio::sync::Mutex::new(()),
            load_timeout,
        }
    }

    /// Opens a tab at `url` under the logical name `name` and resolves
    /// once that tab's load-complete signal fires. Idempotent: a name
    /// already tracked returns its existing handle without touching the
    /// browser.
    pub async fn open_tab(&self, url: &str, name: &str) -> Result<TabHandle> {
        if let Some(handle) = self.resolve(name) {
            debug!(name = %name, handle, "Tab already open");
            return Ok(handle);
        }

        let _guard = self.open_lock.lock().await;
        // Re-check under the lock: a racing open may have won.
        if let Some(handle) = self.resolve(name) {
            return Ok(handle);
        }

        // Subscribe before creating so the load signal cannot slip past.
        let mut loads = self.driver.subscribe_loads();
        let handle = self.driver.create_tab(url).await?;
        self.tabs.lock().unwrap().insert(
            name.to_string(),
            TabEntry {
                handle,
                loaded: false,
            },
        );

        let this_tab_loaded = async {
            loop {
                match loads.recv().await {
                    // Another tab finishing to load must not resolve us.
                    Ok(h) if h == handle => break Ok(()),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Load event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break Err(Error::TabOperation(
                            "browser driver stopped emitting load events".to_string(),
                        ))
                    }
                }
            }
        };
        match tokio::time::timeout(self.load_timeout, this_tab_loaded).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::TabOperation(format!(
                    "tab {} did not finish loading within {:?}",
                    name, self.load_timeout
                )))
            }
        }
        // The subscription is dropped here; nothing keeps listening.

        if let Some(entry) = self.tabs.lock().unwrap().get_mut(name) {
            entry.loaded = true;
        }
        info!(name = %name, handle, "Tab opened and loaded");
        Ok(handle)
    }

    /// Closes the named tab. An unknown name is a logged no-op.
    pub async fn close_tab(&self, name: &str) -> Result<()> {
        let handle = self.tabs.lock().unwrap().get(name).map(|e| e.handle);
        let Some(handle) = handle else {
            warn!(name = %name, "Tab not registered, nothing to close");
            return Ok(());
        };
        // Entry stays registered if the browser refuses; the caller
        // decides whether to retry.
        self.driver.close_tab(handle).await?;
        self.tabs.lock().unwrap().remove(name);
        info!(name = %name, handle, "Tab closed");
        Ok(())
    }

    /// Delivers a message to the named tab.
    pub async fn send(&self, name: &str, message: Message) -> Result<()> {
        let handle = self
            .resolve(name)
            .ok_or_else(|| Error::TabOperation(format!("tab {} is not registered", name)))?;
        self.driver.send_to_tab(handle, message).await
    }

    pub fn resolve(&self, name: &str) -> Option<TabHandle> {
        self.tabs.lock().unwrap().get(name).map(|e| e.handle)
    }

    /// Answers "what is my logical name" queries coming from inside a
    /// tab.
    pub fn resolve_reverse(&self, handle: TabHandle) -> Option<String> {
        self.tabs
            .lock()
            .unwrap()
            .iter()
            .find(|(_, entry)| entry.handle == handle)
            .map(|(name, _)| name.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.tabs
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.loaded)
            .unwrap_or(false)
    }
}
