//! Debounced persistence of a serializable options blob into the preset
//! store. Mirrors the usual pattern: every change schedules a save 300 ms
//! out; changes arriving while one is pending are picked up by it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::storage::Storage;

const SAVE_DELAY: Duration = Duration::from_millis(300);

pub struct SaveHelper {
    key: String,
    storage: Arc<Storage>,
    disable_saving: Arc<AtomicBool>,
    pending: Arc<AtomicU64>,
}

impl SaveHelper {
    pub fn new(key: impl Into<String>, storage: Arc<Storage>) -> Self {
        Self {
            key: key.into(),
            storage,
            disable_saving: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn has_saved_data(&self) -> bool {
        self.storage.contains(&self.key)
    }

    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        let data = self.storage.get(&self.key)?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("cannot load data: {e}");
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, value: &T) {
        if self.disable_saving.load(Ordering::Acquire) {
            return;
        }
        match serde_json::to_string(value) {
            Ok(data) => self.storage.set(&self.key, &data),
            Err(e) => log::warn!("cannot save data: {e}"),
        }
    }

    /// Schedules a debounced save. The snapshot closure runs after the
    /// delay, so it observes the latest state; a newer call supersedes an
    /// older pending one.
    pub fn save_later<T, F>(&self, snapshot: F)
    where
        T: Serialize,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        let ticket = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        let pending = Arc::clone(&self.pending);
        let disable = Arc::clone(&self.disable_saving);
        let storage = Arc::clone(&self.storage);
        let key = self.key.clone();

        std::thread::spawn(move || {
            std::thread::sleep(SAVE_DELAY);
            if pending.load(Ordering::Acquire) != ticket || disable.load(Ordering::Acquire) {
                return;
            }
            let value = match snapshot() {
                Some(v) => v,
                None => return,
            };
            match serde_json::to_string(&value) {
                Ok(data) => storage.set(&key, &data),
                Err(e) => log::warn!("cannot save data: {e}"),
            }
        });
    }

    /// Runs `f` with saving suppressed; used while resetting or loading.
    pub fn without_saving(&self, f: impl FnOnce()) {
        self.disable_saving.store(true, Ordering::Release);
        f();
        self.disable_saving.store(false, Ordering::Release);
    }
}
