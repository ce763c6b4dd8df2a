//! In-process cache storage, for tests and hosts without a database.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::entry::{lookup, CachedResponse, StoredEntry};
use super::storage::{CacheStorage, WriteMode};
use crate::http::Request;

/// Storage that keeps every generation in memory.
#[derive(Default)]
pub struct MemoryStorage {
  /// Stores in creation order, entries keyed by request hash
  caches: Mutex<Vec<(String, HashMap<String, StoredEntry>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<(String, HashMap<String, StoredEntry>)>>> {
    self.caches.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Number of entries in a store, or None if it does not exist.
  pub fn entry_count(&self, name: &str) -> Result<Option<usize>> {
    let caches = self.lock()?;
    Ok(
      caches
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, entries)| entries.len()),
    )
  }
}

fn open_in<'a>(
  caches: &'a mut Vec<(String, HashMap<String, StoredEntry>)>,
  name: &str,
) -> &'a mut HashMap<String, StoredEntry> {
  let index = match caches.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      caches.push((name.to_string(), HashMap::new()));
      caches.len() - 1
    }
  };
  &mut caches[index].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self.lock()?;
    open_in(&mut caches, name);
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.iter().any(|(n, _)| n == name))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self.lock()?;
    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    Ok(caches.len() != before)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let caches = self.lock()?;
    let entry = caches
      .iter()
      .find(|(n, _)| n == name)
      .and_then(|(_, entries)| lookup(entries.values(), request))
      .cloned();
    drop(caches);

    entry.map(StoredEntry::into_cached).transpose()
  }

  fn put_entries(&self, name: &str, entries: Vec<StoredEntry>, mode: WriteMode) -> Result<()> {
    let mut caches = self.lock()?;
    let store = match mode {
      WriteMode::Create => open_in(&mut caches, name),
      WriteMode::Existing => caches
        .iter_mut()
        .find(|(n, _)| n == name)
        .map(|(_, store)| store)
        .ok_or_else(|| eyre!("Cache '{}' does not exist", name))?,
    };
    for entry in entries {
      store.insert(entry.key.clone(), entry);
    }
    Ok(())
  }
}
