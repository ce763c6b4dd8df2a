use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use url::Url;

/// Ordered list of assets to precache, resolved against the agent's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  urls: Vec<Url>,
}

impl Manifest {
  pub fn resolve<T: AsRef<str>>(scope: &Url, entries: &[T]) -> Result<Self> {
    let urls = entries
      .iter()
      .map(|entry| {
        let entry = entry.as_ref();
        scope
          .join(entry)
          .map_err(|e| eyre!("Invalid precache entry '{}': {}", entry, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { urls })
  }

  pub fn urls(&self) -> &[Url] {
    &self.urls
  }

  pub fn len(&self) -> usize {
    self.urls.len()
  }

  pub fn is_empty(&self) -> bool {
    self.urls.is_empty()
  }

  /// Two entries resolving to the same request would make the batch ambiguous.
  pub fn ensure_unique(&self) -> Result<()> {
    let mut seen = HashSet::new();
    for url in &self.urls {
      let mut key = url.clone();
      key.set_fragment(None);
      if !seen.insert(key) {
        return Err(eyre!("Duplicate precache entry: {}", url));
      }
    }
    Ok(())
  }
}
