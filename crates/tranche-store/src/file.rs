//! JSON file backed trade store.
//!
//! The whole table is rewritten on every mutation: write to a sibling
//! temp file, then rename over the original, so a crash mid-write leaves
//! the previous table intact.

use crate::error::StoreResult;
use crate::record::TradeRecord;
use crate::store::{BoxFuture, TradeStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct FileStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, TradeRecord>>,
}

impl FileStore {
    /// Open (or create) the table at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let rows = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let list: Vec<TradeRecord> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|r| (r.symbol.clone(), r)).collect()
            }
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), rows = rows.len(), "Trade file opened");
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    async fn persist(&self, rows: &BTreeMap<String, TradeRecord>) -> StoreResult<()> {
        let list: Vec<&TradeRecord> = rows.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(?e, path = %self.path.display(), "Failed to replace trade file");
            return Err(e.into());
        }
        Ok(())
    }
}

impl TradeStore for FileStore {
    fn get(&self, symbol: &str) -> BoxFuture<'_, StoreResult<Option<TradeRecord>>> {
        let symbol = symbol.to_string();
        Box::pin(async move { Ok(self.rows.lock().await.get(&symbol).cloned()) })
    }

    fn upsert(&self, record: TradeRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().await;
            let previous = rows.insert(record.symbol.clone(), record.clone());
            if let Err(e) = self.persist(&rows).await {
                match previous {
                    Some(prev) => rows.insert(record.symbol.clone(), prev),
                    None => rows.remove(&record.symbol),
                };
                return Err(e);
            }
            Ok(())
        })
    }

    fn delete(&self, symbol: &str) -> BoxFuture<'_, StoreResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let mut rows = self.rows.lock().await;
            let Some(previous) = rows.remove(&symbol) else {
                return Ok(());
            };
            if let Err(e) = self.persist(&rows).await {
                rows.insert(symbol, previous);
                return Err(e);
            }
            Ok(())
        })
    }

    fn list_all(&self) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>> {
        Box::pin(async move { Ok(self.rows.lock().await.values().cloned().collect()) })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_position;

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("trades.json");

        let store = FileStore::open(&path).await.unwrap();
        for symbol in ["BTCUSDT", "ETHUSDT"] {
            store
                .upsert(TradeRecord::from_position(&sample_position(symbol)).unwrap())
                .await
                .unwrap();
        }
        tokio_test::assert_ok!(store.delete("ETHUSDT").await);
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        let rows = reopened.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BTCUSDT");
        assert_eq!(
            rows[0].to_position().unwrap(),
            sample_position("BTCUSDT")
        );
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("none.json")).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
        assert!(store.get("BTCUSDT").await.unwrap().is_none());
    }
}
