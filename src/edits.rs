use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEdit<V> {
    pub value: V,
    /// Authoritative value when the edit was staged; `None` if there was none.
    pub base: Option<V>,
    /// Set when a refresh showed the authoritative value moved away from `base`.
    pub conflict: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport<K> {
    pub succeeded: usize,
    pub failed: Vec<K>,
}

/// Per-key result of the bulk call as reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkResult<K> {
    /// `None` when the remote side cannot report per-entry results.
    pub failed: Option<Vec<K>>,
}

#[derive(Debug, Error)]
pub enum CommitError<K: fmt::Debug> {
    /// The bulk call itself was rejected; nothing was applied.
    #[error("bulk commit rejected: {source}")]
    Dispatch { failed: Vec<K>, source: SyncError },

    /// The bulk call went through but the follow-up refresh failed. Edits stay
    /// staged until a refresh confirms them.
    #[error("commit sent but refresh failed: {source}")]
    Refresh {
        report: CommitReport<K>,
        source: SyncError,
    },
}

impl<K: fmt::Debug> CommitError<K> {
    pub fn source_error(&self) -> &SyncError {
        match self {
            CommitError::Dispatch { source, .. } | CommitError::Refresh { source, .. } => source,
        }
    }
}

/// Locally staged values awaiting one bulk commit. Never merged into the
/// record store; they only become authoritative through a refresh.
#[derive(Debug, Clone)]
pub struct EditBuffer<K, V> {
    entries: BTreeMap<K, StagedEdit<V>>,
}

impl<K: Ord, V> Default for EditBuffer<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K, V> EditBuffer<K, V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `value` for `key`. Re-staging keeps the original base so a
    /// conflict is still judged against what the user first saw, unless the
    /// entry is in conflict: then the new `base` is taken and the flag cleared.
    pub fn set(&mut self, key: K, value: V, base: Option<V>) {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.value = value;
                if existing.conflict {
                    existing.base = base;
                    existing.conflict = false;
                }
            }
            None => {
                self.entries.insert(
                    key,
                    StagedEdit {
                        value,
                        base,
                        conflict: false,
                    },
                );
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&StagedEdit<V>> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<StagedEdit<V>> {
        self.entries.remove(key)
    }

    pub fn discard(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&K, &StagedEdit<V>)> {
        self.entries.iter()
    }

    pub fn conflicts(&self) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, e)| e.conflict)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Re-checks every staged edit against the authoritative value `current`
    /// reports for its key. An edit conflicts when that value moved away from
    /// its base to something other than the staged value. Edits are kept
    /// either way; returns the keys that are now in conflict.
    pub fn reconcile<F>(&mut self, current: F) -> Vec<K>
    where
        F: Fn(&K) -> Option<V>,
    {
        for (key, edit) in self.entries.iter_mut() {
            let now = current(key);
            edit.conflict = now != edit.base && now.as_ref() != Some(&edit.value);
        }
        self.conflicts()
    }

    /// Sends every staged edit in one `dispatch` call, then `refresh`es.
    /// Succeeded entries are removed only once the refresh has landed;
    /// entries the remote side reported as failed stay staged.
    pub async fn commit<D, DF, RF, RFut, T>(
        &mut self,
        dispatch: D,
        refresh: RF,
    ) -> Result<CommitReport<K>, CommitError<K>>
    where
        D: FnOnce(Vec<(K, V)>) -> DF,
        DF: Future<Output = Result<BulkResult<K>, SyncError>>,
        RF: FnOnce() -> RFut,
        RFut: Future<Output = Result<T, SyncError>>,
    {
        if self.entries.is_empty() {
            return Ok(CommitReport {
                succeeded: 0,
                failed: Vec::new(),
            });
        }
        let batch: Vec<(K, V)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        let keys: Vec<K> = batch.iter().map(|(k, _)| k.clone()).collect();

        let outcome = match dispatch(batch).await {
            Ok(v) => v,
            Err(source) => {
                warn!("bulk commit of {} edits rejected: {}", keys.len(), source);
                return Err(CommitError::Dispatch {
                    failed: keys,
                    source,
                });
            }
        };

        // The remote side may list a key more than once.
        let failed: Vec<K> = outcome
            .failed
            .unwrap_or_default()
            .into_iter()
            .filter(|k| self.entries.contains_key(k))
            .collect::<BTreeSet<K>>()
            .into_iter()
            .collect();
        let report = CommitReport {
            succeeded: keys.len() - failed.len(),
            failed,
        };

        if let Err(source) = refresh().await {
            warn!(
                "bulk commit applied {} edits but refresh failed; keeping them staged: {}",
                report.succeeded, source
            );
            return Err(CommitError::Refresh { report, source });
        }

        for key in &keys {
            if !report.failed.contains(key) {
                self.entries.remove(key);
            }
        }
        info!(
            "bulk commit: {} applied, {} still staged",
            report.succeeded,
            report.failed.len()
        );
        Ok(report)
    }
}
