//! In-process asset store for local runs and tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::{AssetStore, ResourceType, StoreError, UploadOptions, UploadResult};

/// One call observed by [`MemoryAssetStore`], successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Upload {
        source: PathBuf,
        folder: String,
        resource_type: ResourceType,
        succeeded: bool,
    },
    Destroy {
        public_id: String,
        resource_type: ResourceType,
        succeeded: bool,
    },
}

#[derive(Debug)]
struct StoredObject {
    size: usize,
    content_type: Option<String>,
}

/// Number of calls the journal keeps before dropping the oldest.
pub const DEFAULT_CALL_LOG_LIMIT: usize = 1024;

struct State {
    objects: HashMap<String, StoredObject>,
    calls: VecDeque<StoreCall>,
    call_log_limit: usize,
    fail_uploads: bool,
    upload_delay: Option<Duration>,
    failing_destroys: HashSet<String>,
    next_id: u64,
}

impl State {
    fn record(&mut self, call: StoreCall) {
        if self.call_log_limit == 0 {
            return;
        }
        while self.calls.len() >= self.call_log_limit {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            calls: VecDeque::new(),
            call_log_limit: DEFAULT_CALL_LOG_LIMIT,
            fail_uploads: false,
            upload_delay: None,
            failing_destroys: HashSet::new(),
            next_id: 0,
        }
    }
}

/// Keeps uploaded bytes' metadata in memory and journals the most recent calls.
///
/// Failures and slow uploads can be switched on to exercise outage handling.
#[derive(Default)]
pub struct MemoryAssetStore {
    state: Mutex<State>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` journaled calls; zero disables the journal.
    pub fn with_call_log_limit(limit: usize) -> Self {
        let store = Self::default();
        store.state().call_log_limit = limit;
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold every subsequent upload for `delay` before it does any work.
    pub fn delay_uploads(&self, delay: Option<Duration>) {
        self.state().upload_delay = delay;
    }

    /// Make every subsequent upload fail (or succeed again).
    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    /// Make destroy calls for `public_id` fail.
    pub fn fail_destroy_of(&self, public_id: impl Into<String>) {
        self.state().failing_destroys.insert(public_id.into());
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.iter().cloned().collect()
    }

    /// Identifiers passed to `destroy`, in call order.
    pub fn destroy_calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Destroy { public_id, .. } => Some(public_id.clone()),
                StoreCall::Upload { .. } => None,
            })
            .collect()
    }

    /// Staged files handed to `upload`, in call order.
    pub fn upload_sources(&self) -> Vec<PathBuf> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Upload { source, .. } => Some(source.clone()),
                StoreCall::Destroy { .. } => None,
            })
            .collect()
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.state().objects.contains_key(public_id)
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Size and content type recorded for a stored object.
    pub fn object_info(&self, public_id: &str) -> Option<(usize, Option<String>)> {
        self.state()
            .objects
            .get(public_id)
            .map(|object| (object.size, object.content_type.clone()))
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn upload(
        &self,
        source: &Path,
        content_type: Option<&str>,
        options: &UploadOptions,
    ) -> Result<UploadResult, StoreError> {
        let delay = self.state().upload_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let bytes = tokio::fs::read(source).await;

        let mut state = self.state();
        let succeeded = bytes.is_ok() && !state.fail_uploads;
        state.record(StoreCall::Upload {
            source: source.to_path_buf(),
            folder: options.folder.clone(),
            resource_type: options.resource_type,
            succeeded,
        });

        let bytes = bytes?;
        if state.fail_uploads {
            return Err(StoreError::Unavailable("uploads are disabled".to_string()));
        }

        state.next_id += 1;
        let public_id = format!("{}/asset-{}", options.folder, state.next_id);
        state.objects.insert(
            public_id.clone(),
            StoredObject {
                size: bytes.len(),
                content_type: content_type.map(str::to_string),
            },
        );

        Ok(UploadResult {
            secure_url: format!("memory://{}/{}", options.resource_type.as_str(), public_id),
            public_id,
        })
    }

    async fn destroy(
        &self,
        public_id: &str,
        resource_type: ResourceType,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let succeeded = !state.failing_destroys.contains(public_id);
        state.record(StoreCall::Destroy {
            public_id: public_id.to_string(),
            resource_type,
            succeeded,
        });

        if !succeeded {
            return Err(StoreError::Unavailable(format!(
                "destroy of '{}' failed",
                public_id
            )));
        }

        state.objects.remove(public_id);
        Ok(())
    }
}
