use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{OrgId, SurveyRow};
use crate::source::RowSource;

pub type Rows = Arc<[SurveyRow]>;

type PendingRows = Shared<BoxFuture<'static, Rows>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub org: OrgId,
    pub locator: String,
}

/// Per-(organization, locator) row cache. Concurrent requests for the same key
/// share one fetch; a failed fetch is remembered as an empty file.
pub struct RowCache {
    source: Arc<dyn RowSource>,
    entries: Mutex<HashMap<CacheKey, PendingRows>>,
}

impl RowCache {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn rows(&self, org: &str, locator: &str) -> Rows {
        let key = CacheKey {
            org: org.to_string(),
            locator: locator.to_string(),
        };
        let pending = {
            let mut entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(pending) => {
                    debug!(org, locator, "joining cached survey fetch");
                    pending.clone()
                }
                None => {
                    let pending = Self::fetch(Arc::clone(&self.source), key.clone());
                    entries.insert(key, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn fetch(source: Arc<dyn RowSource>, key: CacheKey) -> PendingRows {
        async move {
            match source.fetch_rows(&key.locator).await {
                Ok(rows) => Rows::from(rows),
                Err(err) => {
                    warn!(
                        org = %key.org,
                        locator = %key.locator,
                        error = %format!("{err:#}"),
                        "survey source unavailable, continuing with no rows"
                    );
                    Rows::from(Vec::new())
                }
            }
        }
        .boxed()
        .shared()
    }

    pub async fn invalidate_org(&self, org: &str) {
        self.entries.lock().await.retain(|key, _| key.org != org);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
