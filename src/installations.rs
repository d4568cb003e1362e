//! Accounts that have the App installed, cached between pushes.

use async_trait::async_trait;
use octocrab::models::AppId;
use octocrab::Octocrab;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RelayError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait InstallationSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>, RelayError>;
}

/// Fixed target list, used when the service has no App credentials.
#[derive(Debug, Clone)]
pub struct StaticInstallations(pub Vec<String>);

#[async_trait]
impl InstallationSource for StaticInstallations {
    async fn fetch(&self) -> Result<Vec<String>, RelayError> {
        Ok(self.0.clone())
    }
}

/// Lists `/app/installations` as the App.
pub struct AppInstallations {
    octocrab: Octocrab,
}

impl AppInstallations {
    pub fn new(api_base: &str, app_id: u64, private_key_pem: &str) -> Result<Self, RelayError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
        let octocrab = Octocrab::builder()
            .base_uri(api_base)?
            .app(AppId(app_id), key)
            .build()?;
        Ok(Self { octocrab })
    }
}

#[async_trait]
impl InstallationSource for AppInstallations {
    async fn fetch(&self) -> Result<Vec<String>, RelayError> {
        let first = self
            .octocrab
            .apps()
            .installations()
            .per_page(100)
            .send()
            .await?;
        let installations = self.octocrab.all_pages(first).await?;
        Ok(installations
            .into_iter()
            .map(|installation| installation.account.login)
            .collect())
    }
}

struct Entry {
    targets: Vec<String>,
    fetched_at: Instant,
}

/// Shared, periodically refreshed list of installation targets.
///
/// At most one refresh runs at a time. Callers that lose the race get the
/// previous list, or wait up to `max_wait` when there is none yet.
pub struct InstallationCache {
    source: Arc<dyn InstallationSource>,
    refresh_interval: Duration,
    max_wait: Duration,
    value: RwLock<Option<Entry>>,
    refresh_lock: Mutex<()>,
}

impl InstallationCache {
    pub fn new(
        source: Arc<dyn InstallationSource>,
        refresh_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            source,
            refresh_interval,
            max_wait,
            value: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The cached list without triggering a refresh.
    pub fn peek(&self) -> Option<Vec<String>> {
        self.read(|entry| entry.targets.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let guard = self.value.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(f)
    }

    fn fresh(&self) -> Option<Vec<String>> {
        let refresh_interval = self.refresh_interval;
        self.read(|entry| {
            (entry.fetched_at.elapsed() < refresh_interval).then(|| entry.targets.clone())
        })
        .flatten()
    }

    pub async fn get(&self) -> Result<Vec<String>, RelayError> {
        if let Some(targets) = self.fresh() {
            return Ok(targets);
        }

        match self.refresh_lock.try_lock() {
            Ok(_guard) => {
                if let Some(targets) = self.fresh() {
                    return Ok(targets);
                }
                self.refresh().await
            }
            Err(_) => {
                if let Some(targets) = self.peek() {
                    debug!("Installation refresh in progress, serving stale list");
                    return Ok(targets);
                }
                self.wait_for_value().await
            }
        }
    }

    async fn refresh(&self) -> Result<Vec<String>, RelayError> {
        match self.source.fetch().await {
            Ok(targets) => {
                info!("Refreshed installation targets ({} accounts)", targets.len());
                let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
                *guard = Some(Entry {
                    targets: targets.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(targets)
            }
            Err(e) => match self.peek() {
                Some(stale) => {
                    warn!("Installation refresh failed, keeping previous list: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    async fn wait_for_value(&self) -> Result<Vec<String>, RelayError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(targets) = self.peek() {
                return Ok(targets);
            }
            if Instant::now() >= deadline {
                return Err(RelayError::CacheUnavailable(format!(
                    "no installation list after {:?}",
                    self.max_wait
                )));
            }
        }
    }
}
