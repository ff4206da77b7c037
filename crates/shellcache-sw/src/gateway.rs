//! The offline cache gateway: install, activate and fetch handlers.
//!
//! Routing for controlled GET requests:
//!
//! - backend URLs go to the network first and fall back to the cache;
//! - everything else is served from the cache first, and on a miss is
//!   fetched and written through into the current generation.
//!
//! Non-GET requests, and every request seen before activation, go straight
//! to the network.

use std::sync::Arc;

use futures::future::try_join_all;
use shellcache_net::{Fetcher, NetError, Request, Response, UrlPattern};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{Cache, CacheEntry, SharedCacheStorage};
use crate::clients::Clients;
use crate::config::{AssetManifest, GatewayConfig};
use crate::{ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerState};

/// Offline cache gateway for one version of the application shell.
pub struct ShellCacheGateway {
    cache_name: String,
    manifest: AssetManifest,
    backend: UrlPattern,
    skip_waiting: bool,
    fetcher: Arc<dyn Fetcher>,
    caches: SharedCacheStorage,
    clients: Arc<RwLock<Clients>>,
    state: RwLock<ServiceWorkerState>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ShellCacheGateway {
    /// Create a gateway over shared cache storage.
    pub fn new(
        config: &GatewayConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: SharedCacheStorage,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        let manifest = config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                cache_name: config.cache_name(),
                manifest,
                backend: config.backend.clone(),
                skip_waiting: config.skip_waiting,
                fetcher,
                caches,
                clients: Arc::new(RwLock::new(Clients::new())),
                state: RwLock::new(ServiceWorkerState::Parsed),
                event_tx,
            },
            event_rx,
        ))
    }

    /// Name of the generation this gateway installs and serves from.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    pub fn caches(&self) -> SharedCacheStorage {
        Arc::clone(&self.caches)
    }

    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    // ==================== Lifecycle ====================

    /// Bring the gateway up: reuse a complete persisted generation if there
    /// is one, otherwise install. Activates afterwards when `skip_waiting`
    /// is set. Does nothing once activated.
    pub async fn start(&self) -> Result<(), ServiceWorkerError> {
        match self.state().await {
            ServiceWorkerState::Activated => return Ok(()),
            ServiceWorkerState::Installed => {}
            _ => {
                if !self.resume().await? {
                    self.install().await?;
                }
            }
        }
        if self.skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    /// Adopt the current generation from storage if it holds every
    /// manifest URL, moving straight to `Installed` without any fetches.
    ///
    /// Returns whether the generation was adopted.
    pub async fn resume(&self) -> Result<bool, ServiceWorkerError> {
        let complete = {
            let caches = self.caches.read().await;
            caches.get(&self.cache_name).is_some_and(|cache| {
                self.manifest
                    .iter()
                    .all(|url| cache.match_request(url).is_some())
            })
        };
        if !complete {
            return Ok(false);
        }

        self.transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installed)
            .await?;
        info!(generation = %self.cache_name, "Resumed persisted generation");
        Ok(true)
    }

    /// Install handler: pre-cache the manifest into the current generation.
    ///
    /// Every manifest URL must fetch with a 2xx status; otherwise nothing is
    /// committed and the worker becomes redundant.
    #[instrument(skip(self), fields(generation = %self.cache_name))]
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.transition(
            &[ServiceWorkerState::Parsed, ServiceWorkerState::Redundant],
            ServiceWorkerState::Installing,
        )
        .await?;

        let created = {
            let mut caches = self.caches.write().await;
            let existed = caches.has(&self.cache_name);
            caches.open(&self.cache_name);
            !existed
        };

        match self.precache().await {
            Ok(count) => {
                info!(assets = count, "Install complete");
                self.set_state(ServiceWorkerState::Installed).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Install failed");
                if created {
                    let mut caches = self.caches.write().await;
                    if caches.get(&self.cache_name).is_some_and(Cache::is_empty) {
                        caches.delete(&self.cache_name);
                    }
                }
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let fetches = self.manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response =
                self.fetcher
                    .fetch(&request)
                    .await
                    .map_err(|source| ServiceWorkerError::InstallFailed {
                        url: url.to_string(),
                        source,
                    })?;

            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    url: url.to_string(),
                    source: NetError::HttpStatus {
                        url: url.to_string(),
                        status: response.status,
                    },
                });
            }

            debug!(url = %url, status = %response.status, "Pre-cached asset");
            Ok::<_, ServiceWorkerError>(CacheEntry::from_response(url, &response))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.caches.write().await.put_all(&self.cache_name, entries)?;
        Ok(count)
    }

    /// Activate handler: delete every other generation and claim all
    /// clients.
    ///
    /// Returns the names of the deleted generations.
    #[instrument(skip(self), fields(generation = %self.cache_name))]
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.transition(&[ServiceWorkerState::Installed], ServiceWorkerState::Activating)
            .await?;

        let deleted: Vec<String> = {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| *name != self.cache_name)
                .map(str::to_string)
                .collect();
            for name in &stale {
                caches.delete(name);
            }
            stale
        };

        for name in &deleted {
            info!(stale = %name, "Deleted old cache generation");
            self.emit(ServiceWorkerEvent::GenerationDeleted { name: name.clone() });
        }

        let claimed = self.clients.write().await.claim(&self.cache_name);
        for client_id in claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                generation: self.cache_name.clone(),
            });
        }

        self.set_state(ServiceWorkerState::Activated).await;
        info!(swept = deleted.len(), "Activated");
        Ok(deleted)
    }

    // ==================== Fetch ====================

    /// Fetch handler.
    ///
    /// Errors are the network error of the last attempt when no cached
    /// fallback exists.
    #[instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        if !request.is_get() {
            debug!("Non-GET request, passing through");
            return Ok(self.fetcher.fetch(request).await?);
        }

        if self.state().await != ServiceWorkerState::Activated {
            debug!("Gateway not active, passing through");
            return Ok(self.fetcher.fetch(request).await?);
        }

        if self.backend.matches(&request.url) {
            self.network_first(request).await
        } else {
            self.cache_first(request).await
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                debug!(status = %response.status, "Live response from network");
                Ok(response)
            }
            Err(err) => match self.lookup(&request.url).await {
                Some(cached) => {
                    debug!(error = %err, "Network failed, serving cached response");
                    Ok(cached)
                }
                None => {
                    debug!(error = %err, "Network failed, nothing cached");
                    Err(err.into())
                }
            },
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        if let Some(cached) = self.lookup(&request.url).await {
            debug!("Cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        // Only 2xx responses are written through; error statuses reach the caller uncached.
        if response.ok() {
            self.write_through(&request.url, &response).await;
        } else {
            debug!(status = %response.status, "Not caching unsuccessful response");
        }
        Ok(response)
    }

    async fn lookup(&self, url: &Url) -> Option<Response> {
        let caches = self.caches.read().await;
        caches
            .match_request(url, Some(&self.cache_name))
            .map(CacheEntry::to_response)
    }

    async fn write_through(&self, url: &Url, response: &Response) {
        let entry = CacheEntry::from_response(url, response);
        let result = self.caches.write().await.put(&self.cache_name, entry);

        match result {
            Ok(()) => debug!("Stored response in cache"),
            Err(e) => {
                warn!(error = %e, "Cache write failed, response still delivered");
                self.emit(ServiceWorkerEvent::CacheWriteFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    // ==================== Helpers ====================

    async fn transition(
        &self,
        allowed: &[ServiceWorkerState],
        next: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            if !allowed.contains(&*state) {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot move {} from {:?} to {:?}",
                    self.cache_name, *state, next
                )));
            }
            *state = next;
        }
        self.emit_state(next);
        Ok(())
    }

    async fn set_state(&self, next: ServiceWorkerState) {
        *self.state.write().await = next;
        self.emit_state(next);
    }

    fn emit_state(&self, new_state: ServiceWorkerState) {
        debug!(generation = %self.cache_name, state = ?new_state, "State change");
        self.emit(ServiceWorkerEvent::StateChange {
            generation: self.cache_name.clone(),
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}
