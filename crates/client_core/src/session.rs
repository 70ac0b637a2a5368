//! Explicit wiring of store, REST client, transport and routing.

use std::{sync::Arc, time::Duration};

use shared::frame::DEFAULT_NAMESPACE;
use tokio::sync::watch;
use tracing::info;

use crate::{
    error::ClientError,
    rest::RestClient,
    router::{EventRouter, RouterHandle},
    store::{Store, Transition},
    transport::{BackoffPolicy, Transport, TransportConfig},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub namespace: String,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            request_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One client session against a control server.
///
/// `start` must be called from inside a tokio runtime. Call
/// [`CueSession::shutdown`] to stop it; dropping it aborts the background
/// tasks without the orderly close.
pub struct CueSession {
    store: Arc<Store>,
    rest: RestClient,
    transport: Transport,
    router: RouterHandle,
    bridge: RouterHandle,
}

impl CueSession {
    pub fn start(config: SessionConfig) -> Result<Self, ClientError> {
        let store = Arc::new(Store::new());
        let rest = RestClient::with_timeout(
            config.server_url.clone(),
            config.request_timeout,
            Arc::clone(&store),
        )?;

        let mut transport_config = TransportConfig::new(config.server_url.clone());
        transport_config.namespace = config.namespace;
        transport_config.backoff = config.backoff;
        let transport = Transport::spawn(transport_config)?;

        let router = EventRouter::attach(transport.subscribe_frames(), Arc::clone(&store));
        let bridge = EventRouter::bridge_connectivity(transport.connectivity(), Arc::clone(&store));

        info!(server_url = %rest.base_url(), "session: started");
        Ok(Self {
            store,
            rest,
            transport,
            router,
            bridge,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.transport.connectivity()
    }

    /// Initial or post-reconnect resync; see [`RestClient::sync_all`].
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.rest.sync_all().await
    }

    pub async fn shutdown(self) {
        let Self {
            store,
            rest: _,
            mut transport,
            router,
            bridge,
        } = self;

        router.detach();
        bridge.detach();
        transport.close().await;
        store.dispatch(Transition::SetConnected(false));
        store.close();
        info!("session: stopped");
    }
}
