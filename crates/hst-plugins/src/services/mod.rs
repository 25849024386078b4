//! Host-side establishment of host services for a worker.
//!
//! [`HostServiceRegistry`] binds the host's capability server to a fresh
//! channel in a worker's session, tells the worker to dial it, and records
//! the identity the worker minted in the shared [`ActiveClients`] registry.
//! Only once that identity is registered is the channel bound to it, so a
//! worker can never reach file handles owned by another connection.
//! Workers that did not announce [`Capability::HostServices`] in their
//! hello are skipped without error.

use std::sync::Arc;

use hst_broker::{CallContext, Capability};
use hst_hostserve::{ActiveClients, ClientBinding, ClientId, HostServices, serve_host_services};
use tracing::{debug, info, warn};

use crate::error::{EstablishError, ForwardCallError};
use crate::filelister::FileListerClient;
use crate::session::PluginPeer;


const SERVICES_TARGET: &str = "hst_plugins::services";

/// Shares one set of host capabilities with every worker.
pub struct HostServiceRegistry {
    services: Arc<dyn HostServices>,
    clients: Arc<ActiveClients>,
}

impl HostServiceRegistry {
    /// Creates a registry exposing `services`.
    #[must_use]
    pub fn new(services: Arc<dyn HostServices>) -> Self {
        Self {
            services,
            clients: Arc::new(ActiveClients::new()),
        }
    }

    /// Returns the live reverse connections across all workers.
    #[must_use]
    pub fn clients(&self) -> &ActiveClients {
        &self.clients
    }

    /// Connects `peer` to host services.
    ///
    /// Returns `Ok(None)` when the peer does not use host services. On
    /// success the worker holds a live reverse connection and the returned
    /// identity is registered as owned by the peer.
    ///
    /// # Errors
    ///
    /// Returns [`EstablishError::Allocation`], [`EstablishError::Listen`],
    /// [`EstablishError::Notify`] or [`EstablishError::PeerDial`] naming the
    /// step that failed, and [`EstablishError::Registry`] if the identity
    /// is already taken. In the last case the worker is told to drop the
    /// connection it just made. The session stays usable in every case.
    pub fn establish(
        &self,
        ctx: &CallContext,
        peer: &dyn PluginPeer,
        lister: &FileListerClient,
    ) -> Result<Option<ClientId>, EstablishError> {
        let plugin = peer.name();
        if !peer.capabilities().supports(Capability::HostServices) {
            debug!(target: SERVICES_TARGET, plugin, "plugin does not use host services");
            return Ok(None);
        }

        let broker = peer.broker();
        let channel = broker
            .allocate()
            .map_err(|source| EstablishError::Allocation { source })?;
        let services = Arc::clone(&self.services);
        let clients = Arc::clone(&self.clients);
        let binding = ClientBinding::new();
        let server_binding = binding.clone();
        broker
            .listen(channel, move |connection| {
                serve_host_services(connection, services, server_binding, &clients);
            })
            .map_err(|source| EstablishError::Listen { channel, source })?;

        let client_id = lister
            .notify_host_service_channel(ctx, channel)
            .map_err(|err| match err {
                ForwardCallError::Rpc(source) => EstablishError::Notify { channel, source },
                ForwardCallError::Plugin { message } => {
                    EstablishError::PeerDial { channel, message }
                }
            })?;
        if let Err(err) = self.clients.add(client_id, plugin) {
            warn!(
                target: SERVICES_TARGET,
                plugin,
                client_id = %client_id,
                error = %err,
                "rejecting host services identity"
            );
            Self::abandon(ctx, plugin, lister);
            return Err(err.into());
        }
        if !binding.bind(client_id) {
            warn!(target: SERVICES_TARGET, plugin, channel = %channel, "channel was already bound");
        }
        info!(
            target: SERVICES_TARGET,
            plugin,
            channel = %channel,
            client_id = %client_id,
            "host services established"
        );
        Ok(Some(client_id))
    }

    /// Asks the worker to drop a reverse connection the host will not
    /// register.
    fn abandon(ctx: &CallContext, plugin: &str, lister: &FileListerClient) {
        match lister.teardown(ctx) {
            Ok(disconnected) => {
                debug!(
                    target: SERVICES_TARGET,
                    plugin,
                    disconnected,
                    "unregistered connection dropped"
                );
            }
            Err(err) => {
                warn!(
                    target: SERVICES_TARGET,
                    plugin,
                    error = %err,
                    "could not drop unregistered connection"
                );
            }
        }
    }

    /// Tears down `peer`'s reverse connection, best-effort.
    ///
    /// A peer without host services is left alone. Failures are logged,
    /// never returned: the worker is about to be stopped either way.
    pub fn disconnect(
        &self,
        ctx: &CallContext,
        peer: &dyn PluginPeer,
        lister: &FileListerClient,
        client_id: Option<ClientId>,
    ) {
        let plugin = peer.name();
        if !peer.capabilities().supports(Capability::HostServices) {
            return;
        }
        match lister.teardown(ctx) {
            Ok(disconnected) => {
                debug!(target: SERVICES_TARGET, plugin, disconnected, "host services torn down");
            }
            Err(err) => {
                warn!(target: SERVICES_TARGET, plugin, error = %err, "teardown failed");
            }
        }
        if let Some(owner) = client_id.and_then(|id| self.clients.remove(id)) {
            debug!(target: SERVICES_TARGET, plugin, %owner, "client unregistered");
        }
    }
}

impl std::fmt::Debug for HostServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServiceRegistry")
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}
