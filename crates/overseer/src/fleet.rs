//! Worker fleet administration: the authoritative in-memory view of workers
//! by (status, region), customer-to-worker assignment, and the outbound
//! command stream that keeps workers configured. The cache and the
//! `server` / `customer_mapping` rows are mutated in lockstep under one lock.

use crate::dispatcher::Dispatcher;
use models::{
    CustomerCapabilities, CustomerId, CustomerMapping, HostScheme, Monitor, RegionId, Server,
    ServerId, ServerStatus,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

const STATE_INACTIVE_ENDPOINT: &str = "/state/inactive";
const REGION_CHANGE_ENDPOINT: &str = "/region/change";
const CUSTOMER_ADD_ENDPOINT: &str = "/customer/add";
const CUSTOMER_REMOVE_ENDPOINT: &str = "/customer/remove";
const CUSTOMER_PAUSE_ENDPOINT: &str = "/customer/pause";

/// Rebuildable snapshot of the `server` table plus derived indices.
#[derive(Debug, Default, Clone)]
pub(crate) struct FleetState {
    servers_by_id: BTreeMap<ServerId, Server>,
    server_id_by_identifier: HashMap<String, ServerId>,
    active_by_region: BTreeMap<RegionId, BTreeSet<ServerId>>,
    inactive_by_region: BTreeMap<RegionId, BTreeSet<ServerId>>,
    defunct_by_region: BTreeMap<RegionId, BTreeSet<ServerId>>,
    /// 0-based index per region with at least one ACTIVE worker, assigned in
    /// region-id-ascending order.
    region_index_by_region: BTreeMap<RegionId, u32>,
}

impl FleetState {
    fn from_servers(servers: Vec<Server>) -> Self {
        let mut state = FleetState::default();
        for server in servers {
            state.insert(server);
        }
        state.rebuild_region_indices();
        state
    }

    fn insert(&mut self, server: Server) {
        self.remove(server.id);
        self.server_id_by_identifier
            .insert(server.identifier.clone(), server.id);
        self.region_table(server.status)
            .entry(server.region_id)
            .or_default()
            .insert(server.id);
        self.servers_by_id.insert(server.id, server);
    }

    fn remove(&mut self, server_id: ServerId) -> Option<Server> {
        let server = self.servers_by_id.remove(&server_id)?;
        self.server_id_by_identifier.remove(&server.identifier);

        let table = self.region_table(server.status);
        if let Some(members) = table.get_mut(&server.region_id) {
            members.remove(&server_id);
            if members.is_empty() {
                table.remove(&server.region_id);
            }
        }
        Some(server)
    }

    fn region_table(
        &mut self,
        status: ServerStatus,
    ) -> &mut BTreeMap<RegionId, BTreeSet<ServerId>> {
        match status {
            ServerStatus::Active => &mut self.active_by_region,
            ServerStatus::Inactive => &mut self.inactive_by_region,
            ServerStatus::Defunct => &mut self.defunct_by_region,
        }
    }

    fn active_region_count(&self) -> usize {
        self.active_by_region.len()
    }

    fn rebuild_region_indices(&mut self) {
        self.region_index_by_region = self
            .active_by_region
            .keys()
            .enumerate()
            .map(|(index, region_id)| (*region_id, index as u32))
            .collect();
    }

    fn get(&self, server_id: ServerId) -> Option<&Server> {
        self.servers_by_id.get(&server_id)
    }

    /// Least-CPU ACTIVE server among `candidates`, honoring exclusions.
    fn least_loaded(
        &self,
        candidates: impl IntoIterator<Item = ServerId>,
        exclusions: &BTreeSet<ServerId>,
    ) -> Option<&Server> {
        candidates
            .into_iter()
            .filter(|server_id| !exclusions.contains(server_id))
            .filter_map(|server_id| self.servers_by_id.get(&server_id))
            .filter(|server| server.status == ServerStatus::Active)
            .min_by(|a, b| {
                a.cpu_loading
                    .total_cmp(&b.cpu_loading)
                    .then(a.id.cmp(&b.id))
            })
    }

    fn least_loaded_overall(&self, exclusions: &BTreeSet<ServerId>) -> Option<&Server> {
        self.least_loaded(self.servers_by_id.keys().copied(), exclusions)
    }

    /// Computes a customer's worker set from its current mapping. Returns
    /// the new mapping and the set of workers that must be told to drop the
    /// customer. Pure with respect to the store.
    pub(crate) fn assign(
        &self,
        current: CustomerMapping,
        multi_region: bool,
        exclusions: &BTreeSet<ServerId>,
    ) -> (CustomerMapping, BTreeSet<ServerId>) {
        let mut members = current.servers.clone();
        let mut primary = current.primary_server_id;
        let mut removed = BTreeSet::new();
        let mut assigned_regions = BTreeSet::new();

        // Prune members that are excluded, unknown, no longer ACTIVE, or
        // redundant within their region.
        for server_id in current.servers.iter().copied() {
            let keep = !exclusions.contains(&server_id)
                && match self.servers_by_id.get(&server_id) {
                    Some(server) if server.status == ServerStatus::Active => {
                        assigned_regions.insert(server.region_id)
                    }
                    _ => false,
                };
            if !keep {
                members.remove(&server_id);
                removed.insert(server_id);
            }
        }

        if multi_region {
            if members.len() != self.active_region_count() {
                for (region_id, candidates) in &self.active_by_region {
                    if assigned_regions.contains(region_id) {
                        continue;
                    }
                    if let Some(server) =
                        self.least_loaded(candidates.iter().copied(), exclusions)
                    {
                        members.insert(server.id);
                    }
                }
            }
        } else if members.len() != 1 {
            match self.least_loaded_overall(exclusions) {
                Some(best) => {
                    let best_id = best.id;
                    removed.extend(members.iter().copied().filter(|id| *id != best_id));
                    members = BTreeSet::from([best_id]);
                }
                None => {
                    removed.extend(members.iter().copied());
                    members.clear();
                }
            }
        }

        if !members.contains(&primary) {
            primary = self
                .least_loaded(members.iter().copied(), &BTreeSet::new())
                .map(|server| server.id)
                .unwrap_or(ServerId::INVALID);
        }

        (CustomerMapping::new(primary, members), removed)
    }
}

pub struct Fleet {
    pool: sqlx::PgPool,
    dispatcher: Arc<Dispatcher>,
    state: tokio::sync::Mutex<Option<FleetState>>,
}

type StateGuard<'a> = tokio::sync::MappedMutexGuard<'a, FleetState>;

impl Fleet {
    pub fn new(pool: sqlx::PgPool, dispatcher: Arc<Dispatcher>) -> Self {
        Fleet {
            pool,
            dispatcher,
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Locks the snapshot, loading it from the store on first use.
    async fn state(&self) -> anyhow::Result<StateGuard<'_>> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            let servers = overseer_sql::servers::fetch_servers(&self.pool).await?;
            *guard = Some(FleetState::from_servers(servers));
        }
        Ok(tokio::sync::MutexGuard::map(guard, |state| {
            state.as_mut().expect("state was just loaded")
        }))
    }

    pub async fn get_server(&self, server_id: ServerId) -> anyhow::Result<Option<Server>> {
        Ok(self.state().await?.get(server_id).cloned())
    }

    pub async fn get_server_by_identifier(
        &self,
        identifier: &str,
    ) -> anyhow::Result<Option<Server>> {
        let state = self.state().await?;
        Ok(state
            .server_id_by_identifier
            .get(identifier)
            .and_then(|server_id| state.get(*server_id))
            .cloned())
    }

    /// Servers, optionally filtered by region and status.
    pub async fn get_servers(
        &self,
        region_id: Option<RegionId>,
        status: Option<ServerStatus>,
    ) -> anyhow::Result<Vec<Server>> {
        let state = self.state().await?;
        Ok(state
            .servers_by_id
            .values()
            .filter(|server| region_id.map_or(true, |region| server.region_id == region))
            .filter(|server| status.map_or(true, |status| server.status == status))
            .cloned()
            .collect())
    }

    /// Creates a worker row and immediately orders the worker inactive; it
    /// must self-introduce before being switched ACTIVE.
    pub async fn create_server(
        &self,
        region_id: RegionId,
        identifier: &str,
        status: ServerStatus,
    ) -> anyhow::Result<Server> {
        let region = overseer_sql::regions::fetch_region(&self.pool, region_id).await?;
        anyhow::ensure!(region.is_some(), "unknown region {region_id}");

        let mut state = self.state().await?;
        let server =
            overseer_sql::servers::create_server(&self.pool, region_id, identifier, status).await?;
        state.insert(server.clone());

        self.send_go_inactive(&server);
        Ok(server)
    }

    /// Modifies a worker. ACTIVE workers may not be modified except through
    /// a status transition.
    pub async fn modify_server(&self, server: Server) -> anyhow::Result<()> {
        let mut state = self.state().await?;
        self.modify_locked(&mut state, server, false).await
    }

    async fn modify_locked(
        &self,
        state: &mut FleetState,
        server: Server,
        force: bool,
    ) -> anyhow::Result<()> {
        let old = state
            .get(server.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {}", server.id))?;
        anyhow::ensure!(
            force || old.status != ServerStatus::Active,
            "can-not modify server {} while it is active",
            server.id,
        );

        let updated = overseer_sql::servers::update_server(&self.pool, &server).await?;
        anyhow::ensure!(updated, "server {} no longer exists", server.id);
        state.insert(server);
        Ok(())
    }

    /// Deletes a worker; only DEFUNCT workers may be deleted.
    pub async fn delete_server(&self, server_id: ServerId) -> anyhow::Result<()> {
        let mut state = self.state().await?;
        let server = state
            .get(server_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {server_id}"))?;
        anyhow::ensure!(
            server.status == ServerStatus::Defunct,
            "server {server_id} is not defunct",
        );

        let deleted = overseer_sql::servers::delete_server(&self.pool, server_id).await?;
        anyhow::ensure!(deleted, "server {server_id} no longer exists");
        state.remove(server_id);
        self.dispatcher.expunge(&server.identifier);
        Ok(())
    }

    pub async fn change_server_status(
        &self,
        server_id: ServerId,
        new_status: ServerStatus,
    ) -> anyhow::Result<()> {
        let mut state = self.state().await?;
        self.change_status_locked(&mut state, server_id, new_status)
            .await
    }

    async fn change_status_locked(
        &self,
        state: &mut FleetState,
        server_id: ServerId,
        new_status: ServerStatus,
    ) -> anyhow::Result<()> {
        let server = state
            .get(server_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {server_id}"))?;
        anyhow::ensure!(
            server.status != new_status,
            "server {server_id} is already {}",
            new_status.as_str(),
        );

        let old_region_count = state.active_region_count();
        let mut updated = server;
        updated.status = new_status;
        self.modify_locked(state, updated.clone(), true).await?;

        let new_region_count = state.active_region_count();
        let mut rebroadcast = false;
        if old_region_count != new_region_count {
            // The set of active regions changed; every active worker learns
            // its (possibly new) region index.
            self.broadcast_region_data(state);
            rebroadcast = new_status == ServerStatus::Active;
        }

        if !rebroadcast {
            match new_status {
                ServerStatus::Active => {
                    match state.region_index_by_region.get(&updated.region_id).copied() {
                        Some(region_index) => {
                            self.send_go_active(&updated, region_index, new_region_count as u32)
                        }
                        None => self.broadcast_region_data(state),
                    }
                }
                ServerStatus::Inactive => self.send_go_inactive(&updated),
                ServerStatus::Defunct => (),
            }
        }

        Ok(())
    }

    /// Worker rejoin path: replays the configuration of every customer the
    /// worker is mapped to, then tells it its region placement.
    pub async fn start_server(&self, server_id: ServerId) -> anyhow::Result<()> {
        let mut state = self.state().await?;
        let server = state
            .get(server_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown server {server_id}"))?;
        anyhow::ensure!(
            server.status == ServerStatus::Active,
            "server {server_id} is not active",
        );
        let region_index = state
            .region_index_by_region
            .get(&server.region_id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("server {server_id} region has no active index"))?;

        let customers =
            overseer_sql::mappings::fetch_customers_for_server(&self.pool, server_id).await?;
        let limit_to = BTreeSet::from([server_id]);

        for customer_id in customers {
            let capabilities =
                overseer_sql::capabilities::fetch_customer_capabilities(&self.pool, customer_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("unknown customer {customer_id}"))?;
            let Some(mapping) =
                overseer_sql::mappings::fetch_mapping(&self.pool, customer_id).await?
            else {
                continue;
            };
            self.apply_customer_activation(
                &mut state,
                &mapping,
                &BTreeSet::new(),
                Some(&limit_to),
                &capabilities,
            )
            .await?;
        }

        let region_count = state.active_region_count() as u32;
        self.send_go_active(&server, region_index, region_count);
        tracing::info!(%server_id, "starting server");
        Ok(())
    }

    /// Recomputes, persists and pushes a customer's worker assignment.
    pub async fn activate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
        let mut state = self.state().await?;
        self.activate_customer_locked(&mut state, customer_id).await
    }

    async fn activate_customer_locked(
        &self,
        state: &mut FleetState,
        customer_id: CustomerId,
    ) -> anyhow::Result<()> {
        let capabilities =
            overseer_sql::capabilities::fetch_customer_capabilities(&self.pool, customer_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unknown customer {customer_id}"))?;

        let current = overseer_sql::mappings::fetch_mapping(&self.pool, customer_id)
            .await?
            .unwrap_or_default();
        let (mapping, removed) = state.assign(
            current,
            capabilities.multi_region_checking,
            &BTreeSet::new(),
        );

        let stored = (!mapping.is_empty()).then_some(&mapping);
        overseer_sql::mappings::update_mapping(&self.pool, customer_id, stored).await?;
        self.apply_customer_activation(state, &mapping, &removed, None, &capabilities)
            .await
    }

    /// Clears a customer's mapping and orders every member to drop it.
    pub async fn deactivate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
        let mut state = self.state().await?;

        let mapping = overseer_sql::mappings::fetch_mapping(&self.pool, customer_id)
            .await?
            .unwrap_or_default();
        overseer_sql::mappings::update_mapping(&self.pool, customer_id, None).await?;

        self.apply_customer_deactivation(&mut state, customer_id, &mapping.servers);
        Ok(())
    }

    /// Pauses or resumes probing for a customer on every assigned worker,
    /// then persists the flag.
    pub async fn set_paused(&self, customer_id: CustomerId, paused: bool) -> anyhow::Result<()> {
        let state = self.state().await?;

        let mut capabilities =
            overseer_sql::capabilities::fetch_customer_capabilities(&self.pool, customer_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unknown customer {customer_id}"))?;
        anyhow::ensure!(
            capabilities.supports_maintenance_mode,
            "customer {customer_id} does not support maintenance mode",
        );

        let mapping = overseer_sql::mappings::fetch_mapping(&self.pool, customer_id)
            .await?
            .unwrap_or_default();
        for server_id in &mapping.servers {
            let server = state.get(*server_id).ok_or_else(|| {
                anyhow::anyhow!(
                    "unable to locate server {server_id} while changing customer {customer_id} pause state"
                )
            })?;
            self.dispatcher.post(
                &server.identifier,
                CUSTOMER_PAUSE_ENDPOINT,
                serde_json::json!({"customer_id": customer_id, "pause": paused}),
                format!("Customer {customer_id} pause state changed to {paused}"),
            );
        }

        capabilities.paused = paused;
        let updated =
            overseer_sql::capabilities::update_customer_capabilities(&self.pool, &capabilities)
                .await?;
        anyhow::ensure!(updated, "customer {customer_id} no longer exists");

        if paused {
            tracing::info!(%customer_id, "paused customer");
        } else {
            tracing::info!(%customer_id, "resumed customer");
        }
        Ok(())
    }

    /// Moves workload off `from_server_id`. With no explicit customer list
    /// the worker is drained: flipped INACTIVE and every mapped customer
    /// redistributed. A non-ACTIVE `to_server_id` takes the load verbatim;
    /// otherwise assignment recomputes with `from_server_id` excluded.
    pub async fn reassign_workload(
        &self,
        from_server_id: ServerId,
        customers: &[CustomerId],
        to_server_id: Option<ServerId>,
    ) -> anyhow::Result<()> {
        let mut state = self.state().await?;

        if let Some(to_server_id) = to_server_id {
            let target = state.get(to_server_id);
            anyhow::ensure!(
                matches!(target, Some(server) if server.status != ServerStatus::Active),
                "reassignment target {to_server_id} must exist and not be active",
            );
        }

        let customers: Vec<CustomerId> = if customers.is_empty() {
            let source_status = state
                .get(from_server_id)
                .map(|server| server.status)
                .ok_or_else(|| anyhow::anyhow!("unknown server {from_server_id}"))?;
            if source_status != ServerStatus::Inactive {
                self.change_status_locked(&mut state, from_server_id, ServerStatus::Inactive)
                    .await?;
            }
            overseer_sql::mappings::fetch_customers_for_server(&self.pool, from_server_id).await?
        } else {
            customers.to_vec()
        };

        for customer_id in customers {
            let Some(capabilities) =
                overseer_sql::capabilities::fetch_customer_capabilities(&self.pool, customer_id)
                    .await?
            else {
                tracing::warn!(%customer_id, "skipping reassignment of unknown customer");
                continue;
            };

            let current = overseer_sql::mappings::fetch_mapping(&self.pool, customer_id)
                .await?
                .unwrap_or_default();

            let (mut mapping, mut removed) = match to_server_id {
                Some(to_server_id) => {
                    let (mut mapping, mut removed) = state.assign(
                        current,
                        capabilities.multi_region_checking,
                        &BTreeSet::new(),
                    );
                    if mapping.servers.remove(&from_server_id) {
                        removed.insert(from_server_id);
                        mapping.servers.insert(to_server_id);
                        if mapping.primary_server_id == from_server_id {
                            mapping.primary_server_id = to_server_id;
                        }
                    }
                    (mapping, removed)
                }
                None => state.assign(
                    current,
                    capabilities.multi_region_checking,
                    &BTreeSet::from([from_server_id]),
                ),
            };

            if !mapping.primary_is_member() {
                mapping.primary_server_id = state
                    .least_loaded(mapping.servers.iter().copied(), &BTreeSet::new())
                    .map(|server| server.id)
                    .or_else(|| mapping.servers.iter().next().copied())
                    .unwrap_or(ServerId::INVALID);
            }
            removed.retain(|server_id| !mapping.servers.contains(server_id));

            let stored = (!mapping.is_empty()).then_some(&mapping);
            overseer_sql::mappings::update_mapping(&self.pool, customer_id, stored).await?;
            self.apply_customer_activation(&mut state, &mapping, &removed, None, &capabilities)
                .await?;

            match to_server_id {
                Some(to_server_id) => tracing::info!(
                    %customer_id, %from_server_id, %to_server_id, "moved customer between servers"
                ),
                None => tracing::info!(%customer_id, %from_server_id, "moved customer off server"),
            }
        }

        Ok(())
    }

    /// Pushes `/customer/add` (and pause state) to every mapping member,
    /// the primary getting the richer body, then `/customer/remove` to the
    /// removed set. `limit_to` restricts delivery to a subset of workers.
    async fn apply_customer_activation(
        &self,
        state: &mut FleetState,
        mapping: &CustomerMapping,
        removed: &BTreeSet<ServerId>,
        limit_to: Option<&BTreeSet<ServerId>>,
        capabilities: &CustomerCapabilities,
    ) -> anyhow::Result<()> {
        let customer_id = capabilities.customer_id;
        let host_schemes =
            overseer_sql::host_schemes::fetch_host_schemes(&self.pool, Some(customer_id)).await?;
        let monitors = overseer_sql::monitors::fetch_monitors(&self.pool, Some(customer_id)).await?;

        let allowed = |server_id: ServerId| {
            limit_to.map_or(true, |limit_to| limit_to.contains(&server_id))
        };
        let member_config =
            build_customer_config(capabilities, false, false, &host_schemes, &monitors);
        let member_body = serde_json::json!({ customer_id.to_string(): member_config });

        for server_id in mapping.servers.iter().copied() {
            if server_id == mapping.primary_server_id || !allowed(server_id) {
                continue;
            }
            if let Some(server) = state.get(server_id) {
                self.dispatcher.post(
                    &server.identifier,
                    CUSTOMER_ADD_ENDPOINT,
                    member_body.clone(),
                    format!("Updated settings for customer {customer_id}"),
                );
                self.send_pause_if_paused(server, capabilities);
            }
        }

        if allowed(mapping.primary_server_id) {
            if let Some(server) = state.get(mapping.primary_server_id) {
                let primary_config = build_customer_config(
                    capabilities,
                    capabilities.supports_ping_based_polling,
                    capabilities.supports_ssl_expiration_checking,
                    &host_schemes,
                    &monitors,
                );
                self.dispatcher.post(
                    &server.identifier,
                    CUSTOMER_ADD_ENDPOINT,
                    serde_json::json!({ customer_id.to_string(): primary_config }),
                    format!("Updated settings for customer {customer_id} - primary server"),
                );
                self.send_pause_if_paused(server, capabilities);
            }
        }

        self.apply_customer_deactivation(state, customer_id, removed);
        Ok(())
    }

    fn apply_customer_deactivation(
        &self,
        state: &mut FleetState,
        customer_id: CustomerId,
        servers: &BTreeSet<ServerId>,
    ) {
        let body = serde_json::json!({"customer_id": customer_id});
        for server_id in servers.iter().copied() {
            if let Some(server) = state.get(server_id) {
                self.dispatcher.post(
                    &server.identifier,
                    CUSTOMER_REMOVE_ENDPOINT,
                    body.clone(),
                    format!("Deactivated customer {customer_id}"),
                );
            }
        }
    }

    fn send_pause_if_paused(&self, server: &Server, capabilities: &CustomerCapabilities) {
        if !capabilities.paused {
            return;
        }
        let customer_id = capabilities.customer_id;
        self.dispatcher.post(
            &server.identifier,
            CUSTOMER_PAUSE_ENDPOINT,
            serde_json::json!({"customer_id": customer_id, "pause": true}),
            format!("Customer {customer_id} pause state set to true"),
        );
    }

    /// Recomputes region indices and tells every ACTIVE worker its new
    /// placement.
    fn broadcast_region_data(&self, state: &mut FleetState) {
        state.rebuild_region_indices();
        let region_count = state.active_region_count() as u32;

        for (region_id, members) in &state.active_by_region {
            let region_index = state.region_index_by_region[region_id];
            for server_id in members {
                if let Some(server) = state.servers_by_id.get(server_id) {
                    self.send_go_active(server, region_index, region_count);
                }
            }
        }
    }

    fn send_go_inactive(&self, server: &Server) {
        self.dispatcher.post_empty(
            &server.identifier,
            STATE_INACTIVE_ENDPOINT,
            "Server going inactive.",
        );
    }

    fn send_go_active(&self, server: &Server, region_index: u32, number_regions: u32) {
        self.dispatcher.post(
            &server.identifier,
            REGION_CHANGE_ENDPOINT,
            serde_json::json!({
                "region_index": region_index,
                "number_regions": number_regions,
            }),
            "Server going active",
        );
    }
}

#[async_trait::async_trait]
impl crate::scheduler::CustomerActivation for Fleet {
    async fn activate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
        Fleet::activate_customer(self, customer_id).await
    }

    async fn deactivate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
        Fleet::deactivate_customer(self, customer_id).await
    }
}

/// Builds the per-customer configuration body pushed as `/customer/add`.
/// `ping` and `ssl_expiration` are only set for the primary worker.
pub(crate) fn build_customer_config(
    capabilities: &CustomerCapabilities,
    ping: bool,
    ssl_expiration: bool,
    host_schemes: &[HostScheme],
    monitors: &[Monitor],
) -> serde_json::Value {
    let mut monitors_by_host_scheme: HashMap<_, Vec<&Monitor>> = HashMap::new();
    for monitor in monitors {
        monitors_by_host_scheme
            .entry(monitor.host_scheme_id)
            .or_default()
            .push(monitor);
    }

    let mut host_schemes_object = serde_json::Map::new();
    for host_scheme in host_schemes {
        let Some(monitors) = monitors_by_host_scheme.get(&host_scheme.id) else {
            continue;
        };

        let mut monitors_object = serde_json::Map::new();
        for monitor in monitors {
            let mut monitor_object = serde_json::Map::new();
            monitor_object.insert("uri".to_string(), monitor.path.clone().into());

            if monitor.method != models::HttpMethod::Get {
                monitor_object.insert(
                    "method".to_string(),
                    monitor.method.as_str().to_ascii_lowercase().into(),
                );
            }
            if monitor.content_check_mode != models::ContentCheckMode::NoCheck {
                monitor_object.insert(
                    "content_check_mode".to_string(),
                    monitor
                        .content_check_mode
                        .as_str()
                        .to_ascii_lowercase()
                        .into(),
                );
            }
            if !monitor.keywords.is_empty() {
                let keywords: Vec<serde_json::Value> = monitor
                    .keywords
                    .iter()
                    .map(|keyword| base64::encode(keyword).into())
                    .collect();
                monitor_object.insert("keywords".to_string(), keywords.into());
            }
            if monitor.post_content_type != models::PostContentType::Text {
                monitor_object.insert(
                    "post_content_type".to_string(),
                    monitor
                        .post_content_type
                        .as_str()
                        .to_ascii_lowercase()
                        .into(),
                );
            }
            if !monitor.post_user_agent.is_empty() {
                monitor_object.insert(
                    "post_user_agent".to_string(),
                    monitor.post_user_agent.clone().into(),
                );
            }
            if !monitor.post_content.is_empty() {
                monitor_object.insert(
                    "post_content".to_string(),
                    base64::encode(&monitor.post_content).into(),
                );
            }

            monitors_object.insert(monitor.id.to_string(), monitor_object.into());
        }

        host_schemes_object.insert(
            host_scheme.id.to_string(),
            serde_json::json!({
                "url": host_scheme.url_str(),
                "monitors": monitors_object,
            }),
        );
    }

    serde_json::json!({
        "polling_interval": capabilities.polling_interval,
        "ping": ping,
        "ssl_expiration": ssl_expiration,
        "latency": capabilities.supports_latency_tracking,
        "multi_region": capabilities.multi_region_checking,
        "host_schemes": host_schemes_object,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{ContentCheckMode, HttpMethod, MonitorId, PostContentType};

    fn server(id: u32, region: u32, status: ServerStatus, cpu: f32) -> Server {
        Server {
            id: ServerId::new(id),
            region_id: RegionId::new(region),
            identifier: format!("worker-{id}.example"),
            status,
            cpu_loading: cpu,
        }
    }

    fn state(servers: Vec<Server>) -> FleetState {
        FleetState::from_servers(servers)
    }

    #[test]
    fn region_indices_follow_region_id_order() {
        let state = state(vec![
            server(1, 7, ServerStatus::Active, 0.5),
            server(2, 3, ServerStatus::Active, 0.1),
            server(3, 5, ServerStatus::Inactive, 0.0),
        ]);
        assert_eq!(
            state.region_index_by_region,
            BTreeMap::from([(RegionId::new(3), 0), (RegionId::new(7), 1)])
        );
        assert_eq!(state.active_region_count(), 2);
    }

    #[test]
    fn single_region_picks_lowest_cpu_active_worker() {
        let state = state(vec![
            server(1, 1, ServerStatus::Active, 0.9),
            server(2, 1, ServerStatus::Active, 0.2),
            server(3, 2, ServerStatus::Inactive, 0.0),
        ]);

        let (mapping, removed) = state.assign(CustomerMapping::default(), false, &BTreeSet::new());
        assert_eq!(mapping.servers, BTreeSet::from([ServerId::new(2)]));
        assert_eq!(mapping.primary_server_id, ServerId::new(2));
        assert!(removed.is_empty());
    }

    #[test]
    fn single_region_keeps_existing_assignment() {
        let state = state(vec![
            server(1, 1, ServerStatus::Active, 0.9),
            server(2, 1, ServerStatus::Active, 0.2),
        ]);
        let current = CustomerMapping::new(
            ServerId::new(1),
            BTreeSet::from([ServerId::new(1)]),
        );

        // Worker 1 is no longer cheapest, but a stable single assignment is
        // not churned.
        let (mapping, removed) = state.assign(current, false, &BTreeSet::new());
        assert_eq!(mapping.servers, BTreeSet::from([ServerId::new(1)]));
        assert!(removed.is_empty());
    }

    #[test]
    fn non_active_members_are_pruned_and_replaced() {
        let state = state(vec![
            server(1, 1, ServerStatus::Inactive, 0.1),
            server(2, 1, ServerStatus::Active, 0.4),
        ]);
        let current = CustomerMapping::new(
            ServerId::new(1),
            BTreeSet::from([ServerId::new(1)]),
        );

        let (mapping, removed) = state.assign(current, false, &BTreeSet::new());
        assert_eq!(mapping.servers, BTreeSet::from([ServerId::new(2)]));
        assert_eq!(mapping.primary_server_id, ServerId::new(2));
        assert_eq!(removed, BTreeSet::from([ServerId::new(1)]));
    }

    #[test]
    fn multi_region_covers_every_active_region_once() {
        let state = state(vec![
            server(1, 1, ServerStatus::Active, 0.5),
            server(2, 1, ServerStatus::Active, 0.1),
            server(3, 2, ServerStatus::Active, 0.7),
            server(4, 3, ServerStatus::Inactive, 0.0),
        ]);

        let (mapping, removed) = state.assign(CustomerMapping::default(), true, &BTreeSet::new());
        assert_eq!(
            mapping.servers,
            BTreeSet::from([ServerId::new(2), ServerId::new(3)])
        );
        // Primary is the least loaded member.
        assert_eq!(mapping.primary_server_id, ServerId::new(2));
        assert!(removed.is_empty());
    }

    #[test]
    fn multi_region_prunes_duplicates_within_a_region() {
        let state = state(vec![
            server(1, 1, ServerStatus::Active, 0.5),
            server(2, 1, ServerStatus::Active, 0.1),
        ]);
        let current = CustomerMapping::new(
            ServerId::new(1),
            BTreeSet::from([ServerId::new(1), ServerId::new(2)]),
        );

        let (mapping, removed) = state.assign(current, true, &BTreeSet::new());
        assert_eq!(mapping.servers.len(), 1);
        assert_eq!(removed.len(), 1);
        assert!(mapping.primary_is_member());
    }

    #[test]
    fn exclusions_are_honored() {
        let state = state(vec![
            server(1, 1, ServerStatus::Active, 0.1),
            server(2, 1, ServerStatus::Active, 0.4),
        ]);
        let current = CustomerMapping::new(
            ServerId::new(1),
            BTreeSet::from([ServerId::new(1)]),
        );

        let (mapping, removed) =
            state.assign(current, false, &BTreeSet::from([ServerId::new(1)]));
        assert_eq!(mapping.servers, BTreeSet::from([ServerId::new(2)]));
        assert_eq!(removed, BTreeSet::from([ServerId::new(1)]));
    }

    #[test]
    fn no_active_workers_leaves_customer_unmapped() {
        let state = state(vec![server(1, 1, ServerStatus::Defunct, 0.0)]);
        let current = CustomerMapping::new(
            ServerId::new(1),
            BTreeSet::from([ServerId::new(1)]),
        );

        let (mapping, removed) = state.assign(current, false, &BTreeSet::new());
        assert!(mapping.is_empty());
        assert_eq!(removed, BTreeSet::from([ServerId::new(1)]));
    }

    #[test]
    fn customer_config_body_shape() {
        let capabilities = CustomerCapabilities {
            customer_id: CustomerId::new(7),
            supports_latency_tracking: true,
            multi_region_checking: false,
            polling_interval: 30,
            ..CustomerCapabilities::default()
        };
        let host_schemes = vec![
            HostScheme {
                id: models::HostSchemeId::new(11),
                customer_id: CustomerId::new(7),
                url: HostScheme::parse_url("https://a.example").unwrap(),
                ssl_expiration_timestamp: 0,
            },
            // No monitors reference this one; it is omitted from the body.
            HostScheme {
                id: models::HostSchemeId::new(12),
                customer_id: CustomerId::new(7),
                url: HostScheme::parse_url("https://b.example").unwrap(),
                ssl_expiration_timestamp: 0,
            },
        ];
        let monitors = vec![
            Monitor {
                id: MonitorId::new(21),
                customer_id: CustomerId::new(7),
                host_scheme_id: models::HostSchemeId::new(11),
                user_ordering: 0,
                path: "/".to_string(),
                method: HttpMethod::Get,
                content_check_mode: ContentCheckMode::NoCheck,
                keywords: Vec::new(),
                post_content_type: PostContentType::Text,
                post_user_agent: String::new(),
                post_content: Vec::new(),
            },
            Monitor {
                id: MonitorId::new(22),
                customer_id: CustomerId::new(7),
                host_scheme_id: models::HostSchemeId::new(11),
                user_ordering: 1,
                path: "/login".to_string(),
                method: HttpMethod::Post,
                content_check_mode: ContentCheckMode::AnyKeywords,
                keywords: vec![b"welcome".to_vec()],
                post_content_type: PostContentType::Json,
                post_user_agent: "prober/1.0".to_string(),
                post_content: b"{}".to_vec(),
            },
        ];

        let config =
            build_customer_config(&capabilities, true, false, &host_schemes, &monitors);
        insta::assert_json_snapshot!(config, @r###"
        {
          "host_schemes": {
            "11": {
              "monitors": {
                "21": {
                  "uri": "/"
                },
                "22": {
                  "content_check_mode": "any_keywords",
                  "keywords": [
                    "d2VsY29tZQ=="
                  ],
                  "method": "post",
                  "post_content": "e30=",
                  "post_content_type": "json",
                  "post_user_agent": "prober/1.0",
                  "uri": "/login"
                }
              },
              "url": "https://a.example"
            }
          },
          "latency": true,
          "multi_region": false,
          "ping": true,
          "polling_interval": 30,
          "ssl_expiration": false
        }
        "###);
    }
}
