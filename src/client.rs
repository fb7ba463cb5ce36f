use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use crate::{
    clock::Clock,
    configuration_store::ConfigStore,
    events::{pending_events_key, EventBatch, EventQueue, Properties, PushedEvent},
    identity::IdentityProvider,
    model::{ConsentRecord, ConsentStatus, Enrichment, EnrichmentPlugin, Variables},
    payload::{PayloadBuilder, SystemInfo},
    session::SessionController,
    storage::Storage,
    transport::{HttpTransport, Transport, TransportClient},
    ClientConfig, Error, Result, TrackConfig,
};

/// Signals the host environment sends about the application lifecycle.
pub trait AppLifecycle {
    /// The application moved to background.
    fn on_background(&self);
    /// The application returned to foreground.
    fn on_foreground(&self);
    /// The application is about to terminate.
    fn on_terminate(&self);
}

/// Everything that depends on the active [`TrackConfig`]. Rebuilt on every
/// [`Client::configure`].
struct TrackingContext {
    config: Arc<TrackConfig>,
    user: IdentityProvider,
    consent: IdentityProvider,
    session: SessionController,
    queue: EventQueue,
    /// Last vendor decisions delivered to the endpoint.
    consents: Mutex<ConsentRecord>,
    /// Enrichment staged for the next submission.
    enrichment: Mutex<Enrichment>,
}

impl TrackingContext {
    fn new(
        config: Arc<TrackConfig>,
        storage: &Arc<dyn Storage>,
        clock: &Arc<dyn Clock>,
    ) -> TrackingContext {
        let queue = if config.offline_tracking_enabled {
            EventQueue::persistent(storage.clone(), &config.container)
        } else {
            EventQueue::new()
        };

        TrackingContext {
            user: IdentityProvider::user(storage.clone(), &config.container),
            consent: IdentityProvider::consent(storage.clone(), &config.container),
            session: SessionController::new(config.session_timeout(), clock.clone()),
            queue,
            consents: Mutex::new(HashMap::new()),
            enrichment: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn payload_builder<'a>(
        &'a self,
        system: &'a SystemInfo,
        clock: &'a dyn Clock,
    ) -> PayloadBuilder<'a> {
        PayloadBuilder {
            config: &self.config,
            system,
            clock,
            user: &self.user,
            consent: &self.consent,
            session: &self.session,
        }
    }

    fn consents(&self) -> ConsentRecord {
        self.consents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_enrichment(&self) -> Enrichment {
        std::mem::take(&mut *self.enrichment.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Put enrichment taken by a failed submission back. Plugins added since take precedence.
    fn restore_enrichment(&self, enrichment: Enrichment) {
        let mut staged = self.enrichment.lock().unwrap_or_else(PoisonError::into_inner);
        for (plugin_id, plugin) in enrichment {
            staged.entry(plugin_id).or_insert(plugin);
        }
    }
}

/// A JENTIS tracking client.
///
/// The client owns all tracking state: configuration, visitor and consent identifiers, the
/// session, and the queue of pushed events. Create it with [`ClientConfig`]. Share it between
/// threads with an `Arc`; all methods take `&self`.
///
/// # Examples
/// ```no_run
/// # async fn run() -> jentis::Result<()> {
/// use jentis::{ClientConfig, Environment, Properties, TrackConfig};
///
/// let client = ClientConfig::new()
///     .track_config(TrackConfig::new("track.example.com", "acme", Environment::Live))
///     .to_client()?;
///
/// client.push(Properties::from([
///     ("track".to_owned(), "pageview".into()),
///     ("pagetitle".to_owned(), "Home".into()),
/// ]))?;
/// client.submit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client<T = HttpTransport> {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    system: SystemInfo,
    config_store: ConfigStore,
    transport: TransportClient<T>,
    context: RwLock<Option<Arc<TrackingContext>>>,
}

impl<T: Transport> Client<T> {
    /// Create a new `Client` using the specified configuration and transport.
    ///
    /// If `config` carries no [`TrackConfig`], the configuration persisted in storage is loaded.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let ClientConfig {
            track_config,
            storage,
            clock,
            initiator,
            system_type,
            user_agent,
            request_timeout: _,
        } = config;

        let client = Client {
            config_store: ConfigStore::new(storage.clone()),
            storage,
            clock,
            system: SystemInfo {
                system_type,
                user_agent,
                initiator,
            },
            transport: TransportClient::new(transport),
            context: RwLock::new(None),
        };

        match track_config {
            Some(track_config) => client.configure(track_config),
            None => {
                if let Some(track_config) = client.config_store.load() {
                    client.activate(track_config);
                }
            }
        }

        client
    }

    /// Activate `config`, replacing the previous configuration completely.
    ///
    /// The session is restarted, identifiers are read from keys of the new container, and events
    /// queued under the previous configuration are dropped (unless they were persisted with
    /// offline tracking, in which case they stay stored under the previous container).
    pub fn configure(&self, config: TrackConfig) {
        let config = self.config_store.configure(config);
        self.activate(config);
    }

    /// Currently active tracking configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if the client was never configured.
    pub fn config(&self) -> Result<Arc<TrackConfig>> {
        self.config_store.current()
    }

    /// Send consent decisions for `vendors`. Vendors whose decision differs from the last
    /// delivered one are reported as changed.
    ///
    /// `vendors` replaces the last delivered set completely. A vendor missing from `vendors` is
    /// not reported as changed, since the wire format has no way to express a withdrawn decision.
    /// Pass every known vendor to keep decisions consistent.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConfigured`] if the client was never configured.
    /// - [`Error::TransportFailure`] or [`Error::UnexpectedStatus`] if delivery fails.
    pub async fn set_consents(&self, vendors: ConsentRecord) -> Result<()> {
        let context = self.context()?;
        let previous = context.consents();
        let changed = vendors
            .iter()
            .filter(|(vendor, status)| previous.get(*vendor) != Some(*status))
            .map(|(vendor, status)| (vendor.clone(), *status))
            .collect();

        self.send_consents(&context, vendors, changed).await
    }

    /// Send consent decisions for `vendors`, with `changed` listing the decisions that changed.
    pub async fn set_consents_with_changes(
        &self,
        vendors: ConsentRecord,
        changed: ConsentRecord,
    ) -> Result<()> {
        let context = self.context()?;
        self.send_consents(&context, vendors, changed).await
    }

    async fn send_consents(
        &self,
        context: &TrackingContext,
        vendors: ConsentRecord,
        changed: ConsentRecord,
    ) -> Result<()> {
        let payload = context
            .payload_builder(&self.system, &*self.clock)
            .build_consent_payload(&vendors, &changed);

        log::debug!(target: "jentis", vendors = vendors.len(), changed = changed.len();
                    "sending consent");
        self.transport
            .send(&context.config, &payload)
            .await
            .map_err(|err| {
                log::warn!(target: "jentis", "failed to send consent: {err}");
                err
            })?;

        *context
            .consents
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = vendors;
        log::info!(target: "jentis", "consent sent");
        Ok(())
    }

    /// Last vendor decisions delivered with [`Client::set_consents`].
    pub fn consents(&self) -> Result<HashMap<String, ConsentStatus>> {
        Ok(self.context()?.consents())
    }

    /// Queue an event. Properties `track` and `type` set the event command and type; other
    /// non-string properties are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if the client was never configured.
    pub fn push(&self, properties: Properties) -> Result<()> {
        self.context()?.queue.push(properties);
        Ok(())
    }

    /// Queue an event given as a JSON object. See [`Client::push`].
    pub fn push_json(&self, properties: serde_json::Value) -> Result<()> {
        self.context()?
            .queue
            .push_event(PushedEvent::from_json(properties));
        Ok(())
    }

    /// Number of events waiting for the next submission.
    pub fn queue_len(&self) -> Result<usize> {
        Ok(self.context()?.queue.len())
    }

    /// Attach an enrichment plugin call to the next submission. Adding the same plugin twice
    /// replaces the previous call.
    pub fn add_enrichment(
        &self,
        plugin_id: impl Into<String>,
        arguments: HashMap<String, serde_json::Value>,
        variables: Vec<String>,
    ) -> Result<()> {
        let context = self.context()?;
        let plugin_id = plugin_id.into();
        log::debug!(target: "jentis", plugin_id = plugin_id.as_str(); "enrichment added");
        context
            .enrichment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                plugin_id,
                EnrichmentPlugin {
                    arguments,
                    variables,
                },
            );
        Ok(())
    }

    /// Submit all queued events.
    ///
    /// Queued events and staged enrichment are taken atomically when the submission starts; events
    /// pushed meanwhile go to the next submission. If sending fails, the taken events are put back
    /// in front of the queue and the enrichment is staged again. If the client was reconfigured to
    /// another container in the meantime, they are dropped instead. If the returned future is
    /// dropped before completion, the taken events are lost.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConfigured`] if the client was never configured.
    /// - [`Error::TransportFailure`] or [`Error::UnexpectedStatus`] if delivery fails.
    pub async fn submit(&self) -> Result<()> {
        self.submit_queue(None).await
    }

    /// Same as [`Client::submit`], reporting `initiator` instead of the configured one.
    pub async fn submit_with_initiator(&self, initiator: &str) -> Result<()> {
        self.submit_queue(Some(initiator)).await
    }

    /// Submit `variables` as they are. The event queue is neither read nor modified. Staged
    /// enrichment is sent along and staged again if sending fails.
    pub async fn submit_variables(&self, variables: Variables) -> Result<()> {
        let context = self.context()?;
        let enrichment = context.take_enrichment();
        let payload = context
            .payload_builder(&self.system, &*self.clock)
            .build_submission_payload(
                variables,
                enrichment.clone(),
                &context.consents(),
                None,
            );

        match self.transport.send(&context.config, &payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!(target: "jentis", "failed to submit variables: {err}");
                self.restore_failed(&context, EventBatch::default(), enrichment);
                Err(err)
            }
        }
    }

    async fn submit_queue(&self, initiator: Option<&str>) -> Result<()> {
        let context = self.context()?;

        let batch = context.queue.drain();
        let enrichment = context.take_enrichment();
        let payload = context
            .payload_builder(&self.system, &*self.clock)
            .build_submission_payload(
                batch.to_variables(),
                enrichment.clone(),
                &context.consents(),
                initiator,
            );

        log::debug!(target: "jentis", events = batch.len(); "submitting events");
        match self.transport.send(&context.config, &payload).await {
            Ok(()) => {
                log::info!(target: "jentis", events = batch.len(); "events submitted");
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "jentis", events = batch.len();
                           "failed to submit events: {err}");
                self.restore_failed(&context, batch, enrichment);
                Err(err)
            }
        }
    }

    /// Return what a failed submission took from `taken_from` to the active context.
    ///
    /// `taken_from` may have been replaced by [`Client::configure`] while the request was in
    /// flight. Its queue is unreachable then, so the batch goes to the active context when that
    /// context tracks the same container, and is dropped otherwise.
    fn restore_failed(
        &self,
        taken_from: &TrackingContext,
        batch: EventBatch,
        enrichment: Enrichment,
    ) {
        let active = self
            .context()
            .ok()
            .filter(|active| active.config.container == taken_from.config.container);

        match active {
            Some(active) => {
                active.queue.restore(batch);
                active.restore_enrichment(enrichment);
            }
            None => {
                log::warn!(target: "jentis",
                           container = taken_from.config.container.as_str(),
                           events = batch.len();
                           "dropping events of a failed submission after reconfiguration");
            }
        }
    }

    /// Forget everything: configuration, identifiers, pending events, session and consents.
    ///
    /// The client is unconfigured afterwards.
    pub fn reset(&self) {
        if let Some(context) = self.take_context() {
            context.user.clear();
            context.consent.clear();
            context.queue.clear();
            context.session.end();
            if let Err(err) = self
                .storage
                .remove(&pending_events_key(&context.config.container))
            {
                log::warn!(target: "jentis", "failed to remove pending events: {err}");
            }
        }
        self.config_store.clear();
        log::info!(target: "jentis", "tracking state reset");
    }

    /// Current session id, if a session is active.
    pub fn session_id(&self) -> Result<Option<String>> {
        Ok(self.context()?.session.session_id())
    }

    fn activate(&self, config: Arc<TrackConfig>) {
        let context = Arc::new(TrackingContext::new(config, &self.storage, &self.clock));
        if let Ok(mut slot) = self.context.write() {
            *slot = Some(context);
        }
    }

    fn take_context(&self) -> Option<Arc<TrackingContext>> {
        self.context.write().ok()?.take()
    }

    /// Snapshot of the active context. Operations use one snapshot throughout, so a concurrent
    /// [`Client::configure`] never mixes two configurations in one payload.
    fn context(&self) -> Result<Arc<TrackingContext>> {
        let context = self
            .context
            .read()
            .map_err(|_| Error::NotConfigured)?;
        context.clone().ok_or(Error::NotConfigured)
    }

    #[cfg(test)]
    fn transport(&self) -> &T {
        self.transport.transport()
    }
}

impl<T: Transport> AppLifecycle for Client<T> {
    fn on_background(&self) {
        if let Ok(context) = self.context() {
            context.session.notify_background();
        }
    }

    fn on_foreground(&self) {
        if let Ok(context) = self.context() {
            context.session.notify_foreground();
        }
    }

    fn on_terminate(&self) {
        if let Ok(context) = self.context() {
            context.session.end();
        }
    }
}
