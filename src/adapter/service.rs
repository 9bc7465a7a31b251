//! The process-wide adapter core and its background bus listener.
//!
//! One [`RedisAdapter`] per process (per fleet identity): it owns the node
//! UID, the Redis clients, the subscription refcounts, and the outstanding
//! query table, and it spawns the single listener task through which every
//! inbound bus message funnels. Per-namespace facades are produced by
//! [`RedisAdapter::of`] and share all of this state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::PubSub;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::adapter::channel::{ChannelKind, Channels};
use crate::adapter::local::LocalEmitter;
use crate::adapter::namespace::NamespaceAdapter;
use crate::adapter::query::QueryTable;
use crate::adapter::subscription::SubscriptionManager;
use crate::adapter::types::{new_id, SubCommand};
use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::protocol::{decode_clients_request, decode_clients_response, encode_clients_response};

/// Delay between reconnect attempts of the bus listener.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the listener command channel and of the error stream.
const CHANNEL_CAPACITY: usize = 64;

/// The configured constructor for namespace facades.
///
/// Cheap to clone; all clones share the same node identity and bus state.
/// Two `RedisAdapter`s in one process have distinct UIDs and treat each
/// other as fleet peers.
#[derive(Clone)]
pub struct RedisAdapter {
    inner: Arc<AdapterInner>,
}

impl RedisAdapter {
    /// Build an adapter with default Redis clients derived from `config`.
    pub fn new(config: AdapterConfig) -> AdapterResult<Self> {
        let url = config.redis_url();
        let pub_client = redis::Client::open(url.as_str()).map_err(AdapterError::connection)?;
        let sub_client = redis::Client::open(url.as_str()).map_err(AdapterError::connection)?;
        let meta_client = redis::Client::open(url.as_str()).map_err(AdapterError::connection)?;
        Self::with_clients(config, pub_client, sub_client, meta_client)
    }

    /// Build an adapter over caller-supplied clients: one for publishing,
    /// one dedicated to the pub/sub subscription, one for subscriber-count
    /// metadata queries.
    pub fn with_clients(
        config: AdapterConfig,
        pub_client: redis::Client,
        sub_client: redis::Client,
        meta_client: redis::Client,
    ) -> AdapterResult<Self> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors, _) = broadcast::channel(CHANNEL_CAPACITY);
        let inner = Arc::new(AdapterInner {
            uid: new_id(),
            channels: Channels::new(config.key.clone()),
            base_timeout: config.timeout(),
            pub_client,
            meta_client,
            subs: SubscriptionManager::new(cmd_tx),
            queries: QueryTable::default(),
            namespaces: DashMap::new(),
            errors,
        });

        info!(uid = %inner.uid, "adapter created, spawning bus listener");
        tokio::spawn(run_listener(Arc::downgrade(&inner), sub_client, cmd_rx));

        Ok(Self { inner })
    }

    /// The node UID tagged onto every outbound frame.
    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    /// Subscribe to bus-level failures. Every transport error the adapter
    /// swallows on a fire-and-forget path is published here.
    pub fn errors(&self) -> broadcast::Receiver<AdapterError> {
        self.inner.errors.subscribe()
    }

    /// Get or create the facade for a namespace.
    ///
    /// A new facade subscribes the namespace channel and the process-wide
    /// clients-request channel before it is registered for dispatch. When a
    /// live facade already exists for `nsp` it is returned and `emitter` is
    /// ignored.
    pub async fn of(
        &self,
        nsp: &str,
        emitter: Arc<dyn LocalEmitter>,
    ) -> AdapterResult<Arc<NamespaceAdapter>> {
        if let Some(existing) = self.inner.facade(nsp) {
            return Ok(existing);
        }

        let nsp_channel = self.inner.channels.namespace(nsp);
        let request_channel = self.inner.channels.client_request();

        if let Err(err) = self.inner.subs.acquire(&nsp_channel).await {
            self.inner.emit_error(err.clone());
            return Err(err);
        }
        if let Err(err) = self.inner.subs.acquire(&request_channel).await {
            if let Err(rollback) = self.inner.subs.release(&nsp_channel).await {
                self.inner.emit_error(rollback);
            }
            self.inner.emit_error(err.clone());
            return Err(err);
        }

        let facade = NamespaceAdapter::new(nsp, self.inner.clone(), emitter);
        self.inner
            .namespaces
            .insert(nsp.to_string(), Arc::downgrade(&facade));
        info!(nsp, "namespace facade registered");
        Ok(facade)
    }
}

/// State shared by the adapter handle, its facades, and the listener task.
pub(crate) struct AdapterInner {
    pub(crate) uid: String,
    pub(crate) channels: Channels,
    pub(crate) base_timeout: Duration,
    pub(crate) pub_client: redis::Client,
    pub(crate) meta_client: redis::Client,
    pub(crate) subs: SubscriptionManager,
    pub(crate) queries: QueryTable,
    pub(crate) namespaces: DashMap<String, Weak<NamespaceAdapter>>,
    pub(crate) errors: broadcast::Sender<AdapterError>,
}

impl AdapterInner {
    /// Log a bus-level failure and fan it out on the error stream.
    pub(crate) fn emit_error(&self, err: AdapterError) {
        error!(%err, "adapter error");
        let _ = self.errors.send(err);
    }

    pub(crate) fn facade(&self, nsp: &str) -> Option<Arc<NamespaceAdapter>> {
        let entry = self.namespaces.get(nsp)?;
        match entry.value().upgrade() {
            Some(facade) => Some(facade),
            None => {
                drop(entry);
                self.namespaces.remove(nsp);
                None
            }
        }
    }

    pub(crate) fn unregister(&self, nsp: &str) {
        self.namespaces.remove(nsp);
    }

    /// PUBLISH raw bytes to a channel.
    pub(crate) async fn publish(&self, channel: &str, payload: Vec<u8>) -> AdapterResult<()> {
        use redis::AsyncCommands;

        let mut conn = self
            .pub_client
            .get_multiplexed_async_connection()
            .await
            .map_err(AdapterError::connection)?;
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|err| AdapterError::publish(channel, err))?;
        debug!(channel, receivers, "frame published");
        Ok(())
    }

    /// `PUBSUB NUMSUB` — how many connections across the fleet currently
    /// subscribe to `channel`.
    pub(crate) async fn subscriber_count(&self, channel: &str) -> AdapterResult<usize> {
        let mut conn = self
            .meta_client
            .get_multiplexed_async_connection()
            .await
            .map_err(AdapterError::connection)?;
        let (_name, count): (String, usize) = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(channel)
            .query_async(&mut conn)
            .await
            .map_err(AdapterError::connection)?;
        Ok(count)
    }

    /// Route one inbound bus message by its decoded channel kind.
    pub(crate) async fn dispatch(&self, channel: &str, payload: Vec<u8>) {
        match self.channels.decode(channel) {
            Some(ChannelKind::Namespace { nsp }) | Some(ChannelKind::Room { nsp, .. }) => {
                match self.facade(&nsp) {
                    Some(facade) => facade.on_broadcast_message(&payload).await,
                    None => debug!(channel, nsp, "broadcast for unknown namespace dropped"),
                }
            }
            Some(ChannelKind::ClientRequest) => self.on_clients_request(&payload).await,
            Some(ChannelKind::ClientResponse { muid }) => {
                self.on_clients_response(&muid, &payload)
            }
            None => debug!(channel, "message on unrecognized channel dropped"),
        }
    }

    /// Responder half of the clients query: every accepted request gets
    /// exactly one response, even an empty one, so the requester's counter
    /// converges.
    async fn on_clients_request(&self, payload: &[u8]) {
        let (nsp, req_uid, muid, rooms) = match decode_clients_request(payload) {
            Ok(request) => request,
            Err(err) => {
                debug!(%err, "malformed clients request dropped");
                return;
            }
        };
        if req_uid == self.uid {
            debug!(muid, "own clients request ignored");
            return;
        }
        let Some(facade) = self.facade(&nsp) else {
            debug!(nsp, muid, "clients request for unknown namespace dropped");
            return;
        };

        let sids = facade.local_clients(&rooms);
        let bytes = match encode_clients_response(&sids) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.emit_error(err);
                return;
            }
        };
        let response_channel = self.channels.client_response(&muid);
        debug!(muid, count = sids.len(), "answering clients request");
        if let Err(err) = self.publish(&response_channel, bytes).await {
            self.emit_error(err);
        }
    }

    fn on_clients_response(&self, muid: &str, payload: &[u8]) {
        match decode_clients_response(payload) {
            Ok(sids) => {
                self.queries.push_response(muid, sids);
            }
            Err(err) => debug!(%err, muid, "malformed clients response dropped"),
        }
    }
}

/// The background task owning the pub/sub connection.
///
/// Subscribe/unsubscribe commands from the [`SubscriptionManager`] are
/// serialized against message dispatch; on connection loss the task
/// reconnects and replays every channel still holding references. The task
/// ends when the adapter is dropped (the command channel closes and the
/// weak handle stops upgrading).
async fn run_listener(
    inner: Weak<AdapterInner>,
    sub_client: redis::Client,
    mut cmd_rx: mpsc::Receiver<SubCommand>,
) {
    loop {
        let mut pubsub = match sub_client.get_async_pubsub().await {
            Ok(conn) => {
                info!("bus listener connected");
                conn
            }
            Err(err) => {
                let Some(inner) = inner.upgrade() else { return };
                inner.emit_error(AdapterError::connection(&err));
                drop(inner);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        // Replay subscriptions that survived a reconnect.
        let held = match inner.upgrade() {
            Some(inner) => inner.subs.active_channels().await,
            None => return,
        };
        if !held.is_empty() {
            if let Err(err) = pubsub.subscribe(&held).await {
                warn!(%err, "resubscribe after reconnect failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
            info!(count = held.len(), "resubscribed after reconnect");
        }

        'connection: loop {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    biased;
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else {
                            info!("command channel closed, bus listener stopping");
                            return;
                        };
                        drop(stream);
                        if !apply_command(&mut pubsub, cmd).await {
                            break 'connection;
                        }
                        continue 'connection;
                    }
                    msg = stream.next() => {
                        let Some(msg) = msg else { break 'connection };
                        let Some(inner) = inner.upgrade() else { return };
                        let channel = msg.get_channel_name().to_string();
                        match msg.get_payload::<Vec<u8>>() {
                            Ok(payload) => inner.dispatch(&channel, payload).await,
                            Err(err) => debug!(channel, %err, "unreadable payload dropped"),
                        }
                    }
                }
            }
        }
        warn!("bus connection lost, reconnecting");
    }
}

/// Execute one listener command, acking the outcome to the caller. Returns
/// whether the connection is still usable; a Redis error tears it down so
/// the outer loop reconnects.
async fn apply_command(pubsub: &mut PubSub, cmd: SubCommand) -> bool {
    match cmd {
        SubCommand::Subscribe { channel, done } => {
            let result = pubsub.subscribe(&channel).await;
            let ok = result.is_ok();
            debug!(channel, ok, "subscribe applied");
            let _ = done.send(result.map_err(|err| AdapterError::subscribe(&channel, err)));
            ok
        }
        SubCommand::Unsubscribe { channel, done } => {
            let result = pubsub.unsubscribe(&channel).await;
            let ok = result.is_ok();
            debug!(channel, ok, "unsubscribe applied");
            let _ = done.send(result.map_err(|err| AdapterError::unsubscribe(&channel, err)));
            ok
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An [`AdapterInner`] wired to a fake listener that acks every
    /// subscribe/unsubscribe. The Redis clients are lazy and never
    /// connected by the paths unit tests exercise.
    pub(crate) fn test_inner(prefix: &str) -> Arc<AdapterInner> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    SubCommand::Subscribe { done, .. } | SubCommand::Unsubscribe { done, .. } => {
                        let _ = done.send(Ok(()));
                    }
                }
            }
        });
        let (errors, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(AdapterInner {
            uid: new_id(),
            channels: Channels::new(prefix),
            base_timeout: Duration::from_millis(50),
            pub_client: redis::Client::open("redis://127.0.0.1:6379").unwrap(),
            meta_client: redis::Client::open("redis://127.0.0.1:6379").unwrap(),
            subs: SubscriptionManager::new(cmd_tx),
            queries: QueryTable::default(),
            namespaces: DashMap::new(),
            errors,
        })
    }
}
