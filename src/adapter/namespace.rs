//! The per-namespace adapter facade.
//!
//! This is the object the socket server holds: room membership mutations
//! (`add`/`del`/`del_all`), fleet-wide `broadcast`, and the fleet-wide
//! `clients` query all live here. Local emit is delegated to the
//! [`LocalAdapter`]; everything bus-side goes through the shared
//! [`AdapterInner`](super::service::AdapterInner).

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::adapter::local::{LocalAdapter, LocalEmitter};
use crate::adapter::service::AdapterInner;
use crate::adapter::types::new_id;
use crate::error::{AdapterError, AdapterResult};
use crate::protocol::{
    decode_broadcast, encode_broadcast, encode_clients_request, BroadcastOptions, Packet, Room,
    Sid,
};

/// Per-namespace facade over the shared adapter core.
pub struct NamespaceAdapter {
    name: String,
    inner: Arc<AdapterInner>,
    local: LocalAdapter,
}

impl NamespaceAdapter {
    pub(crate) fn new(
        name: &str,
        inner: Arc<AdapterInner>,
        emitter: Arc<dyn LocalEmitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            inner,
            local: LocalAdapter::new(emitter),
        })
    }

    /// The namespace this facade serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local membership half.
    pub fn local(&self) -> &LocalAdapter {
        &self.local
    }

    /// Join `sid` to `room`.
    ///
    /// The first member of a room subscribes its bus channel; a subscribe
    /// failure undoes the join and is reported both here and on the error
    /// stream.
    #[instrument(skip(self), fields(nsp = %self.name))]
    pub async fn add(&self, sid: &str, room: &str) -> AdapterResult<()> {
        if room.is_empty() {
            return Err(AdapterError::local("room name must not be empty"));
        }
        let created = self.local.index().add(sid, room);
        if created {
            let channel = self.inner.channels.room(&self.name, room);
            if let Err(err) = self.inner.subs.acquire(&channel).await {
                self.local.index().del(sid, room);
                self.inner.emit_error(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove `sid` from `room`. Emptying the room releases its bus
    /// channel.
    #[instrument(skip(self), fields(nsp = %self.name))]
    pub async fn del(&self, sid: &str, room: &str) -> AdapterResult<()> {
        let emptied = self.local.index().del(sid, room);
        if emptied {
            let channel = self.inner.channels.room(&self.name, room);
            if let Err(err) = self.inner.subs.release(&channel).await {
                self.inner.emit_error(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove `sid` from every room it belongs to, releasing the channel of
    /// each room that empties.
    ///
    /// The first failed release aborts the sweep: rooms already processed
    /// stay removed, the `sids` entry survives, and the caller can retry.
    #[instrument(skip(self), fields(nsp = %self.name))]
    pub async fn del_all(&self, sid: &str) -> AdapterResult<()> {
        for room in self.local.index().rooms_of(sid) {
            let emptied = self.local.index().del(sid, &room);
            if emptied {
                let channel = self.inner.channels.room(&self.name, &room);
                if let Err(err) = self.inner.subs.release(&channel).await {
                    self.inner.emit_error(err.clone());
                    return Err(err);
                }
            }
        }
        self.local.index().forget(sid);
        Ok(())
    }

    /// Broadcast a packet to this namespace across the fleet.
    ///
    /// The local emit always happens first; the bus publish is
    /// fire-and-forget, with failures surfaced only on the error stream.
    pub async fn broadcast(&self, packet: Packet, opts: BroadcastOptions) {
        self.broadcast_from(packet, opts, false).await;
    }

    pub(crate) async fn broadcast_from(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        remote: bool,
    ) {
        self.local.broadcast(&packet, &opts, remote).await;
        if remote {
            // Originated on another node; republishing would fan out
            // forever.
            return;
        }

        let bytes = match encode_broadcast(&self.inner.uid, &packet, &opts) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.inner.emit_error(err);
                return;
            }
        };

        if opts.rooms.is_empty() {
            let channel = self.inner.channels.namespace(&self.name);
            if let Err(err) = self.inner.publish(&channel, bytes).await {
                self.inner.emit_error(err);
            }
        } else {
            for room in &opts.rooms {
                let channel = self.inner.channels.room(&self.name, room);
                if let Err(err) = self.inner.publish(&channel, bytes.clone()).await {
                    self.inner.emit_error(err);
                }
            }
        }
    }

    /// Inbound half of the broadcast engine: a frame received on one of
    /// this namespace's bus channels.
    pub(crate) async fn on_broadcast_message(&self, payload: &[u8]) {
        let (sender_uid, packet, opts) = match decode_broadcast(payload) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "malformed broadcast frame dropped");
                return;
            }
        };
        if sender_uid == self.inner.uid {
            debug!("own broadcast echo dropped");
            return;
        }
        if packet.nsp != self.name {
            debug!(
                packet_nsp = %packet.nsp,
                "broadcast for another namespace dropped"
            );
            return;
        }
        self.broadcast_from(packet, opts, true).await;
    }

    /// Local SIDs matching the room filter (union; whole namespace when the
    /// filter is empty).
    pub fn local_clients(&self, rooms: &[Room]) -> Vec<Sid> {
        self.local.local_clients(rooms)
    }

    /// Fleet-wide SIDs matching the room filter.
    ///
    /// Scatter/gather over the bus: local SIDs seed the result, the current
    /// subscriber count of the request channel bounds the number of
    /// expected peer responses, and the whole query completes within
    /// `base_timeout × expected` even if peers stay silent — missing
    /// responses shorten the list, they never fail the call. Duplicates
    /// across peers are preserved.
    #[instrument(skip(self, rooms), fields(nsp = %self.name))]
    pub async fn clients(&self, rooms: Vec<Room>) -> AdapterResult<Vec<Sid>> {
        let local = self.local.local_clients(&rooms);

        let request_channel = self.inner.channels.client_request();
        let subscribers = self.inner.subscriber_count(&request_channel).await?;
        let expected = subscribers.saturating_sub(1);
        if expected == 0 {
            return Ok(local);
        }

        let muid = new_id();
        let request = encode_clients_request(&self.name, &self.inner.uid, &muid, &rooms)?;
        let response_channel = self.inner.channels.client_response(&muid);

        let (done_tx, done_rx) = oneshot::channel();
        self.inner.queries.insert(&muid, expected, local, done_tx);

        if let Err(err) = self.inner.subs.acquire(&response_channel).await {
            self.inner.queries.take(&muid);
            self.inner.emit_error(err.clone());
            return Err(err);
        }
        if let Err(err) = self.inner.publish(&request_channel, request).await {
            self.inner.queries.take(&muid);
            if let Err(release_err) = self.inner.subs.release(&response_channel).await {
                self.inner.emit_error(release_err);
            }
            self.inner.emit_error(err.clone());
            return Err(err);
        }

        let deadline = self.inner.base_timeout * expected as u32;
        let sids = match timeout(deadline, done_rx).await {
            Ok(Ok(sids)) => {
                self.inner.queries.take(&muid);
                sids
            }
            Ok(Err(_)) => self.inner.queries.take(&muid).unwrap_or_default(),
            Err(_) => {
                debug!(muid, "clients query deadline reached, returning partial result");
                self.inner.queries.take(&muid).unwrap_or_default()
            }
        };

        if let Err(err) = self.inner.subs.release(&response_channel).await {
            self.inner.emit_error(err);
        }
        Ok(sids)
    }

    /// Tear the facade down: unregister it from dispatch and release the
    /// namespace and clients-request channels.
    ///
    /// Membership should be drained (`del_all` per SID) first; room
    /// channels still referenced by local members are left subscribed.
    pub async fn close(&self) -> AdapterResult<()> {
        self.inner.unregister(&self.name);
        let request_channel = self.inner.channels.client_request();
        let nsp_channel = self.inner.channels.namespace(&self.name);
        if let Err(err) = self.inner.subs.release(&request_channel).await {
            self.inner.emit_error(err.clone());
            return Err(err);
        }
        if let Err(err) = self.inner.subs.release(&nsp_channel).await {
            self.inner.emit_error(err.clone());
            return Err(err);
        }
        Ok(())
    }
}
