//! Local membership index and the emit seam to the socket layer.
//!
//! The adapter core never touches a socket. Delivery to locally connected
//! clients goes through the [`LocalEmitter`] trait, implemented by the
//! socket server; the adapter computes *which* SIDs receive a packet from
//! its in-process membership index and hands the emitter the final
//! recipient list.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::protocol::{BroadcastOptions, Packet, Room, Sid};

/// The seam the socket layer implements.
///
/// `recipients` is already filtered by rooms and `except`; `flags` are the
/// opaque broadcast flags, forwarded untouched. `remote` is true when the
/// packet originated on another node.
#[async_trait]
pub trait LocalEmitter: Send + Sync + 'static {
    async fn deliver(
        &self,
        recipients: Vec<Sid>,
        packet: Packet,
        flags: Map<String, Value>,
        remote: bool,
    );
}

#[derive(Default)]
struct Maps {
    /// SID → rooms it belongs to. An entry may hold an empty set for a SID
    /// that joined and later left all its rooms; it is dropped by
    /// [`MembershipIndex::forget`].
    sids: HashMap<Sid, HashSet<Room>>,
    /// Room → member SIDs. Entries are pruned as soon as they empty.
    rooms: HashMap<Room, HashSet<Sid>>,
}

/// In-process membership index.
///
/// Both maps live behind a single lock so the pairing invariant
/// (`room ∈ sids[s]` iff `s ∈ rooms[room]`) holds at every release of it.
/// The lock is never held across an await point.
#[derive(Default)]
pub struct MembershipIndex {
    state: RwLock<Maps>,
}

impl MembershipIndex {
    /// Add `sid` to `room`. Idempotent.
    ///
    /// Returns true when the room went from empty to non-empty, which is
    /// the moment its bus channel needs a subscription.
    pub fn add(&self, sid: &str, room: &str) -> bool {
        let mut maps = self.state.write().expect("membership lock poisoned");
        let created = !maps.rooms.contains_key(room);
        maps.rooms
            .entry(room.to_string())
            .or_default()
            .insert(sid.to_string());
        maps.sids
            .entry(sid.to_string())
            .or_default()
            .insert(room.to_string());
        created
    }

    /// Remove `sid` from `room`. Idempotent.
    ///
    /// Returns true when this removal emptied the room; the entry is pruned
    /// and the room's bus channel can be released.
    pub fn del(&self, sid: &str, room: &str) -> bool {
        let mut maps = self.state.write().expect("membership lock poisoned");
        if let Some(members) = maps.sids.get_mut(sid) {
            members.remove(room);
        }
        match maps.rooms.get_mut(room) {
            Some(members) => {
                members.remove(sid);
                if members.is_empty() {
                    maps.rooms.remove(room);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Remove `sid` from every room it belongs to, returning the affected
    /// rooms. Emptied rooms are pruned.
    pub fn del_all(&self, sid: &str) -> Vec<Room> {
        let mut maps = self.state.write().expect("membership lock poisoned");
        let rooms: Vec<Room> = match maps.sids.remove(sid) {
            Some(rooms) => rooms.into_iter().collect(),
            None => return Vec::new(),
        };
        for room in &rooms {
            if let Some(members) = maps.rooms.get_mut(room) {
                members.remove(sid);
                if members.is_empty() {
                    maps.rooms.remove(room);
                }
            }
        }
        rooms
    }

    /// Rooms `sid` currently belongs to.
    pub fn rooms_of(&self, sid: &str) -> Vec<Room> {
        let maps = self.state.read().expect("membership lock poisoned");
        maps.sids
            .get(sid)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the `sids` entry for `sid`. Used after a full room-by-room
    /// removal has succeeded.
    pub(crate) fn forget(&self, sid: &str) {
        let mut maps = self.state.write().expect("membership lock poisoned");
        maps.sids.remove(sid);
    }

    /// Whether `sid` is a member of `room`.
    pub fn contains(&self, sid: &str, room: &str) -> bool {
        let maps = self.state.read().expect("membership lock poisoned");
        maps.rooms
            .get(room)
            .map(|members| members.contains(sid))
            .unwrap_or(false)
    }

    /// SIDs belonging to at least one of the given rooms (union, no
    /// duplicates), minus `except`. An empty filter means every SID known
    /// to the namespace. Ordering is unspecified.
    pub fn clients(&self, rooms: &[Room], except: &HashSet<Sid>) -> Vec<Sid> {
        let maps = self.state.read().expect("membership lock poisoned");
        let mut out: HashSet<&Sid> = HashSet::new();
        if rooms.is_empty() {
            out.extend(maps.sids.keys());
        } else {
            for room in rooms {
                if let Some(members) = maps.rooms.get(room) {
                    out.extend(members.iter());
                }
            }
        }
        out.iter()
            .filter(|sid| !except.contains(sid.as_str()))
            .map(|sid| sid.to_string())
            .collect()
    }
}

/// The local half of a namespace adapter: membership plus the emit seam.
pub struct LocalAdapter {
    index: MembershipIndex,
    emitter: Arc<dyn LocalEmitter>,
}

impl LocalAdapter {
    pub fn new(emitter: Arc<dyn LocalEmitter>) -> Self {
        Self {
            index: MembershipIndex::default(),
            emitter,
        }
    }

    pub fn index(&self) -> &MembershipIndex {
        &self.index
    }

    /// Local SIDs matching the room filter, with no exclusions.
    pub fn local_clients(&self, rooms: &[Room]) -> Vec<Sid> {
        self.index.clients(rooms, &HashSet::new())
    }

    /// Compute the recipient set for `opts` and hand it to the emitter.
    /// A broadcast that matches no local client is a no-op.
    pub async fn broadcast(&self, packet: &Packet, opts: &BroadcastOptions, remote: bool) {
        let recipients = self.index.clients(&opts.rooms, &opts.except);
        if recipients.is_empty() {
            return;
        }
        self.emitter
            .deliver(recipients, packet.clone(), opts.flags.clone(), remote)
            .await;
    }
}
