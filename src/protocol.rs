//! Wire data model and frame codec.
//!
//! Every payload on the bus is a heterogeneous JSON array encoded to raw
//! bytes. Three frame shapes exist:
//!
//! - broadcast: `[uid, packet, opts]`
//! - clients request: `[nsp, uid, muid, rooms]`
//! - clients response: `[sids]`
//!
//! Payloads are handed around as `Vec<u8>` end to end; the subscriber side
//! never text-decodes them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AdapterError, AdapterResult};

/// Opaque client identifier assigned by the socket layer. Unique within a
/// process, not necessarily across the fleet.
pub type Sid = String;

/// Application-chosen room name. Any non-empty string.
pub type Room = String;

/// An application payload.
///
/// The adapter only recognizes the `nsp` attribute; everything else is
/// carried verbatim. A packet that arrives without `nsp` is treated as
/// belonging to the root namespace `/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    /// Namespace the packet belongs to.
    #[serde(default = "default_nsp")]
    pub nsp: String,

    /// The rest of the payload, untouched.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Packet {
    /// A packet bound to `nsp` with no further attributes.
    pub fn new(nsp: impl Into<String>) -> Self {
        Self {
            nsp: nsp.into(),
            rest: Map::new(),
        }
    }

    /// Attach an attribute, builder style.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.rest.insert(key.into(), value);
        self
    }
}

fn default_nsp() -> String {
    "/".to_string()
}

/// Targeting options for a broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BroadcastOptions {
    /// Rooms to deliver to. Empty means the whole namespace.
    #[serde(default)]
    pub rooms: Vec<Room>,

    /// SIDs to skip.
    #[serde(default)]
    pub except: HashSet<Sid>,

    /// Opaque flags, forwarded to the local emitter untouched.
    #[serde(default)]
    pub flags: Map<String, Value>,
}

impl BroadcastOptions {
    /// Options targeting the given rooms.
    pub fn rooms<I, R>(rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        Self {
            rooms: rooms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

pub(crate) fn encode_broadcast(
    uid: &str,
    packet: &Packet,
    opts: &BroadcastOptions,
) -> AdapterResult<Vec<u8>> {
    serde_json::to_vec(&(uid, packet, opts)).map_err(AdapterError::codec)
}

pub(crate) fn decode_broadcast(bytes: &[u8]) -> AdapterResult<(String, Packet, BroadcastOptions)> {
    serde_json::from_slice(bytes).map_err(AdapterError::codec)
}

pub(crate) fn encode_clients_request(
    nsp: &str,
    uid: &str,
    muid: &str,
    rooms: &[Room],
) -> AdapterResult<Vec<u8>> {
    serde_json::to_vec(&(nsp, uid, muid, rooms)).map_err(AdapterError::codec)
}

pub(crate) fn decode_clients_request(
    bytes: &[u8],
) -> AdapterResult<(String, String, String, Vec<Room>)> {
    serde_json::from_slice(bytes).map_err(AdapterError::codec)
}

pub(crate) fn encode_clients_response(sids: &[Sid]) -> AdapterResult<Vec<u8>> {
    serde_json::to_vec(&(sids,)).map_err(AdapterError::codec)
}

pub(crate) fn decode_clients_response(bytes: &[u8]) -> AdapterResult<Vec<Sid>> {
    let (sids,): (Vec<Sid>,) = serde_json::from_slice(bytes).map_err(AdapterError::codec)?;
    Ok(sids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broadcast_round_trip() {
        let packet = Packet::new("/nsp").with("data", json!("hi"));
        let opts = BroadcastOptions::rooms(["room"]);

        let bytes = encode_broadcast("abc123", &packet, &opts).unwrap();
        let (uid, decoded_packet, decoded_opts) = decode_broadcast(&bytes).unwrap();

        assert_eq!(uid, "abc123");
        assert_eq!(decoded_packet, packet);
        assert_eq!(decoded_opts, opts);
    }

    #[test]
    fn packet_nsp_defaults_to_root() {
        // A frame whose packet carries no nsp attribute at all.
        let bytes = serde_json::to_vec(&json!(["abc123", { "data": "hi" }, {}])).unwrap();
        let (_, packet, _) = decode_broadcast(&bytes).unwrap();
        assert_eq!(packet.nsp, "/");
        assert_eq!(packet.rest.get("data"), Some(&json!("hi")));
    }

    #[test]
    fn options_fields_all_optional() {
        let bytes = serde_json::to_vec(&json!(["abc123", { "nsp": "/" }, {}])).unwrap();
        let (_, _, opts) = decode_broadcast(&bytes).unwrap();
        assert!(opts.rooms.is_empty());
        assert!(opts.except.is_empty());
        assert!(opts.flags.is_empty());
    }

    #[test]
    fn clients_request_round_trip() {
        let rooms = vec!["a".to_string(), "b".to_string()];
        let bytes = encode_clients_request("/nsp", "uid001", "muid01", &rooms).unwrap();
        let (nsp, uid, muid, decoded_rooms) = decode_clients_request(&bytes).unwrap();
        assert_eq!(nsp, "/nsp");
        assert_eq!(uid, "uid001");
        assert_eq!(muid, "muid01");
        assert_eq!(decoded_rooms, rooms);
    }

    #[test]
    fn clients_response_is_a_wrapped_list() {
        let sids = vec!["A1".to_string(), "A2".to_string()];
        let bytes = encode_clients_response(&sids).unwrap();
        // The wire shape is a one-element array holding the list.
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw, json!([["A1", "A2"]]));
        assert_eq!(decode_clients_response(&bytes).unwrap(), sids);
    }

    #[test]
    fn malformed_payload_is_a_codec_error() {
        let err = decode_broadcast(b"not json").unwrap_err();
        assert!(matches!(err, AdapterError::Codec { .. }));

        let err = decode_clients_request(b"[1, 2]").unwrap_err();
        assert!(matches!(err, AdapterError::Codec { .. }));
    }
}
