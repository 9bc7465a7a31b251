//! Channel naming scheme.
//!
//! Every channel string starts with the configured prefix and uses `#` as
//! the segment delimiter. Four shapes exist:
//!
//! | shape | string |
//! |---|---|
//! | namespace broadcast | `{prefix}#{nsp}#` |
//! | room broadcast | `{prefix}#{nsp}#{room}#` |
//! | clients request | `{prefix}#clientrequest` |
//! | clients response | `{prefix}#{muid}#clientresponse` |
//!
//! Broadcast channels keep their trailing `#` verbatim; that trailing
//! delimiter is what distinguishes them from the query channels when
//! decoding. Channel strings are opaque bytes on the wire: no collation,
//! no case folding.

/// The decoded kind of an inbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    /// Whole-namespace broadcast channel.
    Namespace { nsp: String },
    /// Single-room broadcast channel.
    Room { nsp: String, room: String },
    /// The process-wide clients-request channel.
    ClientRequest,
    /// A per-query clients-response channel.
    ClientResponse { muid: String },
}

/// Channel namer bound to a prefix.
#[derive(Debug, Clone)]
pub(crate) struct Channels {
    prefix: String,
}

impl Channels {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub(crate) fn namespace(&self, nsp: &str) -> String {
        format!("{}#{}#", self.prefix, nsp)
    }

    pub(crate) fn room(&self, nsp: &str, room: &str) -> String {
        format!("{}#{}#{}#", self.prefix, nsp, room)
    }

    pub(crate) fn client_request(&self) -> String {
        format!("{}#clientrequest", self.prefix)
    }

    pub(crate) fn client_response(&self, muid: &str) -> String {
        format!("{}#{}#clientresponse", self.prefix, muid)
    }

    /// Decode a channel string back into its kind.
    ///
    /// Returns `None` for channels that do not follow the scheme (wrong
    /// prefix or too few segments). Room names containing `#` decode back
    /// into a single room segment.
    pub(crate) fn decode(&self, channel: &str) -> Option<ChannelKind> {
        let rest = channel
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('#')?;

        if let Some(body) = rest.strip_suffix('#') {
            // Broadcast shape: `{nsp}#` or `{nsp}#{room}#`.
            return match body.split_once('#') {
                None if body.is_empty() => None,
                None => Some(ChannelKind::Namespace {
                    nsp: body.to_string(),
                }),
                Some((nsp, room)) => Some(ChannelKind::Room {
                    nsp: nsp.to_string(),
                    room: room.to_string(),
                }),
            };
        }

        // Query shapes have no trailing delimiter; the kind is the final
        // segment.
        if rest == "clientrequest" {
            return Some(ChannelKind::ClientRequest);
        }
        if let Some(muid) = rest.strip_suffix("#clientresponse") {
            if !muid.is_empty() && !muid.contains('#') {
                return Some(ChannelKind::ClientResponse {
                    muid: muid.to_string(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Channels {
        Channels::new("socket.io")
    }

    #[test]
    fn namespace_channel_shape() {
        assert_eq!(channels().namespace("/nsp"), "socket.io#/nsp#");
    }

    #[test]
    fn room_channel_shape() {
        assert_eq!(channels().room("/nsp", "room"), "socket.io#/nsp#room#");
    }

    #[test]
    fn query_channel_shapes() {
        assert_eq!(channels().client_request(), "socket.io#clientrequest");
        assert_eq!(
            channels().client_response("muid01"),
            "socket.io#muid01#clientresponse"
        );
    }

    #[test]
    fn decode_round_trips_every_shape() {
        let ch = channels();
        assert_eq!(
            ch.decode(&ch.namespace("/nsp")),
            Some(ChannelKind::Namespace {
                nsp: "/nsp".to_string()
            })
        );
        assert_eq!(
            ch.decode(&ch.room("/nsp", "room")),
            Some(ChannelKind::Room {
                nsp: "/nsp".to_string(),
                room: "room".to_string()
            })
        );
        assert_eq!(ch.decode(&ch.client_request()), Some(ChannelKind::ClientRequest));
        assert_eq!(
            ch.decode(&ch.client_response("muid01")),
            Some(ChannelKind::ClientResponse {
                muid: "muid01".to_string()
            })
        );
    }

    #[test]
    fn room_names_may_contain_the_delimiter() {
        let ch = channels();
        let encoded = ch.room("/", "a#b");
        assert_eq!(
            ch.decode(&encoded),
            Some(ChannelKind::Room {
                nsp: "/".to_string(),
                room: "a#b".to_string()
            })
        );
    }

    #[test]
    fn a_room_named_clientresponse_is_still_a_room() {
        // The trailing delimiter disambiguates broadcast channels from the
        // query channels.
        let ch = channels();
        assert_eq!(
            ch.decode(&ch.room("/nsp", "clientresponse")),
            Some(ChannelKind::Room {
                nsp: "/nsp".to_string(),
                room: "clientresponse".to_string()
            })
        );
    }

    #[test]
    fn foreign_channels_decode_to_none() {
        let ch = channels();
        assert_eq!(ch.decode("other-prefix#/nsp#"), None);
        assert_eq!(ch.decode("socket.io"), None);
        assert_eq!(ch.decode("socket.io#"), None);
        assert_eq!(ch.decode("completely unrelated"), None);
    }
}
