//! Internal types shared by the adapter modules.

use tokio::sync::oneshot;

use crate::error::AdapterResult;

/// Length of node and query identifiers.
const ID_LEN: usize = 6;

/// 64-symbol alphabet, giving 64^6 ≈ 6.9e10 distinct identifiers.
const ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a short random identifier.
///
/// Used once per adapter for the node UID that tags every outbound frame
/// (echo suppression), and once per fleet query for the MUID that routes
/// responses back to the requester.
pub(crate) fn new_id() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Commands sent to the background bus listener task.
///
/// Each command carries a `done` channel so the caller can observe the
/// outcome of the underlying Redis command and roll back on failure.
#[derive(Debug)]
pub(crate) enum SubCommand {
    /// Subscribe the listener to a channel.
    Subscribe {
        channel: String,
        done: oneshot::Sender<AdapterResult<()>>,
    },
    /// Unsubscribe the listener from a channel.
    Unsubscribe {
        channel: String,
        done: oneshot::Sender<AdapterResult<()>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_has_expected_length() {
        assert_eq!(new_id().len(), ID_LEN);
    }

    #[test]
    fn id_stays_within_alphabet() {
        let id = new_id();
        for byte in id.bytes() {
            assert!(ID_ALPHABET.contains(&byte), "unexpected symbol {byte}");
        }
    }

    #[test]
    fn ids_differ_between_calls() {
        // Collisions are possible in principle but vanishingly unlikely
        // across a handful of draws.
        let ids: std::collections::HashSet<String> = (0..16).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 16);
    }
}
