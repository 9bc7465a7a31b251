//! Reference-counted bus subscriptions.
//!
//! Many local rooms (and one namespace, and the process-wide request
//! channel) can map onto the same bus channel over time; the manager
//! guarantees at most one bus SUBSCRIBE per channel regardless of how many
//! holders acquired it. The 0→1 and 1→0 transitions are the only ones that
//! reach the bus; everything in between is bookkeeping.

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::adapter::types::SubCommand;
use crate::error::{AdapterError, AdapterResult};

/// A subscribe in flight, shared by every concurrent acquirer of the same
/// channel so the bus sees a single SUBSCRIBE.
type SharedAck = Shared<BoxFuture<'static, AdapterResult<()>>>;

struct ChannelEntry {
    count: usize,
    pending: Option<SharedAck>,
}

/// Reference-counted subscribe/unsubscribe, keyed by channel.
pub(crate) struct SubscriptionManager {
    cmd_tx: mpsc::Sender<SubCommand>,
    channels: Mutex<HashMap<String, ChannelEntry>>,
}

impl SubscriptionManager {
    pub(crate) fn new(cmd_tx: mpsc::Sender<SubCommand>) -> Self {
        Self {
            cmd_tx,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Take a reference on `channel`, subscribing on the bus if this is the
    /// first one. Concurrent acquires share the in-flight subscribe. On
    /// failure the reference is rolled back so the caller may retry.
    pub(crate) async fn acquire(&self, channel: &str) -> AdapterResult<()> {
        let ack = {
            let mut table = self.channels.lock().await;
            let entry = table.entry(channel.to_string()).or_insert(ChannelEntry {
                count: 0,
                pending: None,
            });
            entry.count += 1;
            if entry.count == 1 {
                debug!(channel, "first holder, subscribing on the bus");
                let ack = Self::send_subscribe(self.cmd_tx.clone(), channel.to_string());
                entry.pending = Some(ack.clone());
                Some(ack)
            } else {
                entry.pending.clone()
            }
        };

        let result = match ack {
            Some(ack) => ack.await,
            // Already subscribed and settled.
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                let mut table = self.channels.lock().await;
                if let Some(entry) = table.get_mut(channel) {
                    entry.pending = None;
                }
                Ok(())
            }
            Err(err) => {
                let mut table = self.channels.lock().await;
                if let Some(entry) = table.get_mut(channel) {
                    entry.count -= 1;
                    if entry.count == 0 {
                        table.remove(channel);
                    }
                }
                Err(err)
            }
        }
    }

    /// Drop a reference on `channel`, unsubscribing on the bus if it was the
    /// last one. On failure the reference is restored so the caller may
    /// retry.
    pub(crate) async fn release(&self, channel: &str) -> AdapterResult<()> {
        let last = {
            let mut table = self.channels.lock().await;
            match table.get_mut(channel) {
                None => {
                    debug!(channel, "release on untracked channel ignored");
                    return Ok(());
                }
                Some(entry) => {
                    entry.count -= 1;
                    if entry.count == 0 {
                        table.remove(channel);
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !last {
            return Ok(());
        }

        debug!(channel, "last holder gone, unsubscribing on the bus");
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self
            .cmd_tx
            .send(SubCommand::Unsubscribe {
                channel: channel.to_string(),
                done: done_tx,
            })
            .await;
        let result = match sent {
            Ok(()) => done_rx.await.unwrap_or(Err(AdapterError::Closed)),
            Err(_) => Err(AdapterError::Closed),
        };

        if let Err(err) = result {
            let mut table = self.channels.lock().await;
            table
                .entry(channel.to_string())
                .or_insert(ChannelEntry {
                    count: 0,
                    pending: None,
                })
                .count += 1;
            return Err(err);
        }
        Ok(())
    }

    /// Channels currently holding at least one reference. The listener
    /// replays these after a reconnect.
    pub(crate) async fn active_channels(&self) -> Vec<String> {
        let table = self.channels.lock().await;
        table
            .iter()
            .filter(|(_, entry)| entry.count > 0)
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Current reference count for a channel.
    pub(crate) async fn refcount(&self, channel: &str) -> usize {
        let table = self.channels.lock().await;
        table.get(channel).map(|entry| entry.count).unwrap_or(0)
    }

    fn send_subscribe(cmd_tx: mpsc::Sender<SubCommand>, channel: String) -> SharedAck {
        async move {
            let (done_tx, done_rx) = oneshot::channel();
            let cmd = SubCommand::Subscribe {
                channel,
                done: done_tx,
            };
            if cmd_tx.send(cmd).await.is_err() {
                return Err(AdapterError::Closed);
            }
            done_rx.await.unwrap_or(Err(AdapterError::Closed))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Drains listener commands, acking each with the result produced by
    /// `respond`, and counts the SUBSCRIBEs and UNSUBSCRIBEs it saw.
    struct FakeListener {
        subscribes: Arc<AtomicUsize>,
        unsubscribes: Arc<AtomicUsize>,
    }

    impl FakeListener {
        fn spawn<F>(respond: F) -> (SubscriptionManager, Self)
        where
            F: Fn(&str) -> AdapterResult<()> + Send + 'static,
        {
            let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
            let subscribes = Arc::new(AtomicUsize::new(0));
            let unsubscribes = Arc::new(AtomicUsize::new(0));
            let subs = subscribes.clone();
            let unsubs = unsubscribes.clone();
            tokio::spawn(async move {
                while let Some(cmd) = cmd_rx.recv().await {
                    match cmd {
                        SubCommand::Subscribe { channel, done } => {
                            subs.fetch_add(1, Ordering::SeqCst);
                            let _ = done.send(respond(&channel));
                        }
                        SubCommand::Unsubscribe { channel, done } => {
                            unsubs.fetch_add(1, Ordering::SeqCst);
                            let _ = done.send(respond(&channel));
                        }
                    }
                }
            });
            (
                SubscriptionManager::new(cmd_tx),
                Self {
                    subscribes,
                    unsubscribes,
                },
            )
        }
    }

    #[tokio::test]
    async fn acquire_subscribes_once_per_channel() {
        let (manager, listener) = FakeListener::spawn(|_| Ok(()));

        manager.acquire("ch").await.unwrap();
        manager.acquire("ch").await.unwrap();
        manager.acquire("ch").await.unwrap();

        assert_eq!(listener.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.refcount("ch").await, 3);
    }

    #[tokio::test]
    async fn release_unsubscribes_only_at_zero() {
        let (manager, listener) = FakeListener::spawn(|_| Ok(()));

        manager.acquire("ch").await.unwrap();
        manager.acquire("ch").await.unwrap();

        manager.release("ch").await.unwrap();
        assert_eq!(listener.unsubscribes.load(Ordering::SeqCst), 0);

        manager.release("ch").await.unwrap();
        assert_eq!(listener.unsubscribes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.refcount("ch").await, 0);
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_the_count_back() {
        let failed = Arc::new(AtomicUsize::new(0));
        let failed_clone = failed.clone();
        let (manager, listener) = FakeListener::spawn(move |channel| {
            if failed_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AdapterError::subscribe(channel, "boom"))
            } else {
                Ok(())
            }
        });

        let err = manager.acquire("ch").await.unwrap_err();
        assert!(matches!(err, AdapterError::Subscribe { .. }));
        assert_eq!(manager.refcount("ch").await, 0);

        // The caller can retry once the bus recovers.
        manager.acquire("ch").await.unwrap();
        assert_eq!(manager.refcount("ch").await, 1);
        assert_eq!(listener.subscribes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_unsubscribe_restores_the_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let (manager, _listener) = FakeListener::spawn(move |channel| {
            // First call is the subscribe, second the failing unsubscribe.
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(AdapterError::unsubscribe(channel, "boom"))
            } else {
                Ok(())
            }
        });

        manager.acquire("ch").await.unwrap();
        let err = manager.release("ch").await.unwrap_err();
        assert!(matches!(err, AdapterError::Unsubscribe { .. }));
        assert_eq!(manager.refcount("ch").await, 1);

        manager.release("ch").await.unwrap();
        assert_eq!(manager.refcount("ch").await, 0);
    }

    #[tokio::test]
    async fn concurrent_acquires_share_one_subscribe() {
        // The listener acks only after both acquires are in flight.
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let manager = Arc::new(SubscriptionManager::new(cmd_tx));

        let m1 = manager.clone();
        let m2 = manager.clone();
        let a1 = tokio::spawn(async move { m1.acquire("ch").await });
        let a2 = tokio::spawn(async move { m2.acquire("ch").await });

        // Exactly one Subscribe command arrives; ack it.
        let cmd = cmd_rx.recv().await.unwrap();
        match cmd {
            SubCommand::Subscribe { done, .. } => {
                let _ = done.send(Ok(()));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        a1.await.unwrap().unwrap();
        a2.await.unwrap().unwrap();
        assert_eq!(manager.refcount("ch").await, 2);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn release_of_untracked_channel_is_a_noop() {
        let (manager, listener) = FakeListener::spawn(|_| Ok(()));
        manager.release("never-acquired").await.unwrap();
        assert_eq!(listener.unsubscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_channels_lists_held_subscriptions() {
        let (manager, _listener) = FakeListener::spawn(|_| Ok(()));
        manager.acquire("a").await.unwrap();
        manager.acquire("b").await.unwrap();
        manager.release("a").await.unwrap();

        let active = manager.active_channels().await;
        assert_eq!(active, vec!["b".to_string()]);
    }
}
