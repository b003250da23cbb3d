use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, error, info};

use crate::actions::Origin;
use crate::router::Router;
use tabwire_core::{Error, Message, Result};

/// The external process boundary. The transport is strictly
/// request/response: one serialized message out, exactly one back, no
/// server-initiated push.
#[async_trait]
pub trait NativeTransport: Send + Sync {
    async fn exchange(&self, message: &Message) -> Result<Message>;
}

/// The override slot and its waiter are guarded together: the waiter is
/// only ever set while an override is pending or in flight, and exactly
/// one override may be in flight at a time.
struct OverrideSlot {
    pending: Option<Message>,
    waiter: Option<oneshot::Sender<Result<()>>>,
    // Bumped on every accepted override; the loop re-validates against it
    // before clearing the slot after a round trip.
    generation: u64,
}

/// Simulates a persistent duplex channel on top of the request/response
/// transport: a continuous loop sends a `keep_alive` action each cycle
/// (the reply is the host's chance to push), and `send_override` swaps
/// the next cycle's outbound for a caller-supplied message.
pub struct NativeChannel {
    transport: Arc<dyn NativeTransport>,
    slot: Mutex<OverrideSlot>,
    // Wakes the loop out of its idle pause when an override arrives.
    kick: Notify,
    keep_alive_interval: Duration,
    self_id: String,
    host_id: String,
}

impl NativeChannel {
    pub fn new(
        transport: Arc<dyn NativeTransport>,
        keep_alive_interval: Duration,
        self_id: &str,
        host_id: &str,
    ) -> Self {
        Self {
            transport,
            slot: Mutex::new(OverrideSlot {
                pending: None,
                waiter: None,
                generation: 0,
            }),
            kick: Notify::new(),
            keep_alive_interval,
            self_id: self_id.to_string(),
            host_id: host_id.to_string(),
        }
    }

    fn keep_alive(&self) -> Message {
        Message::action("keep_alive", &self.self_id, &self.host_id)
    }

    /// Queues `message` to replace the next keep-alive cycle. The
    /// returned awaitable completes once the override's round trip has
    /// finished (its reply handed to the router). A second override while
    /// one is pending is rejected with `ChannelBusy`; overwriting would
    /// strand the first caller's awaitable forever.
    pub fn send_override(&self, message: Message) -> Result<oneshot::Receiver<Result<()>>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.slot.lock().unwrap();
            if slot.pending.is_some() || slot.waiter.is_some() {
                return Err(Error::ChannelBusy);
            }
            slot.pending = Some(message);
            slot.waiter = Some(tx);
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.kick.notify_one();
        Ok(rx)
    }

    /// The channel loop. Runs for the lifetime of the coordinator;
    /// returns `Ok(())` on shutdown and `Err(ChannelClosed)` when the
    /// transport dies, in which case any in-flight override waiter is
    /// failed with the same error. Restart policy belongs to the caller.
    pub async fn run_loop(
        &self,
        router: &Router,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("Native channel loop started");
        loop {
            let (outbound, used_generation) = {
                let slot = self.slot.lock().unwrap();
                match &slot.pending {
                    Some(message) => (message.clone(), Some(slot.generation)),
                    None => (self.keep_alive(), None),
                }
            };
            if used_generation.is_some() {
                debug!(receiver = %outbound.receiver, "Sending override message");
            }

            let reply = tokio::select! {
                result = self.transport.exchange(&outbound) => result,
                _ = shutdown.recv() => {
                    info!("Native channel shutting down");
                    return Ok(());
                }
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "Native transport failed, stopping channel loop");
                    let waiter = {
                        let mut slot = self.slot.lock().unwrap();
                        slot.pending = None;
                        slot.waiter.take()
                    };
                    if let Some(tx) = waiter {
                        let _ = tx.send(Err(Error::ChannelClosed(e.to_string())));
                    }
                    return Err(Error::ChannelClosed(e.to_string()));
                }
            };

            let idle = reply.is_empty();
            router.route_inbound(reply, Origin::Native).await;

            if let Some(generation) = used_generation {
                // Re-validate before clearing: only settle the slot if it
                // still holds the override this cycle actually sent.
                let waiter = {
                    let mut slot = self.slot.lock().unwrap();
                    if slot.generation == generation {
                        slot.pending = None;
                        slot.waiter.take()
                    } else {
                        None
                    }
                };
                if let Some(tx) = waiter {
                    let _ = tx.send(Ok(()));
                }
            } else if idle {
                // Pace idle keep-alive rounds. An override arriving during
                // the pause preempts it immediately.
                tokio::select! {
                    _ = tokio::time::sleep(self.keep_alive_interval) => {}
                    _ = self.kick.notified() => {}
                    _ = shutdown.recv() => {
                        info!("Native channel shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted request/response transport: records every exchange,
    /// answers from a reply queue (`{}` once the queue is drained), and
    /// can be told to fail at the nth exchange.
    pub(crate) struct FakeTransport {
        pub exchanges: StdMutex<Vec<Message>>,
        replies: StdMutex<VecDeque<Message>>,
        fail_at: StdMutex<Option<usize>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                exchanges: StdMutex::new(Vec::new()),
                replies: StdMutex::new(VecDeque::new()),
                fail_at: StdMutex::new(None),
            }
        }

        pub fn queue_reply(&self, reply: Message) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn fail_on_exchange(&self, nth: usize) {
            *self.fail_at.lock().unwrap() = Some(nth);
        }

        pub fn sent_tags(&self) -> Vec<String> {
            self.exchanges
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.tag().unwrap_or("-").to_string())
                .collect()
        }
    }

    #[async_trait]
    impl NativeTransport for FakeTransport {
        async fn exchange(&self, message: &Message) -> Result<Message> {
            // A real host round trip is never instantaneous.
            tokio::time::sleep(Duration::from_millis(1)).await;
            let count = {
                let mut exchanges = self.exchanges.lock().unwrap();
                exchanges.push(message.clone());
                exchanges.len() - 1
            };
            if *self.fail_at.lock().unwrap() == Some(count) {
                return Err(Error::Other("host process went away".to_string()));
            }
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{harness, Harness};
    use serde_json::json;
    use tokio::task::JoinHandle;

    fn spawn_loop(h: &Harness) -> (broadcast::Sender<()>, JoinHandle<Result<()>>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let native = h.native.clone();
        let router = h.router.clone();
        let task = tokio::spawn(async move { native.run_loop(&router, shutdown_rx).await });
        (shutdown_tx, task)
    }

    #[tokio::test]
    async fn test_idle_loop_sends_keep_alive() {
        let h = harness();
        let (shutdown_tx, task) = spawn_loop(&h);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();

        let tags = h.transport.sent_tags();
        assert!(!tags.is_empty());
        assert!(tags.iter().all(|t| t == "keep_alive"));
        let exchanges = h.transport.exchanges.lock().unwrap();
        assert_eq!(exchanges[0].receiver, "com.tabwire.host");
        assert_eq!(exchanges[0].sender, "tabwire/coordinator");
    }

    #[tokio::test]
    async fn test_override_preempts_keep_alive_and_completes() {
        let h = harness();
        let (shutdown_tx, task) = spawn_loop(&h);

        let override_msg = Message::action("run_protocol", "tabwire/coordinator", "Protocols/X")
            .with_input("step", json!(1));
        let done = h.native.send_override(override_msg).unwrap();
        done.await.unwrap().unwrap();

        assert!(h.transport.sent_tags().contains(&"run_protocol".to_string()));

        // Slot is free again once the round trip settled.
        let second = h
            .native
            .send_override(Message::action("again", "tabwire/coordinator", "Protocols/X"))
            .unwrap();
        second.await.unwrap().unwrap();

        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_second_override_rejected_while_first_pending() {
        let h = harness();
        // No loop running: the first override stays pending.
        let first = h
            .native
            .send_override(Message::action("first", "a", "Protocols/X"))
            .unwrap();

        let err = h
            .native
            .send_override(Message::action("second", "a", "Protocols/X"))
            .unwrap_err();
        assert!(matches!(err, Error::ChannelBusy));

        // The first override is untouched: starting the loop completes it
        // with its own message.
        let (shutdown_tx, task) = spawn_loop(&h);
        first.await.unwrap().unwrap();
        assert_eq!(h.transport.sent_tags()[0], "first");

        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_closes_loop_and_fails_waiter() {
        let h = harness();
        h.transport.fail_on_exchange(0);
        let waiter = h
            .native
            .send_override(Message::action("doomed", "a", "Protocols/X"))
            .unwrap();

        let (_shutdown_tx, task) = spawn_loop(&h);
        let loop_result = task.await.unwrap();
        assert!(matches!(loop_result, Err(Error::ChannelClosed(_))));

        let waiter_result = waiter.await.unwrap();
        assert!(matches!(waiter_result, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_host_reply_is_routed_to_tab() {
        let h = harness();
        // The host answers the first keep-alive with a message for a tab
        // that does not exist yet; the router provisions and delivers.
        h.transport.queue_reply(
            Message::action("prompt", "Protocols/X", "tab/Solver")
                .with_input("text", json!("hello")),
        );
        let (shutdown_tx, task) = spawn_loop(&h);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();

        assert_eq!(h.browser.created_count(), 1);
        let sent = h.browser.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.input["text"], json!("hello"));
    }
}
