use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Bus, BusError, BusMessage, BusResult, Correlation};

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// Capability to talk to the bus: fire-and-forget, or one request and one reply.
///
/// `send_and` only fails for transport problems. A reply whose `error` is set
/// is still `Ok`; callers surface it through [`BusMessage::decode`] or
/// [`BusMessage::into_result`].
#[async_trait]
pub trait BusClient: Send + Sync {
    fn send(&self, message: BusMessage) -> BusResult<()>;
    async fn send_and(&self, request: BusMessage) -> BusResult<BusMessage>;
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BusResult<BusMessage>>>>>;

/// Removes a request's pending entry when its `send_and` future finishes or
/// is dropped, so timed-out and cancelled callers leave nothing behind.
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Correlates requests and replies over any [`Bus`].
///
/// Each client owns a reply topic. Outgoing requests get a fresh id and that
/// topic stamped into their [`Correlation`]; a pump task listens on the reply
/// topic and completes the matching pending request. There is no timeout: a
/// request nobody answers stays pending until its caller gives up. If the
/// pump falls behind and replies are skipped, every request pending at that
/// point fails with [`BusError::Transport`].
pub struct RequestClient<B: Bus + ?Sized + 'static> {
    bus: Arc<B>,
    reply_topic: String,
    next_id: AtomicU64,
    pending: Pending,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Bus + ?Sized + 'static> RequestClient<B> {
    pub fn new(bus: Arc<B>) -> Self {
        let n = NEXT_CLIENT.fetch_add(1, Ordering::Relaxed);
        Self::with_reply_topic(bus, format!("bus.reply.{n}"))
    }

    pub fn with_reply_topic(bus: Arc<B>, reply_topic: impl Into<String>) -> Self {
        Self {
            bus,
            reply_topic: reply_topic.into(),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pump: Mutex::new(None),
        }
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    // Subscribes synchronously so the receiver exists before the first
    // request is published.
    fn ensure_pump(&self) {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return;
        }
        let mut rx = self.bus.subscribe(&self.reply_topic);
        let pending = Arc::clone(&self.pending);
        let reply_topic = self.reply_topic.clone();
        *pump = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(reply) => {
                        let Some(id) = reply.correlation.as_ref().map(|c| c.id) else {
                            debug!(target = "bus.request", topic = %reply_topic, "reply without correlation dropped");
                            continue;
                        };
                        let waiter = pending.lock().remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Ok(reply));
                            }
                            None => {
                                debug!(target = "bus.request", topic = %reply_topic, id, "reply for unknown request dropped");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The skipped replies cannot be matched to their requests.
                        let waiters: Vec<_> = pending.lock().drain().collect();
                        warn!(
                            target = "bus.request",
                            topic = %reply_topic,
                            skipped,
                            failed = waiters.len(),
                            "reply listener lagged"
                        );
                        for (_, tx) in waiters {
                            let _ = tx.send(Err(BusError::Transport("reply listener lagged".into())));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // Dropping the senders fails every waiter with `Dropped`.
            pending.lock().clear();
        }));
    }
}

#[async_trait]
impl<B: Bus + ?Sized + 'static> BusClient for RequestClient<B> {
    fn send(&self, message: BusMessage) -> BusResult<()> {
        self.bus.publish(message)
    }

    async fn send_and(&self, mut request: BusMessage) -> BusResult<BusMessage> {
        self.ensure_pump();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };
        request.correlation = Some(Correlation {
            id,
            reply_topic: self.reply_topic.clone(),
        });
        debug!(
            target = "bus.request",
            topic = %request.topic,
            msg_type = request.msg_type,
            id,
            "sending request"
        );
        self.bus.publish(request)?;
        rx.await.map_err(|_| BusError::Dropped)?
    }
}

impl<B: Bus + ?Sized + 'static> Drop for RequestClient<B> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

/// Callback flavour of [`BusClient::send_and`]. Returns immediately; the
/// callback runs on a spawned task once the reply (or transport failure)
/// arrives.
pub fn send_with_reply<C, F>(client: Arc<C>, request: BusMessage, callback: F) -> JoinHandle<()>
where
    C: BusClient + ?Sized + 'static,
    F: FnOnce(BusResult<BusMessage>) + Send + 'static,
{
    tokio::spawn(async move {
        let result = client.send_and(request).await;
        callback(result);
    })
}

/// [`BusClient::send_and`] bounded by `timeout`.
pub async fn send_and_timeout<C>(
    client: &C,
    request: BusMessage,
    timeout: Duration,
) -> BusResult<BusMessage>
where
    C: BusClient + ?Sized,
{
    tokio::time::timeout(timeout, client.send_and(request))
        .await
        .map_err(|_| BusError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalBus, ReplyError};

    fn echo_responder(bus: Arc<LocalBus>, topic: &str) -> JoinHandle<()> {
        let mut rx = bus.subscribe(topic);
        tokio::spawn(async move {
            while let Ok(request) = rx.recv().await {
                let mut reply = request.reply();
                reply.message = request.message.clone();
                let _ = bus.publish(reply);
            }
        })
    }

    #[tokio::test]
    async fn send_and_resolves_matching_reply() {
        let bus = Arc::new(LocalBus::new());
        let _responder = echo_responder(bus.clone(), "svc.request");
        let client = RequestClient::new(bus.clone());

        let request = BusMessage::new("svc.request", 1)
            .with_payload(&serde_json::json!({"n": 1}))
            .expect("encode");
        let reply = tokio::time::timeout(Duration::from_secs(2), client.send_and(request))
            .await
            .expect("reply timeout")
            .expect("reply");
        let body: serde_json::Value = reply.decode().expect("decode");
        assert_eq!(body["n"], 1);
        assert_eq!(reply.topic, client.reply_topic());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn replies_resolve_out_of_order() {
        let bus = Arc::new(LocalBus::new());
        let mut requests = bus.subscribe("svc.request");
        let client = Arc::new(RequestClient::new(bus.clone()));

        let first = tokio::spawn({
            let client = client.clone();
            let request = BusMessage::new("svc.request", 1)
                .with_payload(&"first")
                .expect("encode");
            async move { client.send_and(request).await }
        });
        let req_first = requests.recv().await.expect("first request");
        let second = tokio::spawn({
            let client = client.clone();
            let request = BusMessage::new("svc.request", 1)
                .with_payload(&"second")
                .expect("encode");
            async move { client.send_and(request).await }
        });
        let req_second = requests.recv().await.expect("second request");

        let mut reply = req_second.reply();
        reply.set_payload(&"to-second").expect("encode");
        bus.publish(reply).expect("reply second");
        let mut reply = req_first.reply();
        reply.set_payload(&"to-first").expect("encode");
        bus.publish(reply).expect("reply first");

        let second = second.await.expect("join").expect("second reply");
        let first = first.await.expect("join").expect("first reply");
        assert_eq!(second.decode::<String>().unwrap(), "to-second");
        assert_eq!(first.decode::<String>().unwrap(), "to-first");
    }

    #[tokio::test]
    async fn reply_error_is_not_a_transport_failure() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("svc.request");
        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let request = rx.recv().await.expect("request");
                let mut reply = request.reply();
                reply.error = Some(ReplyError::user("nope"));
                bus.publish(reply).expect("reply");
            })
        };
        let client = RequestClient::new(bus.clone());
        let reply = client
            .send_and(BusMessage::new("svc.request", 2))
            .await
            .expect("transport ok");
        responder.await.expect("responder");
        assert_eq!(
            reply.into_result().unwrap_err(),
            BusError::Reply(ReplyError::user("nope"))
        );
    }

    #[tokio::test]
    async fn publish_failure_clears_pending() {
        let bus = Arc::new(LocalBus::new());
        let client = RequestClient::new(bus);
        let err = client
            .send_and(BusMessage::new("nobody.listens", 1))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Closed);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn timeout_bounds_unanswered_request() {
        let bus = Arc::new(LocalBus::new());
        let _silent = bus.subscribe("svc.request");
        let client = RequestClient::new(bus.clone());
        let err = send_and_timeout(
            &client,
            BusMessage::new("svc.request", 1),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert_eq!(err, BusError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn timed_out_requests_leave_nothing_pending() {
        let bus = Arc::new(LocalBus::new());
        let _silent = bus.subscribe("svc.request");
        let client = RequestClient::new(bus.clone());
        for _ in 0..10 {
            let err = send_and_timeout(
                &client,
                BusMessage::new("svc.request", 1),
                Duration::from_millis(5),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, BusError::Timeout(_)));
        }
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_is_forgotten() {
        let bus = Arc::new(LocalBus::new());
        let _silent = bus.subscribe("svc.request");
        let client = Arc::new(RequestClient::new(bus.clone()));
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.send_and(BusMessage::new("svc.request", 1)).await }
        });
        tokio::time::timeout(Duration::from_secs(2), async {
            while client.pending_requests() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request registered");
        call.abort();
        let _ = call.await;
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn lagging_reply_listener_fails_waiters() {
        // Replies overflow the 4-slot channel before the pump gets to run.
        let bus = Arc::new(LocalBus::with_capacity(4));
        let _sink = bus.subscribe("svc.request");
        let client = Arc::new(RequestClient::new(bus.clone()));

        let calls: Vec<_> = (0..10)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.send_and(BusMessage::new("svc.request", 1)).await })
            })
            .collect();
        tokio::time::timeout(Duration::from_secs(2), async {
            while client.pending_requests() < 10 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("all requests registered");

        for id in 1..=10 {
            let mut reply = BusMessage::new(client.reply_topic(), 1);
            reply.correlation = Some(Correlation {
                id,
                reply_topic: client.reply_topic().to_string(),
            });
            bus.publish(reply).expect("publish reply");
        }

        let mut lagged = 0;
        for call in calls {
            let result = tokio::time::timeout(Duration::from_secs(2), call)
                .await
                .expect("no waiter hangs")
                .expect("join");
            if let Err(err) = result {
                assert_eq!(err, BusError::Transport("reply listener lagged".into()));
                assert!(err.is_transport());
                lagged += 1;
            }
        }
        assert!(lagged > 0);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn send_with_reply_invokes_callback() {
        let bus = Arc::new(LocalBus::new());
        let _responder = echo_responder(bus.clone(), "svc.request");
        let client: Arc<dyn BusClient> = Arc::new(RequestClient::new(bus.clone()));
        let (tx, rx) = oneshot::channel();
        let request = BusMessage::new("svc.request", 3)
            .with_payload(&"ping")
            .expect("encode");
        send_with_reply(client, request, move |result| {
            let _ = tx.send(result);
        });
        let reply = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("callback timeout")
            .expect("callback ran")
            .expect("reply");
        assert_eq!(reply.decode::<String>().unwrap(), "ping");
    }
}
