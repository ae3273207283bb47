use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Bus, BusMessage};

/// Responder side of the protocol. Returning `Some` publishes the reply.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, message: BusMessage) -> Option<BusMessage>;
}

/// Subscribe `handler` to `topics` and publish whatever it replies.
///
/// Subscriptions are taken before this returns. Each message is handled on
/// its own task, so a slow request does not hold up the ones behind it.
/// Messages skipped because the loop lagged are never seen by the handler;
/// their requesters only learn of it through their own timeout.
pub fn serve<B, H>(bus: Arc<B>, topics: &[&str], handler: Arc<H>) -> Vec<JoinHandle<()>>
where
    B: Bus + ?Sized + 'static,
    H: Handler + ?Sized,
{
    topics
        .iter()
        .map(|topic| {
            let topic = topic.to_string();
            let mut sub = bus.subscribe(&topic);
            let bus = Arc::clone(&bus);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                loop {
                    match sub.recv().await {
                        Ok(msg) => {
                            let bus = Arc::clone(&bus);
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move { dispatch(bus.as_ref(), handler.as_ref(), msg).await });
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target = "bus.serve", topic = %topic, skipped, "handler lagged behind topic");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(target = "bus.serve", topic = %topic, "topic closed");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}

async fn dispatch<B, H>(bus: &B, handler: &H, msg: BusMessage)
where
    B: Bus + ?Sized,
    H: Handler + ?Sized,
{
    let topic = msg.topic.clone();
    let msg_type = msg.msg_type;
    let Some(reply) = handler.handle(msg).await else {
        return;
    };
    if reply.correlation.is_none() {
        debug!(target = "bus.serve", topic = %topic, msg_type, "reply to uncorrelated message dropped");
        return;
    }
    if let Err(err) = bus.publish(reply) {
        warn!(target = "bus.serve", topic = %topic, msg_type, error = %err, "failed to publish reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusClient, LocalBus, RequestClient};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Doubler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Doubler {
        async fn handle(&self, message: BusMessage) -> Option<BusMessage> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let n: u64 = message.decode().ok()?;
            message.reply().with_payload(&(n * 2)).ok()
        }
    }

    #[tokio::test]
    async fn serves_correlated_requests() {
        let bus = Arc::new(LocalBus::new());
        let handler = Arc::new(Doubler {
            seen: AtomicUsize::new(0),
        });
        let _tasks = serve(bus.clone(), &["math.request"], handler.clone());
        let client = RequestClient::new(bus.clone());

        let request = BusMessage::new("math.request", 1)
            .with_payload(&21u64)
            .expect("encode");
        let reply = tokio::time::timeout(Duration::from_secs(2), client.send_and(request))
            .await
            .expect("timeout")
            .expect("reply");
        assert_eq!(reply.decode::<u64>().unwrap(), 42);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keeps_serving_after_lag() {
        let bus = Arc::new(LocalBus::with_capacity(4));
        let handler = Arc::new(Doubler {
            seen: AtomicUsize::new(0),
        });
        let _tasks = serve(bus.clone(), &["math.request"], handler.clone());
        let wait_for = |n: usize| {
            let handler = handler.clone();
            tokio::time::timeout(Duration::from_secs(2), async move {
                while handler.seen.load(Ordering::SeqCst) < n {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        for n in 0..10u64 {
            let msg = BusMessage::new("math.request", 1).with_payload(&n).expect("encode");
            bus.publish(msg).expect("publish");
        }
        wait_for(4).await.expect("buffered messages handled");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 4);

        let msg = BusMessage::new("math.request", 1).with_payload(&1u64).expect("encode");
        bus.publish(msg).expect("publish");
        wait_for(5).await.expect("served after lag");
    }

    #[tokio::test]
    async fn uncorrelated_messages_get_no_reply() {
        let bus = Arc::new(LocalBus::new());
        let handler = Arc::new(Doubler {
            seen: AtomicUsize::new(0),
        });
        let _tasks = serve(bus.clone(), &["math.request"], handler.clone());
        let mut echo = bus.subscribe("math.request");

        let msg = BusMessage::new("math.request", 1)
            .with_payload(&2u64)
            .expect("encode");
        bus.publish(msg).expect("publish");
        echo.recv().await.expect("own message");

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler ran");
        // The default reply would have gone back to the request topic.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(echo.try_recv().is_err());
    }
}
