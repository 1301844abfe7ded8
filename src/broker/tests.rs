use super::key::{RoomKey, TopicType};
use super::limiter::RateLimiter;
use super::registry::RoomRegistry;
use super::room::{Room, RoomConfig};
use super::subscriber::{Closer, Delivery, Subscriber};
use crate::utils::error::{PublishError, RoomKeyError};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingCloser {
    calls: AtomicUsize,
}

impl Closer for CountingCloser {
    fn close_slow(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingCloser {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn unlimited(queue_capacity: usize) -> RoomConfig {
    RoomConfig {
        queue_capacity,
        publish_interval: Duration::ZERO,
        publish_burst: 1,
    }
}

fn forum(id: &str) -> RoomKey {
    RoomKey::new(TopicType::Forum, id).unwrap()
}

fn subscriber(capacity: usize) -> (Arc<Subscriber>, mpsc::Receiver<Bytes>, Arc<CountingCloser>) {
    let closer = Arc::new(CountingCloser::default());
    let (sub, rx) = Subscriber::new(capacity, closer.clone());
    (sub, rx, closer)
}

fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(payload);
    }
    out
}

#[test]
fn test_topic_type_spellings() {
    assert_eq!("forums".parse::<TopicType>().unwrap(), TopicType::Forum);
    assert_eq!("A".parse::<TopicType>().unwrap(), TopicType::Article);
    assert_eq!("Poll".parse::<TopicType>().unwrap(), TopicType::Poll);
    assert_eq!("".parse::<TopicType>(), Err(RoomKeyError::MissingType));
    assert_eq!(
        "thread".parse::<TopicType>(),
        Err(RoomKeyError::UnknownType("thread".to_string()))
    );
}

#[test]
fn test_room_key_equality_and_display() {
    let a = RoomKey::parse("forum", "F1").unwrap();
    let b = RoomKey::new(TopicType::Forum, "F1").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "forum_F1");
    assert_ne!(a, RoomKey::new(TopicType::Poll, "F1").unwrap());
    assert_eq!(RoomKey::parse("forum", " "), Err(RoomKeyError::MissingId));
}

#[test]
fn test_subscriber_queue_is_bounded() {
    let (sub, mut rx, _) = subscriber(2);
    assert_eq!(sub.capacity(), 2);
    assert_eq!(sub.try_deliver(Bytes::from_static(b"1")), Delivery::Queued);
    assert_eq!(sub.try_deliver(Bytes::from_static(b"2")), Delivery::Queued);
    assert_eq!(sub.try_deliver(Bytes::from_static(b"3")), Delivery::Full);
    assert_eq!(drain(&mut rx).len(), 2);
    drop(rx);
    assert_eq!(sub.try_deliver(Bytes::from_static(b"4")), Delivery::Gone);
}

#[test]
fn test_zero_capacity_is_clamped() {
    let (sub, _rx, _) = subscriber(0);
    assert_eq!(sub.capacity(), 1);
}

#[test]
fn test_room_add_and_remove_is_idempotent() {
    let room = Room::new(forum("F1"), unlimited(4));
    let (sub, _rx, _) = subscriber(4);
    let id = sub.id();

    room.add_subscriber(sub);
    assert!(room.contains(&id));
    assert_eq!(room.subscriber_count(), 1);

    assert!(room.remove_subscriber(&id));
    assert!(!room.remove_subscriber(&id));
    assert_eq!(room.subscriber_count(), 0);
}

#[tokio::test]
async fn test_fan_out_reaches_every_subscriber_in_order() {
    let room = Room::new(forum("F1"), unlimited(8));
    let cancel = CancellationToken::new();
    let mut receivers = Vec::new();
    for _ in 0..5 {
        let (sub, rx, _) = subscriber(8);
        room.add_subscriber(sub);
        receivers.push(rx);
    }

    for n in 0..3 {
        let fan_out = room
            .publish(Bytes::from(format!("msg-{n}")), &cancel)
            .await
            .unwrap();
        assert_eq!(fan_out.delivered, 5);
        assert_eq!(fan_out.evicted, 0);
    }

    for rx in &mut receivers {
        let got = drain(rx);
        assert_eq!(got, vec!["msg-0", "msg-1", "msg-2"]);
    }
}

#[tokio::test]
async fn test_publish_delivers_payload_verbatim() {
    let room = Room::new(forum("F1"), unlimited(2));
    let (sub, mut rx, _) = subscriber(2);
    room.add_subscriber(sub);

    let payload = Bytes::from_static(&[0xff, 0x00, b'{', b'}']);
    room.publish(payload.clone(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rx.try_recv().unwrap(), payload);
}

#[tokio::test]
async fn test_slow_consumer_is_isolated() {
    let room = Room::new(forum("F1"), unlimited(1));
    let cancel = CancellationToken::new();

    let (slow, mut slow_rx, slow_closer) = subscriber(1);
    let (fast, mut fast_rx, fast_closer) = subscriber(1);
    let slow_id = slow.id();
    let fast_id = fast.id();
    room.add_subscriber(slow);
    room.add_subscriber(fast);

    room.publish(Bytes::from_static(b"one"), &cancel).await.unwrap();
    assert_eq!(fast_rx.try_recv().unwrap(), "one");

    let fan_out = room.publish(Bytes::from_static(b"two"), &cancel).await.unwrap();
    assert_eq!(fan_out.delivered, 1);
    assert_eq!(fan_out.evicted, 1);
    assert_eq!(fast_rx.try_recv().unwrap(), "two");

    assert_eq!(slow_closer.calls(), 1);
    assert_eq!(fast_closer.calls(), 0);
    assert!(!room.contains(&slow_id));
    assert!(room.contains(&fast_id));

    // the evicted subscriber kept what it had queued, nothing more
    assert_eq!(drain(&mut slow_rx), vec!["one"]);
    // later teardown of the evicted subscriber is a no-op
    assert!(!room.remove_subscriber(&slow_id));
}

#[tokio::test]
async fn test_gone_subscriber_is_dropped_without_close() {
    let room = Room::new(forum("F1"), unlimited(2));
    let (sub, rx, closer) = subscriber(2);
    let id = sub.id();
    room.add_subscriber(sub);
    drop(rx);

    let fan_out = room
        .publish(Bytes::from_static(b"hello"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fan_out.delivered, 0);
    assert_eq!(fan_out.evicted, 0);
    assert_eq!(closer.calls(), 0);
    assert!(!room.contains(&id));
}

#[tokio::test]
async fn test_forum_room_evicts_paused_consumer() {
    let registry = RoomRegistry::new(unlimited(2));
    let key = RoomKey::parse("forum", "F1").unwrap();
    let cancel = CancellationToken::new();

    let (a, mut a_rx, a_closer) = subscriber(registry.config().queue_capacity);
    let (b, mut b_rx, b_closer) = subscriber(registry.config().queue_capacity);
    let (c, mut c_rx, c_closer) = subscriber(registry.config().queue_capacity);
    let a_id = a.id();
    let room = registry.join(&key, a);
    registry.join(&key, b);
    registry.join(&key, c);
    assert_eq!(room.subscriber_count(), 3);

    registry.publish(&key, Bytes::from_static(b"m1"), &cancel).await.unwrap();
    registry.publish(&key, Bytes::from_static(b"m2"), &cancel).await.unwrap();

    // B and C keep up, A is paused
    assert_eq!(drain(&mut b_rx), vec!["m1", "m2"]);
    assert_eq!(drain(&mut c_rx), vec!["m1", "m2"]);

    let fan_out = registry
        .publish(&key, Bytes::from_static(b"m3"), &cancel)
        .await
        .unwrap();
    assert_eq!(fan_out.delivered, 2);
    assert_eq!(fan_out.evicted, 1);

    assert_eq!(a_closer.calls(), 1);
    assert_eq!(b_closer.calls(), 0);
    assert_eq!(c_closer.calls(), 0);
    assert!(!room.contains(&a_id));
    assert_eq!(drain(&mut a_rx), vec!["m1", "m2"]);
    assert_eq!(drain(&mut b_rx), vec!["m3"]);
    assert_eq!(drain(&mut c_rx), vec!["m3"]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_allows_burst_then_blocks() {
    let limiter = RateLimiter::new(Duration::from_millis(100), 8);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    for _ in 0..8 {
        limiter.acquire(&cancel).await.unwrap();
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire(&cancel).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_publish_beyond_burst_blocks_until_refill() {
    let config = RoomConfig {
        queue_capacity: 32,
        publish_interval: Duration::from_millis(100),
        publish_burst: 8,
    };
    let room = Room::new(forum("F1"), config);
    let (sub, mut rx, closer) = subscriber(32);
    room.add_subscriber(sub);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    for n in 0..20u64 {
        room.publish(Bytes::from(n.to_string()), &cancel).await.unwrap();
        let elapsed = start.elapsed();
        if n < 8 {
            assert!(elapsed < Duration::from_millis(100), "publish {n} waited");
        } else {
            assert!(
                elapsed >= Duration::from_millis(100 * (n - 7)),
                "publish {n} completed after only {elapsed:?}"
            );
        }
    }

    // nothing was dropped on the way
    assert_eq!(drain(&mut rx).len(), 20);
    assert_eq!(closer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_does_not_deliver() {
    let config = RoomConfig {
        queue_capacity: 4,
        publish_interval: Duration::from_secs(1),
        publish_burst: 1,
    };
    let room = Arc::new(Room::new(forum("F1"), config));
    let (sub, mut rx, _) = subscriber(4);
    room.add_subscriber(sub);

    let cancel = CancellationToken::new();
    room.publish(Bytes::from_static(b"first"), &cancel).await.unwrap();

    let waiting = {
        let room = room.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { room.publish(Bytes::from_static(b"second"), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    assert_eq!(waiting.await.unwrap(), Err(PublishError::Cancelled));
    assert_eq!(drain(&mut rx), vec!["first"]);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_returns_its_token() {
    let limiter = RateLimiter::new(Duration::from_millis(100), 1);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    limiter.acquire(&cancel).await.unwrap();
    // the caller gives up on the second acquire without cancelling it
    let abandoned = tokio::time::timeout(Duration::from_millis(10), limiter.acquire(&cancel)).await;
    assert!(abandoned.is_err());

    // only the first token is spent, so the next one matures at ~100ms, not ~200ms
    limiter.acquire(&cancel).await.unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(150),
        "waited {:?}",
        start.elapsed()
    );
}

#[test]
fn test_limiter_clamps_burst() {
    let limiter = RateLimiter::new(Duration::from_millis(100), 0);
    assert_eq!(limiter.burst(), 1);
    assert_eq!(limiter.interval(), Duration::from_millis(100));
}

#[tokio::test]
async fn test_already_cancelled_token_fails_fast() {
    let limiter = RateLimiter::new(Duration::from_millis(100), 8);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(limiter.acquire(&cancel).await, Err(PublishError::Cancelled));
}

#[test]
fn test_registry_reuses_rooms() {
    let registry = RoomRegistry::default();
    assert!(registry.is_empty());
    assert!(registry.get(&forum("F1")).is_none());

    let first = registry.resolve(&forum("F1"));
    let again = registry.resolve(&forum("F1"));
    let other = registry.resolve(&forum("F2"));

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(first.key(), &forum("F1"));
    assert_eq!(first.config(), registry.config());
    assert_eq!(registry.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolve_yields_one_room() {
    let registry = Arc::new(RoomRegistry::default());
    let key = RoomKey::parse("poll", "P7").unwrap();

    let mut handles = Vec::new();
    for _ in 0..64 {
        let registry = registry.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { registry.resolve(&key) }));
    }

    let mut rooms = Vec::new();
    for handle in handles {
        rooms.push(handle.await.unwrap());
    }
    assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fan_out_while_members_churn() {
    let room = Arc::new(Room::new(forum("F1"), unlimited(1)));
    let (stable, mut stable_rx, stable_closer) = subscriber(2048);
    room.add_subscriber(stable);

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let room = room.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let (sub, _rx, _) = subscriber(1);
                    let id = sub.id();
                    room.add_subscriber(sub);
                    tokio::task::yield_now().await;
                    room.remove_subscriber(&id);
                }
            })
        })
        .collect();

    let publisher = {
        let room = room.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for n in 0..2000 {
                room.publish(Bytes::from(n.to_string()), &cancel).await.unwrap();
            }
        })
    };

    for churner in churners {
        churner.await.unwrap();
    }
    publisher.await.unwrap();

    let expected: Vec<Bytes> = (0..2000).map(|n| Bytes::from(n.to_string())).collect();
    assert_eq!(drain(&mut stable_rx), expected);
    assert_eq!(stable_closer.calls(), 0);
    assert_eq!(room.subscriber_count(), 1);
}

#[tokio::test]
async fn test_registry_publish_creates_missing_room() {
    let registry = RoomRegistry::new(unlimited(2));
    let key = RoomKey::parse("article", "A1").unwrap();

    let fan_out = registry
        .publish(&key, Bytes::from_static(b"nobody home"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fan_out.delivered, 0);
    assert!(registry.get(&key).is_some());
}

#[test]
fn test_sweep_removes_only_empty_rooms() {
    let registry = RoomRegistry::new(unlimited(2));
    let (sub, _rx, _) = subscriber(2);
    let sub_id = sub.id();

    let busy = registry.join(&forum("busy"), sub);
    registry.resolve(&forum("empty"));
    assert_eq!(registry.len(), 2);

    assert_eq!(registry.sweep_idle(Duration::ZERO), 1);
    assert!(registry.get(&forum("busy")).is_some());
    assert!(registry.get(&forum("empty")).is_none());

    busy.remove_subscriber(&sub_id);
    assert_eq!(registry.sweep_idle(Duration::ZERO), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_honours_grace_period() {
    let registry = RoomRegistry::new(unlimited(2));
    registry.resolve(&forum("F1"));

    assert_eq!(registry.sweep_idle(Duration::from_secs(30)), 0);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(registry.sweep_idle(Duration::from_secs(30)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_on_shutdown() {
    let registry = Arc::new(RoomRegistry::new(unlimited(2)));
    registry.resolve(&forum("F1"));
    let shutdown = CancellationToken::new();

    let sweeper = tokio::spawn(registry.clone().run_sweeper(
        Duration::from_secs(1),
        Duration::from_secs(5),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(registry.is_empty());

    shutdown.cancel();
    sweeper.await.unwrap();
}
