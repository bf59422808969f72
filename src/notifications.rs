// Notification fan-out for mining rewards, unlocks and rank changes.
// Publishing never blocks: each subscriber owns a bounded queue that drops its
// oldest message when full.

use crate::metrics;
use crate::types::{Period, Player, PlayerId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    MiningReward,
    AchievementUnlocked,
    RankChanged,
    LeaderboardUpdated,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::MiningReward,
        Topic::AchievementUnlocked,
        Topic::RankChanged,
        Topic::LeaderboardUpdated,
    ];
}

/// Event body. Serializes as `{"type": <topic>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    MiningReward {
        player_id: PlayerId,
        amount_advc: Decimal,
        ap_awarded: i64,
    },
    AchievementUnlocked {
        player_id: PlayerId,
        achievement_code: String,
        ap_reward: i64,
    },
    RankChanged {
        wallet_address: String,
        period: Period,
        old_rank: u32,
        new_rank: u32,
    },
    LeaderboardUpdated {
        period: Period,
    },
}

impl Event {
    /// Whether the event is about this player. Events tied to no player,
    /// such as `leaderboard_updated`, concern everyone.
    pub fn concerns(&self, player_id: PlayerId, wallet_address: &str) -> bool {
        match self {
            Event::MiningReward { player_id: id, .. }
            | Event::AchievementUnlocked { player_id: id, .. } => *id == player_id,
            Event::RankChanged {
                wallet_address: wallet,
                ..
            } => wallet == wallet_address,
            Event::LeaderboardUpdated { .. } => true,
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Event::MiningReward { .. } => Topic::MiningReward,
            Event::AchievementUnlocked { .. } => Topic::AchievementUnlocked,
            Event::RankChanged { .. } => Topic::RankChanged,
            Event::LeaderboardUpdated { .. } => Topic::LeaderboardUpdated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn topic(&self) -> Topic {
        self.event.topic()
    }
}

/// Whose events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    /// One player's events plus broadcasts.
    Player {
        player_id: PlayerId,
        wallet_address: String,
    },
}

struct SubscriberQueue {
    topics: HashSet<Topic>,
    audience: Audience,
    capacity: usize,
    queue: Mutex<VecDeque<Notification>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn wants(&self, event: &Event) -> bool {
        if !self.topics.is_empty() && !self.topics.contains(&event.topic()) {
            return false;
        }
        match &self.audience {
            Audience::Everyone => true,
            Audience::Player {
                player_id,
                wallet_address,
            } => event.concerns(*player_id, wallet_address),
        }
    }

    /// Returns true when an older message had to be discarded.
    fn push(&self, notification: Notification) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        let overflowed = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(notification);
        drop(queue);
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        overflowed
    }

    fn pop(&self) -> Option<Notification> {
        self.queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }
}

struct HubInner {
    subscribers: DashMap<Uuid, Arc<SubscriberQueue>>,
    dropped_total: AtomicU64,
    default_capacity: usize,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        for entry in self.subscribers.iter() {
            entry.value().closed.store(true, Ordering::Release);
            entry.value().notify.notify_one();
        }
    }
}

/// Cheap to clone; all clones share the same subscriber set.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                dropped_total: AtomicU64::new(0),
                default_capacity: default_capacity.max(1),
            }),
        }
    }

    /// Subscribes to `topics` (all topics when empty) with a queue of `capacity`.
    pub fn subscribe(&self, topics: &[Topic], capacity: usize) -> Subscription {
        self.subscribe_as(Audience::Everyone, topics, capacity)
    }

    /// Like [`NotificationHub::subscribe`], but only `player`'s own events
    /// and broadcasts are queued. Other players' traffic never touches the
    /// queue or its drop count.
    pub fn subscribe_player(&self, player: &Player, topics: &[Topic], capacity: usize) -> Subscription {
        self.subscribe_as(
            Audience::Player {
                player_id: player.id,
                wallet_address: player.wallet_address.clone(),
            },
            topics,
            capacity,
        )
    }

    pub fn subscribe_as(&self, audience: Audience, topics: &[Topic], capacity: usize) -> Subscription {
        let id = Uuid::new_v4();
        debug!(
            "📡 [Notifications] Subscriber {} registered for {:?} ({:?})",
            id, topics, audience
        );
        let queue = Arc::new(SubscriberQueue {
            topics: topics.iter().copied().collect(),
            audience,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.inner.subscribers.insert(id, queue.clone());
        metrics::set_notification_subscribers(self.inner.subscribers.len());
        Subscription {
            id,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribes with the configured default capacity.
    pub fn subscribe_default(&self, topics: &[Topic]) -> Subscription {
        self.subscribe(topics, self.inner.default_capacity)
    }

    /// Fans the event out to every interested subscriber. Returns how many
    /// subscribers received it.
    pub fn publish(&self, event: Event) -> usize {
        let notification = Notification {
            event,
            timestamp: Utc::now(),
        };
        let topic = notification.topic();
        let mut delivered = 0;
        let mut dropped = 0u64;
        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(&notification.event) {
                continue;
            }
            if subscriber.push(notification.clone()) {
                dropped += 1;
            }
            delivered += 1;
        }
        if dropped > 0 {
            self.inner.dropped_total.fetch_add(dropped, Ordering::Relaxed);
            metrics::increment_notifications_dropped(dropped);
            warn!(
                "⚠️ [Notifications] {} slow subscriber(s) dropped their oldest {:?} message",
                dropped, topic
            );
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Messages dropped across all subscribers since start.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }
}

pub struct Subscription {
    id: Uuid,
    queue: Arc<SubscriberQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next message. Returns `None` once the hub is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(notification) = self.queue.pop() {
                return Some(notification);
            }
            if self.queue.closed.load(Ordering::Acquire) || self.hub.strong_count() == 0 {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.queue.pop()
    }

    /// Messages this subscriber lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue
            .queue
            .lock()
            .map(|q| q.len())
            .unwrap_or_else(|p| p.into_inner().len())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.remove(&self.id);
            metrics::set_notification_subscribers(hub.subscribers.len());
        }
    }
}
