//! Host-driven API: ChatCore receives payloads and local actions from the host, returns outputs.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::dedup::SeenSet;
use crate::presence::{PresenceTracker, RosterEntry};
use crate::protocol::{display_nick, Event, Message, DEFAULT_PREAMBLE};
use crate::wire;

/// Default interval between liveness pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// A peer is stale after this many ping intervals of silence.
pub const TIMEOUT_INTERVALS: u32 = 3;

/// Something the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    PeerJoined {
        nickname: String,
        address: SocketAddr,
    },
    PeerLeft {
        nickname: String,
        address: SocketAddr,
    },
    PeerTimedOut {
        nickname: String,
        address: SocketAddr,
    },
    ChatLine {
        id: String,
        nickname: String,
        address: SocketAddr,
        text: String,
        is_action: bool,
    },
    NicknameChanged {
        old: String,
        new: String,
        address: SocketAddr,
    },
    /// The tracked chat message has been acknowledged `count` times; update it in place.
    DeliveryCountUpdated { message: Message, count: u32 },
    /// Diagnostic only; the packet was dropped.
    DecodeError(String),
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Hand to the reliability sender.
    Broadcast(Message),
    Event(ChatEvent),
}

/// Latest chat message and how many acks referenced it.
struct PendingAck {
    message: Message,
    acks: u32,
}

/// Protocol engine. Owns the dedup window, the peer table and the pending-ack slot.
pub struct ChatCore {
    nickname: String,
    preamble: String,
    ping_interval: Duration,
    seen: SeenSet,
    presence: PresenceTracker,
    pending: Option<PendingAck>,
}

impl ChatCore {
    pub fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_owned(),
            preamble: DEFAULT_PREAMBLE.to_owned(),
            ping_interval: DEFAULT_PING_INTERVAL,
            seen: SeenSet::new(),
            presence: PresenceTracker::new(),
            pending: None,
        }
    }

    /// Set the datagram marker (must match the peers').
    pub fn set_preamble(&mut self, preamble: &str) {
        self.preamble = preamble.to_owned();
    }

    /// Set the ping interval; the liveness threshold follows it.
    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.ping_interval = interval;
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn liveness_threshold(&self) -> Duration {
        self.ping_interval.saturating_mul(TIMEOUT_INTERVALS)
    }

    /// Encode with this engine's preamble.
    pub fn encode(&self, msg: &Message) -> Vec<u8> {
        wire::encode(msg, &self.preamble)
    }

    /// Process one reassembled payload from `from`.
    pub fn on_payload(&mut self, from: SocketAddr, bytes: &[u8], now: Instant) -> Vec<Output> {
        match wire::decode(bytes, &self.preamble) {
            Ok(Some(msg)) => self.on_message(from, msg, now),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::debug!("dropping payload from {from}: {e}");
                vec![Output::Event(ChatEvent::DecodeError(format!("{from}: {e}")))]
            }
        }
    }

    /// Process one decoded message from `from`.
    pub fn on_message(&mut self, from: SocketAddr, msg: Message, now: Instant) -> Vec<Output> {
        if self.seen.contains(&msg.id) {
            log::trace!("duplicate {} {} from {from}", msg.event, msg.id);
            return Vec::new();
        }
        self.seen.record(&msg.id);
        self.presence.touch(from, &msg.from, now);

        let mut outputs = Vec::new();
        if msg.event != Event::Ack {
            let ack = Message::ack(&self.nickname, &msg.id);
            self.seen.record(&ack.id);
            outputs.push(Output::Broadcast(ack));
        }

        let nickname = display_nick(&msg.from);
        let event = match msg.event {
            Event::Join => {
                self.presence.revive(&from);
                Some(ChatEvent::PeerJoined {
                    nickname,
                    address: from,
                })
            }
            Event::Leave => {
                self.presence.remove(&from);
                Some(ChatEvent::PeerLeft {
                    nickname,
                    address: from,
                })
            }
            Event::Msg | Event::Me => {
                let event = ChatEvent::ChatLine {
                    id: msg.id.clone(),
                    nickname,
                    address: from,
                    text: msg.text().to_owned(),
                    is_action: msg.event == Event::Me,
                };
                self.pending = Some(PendingAck {
                    message: msg,
                    acks: 0,
                });
                Some(event)
            }
            // The record keeps `from`; the new name arrives with the peer's next message.
            Event::Nick => Some(ChatEvent::NicknameChanged {
                old: nickname,
                new: display_nick(msg.text()),
                address: from,
            }),
            Event::Ping => None,
            Event::Ack => self.count_ack(msg.data.as_deref()),
            Event::Unrecognized(ref tag) => {
                log::debug!("ignoring unrecognized event {tag:?} from {from}");
                None
            }
        };
        outputs.extend(event.map(Output::Event));
        outputs
    }

    fn count_ack(&mut self, acked_id: Option<&str>) -> Option<ChatEvent> {
        let pending = self.pending.as_mut()?;
        if acked_id != Some(pending.message.id.as_str()) {
            return None;
        }
        pending.acks += 1;
        Some(ChatEvent::DeliveryCountUpdated {
            message: pending.message.clone(),
            count: pending.acks,
        })
    }

    /// Periodic liveness check. Returns one `PeerTimedOut` per newly stale peer.
    pub fn tick_liveness(&mut self, now: Instant) -> Vec<ChatEvent> {
        self.presence
            .sweep(self.liveness_threshold(), now)
            .into_iter()
            .map(|(address, record)| ChatEvent::PeerTimedOut {
                nickname: display_nick(&record.nickname),
                address,
            })
            .collect()
    }

    pub fn join(&self) -> Message {
        Message::join(&self.nickname)
    }

    pub fn leave(&self) -> Message {
        Message::leave(&self.nickname)
    }

    pub fn ping(&self) -> Message {
        Message::ping(&self.nickname)
    }

    /// Send a chat line; it becomes the message whose delivery is counted.
    pub fn say(&mut self, text: &str) -> Message {
        self.track(Message::msg(&self.nickname, text))
    }

    /// Send an action line (`/me`).
    pub fn act(&mut self, action: &str) -> Message {
        self.track(Message::me(&self.nickname, action))
    }

    /// Announce a nickname change under the old name, then switch to the new one.
    pub fn change_nick(&mut self, new_nick: &str) -> Message {
        let msg = Message::nick(&self.nickname, new_nick);
        self.nickname = new_nick.to_owned();
        msg
    }

    fn track(&mut self, msg: Message) -> Message {
        self.pending = Some(PendingAck {
            message: msg.clone(),
            acks: 0,
        });
        msg
    }

    /// The message whose acks are being counted, and the count so far.
    pub fn pending_delivery(&self) -> Option<(&Message, u32)> {
        self.pending.as_ref().map(|p| (&p.message, p.acks))
    }

    pub fn roster(&self, now: Instant) -> Vec<RosterEntry> {
        self.presence.roster(now)
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }
}
