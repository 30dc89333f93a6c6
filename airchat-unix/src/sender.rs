//! Reliability sender: every outbound message goes out several times, each on its own task.

use std::sync::Arc;
use std::time::Duration;

use airchat_core::Message;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::transport::Transport;

/// Default copies per message; the medium has no retransmission of its own.
pub const DEFAULT_RELIABILITY_FACTOR: u32 = 3;

/// Default pause between copies.
pub const DEFAULT_RETRANSMIT_DELAY: Duration = Duration::from_millis(100);

/// Spawns one short-lived task per message and keeps track of them until shutdown.
pub struct ReliableSender {
    transport: Arc<Transport>,
    preamble: String,
    copies: u32,
    delay: Duration,
    tasks: Mutex<JoinSet<()>>,
}

impl ReliableSender {
    pub fn new(transport: Arc<Transport>, preamble: &str, copies: u32, delay: Duration) -> Self {
        Self {
            transport,
            preamble: preamble.to_owned(),
            copies: copies.max(1),
            delay,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Fire and forget: returns as soon as the task is spawned.
    pub async fn broadcast(&self, msg: Message) {
        let bytes = airchat_core::encode(&msg, &self.preamble);
        let transport = self.transport.clone();
        let (copies, delay) = (self.copies, self.delay);
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            send_copies(&transport, &msg, &bytes, copies, delay).await;
        });
    }

    /// Send all copies before returning (join on startup, leave on shutdown).
    /// Returns how many copies the socket accepted.
    pub async fn broadcast_and_wait(&self, msg: Message) -> u32 {
        let bytes = airchat_core::encode(&msg, &self.preamble);
        send_copies(&self.transport, &msg, &bytes, self.copies, self.delay).await
    }

    /// Wait for every in-flight broadcast to finish.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(res) = pending.join_next().await {
            if let Err(e) = res {
                log::warn!("broadcast task failed: {e}");
            }
        }
    }

    /// Broadcast tasks not yet reaped.
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

async fn send_copies(
    transport: &Transport,
    msg: &Message,
    bytes: &[u8],
    copies: u32,
    delay: Duration,
) -> u32 {
    let mut sent = 0;
    for attempt in 1..=copies {
        match transport.send(bytes).await {
            Ok(()) => sent += 1,
            Err(e) => log::warn!(
                "send {} {} attempt {attempt}/{copies} failed: {e}",
                msg.event,
                msg.id
            ),
        }
        if attempt < copies {
            tokio::time::sleep(delay).await;
        }
    }
    log::trace!("sent {} {} {sent}/{copies}", msg.event, msg.id);
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn loopback() -> (Arc<Transport>, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Transport::from_socket(sock, receiver.local_addr().unwrap());
        (Arc::new(transport), receiver)
    }

    async fn recv_all(receiver: &UdpSocket, n: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 2048];
        for _ in 0..n {
            let (len, _) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
                .await
                .expect("datagram within 5s")
                .unwrap();
            out.push(buf[..len].to_vec());
        }
        out
    }

    #[tokio::test]
    async fn sends_identical_copies() {
        let (transport, receiver) = loopback().await;
        let sender = ReliableSender::new(transport, "__AIRCHAT:", 3, Duration::from_millis(5));
        let msg = Message::msg("alice", "hi");
        assert_eq!(sender.broadcast_and_wait(msg.clone()).await, 3);
        let got = recv_all(&receiver, 3).await;
        let expected = airchat_core::encode(&msg, "__AIRCHAT:");
        assert!(got.iter().all(|d| *d == expected));
    }

    #[tokio::test]
    async fn concurrent_broadcasts_are_drained() {
        let (transport, receiver) = loopback().await;
        let sender = ReliableSender::new(transport, "__AIRCHAT:", 2, Duration::from_millis(20));
        let ping = Message::ping("alice");
        let line = Message::msg("alice", "hello");
        sender.broadcast(ping.clone()).await;
        sender.broadcast(line.clone()).await;
        sender.drain().await;
        assert_eq!(sender.in_flight().await, 0);

        let got = recv_all(&receiver, 4).await;
        let ping_bytes = airchat_core::encode(&ping, "__AIRCHAT:");
        let line_bytes = airchat_core::encode(&line, "__AIRCHAT:");
        assert_eq!(got.iter().filter(|d| **d == ping_bytes).count(), 2);
        assert_eq!(got.iter().filter(|d| **d == line_bytes).count(), 2);
    }

    #[tokio::test]
    async fn failed_sends_do_not_stop_later_copies() {
        // An IPv4 socket cannot reach an IPv6 destination; every attempt fails but the task ends.
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Transport::from_socket(sock, "[::1]:9".parse().unwrap());
        let delay = Duration::from_millis(20);
        let sender = ReliableSender::new(Arc::new(transport), "__AIRCHAT:", 3, delay);
        let started = std::time::Instant::now();
        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            sender.broadcast_and_wait(Message::ping("alice")),
        )
        .await
        .expect("all attempts complete");
        assert_eq!(sent, 0);
        // Only waiting between attempts: two pauses means the third attempt was made.
        assert!(started.elapsed() >= delay * 2);
    }

    #[test]
    fn zero_copies_means_one() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (transport, receiver) = loopback().await;
            let sender = ReliableSender::new(transport, "__AIRCHAT:", 0, Duration::ZERO);
            sender.broadcast_and_wait(Message::ping("alice")).await;
            assert_eq!(recv_all(&receiver, 1).await.len(), 1);
        });
    }
}
