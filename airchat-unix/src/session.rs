//! Chat session: wires the capture stream, the engine, the reliability sender and the console.

use std::sync::Arc;
use std::time::{Duration, Instant};

use airchat_core::{command, ChatCore, Command, Output, Reassembler};
use tokio::io::AsyncBufRead;
use tokio::sync::Mutex;

use crate::capture::{CaptureError, CaptureStream};
use crate::console::Console;
use crate::link::LinkActivity;
use crate::sender::ReliableSender;

/// Engine clock reading, taken from tokio so paused-time tests drive it too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Shared handles for the session's tasks. Engine state is only touched under `core`'s lock,
/// and the lock is never held across a send or a print.
#[derive(Clone)]
pub struct Session {
    core: Arc<Mutex<ChatCore>>,
    sender: Arc<ReliableSender>,
    console: Arc<Console>,
    activity: Arc<LinkActivity>,
}

impl Session {
    pub fn new(
        core: ChatCore,
        sender: Arc<ReliableSender>,
        console: Arc<Console>,
        activity: Arc<LinkActivity>,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
            sender,
            console,
            activity,
        }
    }

    async fn apply(&self, outputs: Vec<Output>) {
        for output in outputs {
            match output {
                Output::Broadcast(msg) => self.sender.broadcast(msg).await,
                Output::Event(event) => self.console.event(&event),
            }
        }
    }

    /// Read task: capture records → reassembler → engine. Returns only when the capture fails.
    pub async fn run_capture<R: AsyncBufRead + Unpin>(
        self,
        mut stream: CaptureStream<R>,
    ) -> CaptureError {
        let mut reassembler = Reassembler::new();
        loop {
            let record = match stream.next_record().await {
                Ok(record) => record,
                Err(e) => return e,
            };
            match reassembler.push(record) {
                Ok(Some(payload)) => {
                    self.activity.mark().await;
                    let outputs =
                        self.core
                            .lock()
                            .await
                            .on_payload(payload.source, &payload.bytes, now());
                    self.apply(outputs).await;
                }
                Ok(None) => {}
                Err(e) => log::debug!("reassembly: {e}"),
            }
        }
    }

    /// Liveness task: ping, wait one interval, then report peers that went quiet.
    pub async fn run_liveness(self, interval: Duration) {
        loop {
            let ping = self.core.lock().await.ping();
            self.sender.broadcast(ping).await;
            tokio::time::sleep(interval).await;
            let timed_out = self.core.lock().await.tick_liveness(now());
            for event in timed_out {
                self.console.event(&event);
            }
        }
    }

    /// Input task: one command per line until `/quit` or end of input.
    pub async fn run_input<R: AsyncBufRead + Unpin>(self, mut lines: tokio::io::Lines<R>) {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    log::warn!("reading input failed: {e}");
                    return;
                }
            };
            if !self.handle(command::parse(&line)).await {
                return;
            }
        }
    }

    /// Run one command. Returns false when the user asked to quit.
    pub async fn handle(&self, cmd: Command) -> bool {
        match cmd {
            Command::Empty => {}
            Command::Say(text) => {
                let msg = self.core.lock().await.say(&text);
                self.console.local(&msg);
                self.sender.broadcast(msg).await;
            }
            Command::Me(action) => {
                let msg = self.core.lock().await.act(&action);
                self.console.local(&msg);
                self.sender.broadcast(msg).await;
            }
            Command::Nick(new_nick) => {
                let msg = self.core.lock().await.change_nick(&new_nick);
                self.console.status(&format!("you are now known as {new_nick}"));
                self.sender.broadcast(msg).await;
            }
            Command::Who => self.show_who().await,
            Command::Help => self.console.help(),
            Command::Quit => return false,
            Command::Unknown(line) => {
                self.console.status(&format!("Unknown command: {line}"));
                self.console.help();
            }
        }
        true
    }

    pub async fn show_who(&self) {
        let roster = self.core.lock().await.roster(now());
        self.console.roster(&roster);
    }

    /// Announce ourselves and wait until every copy is out.
    pub async fn join(&self) {
        let msg = self.core.lock().await.join();
        if self.sender.broadcast_and_wait(msg).await == 0 {
            log::warn!("join announcement could not be sent");
        }
    }

    /// Say goodbye (fully sent), then let in-flight broadcasts finish.
    pub async fn leave(&self) {
        let msg = self.core.lock().await.leave();
        self.sender.broadcast_and_wait(msg).await;
        log::debug!("draining {} in-flight broadcasts", self.sender.in_flight().await);
        self.sender.drain().await;
    }

    #[cfg(test)]
    async fn with_core<T>(&self, f: impl FnOnce(&ChatCore) -> T) -> T {
        f(&*self.core.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use airchat_core::{Event, Message};
    use tokio::net::UdpSocket;

    async fn session() -> (Session, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Arc::new(Transport::from_socket(sock, receiver.local_addr().unwrap()));
        let sender = Arc::new(ReliableSender::new(
            transport,
            airchat_core::DEFAULT_PREAMBLE,
            1,
            Duration::ZERO,
        ));
        let s = Session::new(
            ChatCore::new("me"),
            sender,
            Arc::new(Console::new()),
            Arc::new(LinkActivity::new()),
        );
        (s, receiver)
    }

    async fn recv_message(receiver: &UdpSocket) -> Message {
        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .expect("datagram within 5s")
            .unwrap();
        airchat_core::decode(&buf[..n], airchat_core::DEFAULT_PREAMBLE)
            .unwrap()
            .unwrap()
    }

    /// Hex dump lines for one captured datagram carrying `payload`.
    fn capture_text(source: &str, payload: &[u8]) -> String {
        let mut frame = vec![0u8; airchat_core::reassembly::PAYLOAD_OFFSET];
        frame.extend_from_slice(payload);
        let mut out = format!(
            "12:00:00.000000 IP6 {source}.1337 > ff02::fb.1337: UDP, length {}\n",
            payload.len()
        );
        for (i, chunk) in frame.chunks(16).enumerate() {
            out.push_str(&format!("\t0x{:04x}:  {}\n", i * 16, hex::encode(chunk)));
        }
        out
    }

    #[tokio::test]
    async fn captured_join_is_acked_once() {
        let (s, receiver) = session().await;
        let join = Message::join("alice");
        let bytes = airchat_core::encode(&join, airchat_core::DEFAULT_PREAMBLE);
        let text = capture_text("fe80::2", &bytes).repeat(3);
        let stream = CaptureStream::from_reader(text.as_bytes(), None);
        let err = s.clone().run_capture(stream).await;
        assert!(matches!(err, CaptureError::Exited));

        let ack = recv_message(&receiver).await;
        assert_eq!(ack.event, Event::Ack);
        assert_eq!(ack.data.as_deref(), Some(join.id.as_str()));
        s.sender.drain().await;
        let mut buf = [0u8; 64];
        assert!(receiver.try_recv_from(&mut buf).is_err(), "only one ack");
        let roster = s.with_core(|c| c.roster(now())).await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].nickname, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_pings_then_flags_silent_peer() {
        let (s, receiver) = session().await;
        let peer: std::net::SocketAddr = "[fe80::2]:1337".parse().unwrap();
        {
            let mut core = s.core.lock().await;
            core.set_ping_interval(Duration::from_secs(1));
            core.on_message(peer, Message::join("alice"), now());
        }
        let task = tokio::spawn(s.clone().run_liveness(Duration::from_secs(1)));
        let timed_out = |c: &ChatCore| c.presence().get(&peer).map(|r| r.timed_out);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(s.with_core(timed_out).await, Some(false));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.with_core(timed_out).await, Some(true));
        task.abort();

        let ping = recv_message(&receiver).await;
        assert_eq!(ping.event, Event::Ping);
        assert_eq!(ping.from, "me");
    }

    #[tokio::test]
    async fn say_broadcasts_and_tracks() {
        let (s, receiver) = session().await;
        assert!(s.handle(Command::Say("hello".into())).await);
        let sent = recv_message(&receiver).await;
        assert_eq!(sent.event, Event::Msg);
        assert_eq!(sent.text(), "hello");
        let pending = s
            .with_core(|c| c.pending_delivery().map(|(m, n)| (m.id.clone(), n)))
            .await;
        assert_eq!(pending, Some((sent.id, 0)));
    }

    #[tokio::test]
    async fn nick_switches_local_name() {
        let (s, receiver) = session().await;
        assert!(s.handle(Command::Nick("neo".into())).await);
        let sent = recv_message(&receiver).await;
        assert_eq!(sent.event, Event::Nick);
        assert_eq!(sent.from, "me");
        assert_eq!(s.with_core(|c| c.nickname().to_owned()).await, "neo");
    }

    #[tokio::test]
    async fn quit_stops_input_and_leave_is_sent() {
        let (s, receiver) = session().await;
        let input = tokio::io::AsyncBufReadExt::lines(&b"/who\n/quit\nnever sent\n"[..]);
        s.clone().run_input(input).await;
        s.leave().await;
        let leave = recv_message(&receiver).await;
        assert_eq!(leave.event, Event::Leave);
        let mut buf = [0u8; 64];
        assert!(receiver.try_recv_from(&mut buf).is_err());
    }
}
