//! Plain terminal output for chat events.

use std::io::{IsTerminal, Write};
use std::sync::Mutex;
use std::time::Duration;

use airchat_core::{ChatEvent, Message, RosterEntry};

const MOVE_UP_AND_CLEAR: &str = "\x1b[1A\r\x1b[2K";

/// Line text for an event, without the timestamp. `None` for events that are not shown.
pub fn render(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::PeerJoined { nickname, address } => {
            Some(status(&format!("{nickname} has joined from {}", address.ip())))
        }
        ChatEvent::PeerLeft { nickname, address } => {
            Some(status(&format!("{nickname} has left ({})", address.ip())))
        }
        ChatEvent::PeerTimedOut { nickname, address } => {
            Some(status(&format!("{nickname} @ {} has timed out", address.ip())))
        }
        ChatEvent::ChatLine {
            nickname,
            text,
            is_action,
            ..
        } => Some(chat_line(None, nickname, text, *is_action)),
        ChatEvent::NicknameChanged { old, new, .. } => {
            Some(status(&format!("{old} changed nick to {new}")))
        }
        ChatEvent::DeliveryCountUpdated { message, count } => Some(delivery_line(message, *count)),
        ChatEvent::DecodeError(_) => None,
    }
}

fn status(text: &str) -> String {
    format!(">> {text}")
}

fn chat_line(count: Option<u32>, nickname: &str, text: &str, is_action: bool) -> String {
    let count = count.map_or_else(|| "  ".to_string(), |c| format!("{c:2}"));
    if is_action {
        format!("{count} * {nickname} {text}")
    } else {
        format!("{count} [{nickname}] {text}")
    }
}

fn delivery_line(message: &Message, count: u32) -> String {
    chat_line(
        Some(count),
        &airchat_core::protocol::display_nick(&message.from),
        message.text(),
        message.event == airchat_core::Event::Me,
    )
}

fn roster_line(entry: &RosterEntry) -> String {
    let stale = if entry.stale { " (timed out)" } else { "" };
    format!(
        "  {} @ {} - seen {}s ago{stale}",
        entry.nickname,
        entry.address.ip(),
        round_secs(entry.seen_ago)
    )
}

fn round_secs(d: Duration) -> u64 {
    (d.as_millis() as u64 + 500) / 1000
}

/// Serializes output so concurrent tasks do not interleave lines.
pub struct Console {
    /// Id of the chat message printed on the last line, if any.
    last_line: Mutex<Option<String>>,
    /// Id of the last line we sent. The capture hears our own frames too.
    own_line: Mutex<Option<String>>,
    in_place: bool,
}

impl Console {
    pub fn new() -> Self {
        Self {
            last_line: Mutex::new(None),
            own_line: Mutex::new(None),
            in_place: std::io::stdout().is_terminal(),
        }
    }

    pub fn event(&self, event: &ChatEvent) {
        match event {
            ChatEvent::DecodeError(diag) => log::debug!("decode error: {diag}"),
            ChatEvent::DeliveryCountUpdated { message, .. } => {
                if let Some(line) = render(event) {
                    self.write(&line, Some(&message.id), true);
                }
            }
            ChatEvent::ChatLine { id, .. } if self.is_own_echo(id) => {
                log::trace!("own line {id} echoed by the link");
            }
            ChatEvent::ChatLine { id, .. } => {
                // The engine now counts acks for this line.
                if let Some(line) = render(event) {
                    self.write(&line, Some(id), false);
                }
            }
            _ => {
                if let Some(line) = render(event) {
                    self.write(&line, None, false);
                }
            }
        }
    }

    /// Line for something the local user sent.
    pub fn local(&self, message: &Message) {
        let line = chat_line(
            None,
            &message.from,
            message.text(),
            message.event == airchat_core::Event::Me,
        );
        *self.own_line.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.id.clone());
        self.write(&line, Some(&message.id), false);
    }

    fn is_own_echo(&self, id: &str) -> bool {
        self.own_line.lock().unwrap_or_else(|e| e.into_inner()).as_deref() == Some(id)
    }

    pub fn status(&self, text: &str) {
        self.write(&status(text), None, false);
    }

    pub fn roster(&self, entries: &[RosterEntry]) {
        self.status(&format!("Users ({}):", entries.len()));
        for entry in entries {
            self.status(&roster_line(entry));
        }
    }

    pub fn help(&self) {
        for line in airchat_core::command::help_lines() {
            self.status(line);
        }
        self.write("[  time  ] [# who saw msg] [nick] [message]", None, false);
    }

    /// Plain prompt text without timestamp or newline.
    pub fn prompt(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn write(&self, line: &str, tracks: Option<&str>, replace: bool) {
        let mut last = self.last_line.lock().unwrap_or_else(|e| e.into_inner());
        let rewrite = replace && self.in_place && last.as_deref() == tracks;
        let stamp = chrono::Local::now().format("%H:%M:%S");
        let mut out = std::io::stdout().lock();
        if rewrite {
            let _ = writeln!(out, "{MOVE_UP_AND_CLEAR}[{stamp}] {line}");
        } else {
            let _ = writeln!(out, "[{stamp}] {line}");
        }
        let _ = out.flush();
        *last = tracks.map(str::to_owned);
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
