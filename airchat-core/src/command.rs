//! Local input: slash commands and nickname sanitizing.

use crate::protocol::MAX_NICK_LENGTH;

/// What the user asked for with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Say(String),
    Me(String),
    Nick(String),
    Who,
    Help,
    Quit,
    Unknown(String),
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Leading run of word characters, at most `MAX_NICK_LENGTH` long.
pub fn sanitize_nickname(input: &str) -> String {
    input
        .trim_start()
        .chars()
        .take_while(|c| is_word_char(*c))
        .take(MAX_NICK_LENGTH)
        .collect()
}

/// Parse one line typed by the user.
pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Say(line.to_owned());
    }
    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    match name {
        "/nick" => {
            let nick = sanitize_nickname(rest);
            if nick.is_empty() {
                Command::Unknown(line.to_owned())
            } else {
                Command::Nick(nick)
            }
        }
        "/me" if !rest.is_empty() => Command::Me(rest.to_owned()),
        "/who" if rest.is_empty() => Command::Who,
        "/help" if rest.is_empty() => Command::Help,
        "/quit" | "/exit" if rest.is_empty() => Command::Quit,
        _ => Command::Unknown(line.to_owned()),
    }
}

/// Help lines shown on startup, on `/help` and after an unknown command.
pub fn help_lines() -> [&'static str; 5] {
    [
        "Commands:",
        "/nick [newnick] - changes your nickname",
        "/who - list all users",
        "/me [action] - perform an action",
        "/quit - quits",
    ]
}
