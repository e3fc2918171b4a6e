//! Terminal commands and rendering for the chat client.
//!
//! Input lines are parsed into a [`ConsoleCommand`] before anything touches the
//! network, so a bad `msg` line is reported locally and never reaches the
//! server. Server events are rendered back as single lines.

use thiserror::Error;

use crate::session::ClientEvent;

pub const HELP_TEXT: &str = "\
Commands
msg <count> <user1> ... <userN> <message>  Send a message to <count> users
list                                       List users currently joined
help                                       Print this help
quit                                       Leave the chat

Options
-u USER | --user=USER        The username of the client
-p PORT | --port=PORT        The server port, defaults to 15000
-a ADDRESS | --address=ADDRESS  The server ip or hostname, defaults to localhost
-w WINDOW | --window=WINDOW  The window size, defaults to 3";

/// Commands that can be entered at the client prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Msg { recipients: Vec<String>, text: String },
    List,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("empty command")]
    Empty,
    #[error("incorrect userinput format")]
    Unrecognized(String),
    #[error("usage: msg <count> <user1> ... <userN> <message>")]
    MissingCount,
    #[error("incorrect userinput format: '{0}' is not a user count")]
    InvalidCount(String),
    #[error("incorrect userinput format: expected {expected} users, found {found}")]
    MissingRecipients { expected: usize, found: usize },
}

impl ConsoleCommand {
    /// Parses a line of user input.
    ///
    /// Command words are case-sensitive. Trailing words after `list`, `help`
    /// and `quit` are ignored.
    pub fn parse(line: &str) -> Result<Self, UsageError> {
        let (command, args) = next_word(line);
        match command {
            "" => Err(UsageError::Empty),
            "msg" => parse_msg(args),
            "list" => Ok(ConsoleCommand::List),
            "help" => Ok(ConsoleCommand::Help),
            "quit" => Ok(ConsoleCommand::Quit),
            other => Err(UsageError::Unrecognized(other.to_string())),
        }
    }
}

fn parse_msg(args: &str) -> Result<ConsoleCommand, UsageError> {
    let (count_raw, mut rest) = next_word(args);
    if count_raw.is_empty() {
        return Err(UsageError::MissingCount);
    }
    let expected: usize = count_raw
        .parse()
        .map_err(|_| UsageError::InvalidCount(count_raw.to_string()))?;

    let mut recipients = Vec::new();
    for found in 0..expected {
        let (name, tail) = next_word(rest);
        if name.is_empty() {
            return Err(UsageError::MissingRecipients { expected, found });
        }
        recipients.push(name.to_string());
        rest = tail;
    }

    Ok(ConsoleCommand::Msg {
        recipients,
        text: rest.trim_end().to_string(),
    })
}

/// Splits off the first whitespace-delimited word.
fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input.trim_end(), ""),
    }
}

/// One output line per server event.
pub fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::UserList(usernames) => format!("list: {}", usernames.join(" ")),
        ClientEvent::Message { sender, text } => format!("msg: {sender}: {text}"),
        ClientEvent::Error { reason } => format!("error: {reason}"),
        ClientEvent::Disconnected { reason } => format!("disconnected: {reason}"),
    }
}
