//! Parsing of lines typed by the user.

use parley_proto::RoomId;

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Publish the line.
    Say(String),
    /// `/room N`: switch rooms.
    Room(RoomId),
    /// `/quit`: leave.
    Quit,
    /// Unknown or malformed command, with a hint for the user.
    Invalid(String),
    /// Blank line.
    Empty,
}

impl Input {
    /// Interpret one line of user input.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let mut words = command.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("quit" | "exit"), None, None) => Self::Quit,
            (Some("room"), Some(room), None) => room
                .parse()
                .map_or_else(|_| Self::Invalid(format!("not a room id: {room}")), Self::Room),
            (Some("room"), ..) => Self::Invalid("usage: /room <id>".to_string()),
            _ => Self::Invalid(format!("unknown command: /{command}")),
        }
    }
}
