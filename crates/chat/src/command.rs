/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    /// 1-based position in the conversation list.
    Open(usize),
    Delete(usize),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let argument = parts.next();
        match (name, argument) {
            ("new", None) => Self::New,
            ("list", None) => Self::List,
            ("help", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            ("open", Some(position)) => parse_position(position).map_or_else(
                || Self::Invalid(format!("not a list position: {position}")),
                Self::Open,
            ),
            ("delete", Some(position)) => parse_position(position).map_or_else(
                || Self::Invalid(format!("not a list position: {position}")),
                Self::Delete,
            ),
            _ => Self::Invalid(format!("unknown command: /{rest}")),
        }
    }
}

fn parse_position(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|position| *position > 0)
}

pub const HELP_TEXT: &str = "\
type a message to send it
/new         start a new conversation
/list        list saved conversations
/open <n>    open conversation n from /list
/delete <n>  delete conversation n from /list
/quit        leave";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent_trimmed() {
        assert_eq!(Command::parse("  hello  "), Command::Send("hello".to_string()));
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(Command::parse("/new"), Command::New);
        assert_eq!(Command::parse("/list"), Command::List);
        assert_eq!(Command::parse("/open 2"), Command::Open(2));
        assert_eq!(Command::parse("/delete  1"), Command::Delete(1));
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn bad_positions_and_unknown_commands_are_invalid() {
        assert!(matches!(Command::parse("/open 0"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/open x"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/open"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/frobnicate"), Command::Invalid(_)));
    }
}
