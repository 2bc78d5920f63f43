//! Parses a single SMTP command line into a tagged record. Validation that
//! depends only on the line's own text lives here; validation that depends
//! on session state lives in [`crate::smtp::session`].

use std::collections::HashMap;

#[cfg(test)]
use super::MAX_MESSAGE_SIZE_DEFAULT;

const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Helo,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    Quit,
    Rset,
    Noop,
    Vrfy,
    Expn,
    Help,
    StartTls,
    Auth,
}

const COMMAND_TABLE: &[(&str, Command)] = &[
    ("HELO", Command::Helo),
    ("EHLO", Command::Ehlo),
    ("MAIL FROM", Command::MailFrom),
    ("RCPT TO", Command::RcptTo),
    ("DATA", Command::Data),
    ("QUIT", Command::Quit),
    ("RSET", Command::Rset),
    ("NOOP", Command::Noop),
    ("VRFY", Command::Vrfy),
    ("EXPN", Command::Expn),
    ("HELP", Command::Help),
    ("STARTTLS", Command::StartTls),
    ("AUTH", Command::Auth),
];

/// Outcome of parsing one command line.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub cmd: Option<Command>,
    pub argument: String,
    pub parameters: HashMap<String, String>,
    /// Non-empty iff the line was rejected at parse time; callers must send
    /// this reply verbatim and not advance session state.
    pub response: String,
}

impl ParsedCommand {
    fn reject(response: &str) -> Self {
        ParsedCommand {
            cmd: None,
            argument: String::new(),
            parameters: HashMap::new(),
            response: response.to_string(),
        }
    }

    fn ok(cmd: Command, argument: String, parameters: HashMap<String, String>) -> Self {
        ParsedCommand {
            cmd: Some(cmd),
            argument,
            parameters,
            response: String::new(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        !self.response.is_empty()
    }
}

pub fn parse(line: &str, max_message_size: u64) -> ParsedCommand {
    if line.is_empty() {
        return ParsedCommand::reject("500 Command not recognized");
    }
    if line.len() > MAX_LINE_LEN {
        return ParsedCommand::reject("500 Line too long");
    }
    if !line.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return ParsedCommand::reject("500 Command not recognized");
    }

    let trimmed = line.trim();
    let upper = trimmed.to_ascii_uppercase();

    let matched = COMMAND_TABLE.iter().find(|(name, _)| upper.starts_with(name));
    let Some((name, cmd)) = matched else {
        return ParsedCommand::reject("500 Command not recognized");
    };

    let rest = trimmed[name.len()..].trim_start().to_string();

    match cmd {
        Command::Helo | Command::Ehlo | Command::Vrfy => {
            if rest.is_empty() {
                return ParsedCommand::reject("501 Syntax error in parameters or arguments");
            }
            ParsedCommand::ok(*cmd, rest, HashMap::new())
        }
        Command::MailFrom | Command::RcptTo => {
            if rest.is_empty() {
                return ParsedCommand::reject("501 Syntax error in parameters or arguments");
            }
            let mut tokens = rest.split_whitespace();
            let address_token = tokens.next().unwrap_or("").to_string();
            if !address_token.starts_with('<') && !address_token.ends_with('>') {
                return ParsedCommand::reject("501 Syntax error in parameters or arguments");
            }
            let mut parameters = HashMap::new();
            for tok in tokens {
                if let Some((k, v)) = tok.split_once('=') {
                    parameters.insert(k.to_ascii_uppercase(), v.to_string());
                }
            }
            let mut parsed = ParsedCommand::ok(*cmd, address_token, parameters);
            if *cmd == Command::MailFrom {
                if let Some(size) = parsed.parameters.get("SIZE") {
                    if let Ok(n) = size.parse::<u64>() {
                        if n > max_message_size {
                            parsed.response = "452 Insufficient storage".to_string();
                        }
                    }
                }
            }
            parsed
        }
        Command::Data | Command::Rset | Command::StartTls | Command::Noop | Command::Quit => {
            if !rest.is_empty() {
                return ParsedCommand::reject("501 Syntax error in parameters or arguments");
            }
            ParsedCommand::ok(*cmd, String::new(), HashMap::new())
        }
        Command::Auth => ParsedCommand::reject("502 Command not implemented"),
        Command::Expn | Command::Help => ParsedCommand::ok(*cmd, rest, HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_line() {
        let parsed = parse("", MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.response, "500 Command not recognized");
    }

    #[test]
    fn rejects_overlong_line() {
        let line = "A".repeat(300);
        let parsed = parse(&line, MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.response, "500 Line too long");
    }

    #[test]
    fn rejects_non_printable_ascii() {
        let parsed = parse("HELO\u{0}", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(parsed.is_rejected());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let parsed = parse("BOGUS foo", MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.response, "500 Command not recognized");
    }

    #[test]
    fn helo_requires_argument() {
        let parsed = parse("HELO", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(parsed.is_rejected());
    }

    #[test]
    fn helo_with_argument_parses() {
        let parsed = parse("HELO mx.example.org", MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.cmd, Some(Command::Helo));
        assert_eq!(parsed.argument, "mx.example.org");
    }

    #[test]
    fn mail_from_requires_bracket() {
        let parsed = parse("MAIL FROM:a@x", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(parsed.is_rejected());
    }

    #[test]
    fn mail_from_accepts_leading_bracket_only() {
        let parsed = parse("MAIL FROM:<a@x", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(!parsed.is_rejected());
        assert_eq!(parsed.argument, "<a@x");
    }

    #[test]
    fn mail_from_accepts_trailing_bracket_only() {
        let parsed = parse("MAIL FROM:a@x>", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(!parsed.is_rejected());
    }

    #[test]
    fn mail_from_size_over_limit_is_rejected() {
        let parsed = parse("MAIL FROM:<a@x> SIZE=99999999999", MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.response, "452 Insufficient storage");
    }

    #[test]
    fn mail_from_size_under_limit_is_accepted() {
        let parsed = parse("MAIL FROM:<a@x> SIZE=1000", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(!parsed.is_rejected());
    }

    #[test]
    fn data_forbids_arguments() {
        let parsed = parse("DATA extra", MAX_MESSAGE_SIZE_DEFAULT);
        assert!(parsed.is_rejected());
    }

    #[test]
    fn auth_is_always_refused() {
        let parsed = parse("AUTH PLAIN", MAX_MESSAGE_SIZE_DEFAULT);
        assert_eq!(parsed.response, "502 Command not implemented");
    }
}
