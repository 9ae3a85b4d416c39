//! Interactive command parsing

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const HELP: &str = "\
Commands:
  send <terminal> <type> <text...>   send text signal
  json <terminal> <type> <object>    send JSON signal
  audio <terminal> <file> [format]   stream file as audio frames
  connect <terminal> [trace-id]      connect terminal
  disconnect <terminal>              disconnect terminal
  stats [terminal]                   show statistics
  reset <terminal>                   reset statistics
  list                               list terminals
  help                               show this help
  quit                               disconnect everything and exit";

/// Parsed stdin command
#[derive(Debug, PartialEq)]
pub enum Command {
    Send {
        terminal: String,
        signal_type: String,
        text: String,
    },
    Json {
        terminal: String,
        signal_type: String,
        data: Map<String, Value>,
    },
    Audio {
        terminal: String,
        file: PathBuf,
        format: Option<String>,
    },
    Connect {
        terminal: String,
        trace_id: Option<String>,
    },
    Disconnect {
        terminal: String,
    },
    Stats {
        terminal: Option<String>,
    },
    Reset {
        terminal: String,
    },
    List,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let Some((verb, rest)) = split_word(line) else {
            return Ok(None);
        };

        let command = match verb {
            "send" => {
                let (terminal, rest) = word(rest, "terminal")?;
                let (signal_type, text) = word(rest, "type")?;
                Command::Send {
                    terminal,
                    signal_type,
                    text: text.to_string(),
                }
            }
            "json" => {
                let (terminal, rest) = word(rest, "terminal")?;
                let (signal_type, raw) = word(rest, "type")?;
                let data = match serde_json::from_str::<Value>(raw)? {
                    Value::Object(map) => map,
                    _ => bail!("json payload must be an object"),
                };
                Command::Json {
                    terminal,
                    signal_type,
                    data,
                }
            }
            "audio" => {
                let (terminal, rest) = word(rest, "terminal")?;
                let (file, rest) = word(rest, "file")?;
                Command::Audio {
                    terminal,
                    file: PathBuf::from(file),
                    format: split_word(rest).map(|(f, _)| f.to_string()),
                }
            }
            "connect" => {
                let (terminal, rest) = word(rest, "terminal")?;
                Command::Connect {
                    terminal,
                    trace_id: split_word(rest).map(|(t, _)| t.to_string()),
                }
            }
            "disconnect" => Command::Disconnect {
                terminal: word(rest, "terminal")?.0,
            },
            "stats" => Command::Stats {
                terminal: split_word(rest).map(|(t, _)| t.to_string()),
            },
            "reset" => Command::Reset {
                terminal: word(rest, "terminal")?.0,
            },
            "list" | "ls" => Command::List,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "/exit" => Command::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

fn split_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

fn word<'a>(input: &'a str, name: &str) -> Result<(String, &'a str)> {
    split_word(input)
        .map(|(w, rest)| (w.to_string(), rest))
        .ok_or_else(|| anyhow!("missing <{}>", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_keeps_spaces_in_text() {
        let cmd = Command::parse("send kitchen chat.text hello   there").unwrap();
        assert_eq!(
            cmd,
            Some(Command::Send {
                terminal: "kitchen".into(),
                signal_type: "chat.text".into(),
                text: "hello   there".into(),
            })
        );
    }

    #[test]
    fn test_parse_json() {
        let cmd = Command::parse(r#"json a sensor {"temp": 20}"#).unwrap().unwrap();
        match cmd {
            Command::Json { data, .. } => assert_eq!(data["temp"], 20),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Command::parse("json a sensor [1]").is_err());
    }

    #[test]
    fn test_parse_optional_arguments() {
        assert_eq!(
            Command::parse("audio a clip.opus").unwrap(),
            Some(Command::Audio {
                terminal: "a".into(),
                file: PathBuf::from("clip.opus"),
                format: None,
            })
        );
        assert_eq!(
            Command::parse("connect a trace-9").unwrap(),
            Some(Command::Connect {
                terminal: "a".into(),
                trace_id: Some("trace-9".into()),
            })
        );
        assert_eq!(
            Command::parse("stats").unwrap(),
            Some(Command::Stats { terminal: None })
        );
    }

    #[test]
    fn test_parse_errors_and_blank() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert!(Command::parse("send").is_err());
        assert!(Command::parse("disconnect").is_err());
        assert!(Command::parse("frobnicate x").is_err());
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Quit));
    }
}
