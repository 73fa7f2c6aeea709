//! Parsing of typed commands.

use thiserror::Error;

pub const HELP: &str = "\
commands:
  grab <piece>                  pick up a piece (acquire its lock)
  move <piece> <x> <y> [rot]    move a held piece
  drop <piece>                  release a held piece
  renew <piece>                 extend the lock on a held piece
  chat <text>                   send a chat message
  sync                          ask the server for a fresh snapshot
  who                           list participants
  pieces                        list pieces
  quit                          leave the session and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Grab(u32),
    Move {
        piece_id: u32,
        x: f64,
        y: f64,
        rotation: Option<f64>,
    },
    Drop(u32),
    Renew(u32),
    Chat(String),
    Sync,
    Who,
    Pieces,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match name.to_ascii_lowercase().as_str() {
            "grab" => piece_arg(&args, "grab <piece>").map(Command::Grab),
            "drop" | "release" => piece_arg(&args, "drop <piece>").map(Command::Drop),
            "renew" => piece_arg(&args, "renew <piece>").map(Command::Renew),
            "move" => {
                const USAGE: &str = "move <piece> <x> <y> [rotation]";
                if !(3..=4).contains(&args.len()) {
                    return Err(CommandError::Usage(USAGE));
                }
                let piece_id = args[0].parse().map_err(|_| CommandError::Usage(USAGE))?;
                let x = finite(args[1]).ok_or(CommandError::Usage(USAGE))?;
                let y = finite(args[2]).ok_or(CommandError::Usage(USAGE))?;
                let rotation = match args.get(3) {
                    Some(raw) => Some(finite(raw).ok_or(CommandError::Usage(USAGE))?),
                    None => None,
                };
                Ok(Command::Move {
                    piece_id,
                    x,
                    y,
                    rotation,
                })
            }
            "chat" | "say" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage("chat <text>"));
                }
                Ok(Command::Chat(rest.to_string()))
            }
            "sync" => Ok(Command::Sync),
            "who" => Ok(Command::Who),
            "pieces" => Ok(Command::Pieces),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn piece_arg(args: &[&str], usage: &'static str) -> Result<u32, CommandError> {
    match args {
        [piece] => piece.parse().map_err(|_| CommandError::Usage(usage)),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_with_rotation() {
        // テスト項目: 回転付きの move コマンドが読み取れる
        // given (前提条件):
        let line = "move 3 120.5 -40 90";

        // when (操作):
        let command = Command::parse(line);

        // then (期待する結果):
        assert_eq!(
            command,
            Ok(Command::Move {
                piece_id: 3,
                x: 120.5,
                y: -40.0,
                rotation: Some(90.0),
            })
        );
    }

    #[test]
    fn test_parse_move_rejects_non_finite_coordinates() {
        // テスト項目: 有限でない座標の move コマンドは使い方エラーになる
        // given (前提条件):
        let line = "move 3 NaN 0";

        // when (操作):
        let command = Command::parse(line);

        // then (期待する結果):
        assert!(matches!(command, Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_parse_chat_keeps_spacing_inside_text() {
        // テスト項目: chat コマンドは本文の空白を保ったまま読み取れる
        // given (前提条件):
        let line = "chat  hello   there ";

        // when (操作):
        let command = Command::parse(line);

        // then (期待する結果):
        assert_eq!(command, Ok(Command::Chat("hello   there".to_string())));
    }

    #[test]
    fn test_parse_piece_commands() {
        // テスト項目: ピース番号を取るコマンドが読み取れる
        // given (前提条件):
        let lines = ["grab 1", "drop 2", "release 2", "renew 0"];

        // when (操作):
        let commands: Vec<_> = lines.iter().map(|line| Command::parse(line)).collect();

        // then (期待する結果):
        assert_eq!(
            commands,
            vec![
                Ok(Command::Grab(1)),
                Ok(Command::Drop(2)),
                Ok(Command::Drop(2)),
                Ok(Command::Renew(0)),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_missing_piece() {
        // テスト項目: ピース番号のない grab は使い方エラーになる
        // given (前提条件):
        let line = "grab";

        // when (操作):
        let command = Command::parse(line);

        // then (期待する結果):
        assert_eq!(command, Err(CommandError::Usage("grab <piece>")));
    }

    #[test]
    fn test_parse_unknown_command() {
        // テスト項目: 未知のコマンドはエラーになる
        // given (前提条件):
        let line = "rotate 1";

        // when (操作):
        let command = Command::parse(line);

        // then (期待する結果):
        assert_eq!(command, Err(CommandError::Unknown("rotate".to_string())));
    }
}
