//! Value Object 定義
//!
//! 識別子・タイムスタンプ・チャット本文など、不変で自己検証する値を定義します。
//! 識別子はストアのキーにそのまま埋め込まれるため、`:` などの区切り文字を含めません。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValidationError;

/// 識別子の最大長
pub const MAX_ID_LENGTH: usize = 64;
/// 表示名の最大長（文字数）
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;
/// チャット本文の最大長（文字数）
pub const MAX_MESSAGE_LENGTH: usize = 1000;

fn validate_identifier(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(kind));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            kind,
            max: MAX_ID_LENGTH,
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidCharacters(kind));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: String) -> Result<Self, ValidationError> {
                validate_identifier($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// コラボレーションセッション（パズルのインスタンス）の ID
    SessionId,
    "session_id"
);
identifier!(
    /// パズル定義の ID（外部カタログのキー）
    PuzzleId,
    "puzzle_id"
);
identifier!(
    /// ユーザー ID（認証は外部のため、クライアントの申告値）
    UserId,
    "user_id"
);
identifier!(
    /// 1 本のトランスポート接続の ID
    ConnectionId,
    "connection_id"
);
identifier!(
    /// サーバープロセス（ノード）の ID
    NodeId,
    "node_id"
);

impl ConnectionId {
    /// 新しい接続 ID を採番
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl NodeId {
    /// 新しいノード ID を採番
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// ピース ID（パズル内で一意）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PieceId(u32);

impl PieceId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ロック保持者トークン
///
/// `{connection_id}:{uuid}` の形式。取得試行ごとに一意で、リトライ間でも再利用しない。
/// 接続 ID のプレフィックスで、接続が保持しているロックを逆引きできる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderToken(String);

impl HolderToken {
    const SEPARATOR: char = ':';

    /// 接続に紐づく新しいトークンを発行
    pub fn issue(connection_id: &ConnectionId) -> Self {
        Self(format!(
            "{}{}{}",
            connection_id.as_str(),
            Self::SEPARATOR,
            Uuid::new_v4()
        ))
    }

    /// ストアから読み出した値を復元（検証しない）
    pub fn from_raw(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// トークンを発行した接続 ID 部分
    pub fn connection_part(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map(|(connection, _)| connection)
            .unwrap_or("")
    }

    /// このトークンが指定した接続のものか
    pub fn belongs_to(&self, connection_id: &ConnectionId) -> bool {
        self.connection_part() == connection_id.as_str()
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 表示名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(value: String) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty("display_name"));
        }
        if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
            return Err(ValidationError::TooLong {
                kind: "display_name",
                max: MAX_DISPLAY_NAME_LENGTH,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

/// Unix タイムスタンプ（UTC, ミリ秒）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }
}

/// チャット本文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: String) -> Result<Self, ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::Empty("message"));
        }
        if value.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ValidationError::TooLong {
                kind: "message",
                max: MAX_MESSAGE_LENGTH,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageContent> for String {
    fn from(value: MessageContent) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_accepts_identifier_characters() {
        // テスト項目: 英数字・ハイフン・アンダースコア・ドットの ID は受理される
        // given (前提条件):
        let raw = "lobby-1_a.b".to_string();

        // when (操作):
        let result = SessionId::new(raw);

        // then (期待する結果):
        assert_eq!(result.unwrap().as_str(), "lobby-1_a.b");
    }

    #[test]
    fn test_session_id_rejects_key_separator() {
        // テスト項目: キー区切り文字 ':' を含む ID は拒否される
        // given (前提条件):
        let raw = "lobby:1".to_string();

        // when (操作):
        let result = SessionId::new(raw);

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ValidationError::InvalidCharacters("session_id"))
        );
    }

    #[test]
    fn test_identifier_rejects_empty_and_too_long() {
        // テスト項目: 空文字列・長すぎる ID は拒否される
        // given (前提条件):
        let too_long = "a".repeat(MAX_ID_LENGTH + 1);

        // when (操作):
        let empty = UserId::new(String::new());
        let long = UserId::new(too_long);

        // then (期待する結果):
        assert_eq!(empty, Err(ValidationError::Empty("user_id")));
        assert!(matches!(long, Err(ValidationError::TooLong { .. })));
    }

    #[test]
    fn test_identifier_deserialization_validates() {
        // テスト項目: デシリアライズ時にも検証が行われる
        // given (前提条件):
        let valid = "\"alice\"";
        let invalid = "\"al ice\"";

        // when (操作):
        let ok: Result<UserId, _> = serde_json::from_str(valid);
        let err: Result<UserId, _> = serde_json::from_str(invalid);

        // then (期待する結果):
        assert_eq!(ok.unwrap().as_str(), "alice");
        assert!(err.is_err());
    }

    #[test]
    fn test_holder_token_belongs_to_issuing_connection() {
        // テスト項目: 発行したトークンは発行元の接続に紐づき、毎回異なる
        // given (前提条件):
        let alice = ConnectionId::new("conn-alice".to_string()).unwrap();
        let bob = ConnectionId::new("conn-bob".to_string()).unwrap();

        // when (操作):
        let first = HolderToken::issue(&alice);
        let second = HolderToken::issue(&alice);

        // then (期待する結果):
        assert!(first.belongs_to(&alice));
        assert!(!first.belongs_to(&bob));
        assert_eq!(first.connection_part(), "conn-alice");
        assert_ne!(first, second);
    }

    #[test]
    fn test_holder_token_does_not_match_connection_prefix_collision() {
        // テスト項目: 接続 ID が前方一致するだけの別接続には紐づかない
        // given (前提条件):
        let short = ConnectionId::new("conn".to_string()).unwrap();
        let long = ConnectionId::new("conn-2".to_string()).unwrap();

        // when (操作):
        let token = HolderToken::issue(&long);

        // then (期待する結果):
        assert!(!token.belongs_to(&short));
    }

    #[test]
    fn test_display_name_is_trimmed_and_bounded() {
        // テスト項目: 表示名は前後の空白が除去され、長さが制限される
        // given (前提条件):
        let padded = "  Alice  ".to_string();
        let too_long = "x".repeat(MAX_DISPLAY_NAME_LENGTH + 1);

        // when (操作):
        let name = DisplayName::new(padded).unwrap();

        // then (期待する結果):
        assert_eq!(name.as_str(), "Alice");
        assert!(DisplayName::new("   ".to_string()).is_err());
        assert!(DisplayName::new(too_long).is_err());
    }

    #[test]
    fn test_message_content_length_limits() {
        // テスト項目: チャット本文は空と上限超過が拒否される
        // given (前提条件):
        let ok = "hello".to_string();
        let too_long = "a".repeat(MAX_MESSAGE_LENGTH + 1);

        // when (操作) / then (期待する結果):
        assert_eq!(MessageContent::new(ok).unwrap().as_str(), "hello");
        assert_eq!(
            MessageContent::new(" ".to_string()),
            Err(ValidationError::Empty("message"))
        );
        assert!(MessageContent::new(too_long).is_err());
    }
}
