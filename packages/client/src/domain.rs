//! Domain logic for client-side operations.
//!
//! Pure decisions about joining and reconnecting.

use crate::error::ClientError;

/// Error codes that make a join permanently impossible with the same arguments
const FATAL_JOIN_CODES: [&str; 3] = ["ALREADY_JOINED", "UNKNOWN_PUZZLE", "INVALID_REQUEST"];

/// Whether an `error` frame received before `joined` ends the client.
pub fn is_fatal_join_error(code: &str) -> bool {
    FATAL_JOIN_CODES.contains(&code)
}

/// Check if the client should exit immediately based on the error type.
pub fn should_exit_immediately(error: &ClientError) -> bool {
    matches!(error, ClientError::Rejected { .. })
}

/// Check if the client should attempt to reconnect.
///
/// `retries_left` is `false` once the backoff budget is spent.
pub fn should_attempt_reconnect(error: &ClientError, retries_left: bool) -> bool {
    if should_exit_immediately(error) {
        return false;
    }
    retries_left
}

/// A lost connection after a successful join starts a fresh retry sequence.
pub fn should_reset_backoff(error: &ClientError) -> bool {
    matches!(error, ClientError::ConnectionLost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_join_exits_immediately() {
        // テスト項目: 参加拒否の場合、即座に終了すべきと判定される
        // given (前提条件):
        let error = ClientError::Rejected {
            code: "UNKNOWN_PUZZLE".to_string(),
            message: "unknown puzzle 'nope'".to_string(),
        };

        // when (操作):
        let exit = should_exit_immediately(&error);
        let reconnect = should_attempt_reconnect(&error, true);

        // then (期待する結果):
        assert!(exit);
        assert!(!reconnect);
    }

    #[test]
    fn test_connection_error_reconnects_while_retries_left() {
        // テスト項目: 接続エラーは再試行の残りがある間だけ再接続する
        // given (前提条件):
        let error = ClientError::ConnectionError("refused".to_string());

        // when (操作) / then (期待する結果):
        assert!(should_attempt_reconnect(&error, true));
        assert!(!should_attempt_reconnect(&error, false));
        assert!(!should_reset_backoff(&error));
    }

    #[test]
    fn test_connection_lost_resets_backoff() {
        // テスト項目: 参加後の切断では再試行の回数がリセットされる
        // given (前提条件):
        let error = ClientError::ConnectionLost;

        // when (操作):
        let reset = should_reset_backoff(&error);

        // then (期待する結果):
        assert!(reset);
    }

    #[test]
    fn test_fatal_join_error_codes() {
        // テスト項目: 参加時の致命的なエラーコードを判定できる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert!(is_fatal_join_error("ALREADY_JOINED"));
        assert!(is_fatal_join_error("UNKNOWN_PUZZLE"));
        assert!(!is_fatal_join_error("STORE_UNAVAILABLE"));
        assert!(!is_fatal_join_error("LOCK_CONTENTION"));
    }
}
