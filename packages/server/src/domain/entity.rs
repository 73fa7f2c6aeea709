//! Entity 定義
//!
//! セッション・参加者・接続レコード・ピース・ロックを定義します。
//! いずれもコーディネーションストアに JSON で保存される共有状態の形です。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::value_object::{
    ConnectionId, DisplayName, HolderToken, NodeId, PieceId, PuzzleId, SessionId, Timestamp,
    UserId,
};

/// コラボレーションセッション（パズルの 1 インスタンス）
///
/// `participant_ids` はメンバー集合キーから組み立てられ、セッション本体のキーには保存されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub puzzle_id: PuzzleId,
    pub created_at: Timestamp,
    /// 参加のたびに増える。破棄はこの値が変わっていないことを条件に行う
    #[serde(default)]
    pub revision: u64,
    #[serde(skip)]
    pub participant_ids: BTreeSet<ConnectionId>,
}

/// 破棄中のセッション本体キーに置く値の接頭辞
const CLOSING_PREFIX: &str = "closing:";

impl Session {
    pub fn new(id: SessionId, puzzle_id: PuzzleId, created_at: Timestamp) -> Self {
        Self {
            id,
            puzzle_id,
            created_at,
            revision: 0,
            participant_ids: BTreeSet::new(),
        }
    }

    /// 破棄中の印（セッション本体キーの値を置き換える）
    pub fn closing_marker(since: Timestamp) -> String {
        format!("{}{}", CLOSING_PREFIX, since.value())
    }

    /// 破棄中の印なら、破棄を始めた時刻
    pub fn closing_since(raw: &str) -> Option<Timestamp> {
        raw.strip_prefix(CLOSING_PREFIX)
            .and_then(|millis| millis.parse().ok())
            .map(Timestamp::new)
    }

    pub fn is_empty(&self) -> bool {
        self.participant_ids.is_empty()
    }
}

/// セッション参加者（1 接続につき 1 人）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub display_name: DisplayName,
    pub joined_at: Timestamp,
}

/// 接続レジストリのエントリ
///
/// どのノードからでも接続を解決・回収できるよう、ストアに複製される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: DisplayName,
    pub joined_at: Timestamp,
    /// 接続を受け付けたノード（診断用）
    pub node_id: NodeId,
}

impl ConnectionRecord {
    pub fn participant(&self) -> Participant {
        Participant {
            connection_id: self.connection_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            display_name: self.display_name.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// ピースの権威状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    pub puzzle_id: PuzzleId,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub is_placed: bool,
    /// 受理された移動ごとに 1 ずつ増える楽観的並行制御のガード
    pub version: u64,
}

/// ロックのリース
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub piece_id: PieceId,
    pub holder: HolderToken,
    pub expires_at: Timestamp,
}

/// 参加直後のクライアントに渡す全状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub puzzle_id: PuzzleId,
    pub pieces: Vec<Piece>,
    pub participants: Vec<Participant>,
    pub completed: bool,
    pub taken_at: Timestamp,
}

impl SessionSnapshot {
    pub fn placed_count(&self) -> usize {
        self.pieces.iter().filter(|piece| piece.is_placed).count()
    }
}
