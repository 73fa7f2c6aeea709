//! インメモリのパズルカタログ
//!
//! 組み込みのグリッドパズル、または JSON ファイルから読み込んだ定義を保持します。
//! JSON は配列で、各要素はグリッド生成パラメータか明示的なスロット定義のどちらかです。
//!
//! ```json
//! [
//!   { "puzzle_id": "cats", "grid": { "cols": 4, "rows": 3, "piece_width": 80,
//!     "piece_height": 80, "seed": 7 } },
//!   { "puzzle_id": "tiny", "slots": [ { "id": 0, "target_x": 0, "target_y": 0,
//!     "start_x": 300, "start_y": 40 } ] }
//! ]
//! ```

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{GridSpec, LayoutError, PuzzleCatalog, PuzzleId, PuzzleLayout, SnapTolerance};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] LayoutError),

    #[error("puzzle '{0}' is defined more than once")]
    DuplicatePuzzle(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
    Grid {
        puzzle_id: PuzzleId,
        grid: GridSpec,
        #[serde(default)]
        snap: SnapTolerance,
    },
    Explicit(PuzzleLayout),
}

impl CatalogEntry {
    fn into_layout(self) -> PuzzleLayout {
        match self {
            CatalogEntry::Grid {
                puzzle_id,
                grid,
                snap,
            } => PuzzleLayout::grid(puzzle_id, grid, snap),
            CatalogEntry::Explicit(layout) => layout,
        }
    }
}

pub struct InMemoryPuzzleCatalog {
    layouts: HashMap<PuzzleId, PuzzleLayout>,
}

impl InMemoryPuzzleCatalog {
    /// 定義を検証してカタログを作成
    pub fn new(layouts: Vec<PuzzleLayout>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(layouts.len());
        for layout in layouts {
            layout.validate()?;
            let puzzle_id = layout.puzzle_id.clone();
            if by_id.insert(puzzle_id.clone(), layout).is_some() {
                return Err(CatalogError::DuplicatePuzzle(puzzle_id.into_string()));
            }
        }
        Ok(Self { layouts: by_id })
    }

    /// 組み込みのグリッドパズル
    pub fn builtin() -> Self {
        let grid = |id: &str, cols, rows, seed, rotate| {
            PuzzleId::new(id.to_string()).map(|puzzle_id| {
                PuzzleLayout::grid(
                    puzzle_id,
                    GridSpec {
                        cols,
                        rows,
                        piece_width: 100.0,
                        piece_height: 100.0,
                        seed,
                        rotate,
                    },
                    SnapTolerance::default(),
                )
            })
        };
        let layouts = [
            grid("demo-2x2", 2, 2, 1, false),
            grid("grid-4x4", 4, 4, 44, false),
            grid("grid-8x6", 8, 6, 86, true),
        ]
        .into_iter()
        .filter_map(Result::ok)
        .map(|layout| (layout.puzzle_id.clone(), layout))
        .collect();
        Self { layouts }
    }

    /// JSON 文字列から読み込む
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Self::new(entries.into_iter().map(CatalogEntry::into_layout).collect())
    }

    /// JSON ファイルから読み込む
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn puzzle_ids(&self) -> Vec<PuzzleId> {
        let mut ids: Vec<PuzzleId> = self.layouts.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl PuzzleCatalog for InMemoryPuzzleCatalog {
    async fn layout(&self, puzzle_id: &PuzzleId) -> Option<PuzzleLayout> {
        self.layouts.get(puzzle_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PieceId;

    #[tokio::test]
    async fn test_builtin_catalog_has_demo_puzzle() {
        // テスト項目: 組み込みカタログに 4 ピースのデモパズルがある
        // given (前提条件):
        let catalog = InMemoryPuzzleCatalog::builtin();

        // when (操作):
        let layout = catalog
            .layout(&PuzzleId::new("demo-2x2".to_string()).unwrap())
            .await;

        // then (期待する結果):
        assert_eq!(layout.map(|layout| layout.piece_count()), Some(4));
        assert_eq!(catalog.puzzle_ids().len(), 3);
    }

    #[test]
    fn test_from_json_accepts_grid_and_explicit_entries() {
        // テスト項目: グリッド指定と明示的なスロット定義の両方を読み込める
        // given (前提条件):
        let json = r#"[
            { "puzzle_id": "cats", "grid": { "cols": 3, "rows": 2, "piece_width": 50,
              "piece_height": 40, "seed": 7 } },
            { "puzzle_id": "tiny", "snap": { "distance": 5, "rotation_degrees": 2 },
              "slots": [ { "id": 9, "target_x": 10, "target_y": 20,
                           "start_x": 300, "start_y": 40 } ] }
        ]"#;

        // when (操作):
        let catalog = InMemoryPuzzleCatalog::from_json(json).unwrap();

        // then (期待する結果):
        let cats = catalog.layouts.get(&PuzzleId::new("cats".to_string()).unwrap()).unwrap();
        assert_eq!(cats.piece_count(), 6);
        let tiny = catalog.layouts.get(&PuzzleId::new("tiny".to_string()).unwrap()).unwrap();
        assert_eq!(tiny.snap.distance, 5.0);
        assert_eq!(tiny.slot(PieceId::new(9)).map(|slot| slot.target_y), Some(20.0));
    }

    #[test]
    fn test_from_json_rejects_duplicate_puzzle() {
        // テスト項目: 同じパズル ID が 2 回定義されているとエラーになる
        // given (前提条件):
        let json = r#"[
            { "puzzle_id": "dup", "grid": { "cols": 1, "rows": 1, "piece_width": 10,
              "piece_height": 10, "seed": 1 } },
            { "puzzle_id": "dup", "grid": { "cols": 2, "rows": 1, "piece_width": 10,
              "piece_height": 10, "seed": 1 } }
        ]"#;

        // when (操作):
        let result = InMemoryPuzzleCatalog::from_json(json);

        // then (期待する結果):
        assert!(matches!(result, Err(CatalogError::DuplicatePuzzle(id)) if id == "dup"));
    }

    #[test]
    fn test_from_json_rejects_empty_layout() {
        // テスト項目: ピースのないパズル定義は検証エラーになる
        // given (前提条件):
        let json = r#"[ { "puzzle_id": "empty", "slots": [] } ]"#;

        // when (操作):
        let result = InMemoryPuzzleCatalog::from_json(json);

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(CatalogError::Invalid(LayoutError::NoPieces(_)))
        ));
    }
}
