/// ドメイン層: 進捗の集計とキューの変更イベント
///
/// キューに対する各操作の結果をイベントとして表現します。
/// プレゼンテーション層はこれらのイベントを受け取り、
/// 人間向けの進捗表示や機械向けの出力に使用します。
use crate::domain::item::{ItemId, ItemProgress, UploadStatus};
use serde::Serialize;

/// バイト加重の全体進捗を計算する
///
/// `total == 0` のアイテムは分母から除外する。0/0 は 0（NaNにはしない）。
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressAggregator;

impl ProgressAggregator {
    pub fn aggregate<'a>(progress: impl IntoIterator<Item = &'a ItemProgress>) -> f64 {
        let (loaded, total) = progress
            .into_iter()
            .filter(|p| p.total() > 0)
            .fold((0u128, 0u128), |(loaded, total), p| {
                (loaded + u128::from(p.loaded()), total + u128::from(p.total()))
            });

        if total == 0 {
            return 0.0;
        }

        (loaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// キューの変更イベント
///
/// # 設計意図
/// - キューの変更を観測者へ通知する（変更後に通知）
/// - プレゼンテーション層での柔軟な出力制御
/// - 機械可読出力のためにSerialize可能
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// アイテムが追加された
    ItemAdded {
        id: ItemId,
        file_name: String,
        size_bytes: u64,
    },

    /// 状態が変わった
    StatusChanged {
        id: ItemId,
        file_name: String,
        from: UploadStatus,
        to: UploadStatus,
        error: Option<String>,
    },

    /// 転送中アイテムの進捗
    Progress {
        id: ItemId,
        file_name: String,
        loaded: u64,
        total: u64,
        percentage: f64,
        /// 全体進捗（0〜100）
        overall: f64,
    },

    /// 転送中アイテムの中断を要求した（確認待ち）
    AbortRequested { id: ItemId, file_name: String },

    /// アイテムが削除された
    #[cfg(test)]
    ItemRemoved { id: ItemId, file_name: String },

    /// 同時アップロード数の上限が変わった
    LimitChanged { max_concurrent_uploads: usize },

    /// キュー全体がリセットされた
    Reset { removed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(loaded: u64, total: u64) -> ItemProgress {
        let mut p = ItemProgress::new(total);
        p.update(loaded, total);
        p
    }

    #[test]
    fn test_empty_is_zero() {
        let items: Vec<ItemProgress> = vec![];
        assert_eq!(ProgressAggregator::aggregate(&items), 0.0);
    }

    #[test]
    fn test_zero_totals_are_excluded() {
        let items = vec![progress(0, 0), progress(0, 0)];
        let overall = ProgressAggregator::aggregate(&items);
        assert_eq!(overall, 0.0);
        assert!(!overall.is_nan());

        let items = vec![progress(50, 100), progress(0, 0)];
        assert_eq!(ProgressAggregator::aggregate(&items), 50.0);
    }

    #[test]
    fn test_byte_weighted() {
        // 小さいファイルの完了より大きいファイルの進捗が効く
        let items = vec![progress(100, 100), progress(100, 900)];
        assert_eq!(ProgressAggregator::aggregate(&items), 20.0);
    }

    #[test]
    fn test_event_serialization() {
        let event = QueueEvent::LimitChanged {
            max_concurrent_uploads: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "limit_changed");
        assert_eq!(json["max_concurrent_uploads"], 4);
    }
}
