/// ドメイン層
///
/// ファイルの取り込み・検証と、アップロードキューの状態管理を担当します。
/// I/Oは取り込み時のメタデータ取得とヘッダー読み込みに限られ、
/// ネットワークには依存しません。
///
/// # モジュール
/// - `metadata`: 候補ファイルの取り込みとメタデータ
/// - `sniff`: ヘッダーの構造スニッフィング
/// - `validator`: 検証パイプライン
/// - `item`: アイテムの状態遷移
/// - `queue`: 同時実行数上限つきのFIFOキュー
/// - `progress`: 全体進捗の集計と変更イベント

pub mod error;
pub mod item;
pub mod metadata;
pub mod progress;
pub mod queue;
pub mod sniff;
pub mod validator;
