/// プレゼンテーション層モジュール
///
/// ドメイン層のビジネスロジックとUI表示の橋渡しを行います。
/// Clean Architectureの依存方向に従い、プレゼンテーション層は
/// ドメイン層に依存しますが、その逆はありません。
///
/// # モジュール
/// - `output`: コマンド結果とエラーの出力（人間向け・機械向け）
/// - `progress`: キューイベントの進捗表示

pub mod output;
pub mod progress;
