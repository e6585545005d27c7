/// インフラ層: アップロードサービスとの通信
///
/// - `transport`: スケジューラが依存する転送の抽象
/// - `client`: reqwestによるHTTP実装（ストリーミングmultipart、プリフライト検証）
/// - `types`: サービスの応答型
/// - `error`: インフラ層のエラー
pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::HttpTransport;
