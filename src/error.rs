use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpoAiError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`expo-ai config --set-api-key YOUR_KEY` で設定してください")]
    MissingApiKey,

    #[error("プロジェクト設定が未完了です: {0}")]
    ProjectIncomplete(String),

    #[error("サンプルサイズ {requested} がデータセットの棟数 {population} を超えています")]
    SampleSize { requested: usize, population: usize },

    #[error("最寄りの道路が見つかりません: ({lat}, {lon})")]
    RoadNotFound { lat: f64, lon: f64 },

    #[error("外部サービスエラー: {0}")]
    ServiceUnavailable(String),

    #[error("ファイルが開かれているか、フォルダにアクセスできません: {0}")]
    FileAccess(String),

    #[error("検査IDが見つかりません: {0}")]
    NotFound(String),

    #[error("手動バウンディングボックスには4点が必要です（現在 {0} 点）")]
    ManualCropIncomplete(usize),

    #[error("入力エラー: {0}")]
    InvalidInput(String),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("推論コマンド実行エラー: {0}")]
    ModelCall(String),

    #[error("推論レスポンスのパースに失敗: {0}")]
    ModelParse(String),

    #[error("CLI実行エラー: {0}")]
    CliExecution(String),

    #[error("CSV解析エラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON解析エラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExpoAiError>;
