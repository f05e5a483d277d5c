use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "expo-ai")]
#[command(about = "地震エクスポージャAI調査・建物点検台帳生成ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 建物サンプルを生成してGISアーティファクトを保存
    Sample {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// 対話式の点検セッションを開始
    Inspect {
        #[command(flatten)]
        project: ProjectArgs,

        /// AIアシスト（自動検出・自動分類）を有効化
        #[arg(long)]
        ai: bool,
    },

    /// 設定を表示/編集
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },

    /// 派生画像キャッシュの情報を表示
    Cache {
        /// ローカル画像フォルダ
        #[arg(required = true)]
        image_dir: PathBuf,
    },
}

#[derive(Args)]
pub struct ProjectArgs {
    /// プロジェクトフォルダ
    #[arg(required = true)]
    pub project: PathBuf,

    /// 調査方式 (polygon/specific/local)
    #[arg(short, long, default_value = "polygon")]
    pub method: InspectionMethod,

    /// 国名（ポリゴン方式）
    #[arg(long)]
    pub country: Option<String>,

    /// 都市名（ポリゴン方式）
    #[arg(long)]
    pub city: Option<String>,

    /// 境界の対角2点 "lat,lon"（ポリゴン方式）
    #[arg(long, num_args = 2)]
    pub corners: Option<Vec<String>>,

    /// 境界頂点CSV（ポリゴン方式、latitude/longitude列）
    #[arg(long)]
    pub boundary_csv: Option<PathBuf>,

    /// サブセットの棟数（ポリゴン方式）
    #[arg(short, long)]
    pub sample_size: Option<usize>,

    /// 座標リストCSV（specific方式）
    #[arg(long)]
    pub points_csv: Option<PathBuf>,

    /// ローカル画像フォルダ（local方式）
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// 画像メタデータCSV（local方式、id/latitude/longitude列）
    #[arg(long)]
    pub metadata_csv: Option<PathBuf>,

    /// 出力ファイル名プレフィックス（specific/local方式）
    #[arg(long)]
    pub name: Option<String>,

    /// 建物あたりの画像枚数（local方式、最大3）
    #[arg(long, default_value = "3")]
    pub images_per_building: usize,
}

/// 調査方式
#[derive(Clone, Copy, Debug, Default)]
pub enum InspectionMethod {
    /// 境界ポリゴン内からランダムサンプリング
    #[default]
    Polygon,
    /// 座標リストをそのまま調査
    Specific,
    /// ローカル画像フォルダを調査
    Local,
}

impl std::str::FromStr for InspectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polygon" => Ok(InspectionMethod::Polygon),
            "specific" => Ok(InspectionMethod::Specific),
            "local" => Ok(InspectionMethod::Local),
            _ => Err(format!(
                "Unknown method: {}. Use polygon, specific, or local",
                s
            )),
        }
    }
}

impl std::fmt::Display for InspectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionMethod::Polygon => write!(f, "polygon"),
            InspectionMethod::Specific => write!(f, "specific"),
            InspectionMethod::Local => write!(f, "local"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert!(matches!(
            "polygon".parse::<InspectionMethod>(),
            Ok(InspectionMethod::Polygon)
        ));
        assert!(matches!(
            "LOCAL".parse::<InspectionMethod>(),
            Ok(InspectionMethod::Local)
        ));
        assert!("osm".parse::<InspectionMethod>().is_err());
    }
}
