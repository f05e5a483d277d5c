//! 地理入力とプロジェクトアーティファクト管理
//!
//! 調査対象エリアの指定方法（ポリゴン・座標リスト・ローカル画像フォルダ）と、
//! プロジェクトフォルダに永続化するGISアーティファクトのパス規約を持つ。
//! 各アーティファクトはファイル存在チェックで再計算を省略する。

mod boundary;
mod sampler;

pub use boundary::{square_polygon, vertices_polygon, BoundaryProvider, NominatimClient};
pub use sampler::{
    derive_sample, read_point_table, FootprintProvider, OverpassClient, SAMPLE_SEED,
};

use crate::error::{ExpoAiError, Result};
use geojson::{Feature, FeatureCollection, GeoJson};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 境界の指定方法
#[derive(Debug, Clone)]
pub enum BoundarySource {
    /// 行政区域名（都市名・国名）から解決
    AdminName(String),
    /// 対角2点から正方形ポリゴンを生成
    Corners((f64, f64), (f64, f64)),
    /// CSVで与えられた頂点列
    Vertices(Vec<(f64, f64)>),
}

/// 調査エリアの指定（プロジェクトごとに1つ、変更不可）
#[derive(Debug, Clone)]
pub enum GeographySpec {
    /// ポリゴン内の建物フットプリントからランダムサンプリング
    Polygon(BoundarySource),
    /// 座標リストをそのままサンプルとして使用
    SpecificList { csv: PathBuf },
    /// ローカル画像フォルダとメタデータCSV
    LocalFolder {
        image_dir: PathBuf,
        metadata_csv: PathBuf,
    },
}

/// サンプリングされた建物1棟
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingSample {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// 建物サンプル一式
///
/// `local_image_ids` はローカルフォルダ方式のみ使用し、メタデータCSVの
/// 行順のまま画像IDを保持する。建物は `images_per_building` 行ずつの
/// グループで、座標はグループ先頭行のものになる。
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    pub buildings: Vec<BuildingSample>,
    pub local_image_ids: Vec<String>,
}

/// セッション全体で共有するプロジェクト文脈
///
/// 各コンポーネントは必要な値をここから読む。UIの共有フィールドに
/// 相当するものはすべてこの構造体に集約する。
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project_dir: PathBuf,
    pub country: String,
    pub city: String,
    /// 座標リスト／ローカル方式のファイル名プレフィックス
    pub custom_name: String,
    pub spec: GeographySpec,
    /// 建物あたりの画像枚数（ローカル方式のみ、最大3）
    pub images_per_building: usize,
    /// AIアシスト（自動分類）を有効にするか
    pub ai_assist: bool,
}

impl ProjectContext {
    /// プロジェクト設定の事前チェック
    ///
    /// フォルダ・国名・都市名のいずれかが未設定なら操作を中断する。
    /// 致命的ではなく、呼び出し側が警告表示して継続する。
    pub fn ensure_ready(&self) -> Result<()> {
        if self.project_dir.as_os_str().is_empty() || !self.project_dir.exists() {
            return Err(ExpoAiError::ProjectIncomplete(
                "プロジェクトフォルダを選択してください".into(),
            ));
        }
        if self.country.trim().is_empty() || self.country == "-" {
            return Err(ExpoAiError::ProjectIncomplete(
                "国名を設定してください".into(),
            ));
        }
        if self.city.trim().is_empty() || self.city == "-" {
            return Err(ExpoAiError::ProjectIncomplete(
                "都市名を設定してください".into(),
            ));
        }
        Ok(())
    }

    /// アーティファクトのファイル名プレフィックス
    pub fn prefix(&self) -> String {
        match self.spec {
            GeographySpec::Polygon(_) => format!("{}_{}", self.city, self.country),
            _ => self.custom_name.clone(),
        }
    }

    fn artifact(&self, suffix: &str) -> PathBuf {
        self.project_dir.join(format!("{}{}", self.prefix(), suffix))
    }

    pub fn boundary_path(&self) -> PathBuf {
        self.artifact("_boundary.geojson")
    }

    pub fn footprint_path(&self) -> PathBuf {
        self.artifact("_buildings_footprint.geojson")
    }

    pub fn subset_path(&self) -> PathBuf {
        self.artifact("_subset_footprints.geojson")
    }

    pub fn centroid_path(&self) -> PathBuf {
        self.artifact("_subset_centroids.geojson")
    }

    pub fn points_path(&self) -> PathBuf {
        self.artifact(".geojson")
    }

    pub fn building_info_path(&self) -> PathBuf {
        self.artifact("_building_info.csv")
    }

    pub fn ai_inspections_path(&self) -> PathBuf {
        self.artifact("_AI_inspections.csv")
    }

    pub fn expo_inspections_path(&self) -> PathBuf {
        self.artifact("_EXPO_inspections.csv")
    }
}

/// 都市名・国名の正規化（各単語の先頭を大文字化）
pub fn normalize_place_name(name: &str) -> String {
    name.trim()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 逆ジオコーディング（座標 → 都市名・国名）
pub trait ReverseGeocoder {
    fn city_country(&self, lat: f64, lon: f64) -> Result<(String, String)>;
}

/// FeatureCollectionをレイヤ名付きで書き出す
pub fn write_layer(path: &Path, features: Vec<Feature>, layer: &str) -> Result<()> {
    let mut foreign = geojson::JsonObject::new();
    foreign.insert("name".into(), serde_json::Value::String(layer.into()));
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    };
    std::fs::write(path, GeoJson::from(collection).to_string())?;
    Ok(())
}

/// FeatureCollectionを読み込む
pub fn read_layer(path: &Path) -> Result<FeatureCollection> {
    let content = std::fs::read_to_string(path)?;
    let geojson: GeoJson = content
        .parse()
        .map_err(|e: geojson::Error| ExpoAiError::InvalidInput(e.to_string()))?;
    match geojson {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(ExpoAiError::InvalidInput(format!(
            "FeatureCollectionではありません: {}",
            path.display()
        ))),
    }
}

/// 建物情報CSV（ナビゲーション駆動テーブル）を読み込む
pub fn read_building_info(path: &Path) -> Result<Vec<BuildingSample>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut samples = Vec::new();
    for record in reader.deserialize() {
        let sample: BuildingSample = record?;
        samples.push(sample);
    }
    Ok(samples)
}

/// 建物情報CSVを書き出す
pub fn write_building_info(path: &Path, samples: &[BuildingSample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}
