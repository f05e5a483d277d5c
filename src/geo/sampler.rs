//! 建物フットプリントのサンプリングパイプライン
//!
//! 境界 → フットプリント母集団 → 固定シードサブセット → 重心レイヤ →
//! 建物情報CSV の順にアーティファクトを生成する。各段階はファイルの
//! 存在チェックで再実行を省略するため、中断後も完了済みの段階から
//! 再開できる。

use crate::error::{ExpoAiError, Result};
use crate::geo::{
    read_building_info, read_layer, square_polygon, vertices_polygon, write_building_info,
    write_layer, BoundaryProvider, BoundarySource, BuildingSample, GeographySpec, ProjectContext,
    SampleSet,
};
use geo::{BoundingRect, Centroid, Contains, LineString, Polygon};
use geojson::{Feature, JsonObject};
use indicatif::ProgressBar;
use rand::{rngs::StdRng, SeedableRng};
use std::path::Path;
use std::time::Duration;

/// 再現性のための固定シード
pub const SAMPLE_SEED: u64 = 10;

/// 境界ポリゴン内の建物フットプリントを取得するサービス
pub trait FootprintProvider {
    fn footprints_within(&self, boundary: &Polygon<f64>) -> Result<Vec<(Polygon<f64>, JsonObject)>>;
}

/// 建物サンプルを導出する
///
/// 同じ入力・同じシードなら常に同じサンプルを返す。ポリゴン方式は
/// `sample_size` が必須で、母集団を超える場合は何も書き出さずに
/// エラーになる。
pub fn derive_sample(
    ctx: &ProjectContext,
    boundary_provider: &dyn BoundaryProvider,
    footprint_provider: &dyn FootprintProvider,
    sample_size: Option<usize>,
) -> Result<SampleSet> {
    ctx.ensure_ready()?;

    match &ctx.spec {
        GeographySpec::Polygon(source) => {
            ensure_boundary(ctx, source, boundary_provider)?;
            ensure_footprints(ctx, footprint_provider)?;
            ensure_subset(ctx, sample_size)?;
            ensure_centroids(ctx)?;
            ensure_building_info(ctx)?;
            let buildings = read_building_info(&ctx.building_info_path())?;
            Ok(SampleSet {
                buildings,
                local_image_ids: Vec::new(),
            })
        }
        GeographySpec::SpecificList { csv } => {
            // 座標リストがそのままサンプルになる（サブサンプリングなし）
            let rows = read_point_table(csv)?;
            ensure_point_layer(ctx, &rows)?;
            let buildings: Vec<BuildingSample> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| BuildingSample {
                    id: row.0.parse::<i64>().unwrap_or(i as i64 + 1),
                    latitude: row.1,
                    longitude: row.2,
                })
                .collect();
            if !ctx.building_info_path().exists() {
                write_building_info(&ctx.building_info_path(), &buildings)?;
            }
            Ok(SampleSet {
                buildings,
                local_image_ids: Vec::new(),
            })
        }
        GeographySpec::LocalFolder { metadata_csv, .. } => {
            if ctx.images_per_building == 0 || ctx.images_per_building > 3 {
                return Err(ExpoAiError::InvalidInput(
                    "建物あたりの画像枚数は1〜3を指定してください".into(),
                ));
            }
            let rows = read_point_table(metadata_csv)?;
            // メタデータは画像1枚につき1行。建物は連続する
            // images_per_building 行のグループで、座標は先頭行から取る。
            let buildings: Vec<BuildingSample> = rows
                .chunks_exact(ctx.images_per_building)
                .enumerate()
                .map(|(i, chunk)| BuildingSample {
                    id: i as i64 + 1,
                    latitude: chunk[0].1,
                    longitude: chunk[0].2,
                })
                .collect();
            let local_image_ids = rows.into_iter().map(|row| row.0).collect();
            Ok(SampleSet {
                buildings,
                local_image_ids,
            })
        }
    }
}

fn ensure_boundary(
    ctx: &ProjectContext,
    source: &BoundarySource,
    provider: &dyn BoundaryProvider,
) -> Result<()> {
    let path = ctx.boundary_path();
    if path.exists() {
        println!("境界ファイルは作成済み");
        return Ok(());
    }

    let (polygon, layer) = match source {
        BoundarySource::AdminName(name) => {
            println!("---------------- {} -------------------", name);
            (provider.admin_boundary(name)?, "Boundary")
        }
        BoundarySource::Corners(c1, c2) => (square_polygon(*c1, *c2), "square_polygon"),
        BoundarySource::Vertices(vertices) => (vertices_polygon(vertices)?, "polygon_layer"),
    };

    write_layer(&path, vec![polygon_feature(&polygon, JsonObject::new())], layer)?;
    println!("境界ファイルを保存: {}", path.display());
    Ok(())
}

fn ensure_footprints(ctx: &ProjectContext, provider: &dyn FootprintProvider) -> Result<()> {
    let path = ctx.footprint_path();
    if path.exists() {
        println!("建物フットプリントは作成済み");
        return Ok(());
    }

    let boundary = read_boundary(&ctx.boundary_path())?;
    println!("建物フットプリントをダウンロード中...");
    let footprints = provider.footprints_within(&boundary)?;
    if footprints.is_empty() {
        return Err(ExpoAiError::InvalidInput(format!(
            "建物フットプリントが見つかりません: {}",
            ctx.prefix()
        )));
    }

    let bar = ProgressBar::new(footprints.len() as u64);
    let features: Vec<Feature> = footprints
        .into_iter()
        .map(|(polygon, mut props)| {
            // 衝突を避けるためAREA列は持ち込まない
            props.remove("AREA");
            bar.inc(1);
            polygon_feature(&polygon, props)
        })
        .collect();
    bar.finish_and_clear();

    write_layer(&path, features, "buildings")?;
    println!("建物フットプリントを保存: {}", path.display());
    Ok(())
}

fn ensure_subset(ctx: &ProjectContext, sample_size: Option<usize>) -> Result<()> {
    let path = ctx.subset_path();
    if path.exists() {
        return Ok(());
    }

    let sample_size = sample_size.ok_or_else(|| {
        ExpoAiError::InvalidInput("ポリゴン方式にはサンプルサイズの指定が必要です".into())
    })?;

    let collection = read_layer(&ctx.footprint_path())?;
    let population = collection.features.len();
    if sample_size > population {
        return Err(ExpoAiError::SampleSize {
            requested: sample_size,
            population,
        });
    }

    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let indices = rand::seq::index::sample(&mut rng, population, sample_size);
    let subset: Vec<Feature> = indices
        .into_iter()
        .map(|i| collection.features[i].clone())
        .collect();

    println!("ランダムサブセットを保存: {}", path.display());
    write_layer(&path, subset, "random_subset")?;
    Ok(())
}

fn ensure_centroids(ctx: &ProjectContext) -> Result<()> {
    let path = ctx.centroid_path();
    if path.exists() {
        return Ok(());
    }

    let collection = read_layer(&ctx.subset_path())?;
    println!("重心を計算中...");

    let mut features = Vec::new();
    for (i, feature) in collection.features.iter().enumerate() {
        let Some(polygon) = feature_polygon(feature) else {
            continue;
        };
        let Some(centroid) = polygon.centroid() else {
            continue;
        };

        let mut props = feature.properties.clone().unwrap_or_default();
        let id = props
            .get("id")
            .and_then(|v| v.as_i64())
            .unwrap_or(i as i64 + 1);
        props.insert("id".into(), serde_json::Value::from(id));
        props.insert("latitude".into(), serde_json::Value::from(centroid.y()));
        props.insert("longitude".into(), serde_json::Value::from(centroid.x()));

        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&centroid))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    println!("重心レイヤを保存: {}", path.display());
    write_layer(&path, features, "centroids")?;
    Ok(())
}

fn ensure_building_info(ctx: &ProjectContext) -> Result<()> {
    let path = ctx.building_info_path();
    if path.exists() {
        return Ok(());
    }

    let collection = read_layer(&ctx.centroid_path())?;
    let mut samples = Vec::new();
    for (i, feature) in collection.features.iter().enumerate() {
        let props = feature.properties.clone().unwrap_or_default();
        let id = props
            .get("id")
            .and_then(|v| v.as_i64())
            .unwrap_or(i as i64 + 1);
        let latitude = props.get("latitude").and_then(|v| v.as_f64());
        let longitude = props.get("longitude").and_then(|v| v.as_f64());
        if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
            samples.push(BuildingSample {
                id,
                latitude,
                longitude,
            });
        }
    }

    write_building_info(&path, &samples)?;
    println!("建物情報CSVを保存: {}", path.display());
    Ok(())
}

fn ensure_point_layer(ctx: &ProjectContext, rows: &[(String, f64, f64)]) -> Result<()> {
    let path = ctx.points_path();
    if path.exists() {
        return Ok(());
    }

    let features: Vec<Feature> = rows
        .iter()
        .map(|(id, lat, lon)| {
            let point = geo::Point::new(*lon, *lat);
            let mut props = JsonObject::new();
            props.insert("id".into(), serde_json::Value::String(id.clone()));
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&point))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            }
        })
        .collect();

    write_layer(&path, features, "points")
}

/// ユーザー提供CSVから (id, lat, lon) を読み込む
///
/// id列が無い場合は1始まりの連番を割り当てる。列不足・型不正は
/// クラッシュではなく入力エラーとして報告する。
pub fn read_point_table(path: &Path) -> Result<Vec<(String, f64, f64)>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        ExpoAiError::InvalidInput(format!("CSVファイルを開けません: {} ({})", path.display(), e))
    })?;

    let headers = reader
        .headers()
        .map_err(|e| ExpoAiError::InvalidInput(e.to_string()))?
        .clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let lat_col = find("latitude");
    let lon_col = find("longitude");
    let (Some(lat_col), Some(lon_col)) = (lat_col, lon_col) else {
        return Err(ExpoAiError::InvalidInput(
            "CSVファイルの形式が正しくありません。latitude / longitude 列が必要です".into(),
        ));
    };
    let id_col = find("id");

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ExpoAiError::InvalidInput(e.to_string()))?;
        let parse = |col: usize| -> Result<f64> {
            record
                .get(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .ok_or_else(|| {
                    ExpoAiError::InvalidInput(format!("CSVの{}行目を解析できません", i + 2))
                })
        };
        let id = id_col
            .and_then(|c| record.get(c))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| (i + 1).to_string());
        rows.push((id, parse(lat_col)?, parse(lon_col)?));
    }
    Ok(rows)
}

fn read_boundary(path: &Path) -> Result<Polygon<f64>> {
    let collection = read_layer(path)?;
    collection
        .features
        .iter()
        .find_map(feature_polygon)
        .ok_or_else(|| {
            ExpoAiError::InvalidInput(format!("境界ポリゴンを読み込めません: {}", path.display()))
        })
}

fn feature_polygon(feature: &Feature) -> Option<Polygon<f64>> {
    let geometry = feature.geometry.clone()?;
    let converted: std::result::Result<geo::Geometry<f64>, _> = geometry.try_into();
    match converted.ok()? {
        geo::Geometry::Polygon(polygon) => Some(polygon),
        geo::Geometry::MultiPolygon(multi) => multi.into_iter().next(),
        _ => None,
    }
}

fn polygon_feature(polygon: &Polygon<f64>, props: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(polygon))),
        id: None,
        properties: Some(props),
        foreign_members: None,
    }
}

/// Overpass API クライアント（建物フットプリントの取得）
pub struct OverpassClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl OverpassClient {
    pub fn new(endpoint: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("expo-ai")
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

impl FootprintProvider for OverpassClient {
    fn footprints_within(&self, boundary: &Polygon<f64>) -> Result<Vec<(Polygon<f64>, JsonObject)>> {
        let rect = boundary
            .bounding_rect()
            .ok_or_else(|| ExpoAiError::InvalidInput("境界ポリゴンが空です".into()))?;
        let query = format!(
            "[out:json][timeout:120];(way[\"building\"]({},{},{},{}););out geom;",
            rect.min().y,
            rect.min().x,
            rect.max().y,
            rect.max().x
        );

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", query)])
            .send()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExpoAiError::ServiceUnavailable(format!(
                "Overpass: HTTP {}",
                response.status()
            )));
        }
        let data: serde_json::Value = response
            .json()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;

        let mut footprints = Vec::new();
        let elements = data
            .get("elements")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();
        for element in elements {
            let Some(geometry) = element.get("geometry").and_then(|g| g.as_array()) else {
                continue;
            };
            let ring: Vec<(f64, f64)> = geometry
                .iter()
                .filter_map(|node| {
                    Some((node.get("lon")?.as_f64()?, node.get("lat")?.as_f64()?))
                })
                .collect();
            if ring.len() < 4 {
                continue;
            }
            let polygon = Polygon::new(LineString::from(ring), vec![]);
            // bbox検索なので境界ポリゴン内のものだけ残す
            let inside = polygon
                .centroid()
                .map(|c| boundary.contains(&c))
                .unwrap_or(false);
            if !inside {
                continue;
            }
            let mut props = JsonObject::new();
            if let Some(id) = element.get("id").and_then(|v| v.as_i64()) {
                props.insert("id".into(), serde_json::Value::from(id));
            }
            footprints.push((polygon, props));
        }

        Ok(footprints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_seed_sampling_is_deterministic() {
        let mut rng1 = StdRng::seed_from_u64(SAMPLE_SEED);
        let mut rng2 = StdRng::seed_from_u64(SAMPLE_SEED);
        let a: Vec<usize> = rand::seq::index::sample(&mut rng1, 100, 10).into_iter().collect();
        let b: Vec<usize> = rand::seq::index::sample(&mut rng2, 100, 10).into_iter().collect();
        assert_eq!(a, b);
    }
}
