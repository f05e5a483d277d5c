//! 境界ポリゴンの生成と行政区域の解決

use crate::error::{ExpoAiError, Result};
use crate::geo::ReverseGeocoder;
use geo::{LineString, Polygon};
use std::time::Duration;

/// 対角2点から正方形の境界ポリゴンを生成する
///
/// 座標は (lat, lon)。リングは最小コーナーから反時計回りに閉じる。
pub fn square_polygon(corner1: (f64, f64), corner2: (f64, f64)) -> Polygon<f64> {
    let (lat1, lon1) = corner1;
    let (lat2, lon2) = corner2;
    let (min_lon, max_lon) = (lon1.min(lon2), lon1.max(lon2));
    let (min_lat, max_lat) = (lat1.min(lat2), lat1.max(lat2));

    Polygon::new(
        LineString::from(vec![
            (min_lon, min_lat),
            (min_lon, max_lat),
            (max_lon, max_lat),
            (max_lon, min_lat),
            (min_lon, min_lat),
        ]),
        vec![],
    )
}

/// 頂点列（lat, lon）から境界ポリゴンを生成する
pub fn vertices_polygon(vertices: &[(f64, f64)]) -> Result<Polygon<f64>> {
    if vertices.len() < 3 {
        return Err(ExpoAiError::InvalidInput(
            "ポリゴンには3点以上の頂点が必要です".into(),
        ));
    }
    let ring: Vec<(f64, f64)> = vertices.iter().map(|&(lat, lon)| (lon, lat)).collect();
    Ok(Polygon::new(LineString::from(ring), vec![]))
}

/// 行政区域名から境界ポリゴンを解決するサービス
pub trait BoundaryProvider {
    fn admin_boundary(&self, name: &str) -> Result<Polygon<f64>>;
}

/// Nominatim クライアント（行政境界の検索と逆ジオコーディング）
pub struct NominatimClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(endpoint: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("expo-ai")
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExpoAiError::ServiceUnavailable(format!(
                "Nominatim: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))
    }
}

impl BoundaryProvider for NominatimClient {
    fn admin_boundary(&self, name: &str) -> Result<Polygon<f64>> {
        let url = format!("{}/search", self.endpoint);
        let data = self.get_json(
            &url,
            &[
                ("q", name),
                ("format", "json"),
                ("polygon_geojson", "1"),
                ("limit", "1"),
            ],
        )?;

        let geometry = data
            .as_array()
            .and_then(|a| a.first())
            .and_then(|hit| hit.get("geojson"))
            .cloned()
            .ok_or_else(|| {
                ExpoAiError::ServiceUnavailable(format!("行政区域が見つかりません: {}", name))
            })?;

        let parsed: geojson::Geometry = serde_json::from_value(geometry)
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        let geometry: geo::Geometry<f64> = parsed
            .try_into()
            .map_err(|e: geojson::Error| ExpoAiError::ServiceUnavailable(e.to_string()))?;

        match geometry {
            geo::Geometry::Polygon(polygon) => Ok(polygon),
            // MultiPolygonは最大の構成ポリゴンを境界として採用する
            geo::Geometry::MultiPolygon(multi) => multi
                .into_iter()
                .max_by(|a, b| {
                    ring_len(a)
                        .partial_cmp(&ring_len(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or_else(|| {
                    ExpoAiError::ServiceUnavailable(format!("境界ジオメトリが空です: {}", name))
                }),
            _ => Err(ExpoAiError::ServiceUnavailable(format!(
                "境界がポリゴンではありません: {}",
                name
            ))),
        }
    }
}

fn ring_len(polygon: &Polygon<f64>) -> f64 {
    polygon.exterior().coords().count() as f64
}

impl ReverseGeocoder for NominatimClient {
    fn city_country(&self, lat: f64, lon: f64) -> Result<(String, String)> {
        let url = format!("{}/reverse", self.endpoint);
        let lat_s = lat.to_string();
        let lon_s = lon.to_string();
        let data = self.get_json(
            &url,
            &[
                ("lat", lat_s.as_str()),
                ("lon", lon_s.as_str()),
                ("format", "json"),
                ("accept-language", "en"),
            ],
        )?;

        let address = data.get("address").ok_or_else(|| {
            ExpoAiError::ServiceUnavailable(format!("逆ジオコーディング失敗: ({}, {})", lat, lon))
        })?;

        // city → town → village の順でフォールバック
        let city = ["city", "town", "village"]
            .iter()
            .find_map(|key| address.get(*key).and_then(|v| v.as_str()))
            .unwrap_or("Unknown")
            .to_string();
        let country = address
            .get("country")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();

        Ok((city, country))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_polygon_corners() {
        let polygon = square_polygon((37.68, -1.70), (37.67, -1.69));
        let coords: Vec<_> = polygon.exterior().coords().collect();
        // 閉じたリングで5点
        assert_eq!(coords.len(), 5);
        assert_eq!(coords[0], coords[4]);
        assert!((coords[0].x - -1.70).abs() < 1e-12);
        assert!((coords[0].y - 37.67).abs() < 1e-12);
        assert!((coords[2].x - -1.69).abs() < 1e-12);
        assert!((coords[2].y - 37.68).abs() < 1e-12);
    }

    #[test]
    fn test_vertices_polygon_requires_three_points() {
        assert!(vertices_polygon(&[(0.0, 0.0), (1.0, 1.0)]).is_err());
        let polygon = vertices_polygon(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]).unwrap();
        // 自動的に閉じる
        let first = *polygon.exterior().coords().next().unwrap();
        let last = *polygon.exterior().coords().last().unwrap();
        assert_eq!(first, last);
    }
}
