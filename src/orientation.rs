//! 道路方位とカメラ方位の計算モジュール
//!
//! 最寄りの道路点を外部サービスから取得し、建物座標からの方位角を
//! 球面モデルで計算する。カメラは道路のほぼ反対側を向くように
//! 左・中央・右の3方位を導出する。

use crate::error::{ExpoAiError, Result};
use std::time::Duration;

/// 3視点のパン角オフセット（左・中央・右）
pub const VIEW_ANGLE_OFFSETS: [f64; 3] = [-30.0, 0.0, 30.0];

/// 2点間の方位角（真北基準・時計回り・[0,360)度）
pub fn compute_azimuth(point1: (f64, f64), point2: (f64, f64)) -> f64 {
    let (lat1, lon1) = (point1.0.to_radians(), point1.1.to_radians());
    let (lat2, lon2) = (point2.0.to_radians(), point2.1.to_radians());

    let d_lon = lon2 - lon1;
    let x = d_lon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let azimuth = x.atan2(y).to_degrees();
    (azimuth + 360.0) % 360.0
}

/// 道路方位角からカメラ3方位を導出
///
/// 各方位は `(azimuth + offset + 180) % 360`。道路を背にして建物側を
/// 向き、左右に30度ずつ振る。
pub fn headings_from_azimuth(azimuth: f64) -> [f64; 3] {
    let mut headings = [0.0; 3];
    for (i, offset) in VIEW_ANGLE_OFFSETS.iter().enumerate() {
        headings[i] = (azimuth + offset + 180.0).rem_euclid(360.0);
    }
    headings
}

/// 最寄り道路点の検索サービス
pub trait RoadLocator {
    /// 指定座標の最寄り道路点（スナップ点）を返す
    fn nearest_road(&self, lat: f64, lon: f64) -> Result<(f64, f64)>;
}

/// 建物座標から道路方位角を求める
pub fn road_azimuth(locator: &dyn RoadLocator, lat: f64, lon: f64) -> Result<f64> {
    let (road_lat, road_lon) = locator.nearest_road(lat, lon)?;
    Ok(compute_azimuth((lat, lon), (road_lat, road_lon)))
}

/// Roads API クライアント
pub struct RoadsClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl RoadsClient {
    pub fn new(endpoint: String, api_key: String, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

impl RoadLocator for RoadsClient {
    fn nearest_road(&self, lat: f64, lon: f64) -> Result<(f64, f64)> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("points", format!("{},{}", lat, lon)),
                ("key", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExpoAiError::ServiceUnavailable(format!(
                "nearestRoads: HTTP {}",
                response.status()
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;

        let snapped = data
            .get("snappedPoints")
            .and_then(|p| p.as_array())
            .and_then(|a| a.first());

        match snapped {
            Some(point) => {
                let location = &point["location"];
                let road_lat = location["latitude"].as_f64();
                let road_lon = location["longitude"].as_f64();
                match (road_lat, road_lon) {
                    (Some(rlat), Some(rlon)) => Ok((rlat, rlon)),
                    _ => Err(ExpoAiError::RoadNotFound { lat, lon }),
                }
            }
            None => Err(ExpoAiError::RoadNotFound { lat, lon }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azimuth_cardinal_directions() {
        assert!((compute_azimuth((0.0, 0.0), (0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((compute_azimuth((0.0, 0.0), (1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((compute_azimuth((0.0, 0.0), (0.0, -1.0)) - 270.0).abs() < 1e-9);
        assert!((compute_azimuth((0.0, 0.0), (-1.0, 0.0)) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_azimuth_range() {
        let pairs = [
            ((35.0, 139.0), (35.1, 139.2)),
            ((35.0, 139.0), (34.8, 138.7)),
            ((-10.0, -60.0), (-10.5, -59.5)),
        ];
        for (p1, p2) in pairs {
            let az = compute_azimuth(p1, p2);
            assert!((0.0..360.0).contains(&az), "azimuth out of range: {}", az);
        }
    }

    #[test]
    fn test_headings_from_azimuth() {
        // 道路方位角200度 → 350 / 20 / 50 度
        let headings = headings_from_azimuth(200.0);
        assert!((headings[0] - 350.0).abs() < 1e-9);
        assert!((headings[1] - 20.0).abs() < 1e-9);
        assert!((headings[2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_headings_opposite_convention() {
        // 方位角不明時は0度扱い → 150 / 180 / 210 度
        let headings = headings_from_azimuth(0.0);
        assert_eq!(headings, [150.0, 180.0, 210.0]);
    }
}
