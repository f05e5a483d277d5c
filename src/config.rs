use crate::error::{ExpoAiError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,

    /// 建物検出の外部推論コマンドと重みファイル
    pub detector_command: String,
    pub detector_weights: String,

    /// 属性分類の外部推論コマンドと重みフォルダ
    pub classifier_command: String,
    pub classifier_weights_dir: String,

    /// 外部ジオサービスのエンドポイント
    pub streetview_endpoint: String,
    pub streetview_metadata_endpoint: String,
    pub roads_endpoint: String,
    pub geocode_endpoint: String,
    pub overpass_endpoint: String,

    /// パノラマ取得パラメータ
    pub image_width: u32,
    pub image_height: u32,
    pub fov: u32,
    pub pitch: i32,
    pub scale: u32,

    pub timeout_seconds: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default_config())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| ExpoAiError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("expo-ai").join("config.json"))
    }

    fn default_config() -> Self {
        Self {
            api_key: None,
            detector_command: "expo-ai-detect".into(),
            detector_weights: "dl_weights/building_detector.pt".into(),
            classifier_command: "expo-ai-classify".into(),
            classifier_weights_dir: "dl_weights".into(),
            streetview_endpoint: "https://maps.googleapis.com/maps/api/streetview".into(),
            streetview_metadata_endpoint: "https://maps.googleapis.com/maps/api/streetview/metadata"
                .into(),
            roads_endpoint: "https://roads.googleapis.com/v1/nearestRoads".into(),
            geocode_endpoint: "https://nominatim.openstreetmap.org".into(),
            overpass_endpoint: "https://overpass-api.de/api/interpreter".into(),
            image_width: 640,
            image_height: 480,
            fov: 120, // 広角で建物全体をカバー
            pitch: 5,
            scale: 2,
            timeout_seconds: 120,
        }
    }

    /// APIキーを取得（環境変数を優先）
    pub fn get_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("GOOGLE_MAPS_API_KEY") {
            return Ok(key);
        }

        self.api_key.clone().ok_or(ExpoAiError::MissingApiKey)
    }

    pub fn set_api_key(&mut self, key: String) -> Result<()> {
        self.api_key = Some(key);
        self.save()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capture_parameters() {
        let config = Config::default();
        assert_eq!(config.image_width, 640);
        assert_eq!(config.image_height, 480);
        assert_eq!(config.fov, 120);
        assert_eq!(config.pitch, 5);
        assert_eq!(config.scale, 2);
    }

    #[test]
    fn test_api_key_missing() {
        let config = Config {
            api_key: None,
            ..Config::default()
        };
        if std::env::var("GOOGLE_MAPS_API_KEY").is_err() {
            assert!(matches!(
                config.get_api_key(),
                Err(ExpoAiError::MissingApiKey)
            ));
        }
    }
}
