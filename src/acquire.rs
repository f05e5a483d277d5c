//! ストリートレベル画像の取得モジュール
//!
//! リモート方式はパノラマサービスから取得し、現在の建物の表示中のみ
//! メモリに保持する（再訪時は再取得）。ローカルフォルダ方式は建物ID
//! をキーに画像ファイルを読み込み、切り抜き・注釈済み派生画像を
//! ディスクにキャッシュする。

use crate::config::Config;
use crate::error::{ExpoAiError, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// パノラマ画像サービス
pub trait PanoramaSource {
    /// 指定座標にカバレッジがあるか（メタデータ照会）
    fn is_available(&self, lat: f64, lon: f64) -> Result<bool>;

    /// 指定座標・方位の画像を取得する
    fn fetch(&self, lat: f64, lon: f64, heading: f64) -> Result<RgbImage>;
}

/// ブラウザで開けるパノラマのディープリンクを生成する
pub fn pano_deeplink(lat: f64, lon: f64, heading: f64, pitch: i32, fov: u32) -> String {
    format!(
        "https://www.google.com/maps/@?api=1&map_action=pano&viewpoint={},{}&heading={}&pitch={}&fov={}",
        lat, lon, heading, pitch, fov
    )
}

/// Street View Static API クライアント
pub struct StreetViewClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    metadata_endpoint: String,
    api_key: String,
    width: u32,
    height: u32,
    fov: u32,
    pitch: i32,
    scale: u32,
}

impl StreetViewClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.streetview_endpoint.clone(),
            metadata_endpoint: config.streetview_metadata_endpoint.clone(),
            api_key: config.get_api_key()?,
            width: config.image_width,
            height: config.image_height,
            fov: config.fov,
            pitch: config.pitch,
            scale: config.scale,
        })
    }
}

impl PanoramaSource for StreetViewClient {
    fn is_available(&self, lat: f64, lon: f64) -> Result<bool> {
        let response = self
            .client
            .get(&self.metadata_endpoint)
            .query(&[
                ("location", format!("{},{}", lat, lon)),
                ("key", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        let data: serde_json::Value = response
            .json()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        Ok(data.get("status").and_then(|s| s.as_str()) == Some("OK"))
    }

    fn fetch(&self, lat: f64, lon: f64, heading: f64) -> Result<RgbImage> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("size", format!("{}x{}", self.width, self.height)),
                ("location", format!("{},{}", lat, lon)),
                ("heading", heading.to_string()),
                ("fov", self.fov.to_string()),
                ("pitch", self.pitch.to_string()),
                ("scale", self.scale.to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExpoAiError::ServiceUnavailable(format!(
                "パノラマ取得失敗: HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| ExpoAiError::ServiceUnavailable(e.to_string()))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| ExpoAiError::ImageLoad(e.to_string()))?;
        Ok(img.to_rgb8())
    }
}

/// ローカル画像フォルダのストア
///
/// 元画像は `{dir}/{id}.jpg`、派生画像は `Cropped_images/` と
/// `displayed_images/` の下にIDをキーとして永続化する。派生画像が
/// 既に存在する場合は再計算しない。
pub struct LocalImageStore {
    image_dir: PathBuf,
}

impl LocalImageStore {
    pub fn new(image_dir: PathBuf) -> Self {
        Self { image_dir }
    }

    pub fn source_path(&self, image_id: &str) -> PathBuf {
        self.image_dir.join(format!("{}.jpg", image_id))
    }

    pub fn cropped_path(&self, image_id: &str) -> PathBuf {
        self.image_dir
            .join("Cropped_images")
            .join(format!("{}_cropped.jpg", image_id))
    }

    pub fn displayed_path(&self, image_id: &str) -> PathBuf {
        self.image_dir
            .join("displayed_images")
            .join(format!("{}_displayed.jpg", image_id))
    }

    pub fn load_source(&self, image_id: &str) -> Result<RgbImage> {
        load_rgb(&self.source_path(image_id))
    }

    pub fn load_cropped(&self, image_id: &str) -> Option<RgbImage> {
        let path = self.cropped_path(image_id);
        path.exists().then(|| load_rgb(&path).ok()).flatten()
    }

    pub fn has_displayed(&self, image_id: &str) -> bool {
        self.displayed_path(image_id).exists()
    }

    pub fn save_cropped(&self, image_id: &str, img: &RgbImage) -> Result<()> {
        let path = self.cropped_path(image_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        img.save(&path)
            .map_err(|e| ExpoAiError::ImageLoad(e.to_string()))
    }

    pub fn save_displayed(&self, image_id: &str, img: &RgbImage) -> Result<()> {
        let path = self.displayed_path(image_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        img.save(&path)
            .map_err(|e| ExpoAiError::ImageLoad(e.to_string()))
    }

    /// キャッシュ済み派生画像の件数（cropped, displayed）
    pub fn cache_counts(&self) -> (usize, usize) {
        let count = |dir: &Path| {
            walkdir::WalkDir::new(dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        };
        (
            count(&self.image_dir.join("Cropped_images")),
            count(&self.image_dir.join("displayed_images")),
        )
    }
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)
        .map_err(|e| ExpoAiError::ImageLoad(format!("{}: {}", path.display(), e)))?;
    Ok(img.to_rgb8())
}
