//! 学習済みモデルとの連携シーム
//!
//! 検出・分類モデルは外部の推論コマンドとして扱い、本体からは
//! トレイト越しにのみ呼び出す。テストではフェイク実装に差し替える。

mod command;

pub use command::{CommandClassifier, CommandDetector};

use crate::classify::AttributeKind;
use crate::error::Result;
use image::RgbImage;
use serde::Deserialize;

/// 物体検出の1件分の結果
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub label: String,
}

/// 建物検出モデル
pub trait Detector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// 属性分類モデル（属性ごとに独立した重みを持つ）
pub trait Classifier {
    /// 切り抜き画像からクラスインデックスを返す
    fn classify(&self, image: &RgbImage, kind: AttributeKind) -> Result<usize>;
}
