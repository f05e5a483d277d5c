//! 建物属性の分類モジュール
//!
//! 6種類の属性ごとに独立した分類モデルを呼び出し、
//! クラスインデックスを固定ラベル語彙へ変換する。

use crate::error::{ExpoAiError, Result};

/// 構造材料（LLRS Material）
pub const MATERIAL_CLASSES: [&str; 8] = [
    "Concrete, reinforced",
    "Concrete, unreinforced",
    "Masonry, reinforced",
    "Masonry, unreinforced",
    "Masonry, confined",
    "Steel",
    "Wood",
    "Earth",
];

/// 耐震機構（LLRS）
pub const LLRS_CLASSES: [&str; 6] = [
    "Moment frame",
    "Infilled frame",
    "Braced frame",
    "Wall",
    "Dual frame-wall system",
    "Post and beam",
];

/// 耐震基準レベル
pub const CODE_LEVEL_CLASSES: [&str; 4] = ["Pre-code", "Low-code", "Moderate-code", "High-code"];

/// 階数クラス（学習時のクラス順をそのまま保持）
pub const STORY_CLASSES: [&str; 9] = [
    "10-12", "13+", "1", "2", "3", "4", "5", "6-7", "8-9",
];

/// 用途クラス（末尾の重複はモデルの出力順に合わせてそのまま保持）
pub const OCCUPANCY_CLASSES: [&str; 7] = [
    "Residential",
    "Educational",
    "Government",
    "Industrial",
    "Mixed",
    "Other",
    "Residential",
];

/// 街区内の位置
pub const BLOCK_POSITION_CLASSES: [&str; 3] = ["Detached", "Corner", "Mid-block"];

/// 画像品質（オペレータ入力のみ、モデルなし）
pub const IMAGE_QUALITY_CLASSES: [&str; 3] = ["Good", "Moderate", "Poor"];

/// 分類対象の属性種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Material,
    Llrs,
    CodeLevel,
    StoryCount,
    Occupancy,
    BlockPosition,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 6] = [
        AttributeKind::Material,
        AttributeKind::Llrs,
        AttributeKind::CodeLevel,
        AttributeKind::StoryCount,
        AttributeKind::Occupancy,
        AttributeKind::BlockPosition,
    ];

    /// モデルの出力クラス数
    pub fn class_count(self) -> usize {
        match self {
            AttributeKind::Material => MATERIAL_CLASSES.len(),
            AttributeKind::Llrs => LLRS_CLASSES.len(),
            AttributeKind::CodeLevel => CODE_LEVEL_CLASSES.len(),
            AttributeKind::StoryCount => STORY_CLASSES.len(),
            AttributeKind::Occupancy => OCCUPANCY_CLASSES.len(),
            AttributeKind::BlockPosition => BLOCK_POSITION_CLASSES.len(),
        }
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            AttributeKind::Material => &MATERIAL_CLASSES,
            AttributeKind::Llrs => &LLRS_CLASSES,
            AttributeKind::CodeLevel => &CODE_LEVEL_CLASSES,
            AttributeKind::StoryCount => &STORY_CLASSES,
            AttributeKind::Occupancy => &OCCUPANCY_CLASSES,
            AttributeKind::BlockPosition => &BLOCK_POSITION_CLASSES,
        }
    }

    /// 重みファイル名
    pub fn weight_file(self) -> &'static str {
        match self {
            AttributeKind::Material => "densenet201_material.pt",
            AttributeKind::Llrs => "densenet201_llrs.pt",
            AttributeKind::CodeLevel => "densenet201_code.pt",
            AttributeKind::StoryCount => "densenet201_n_stories.pt",
            AttributeKind::Occupancy => "densenet201_occupancy.pt",
            AttributeKind::BlockPosition => "densenet201_block.pt",
        }
    }

    /// 未選択プレースホルダ（選択メニューのスロット0）
    pub fn placeholder(self) -> &'static str {
        match self {
            AttributeKind::Material => "Select Material",
            AttributeKind::Llrs => "Select LLRS",
            AttributeKind::CodeLevel => "Select Code Level",
            AttributeKind::StoryCount => "Select Number of Stories",
            AttributeKind::Occupancy => "Select Occupancy Type",
            AttributeKind::BlockPosition => "Select Block Position",
        }
    }
}

/// クラスインデックスをラベルへ変換
///
/// 階数と用途はラベル文字列で選択し、その他の属性はスロット
/// `index + 1`（スロット0はプレースホルダ）で選択するが、記録される
/// 値はどちらもラベル文字列になる。
pub fn label_for(kind: AttributeKind, index: usize) -> Result<&'static str> {
    let labels = kind.labels();
    labels.get(index).copied().ok_or_else(|| {
        ExpoAiError::ModelParse(format!(
            "クラスインデックス {} が範囲外です（{:?}: {}クラス）",
            index,
            kind,
            labels.len()
        ))
    })
}
