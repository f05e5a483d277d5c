//! 建物検出の結果処理モジュール
//!
//! 検出モデルの出力から建物クラスの最高信頼度ボックスを選び、
//! 分類用の切り抜きと表示用の注釈画像を作る。注釈は表示コピーにのみ
//! 描画し、分類に使う画素には触れない。

pub mod manual;

use crate::error::Result;
use crate::models::{Detection, Detector};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

/// 検出結果から採用するクラスラベル
pub const BUILDING_LABEL: &str = "building";

/// 破線の1セグメント長（ピクセル）
const DASH_LENGTH: u32 = 5;

/// 注釈線の色（赤）
const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 1視点分の検出結果
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    /// 分類に渡す切り抜き（検出なしならNone）
    pub cropped: Option<RgbImage>,
    /// 破線枠を描いた表示用コピー
    pub display: Option<RgbImage>,
    pub confidence: Option<f32>,
}

/// 建物クラスの最高信頼度ボックスを選ぶ
///
/// 比較は厳密な `>` なので、同信頼度なら先に現れたものが残る。
pub fn best_building_box(detections: &[Detection]) -> Option<&Detection> {
    let mut highest_conf = 0.0_f32;
    let mut best: Option<&Detection> = None;
    for detection in detections {
        if detection.label == BUILDING_LABEL && detection.confidence > highest_conf {
            highest_conf = detection.confidence;
            best = Some(detection);
        }
    }
    best
}

/// ボックス領域を元画像から切り抜く
pub fn crop_detection(image: &RgbImage, detection: &Detection) -> RgbImage {
    let (x1, y1, x2, y2) = clamp_box(image, detection);
    image::imageops::crop_imm(image, x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
        .to_image()
}

/// 画像面積に応じた破線の間隔と線の太さ
///
/// 640x480（307200px）を基準に、3段階の面積帯でスケールする。
pub fn outline_params(width: u32, height: u32) -> (u32, u32) {
    let area = width as u64 * height as u64;
    let base = 307_200_u64;
    let mut thickness = area * 3 / base;
    let gap = if area <= 600_000 {
        area * 14 / base
    } else if area < 1_000_000 {
        area * 14 / base * 3 / 4
    } else {
        thickness = area * 3 / base * 5 / 8;
        area * 14 / base * 3 / 8
    };
    (gap.max(1) as u32, thickness.max(1) as u32)
}

/// 表示用コピーに赤い破線ボックスを描く
pub fn draw_dashed_box(display: &mut RgbImage, detection: &Detection, gap: u32, thickness: u32) {
    let (x1, y1, x2, y2) = clamp_box(display, detection);
    let gap = gap.max(1);

    // 上下の辺
    let mut x = x1;
    while x < x2 {
        let len = DASH_LENGTH.min(x2 - x);
        dash(display, x, y1, len, thickness, false);
        dash(display, x, y2.saturating_sub(thickness), len, thickness, false);
        x += gap;
    }
    // 左右の辺
    let mut y = y1;
    while y < y2 {
        let len = DASH_LENGTH.min(y2 - y);
        dash(display, x1, y, len, thickness, true);
        dash(display, x2.saturating_sub(thickness), y, len, thickness, true);
        y += gap;
    }
}

fn dash(display: &mut RgbImage, x: u32, y: u32, len: u32, thickness: u32, vertical: bool) {
    if len == 0 {
        return;
    }
    let (w, h) = if vertical {
        (thickness, len)
    } else {
        (len, thickness)
    };
    draw_filled_rect_mut(
        display,
        Rect::at(x as i32, y as i32).of_size(w, h),
        OUTLINE_COLOR,
    );
}

fn clamp_box(image: &RgbImage, detection: &Detection) -> (u32, u32, u32, u32) {
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    let x1 = clamp(detection.x1, image.width());
    let y1 = clamp(detection.y1, image.height());
    let x2 = clamp(detection.x2, image.width());
    let y2 = clamp(detection.y2, image.height());
    (x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
}

/// 1視点分の検出を実行する
pub fn run_detection(detector: &dyn Detector, original: &RgbImage) -> Result<DetectionOutcome> {
    let detections = detector.detect(original)?;

    match best_building_box(&detections) {
        Some(best) => {
            let cropped = crop_detection(original, best);
            let mut display = original.clone();
            let (gap, thickness) = outline_params(display.width(), display.height());
            draw_dashed_box(&mut display, best, gap, thickness);
            Ok(DetectionOutcome {
                cropped: Some(cropped),
                display: Some(display),
                confidence: Some(best.confidence),
            })
        }
        // 検出なしは正常系。切り抜きは作らず、下流の分類もスキップされる
        None => Ok(DetectionOutcome::default()),
    }
}
