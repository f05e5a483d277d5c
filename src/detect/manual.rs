//! 手動バウンディングボックスによる透視補正切り抜き
//!
//! オペレータが作業画像（640x480固定）上で指定した4点を
//! 左上・右上・左下・右下に並べ替え、4点の作る四角形を軸平行の
//! 長方形へ写す透視変換で切り抜きを作る。変換は注釈前のバックアップ
//! 画像に対して適用する。

use crate::error::{ExpoAiError, Result};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// 作業画像の固定サイズ
pub const WORK_WIDTH: u32 = 640;
pub const WORK_HEIGHT: u32 = 480;

/// 元画像を作業サイズへリサイズする
pub fn to_work_size(image: &RgbImage) -> RgbImage {
    image::imageops::resize(
        image,
        WORK_WIDTH,
        WORK_HEIGHT,
        image::imageops::FilterType::Triangle,
    )
}

/// 4点を [左上, 右上, 左下, 右下] の順に並べ替える
///
/// まずy座標で上下2点ずつに分け、それぞれの組の中でx座標の小さい方を
/// 左とする。
pub fn sort_points(points: [(i32, i32); 4]) -> [(i32, i32); 4] {
    let mut sorted = points;
    sorted.sort_by_key(|p| (p.1, p.0));

    let mut top = [sorted[0], sorted[1]];
    top.sort_by_key(|p| p.0);
    let mut bottom = [sorted[2], sorted[3]];
    bottom.sort_by_key(|p| p.0);

    [top[0], top[1], bottom[0], bottom[1]]
}

/// 4点の四角形を透視補正して切り抜く
///
/// 出力サイズは向かい合う辺の長さの平均。4点ちょうどでなければ
/// エラーになり、既存の切り抜きは呼び出し側でそのまま保持される。
pub fn perspective_crop(backup: &RgbImage, points: &[(i32, i32)]) -> Result<RgbImage> {
    if points.len() != 4 {
        return Err(ExpoAiError::ManualCropIncomplete(points.len()));
    }

    let [tl, tr, bl, br] = sort_points([points[0], points[1], points[2], points[3]]);

    let crop_width = ((tr.0 - tl.0) + (br.0 - bl.0)) / 2;
    let crop_height = ((bl.1 - tl.1) + (br.1 - tr.1)) / 2;
    if crop_width <= 0 || crop_height <= 0 {
        return Err(ExpoAiError::InvalidInput(
            "選択範囲が小さすぎるか、点の配置が不正です".into(),
        ));
    }
    let (crop_width, crop_height) = (crop_width as u32, crop_height as u32);

    let src = [
        (tl.0 as f32, tl.1 as f32),
        (tr.0 as f32, tr.1 as f32),
        (bl.0 as f32, bl.1 as f32),
        (br.0 as f32, br.1 as f32),
    ];
    let dst = [
        (0.0, 0.0),
        (crop_width as f32 - 1.0, 0.0),
        (0.0, crop_height as f32 - 1.0),
        (crop_width as f32 - 1.0, crop_height as f32 - 1.0),
    ];

    let projection = Projection::from_control_points(src, dst).ok_or_else(|| {
        ExpoAiError::InvalidInput("4点から透視変換を計算できません（点が一直線上にあります）".into())
    })?;

    let mut cropped = RgbImage::new(crop_width, crop_height);
    warp_into(
        backup,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut cropped,
    );
    Ok(cropped)
}
