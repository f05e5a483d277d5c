//! 点検台帳モジュール
//!
//! 視点ごとの点検レコード（サンプル棟数×3行）と建物ごとの
//! エクスポージャ集計（棟数×1行）を保持する。テーブルはサンプル
//! サイズ確定時に全行nullで生成し、保存済みCSVがあれば先頭から
//! 行単位で上書きマージする。行の削除は行わない。

use crate::error::{ExpoAiError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// 1棟あたりの視点数
pub const VIEWS_PER_BUILDING: usize = 3;

/// 点検レコード1行（14列）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "LLRS Material")]
    pub material: Option<String>,
    #[serde(rename = "LLRS")]
    pub llrs: Option<String>,
    #[serde(rename = "Code Level")]
    pub code_level: Option<String>,
    #[serde(rename = "Number of Stories")]
    pub stories: Option<String>,
    #[serde(rename = "Occupancy")]
    pub occupancy: Option<String>,
    #[serde(rename = "Block Position")]
    pub block_position: Option<String>,
    #[serde(rename = "Image Quality")]
    pub image_quality: Option<String>,
    #[serde(rename = "Taxonomy")]
    pub taxonomy: Option<String>,
    #[serde(rename = "Image filename or link")]
    pub image_ref: Option<String>,
}

impl InspectionRecord {
    /// 全列nullか
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.country.is_none()
            && self.city.is_none()
            && self.material.is_none()
            && self.llrs.is_none()
            && self.code_level.is_none()
            && self.stories.is_none()
            && self.occupancy.is_none()
            && self.block_position.is_none()
            && self.image_quality.is_none()
            && self.taxonomy.is_none()
            && self.image_ref.is_none()
    }

    /// タクソノミー列を構成列から再計算する
    ///
    /// 材料・LLRS・階数・基準レベルがすべて揃っているときだけ値を持つ。
    pub fn recompute_taxonomy(&mut self) {
        self.taxonomy = build_taxonomy(
            self.material.as_deref(),
            self.llrs.as_deref(),
            self.stories.as_deref(),
            self.code_level.as_deref(),
        );
    }
}

/// タクソノミー文字列を組み立てる
pub fn build_taxonomy(
    material: Option<&str>,
    llrs: Option<&str>,
    stories: Option<&str>,
    code_level: Option<&str>,
) -> Option<String> {
    match (material, llrs, stories, code_level) {
        (Some(material), Some(llrs), Some(stories), Some(code_level)) => Some(format!(
            "{}/{}/HEX:{}/CODE:{}",
            material, llrs, stories, code_level
        )),
        _ => None,
    }
}

/// 視点ID文字列（建物番号・視点番号とも1始まり）
pub fn viewpoint_id(building_number: usize, view: usize) -> String {
    format!("{}_{}", building_number, view + 1)
}

/// 点検台帳
#[derive(Debug, Clone)]
pub struct InspectionLedger {
    rows: Vec<InspectionRecord>,
    expo: Vec<InspectionRecord>,
    resume_applied: bool,
}

impl InspectionLedger {
    /// サンプル棟数に対応する全行nullの台帳を生成する
    pub fn create_empty(sample_count: usize) -> Self {
        Self {
            rows: vec![InspectionRecord::default(); sample_count * VIEWS_PER_BUILDING],
            expo: vec![InspectionRecord::default(); sample_count],
            resume_applied: false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.expo.len()
    }

    pub fn rows(&self) -> &[InspectionRecord] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&InspectionRecord> {
        self.rows.get(index)
    }

    /// 建物1棟分の3行を返す
    pub fn rows_for_building(&self, building_index: usize) -> &[InspectionRecord] {
        let start = building_index * VIEWS_PER_BUILDING;
        &self.rows[start..start + VIEWS_PER_BUILDING]
    }

    /// 保存済みCSVを読み込み、先頭から行単位で上書きする
    ///
    /// マージは行位置ベース。保存済みテーブルがメモリ上のテーブルより
    /// 長い場合はサンプル設定が変わっているのでエラーにする。
    /// ファイルが無ければ何もしない（Ok(false)）。
    pub fn merge_from_disk(&mut self, ai_path: &Path, expo_path: &Path) -> Result<bool> {
        if !ai_path.exists() {
            return Ok(false);
        }

        let saved = read_records(ai_path)?;
        if saved.len() > self.rows.len() {
            return Err(ExpoAiError::InvalidInput(format!(
                "保存済み台帳の行数（{}）が現在のサンプル（{}行）を超えています",
                saved.len(),
                self.rows.len()
            )));
        }
        for (i, record) in saved.into_iter().enumerate() {
            self.rows[i] = record;
        }

        if expo_path.exists() {
            let saved_expo = read_records(expo_path)?;
            if saved_expo.len() > self.expo.len() {
                return Err(ExpoAiError::InvalidInput(
                    "保存済みエクスポージャ台帳の行数が現在のサンプルを超えています".into(),
                ));
            }
            for (i, record) in saved_expo.into_iter().enumerate() {
                self.expo[i] = record;
            }
        }

        println!("既存の点検データを読み込みました");
        Ok(true)
    }

    /// 再開位置のカーソル値を返す（セッション中1回だけ）
    ///
    /// `floor(非null行数 / 3) - 1`。次の「次へ」で最初の未完了建物に
    /// 到達する。非null行が無ければ-1（先頭の手前）。
    pub fn resume_cursor(&mut self) -> Option<i64> {
        if self.resume_applied {
            return None;
        }
        self.resume_applied = true;
        let non_null = self.non_null_rows() as i64;
        Some(non_null / VIEWS_PER_BUILDING as i64 - 1)
    }

    /// いずれかの列に値がある行数
    pub fn non_null_rows(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_empty()).count()
    }

    /// 視点1行を書き込む（タクソノミーは常に再計算）
    pub fn record_viewpoint(
        &mut self,
        building_index: usize,
        view: usize,
        mut record: InspectionRecord,
    ) -> Result<()> {
        let index = building_index * VIEWS_PER_BUILDING + view;
        if view >= VIEWS_PER_BUILDING || index >= self.rows.len() {
            return Err(ExpoAiError::InvalidInput(format!(
                "台帳の範囲外です: 建物{} 視点{}",
                building_index, view
            )));
        }
        record.recompute_taxonomy();
        self.rows[index] = record;
        Ok(())
    }

    /// 建物ごとの集計行を書き込む
    pub fn record_exposure(
        &mut self,
        building_index: usize,
        mut record: InspectionRecord,
    ) -> Result<()> {
        if building_index >= self.expo.len() {
            return Err(ExpoAiError::InvalidInput(format!(
                "台帳の範囲外です: 建物{}",
                building_index
            )));
        }
        record.recompute_taxonomy();
        self.expo[building_index] = record;
        Ok(())
    }

    /// 視点IDで行を検索して行インデックスを返す
    pub fn find_by_id(&self, search_id: &str) -> Result<usize> {
        let trimmed = search_id.trim();
        if trimmed.is_empty() {
            return Err(ExpoAiError::NotFound("検索IDが空です".into()));
        }
        self.rows
            .iter()
            .position(|row| row.id.as_deref() == Some(trimmed))
            .ok_or_else(|| ExpoAiError::NotFound(trimmed.to_string()))
    }

    /// 台帳2ファイルをCSVへ書き出す
    ///
    /// 一時ファイルへ書いてからリネームするので、保存失敗時も既存
    /// ファイルは壊れず、メモリ上のデータもそのまま残る。
    pub fn flush(&self, ai_path: &Path, expo_path: &Path) -> Result<()> {
        write_records_atomic(ai_path, &self.rows)?;
        write_records_atomic(expo_path, &self.expo)?;
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Vec<InspectionRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

fn write_records_atomic(path: &Path, records: &[InspectionRecord]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ExpoAiError::FileAccess(path.display().to_string()))?;

    let file_error = |e: std::io::Error| {
        ExpoAiError::FileAccess(format!("{} ({})", path.display(), e))
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(file_error)?;
    {
        let mut writer = csv::Writer::from_writer(&mut temp);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    }
    temp.flush().map_err(file_error)?;
    temp.persist(path)
        .map_err(|e| ExpoAiError::FileAccess(format!("{} ({})", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_empty_dimensions() {
        let ledger = InspectionLedger::create_empty(5);
        assert_eq!(ledger.rows().len(), 15);
        assert_eq!(ledger.sample_count(), 5);
        assert!(ledger.rows().iter().all(|row| row.is_empty()));
    }

    #[test]
    fn test_viewpoint_id_format() {
        assert_eq!(viewpoint_id(1, 0), "1_1");
        assert_eq!(viewpoint_id(12, 2), "12_3");
    }

    #[test]
    fn test_taxonomy_requires_all_parts() {
        assert_eq!(
            build_taxonomy(Some("Steel"), Some("Wall"), Some("2"), Some("Low-code")),
            Some("Steel/Wall/HEX:2/CODE:Low-code".to_string())
        );
        assert_eq!(build_taxonomy(Some("Steel"), None, Some("2"), Some("Low-code")), None);
    }

    #[test]
    fn test_record_viewpoint_recomputes_taxonomy() {
        let mut ledger = InspectionLedger::create_empty(1);
        let record = InspectionRecord {
            id: Some("1_1".into()),
            material: Some("Wood".into()),
            llrs: Some("Post and beam".into()),
            stories: Some("1".into()),
            code_level: Some("Pre-code".into()),
            ..Default::default()
        };
        ledger.record_viewpoint(0, 0, record).unwrap();
        assert_eq!(
            ledger.row(0).unwrap().taxonomy.as_deref(),
            Some("Wood/Post and beam/HEX:1/CODE:Pre-code")
        );
    }

    #[test]
    fn test_resume_cursor_applied_once() {
        let mut ledger = InspectionLedger::create_empty(3);
        for view in 0..3 {
            let record = InspectionRecord {
                id: Some(viewpoint_id(1, view)),
                ..Default::default()
            };
            ledger.record_viewpoint(0, view, record).unwrap();
        }
        assert_eq!(ledger.resume_cursor(), Some(0));
        assert_eq!(ledger.resume_cursor(), None);
    }

    #[test]
    fn test_resume_cursor_empty_ledger() {
        let mut ledger = InspectionLedger::create_empty(2);
        // 保存データなし → 先頭の手前
        assert_eq!(ledger.resume_cursor(), Some(-1));
    }

    #[test]
    fn test_find_by_id() {
        let mut ledger = InspectionLedger::create_empty(2);
        let record = InspectionRecord {
            id: Some("2_1".into()),
            ..Default::default()
        };
        ledger.record_viewpoint(1, 0, record).unwrap();
        assert_eq!(ledger.find_by_id("2_1").unwrap(), 3);
        assert!(matches!(ledger.find_by_id("9_1"), Err(ExpoAiError::NotFound(_))));
        assert!(matches!(ledger.find_by_id("  "), Err(ExpoAiError::NotFound(_))));
    }
}
