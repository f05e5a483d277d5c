//! 点検セッションのナビゲーション制御
//!
//! 「次へ」「前へ」「ID検索」「保存」を状態機械として実装する。
//! 建物に入るたびに 座標 → 道路方位 → 画像取得×3 → 建物検出×3 →
//! （AIアシスト時）属性分類 の順でパイプラインを実行し、結果を
//! 視点ペインへ反映する。外部呼び出しの失敗は該当視点の
//! プレースホルダ化に留め、ステップ全体は中断しない。

use crate::acquire::{pano_deeplink, LocalImageStore, PanoramaSource};
use crate::classify::{label_for, AttributeKind};
use crate::detect::manual::{perspective_crop, to_work_size};
use crate::detect::run_detection;
use crate::error::{ExpoAiError, Result};
use crate::geo::{
    normalize_place_name, BuildingSample, GeographySpec, ProjectContext, ReverseGeocoder,
    SampleSet,
};
use crate::ledger::{viewpoint_id, InspectionLedger, InspectionRecord, VIEWS_PER_BUILDING};
use crate::models::{Classifier, Detector};
use crate::orientation::{headings_from_azimuth, road_azimuth, RoadLocator};
use image::RgbImage;

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingSample,
    AtBuilding(usize),
    Exhausted,
}

/// ナビゲーション操作の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 指定インデックスの建物に入った
    Entered(usize),
    /// 末尾に到達（カーソルは進まない）
    Exhausted,
    /// 先頭でのpreviousは何もしない
    AtStart,
    /// まだ一度もnextしていない
    NotStarted,
}

/// 視点ペインの表示状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    NotLoaded,
    Detected,
    NoBuilding,
    Unavailable,
    /// ローカル方式で注釈済み画像をキャッシュから再表示
    CachedDisplay,
}

impl PaneStatus {
    pub fn placeholder_text(self) -> &'static str {
        match self {
            PaneStatus::NoBuilding => "No Building detected",
            PaneStatus::Unavailable => "Street View not available",
            _ => "",
        }
    }
}

/// 1視点分の属性フォーム
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewpointForm {
    pub material: Option<String>,
    pub llrs: Option<String>,
    pub code_level: Option<String>,
    pub stories: Option<String>,
    pub occupancy: Option<String>,
    pub block_position: Option<String>,
    pub image_quality: Option<String>,
}

impl ViewpointForm {
    pub fn get(&self, kind: AttributeKind) -> Option<&str> {
        match kind {
            AttributeKind::Material => self.material.as_deref(),
            AttributeKind::Llrs => self.llrs.as_deref(),
            AttributeKind::CodeLevel => self.code_level.as_deref(),
            AttributeKind::StoryCount => self.stories.as_deref(),
            AttributeKind::Occupancy => self.occupancy.as_deref(),
            AttributeKind::BlockPosition => self.block_position.as_deref(),
        }
    }

    pub fn set(&mut self, kind: AttributeKind, value: Option<String>) {
        let slot = match kind {
            AttributeKind::Material => &mut self.material,
            AttributeKind::Llrs => &mut self.llrs,
            AttributeKind::CodeLevel => &mut self.code_level,
            AttributeKind::StoryCount => &mut self.stories,
            AttributeKind::Occupancy => &mut self.occupancy,
            AttributeKind::BlockPosition => &mut self.block_position,
        };
        *slot = value;
    }
}

/// 1視点ペイン
#[derive(Debug, Clone)]
pub struct ViewpointPane {
    pub image_id: String,
    pub status: PaneStatus,
    /// 注釈前のバックアップ（手動切り抜きの入力）
    pub original: Option<RgbImage>,
    /// 分類に使う切り抜き
    pub cropped: Option<RgbImage>,
    /// 破線枠つきの表示コピー
    pub display: Option<RgbImage>,
    pub confidence: Option<f32>,
    pub heading: Option<f64>,
    /// リモート方式はディープリンク、ローカル方式はファイル名ステム
    pub image_url: Option<String>,
    pub form: ViewpointForm,
}

impl ViewpointPane {
    fn new(image_id: String) -> Self {
        Self {
            image_id,
            status: PaneStatus::NotLoaded,
            original: None,
            cropped: None,
            display: None,
            confidence: None,
            heading: None,
            image_url: None,
            form: ViewpointForm::default(),
        }
    }
}

/// セッションが利用する外部サービス一式
pub struct SessionDeps {
    pub panorama: Box<dyn PanoramaSource>,
    pub roads: Box<dyn RoadLocator>,
    pub geocoder: Box<dyn ReverseGeocoder>,
    pub detector: Box<dyn Detector>,
    pub classifier: Box<dyn Classifier>,
    /// ディープリンクに載せる撮影パラメータ
    pub pitch: i32,
    pub fov: u32,
}

/// 点検セッション
pub struct Session {
    ctx: ProjectContext,
    deps: SessionDeps,
    sample: Option<SampleSet>,
    ledger: Option<InspectionLedger>,
    /// 現在の建物インデックス。-1は先頭の手前
    cursor: i64,
    exhausted: bool,
    /// 保存済み台帳のマージはセッション中1回だけ
    merged: bool,
    /// このセッションで建物に入ったか（未入場のペインはコミットしない）
    entered: bool,
    panes: Vec<ViewpointPane>,
    azimuth: Option<f64>,
}

impl Session {
    pub fn new(ctx: ProjectContext, deps: SessionDeps) -> Self {
        Self {
            ctx,
            deps,
            sample: None,
            ledger: None,
            cursor: -1,
            exhausted: false,
            merged: false,
            entered: false,
            panes: Vec::new(),
            azimuth: None,
        }
    }

    /// サンプル確定時に台帳を生成する
    pub fn load_sample(&mut self, sample: SampleSet) {
        self.ledger = Some(InspectionLedger::create_empty(sample.buildings.len()));
        self.sample = Some(sample);
    }

    pub fn state(&self) -> SessionState {
        if self.ctx.ensure_ready().is_err() {
            return SessionState::Idle;
        }
        if self.sample.is_none() || self.cursor < 0 {
            return SessionState::AwaitingSample;
        }
        if self.exhausted {
            return SessionState::Exhausted;
        }
        SessionState::AtBuilding(self.cursor as usize)
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn sample_count(&self) -> usize {
        self.sample.as_ref().map_or(0, |s| s.buildings.len())
    }

    pub fn panes(&self) -> &[ViewpointPane] {
        &self.panes
    }

    pub fn ledger(&self) -> Option<&InspectionLedger> {
        self.ledger.as_ref()
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    pub fn current_building(&self) -> Option<&BuildingSample> {
        if self.cursor < 0 {
            return None;
        }
        self.sample
            .as_ref()
            .and_then(|s| s.buildings.get(self.cursor as usize))
    }

    /// 次の建物へ進む
    ///
    /// 初回は保存済み台帳をマージして再開位置を合わせる。進む前に
    /// 現在の建物の編集内容を台帳へコミットする。末尾では進まず
    /// Exhaustedを返す（致命的ではない）。
    pub fn next(&mut self) -> Result<StepOutcome> {
        self.ctx.ensure_ready()?;
        let sample_count = self.require_sample()?.buildings.len();

        if !self.merged {
            self.merged = true;
            let ai_path = self.ctx.ai_inspections_path();
            let expo_path = self.ctx.expo_inspections_path();
            let ledger = self.require_ledger_mut()?;
            if let Err(e) = ledger.merge_from_disk(&ai_path, &expo_path) {
                eprintln!("既存台帳の読み込みに失敗しました: {}", e);
            }
            let resume = ledger.resume_cursor();
            if let Some(resume) = resume {
                if resume > self.cursor {
                    self.cursor = resume;
                }
            }
        }

        if self.cursor + 1 >= sample_count as i64 {
            self.exhausted = true;
            return Ok(StepOutcome::Exhausted);
        }

        if self.cursor >= 0 && self.entered {
            self.commit_current()?;
        }

        self.cursor += 1;
        self.exhausted = false;
        self.enter_building()?;
        Ok(StepOutcome::Entered(self.cursor as usize))
    }

    /// 前の建物へ戻る（コミットはしない）
    pub fn previous(&mut self) -> Result<StepOutcome> {
        self.ctx.ensure_ready()?;
        self.require_sample()?;

        if self.cursor < 0 {
            return Ok(StepOutcome::NotStarted);
        }
        if self.cursor == 0 {
            return Ok(StepOutcome::AtStart);
        }

        self.cursor -= 1;
        self.exhausted = false;
        self.enter_building()?;
        Ok(StepOutcome::Entered(self.cursor as usize))
    }

    /// 視点IDで建物を検索してカーソルを移動する（表示のみ、再取得なし）
    pub fn search(&mut self, query: &str) -> Result<usize> {
        self.ctx.ensure_ready()?;
        self.require_sample()?;
        let ledger = self.require_ledger_mut()?;

        let row_index = ledger.find_by_id(query)?;
        let building_index = row_index / VIEWS_PER_BUILDING;

        self.cursor = building_index as i64;
        self.exhausted = false;
        self.init_panes(building_index);
        self.overlay_saved(building_index);
        self.entered = true;
        Ok(building_index)
    }

    /// 現在の建物をコミットして台帳をディスクへ書き出す
    ///
    /// 保存失敗（ファイルが開かれている等）でもメモリ上のデータは
    /// 保持されるので、閉じてから再試行できる。
    pub fn save(&mut self) -> Result<()> {
        self.ctx.ensure_ready()?;
        if self.cursor >= 0 && self.entered {
            self.commit_current()?;
        }
        let ai_path = self.ctx.ai_inspections_path();
        let expo_path = self.ctx.expo_inspections_path();
        self.require_ledger_mut()?.flush(&ai_path, &expo_path)
    }

    /// 属性フォームの値を設定する
    pub fn set_attribute(
        &mut self,
        view: usize,
        kind: AttributeKind,
        value: Option<String>,
    ) -> Result<()> {
        let pane = self.pane_mut(view)?;
        pane.form.set(kind, value);
        Ok(())
    }

    pub fn set_image_quality(&mut self, view: usize, value: Option<String>) -> Result<()> {
        let pane = self.pane_mut(view)?;
        pane.form.image_quality = value;
        Ok(())
    }

    /// 手動4点指定による透視補正切り抜き
    ///
    /// 点が4つ未満ならエラーになり、既存の切り抜きは変更されない。
    /// ローカル方式では切り抜きをディスクへ保存し直す。
    pub fn manual_crop(&mut self, view: usize, points: &[(i32, i32)]) -> Result<()> {
        let spec = self.ctx.spec.clone();
        let pane = self.pane_mut(view)?;
        let Some(original) = pane.original.as_ref() else {
            return Err(ExpoAiError::InvalidInput(
                "建物画像が表示されてから実行してください".into(),
            ));
        };

        let backup = to_work_size(original);
        let cropped = perspective_crop(&backup, points)?;

        if let GeographySpec::LocalFolder { image_dir, .. } = spec {
            if let Some(image_id) = pane.image_url.clone() {
                LocalImageStore::new(image_dir).save_cropped(&image_id, &cropped)?;
            }
        }
        pane.cropped = Some(cropped);
        Ok(())
    }

    fn require_sample(&self) -> Result<&SampleSet> {
        self.sample.as_ref().ok_or_else(|| {
            ExpoAiError::InvalidInput("建物サンプルが生成されていません".into())
        })
    }

    fn require_ledger_mut(&mut self) -> Result<&mut InspectionLedger> {
        self.ledger.as_mut().ok_or_else(|| {
            ExpoAiError::InvalidInput("点検台帳が初期化されていません".into())
        })
    }

    fn pane_mut(&mut self, view: usize) -> Result<&mut ViewpointPane> {
        self.panes.get_mut(view).ok_or_else(|| {
            ExpoAiError::InvalidInput(format!("視点インデックスが不正です: {}", view))
        })
    }

    fn init_panes(&mut self, building_index: usize) {
        let building_number = building_index + 1;
        self.panes = (0..VIEWS_PER_BUILDING)
            .map(|view| ViewpointPane::new(viewpoint_id(building_number, view)))
            .collect();
        self.azimuth = None;
    }

    /// 建物に入る: パイプラインを実行してペインを構築する
    fn enter_building(&mut self) -> Result<()> {
        let building_index = self.cursor as usize;
        let building = self.require_sample()?.buildings[building_index].clone();
        self.entered = true;
        self.init_panes(building_index);

        // ポリゴン方式以外は建物ごとに都市・国が変わりうるので更新する
        if !matches!(self.ctx.spec, GeographySpec::Polygon(_)) {
            match self
                .deps
                .geocoder
                .city_country(building.latitude, building.longitude)
            {
                Ok((city, country)) => {
                    self.ctx.city = normalize_place_name(&city);
                    self.ctx.country = normalize_place_name(&country);
                }
                Err(e) => eprintln!("逆ジオコーディングに失敗しました: {}", e),
            }
        }

        match self.ctx.spec.clone() {
            GeographySpec::LocalFolder { image_dir, .. } => {
                self.enter_local(building_index, &image_dir)
            }
            _ => self.enter_remote(&building),
        }

        if self.ctx.ai_assist {
            self.predict_attributes();
        }

        // 保存済みの値（オペレータ確定値）で予測を上書きする
        self.overlay_saved(building_index);
        Ok(())
    }

    /// リモート方式: 道路方位 → カバレッジ確認 → 3方位の取得と検出
    fn enter_remote(&mut self, building: &BuildingSample) {
        let (lat, lon) = (building.latitude, building.longitude);

        self.azimuth = match road_azimuth(self.deps.roads.as_ref(), lat, lon) {
            Ok(azimuth) => Some(azimuth),
            Err(e) => {
                // 道路が無い場合は既定の180度回転（方位角0扱い）で続行する
                eprintln!("道路方位を取得できません: {}", e);
                None
            }
        };
        let headings = headings_from_azimuth(self.azimuth.unwrap_or(0.0));
        for (view, pane) in self.panes.iter_mut().enumerate() {
            pane.heading = Some(headings[view]);
        }

        let available = match self.deps.panorama.is_available(lat, lon) {
            Ok(available) => available,
            Err(e) => {
                eprintln!("カバレッジ確認に失敗しました: {}", e);
                false
            }
        };
        if !available {
            for pane in &mut self.panes {
                pane.status = PaneStatus::Unavailable;
            }
            return;
        }

        for view in 0..VIEWS_PER_BUILDING {
            let heading = headings[view];
            match self.deps.panorama.fetch(lat, lon, heading) {
                Ok(original) => {
                    self.panes[view].image_url = Some(pano_deeplink(
                        lat,
                        lon,
                        heading,
                        self.deps.pitch,
                        self.deps.fov,
                    ));
                    self.apply_detection(view, original, None);
                }
                Err(e) => {
                    eprintln!("パノラマ取得に失敗しました（視点{}）: {}", view + 1, e);
                    self.panes[view].status = PaneStatus::Unavailable;
                }
            }
        }
    }

    /// ローカル方式: 注釈済みキャッシュを優先し、無ければ検出して保存
    fn enter_local(&mut self, building_index: usize, image_dir: &std::path::Path) {
        let store = LocalImageStore::new(image_dir.to_path_buf());
        let per_building = self.ctx.images_per_building;
        let image_ids: Vec<Option<String>> = (0..VIEWS_PER_BUILDING)
            .map(|view| {
                if view >= per_building {
                    return None;
                }
                self.sample
                    .as_ref()
                    .and_then(|s| s.local_image_ids.get(building_index * per_building + view))
                    .cloned()
            })
            .collect();

        for (view, image_id) in image_ids.into_iter().enumerate() {
            let Some(image_id) = image_id else {
                self.panes[view].status = PaneStatus::Unavailable;
                continue;
            };
            self.panes[view].image_url = Some(image_id.clone());

            if store.has_displayed(&image_id) {
                // 注釈済み画像は再検出しない
                self.panes[view].display =
                    image::open(store.displayed_path(&image_id)).ok().map(|i| i.to_rgb8());
                self.panes[view].cropped = store.load_cropped(&image_id);
                self.panes[view].original = store.load_source(&image_id).ok();
                self.panes[view].status = PaneStatus::CachedDisplay;
                continue;
            }

            match store.load_source(&image_id) {
                Ok(original) => {
                    self.apply_detection(view, original, Some((&store, image_id.as_str())));
                }
                Err(e) => {
                    eprintln!("画像を読み込めません（{}）: {}", image_id, e);
                    self.panes[view].status = PaneStatus::Unavailable;
                }
            }
        }
    }

    fn apply_detection(
        &mut self,
        view: usize,
        original: RgbImage,
        persist: Option<(&LocalImageStore, &str)>,
    ) {
        match run_detection(self.deps.detector.as_ref(), &original) {
            Ok(outcome) => {
                if let (Some(cropped), Some(display)) = (&outcome.cropped, &outcome.display) {
                    if let Some((store, image_id)) = persist {
                        if let Err(e) = store
                            .save_cropped(image_id, cropped)
                            .and_then(|_| store.save_displayed(image_id, display))
                        {
                            eprintln!("派生画像の保存に失敗しました（{}）: {}", image_id, e);
                        }
                    }
                    self.panes[view].cropped = outcome.cropped;
                    self.panes[view].display = outcome.display;
                    self.panes[view].confidence = outcome.confidence;
                    self.panes[view].status = PaneStatus::Detected;
                } else {
                    self.panes[view].status = PaneStatus::NoBuilding;
                }
            }
            Err(e) => {
                eprintln!("建物検出に失敗しました（視点{}）: {}", view + 1, e);
                self.panes[view].status = PaneStatus::NoBuilding;
            }
        }
        self.panes[view].original = Some(original);
    }

    /// AIアシスト: 切り抜きのある視点だけ6属性を予測してフォームへ入れる
    fn predict_attributes(&mut self) {
        for view in 0..self.panes.len() {
            let Some(cropped) = self.panes[view].cropped.clone() else {
                continue;
            };
            for kind in AttributeKind::ALL {
                match self.deps.classifier.classify(&cropped, kind) {
                    Ok(index) => match label_for(kind, index) {
                        Ok(label) => self.panes[view].form.set(kind, Some(label.to_string())),
                        Err(e) => eprintln!("予測ラベルの変換に失敗しました: {}", e),
                    },
                    Err(e) => {
                        eprintln!("属性予測に失敗しました（視点{} {:?}）: {}", view + 1, kind, e)
                    }
                }
            }
        }
    }

    /// 台帳の保存値でフォームを上書きする（nullの列は触らない）
    fn overlay_saved(&mut self, building_index: usize) {
        let Some(ledger) = self.ledger.as_ref() else {
            return;
        };
        let rows: Vec<InspectionRecord> = ledger.rows_for_building(building_index).to_vec();
        for (view, row) in rows.iter().enumerate() {
            let pane = &mut self.panes[view];
            for kind in AttributeKind::ALL {
                let saved = match kind {
                    AttributeKind::Material => &row.material,
                    AttributeKind::Llrs => &row.llrs,
                    AttributeKind::CodeLevel => &row.code_level,
                    AttributeKind::StoryCount => &row.stories,
                    AttributeKind::Occupancy => &row.occupancy,
                    AttributeKind::BlockPosition => &row.block_position,
                };
                if saved.is_some() {
                    pane.form.set(kind, saved.clone());
                }
            }
            if row.image_quality.is_some() {
                pane.form.image_quality = row.image_quality.clone();
            }
            if pane.image_url.is_none() {
                pane.image_url = row.image_ref.clone();
            }
        }
    }

    /// 現在の建物の3視点を台帳へコミットする
    fn commit_current(&mut self) -> Result<()> {
        let building_index = self.cursor as usize;
        let building = self.require_sample()?.buildings[building_index].clone();
        let country = self.ctx.country.clone();
        let city = self.ctx.city.clone();
        let is_specific = matches!(self.ctx.spec, GeographySpec::SpecificList { .. });

        for view in 0..VIEWS_PER_BUILDING {
            let pane = &self.panes[view];
            let record = InspectionRecord {
                id: Some(pane.image_id.clone()),
                latitude: Some(building.latitude),
                longitude: Some(building.longitude),
                country: Some(country.clone()),
                city: Some(city.clone()),
                material: pane.form.material.clone(),
                llrs: pane.form.llrs.clone(),
                code_level: pane.form.code_level.clone(),
                stories: pane.form.stories.clone(),
                occupancy: pane.form.occupancy.clone(),
                block_position: pane.form.block_position.clone(),
                image_quality: pane.form.image_quality.clone(),
                taxonomy: None, // record_viewpointで再計算される
                image_ref: self.image_ref_for(view, &building),
            };
            self.require_ledger_mut()?
                .record_viewpoint(building_index, view, record)?;
        }

        // エクスポージャ集計は座標リスト方式のみ中央視点の値で埋める
        if is_specific {
            let center = &self.panes[1];
            let record = InspectionRecord {
                id: Some((building_index + 1).to_string()),
                latitude: Some(building.latitude),
                longitude: Some(building.longitude),
                country: Some(country),
                city: Some(city),
                material: center.form.material.clone(),
                llrs: center.form.llrs.clone(),
                code_level: center.form.code_level.clone(),
                stories: center.form.stories.clone(),
                occupancy: center.form.occupancy.clone(),
                block_position: center.form.block_position.clone(),
                image_quality: center.form.image_quality.clone(),
                taxonomy: None,
                image_ref: None,
            };
            self.require_ledger_mut()?
                .record_exposure(building_index, record)?;
        }

        Ok(())
    }

    /// 画像参照列の値を決める
    ///
    /// リモート方式は取得時のディープリンク、取得できなかった視点は
    /// 道路方位が分かっている場合のみ方位つきリンクを構成する。
    /// ローカル方式はファイル名ステム。
    fn image_ref_for(&self, view: usize, building: &BuildingSample) -> Option<String> {
        let pane = &self.panes[view];
        if pane.image_url.is_some() {
            return pane.image_url.clone();
        }
        if matches!(self.ctx.spec, GeographySpec::LocalFolder { .. }) {
            return None;
        }
        match (self.azimuth, pane.heading) {
            (Some(_), Some(heading)) => Some(pano_deeplink(
                building.latitude,
                building.longitude,
                heading,
                self.deps.pitch,
                self.deps.fov,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_set_get_roundtrip() {
        let mut form = ViewpointForm::default();
        for kind in AttributeKind::ALL {
            assert!(form.get(kind).is_none());
            form.set(kind, Some("value".into()));
            assert_eq!(form.get(kind), Some("value"));
        }
    }

    #[test]
    fn test_placeholder_texts() {
        assert_eq!(
            PaneStatus::NoBuilding.placeholder_text(),
            "No Building detected"
        );
        assert_eq!(
            PaneStatus::Unavailable.placeholder_text(),
            "Street View not available"
        );
    }
}
