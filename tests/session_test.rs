//! ナビゲーション状態機械のテスト
//!
//! フェイクの外部サービスでパイプライン全体を駆動し、境界条件と
//! 台帳コミットの動作を検証する。

use expo_ai_rust::acquire::PanoramaSource;
use expo_ai_rust::classify::AttributeKind;
use expo_ai_rust::error::{ExpoAiError, Result};
use expo_ai_rust::geo::{
    BuildingSample, GeographySpec, ProjectContext, ReverseGeocoder, SampleSet,
};
use expo_ai_rust::models::{Classifier, Detection, Detector};
use expo_ai_rust::orientation::RoadLocator;
use expo_ai_rust::session::{PaneStatus, Session, SessionDeps, SessionState, StepOutcome};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct FakePanorama {
    available: bool,
}

impl PanoramaSource for FakePanorama {
    fn is_available(&self, _lat: f64, _lon: f64) -> Result<bool> {
        Ok(self.available)
    }

    fn fetch(&self, _lat: f64, _lon: f64, _heading: f64) -> Result<RgbImage> {
        Ok(RgbImage::new(640, 480))
    }
}

struct FakeRoads;

impl RoadLocator for FakeRoads {
    fn nearest_road(&self, lat: f64, lon: f64) -> Result<(f64, f64)> {
        // 真東の道路 → 方位角90度 → カメラは 240/270/300 度
        Ok((lat, lon + 0.001))
    }
}

struct NoRoads;

impl RoadLocator for NoRoads {
    fn nearest_road(&self, lat: f64, lon: f64) -> Result<(f64, f64)> {
        Err(ExpoAiError::RoadNotFound { lat, lon })
    }
}

struct FakeGeocoder;

impl ReverseGeocoder for FakeGeocoder {
    fn city_country(&self, _lat: f64, _lon: f64) -> Result<(String, String)> {
        Ok(("Lorca".into(), "Spain".into()))
    }
}

struct FakeDetector {
    hit: bool,
    calls: Arc<AtomicUsize>,
}

impl Detector for FakeDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.hit {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            x1: 10.0,
            y1: 10.0,
            x2: 200.0,
            y2: 200.0,
            confidence: 0.9,
            label: "building".into(),
        }])
    }
}

struct FakeClassifier {
    calls: Arc<AtomicUsize>,
}

impl Classifier for FakeClassifier {
    fn classify(&self, _image: &RgbImage, _kind: AttributeKind) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

struct Counters {
    detector: Arc<AtomicUsize>,
    classifier: Arc<AtomicUsize>,
}

fn make_deps(available: bool, hit: bool, road: bool) -> (SessionDeps, Counters) {
    let detector_calls = Arc::new(AtomicUsize::new(0));
    let classifier_calls = Arc::new(AtomicUsize::new(0));
    let roads: Box<dyn RoadLocator> = if road {
        Box::new(FakeRoads)
    } else {
        Box::new(NoRoads)
    };
    let deps = SessionDeps {
        panorama: Box::new(FakePanorama { available }),
        roads,
        geocoder: Box::new(FakeGeocoder),
        detector: Box::new(FakeDetector {
            hit,
            calls: detector_calls.clone(),
        }),
        classifier: Box::new(FakeClassifier {
            calls: classifier_calls.clone(),
        }),
        pitch: 5,
        fov: 120,
    };
    (
        deps,
        Counters {
            detector: detector_calls,
            classifier: classifier_calls,
        },
    )
}

fn specific_ctx(dir: &TempDir, ai_assist: bool) -> ProjectContext {
    ProjectContext {
        project_dir: dir.path().to_path_buf(),
        country: "Spain".into(),
        city: "Lorca".into(),
        custom_name: "survey".into(),
        spec: GeographySpec::SpecificList {
            csv: PathBuf::from("points.csv"),
        },
        images_per_building: 3,
        ai_assist,
    }
}

fn two_point_sample() -> SampleSet {
    SampleSet {
        buildings: vec![
            BuildingSample {
                id: 1,
                latitude: 40.0,
                longitude: -3.0,
            },
            BuildingSample {
                id: 2,
                latitude: 41.0,
                longitude: -4.0,
            },
        ],
        local_image_ids: Vec::new(),
    }
}

/// 座標リスト2棟のエンドツーエンド: 1棟目を完了して「次へ」で
/// 台帳の先頭3行が埋まり、残り3行はnullのままカーソルは1になる
#[test]
fn test_end_to_end_specific_list() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, true), deps);
    session.load_sample(two_point_sample());

    assert_eq!(session.state(), SessionState::AwaitingSample);
    assert_eq!(session.next().unwrap(), StepOutcome::Entered(0));
    assert_eq!(session.state(), SessionState::AtBuilding(0));

    // AIアシストで6属性が埋まっている
    let pane = &session.panes()[0];
    assert_eq!(pane.status, PaneStatus::Detected);
    assert_eq!(
        pane.form.get(AttributeKind::Material),
        Some("Concrete, reinforced")
    );
    assert_eq!(pane.form.get(AttributeKind::StoryCount), Some("10-12"));

    assert_eq!(session.next().unwrap(), StepOutcome::Entered(1));
    assert_eq!(session.cursor(), 1);

    let ledger = session.ledger().unwrap();
    for i in 0..3 {
        let row = ledger.row(i).unwrap();
        assert!(!row.is_empty(), "row {} should be committed", i);
        assert_eq!(row.latitude, Some(40.0));
        assert_eq!(row.longitude, Some(-3.0));
        assert!(row.taxonomy.is_some());
        assert!(row
            .image_ref
            .as_deref()
            .unwrap()
            .starts_with("https://www.google.com/maps/@?api=1&map_action=pano"));
    }
    for i in 3..6 {
        assert!(ledger.row(i).unwrap().is_empty(), "row {} should be null", i);
    }
    assert_eq!(ledger.row(0).unwrap().id.as_deref(), Some("1_1"));
    assert_eq!(ledger.row(2).unwrap().id.as_deref(), Some("1_3"));
}

/// 境界条件: 先頭でのprevious・末尾でのnext・1棟サンプル
#[test]
fn test_navigation_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(SampleSet {
        buildings: vec![BuildingSample {
            id: 1,
            latitude: 40.0,
            longitude: -3.0,
        }],
        local_image_ids: Vec::new(),
    });

    // nextする前のpreviousは未開始扱い
    assert_eq!(session.previous().unwrap(), StepOutcome::NotStarted);

    assert_eq!(session.next().unwrap(), StepOutcome::Entered(0));

    // 1棟サンプルでは両方の境界が同時に現れる
    assert_eq!(session.next().unwrap(), StepOutcome::Exhausted);
    assert_eq!(session.cursor(), 0);
    assert_eq!(session.state(), SessionState::Exhausted);

    assert_eq!(session.previous().unwrap(), StepOutcome::AtStart);
    assert_eq!(session.cursor(), 0);
}

/// 保存済み台帳から再開すると最初の未完了建物に進む
#[test]
fn test_resume_from_saved_ledger() {
    let dir = tempfile::tempdir().unwrap();

    // 1回目のセッション: 1棟目を完了して保存
    {
        let (deps, _) = make_deps(true, true, true);
        let mut session = Session::new(specific_ctx(&dir, false), deps);
        session.load_sample(two_point_sample());
        session.next().unwrap();
        session.set_attribute(0, AttributeKind::Material, Some("Steel".into())).unwrap();
        session.save().unwrap();
    }

    // 2回目のセッション: 最初のnextで2棟目に到達する
    let (deps, _) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(two_point_sample());
    assert_eq!(session.next().unwrap(), StepOutcome::Entered(1));
    assert_eq!(session.cursor(), 1);

    // マージ済みの保存値が残っている
    assert_eq!(
        session.ledger().unwrap().row(0).unwrap().material.as_deref(),
        Some("Steel")
    );
}

/// ID検索は表示のみのジャンプで、画像の再取得は行わない
#[test]
fn test_search_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, counters) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(two_point_sample());

    session.next().unwrap();
    session
        .set_attribute(1, AttributeKind::Occupancy, Some("Mixed".into()))
        .unwrap();
    session.next().unwrap(); // 1棟目をコミット

    let detector_calls = counters.detector.load(Ordering::SeqCst);
    assert_eq!(session.search("1_2").unwrap(), 0);
    assert_eq!(session.cursor(), 0);
    // 再取得・再検出なし
    assert_eq!(counters.detector.load(Ordering::SeqCst), detector_calls);
    // 保存値がフォームへ復元される
    assert_eq!(session.panes()[1].form.get(AttributeKind::Occupancy), Some("Mixed"));

    assert!(matches!(
        session.search("9_9"),
        Err(ExpoAiError::NotFound(_))
    ));
    assert!(matches!(session.search("  "), Err(ExpoAiError::NotFound(_))));
}

/// 道路が見つからない場合は180度回転の既定方位で継続する
#[test]
fn test_road_not_found_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _) = make_deps(true, true, false);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(two_point_sample());

    session.next().unwrap();
    let headings: Vec<f64> = session
        .panes()
        .iter()
        .map(|pane| pane.heading.unwrap())
        .collect();
    assert_eq!(headings, vec![150.0, 180.0, 210.0]);
    // 視点自体は取得・検出されている
    assert_eq!(session.panes()[0].status, PaneStatus::Detected);
}

/// カバレッジなしでは視点がプレースホルダになり、検出も分類も走らない
#[test]
fn test_unavailable_panorama_skips_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, counters) = make_deps(false, true, true);
    let mut session = Session::new(specific_ctx(&dir, true), deps);
    session.load_sample(two_point_sample());

    session.next().unwrap();
    for pane in session.panes() {
        assert_eq!(pane.status, PaneStatus::Unavailable);
        assert!(pane.cropped.is_none());
    }
    assert_eq!(counters.detector.load(Ordering::SeqCst), 0);
    assert_eq!(counters.classifier.load(Ordering::SeqCst), 0);
}

/// 検出なしは正常系: プレースホルダ表示になり分類だけスキップされる
#[test]
fn test_detection_miss_skips_classification() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, counters) = make_deps(true, false, true);
    let mut session = Session::new(specific_ctx(&dir, true), deps);
    session.load_sample(two_point_sample());

    session.next().unwrap();
    for pane in session.panes() {
        assert_eq!(pane.status, PaneStatus::NoBuilding);
    }
    assert_eq!(counters.detector.load(Ordering::SeqCst), 3);
    assert_eq!(counters.classifier.load(Ordering::SeqCst), 0);

    // コミットしてもID・座標は記録される
    session.next().unwrap();
    let row = session.ledger().unwrap().row(0).unwrap();
    assert_eq!(row.id.as_deref(), Some("1_1"));
    assert!(row.material.is_none());
}

/// エクスポージャ台帳は座標リスト方式で建物ごとに1行埋まる
#[test]
fn test_exposure_row_for_specific_list() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(two_point_sample());

    session.next().unwrap();
    session
        .set_attribute(1, AttributeKind::Material, Some("Wood".into()))
        .unwrap();
    session.save().unwrap();

    let expo_path = session.context().expo_inspections_path();
    let content = std::fs::read_to_string(expo_path).unwrap();
    let mut lines = content.lines();
    let _header = lines.next().unwrap();
    let first = lines.next().unwrap();
    assert!(first.starts_with("1,"));
    assert!(first.contains("Wood"));
}

/// 手動切り抜き: 4点未満はエラーで既存の切り抜きが保持される
#[test]
fn test_manual_crop_incomplete_keeps_previous() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _) = make_deps(true, true, true);
    let mut session = Session::new(specific_ctx(&dir, false), deps);
    session.load_sample(two_point_sample());
    session.next().unwrap();

    let before = session.panes()[0].cropped.clone().unwrap();
    let result = session.manual_crop(0, &[(10, 10), (100, 10), (10, 100)]);
    assert!(matches!(result, Err(ExpoAiError::ManualCropIncomplete(3))));
    assert_eq!(
        session.panes()[0].cropped.as_ref().unwrap().dimensions(),
        before.dimensions()
    );

    // 4点あれば成功して切り抜きが置き換わる
    session
        .manual_crop(0, &[(10, 10), (110, 10), (10, 110), (110, 110)])
        .unwrap();
    assert_eq!(
        session.panes()[0].cropped.as_ref().unwrap().dimensions(),
        (100, 100)
    );
}
