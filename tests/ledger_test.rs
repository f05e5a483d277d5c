//! 点検台帳の永続化テスト
//!
//! マージ・再開カーソル・保存の冪等性を検証

use expo_ai_rust::ledger::{viewpoint_id, InspectionLedger, InspectionRecord};
use tempfile::tempdir;

fn filled_record(building: usize, view: usize) -> InspectionRecord {
    InspectionRecord {
        id: Some(viewpoint_id(building, view)),
        latitude: Some(37.68),
        longitude: Some(-1.70),
        country: Some("Spain".into()),
        city: Some("Lorca".into()),
        material: Some("Masonry, unreinforced".into()),
        llrs: Some("Wall".into()),
        code_level: Some("Pre-code".into()),
        stories: Some("2".into()),
        occupancy: Some("Residential".into()),
        block_position: Some("Mid-block".into()),
        image_quality: Some("Good".into()),
        taxonomy: None,
        image_ref: Some(format!("img_{}_{}", building, view)),
    }
}

/// 9行（3棟）の台帳に6行分の保存データをマージすると、
/// 先頭6行は保存値・残り3行はnullのままになる
#[test]
fn test_merge_on_resume() {
    let dir = tempdir().expect("Failed to create temp dir");
    let ai_path = dir.path().join("test_AI_inspections.csv");
    let expo_path = dir.path().join("test_EXPO_inspections.csv");

    // 2棟分を記入して保存
    let mut saved = InspectionLedger::create_empty(2);
    for building in 0..2 {
        for view in 0..3 {
            saved
                .record_viewpoint(building, view, filled_record(building + 1, view))
                .unwrap();
        }
    }
    saved.flush(&ai_path, &expo_path).unwrap();

    // 3棟の新しい台帳にマージ
    let mut ledger = InspectionLedger::create_empty(3);
    assert!(ledger.merge_from_disk(&ai_path, &expo_path).unwrap());

    for i in 0..6 {
        let row = ledger.row(i).unwrap();
        assert!(!row.is_empty(), "row {} should be filled", i);
        assert_eq!(row.city.as_deref(), Some("Lorca"));
    }
    for i in 6..9 {
        assert!(ledger.row(i).unwrap().is_empty(), "row {} should be null", i);
    }

    // floor(6/3) - 1 = 1
    assert_eq!(ledger.resume_cursor(), Some(1));
}

/// 保存ファイルが無ければマージは何もしない
#[test]
fn test_merge_without_saved_file() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut ledger = InspectionLedger::create_empty(2);
    let merged = ledger
        .merge_from_disk(
            &dir.path().join("none_AI_inspections.csv"),
            &dir.path().join("none_EXPO_inspections.csv"),
        )
        .unwrap();
    assert!(!merged);
    assert_eq!(ledger.non_null_rows(), 0);
}

/// 保存済みテーブルがメモリ上のテーブルより長い場合はエラー
#[test]
fn test_merge_rejects_longer_saved_table() {
    let dir = tempdir().expect("Failed to create temp dir");
    let ai_path = dir.path().join("big_AI_inspections.csv");
    let expo_path = dir.path().join("big_EXPO_inspections.csv");

    let big = InspectionLedger::create_empty(5);
    big.flush(&ai_path, &expo_path).unwrap();

    let mut small = InspectionLedger::create_empty(2);
    assert!(small.merge_from_disk(&ai_path, &expo_path).is_err());
}

/// 編集なしで2回保存するとバイト単位で同一の出力になる
#[test]
fn test_save_idempotence() {
    let dir = tempdir().expect("Failed to create temp dir");
    let ai_path = dir.path().join("idem_AI_inspections.csv");
    let expo_path = dir.path().join("idem_EXPO_inspections.csv");

    let mut ledger = InspectionLedger::create_empty(2);
    for view in 0..3 {
        ledger
            .record_viewpoint(0, view, filled_record(1, view))
            .unwrap();
    }

    ledger.flush(&ai_path, &expo_path).unwrap();
    let first_ai = std::fs::read(&ai_path).unwrap();
    let first_expo = std::fs::read(&expo_path).unwrap();

    ledger.flush(&ai_path, &expo_path).unwrap();
    assert_eq!(std::fs::read(&ai_path).unwrap(), first_ai);
    assert_eq!(std::fs::read(&expo_path).unwrap(), first_expo);
}

/// 保存先にアクセスできない場合はエラーになるが、
/// メモリ上のデータは失われず再試行できる
#[test]
fn test_flush_failure_preserves_memory() {
    let dir = tempdir().expect("Failed to create temp dir");
    let bad_ai = dir.path().join("no_such_dir").join("x_AI_inspections.csv");
    let bad_expo = dir.path().join("no_such_dir").join("x_EXPO_inspections.csv");

    let mut ledger = InspectionLedger::create_empty(1);
    ledger.record_viewpoint(0, 0, filled_record(1, 0)).unwrap();

    assert!(ledger.flush(&bad_ai, &bad_expo).is_err());

    // 再試行は成功し、データも残っている
    let good_ai = dir.path().join("x_AI_inspections.csv");
    let good_expo = dir.path().join("x_EXPO_inspections.csv");
    ledger.flush(&good_ai, &good_expo).unwrap();

    let mut reloaded = InspectionLedger::create_empty(1);
    reloaded.merge_from_disk(&good_ai, &good_expo).unwrap();
    assert_eq!(
        reloaded.row(0).unwrap().id.as_deref(),
        Some("1_1")
    );
}

/// タクソノミーは保存・再読込後も保持される
#[test]
fn test_taxonomy_roundtrip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let ai_path = dir.path().join("tax_AI_inspections.csv");
    let expo_path = dir.path().join("tax_EXPO_inspections.csv");

    let mut ledger = InspectionLedger::create_empty(1);
    ledger.record_viewpoint(0, 0, filled_record(1, 0)).unwrap();
    let expected = ledger.row(0).unwrap().taxonomy.clone().unwrap();
    assert_eq!(expected, "Masonry, unreinforced/Wall/HEX:2/CODE:Pre-code");

    ledger.flush(&ai_path, &expo_path).unwrap();

    let mut reloaded = InspectionLedger::create_empty(1);
    reloaded.merge_from_disk(&ai_path, &expo_path).unwrap();
    assert_eq!(reloaded.row(0).unwrap().taxonomy.as_deref(), Some(expected.as_str()));
}

/// 空セルはNoneとして読み戻される
#[test]
fn test_null_cells_roundtrip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let ai_path = dir.path().join("null_AI_inspections.csv");
    let expo_path = dir.path().join("null_EXPO_inspections.csv");

    let mut ledger = InspectionLedger::create_empty(1);
    let record = InspectionRecord {
        id: Some("1_1".into()),
        latitude: Some(37.68),
        ..Default::default()
    };
    ledger.record_viewpoint(0, 0, record).unwrap();
    ledger.flush(&ai_path, &expo_path).unwrap();

    let mut reloaded = InspectionLedger::create_empty(1);
    reloaded.merge_from_disk(&ai_path, &expo_path).unwrap();
    let row = reloaded.row(0).unwrap();
    assert_eq!(row.id.as_deref(), Some("1_1"));
    assert!(row.material.is_none());
    assert!(row.taxonomy.is_none());
    assert!(reloaded.row(1).unwrap().is_empty());
}
