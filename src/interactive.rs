//! 対話式点検セッションモジュール
//!
//! 1建物ずつ画面に表示し、オペレータがラベルの確認・修正・保存を
//! 行うループ。操作は1文字コマンドで受け付ける。

use crate::classify::{AttributeKind, IMAGE_QUALITY_CLASSES};
use crate::error::{ExpoAiError, Result};
use crate::session::{PaneStatus, Session, StepOutcome};
use dialoguer::Input;

/// 対話アクション
pub enum InspectAction {
    /// 次の建物へ
    Next,
    /// 前の建物へ
    Previous,
    /// 視点IDで検索
    Search(String),
    /// 視点のラベルを編集（0始まり）
    Edit(usize),
    /// 視点の手動バウンディングボックス（0始まり）
    Crop(usize),
    /// 台帳を保存
    Save,
    /// 保存して終了
    Quit,
    /// 何もしない
    Noop,
}

/// 対話セッションを実行する
pub fn run_interactive(session: &mut Session) -> Result<()> {
    println!("🏢 調査対象: {}棟", session.sample_count());
    println!("---");
    println!("操作: [n]次へ [p]前へ [s]ID検索 [e1-e3]ラベル編集 [c1-c3]手動枠 [w]保存 [q]保存して終了");
    println!("---\n");

    loop {
        let action = prompt_action()?;
        match action {
            InspectAction::Next => match session.next() {
                Ok(StepOutcome::Entered(_)) => show_building(session),
                Ok(StepOutcome::Exhausted) => {
                    println!("⚠ これ以上の点検対象はありません");
                }
                Ok(_) => {}
                Err(e) => warn(&e),
            },
            InspectAction::Previous => match session.previous() {
                Ok(StepOutcome::Entered(_)) => show_building(session),
                Ok(StepOutcome::NotStarted) => {
                    println!("⚠ まず [n] で点検を開始してください");
                }
                Ok(_) => {}
                Err(e) => warn(&e),
            },
            InspectAction::Search(query) => match session.search(&query) {
                Ok(index) => {
                    println!("→ 建物 {} に移動しました（表示のみ）", index + 1);
                    show_building(session);
                }
                Err(e) => warn(&e),
            },
            InspectAction::Edit(view) => {
                if let Err(e) = edit_viewpoint(session, view) {
                    warn(&e);
                }
            }
            InspectAction::Crop(view) => {
                if let Err(e) = crop_viewpoint(session, view) {
                    warn(&e);
                }
            }
            InspectAction::Save => match session.save() {
                Ok(()) => println!("✓ 点検台帳を保存しました"),
                Err(e) => warn(&e),
            },
            InspectAction::Quit => {
                println!("保存して終了します...");
                match session.save() {
                    Ok(()) => println!("✓ 点検台帳を保存しました"),
                    Err(e) => warn(&e),
                }
                break;
            }
            InspectAction::Noop => {}
        }
    }

    Ok(())
}

fn prompt_action() -> Result<InspectAction> {
    let input: String = Input::new()
        .with_prompt("操作")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| ExpoAiError::CliExecution(e.to_string()))?;

    let trimmed = input.trim();
    let action = match trimmed {
        "" => InspectAction::Noop,
        "n" | "N" => InspectAction::Next,
        "p" | "P" => InspectAction::Previous,
        "w" | "W" => InspectAction::Save,
        "q" | "Q" => InspectAction::Quit,
        "s" | "S" => {
            let query: String = Input::new()
                .with_prompt("視点ID（例: 12_2）")
                .allow_empty(true)
                .interact_text()
                .map_err(|e| ExpoAiError::CliExecution(e.to_string()))?;
            InspectAction::Search(query)
        }
        "e1" | "e2" | "e3" => InspectAction::Edit(trimmed[1..].parse::<usize>().unwrap_or(1) - 1),
        "c1" | "c2" | "c3" => InspectAction::Crop(trimmed[1..].parse::<usize>().unwrap_or(1) - 1),
        _ => {
            println!("⚠ 不明な操作です: {}", trimmed);
            InspectAction::Noop
        }
    };
    Ok(action)
}

fn warn(error: &ExpoAiError) {
    println!("⚠ {}", error);
}

/// 現在の建物と3視点の状態を表示する
fn show_building(session: &Session) {
    let Some(building) = session.current_building() else {
        return;
    };
    let ctx = session.context();

    println!(
        "\n[建物 {}/{}] ({:.8}, {:.8}) {} / {}",
        session.cursor() + 1,
        session.sample_count(),
        building.latitude,
        building.longitude,
        ctx.city,
        ctx.country
    );

    for pane in session.panes() {
        let status = match pane.status {
            PaneStatus::Detected => match pane.confidence {
                Some(confidence) => format!("検出あり (conf {:.2})", confidence),
                None => "検出あり".to_string(),
            },
            PaneStatus::CachedDisplay => "検出済みキャッシュ".to_string(),
            PaneStatus::NotLoaded => "未取得".to_string(),
            other => other.placeholder_text().to_string(),
        };
        let heading = pane
            .heading
            .map(|h| format!(" heading={:.0}", h))
            .unwrap_or_default();
        println!("  [{}] {}{}", pane.image_id, status, heading);
        show_form(pane);
    }
    println!();
}

fn show_form(pane: &crate::session::ViewpointPane) {
    let value = |v: Option<&str>| v.unwrap_or("-").to_string();
    println!(
        "      材料: {} | LLRS: {} | 基準: {} | 階数: {} | 用途: {} | 位置: {} | 画質: {}",
        value(pane.form.get(AttributeKind::Material)),
        value(pane.form.get(AttributeKind::Llrs)),
        value(pane.form.get(AttributeKind::CodeLevel)),
        value(pane.form.get(AttributeKind::StoryCount)),
        value(pane.form.get(AttributeKind::Occupancy)),
        value(pane.form.get(AttributeKind::BlockPosition)),
        value(pane.form.image_quality.as_deref()),
    );
}

/// 1視点分のラベルを対話編集する
///
/// 空入力は現状維持、0はプレースホルダ（未設定）に戻す。
fn edit_viewpoint(session: &mut Session, view: usize) -> Result<()> {
    if session.panes().get(view).is_none() {
        return Err(ExpoAiError::InvalidInput(
            "建物を表示してから編集してください".into(),
        ));
    }

    for kind in AttributeKind::ALL {
        let current = session.panes()[view]
            .form
            .get(kind)
            .unwrap_or(kind.placeholder())
            .to_string();
        println!("{}（現在: {}）", kind.placeholder(), current);
        for (i, label) in kind.labels().iter().enumerate() {
            println!("  {}: {}", i + 1, label);
        }

        let input: String = Input::new()
            .with_prompt("番号 (空=維持, 0=未設定)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| ExpoAiError::CliExecution(e.to_string()))?;
        match parse_slot(&input, kind.labels().len())? {
            SlotChoice::Keep => {}
            SlotChoice::Unset => session.set_attribute(view, kind, None)?,
            SlotChoice::Label(index) => {
                session.set_attribute(view, kind, Some(kind.labels()[index].to_string()))?
            }
        }
    }

    // 画像品質はオペレータのみが設定する
    println!("Select Image Quality");
    for (i, label) in IMAGE_QUALITY_CLASSES.iter().enumerate() {
        println!("  {}: {}", i + 1, label);
    }
    let input: String = Input::new()
        .with_prompt("番号 (空=維持, 0=未設定)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| ExpoAiError::CliExecution(e.to_string()))?;
    match parse_slot(&input, IMAGE_QUALITY_CLASSES.len())? {
        SlotChoice::Keep => {}
        SlotChoice::Unset => session.set_image_quality(view, None)?,
        SlotChoice::Label(index) => {
            session.set_image_quality(view, Some(IMAGE_QUALITY_CLASSES[index].to_string()))?
        }
    }

    Ok(())
}

enum SlotChoice {
    Keep,
    Unset,
    Label(usize),
}

fn parse_slot(input: &str, label_count: usize) -> Result<SlotChoice> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(SlotChoice::Keep);
    }
    let slot: usize = trimmed
        .parse()
        .map_err(|_| ExpoAiError::InvalidInput(format!("番号を入力してください: {}", trimmed)))?;
    if slot == 0 {
        Ok(SlotChoice::Unset)
    } else if slot <= label_count {
        Ok(SlotChoice::Label(slot - 1))
    } else {
        Err(ExpoAiError::InvalidInput(format!(
            "番号が範囲外です: {}（1〜{}）",
            slot, label_count
        )))
    }
}

/// 手動4点指定による切り抜き
fn crop_viewpoint(session: &mut Session, view: usize) -> Result<()> {
    println!("作業画像（640x480）上の4点を「x,y x,y x,y x,y」の形式で入力してください");
    let input: String = Input::new()
        .with_prompt("4点")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| ExpoAiError::CliExecution(e.to_string()))?;

    let points = parse_points(&input)?;
    session.manual_crop(view, &points)?;

    // 手動枠の作成後は自動予測を実行しない。ラベルは手動で確認すること。
    println!("✓ 手動切り抜きを作成しました");
    println!("  注意: 手動枠では新しい予測は実行されません。ラベルを手動で確認・修正してください。");
    Ok(())
}

fn parse_points(input: &str) -> Result<Vec<(i32, i32)>> {
    let mut points = Vec::new();
    for token in input.split_whitespace() {
        let mut parts = token.split(',');
        let x = parts.next().and_then(|v| v.trim().parse::<i32>().ok());
        let y = parts.next().and_then(|v| v.trim().parse::<i32>().ok());
        match (x, y) {
            (Some(x), Some(y)) => points.push((x, y)),
            _ => {
                return Err(ExpoAiError::InvalidInput(format!(
                    "座標の形式が不正です: {}",
                    token
                )))
            }
        }
    }
    Ok(points)
}
