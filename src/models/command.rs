//! 外部推論コマンド連携モジュール
//!
//! 重みファイルと画像パスを引数に推論コマンドを起動し、標準出力の
//! JSONを解析する。画像はメモリ上のバッファなので、呼び出しごとに
//! 一時ファイルへ書き出して渡す。

use crate::classify::AttributeKind;
use crate::error::{ExpoAiError, Result};
use crate::models::{Classifier, Detection, Detector};
use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 建物検出コマンド
pub struct CommandDetector {
    command: String,
    weights: String,
}

impl CommandDetector {
    pub fn new(command: String, weights: String) -> Self {
        Self { command, weights }
    }
}

impl Detector for CommandDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let temp = write_temp_jpeg(image)?;
        let response = run_model_command(&self.command, &[&self.weights, &path_arg(temp.path())])?;
        serde_json::from_str::<Vec<Detection>>(&response)
            .map_err(|e| ExpoAiError::ModelParse(format!("検出結果のJSONが不正です: {}", e)))
    }
}

/// 属性分類コマンド
pub struct CommandClassifier {
    command: String,
    weights_dir: PathBuf,
}

#[derive(Deserialize)]
struct ClassResponse {
    class: usize,
}

impl CommandClassifier {
    pub fn new(command: String, weights_dir: PathBuf) -> Self {
        Self {
            command,
            weights_dir,
        }
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, image: &RgbImage, kind: AttributeKind) -> Result<usize> {
        let temp = write_temp_jpeg(image)?;
        let weights = self.weights_dir.join(kind.weight_file());
        let class_count = kind.class_count().to_string();
        let response = run_model_command(
            &self.command,
            &[&path_arg(&weights), &path_arg(temp.path()), &class_count],
        )?;

        let parsed: ClassResponse = serde_json::from_str(&response)
            .map_err(|e| ExpoAiError::ModelParse(format!("分類結果のJSONが不正です: {}", e)))?;
        if parsed.class >= kind.class_count() {
            return Err(ExpoAiError::ModelParse(format!(
                "クラスインデックス {} が範囲外です（{}クラス）",
                parsed.class,
                kind.class_count()
            )));
        }
        Ok(parsed.class)
    }
}

fn write_temp_jpeg(image: &RgbImage) -> Result<tempfile::NamedTempFile> {
    let temp = tempfile::Builder::new()
        .prefix("expo-ai-")
        .suffix(".jpg")
        .tempfile()?;
    image
        .save_with_format(temp.path(), image::ImageFormat::Jpeg)
        .map_err(|e| ExpoAiError::ImageLoad(e.to_string()))?;
    Ok(temp)
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn run_model_command(command: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(command)
        .args(args)
        .output()
        .map_err(|e| ExpoAiError::ModelCall(format!("{}: {}", command, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExpoAiError::ModelCall(format!(
            "{} failed (code {:?}): {}",
            command,
            output.status.code(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detection_response() {
        let response = r#"[
            {"x1": 10.0, "y1": 20.0, "x2": 300.0, "y2": 400.0, "confidence": 0.92, "label": "building"},
            {"x1": 0.0, "y1": 0.0, "x2": 50.0, "y2": 50.0, "confidence": 0.31, "label": "car"}
        ]"#;
        let detections: Vec<Detection> = serde_json::from_str(response).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "building");
        assert!((detections[0].confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_parse_class_response() {
        let parsed: ClassResponse = serde_json::from_str(r#"{"class": 3}"#).unwrap();
        assert_eq!(parsed.class, 3);
    }

    #[test]
    fn test_missing_command_is_model_call_error() {
        let result = run_model_command("expo-ai-no-such-command-xyz", &[]);
        assert!(matches!(result, Err(ExpoAiError::ModelCall(_))));
    }
}
