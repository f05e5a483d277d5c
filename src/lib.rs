//! 地震後の建物エクスポージャ調査を半自動化するツールのコアライブラリ。
//!
//! 調査エリアから建物サンプルを導出し、1棟ずつ3方位のストリート
//! レベル画像を取得・検出・分類しながら、オペレータの確認を経て
//! 点検台帳（CSV）として書き出す。

pub mod acquire;
pub mod classify;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod geo;
pub mod interactive;
pub mod ledger;
pub mod models;
pub mod orientation;
pub mod session;
