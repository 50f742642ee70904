//! レイアウト計算のヘルパー関数

use ratatui::prelude::*;

/// メインレイアウトの領域
pub struct MainLayout {
    /// ステップインジケータの領域
    pub steps_bar: Rect,
    /// ステップ本体 + INFO Panelの領域
    pub body: Rect,
    /// HELPバーの領域
    pub help_bar: Rect,
    /// STATUSバーの領域
    pub status_bar: Rect,
}

/// ボディ部の2つの領域
pub struct BodyLayout {
    /// ステップ本体（一覧・表・進捗）の領域
    pub step_body: Rect,
    /// INFO Panelの領域
    pub info_panel: Rect,
}

/// ステップ本体を一覧と下部パネル（進捗・詳細）に分ける。
pub struct StepBodyLayout {
    pub list: Rect,
    pub detail: Rect,
}

/// 画面を4つの領域に分割（STEPS + Body + HELP + STATUS）
pub fn create_main_layout(area: Rect) -> MainLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // STEPSバー
            Constraint::Min(1),    // Body
            Constraint::Length(3), // HELPバー
            Constraint::Length(3), // STATUSバー
        ])
        .split(area);

    MainLayout {
        steps_bar: chunks[0],
        body: chunks[1],
        help_bar: chunks[2],
        status_bar: chunks[3],
    }
}

/// Body領域を2つに分割（ステップ本体 65% + INFO Panel 35%）
pub fn create_body_layout(area: Rect) -> BodyLayout {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    BodyLayout {
        step_body: chunks[0],
        info_panel: chunks[1],
    }
}

/// ステップ本体を上下に分割（下段は固定高さ）。
pub fn create_step_body_layout(area: Rect, detail_height: u16) -> StepBodyLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(detail_height)])
        .split(area);

    StepBodyLayout {
        list: chunks[0],
        detail: chunks[1],
    }
}
