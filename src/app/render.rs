//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    events::Screen,
    input, layout,
    models::{JobState, UploadStatus},
    shortcuts::Shortcuts,
    workflow::{
        PreviewState,
        step::{StepStatus, WorkflowStep},
    },
};

use super::App;

/// 選択行のハイライト。
fn highlight() -> Style {
    Style::default()
        .bg(Color::Rgb(255, 140, 0)) // オレンジ色の背景
        .fg(Color::Black)
        .add_modifier(Modifier::BOLD)
}

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    let main_layout = layout::create_main_layout(f.area());
    let body_layout = layout::create_body_layout(main_layout.body);

    draw_steps_bar(f, app, main_layout.steps_bar);

    match app.ui.screen {
        Screen::Workflow => draw_step_body(f, app, body_layout.step_body),
        Screen::Settings => draw_settings(f, app, body_layout.step_body),
    }

    let info_panel = Paragraph::new(build_info_text(app))
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info_panel, body_layout.info_panel);

    let help_bar = Paragraph::new(get_help_text(app))
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, main_layout.help_bar);

    f.render_widget(build_status_bar(app), main_layout.status_bar);

    // 入力ボックスが開いていれば重ねて描画する。
    if let Some(input_state) = &app.input_box {
        input::render_input_box(f, input_state);
    }
}

/// ステップインジケータ（導出ステータスで色分け）。
fn draw_steps_bar(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![];
    for (i, (step, status)) in app.workflow.step_statuses().into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw("  ›  "));
        }
        let (mark, style) = match status {
            StepStatus::Completed => ("✓", Style::default().fg(Color::Green)),
            StepStatus::Active => (
                "●",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            StepStatus::Error => (
                "✗",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
            StepStatus::Pending => ("○", Style::default().fg(Color::DarkGray)),
        };
        spans.push(Span::styled(
            format!("{mark} {}. {}", step.position() + 1, step.title()),
            style,
        ));
    }
    let bar = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("STEPS"));
    f.render_widget(bar, area);
}

/// 現在のステップ本体を描画する。
fn draw_step_body(f: &mut Frame, app: &App, area: Rect) {
    match app.workflow.current_step() {
        WorkflowStep::Upload => draw_uploads(f, app, area),
        WorkflowStep::Preview => draw_preview(f, app, area),
        WorkflowStep::Configure => draw_assignments(f, app, area),
        WorkflowStep::Processing => draw_processing(f, app, area),
        WorkflowStep::Complete => draw_complete(f, app, area),
    }
}

/// アップロード一覧（選択中のファイルに印を付ける）。
fn draw_uploads(f: &mut Frame, app: &App, area: Rect) {
    let selected_key = app.workflow.selected_file().map(|s| s.key);
    let files = app.workflow.uploads().files();
    let rows = files.iter().enumerate().map(|(i, u)| {
        let state = match u.status {
            UploadStatus::Uploading => format!("uploading {}%", u.progress_percent),
            UploadStatus::Completed => "completed".into(),
            UploadStatus::Error => format!(
                "error: {}",
                u.error_message.as_deref().unwrap_or("unknown")
            ),
        };
        let row = Row::new(vec![
            format!("{}", i + 1),
            if Some(u.key) == selected_key { "▶" } else { "" }.to_string(),
            u.original_filename.clone(),
            format_size(u.file_size_bytes),
            state,
        ]);
        match u.status {
            UploadStatus::Error => row.style(Style::default().fg(Color::Red)),
            _ => row,
        }
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(12),
            Constraint::Length(10),
            Constraint::Min(14),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("FILES"))
    .header(Row::new(vec!["#", "", "file", "size", "status"]).bold())
    .row_highlight_style(highlight());

    let mut table_state = TableState::default();
    if !files.is_empty() {
        table_state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, area, &mut table_state);
}

/// シート一覧と自動検出結果。
fn draw_preview(f: &mut Frame, app: &App, area: Rect) {
    let message = match app.workflow.preview() {
        PreviewState::Idle => Some(("No file selected".to_string(), Color::Gray)),
        PreviewState::Loading { file_id } => {
            Some((format!("Loading preview of {file_id}..."), Color::Yellow))
        }
        PreviewState::Failed { message, .. } => Some((
            format!("Preview failed: {message}\n\nPress r to retry."),
            Color::Red,
        )),
        PreviewState::Loaded { .. } => None,
    };
    if let Some((text, color)) = message {
        let p = Paragraph::new(text)
            .style(Style::default().fg(color))
            .block(Block::default().borders(Borders::ALL).title("PREVIEW"))
            .wrap(Wrap { trim: true });
        f.render_widget(p, area);
        return;
    }

    let assignments = app.workflow.assignments();
    let rows = assignments
        .sheets()
        .iter()
        .zip(assignments.assignments())
        .map(|(sheet, a)| {
            Row::new(vec![
                sheet.name.clone(),
                sheet.row_count.to_string(),
                sheet.column_count.to_string(),
                a.assigned_type.map(|t| t.label()).unwrap_or("-").to_string(),
                format_confidence(a.confidence),
            ])
        });
    let table = Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(15),
            Constraint::Length(6),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("PREVIEW"))
    .header(Row::new(vec!["sheet", "rows", "cols", "type", "conf"]).bold())
    .row_highlight_style(highlight());
    let mut table_state = TableState::default();
    table_state.select(Some(app.ui.selected));
    let split = layout::create_step_body_layout(area, 6);
    f.render_stateful_widget(table, split.list, &mut table_state);

    // 選択シートの列見出しを下段に出す。
    let columns = assignments
        .sheets()
        .get(app.ui.selected)
        .map(|s| s.columns.join(" | "))
        .unwrap_or_default();
    let detail = Paragraph::new(columns)
        .block(Block::default().borders(Borders::ALL).title("COLUMNS"))
        .wrap(Wrap { trim: true });
    f.render_widget(detail, split.detail);
}

/// 種別割り当て表と検証結果。
fn draw_assignments(f: &mut Frame, app: &App, area: Rect) {
    let report = app.workflow.validation();
    let rows = app.workflow.assignments().assignments().iter().map(|a| {
        let duplicate = a
            .assigned_type
            .is_some_and(|t| report.duplicate_types.contains(&t));
        let row = Row::new(vec![
            a.sheet_name.clone(),
            a.assigned_type
                .map(|t| t.label())
                .unwrap_or("(unassigned)")
                .to_string(),
            format_confidence(a.confidence),
            if a.is_manual { "manual" } else { "auto" }.to_string(),
        ]);
        if duplicate {
            row.style(Style::default().fg(Color::Red))
        } else {
            row
        }
    });
    let table = Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(15),
            Constraint::Length(6),
            Constraint::Length(7),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("ASSIGNMENTS"))
    .header(Row::new(vec!["sheet", "type", "conf", "source"]).bold())
    .row_highlight_style(highlight());
    let mut table_state = TableState::default();
    table_state.select(Some(app.ui.selected));
    let split = layout::create_step_body_layout(area, 4);
    f.render_stateful_widget(table, split.list, &mut table_state);

    let (text, color) = if report.has_duplicates {
        let names = report
            .duplicate_types
            .iter()
            .map(|t| t.label())
            .collect::<Vec<_>>()
            .join(", ");
        (format!("Assigned more than once: {names}"), Color::Red)
    } else if !report.has_assignments {
        ("Assign at least one statement type".to_string(), Color::Yellow)
    } else {
        (
            format!(
                "{} statement(s) assigned. Enter starts processing.",
                report.assigned_count
            ),
            Color::Green,
        )
    };
    let summary = Paragraph::new(text)
        .style(Style::default().fg(color))
        .block(Block::default().borders(Borders::ALL).title("VALIDATION"));
    f.render_widget(summary, split.detail);
}

/// 進捗ゲージと現在の処理内容。
fn draw_processing(f: &mut Frame, app: &App, area: Rect) {
    let job = app.workflow.job();
    let split = layout::create_step_body_layout(area, 3);

    let mut lines = vec![
        format!("State: {:?}", job.state),
        format!("Task: {}", job.task_id.as_deref().unwrap_or("-")),
        format!("Step: {}", job.current_step_label),
    ];
    if let Some(err) = &job.error_message {
        lines.push(String::new());
        lines.push(format!("Error: {err}"));
    }
    let style = match job.state {
        JobState::Error => Style::default().fg(Color::Red),
        _ => Style::default(),
    };
    let details = Paragraph::new(lines.join("\n"))
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("PROCESSING"))
        .wrap(Wrap { trim: true });
    f.render_widget(details, split.list);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("PROGRESS"))
        .gauge_style(Style::default().fg(Color::Rgb(255, 140, 0)))
        .percent(u16::from(job.progress_percent));
    f.render_widget(gauge, split.detail);
}

/// 完了サマリと結果JSON。
fn draw_complete(f: &mut Frame, app: &App, area: Rect) {
    let job = app.workflow.job();
    let file = app
        .workflow
        .selected_file()
        .map(|s| s.original_filename.clone())
        .unwrap_or_default();
    let result = job
        .result
        .as_ref()
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "(no result payload)".into());
    let text = format!("Processed: {file}\n\n{result}");
    let p = Paragraph::new(text)
        .style(Style::default().fg(Color::Green))
        .block(Block::default().borders(Borders::ALL).title("RESULT"))
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}

/// 設定画面（編集中のバッファを表示）。
fn draw_settings(f: &mut Frame, app: &App, area: Rect) {
    let text = format!(
        "Base URL: {}\nAPI prefix: {}\nUsername: {}\n\nToken cache: {}\nPoll interval: {} ms\nDashboard: {}",
        app.base_url,
        app.cfg.backend.api_prefix,
        if app.username.is_empty() { "-" } else { app.username.as_str() },
        app.cfg.auth.token_path,
        app.cfg.processing.poll_interval_ms,
        app.cfg.dashboard.url,
    );
    let p = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("SETTINGS"))
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

/// 案内・接続先・ログを並べた右パネル。
fn build_info_text(app: &App) -> String {
    let selected = app
        .workflow
        .selected_file()
        .map(|s| s.original_filename.clone())
        .unwrap_or_else(|| "-".into());
    format!(
        "{}\n\nFile: {}\nBackend: {}\nUser: {}\n\nLog:\n{}",
        app.workflow.current_step().prompt(),
        selected,
        app.cfg.backend.api_root(),
        app.ui.logged_in_as.as_deref().unwrap_or("(not logged in)"),
        app.ui
            .log
            .iter()
            .rev()
            .take(8)
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    let screen_name = match app.ui.screen {
        Screen::Workflow => app.workflow.current_step().title(),
        Screen::Settings => "Settings",
    };
    let uploads = app.workflow.uploads();
    let done = uploads
        .files()
        .iter()
        .filter(|u| u.status == UploadStatus::Completed)
        .count();
    let text = format!(
        "[{}] Files: {} total, {} uploaded | {}",
        screen_name,
        uploads.files().len(),
        done,
        app.ui.status
    );

    let mut status_bar = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    // エラー表示中のステップは赤色で強調する。
    if app.ui.screen == Screen::Workflow && app.workflow.failed_step().is_some() {
        status_bar = status_bar.style(Style::default().fg(Color::Red));
    }
    status_bar
}

/// 現在の画面・ステップに応じたヘルプ文字列を返す。
fn get_help_text(app: &App) -> String {
    let sc: &Shortcuts = &app.shortcuts;
    if app.ui.screen == Screen::Settings {
        return format!(
            "{}: base URL | {}: username | {}: save | {}: cancel",
            format_keys(&sc.settings.base_url),
            format_keys(&sc.settings.username),
            format_keys(&sc.settings.save),
            format_keys(&sc.settings.cancel)
        );
    }
    let step_keys = match app.workflow.current_step() {
        WorkflowStep::Upload => format!(
            "{}: add | {}: select | {}: remove | {}: clear done",
            format_keys(&sc.upload.add),
            format_keys(&sc.upload.select),
            format_keys(&sc.upload.remove),
            format_keys(&sc.upload.clear_completed)
        ),
        WorkflowStep::Preview => format!("{}: retry", format_keys(&sc.preview.retry)),
        WorkflowStep::Configure => format!(
            "{}: change type | {}: unassign | {}: reset to detected",
            format_keys(&sc.configure.cycle),
            format_keys(&sc.configure.clear),
            format_keys(&sc.configure.reset)
        ),
        WorkflowStep::Processing => format!(
            "{}: cancel | {}: retry",
            format_keys(&sc.processing.cancel),
            format_keys(&sc.processing.retry)
        ),
        WorkflowStep::Complete => format!(
            "{}: open dashboard",
            format_keys(&sc.complete.open_dashboard)
        ),
    };
    format!(
        "{step_keys} | {}: next | {}: back | {}: reset | {}: login | {}: settings | {}: quit",
        format_keys(&sc.main.next),
        format_keys(&sc.main.back),
        format_keys(&sc.main.reset),
        format_keys(&sc.main.login),
        format_keys(&sc.main.settings),
        format_keys(&sc.main.quit)
    )
}

/// ショートカットキーの配列を表示用文字列に変換する。
fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}

fn format_confidence(c: f64) -> String {
    if c > 0.0 {
        format!("{:.0}%", c * 100.0)
    } else {
        "-".into()
    }
}

/// バイト数を読みやすい単位に変換する。
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0 MB");
        assert_eq!(format_size(1536), "1.5 KB");
    }

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(0.95), "95%");
        assert_eq!(format_confidence(0.0), "-");
    }
}
