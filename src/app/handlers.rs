//! キー入力ハンドラー関数。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::{
    events::Screen,
    input::{InputBoxState, InputCallbackId},
    models::StatementType,
    shortcuts::matches_shortcut,
    worker::WorkerCmd,
    workflow::{WorkflowError, step::WorkflowStep, upload::partition_candidates},
};

use super::App;

/// キー入力を1件処理し、終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが開いていれば最優先で処理する。
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }

    match app.ui.screen {
        Screen::Workflow => handle_workflow_key(app, k).await,
        Screen::Settings => handle_settings_key(app, k).await,
    }
}

/// Ctrl+Cかどうかを判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// 現在のステップで一覧に並ぶ行数。
fn row_count(app: &App) -> usize {
    match app.workflow.current_step() {
        WorkflowStep::Upload => app.workflow.uploads().files().len(),
        WorkflowStep::Preview | WorkflowStep::Configure => {
            app.workflow.assignments().assignments().len()
        }
        WorkflowStep::Processing | WorkflowStep::Complete => 0,
    }
}

/// ワークフロー画面のキー処理（全ステップ共通 → ステップ固有）。
async fn handle_workflow_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = app.shortcuts.main.clone();
    let before = app.workflow.current_step();

    if matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if matches_shortcut(&k, &sc.settings) {
        reload_settings_buffers(app);
        app.ui.screen = Screen::Settings;
        app.ui.status = "Settings".into();
    } else if matches_shortcut(&k, &sc.login) {
        if app.cfg.auth.username.is_empty() {
            app.ui.status = "Set a username in settings first".into();
        } else {
            app.input_box = Some(InputBoxState::new(
                format!("Password for {}:", app.cfg.auth.username),
                "",
                InputCallbackId::LoginPassword,
            ));
        }
    } else if matches_shortcut(&k, &sc.reset) {
        let effect = app.workflow.reset();
        app.dispatch(Ok(effect)).await?;
        app.ui.status = "Workflow reset".into();
    } else if matches_shortcut(&k, &sc.next) {
        let outcome = app.workflow.advance();
        app.dispatch(outcome).await?;
    } else if matches_shortcut(&k, &sc.back) {
        // 先頭ステップでは何もしない。
        if let Some(prev) = before.previous() {
            let outcome = app.workflow.go_to(prev);
            app.dispatch(outcome).await?;
        }
    } else if matches_shortcut(&k, &sc.down) {
        if app.ui.selected + 1 < row_count(app) {
            app.ui.selected += 1;
        }
    } else if matches_shortcut(&k, &sc.up) {
        app.ui.selected = app.ui.selected.saturating_sub(1);
    } else {
        match before {
            WorkflowStep::Upload => handle_upload_key(app, k).await?,
            WorkflowStep::Preview => handle_preview_key(app, k).await?,
            WorkflowStep::Configure => handle_configure_key(app, k),
            WorkflowStep::Processing => handle_processing_key(app, k).await?,
            WorkflowStep::Complete => handle_complete_key(app, k),
        }
    }

    // ステップが変わったら選択行を先頭へ戻す。
    if app.workflow.current_step() != before {
        app.ui.selected = 0;
        app.ui.status = format!("Step: {}", app.workflow.current_step().title());
    }
    app.ui.clamp_selection(row_count(app));
    Ok(false)
}

/// アップロードステップのキー処理。
async fn handle_upload_key(app: &mut App, k: KeyEvent) -> Result<()> {
    let sc = &app.shortcuts.upload;
    let row = app.ui.selected;

    let outcome: Result<(), WorkflowError> = if matches_shortcut(&k, &sc.add) {
        app.input_box = Some(InputBoxState::new(
            "Excel files (space separated paths):",
            "",
            InputCallbackId::UploadPaths,
        ));
        Ok(())
    } else if matches_shortcut(&k, &sc.select) {
        app.workflow.select_file(row)
    } else if matches_shortcut(&k, &sc.remove) {
        app.workflow.remove_file(row)
    } else if matches_shortcut(&k, &sc.clear_completed) {
        app.workflow.clear_completed()
    } else {
        Ok(())
    };
    app.dispatch(outcome.map(|()| None)).await
}

/// プレビューステップのキー処理。
async fn handle_preview_key(app: &mut App, k: KeyEvent) -> Result<()> {
    if matches_shortcut(&k, &app.shortcuts.preview.retry) {
        let outcome = app.workflow.retry_preview();
        app.dispatch(outcome).await?;
    }
    Ok(())
}

/// 種別割り当てステップのキー処理。Workerへの依頼は発生しない。
fn handle_configure_key(app: &mut App, k: KeyEvent) {
    let sc = &app.shortcuts.configure;
    let Some(current) = app
        .workflow
        .assignments()
        .assignments()
        .get(app.ui.selected)
        .cloned()
    else {
        return;
    };

    let outcome = if matches_shortcut(&k, &sc.cycle) {
        let next = StatementType::cycle(current.assigned_type);
        app.workflow.update_assignment(&current.sheet_name, next)
    } else if matches_shortcut(&k, &sc.clear) {
        app.workflow.update_assignment(&current.sheet_name, None)
    } else if matches_shortcut(&k, &sc.reset) {
        app.workflow.reset_assignments()
    } else {
        return;
    };

    // 重複があればステータスで知らせる。
    let report = app.workflow.validation();
    app.ui.status = match outcome {
        Err(e) => e.to_string(),
        Ok(()) if report.has_duplicates => format!(
            "Duplicate: {}",
            report
                .duplicate_types
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Ok(()) => format!("{} statement(s) assigned", report.assigned_count),
    };
}

/// 処理ステップのキー処理。
async fn handle_processing_key(app: &mut App, k: KeyEvent) -> Result<()> {
    let sc = &app.shortcuts.processing;
    if matches_shortcut(&k, &sc.cancel) {
        let effect = app.workflow.cancel_processing();
        if effect.is_some() {
            app.ui.status = "Processing cancelled".into();
        }
        app.dispatch(Ok(effect)).await?;
    } else if matches_shortcut(&k, &sc.retry) {
        let outcome = app.workflow.retry_processing().map(Some);
        app.dispatch(outcome).await?;
    }
    Ok(())
}

/// 完了ステップのキー処理。
fn handle_complete_key(app: &mut App, k: KeyEvent) {
    if !matches_shortcut(&k, &app.shortcuts.complete.open_dashboard) {
        return;
    }
    let Some(file_id) = app.workflow.selected_file().and_then(|f| f.id.clone()) else {
        return;
    };
    let url = app.cfg.dashboard.url_for(&file_id);
    // ブラウザ起動の失敗はステータスに出すだけにする。
    app.ui.status = match webbrowser::open(&url) {
        Ok(()) => format!("Opened {url}"),
        Err(e) => {
            tracing::warn!("browser open failed: {e}");
            format!("Could not open browser: {e}")
        }
    };
}

/// 設定画面のキー処理。
async fn handle_settings_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.settings;

    if matches_shortcut(&k, &sc.cancel) {
        // 変更を破棄してワークフロー画面へ戻る。
        reload_settings_buffers(app);
        app.ui.screen = Screen::Workflow;
    } else if matches_shortcut(&k, &sc.save) {
        app.cfg.backend.base_url = app.base_url.trim().to_string();
        app.cfg.auth.username = app.username.trim().to_string();
        app.cfg.save(&app.cfg_path)?;

        // Workerにも設定更新を通知する（クライアントを作り直す）。
        app.worker_tx
            .send(WorkerCmd::SaveSettings(app.cfg.clone()))
            .await?;
        app.ui.logged_in_as = None;
        app.ui.screen = Screen::Workflow;
        app.ui.status = "Saved settings".into();
    } else if matches_shortcut(&k, &sc.base_url) {
        app.input_box = Some(InputBoxState::new(
            "Backend base URL:",
            app.base_url.clone(),
            InputCallbackId::SettingsBaseUrl,
        ));
    } else if matches_shortcut(&k, &sc.username) {
        app.input_box = Some(InputBoxState::new(
            "Username:",
            app.username.clone(),
            InputCallbackId::SettingsUsername,
        ));
    }

    Ok(false)
}

/// 入力ボックスのキー処理。
async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let Some(input_state) = &mut app.input_box else {
        return Ok(false);
    };
    let sc = &app.shortcuts.input_box;

    if matches_shortcut(&k, &sc.confirm) {
        // 入力ボックスを閉じる前に値とコールバック種別を保存する。
        let value = input_state.value.clone();
        let callback_id = input_state.callback_id.clone();
        app.input_box = None;
        apply_input_callback(app, callback_id, value).await?;
    } else if matches_shortcut(&k, &sc.cancel) {
        app.input_box = None;
    } else if matches_shortcut(&k, &sc.backspace) {
        input_state.backspace();
    } else if matches_shortcut(&k, &sc.delete) {
        input_state.delete();
    } else if matches_shortcut(&k, &sc.left) {
        input_state.move_left();
    } else if matches_shortcut(&k, &sc.right) {
        input_state.move_right();
    } else if matches_shortcut(&k, &sc.home) {
        input_state.move_home();
    } else if matches_shortcut(&k, &sc.end) {
        input_state.move_end();
    } else if matches_shortcut(&k, &sc.clear_line) {
        input_state.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.contains(KeyModifiers::CONTROL)
    {
        input_state.insert_char(c);
    }

    Ok(false)
}

/// 入力ボックスのコールバックを適用する。
async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::UploadPaths => {
            let paths: Vec<&str> = value.split_whitespace().collect();
            let candidates =
                partition_candidates(&paths, app.cfg.processing.max_upload_bytes());
            for (path, reason) in &candidates.rejected {
                app.ui
                    .push_log(format!("skipped {}: {reason}", path.display()));
            }
            if candidates.accepted.is_empty() {
                app.ui.status = "No Excel files to upload".into();
                return Ok(());
            }
            let n = candidates.accepted.len();
            let outcome = app.workflow.start_upload(candidates.accepted).map(Some);
            if outcome.is_ok() {
                app.ui.status = format!("Uploading {n} file(s)...");
            }
            app.dispatch(outcome).await?;
        }
        InputCallbackId::SettingsBaseUrl => app.base_url = value,
        InputCallbackId::SettingsUsername => app.username = value,
        InputCallbackId::LoginPassword => {
            app.worker_tx
                .send(WorkerCmd::Login {
                    username: app.cfg.auth.username.clone(),
                    password: value,
                })
                .await?;
            app.ui.status = "Logging in...".into();
        }
    }
    Ok(())
}

/// 設定画面用の編集バッファを設定値から再読み込みする。
fn reload_settings_buffers(app: &mut App) {
    app.base_url = app.cfg.backend.base_url.clone();
    app.username = app.cfg.auth.username.clone();
}
