//! TUIのイベントループ、入力処理、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{path::PathBuf, time::Duration};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    events::UiState,
    input::InputBoxState,
    models::{JobState, UploadStatus},
    shortcuts::Shortcuts,
    ui::Tui,
    worker::{self, WorkerCmd, WorkerEvent},
    workflow::{Effect, ExcelProcessingWorkflow, WorkflowError},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// 永続化された設定ファイルのパス。
    pub cfg_path: PathBuf,
    /// メモリ上の現在設定。
    pub cfg: Config,
    /// 選択位置やステータスなどUI固有の状態。
    pub ui: UiState,
    /// アップロードから完了までのワークフロー状態。
    pub workflow: ExcelProcessingWorkflow,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::Receiver<WorkerEvent>,

    /// 設定画面で編集する接続先URL。
    pub base_url: String,
    /// 設定画面で編集するユーザー名。
    pub username: String,

    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,

    /// ショートカットキー設定。
    pub shortcuts: Shortcuts,
}

impl App {
    pub fn new(
        cfg_path: PathBuf,
        cfg: Config,
        shortcuts: Shortcuts,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Self {
        let workflow = ExcelProcessingWorkflow::new(
            cfg.processing.poll_interval(),
            cfg.processing.options.clone(),
        );
        Self {
            cfg_path,
            base_url: cfg.backend.base_url.clone(),
            username: cfg.auth.username.clone(),
            cfg,
            ui: UiState::new(),
            workflow,
            worker_tx,
            worker_rx,
            input_box: None,
            shortcuts,
        }
    }

    /// ワークフロー操作の結果を反映し、必要ならWorkerへ依頼する。
    pub async fn dispatch(
        &mut self,
        outcome: Result<Option<Effect>, WorkflowError>,
    ) -> Result<()> {
        match outcome {
            Ok(Some(effect)) => {
                tracing::info!("dispatch {}", effect_name(&effect));
                self.worker_tx.send(WorkerCmd::from(effect)).await?;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::info!("refused: {e}");
                self.ui.status = e.to_string();
            }
        }
        Ok(())
    }
}

fn effect_name(effect: &Effect) -> &'static str {
    match effect {
        Effect::Upload(_) => "upload",
        Effect::FetchPreview { .. } => "preview",
        Effect::StartProcessing(_) => "start processing",
        Effect::CancelProcessing { .. } => "cancel processing",
    }
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    // 設定ファイルを読み込む（初回はデフォルトを生成）。
    let cfg_path = PathBuf::from("config.toml");
    let cfg = Config::load_or_default(&cfg_path)?;

    // ショートカット設定を読み込む（無ければデフォルト）。
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    // Worker通信用のコマンド/イベントチャネルを作る。
    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);

    // 初期設定スナップショットでWorkerを起動する。
    tokio::spawn(worker::run(
        rx_cmd,
        tx_ev,
        cfg.clone(),
        Box::new(worker::connect_http),
    ));

    let mut app = App::new(cfg_path, cfg, shortcuts, tx_cmd, rx_ev);
    if app.cfg.auth.username.is_empty() {
        app.ui.status = "Set a username in settings (t), then log in (g)".into();
    }

    loop {
        // 現在の状態を描画する。
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev);
        }

        // UIの応答性確保のため短いタイムアウトで入力をポーリングする。
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            // どの画面でもCtrl+Cで終了できるようにする。
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }

    // 実行中の処理があればバックエンドにも取消を伝える。
    if let Some(effect) = app.workflow.cancel_processing() {
        let _ = app.worker_tx.send(WorkerCmd::from(effect)).await;
    }
    Ok(())
}

/// WorkerイベントをUI状態へ反映する。
fn handle_worker_event(app: &mut App, ev: WorkerEvent) {
    match ev {
        WorkerEvent::Upload(ev) => {
            let Some(settled) = app.workflow.apply_upload(ev) else {
                return;
            };
            // バッチ単位で結果をまとめて通知する。
            let ok = settled
                .results
                .iter()
                .filter(|f| f.status == UploadStatus::Completed)
                .count();
            for f in settled.results.iter().filter(|f| f.status == UploadStatus::Error) {
                app.ui.push_log(format!(
                    "upload failed: {}: {}",
                    f.original_filename,
                    f.error_message.as_deref().unwrap_or("-")
                ));
            }
            app.ui.status = format!(
                "Batch {}: uploaded {ok}/{} files",
                settled.batch_id,
                settled.results.len()
            );
        }
        WorkerEvent::Poll(ev) => match app.workflow.apply_poll(ev) {
            Some(JobState::Completed) => {
                app.ui.status = "Processing complete".into();
                app.ui.push_log("processing complete");
            }
            Some(JobState::Error) => {
                let msg = app.workflow.job().error_message.clone().unwrap_or_default();
                app.ui.status = format!("Processing failed: {msg}");
            }
            _ => {}
        },
        WorkerEvent::PreviewLoaded { file_id, preview } => {
            if app.workflow.apply_preview_loaded(&file_id, preview) {
                app.ui.selected = 0;
                app.ui.status = "Preview loaded".into();
            }
        }
        WorkerEvent::PreviewFailed { file_id, message } => {
            if app.workflow.apply_preview_failed(&file_id, message.clone()) {
                app.ui.status = format!("Preview failed: {message}");
            }
        }
        WorkerEvent::LoggedIn(user) => {
            app.ui.status = format!("Logged in as {user}");
            app.ui.logged_in_as = Some(user);
        }
        WorkerEvent::Log(s) => app.ui.push_log(s),
        WorkerEvent::Error(s) => {
            app.ui.push_log(format!("error: {s}"));
            app.ui.status = format!("Error: {s}");
        }
    }
}
