//! 画面遷移用のUI状態と画面種別。

/// TUIで現在表示中の画面。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    /// ステップインジケータと各ステップ本体。
    Workflow,
    /// 接続先・ユーザー名の編集画面。
    Settings,
}

/// 描画側と共有するUI状態。
#[derive(Clone, Debug)]
pub struct UiState {
    /// 現在の画面。
    pub screen: Screen,
    /// アップロード一覧・シート一覧の選択行。
    pub selected: usize,
    /// 右側パネルに表示するログ。
    pub log: Vec<String>,
    /// 画面下部のステータス文言。
    pub status: String,
    /// ログイン中のユーザー名（未ログインはNone）。
    pub logged_in_as: Option<String>,
}

impl UiState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Workflow,
            selected: 0,
            log: vec![],
            status: "Ready".into(),
            logged_in_as: None,
        }
    }

    /// ログを追加する。古いものから捨てて上限を保つ。
    pub fn push_log(&mut self, line: impl Into<String>) {
        const MAX_LOG: usize = 200;
        self.log.push(line.into());
        if self.log.len() > MAX_LOG {
            let excess = self.log.len() - MAX_LOG;
            self.log.drain(..excess);
        }
    }

    /// 選択行を件数内に収める。
    pub fn clamp_selection(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}
