//! ワークフローのステップ定義と表示用ステータスの導出。

/// 処理ワークフローの各ステップ（順序固定）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowStep {
    /// Excelファイルのアップロード
    Upload,
    /// シート内容のプレビュー
    Preview,
    /// 財務諸表タイプの割り当て
    Configure,
    /// バックエンドでの処理待ち
    Processing,
    /// 完了
    Complete,
}

/// 各ステップの表示状態（保存せず毎回導出する）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Error,
}

impl WorkflowStep {
    /// 全ステップを順番どおりに並べたもの。
    pub const ALL: [WorkflowStep; 5] = [
        WorkflowStep::Upload,
        WorkflowStep::Preview,
        WorkflowStep::Configure,
        WorkflowStep::Processing,
        WorkflowStep::Complete,
    ];

    /// 0始まりの位置を取得する。
    pub fn position(self) -> usize {
        // ステップを位置へ対応付ける。
        match self {
            WorkflowStep::Upload => 0,
            WorkflowStep::Preview => 1,
            WorkflowStep::Configure => 2,
            WorkflowStep::Processing => 3,
            WorkflowStep::Complete => 4,
        }
    }

    /// 直後のステップ（最後ならNone）。
    pub fn next(self) -> Option<WorkflowStep> {
        Self::ALL.get(self.position() + 1).copied()
    }

    /// 直前のステップ（先頭ならNone）。
    pub fn previous(self) -> Option<WorkflowStep> {
        self.position()
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// ステップインジケータに表示する短い名前。
    pub fn title(self) -> &'static str {
        match self {
            WorkflowStep::Upload => "Upload",
            WorkflowStep::Preview => "Preview",
            WorkflowStep::Configure => "Configure",
            WorkflowStep::Processing => "Processing",
            WorkflowStep::Complete => "Complete",
        }
    }

    /// 現在のステップの案内メッセージ。
    pub fn prompt(self) -> &'static str {
        // ステップごとの説明文を返す。
        match self {
            WorkflowStep::Upload => {
                "Excelの財務諸表ファイルをアップロードしてください。\n'a'でファイルパスを入力します（複数はスペース区切り）。"
            }
            WorkflowStep::Preview => {
                "シート構成と自動検出結果を確認してください。\nEnterで割り当て画面へ進みます。"
            }
            WorkflowStep::Configure => {
                "各シートの財務諸表タイプを確認・修正してください。\n同じタイプ（P/L, B/S, C/F）は1ファイルに1シートまでです。"
            }
            WorkflowStep::Processing => {
                "バックエンドで処理中です。\n'c'でキャンセル、失敗時は'r'で再実行できます。"
            }
            WorkflowStep::Complete => {
                "処理が完了しました。\n'o'でダッシュボードを開き、Ctrl+Rで最初からやり直せます。"
            }
        }
    }
}

/// ステップの表示状態を現在位置とエラー位置から導出する。
pub fn derive_status(
    step: WorkflowStep,
    current: WorkflowStep,
    failed: Option<WorkflowStep>,
) -> StepStatus {
    // エラーが記録されたステップはエラー表示を優先する。
    if failed == Some(step) {
        return StepStatus::Error;
    }
    // 現在位置との前後関係で状態を決める。
    match step.position().cmp(&current.position()) {
        std::cmp::Ordering::Less => StepStatus::Completed,
        std::cmp::Ordering::Equal => StepStatus::Active,
        std::cmp::Ordering::Greater => StepStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_single_active() {
        // アクティブは常に1つだけであることを検証する。
        for current in WorkflowStep::ALL {
            let active = WorkflowStep::ALL
                .iter()
                .filter(|s| derive_status(**s, current, None) == StepStatus::Active)
                .count();
            assert_eq!(active, 1);
        }
    }

    #[test]
    fn test_derive_status_order() {
        // 前は完了、後ろは未着手になることを検証する。
        let current = WorkflowStep::Configure;
        assert_eq!(
            derive_status(WorkflowStep::Upload, current, None),
            StepStatus::Completed
        );
        assert_eq!(
            derive_status(WorkflowStep::Configure, current, None),
            StepStatus::Active
        );
        assert_eq!(
            derive_status(WorkflowStep::Complete, current, None),
            StepStatus::Pending
        );
    }

    #[test]
    fn test_derive_status_error_wins() {
        // エラー位置はエラー表示になることを検証する。
        let s = derive_status(
            WorkflowStep::Processing,
            WorkflowStep::Processing,
            Some(WorkflowStep::Processing),
        );
        assert_eq!(s, StepStatus::Error);
    }

    #[test]
    fn test_next_and_previous() {
        // 端での前後ステップを検証する。
        assert_eq!(WorkflowStep::Upload.previous(), None);
        assert_eq!(WorkflowStep::Complete.next(), None);
        assert_eq!(WorkflowStep::Preview.next(), Some(WorkflowStep::Configure));
    }
}
