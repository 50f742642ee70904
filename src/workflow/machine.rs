//! ステップ遷移のステートマシン。

use super::step::{StepStatus, WorkflowStep, derive_status};

/// 各ステップを抜けるための前提条件（呼び出し側が現在の状態から組み立てる）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitGuards {
    /// 完了済みのアップロードが処理対象として選択されている。
    pub has_selected_file: bool,
    /// 選択中ファイルのプレビューが読み込み済み。
    pub preview_loaded: bool,
    /// 割り当てが1件以上あり、重複がない。
    pub assignments_confirmable: bool,
    /// 処理ジョブが完了している。
    pub job_completed: bool,
}

impl ExitGuards {
    /// 指定ステップを抜けてよいか判定する。
    pub fn allows_exit(&self, step: WorkflowStep) -> bool {
        match step {
            WorkflowStep::Upload => self.has_selected_file,
            WorkflowStep::Preview => self.preview_loaded,
            WorkflowStep::Configure => self.assignments_confirmable,
            WorkflowStep::Processing => self.job_completed,
            // 最後のステップから先は無い。
            WorkflowStep::Complete => false,
        }
    }
}

/// 現在のステップを保持し、正当な遷移だけを受け付ける。
#[derive(Clone, Debug)]
pub struct WorkflowStateMachine {
    /// 現在のステップ
    current: WorkflowStep,
}

impl WorkflowStateMachine {
    /// Uploadステップから開始する。
    pub fn new() -> Self {
        Self {
            current: WorkflowStep::Upload,
        }
    }

    /// 現在のステップを取得する。
    pub fn current(&self) -> WorkflowStep {
        self.current
    }

    /// 直後のステップへ進む。条件を満たさなければ何もせずfalseを返す。
    pub fn advance(&mut self, target: WorkflowStep, guards: &ExitGuards) -> bool {
        // 直後のステップ以外は受け付けない。
        if self.current.next() != Some(target) {
            return false;
        }
        // 現在のステップの出口条件を確認する。
        if !guards.allows_exit(self.current) {
            return false;
        }
        tracing::info!("workflow step {:?} -> {:?}", self.current, target);
        self.current = target;
        true
    }

    /// 現在位置以前のステップへ移動する（先へは飛べない）。
    pub fn go_to(&mut self, target: WorkflowStep) -> bool {
        if target.position() > self.current.position() {
            return false;
        }
        if target != self.current {
            tracing::info!("workflow step {:?} <- {:?}", target, self.current);
        }
        self.current = target;
        true
    }

    /// Uploadステップへ戻す。
    pub fn reset(&mut self) {
        self.current = WorkflowStep::Upload;
    }

    /// 全ステップの表示状態を導出する。
    pub fn statuses(&self, failed: Option<WorkflowStep>) -> Vec<(WorkflowStep, StepStatus)> {
        WorkflowStep::ALL
            .iter()
            .map(|s| (*s, derive_status(*s, self.current, failed)))
            .collect()
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
