//! ショートカット設定の管理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ショートカット設定の全体（shortcut.toml）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortcuts {
    pub main: MainShortcuts,
    pub upload: UploadShortcuts,
    pub preview: PreviewShortcuts,
    pub configure: ConfigureShortcuts,
    pub processing: ProcessingShortcuts,
    pub complete: CompleteShortcuts,
    pub settings: SettingsShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// どのステップでも有効なショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainShortcuts {
    pub quit: Vec<String>,
    pub settings: Vec<String>,
    pub login: Vec<String>,
    /// ワークフローを最初からやり直す。
    pub reset: Vec<String>,
    /// 次のステップへ進む。
    pub next: Vec<String>,
    /// 前のステップへ戻る。
    pub back: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
}

/// アップロードステップのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadShortcuts {
    /// ファイルパスを入力して追加する。
    pub add: Vec<String>,
    /// 選択行を処理対象にする。
    pub select: Vec<String>,
    pub remove: Vec<String>,
    pub clear_completed: Vec<String>,
}

/// プレビューステップのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewShortcuts {
    pub retry: Vec<String>,
}

/// 種別割り当てステップのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureShortcuts {
    /// 選択シートの種別を順送りする。
    pub cycle: Vec<String>,
    /// 選択シートを未割り当てにする。
    pub clear: Vec<String>,
    /// 自動検出結果へ戻す。
    pub reset: Vec<String>,
}

/// 処理ステップのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingShortcuts {
    pub cancel: Vec<String>,
    pub retry: Vec<String>,
}

/// 完了ステップのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteShortcuts {
    /// ダッシュボードをブラウザで開く。
    pub open_dashboard: Vec<String>,
}

/// 設定画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsShortcuts {
    pub cancel: Vec<String>,
    pub save: Vec<String>,
    pub base_url: Vec<String>,
    pub username: Vec<String>,
}

/// InputBoxのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    /// TOMLから読み込み、無ければデフォルトを書き出して返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            // 既存ファイルを読み込んでパースする。
            let content = std::fs::read_to_string(path)?;
            let shortcuts: Shortcuts = toml::from_str(&content)?;
            Ok(shortcuts)
        } else {
            // 未作成の場合は既定値を保存して編集できるようにする。
            let shortcuts = Self::default();
            shortcuts.save(path)?;
            Ok(shortcuts)
        }
    }

    /// TOMLとして保存する。
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            main: MainShortcuts {
                quit: keys(&["q"]),
                settings: keys(&["t"]),
                login: keys(&["g"]),
                reset: keys(&["Ctrl+r"]),
                next: keys(&["Enter"]),
                back: keys(&["Backspace", "b"]),
                down: keys(&["Down", "j"]),
                up: keys(&["Up", "k"]),
            },
            upload: UploadShortcuts {
                add: keys(&["a"]),
                select: keys(&["s"]),
                remove: keys(&["x"]),
                clear_completed: keys(&["c"]),
            },
            preview: PreviewShortcuts {
                retry: keys(&["r"]),
            },
            configure: ConfigureShortcuts {
                cycle: keys(&["Tab", "Space"]),
                clear: keys(&["Delete", "0"]),
                reset: keys(&["d"]),
            },
            processing: ProcessingShortcuts {
                cancel: keys(&["c"]),
                retry: keys(&["r"]),
            },
            complete: CompleteShortcuts {
                open_dashboard: keys(&["o"]),
            },
            settings: SettingsShortcuts {
                cancel: keys(&["Esc"]),
                save: keys(&["Enter"]),
                base_url: keys(&["u"]),
                username: keys(&["n"]),
            },
            input_box: InputBoxShortcuts {
                confirm: keys(&["Enter"]),
                cancel: keys(&["Esc"]),
                backspace: keys(&["Backspace"]),
                delete: keys(&["Delete"]),
                left: keys(&["Left"]),
                right: keys(&["Right"]),
                home: keys(&["Home"]),
                end: keys(&["End"]),
                clear_line: keys(&["Ctrl+u"]),
            },
        }
    }
}

/// KeyEventがいずれかのショートカット文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts.iter().any(|s| matches_single_shortcut(key, s))
}

/// KeyEventが単一のショートカット文字列と一致するか判定する。
fn matches_single_shortcut(key: &KeyEvent, shortcut: &str) -> bool {
    // ショートカット文字列を分解する（例: "Ctrl+u", "a", "Enter"）。
    let parts: Vec<&str> = shortcut.split('+').collect();

    let (modifiers_str, key_str) = if parts.len() > 1 {
        // 修飾キー付きの形式（例: "Ctrl+u"）。
        (&parts[0..parts.len() - 1], parts[parts.len() - 1])
    } else {
        // 修飾キーなしの形式（例: "a", "Enter"）。
        (&[][..], parts[0])
    };

    // 修飾キーを解析して期待値を作る。
    let mut expected_modifiers = KeyModifiers::empty();
    for modifier in modifiers_str {
        match *modifier {
            "Ctrl" | "ctrl" => expected_modifiers |= KeyModifiers::CONTROL,
            "Alt" | "alt" => expected_modifiers |= KeyModifiers::ALT,
            "Shift" | "shift" => expected_modifiers |= KeyModifiers::SHIFT,
            _ => return false,
        }
    }

    // 修飾キーが一致しなければ即座に不一致とする。
    if key.modifiers != expected_modifiers {
        return false;
    }

    // キーコードの種別ごとに一致判定を行う。
    match key_str {
        "Enter" | "enter" => key.code == KeyCode::Enter,
        "Esc" | "esc" => key.code == KeyCode::Esc,
        "Tab" | "tab" => key.code == KeyCode::Tab,
        "Backspace" | "backspace" => key.code == KeyCode::Backspace,
        "Delete" | "delete" => key.code == KeyCode::Delete,
        "Up" | "up" => key.code == KeyCode::Up,
        "Down" | "down" => key.code == KeyCode::Down,
        "Left" | "left" => key.code == KeyCode::Left,
        "Right" | "right" => key.code == KeyCode::Right,
        "Home" | "home" => key.code == KeyCode::Home,
        "End" | "end" => key.code == KeyCode::End,
        "Space" | "space" => key.code == KeyCode::Char(' '),
        // 単一文字は Char として比較する。
        s if s.len() == 1 => {
            if let Some(c) = s.chars().next() {
                key.code == KeyCode::Char(c)
            } else {
                false
            }
        }
        _ => false,
    }
}
