//! Text rules applied to assistant responses
//!
//! Device actions and exit phrases are spotted in the TTS text, and
//! upstream failures that leak into STT or TTS text are recognized so the
//! turn can be aborted instead of spoken.

use std::sync::LazyLock;

use regex::Regex;

/// Kind of device the assistant reported acting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Light,
    Switch,
    Button,
}

/// Device action mentioned in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAction {
    pub kind: DeviceKind,
    pub on: bool,
}

fn rule(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

static SWITCH_ON: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"打开.*开关|开关.*打开|开关.*开了|开关.*已打开|已.*打开.*开关",
        r"|(?i:turn(?:ing|ed|s)?\s+on\b.*\bswitch|switch.*\bturn.*\bon\b|switch.*\bis\s+.*\bon\b)",
    ))
});

static SWITCH_OFF: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"关闭.*开关|关掉.*开关|开关.*关闭|开关.*关了|开关.*已关闭|已.*关闭.*开关",
        r"|(?i:turn(?:ing|ed|s)?\s+off\b.*\bswitch|switch.*\bturn.*\boff\b|switch.*\bis\s+.*\boff\b)",
    ))
});

static LIGHT_ON: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"开灯|打开.*灯|开启.*灯|灯.*打开|灯.*开了|灯.*已开启",
        r"|(?i:turn(?:ing|ed|s)?\s+on\b.*\blights?\b|lights?\b.*\bturn.*\bon\b)",
    ))
});

static LIGHT_OFF: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"关灯|关闭.*灯|关掉.*灯|灯.*关闭|灯.*关了|灯.*已关掉",
        r"|(?i:turn(?:ing|ed|s)?\s+off\b.*\blights?\b|lights?\b.*\bturn.*\boff\b)",
    ))
});

static BUTTON: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"按下.*按钮|按钮.*按下|触发.*按钮|按钮.*触发",
        r"|(?i:press.*\bbutton|button.*\bpress|trigger.*\bbutton)",
    ))
});

static EXIT: LazyLock<Regex> = LazyLock::new(|| {
    rule(concat!(
        r"再见|拜拜|下次见|回头见|退下|退出|有什么.*随时.*问|随时.*找我|祝你.*愉快|祝.*顺利",
        r"|(?i:goodbye|bye\s*bye|see\s*you|take\s*care|that'?s\s+all|have\s*a\s*(?:good|nice|great))",
    ))
});

/// First device action mentioned in `text`
///
/// Rules are checked in order: switch on, switch off, light on, light off,
/// button.
#[must_use]
pub fn detect_device_action(text: &str) -> Option<DeviceAction> {
    if text.trim().is_empty() {
        return None;
    }

    let rules: [(&Regex, DeviceKind, bool); 5] = [
        (&SWITCH_ON, DeviceKind::Switch, true),
        (&SWITCH_OFF, DeviceKind::Switch, false),
        (&LIGHT_ON, DeviceKind::Light, true),
        (&LIGHT_OFF, DeviceKind::Light, false),
        (&BUTTON, DeviceKind::Button, true),
    ];

    rules
        .into_iter()
        .find(|(regex, _, _)| regex.is_match(text))
        .map(|(_, kind, on)| DeviceAction { kind, on })
}

/// Whether the assistant is ending the conversation
#[must_use]
pub fn is_exit_phrase(text: &str) -> bool {
    EXIT.is_match(text.trim())
}

/// Whether `text` is an upstream error masquerading as content
#[must_use]
pub fn is_pipeline_error_text(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    lower.contains("list index out of range")
        || lower.contains("索引超出范围")
        || lower.contains("索引错误")
        || (lower.contains("index") && lower.contains("range") && lower.contains("error"))
}
