//! Chat-text parsing and formatting.
//!
//! Buyer commands arrive as plain chat messages with a `!` prefix (Cyrillic
//! with Latin aliases). Order ids and lot numbers are scraped out of system
//! message texts. All user-facing labels are Russian; all internal time math
//! goes through the marketplace-timezone helpers at the bottom so UTC↔UTC+3
//! conversion lives in exactly one place.

use chrono::{Duration, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// A buyer chat command, canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Stock,
    Account,
    Code,
    Extend,
    Pause,
    Resume,
    AdminCall,
    LpReplace,
    Cancel,
    Bonus,
}

impl Command {
    /// The canonical (Cyrillic) spelling used in replies and choice prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Stock => "!сток",
            Command::Account => "!акк",
            Command::Code => "!код",
            Command::Extend => "!продлить",
            Command::Pause => "!пауза",
            Command::Resume => "!продолжить",
            Command::AdminCall => "!админ",
            Command::LpReplace => "!лпзамена",
            Command::Cancel => "!отмена",
            Command::Bonus => "!бонус",
        }
    }
}

/// Cyrillic commands plus their Latin aliases. `!lpexchange` is the legacy
/// alias for the low-priority replacement flow.
const COMMAND_ALIASES: &[(&str, Command)] = &[
    ("!сток", Command::Stock),
    ("!stock", Command::Stock),
    ("!акк", Command::Account),
    ("!acc", Command::Account),
    ("!код", Command::Code),
    ("!code", Command::Code),
    ("!продлить", Command::Extend),
    ("!extend", Command::Extend),
    ("!пауза", Command::Pause),
    ("!продолжить", Command::Resume),
    ("!админ", Command::AdminCall),
    ("!admin", Command::AdminCall),
    ("!лпзамена", Command::LpReplace),
    ("!replace", Command::LpReplace),
    ("!lpexchange", Command::LpReplace),
    ("!отмена", Command::Cancel),
    ("!cancel", Command::Cancel),
    ("!бонус", Command::Bonus),
];

/// Parse a chat message into a command and its argument tail.
///
/// Returns `None` for anything that does not start with a known command
/// token. Matching is case-insensitive; the args keep their original case.
pub fn parse_command(text: &str) -> Option<(Command, String)> {
    let cleaned = text.trim();
    if !cleaned.starts_with('!') {
        return None;
    }
    let mut parts = cleaned.splitn(2, char::is_whitespace);
    let token = parts.next()?.to_lowercase();
    let command = COMMAND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map(|(_, cmd)| *cmd)?;
    let args = parts.next().unwrap_or("").trim().to_string();
    Some((command, args))
}

/// Whether the text contains an admin-call command anywhere (used by the
/// chat bridge to flag the chat even when the command arrives mid-message).
pub fn contains_admin_call(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("!админ") || lowered.contains("!admin")
}

fn lot_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:№|#)\s*(\d+)").expect("lot number regex"))
}

fn order_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#[A-Za-z0-9]{8,}").expect("order id regex"))
}

/// Extract a lot number ("№77" or "#77") from a lot description.
pub fn parse_lot_number(text: &str) -> Option<i64> {
    lot_number_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract a marketplace order id ("#A1B2C3D4") from a system message,
/// without the leading `#`.
pub fn extract_order_id(text: &str) -> Option<String> {
    order_id_re()
        .find(text)
        .map(|m| m.as_str().trim_start_matches('#').to_string())
}

/// First whitespace-separated token of the args, when it is a bare number.
pub fn parse_account_id_arg(args: &str) -> Option<i64> {
    let token = args.split_whitespace().next()?;
    if token.chars().all(|c| c.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

/// Lowercased, trimmed owner key used for all owner comparisons and storage.
pub fn normalize_owner(owner: &str) -> String {
    owner.trim().to_lowercase()
}

/// "2 часа 30 минут" style label.
pub fn format_duration_minutes(minutes: i64) -> String {
    let total = minutes.max(0);
    let hours = total / 60;
    let rem = total % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{} {}", hours, hours_label(hours)));
    }
    if rem > 0 || parts.is_empty() {
        parts.push(format!("{} минут", rem));
    }
    parts.join(" ")
}

/// Russian plural form for hours.
pub fn hours_label(value: i64) -> &'static str {
    if (11..=14).contains(&(value % 100)) {
        return "часов";
    }
    match value % 10 {
        1 => "час",
        2..=4 => "часа",
        _ => "часов",
    }
}

/// Whole-hour penalties render as hours, everything else as minutes.
pub fn format_penalty_label(total_minutes: i64) -> String {
    if total_minutes > 0 && total_minutes % 60 == 0 {
        let hours = total_minutes / 60;
        format!("{} {}", hours, hours_label(hours))
    } else {
        format_duration_minutes(total_minutes)
    }
}

/// "1 ч 5 мин 20 сек" countdown label.
pub fn format_time_left(seconds_left: i64) -> String {
    let total = seconds_left.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{} ч {} мин {} сек", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{} мин {} сек", minutes, seconds)
    } else {
        format!("{} сек", seconds)
    }
}

// ── Marketplace time ───────────────────────────────────────────────

/// The marketplace renders every timestamp at a fixed +3 h offset, and
/// `rental_start` is persisted in that timezone so the dashboard shows the
/// same wall-clock values as the site.
const MARKET_UTC_OFFSET_HOURS: i64 = 3;

/// Current time in marketplace wall-clock (UTC+3), naive.
pub fn market_now() -> NaiveDateTime {
    Utc::now().naive_utc() + Duration::hours(MARKET_UTC_OFFSET_HOURS)
}

/// Rebase a paused rental's start so the remaining time is preserved:
/// `start' = start + (now − frozen_at)`.
pub fn resume_start(
    rental_start: Option<NaiveDateTime>,
    frozen_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let start = rental_start?;
    let frozen = frozen_at?;
    let paused = now.signed_duration_since(frozen);
    let paused = if paused < Duration::zero() {
        Duration::zero()
    } else {
        paused
    };
    Some(start + paused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parses_cyrillic_and_latin_aliases() {
        assert_eq!(parse_command("!код"), Some((Command::Code, String::new())));
        assert_eq!(parse_command("!code"), Some((Command::Code, String::new())));
        assert_eq!(
            parse_command("!акк 42"),
            Some((Command::Account, "42".into()))
        );
        assert_eq!(
            parse_command("!ПРОДЛИТЬ 2 42"),
            Some((Command::Extend, "2 42".into()))
        );
        assert_eq!(
            parse_command("!lpexchange 7"),
            Some((Command::LpReplace, "7".into()))
        );
        assert_eq!(parse_command("привет"), None);
        assert_eq!(parse_command("!неизвестно"), None);
    }

    #[test]
    fn admin_call_detected_anywhere() {
        assert!(contains_admin_call("нужна помощь !админ"));
        assert!(contains_admin_call("!ADMIN please"));
        assert!(!contains_admin_call("обычное сообщение"));
    }

    #[test]
    fn extracts_lot_numbers_and_order_ids() {
        assert_eq!(parse_lot_number("Аренда Dota 2, лот №77, 1 час"), Some(77));
        assert_eq!(parse_lot_number("lot # 12"), Some(12));
        assert_eq!(parse_lot_number("без номера"), None);
        assert_eq!(
            extract_order_id("Покупатель оплатил заказ #A1B2C3D4."),
            Some("A1B2C3D4".into())
        );
        assert_eq!(extract_order_id("нет заказа"), None);
    }

    #[test]
    fn account_id_arg_wants_a_bare_number() {
        assert_eq!(parse_account_id_arg("42"), Some(42));
        assert_eq!(parse_account_id_arg("42 extra"), Some(42));
        assert_eq!(parse_account_id_arg("id42"), None);
        assert_eq!(parse_account_id_arg(""), None);
    }

    #[test]
    fn duration_labels_pluralize() {
        assert_eq!(format_duration_minutes(60), "1 час");
        assert_eq!(format_duration_minutes(120), "2 часа");
        assert_eq!(format_duration_minutes(300), "5 часов");
        assert_eq!(format_duration_minutes(90), "1 час 30 минут");
        assert_eq!(format_duration_minutes(0), "0 минут");
        assert_eq!(format_penalty_label(300), "5 часов");
        assert_eq!(format_penalty_label(90), "1 час 30 минут");
    }

    #[test]
    fn time_left_label() {
        assert_eq!(format_time_left(3725), "1 ч 2 мин 5 сек");
        assert_eq!(format_time_left(65), "1 мин 5 сек");
        assert_eq!(format_time_left(9), "9 сек");
    }

    #[test]
    fn resume_start_preserves_remaining_time() {
        // Paused at 12:00, resumed at 12:10 → start shifts by 10 minutes.
        let rebased = resume_start(Some(dt(11, 0)), Some(dt(12, 0)), dt(12, 10));
        assert_eq!(rebased, Some(dt(11, 10)));
        assert_eq!(resume_start(None, Some(dt(12, 0)), dt(12, 10)), None);
    }
}
