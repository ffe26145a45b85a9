//! Builders for the longer chat replies: credential blocks, rental choice
//! lists, stock listings, near-expiry warnings.

use chrono::{Duration, NaiveDateTime};

use crate::messages;
use crate::store::accounts::AccountRow;
use crate::text::{format_duration_minutes, format_time_left, Command};

/// Expiry wall-clock label + remaining-time label, when the timer runs.
/// `None` for deferred timers ("ожидаем !код").
pub fn remaining_labels(
    account: &AccountRow,
    now: NaiveDateTime,
) -> Option<(String, String)> {
    let start = account.rental_start?;
    if account.rental_duration_minutes <= 0 {
        return None;
    }
    let expiry = start + Duration::minutes(account.rental_duration_minutes);
    let remaining = expiry.signed_duration_since(now).num_seconds().max(0);
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    Some((
        expiry.format("%H:%M:%S").to_string(),
        format!("{} ч {} мин", hours, minutes),
    ))
}

/// The full credential block sent after assignment or `!акк`.
pub fn build_account_message(
    account: &AccountRow,
    duration_minutes: i64,
    include_timer_note: bool,
    now: NaiveDateTime,
) -> String {
    let mut lines = vec![
        messages::ACCOUNT_HEADER.to_string(),
        format!("ID: {}", account.id),
        format!("Название: {}", account.display_label()),
        format!("Логин: {}", account.login.as_deref().unwrap_or("-")),
        format!("Пароль: {}", account.password.as_deref().unwrap_or("-")),
    ];
    match remaining_labels(account, now) {
        Some((expiry, remaining)) => {
            lines.push(format!("Истекает: {} МСК | Осталось: {}", expiry, remaining));
        }
        None => {
            lines.push(format!("Аренда: {}", format_duration_minutes(duration_minutes)));
            if include_timer_note {
                lines.push(String::new());
                lines.push(messages::ACCOUNT_TIMER_NOTE.to_string());
            }
        }
    }
    lines.push(String::new());
    lines.push(messages::COMMANDS_RU.to_string());
    lines.join("\n")
}

/// "You have several rentals, pick one" prompt.
pub fn build_choice_message(accounts: &[AccountRow], command: Command) -> String {
    let mut lines = vec![
        "У вас несколько аренд.".to_string(),
        format!("Укажите ID в команде {} <ID>", command.as_str()),
        String::new(),
    ];
    for account in accounts {
        lines.push(format!("ID {}: {}", account.id, account.display_label()));
    }
    lines.join("\n")
}

/// Stock lines, one per free account: "name - url" or bare name.
pub fn build_stock_lines(accounts: &[AccountRow]) -> Vec<String> {
    accounts
        .iter()
        .map(|account| {
            let name = account.display_label();
            match account.lot_url.as_deref() {
                Some(url) if !url.is_empty() => format!("{} - {}", name, url),
                _ => name,
            }
        })
        .collect()
}

/// Near-expiry reminder with the lot to pay for an extension.
pub fn build_expire_soon_message(account: &AccountRow, seconds_left: i64) -> String {
    let label = format!("{} (ID {})", account.display_label(), account.id);
    let lot_label = match (account.lot_number, account.lot_url.as_deref()) {
        (Some(lot), Some(url)) => format!("Лот №{}: {}", lot, url),
        (Some(lot), None) => format!("Лот №{}", lot),
        (None, Some(url)) => format!("Лот: {}", url),
        (None, None) => "лот, который привязан к аккаунту".to_string(),
    };
    format!(
        "⏳ Ваша аренда {} скоро закончится.\nОсталось: {}.\nЕсли хотите продлить — пожалуйста оплатите этот {}.",
        label,
        format_time_left(seconds_left),
        lot_label
    )
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

    fn account() -> AccountRow {
        AccountRow {
            id: 42,
            account_name: Some("Immortal".into()),
            display_name: None,
            login: Some("login42".into()),
            password: Some("pass42".into()),
            mafile_json: None,
            owner: Some("alice".into()),
            rental_start: None,
            rental_duration_minutes: 120,
            account_frozen: false,
            rental_frozen: false,
            rental_frozen_at: None,
            low_priority: false,
            mmr: Some(6500),
            lot_number: Some(77),
            lot_url: Some("https://funpay.com/lots/offer?id=77".into()),
        }
    }

    #[test]
    fn deferred_timer_shows_duration_and_note() {
        let msg = build_account_message(&account(), 120, true, dt(12, 0));
        assert!(msg.contains("Логин: login42"));
        assert!(msg.contains("Пароль: pass42"));
        assert!(msg.contains("Аренда: 2 часа"));
        assert!(msg.contains(messages::ACCOUNT_TIMER_NOTE));
        assert!(msg.contains("!код"));
    }

    #[test]
    fn running_timer_shows_expiry_and_remaining() {
        let mut acc = account();
        acc.rental_start = Some(dt(11, 0));
        let msg = build_account_message(&acc, 120, true, dt(12, 0));
        assert!(msg.contains("Истекает: 13:00:00 МСК"));
        assert!(msg.contains("Осталось: 1 ч 0 мин"));
        assert!(!msg.contains(messages::ACCOUNT_TIMER_NOTE));
    }

    #[test]
    fn remaining_never_negative() {
        let mut acc = account();
        acc.rental_start = Some(dt(8, 0));
        let (_, remaining) = remaining_labels(&acc, dt(12, 0)).unwrap();
        assert_eq!(remaining, "0 ч 0 мин");
    }

    #[test]
    fn choice_message_lists_ids() {
        let msg = build_choice_message(&[account()], Command::Pause);
        assert!(msg.contains("!пауза <ID>"));
        assert!(msg.contains("ID 42: №77 Immortal"));
    }

    #[test]
    fn stock_lines_include_urls_when_present() {
        let mut without_url = account();
        without_url.lot_url = None;
        let lines = build_stock_lines(&[account(), without_url]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" - https://"));
        assert!(!lines[1].contains(" - "));
    }

    #[test]
    fn expire_soon_message_names_the_lot() {
        let msg = build_expire_soon_message(&account(), 540);
        assert!(msg.contains("№77 Immortal (ID 42)"));
        assert!(msg.contains("9 мин 0 сек"));
        assert!(msg.contains("Лот №77: https://"));
    }
}
