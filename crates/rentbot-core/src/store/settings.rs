//! Per-user settings and the auto-raise category registry.

use sqlx::MySqlPool;

const AUTO_TICKET_KEY: &str = "auto_ticket_enabled";
const AUTO_RAISE_KEY: &str = "auto_raise_enabled";
const AUTO_RAISE_CATEGORIES_KEY: &str = "auto_raise_categories";

async fn get_value(
    pool: &MySqlPool,
    user_id: i64,
    key: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT value FROM user_settings WHERE user_id = ? AND `key` = ? LIMIT 1",
    )
    .bind(user_id)
    .bind(key)
    .fetch_optional(pool)
    .await
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Auto-ticket submission after unconfirmed rentals. Default on.
pub async fn auto_ticket_enabled(pool: &MySqlPool, user_id: i64) -> sqlx::Result<bool> {
    Ok(parse_bool(get_value(pool, user_id, AUTO_TICKET_KEY).await?, true))
}

/// Automatic lot raising. Default on.
pub async fn auto_raise_enabled(pool: &MySqlPool, user_id: i64) -> sqlx::Result<bool> {
    Ok(parse_bool(get_value(pool, user_id, AUTO_RAISE_KEY).await?, true))
}

/// Category filter for auto-raise: `None` means raise everything.
pub async fn auto_raise_categories(
    pool: &MySqlPool,
    user_id: i64,
) -> sqlx::Result<Option<Vec<i64>>> {
    let raw = get_value(pool, user_id, AUTO_RAISE_CATEGORIES_KEY).await?;
    Ok(raw.map(|v| parse_category_list(&v)).filter(|v| !v.is_empty()))
}

fn parse_category_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Replace the discovered raise categories for a workspace.
pub async fn upsert_raise_categories(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    categories: &[(i64, String)],
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM raise_categories WHERE user_id = ? AND workspace_id <=> ?")
        .bind(user_id)
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;
    for (category_id, name) in categories {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO raise_categories (user_id, workspace_id, category_id, category_name)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(workspace_id)
        .bind(category_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_defaults() {
        assert!(parse_bool(None, true));
        assert!(!parse_bool(None, false));
        assert!(parse_bool(Some("1".into()), false));
        assert!(parse_bool(Some("TRUE".into()), false));
        assert!(!parse_bool(Some("0".into()), true));
        assert!(!parse_bool(Some("off".into()), true));
    }

    #[test]
    fn category_list_parsing() {
        assert_eq!(parse_category_list("1, 2,3"), vec![1, 2, 3]);
        assert_eq!(parse_category_list("4,,x,5"), vec![4, 5]);
        assert!(parse_category_list("").is_empty());
    }
}
