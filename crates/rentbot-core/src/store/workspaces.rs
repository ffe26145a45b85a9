//! Workspace rows and per-workspace connection status.

use sqlx::MySqlPool;

/// A seller workspace: marketplace session token + outbound proxy, owned by
/// one dashboard user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkspaceRow {
    pub workspace_id: i64,
    pub workspace_name: Option<String>,
    pub golden_key: String,
    pub proxy_url: Option<String>,
    pub user_id: i64,
    pub username: Option<String>,
}

impl WorkspaceRow {
    pub fn label(&self) -> String {
        match &self.workspace_name {
            Some(name) if !name.is_empty() => format!("[{}]", name),
            _ => format!("[workspace {}]", self.workspace_id),
        }
    }
}

/// Connection status surfaced to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceStatus {
    Ok,
    Unauthorized,
    Error,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Ok => "ok",
            WorkspaceStatus::Unauthorized => "unauthorized",
            WorkspaceStatus::Error => "error",
        }
    }
}

/// Workspaces eligible for a bot: a non-empty session token is required.
pub async fn fetch_workspaces(pool: &MySqlPool) -> sqlx::Result<Vec<WorkspaceRow>> {
    sqlx::query_as::<_, WorkspaceRow>(
        r#"
        SELECT w.id AS workspace_id, w.name AS workspace_name, w.golden_key, w.proxy_url,
               w.user_id, u.username
        FROM workspaces w
        JOIN users u ON u.id = w.user_id
        WHERE w.golden_key IS NOT NULL AND w.golden_key != ''
        ORDER BY w.user_id, w.id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn upsert_status(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    status: WorkspaceStatus,
    message: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workspace_status (user_id, workspace_id, status, message)
        VALUES (?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            status = VALUES(status),
            message = VALUES(message),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(status.as_str())
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(WorkspaceStatus::Ok.as_str(), "ok");
        assert_eq!(WorkspaceStatus::Unauthorized.as_str(), "unauthorized");
        assert_eq!(WorkspaceStatus::Error.as_str(), "error");
    }

    #[test]
    fn workspace_label() {
        let ws = WorkspaceRow {
            workspace_id: 7,
            workspace_name: Some("Main".into()),
            golden_key: "k".into(),
            proxy_url: None,
            user_id: 1,
            username: None,
        };
        assert_eq!(ws.label(), "[Main]");
        let unnamed = WorkspaceRow {
            workspace_name: None,
            ..ws
        };
        assert_eq!(unnamed.label(), "[workspace 7]");
    }
}
