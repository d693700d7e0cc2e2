use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::error::{Error, Result};

use super::model::{
    Board, CreateTaskOptions, ListBoardsOptions, ListTasksOptions, Task, TaskNote, TaskStatus,
    DEFAULT_PROJECT,
};

/// Transactional store for boards and tasks, backed by a single sqlite
/// connection pool in WAL mode (one writer at a time, consistent reads).
pub struct BoardStore {
    pool: SqlitePool,
}

impl BoardStore {
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| Error::Validation(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Validation(e.to_string()))?;
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS boards (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                project TEXT NOT NULL,
                owner TEXT NOT NULL,
                assigned_to TEXT NOT NULL,
                status TEXT NOT NULL,
                status_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(&self.pool)
            .await?;

        for (table, _) in [("task_blockers", ()), ("task_artifacts", ()), ("task_worklog", ())] {
            let extra_cols = if table == "task_blockers" {
                ""
            } else {
                ", created_by TEXT NOT NULL, created_at TEXT NOT NULL"
            };
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    task_id TEXT NOT NULL,
                    idx INTEGER NOT NULL,
                    content TEXT NOT NULL{extra_cols}
                )"
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_board(&self, actor: &str, title: &str, registry: &AgentRegistry) -> Result<Board> {
        let caller = registry
            .get(actor)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent '{actor}' not found")))?;
        if !caller.is_manager() {
            return Err(Error::Conflict("only managers may create boards".into()));
        }

        let board = Board {
            id: Uuid::new_v4(),
            title: title.to_string(),
            owner: actor.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO boards (id, title, owner, created_at) VALUES (?, ?, ?, ?)")
            .bind(board.id.to_string())
            .bind(&board.title)
            .bind(&board.owner)
            .bind(board.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        info!(board = %board.id, owner = %actor, "board created");
        Ok(board)
    }

    pub async fn update_board(&self, actor: &str, board_id: Uuid, title: &str) -> Result<()> {
        let board = self.get_board(board_id).await?;
        if board.owner != actor {
            return Err(Error::Conflict("only the board owner may update the board".into()));
        }
        sqlx::query("UPDATE boards SET title = ? WHERE id = ?")
            .bind(title)
            .bind(board_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_board(&self, board_id: Uuid) -> Result<Board> {
        let row = sqlx::query("SELECT id, title, owner, created_at FROM boards WHERE id = ?")
            .bind(board_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("board '{board_id}' not found")))?;
        Ok(row_to_board(&row)?)
    }

    pub async fn get_or_create_default_board(&self, manager_id: &str, registry: &AgentRegistry) -> Result<Board> {
        let row = sqlx::query("SELECT id, title, owner, created_at FROM boards WHERE owner = ? ORDER BY created_at ASC LIMIT 1")
            .bind(manager_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(row_to_board(&row)?);
        }
        self.create_board(manager_id, &format!("{manager_id}'s board"), registry).await
    }

    pub async fn list_boards(&self, options: ListBoardsOptions) -> Result<Vec<Board>> {
        let rows = if let Some(owner) = &options.owner_filter {
            sqlx::query("SELECT id, title, owner, created_at FROM boards WHERE owner = ? ORDER BY created_at")
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT id, title, owner, created_at FROM boards ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?
        };
        rows.iter().map(row_to_board).collect()
    }

    #[instrument(skip(self, options, registry))]
    pub async fn create_task(
        &self,
        actor: &str,
        board_id: Option<Uuid>,
        options: CreateTaskOptions,
        registry: &AgentRegistry,
    ) -> Result<Task> {
        let caller = registry
            .get(actor)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent '{actor}' not found")))?;

        let board = match board_id {
            Some(id) => self.get_board(id).await?,
            None => {
                if !caller.is_manager() {
                    return Err(Error::Validation(
                        "boardId is required unless the caller is a manager".into(),
                    ));
                }
                self.get_or_create_default_board(actor, registry).await?
            }
        };

        let assigned_to = match &options.assigned_to {
            Some(target) if target != actor => {
                if !caller.is_manager() {
                    return Err(Error::Conflict(
                        "only a manager may assign a task to someone else".into(),
                    ));
                }
                let target_manifest = registry
                    .get(target)
                    .await
                    .ok_or_else(|| Error::NotFound(format!("agent '{target}' not found")))?;
                if target_manifest.reports_to.as_deref() != Some(actor) {
                    return Err(Error::Conflict(format!(
                        "'{target}' does not directly report to '{actor}'"
                    )));
                }
                target.clone()
            }
            Some(target) => target.clone(),
            None => actor.to_string(),
        };

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            board_id: board.id,
            title: options.title,
            description: options.description,
            project: options.project.unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            owner: actor.to_string(),
            assigned_to,
            status: TaskStatus::Todo,
            status_reason: None,
            blockers: Vec::new(),
            artifacts: Vec::new(),
            worklog: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO tasks (id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.board_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.project)
        .bind(&task.owner)
        .bind(&task.assigned_to)
        .bind(task.status.as_str())
        .bind(&task.status_reason)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(task = %task.id, assigned_to = %task.assigned_to, "task created");
        Ok(task)
    }

    pub async fn update_task_status(
        &self,
        actor: &str,
        task_id: Uuid,
        status: TaskStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let task = self.get_task(task_id).await?;
        if task.assigned_to != actor {
            return Err(Error::Conflict("only the current assignee may update task status".into()));
        }
        if status.requires_reason() && reason.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Validation(format!(
                "status '{}' requires a non-empty reason",
                status.as_str()
            )));
        }

        sqlx::query(
            "UPDATE tasks SET status = ?, status_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&reason)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_task_blocker(&self, actor: &str, task_id: Uuid, content: &str) -> Result<()> {
        self.add_task_note("task_blockers", actor, task_id, content, None).await
    }

    pub async fn add_task_artifact(&self, actor: &str, task_id: Uuid, content: &str) -> Result<()> {
        self.add_task_note("task_artifacts", actor, task_id, content, Some(actor)).await
    }

    pub async fn add_task_worklog(&self, actor: &str, task_id: Uuid, content: &str) -> Result<()> {
        self.add_task_note("task_worklog", actor, task_id, content, Some(actor)).await
    }

    async fn add_task_note(
        &self,
        table: &str,
        actor: &str,
        task_id: Uuid,
        content: &str,
        created_by: Option<&str>,
    ) -> Result<()> {
        let task = self.get_task(task_id).await?;
        if task.assigned_to != actor {
            return Err(Error::Conflict(format!(
                "only the current assignee may update {table}"
            )));
        }
        let idx_row = sqlx::query(&format!("SELECT COUNT(*) as n FROM {table} WHERE task_id = ?"))
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let idx: i64 = idx_row.try_get("n")?;

        if let Some(created_by) = created_by {
            sqlx::query(&format!(
                "INSERT INTO {table} (task_id, idx, content, created_by, created_at) VALUES (?, ?, ?, ?, ?)"
            ))
            .bind(task_id.to_string())
            .bind(idx)
            .bind(content)
            .bind(created_by)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(&format!("INSERT INTO {table} (task_id, idx, content) VALUES (?, ?, ?)"))
                .bind(task_id.to_string())
                .bind(idx)
                .bind(content)
                .execute(&self.pool)
                .await?;
        }

        sqlx::query("UPDATE tasks SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let row = sqlx::query(
            "SELECT id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at
             FROM tasks WHERE id = ?",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task '{task_id}' not found")))?;

        let mut task = row_to_task(&row)?;
        task.blockers = self.load_blockers(task_id).await?;
        task.artifacts = self.load_notes("task_artifacts", task_id).await?;
        task.worklog = self.load_notes("task_worklog", task_id).await?;
        Ok(task)
    }

    pub async fn list_tasks(&self, board_id: Option<Uuid>, options: ListTasksOptions) -> Result<Vec<Task>> {
        let rows = match (&board_id, &options.assignee_filter) {
            (Some(board_id), Some(assignee)) => sqlx::query(
                "SELECT id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at
                 FROM tasks WHERE board_id = ? AND assigned_to = ? ORDER BY created_at",
            )
            .bind(board_id.to_string())
            .bind(assignee)
            .fetch_all(&self.pool)
            .await?,
            (Some(board_id), None) => sqlx::query(
                "SELECT id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at
                 FROM tasks WHERE board_id = ? ORDER BY created_at",
            )
            .bind(board_id.to_string())
            .fetch_all(&self.pool)
            .await?,
            (None, Some(assignee)) => sqlx::query(
                "SELECT id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at
                 FROM tasks WHERE assigned_to = ? ORDER BY created_at",
            )
            .bind(assignee)
            .fetch_all(&self.pool)
            .await?,
            (None, None) => sqlx::query(
                "SELECT id, board_id, title, description, project, owner, assigned_to, status, status_reason, created_at, updated_at
                 FROM tasks ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?,
        };

        let mut tasks: Vec<Task> = rows.iter().map(row_to_task).collect::<Result<_>>()?;
        if let Some(limit) = options.limit {
            tasks.truncate(limit);
        }
        for task in &mut tasks {
            task.blockers = self.load_blockers(task.id).await?;
            task.artifacts = self.load_notes("task_artifacts", task.id).await?;
            task.worklog = self.load_notes("task_worklog", task.id).await?;
        }
        Ok(tasks)
    }

    async fn load_blockers(&self, task_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT content FROM task_blockers WHERE task_id = ? ORDER BY idx")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.try_get::<String, _>("content").map_err(Error::from)).collect()
    }

    async fn load_notes(&self, table: &str, task_id: Uuid) -> Result<Vec<TaskNote>> {
        let rows = sqlx::query(&format!(
            "SELECT content, created_by, created_at FROM {table} WHERE task_id = ? ORDER BY idx"
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(TaskNote {
                    content: r.try_get("content")?,
                    created_by: r.try_get("created_by")?,
                    created_at: chrono::DateTime::parse_from_rfc3339(r.try_get::<String, _>("created_at")?.as_str())
                        .map_err(|e| Error::Validation(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}

fn row_to_board(row: &sqlx::sqlite::SqliteRow) -> Result<Board> {
    Ok(Board {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?).map_err(|e| Error::Validation(e.to_string()))?,
        title: row.try_get("title")?,
        owner: row.try_get("owner")?,
        created_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("created_at")?.as_str())
            .map_err(|e| Error::Validation(e.to_string()))?
            .with_timezone(&Utc),
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let status_raw: String = row.try_get("status")?;
    Ok(Task {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?).map_err(|e| Error::Validation(e.to_string()))?,
        board_id: Uuid::parse_str(&row.try_get::<String, _>("board_id")?).map_err(|e| Error::Validation(e.to_string()))?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        project: row.try_get("project")?,
        owner: row.try_get("owner")?,
        assigned_to: row.try_get("assigned_to")?,
        status: TaskStatus::from_str(&status_raw).ok_or_else(|| Error::Validation(format!("bad status '{status_raw}'")))?,
        status_reason: row.try_get("status_reason")?,
        blockers: Vec::new(),
        artifacts: Vec::new(),
        worklog: Vec::new(),
        created_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("created_at")?.as_str())
            .map_err(|e| Error::Validation(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("updated_at")?.as_str())
            .map_err(|e| Error::Validation(e.to_string()))?
            .with_timezone(&Utc),
    })
}
