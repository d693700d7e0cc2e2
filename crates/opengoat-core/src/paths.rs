//! On-disk layout resolution and the injectable filesystem port every
//! other component reads and writes through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Filesystem operations every component needs, behind a trait so tests
/// can swap in an in-memory double instead of touching disk.
#[async_trait]
pub trait FsPort: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>>;
    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()>;
    async fn append(&self, path: &Path, line: &str) -> Result<()>;
    async fn remove_file(&self, path: &Path) -> Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Real filesystem implementation. Writes go through a
/// write-tempfile-then-rename so a crash never leaves a half-written file.
pub struct RealFs;

#[async_trait]
impl FsPort for RealFs {
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp-{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("tmp"),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn append(&self, path: &Path, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            out.push(entry.path());
        }
        Ok(out)
    }
}

/// In-memory filesystem double for tests.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FsPort for MemFs {
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn append(&self, path: &Path, line: &str) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_path_buf()).or_default();
        entry.push_str(line);
        entry.push('\n');
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    async fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
}

/// Resolves the on-disk layout rooted at `<home>`.
#[derive(Debug, Clone)]
pub struct HomeLayout {
    home: PathBuf,
}

impl HomeLayout {
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    pub fn default_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opengoat")
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.json")
    }

    pub fn agents_file(&self) -> PathBuf {
        self.home.join("agents.json")
    }

    pub fn workspace_dir(&self, agent_id: &str) -> PathBuf {
        self.home.join("workspaces").join(agent_id)
    }

    pub fn agents_md(&self, agent_id: &str) -> PathBuf {
        self.workspace_dir(agent_id).join("AGENTS.md")
    }

    pub fn workspace_json(&self, agent_id: &str) -> PathBuf {
        self.workspace_dir(agent_id).join("workspace.json")
    }

    pub fn agent_config(&self, agent_id: &str) -> PathBuf {
        self.home.join("agents").join(agent_id).join("config.json")
    }

    pub fn sessions_dir(&self, agent_id: &str) -> PathBuf {
        self.home.join("agents").join(agent_id).join("sessions")
    }

    pub fn session_transcript(&self, agent_id: &str, session_key: &str) -> PathBuf {
        self.sessions_dir(agent_id)
            .join(session_key)
            .join("transcript.jsonl")
    }

    pub fn sessions_index(&self, agent_id: &str) -> PathBuf {
        self.sessions_dir(agent_id).join("sessions.json")
    }

    pub fn provider_config(&self, provider_id: &str) -> PathBuf {
        self.home.join("providers").join(provider_id).join("config.json")
    }

    pub fn run_trace(&self, run_id: &str) -> PathBuf {
        self.home.join("runs").join(format!("{run_id}.json"))
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn boards_db(&self) -> PathBuf {
        self.home.join("boards.sqlite")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_rooted_at_home() {
        let layout = HomeLayout::new(PathBuf::from("/tmp/opengoat-test"));
        assert_eq!(
            layout.agents_md("writer"),
            PathBuf::from("/tmp/opengoat-test/workspaces/writer/AGENTS.md")
        );
        assert_eq!(
            layout.session_transcript("writer", "agent:writer:main"),
            PathBuf::from(
                "/tmp/opengoat-test/agents/writer/sessions/agent:writer:main/transcript.jsonl"
            )
        );
        assert_eq!(
            layout.run_trace("abc"),
            PathBuf::from("/tmp/opengoat-test/runs/abc.json")
        );
    }

    #[tokio::test]
    async fn memfs_round_trips_writes() {
        let fs = MemFs::new();
        let path = PathBuf::from("/home/agents.json");
        assert!(fs.read_to_string(&path).await.unwrap().is_none());
        fs.write_atomic(&path, "{}").await.unwrap();
        assert_eq!(fs.read_to_string(&path).await.unwrap().as_deref(), Some("{}"));
        assert!(fs.exists(&path).await);
        fs.remove_file(&path).await.unwrap();
        assert!(!fs.exists(&path).await);
    }

    #[tokio::test]
    async fn memfs_append_accumulates_lines() {
        let fs = MemFs::new();
        let path = PathBuf::from("/home/t.jsonl");
        fs.append(&path, "one").await.unwrap();
        fs.append(&path, "two").await.unwrap();
        assert_eq!(
            fs.read_to_string(&path).await.unwrap().as_deref(),
            Some("one\ntwo\n")
        );
    }
}
