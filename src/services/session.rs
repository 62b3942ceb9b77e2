use crate::errors::TransportError;
use crate::platform::{CompletedProcess, Platform, ProcessSpec};
use crate::services::logger::Logger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

type SharedPlatform = Arc<Mutex<Box<dyn Platform>>>;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub platform: &'static str,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

struct SessionEntry {
    info: SessionInfo,
    platform: SharedPlatform,
}

/// Registry of live platforms for async callers. Each session runs one
/// operation at a time on a blocking thread; different sessions run in
/// parallel.
#[derive(Clone)]
pub struct SessionService {
    logger: Logger,
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
}

impl SessionService {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.child("sessions"),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, label: impl Into<String>, platform: Box<dyn Platform>) -> Uuid {
        let id = Uuid::new_v4();
        let info = SessionInfo {
            id,
            platform: platform.name(),
            label: label.into(),
            created_at: Utc::now(),
        };
        self.logger.info(
            "session registered",
            Some(&serde_json::json!({ "id": id, "platform": info.platform, "label": info.label })),
        );
        self.sessions.insert(
            id,
            SessionEntry {
                info,
                platform: Arc::new(Mutex::new(platform)),
            },
        );
        id
    }

    /// Drops the registry entry. An operation already running keeps its
    /// platform alive until it finishes.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            self.logger
                .info("session removed", Some(&serde_json::json!({ "id": id })));
        }
        removed
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect();
        out.sort_by_key(|info| info.created_at);
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn lookup(&self, id: Uuid) -> Result<SharedPlatform, TransportError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().platform.clone())
            .ok_or_else(|| {
                TransportError::not_found(format!("unknown session: {}", id))
                    .with_hint("list sessions to see which ones are registered")
            })
    }

    async fn with_platform<R, F>(&self, id: Uuid, op: &'static str, f: F) -> Result<R, TransportError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Platform) -> Result<R, TransportError> + Send + 'static,
    {
        let shared = self.lookup(id)?;
        let mut guard = shared.lock_owned().await;
        self.logger
            .debug(op, Some(&serde_json::json!({ "id": id })));
        tokio::task::spawn_blocking(move || f(&mut **guard))
            .await
            .map_err(|_| TransportError::internal(format!("session task failed: {}", op)))?
    }

    pub async fn run(
        &self,
        id: Uuid,
        spec: ProcessSpec,
        input: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError> {
        self.with_platform(id, "run", move |platform| {
            platform.run(spec, input.as_deref(), timeout)
        })
        .await
    }

    pub async fn which(&self, id: Uuid, name: &str) -> Result<Option<String>, TransportError> {
        let name = name.to_string();
        self.with_platform(id, "which", move |platform| platform.which(&name))
            .await
    }

    pub async fn read_file(&self, id: Uuid, path: &str) -> Result<Vec<u8>, TransportError> {
        let path = path.to_string();
        self.with_platform(id, "read_file", move |platform| platform.read_file(&path))
            .await
    }

    pub async fn write_file(&self, id: Uuid, path: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let path = path.to_string();
        self.with_platform(id, "write_file", move |platform| {
            platform.write_file(&path, &data)
        })
        .await
    }

    pub async fn host_hash(&self, id: Uuid) -> Result<String, TransportError> {
        self.with_platform(id, "host_hash", |platform| platform.host_hash())
            .await
    }
}
