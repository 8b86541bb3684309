//! 프로젝트 저장소: 프로젝트 레코드의 영속 CRUD
//!
//! [`ProjectStore`]는 오케스트레이터가 기록에 접근하는 유일한 경로입니다.
//! 모든 쓰기는 레코드 하나를 통째로 교체하는 원자적 연산이므로
//! 배치(placement)가 일부만 기록되는 상태는 생기지 않습니다.
//!
//! # 구현
//! - [`MemoryProjectStore`]: 프로세스 메모리에만 보관 (테스트, 개발용)
//! - [`FileProjectStore`]: JSON 스냅샷 파일. 임시 파일에 쓴 뒤 rename으로 교체합니다.
//! - [`ConfiguredStore`]: 설정의 `store.backend` 값으로 둘 중 하나를 고릅니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use vslab_core::error::StoreError;
use vslab_core::types::{NewProject, Project, ProjectId};

/// 프로젝트 레코드 저장소
pub trait ProjectStore: Send + Sync + 'static {
    /// 새 레코드를 배치 없이 삽입하고 할당된 ID가 담긴 레코드를 반환합니다.
    fn reserve(
        &self,
        new: NewProject,
    ) -> impl Future<Output = Result<Project, StoreError>> + Send;

    /// ID로 레코드를 조회합니다.
    fn get(&self, id: ProjectId) -> impl Future<Output = Result<Project, StoreError>> + Send;

    /// 레코드 전체를 교체합니다. 없는 레코드는 `NotFound`입니다.
    fn update(&self, project: &Project) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 레코드를 삭제합니다. 없는 레코드는 `NotFound`입니다.
    fn delete(&self, id: ProjectId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 모든 레코드를 ID 순서로 반환합니다.
    fn list(&self) -> impl Future<Output = Result<Vec<Project>, StoreError>> + Send;
}

/// 메모리 저장소
///
/// ID는 1부터 증가하며 재사용하지 않습니다.
pub struct MemoryProjectStore {
    projects: RwLock<BTreeMap<ProjectId, Project>>,
    next_id: AtomicU64,
}

impl MemoryProjectStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 저장된 레코드 수
    pub async fn len(&self) -> usize {
        self.projects.read().await.len()
    }

    /// 저장소가 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.projects.read().await.is_empty()
    }
}

impl Default for MemoryProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore for MemoryProjectStore {
    async fn reserve(&self, new: NewProject) -> Result<Project, StoreError> {
        let id = ProjectId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let project = new.into_project(id);
        self.projects.write().await.insert(id, project.clone());
        Ok(project)
    }

    async fn get(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, project: &Project) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        let slot = projects
            .get_mut(&project.id)
            .ok_or(StoreError::NotFound(project.id))?;
        *slot = project.clone();
        Ok(())
    }

    async fn delete(&self, id: ProjectId) -> Result<(), StoreError> {
        self.projects
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.projects.read().await.values().cloned().collect())
    }
}

/// 파일 스냅샷 형식
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    projects: Vec<Project>,
}

#[derive(Debug, Clone)]
struct FileState {
    next_id: u64,
    projects: BTreeMap<ProjectId, Project>,
}

impl FileState {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let projects: BTreeMap<_, _> = snapshot
            .projects
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        // 손상된 next_id로 기존 ID를 재사용하지 않도록 보정
        let floor = projects.keys().next_back().map_or(1, |id| id.get() + 1);
        Self {
            next_id: snapshot.next_id.max(floor),
            projects,
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            projects: self.projects.values().cloned().collect(),
        }
    }
}

/// JSON 파일 저장소
///
/// 모든 쓰기는 상태 사본을 바꾼 뒤 `<path>.tmp`에 기록하고 rename으로 교체합니다.
/// 파일 교체에 성공한 경우에만 메모리 상태를 갱신하므로, 실패한 쓰기는
/// 메모리와 디스크 어느 쪽에도 흔적을 남기지 않습니다.
///
/// 한 파일을 하나의 프로세스만 연다고 가정합니다.
pub struct FileProjectStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileProjectStore {
    /// 저장소 파일을 엽니다.
    ///
    /// 파일이 없으면 빈 저장소로 시작하고 상위 디렉토리를 만듭니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Snapshot::default(),
            Ok(content) => serde_json::from_str::<Snapshot>(&content).map_err(|e| {
                StoreError::Unavailable(format!("corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        StoreError::Unavailable(format!(
                            "failed to create {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Snapshot::default()
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let state = FileState::from_snapshot(snapshot);
        info!(
            path = %path.display(),
            projects = state.projects.len(),
            "project store opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// 저장소 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// rename 자체를 디스크에 반영합니다. 실패는 경고만 남깁니다.
    async fn sync_parent_dir(&self) {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return;
        };
        let synced = match tokio::fs::File::open(parent).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            warn!(path = %parent.display(), error = %e, "failed to sync store directory");
        }
    }

    async fn persist(&self, state: &FileState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&state.to_snapshot())
            .map_err(|e| StoreError::Unavailable(format!("failed to serialize store: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        let write_failed =
            |e: std::io::Error| StoreError::Unavailable(format!("failed to write {}: {e}", tmp.display()));

        // rename 전에 내용이 디스크에 있어야 정전 후에도 빈 파일로 교체되지 않음
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_failed)?;
        file.write_all(&json).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to replace {}: {e}", self.path.display()))
        })?;
        self.sync_parent_dir().await;

        debug!(path = %self.path.display(), bytes = json.len(), "project store persisted");
        Ok(())
    }
}

impl ProjectStore for FileProjectStore {
    async fn reserve(&self, new: NewProject) -> Result<Project, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();

        let id = ProjectId::new(next.next_id);
        next.next_id += 1;
        let project = new.into_project(id);
        next.projects.insert(id, project.clone());

        self.persist(&next).await?;
        *state = next;
        Ok(project)
    }

    async fn get(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.state
            .lock()
            .await
            .projects
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, project: &Project) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&project.id) {
            return Err(StoreError::NotFound(project.id));
        }
        let mut next = state.clone();
        next.projects.insert(project.id, project.clone());

        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn delete(&self, id: ProjectId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let mut next = state.clone();
        next.projects.remove(&id);

        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.state.lock().await.projects.values().cloned().collect())
    }
}

/// 설정으로 선택되는 저장소
pub enum ConfiguredStore {
    /// 메모리 저장소
    Memory(MemoryProjectStore),
    /// JSON 파일 저장소
    File(FileProjectStore),
}

impl ConfiguredStore {
    /// `store.backend` 값(`memory` | `file`)으로 저장소를 엽니다.
    pub async fn from_config(backend: &str, path: &str) -> Result<Self, StoreError> {
        match backend {
            "memory" => Ok(Self::Memory(MemoryProjectStore::new())),
            "file" => Ok(Self::File(FileProjectStore::open(path).await?)),
            other => Err(StoreError::Unavailable(format!(
                "unknown store backend '{other}'"
            ))),
        }
    }

    /// 백엔드 이름
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::File(_) => "file",
        }
    }
}

impl ProjectStore for ConfiguredStore {
    async fn reserve(&self, new: NewProject) -> Result<Project, StoreError> {
        match self {
            Self::Memory(s) => s.reserve(new).await,
            Self::File(s) => s.reserve(new).await,
        }
    }

    async fn get(&self, id: ProjectId) -> Result<Project, StoreError> {
        match self {
            Self::Memory(s) => s.get(id).await,
            Self::File(s) => s.get(id).await,
        }
    }

    async fn update(&self, project: &Project) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.update(project).await,
            Self::File(s) => s.update(project).await,
        }
    }

    async fn delete(&self, id: ProjectId) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.delete(id).await,
            Self::File(s) => s.delete(id).await,
        }
    }

    async fn list(&self) -> Result<Vec<Project>, StoreError> {
        match self {
            Self::Memory(s) => s.list().await,
            Self::File(s) => s.list().await,
        }
    }
}
