//! 프로젝트별 비동기 잠금
//!
//! 같은 프로젝트에 대한 start/stop/destroy/reclaim은 서로 배타적으로 실행되고,
//! 다른 프로젝트끼리는 서로 막지 않습니다. 대기자가 없는 항목은 가드가
//! 해제될 때 맵에서 제거됩니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use vslab_core::types::ProjectId;

type Slot = Arc<AsyncMutex<()>>;

/// 프로젝트 ID → 비동기 뮤텍스
#[derive(Default)]
pub struct ProjectLocks {
    slots: Arc<Mutex<HashMap<ProjectId, Slot>>>,
}

impl ProjectLocks {
    /// 빈 잠금 테이블을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 프로젝트 잠금을 획득할 때까지 기다립니다.
    pub async fn lock(&self, id: ProjectId) -> ProjectLockGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(id).or_default())
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        ProjectLockGuard {
            id,
            guard: Some(guard),
            slot,
            slots: Arc::clone(&self.slots),
        }
    }

    /// 현재 맵에 남아 있는 항목 수
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// 잡힌 잠금이나 대기자가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 프로젝트 잠금 가드
///
/// 드롭되면 잠금을 풀고, 다른 참조가 없으면 맵 항목을 정리합니다.
pub struct ProjectLockGuard {
    id: ProjectId,
    guard: Option<OwnedMutexGuard<()>>,
    slot: Slot,
    slots: Arc<Mutex<HashMap<ProjectId, Slot>>>,
}

impl ProjectLockGuard {
    /// 잠근 프로젝트 ID
    pub fn project_id(&self) -> ProjectId {
        self.id
    }
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        // 맵과 이 가드 외의 참조가 없으면 대기자도 없음
        if Arc::strong_count(&self.slot) == 2
            && slots
                .get(&self.id)
                .is_some_and(|s| Arc::ptr_eq(s, &self.slot))
        {
            slots.remove(&self.id);
        }
    }
}
