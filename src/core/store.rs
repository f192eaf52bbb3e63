use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use super::types::{TaskPatch, UploadEvent, UploadId, UploadStatus, UploadTask};

const EVENT_CAPACITY: usize = 256;

/// 上传任务注册表
///
/// 渲染端通过 `tasks()` / `subscribe()` 读取按创建顺序排列的快照，
/// 每次修改后都会推送新的快照。所有操作对不存在的 id 都是空操作。
#[derive(Clone)]
pub struct UploadStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    tasks: watch::Sender<Vec<UploadTask>>,
    tokens: Mutex<HashMap<UploadId, CancellationToken>>,
    events: broadcast::Sender<UploadEvent>,
}

impl Default for UploadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStore {
    pub fn new() -> Self {
        let (tasks, _) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(StoreInner {
                tasks,
                tokens: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<UploadId, CancellationToken>> {
        self.inner.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.inner.events.send(event);
    }

    /// 创建任务，状态为 uploading，进度为 0
    pub fn add_task(&self, file_name: impl Into<String>, file_size: u64) -> UploadId {
        let task = UploadTask::new(file_name, file_size);
        let id = task.id;
        let file_name = task.file_name.clone();

        self.tokens().insert(id, CancellationToken::new());
        self.inner.tasks.send_modify(|tasks| tasks.push(task));

        debug!(upload_id = %id, file = %file_name, size = file_size, "task added");
        self.emit(UploadEvent::TaskAdded { upload_id: id, file_name });
        id
    }

    /// 合并字段到指定任务
    pub fn update_task(&self, id: UploadId, patch: TaskPatch) {
        let mut transition = None;

        self.inner.tasks.send_if_modified(|tasks| {
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            let old_state = task.status;
            let changed = task.apply(patch);
            if task.status != old_state {
                transition = Some((old_state, task.status));
            }
            changed
        });

        if let Some((old_state, new_state)) = transition {
            debug!(upload_id = %id, from = %old_state, to = %new_state, "state changed");
            self.emit(UploadEvent::StateChanged { upload_id: id, old_state, new_state });
        }
    }

    /// 删除任务，重复调用无副作用
    ///
    /// 删除仍在上传的任务会同时触发它的取消令牌。
    pub fn remove_task(&self, id: UploadId) {
        if let Some(token) = self.tokens().remove(&id) {
            token.cancel();
        }

        let removed = self.inner.tasks.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            tasks.len() != before
        });

        if removed {
            debug!(upload_id = %id, "task removed");
            self.emit(UploadEvent::Removed { upload_id: id });
        }
    }

    /// 标记取消
    ///
    /// 只改状态并触发令牌，正在进行的网络请求由上传方在下一个检查点处理。
    pub fn cancel_task(&self, id: UploadId) {
        let is_uploading = self
            .get_task(id)
            .is_some_and(|task| task.status == UploadStatus::Uploading);
        if !is_uploading {
            return;
        }

        self.update_task(id, TaskPatch::new().status(UploadStatus::Cancelled));
        if let Some(token) = self.tokens().get(&id) {
            token.cancel();
        }
    }

    /// 切换折叠状态，与传输无关
    pub fn toggle_minimize(&self, id: UploadId) {
        self.inner.tasks.send_if_modified(|tasks| match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.minimized = !task.minimized;
                true
            }
            None => false,
        });
    }

    pub fn get_task(&self, id: UploadId) -> Option<UploadTask> {
        self.inner.tasks.borrow().iter().find(|t| t.id == id).cloned()
    }

    /// 当前所有任务，按创建顺序
    pub fn tasks(&self) -> Vec<UploadTask> {
        self.inner.tasks.borrow().clone()
    }

    /// 订阅任务快照
    pub fn subscribe(&self) -> watch::Receiver<Vec<UploadTask>> {
        self.inner.tasks.subscribe()
    }

    /// 订阅上传事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    pub fn cancellation_token(&self, id: UploadId) -> Option<CancellationToken> {
        self.tokens().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_task_is_visible() {
        let store = UploadStore::new();
        let id = store.add_task("video.mp4", 1024);

        let task = store.get_task(id).unwrap();
        assert_eq!(task.file_name, "video.mp4");
        assert_eq!(task.file_size, 1024);
        assert_eq!(task.status, UploadStatus::Uploading);
        assert_eq!(task.progress, 0);
        assert_eq!(task.speed, "0.00 MB/s");
        assert!(!task.minimized);
    }

    #[test]
    fn test_tasks_keep_creation_order() {
        let store = UploadStore::new();
        let a = store.add_task("a", 1);
        let b = store.add_task("b", 2);
        let c = store.add_task("c", 3);

        let ids: Vec<_> = store.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_missing_id_is_tolerated() {
        let store = UploadStore::new();
        let ghost = UploadId::new();

        store.update_task(ghost, TaskPatch::new().progress(50));
        store.cancel_task(ghost);
        store.toggle_minimize(ghost);
        store.remove_task(ghost);

        assert!(store.get_task(ghost).is_none());
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = UploadStore::new();
        let id = store.add_task("a", 1);

        store.remove_task(id);
        store.remove_task(id);

        assert!(store.get_task(id).is_none());
        assert!(store.cancellation_token(id).is_none());
    }

    #[test]
    fn test_cancel_flags_status_and_token() {
        let store = UploadStore::new();
        let id = store.add_task("a", 1);
        let token = store.cancellation_token(id).unwrap();

        store.cancel_task(id);

        assert_eq!(store.get_task(id).unwrap().status, UploadStatus::Cancelled);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_ignores_finished_task() {
        let store = UploadStore::new();
        let id = store.add_task("a", 1);
        store.update_task(id, TaskPatch::new().status(UploadStatus::Success).progress(100));

        store.cancel_task(id);

        assert_eq!(store.get_task(id).unwrap().status, UploadStatus::Success);
        assert!(!store.cancellation_token(id).unwrap().is_cancelled());
    }

    #[test]
    fn test_toggle_minimize() {
        let store = UploadStore::new();
        let id = store.add_task("a", 1);

        store.toggle_minimize(id);
        assert!(store.get_task(id).unwrap().minimized);
        store.toggle_minimize(id);
        assert!(!store.get_task(id).unwrap().minimized);
        assert_eq!(store.get_task(id).unwrap().status, UploadStatus::Uploading);
    }

    #[test]
    fn test_subscribe_sees_every_mutation() {
        let store = UploadStore::new();
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        let id = store.add_task("a", 100);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.update_task(id, TaskPatch::new().progress(10));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].progress, 10);

        // 无变化的更新不推送
        store.update_task(id, TaskPatch::new().progress(10));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_state_change_events() {
        let store = UploadStore::new();
        let mut events = store.subscribe_events();

        let id = store.add_task("a", 1);
        store.cancel_task(id);
        store.remove_task(id);

        assert!(matches!(events.recv().await.unwrap(), UploadEvent::TaskAdded { upload_id, .. } if upload_id == id));
        assert!(matches!(
            events.recv().await.unwrap(),
            UploadEvent::StateChanged { old_state: UploadStatus::Uploading, new_state: UploadStatus::Cancelled, .. }
        ));
        assert!(matches!(events.recv().await.unwrap(), UploadEvent::Removed { upload_id } if upload_id == id));
    }

    #[tokio::test]
    async fn test_concurrent_updates_stay_isolated() {
        let store = UploadStore::new();
        let ids: Vec<_> = (0..8).map(|i| store.add_task(format!("f{i}"), 100)).collect();

        let mut handles = Vec::new();
        for (i, id) in ids.iter().copied().enumerate() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for p in 0..=(i as u8 * 10) {
                    store.update_task(id, TaskPatch::new().progress(p));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(store.get_task(*id).unwrap().progress, i as u8 * 10);
        }
    }
}
