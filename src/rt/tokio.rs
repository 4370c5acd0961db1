//! Tokio 执行器适配。

use std::fmt;

use tokio::runtime::Handle;

use super::{Executor, Task};

/// 在 Tokio 运行时的阻塞线程池中运行任务的执行器。
///
/// 任务通过 `spawn_blocking` 提交，不会占用异步 worker 线程。
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// 使用给定运行时句柄创建执行器。
    pub fn new(handle: Handle) -> TokioExecutor {
        TokioExecutor { handle }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_on_blocking_pool() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioExecutor::new(Handle::current()).execute(Box::new(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            let _ = tx.send("ran");
        }));
        assert_eq!(rx.await.unwrap(), "ran");
    }
}
