//! 运行时抽象组件模块
//!
//! 调用层需要在自己的线程上运行两类阻塞任务：
//!
//! - `Call::enqueue` 的整个执行过程，包括最终的回调；
//! - 流式上传时，驱动应用写入函数的工作线程。
//!
//! 两者都通过注入的 [`Executor`] 提交，而不是使用进程级的全局线程池，
//! 这样执行器的生命周期和关闭时机由使用者决定。
//!
//! 本模块提供两个实现：
//!
//! - [`ThreadExecutor`]：每个任务一个命名的 OS 线程（默认）。
//! - `TokioExecutor`：把任务放到 Tokio 运行时的阻塞线程池中（需要 `tokio` feature）。

use std::fmt;
use std::sync::Arc;
use std::thread;

cfg_feature! {
    #![feature = "tokio"]

    mod tokio;
    pub use self::tokio::TokioExecutor;
}

/// 提交给执行器的阻塞任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 阻塞任务执行器 trait。
///
/// 实现者应在调用线程之外的某个线程上运行任务，任务可能会长时间阻塞
/// （等待响应头、等待引擎拉取上传数据）。
///
/// # 示例
///
/// ```
/// # use callbridge::rt::{Executor, Task};
/// #[derive(Clone)]
/// struct Spawner;
///
/// impl Executor for Spawner {
///     fn execute(&self, task: Task) {
///         std::thread::spawn(task);
///     }
/// }
/// ```
pub trait Executor: Send + Sync {
    /// 把任务放入执行器中运行。
    fn execute(&self, task: Task);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}

/// 为每个任务启动一个命名 OS 线程的执行器。
#[derive(Clone)]
pub struct ThreadExecutor {
    name: Arc<str>,
}

impl ThreadExecutor {
    /// 创建一个线程名为 `callbridge-worker` 的执行器。
    pub fn new() -> ThreadExecutor {
        ThreadExecutor::with_name("callbridge-worker")
    }

    /// 创建一个使用自定义线程名的执行器。
    pub fn with_name(name: &str) -> ThreadExecutor {
        ThreadExecutor { name: name.into() }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        ThreadExecutor::new()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let spawned = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(task);
        if let Err(_err) = spawned {
            // 任务随闭包一起被丢弃，持有的通道端随之关闭
            error!("failed to spawn {} thread: {}", self.name, _err);
        }
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.name)
            .finish()
    }
}
