//! HTTP 客户端模块
//!
//! 本模块是阻塞调用层的顶层入口：
//!
//! - [`Client`] 持有引擎、配置、拦截器、执行器和调度器，可以廉价克隆并在线程间共享；
//! - [`Builder`] 配置并创建 `Client`；
//! - [`Call`] 是一次调用：`execute` 阻塞直到响应头到达，
//!   `enqueue` 在执行器上运行并把结果交给回调；
//! - [`Dispatcher`] 跟踪正在进行的调用，用于批量取消。
//!
//! ## 示例
//!
//! ```no_run
//! # fn run(engine: impl callbridge::engine::Engine + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use callbridge::body::Outgoing;
//! use callbridge::client::Client;
//!
//! let client = Client::builder()
//!     .read_timeout(Duration::from_secs(5))
//!     .call_timeout(Duration::from_secs(30))
//!     .build(engine);
//!
//! let req = http::Request::get("https://example.com/").body(Outgoing::empty())?;
//! let mut res = client.new_call(req).execute()?;
//! println!("{}: {} bytes", res.status(), res.body_mut().bytes()?.len());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};

use crate::body::{Incoming, Outgoing};
use crate::engine::Engine;
use crate::rt::{Executor, ThreadExecutor};
use crate::service::Interceptor;

pub use self::call::{Call, CallState};
pub use self::dispatch::Dispatcher;

mod call;
mod dispatch;

/// 默认的读超时与写超时。
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
/// 默认的最大重定向次数。
const DEFAULT_MAX_REDIRECTS: usize = 16;

/// 阻塞 HTTP 客户端。
///
/// 克隆 `Client` 只增加引用计数，所有克隆共享同一个引擎、执行器和调度器。
#[derive(Clone)]
pub struct Client {
    inner: Arc<Shared>,
}

struct Shared {
    engine: Arc<dyn Engine>,
    config: Config,
    interceptors: Vec<Arc<dyn Interceptor>>,
    executor: Arc<dyn Executor>,
    dispatcher: Dispatcher,
}

/// 超时为 `None` 表示不限时。
#[derive(Clone, Debug)]
struct Config {
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    follow_redirects: bool,
    max_redirects: usize,
}

/// 客户端构建器，用于配置超时、重定向、执行器和拦截器。
///
/// 所有配置方法都接受 `&mut self` 并返回 `&mut Self`，可以链式调用。
#[derive(Clone)]
pub struct Builder {
    config: Config,
    executor: Option<Arc<dyn Executor>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

// ===== impl Client =====

impl Client {
    /// 使用默认配置创建客户端。
    pub fn new<E>(engine: E) -> Client
    where
        E: Engine + 'static,
    {
        Builder::new().build(engine)
    }

    /// 创建一个客户端构建器。
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// 为 `req` 创建一次调用。调用在 `execute` 或 `enqueue` 之前不会发出。
    pub fn new_call(&self, req: Request<Outgoing>) -> Call {
        Call::new(self.clone(), req)
    }

    /// 创建一次调用并立即执行。
    pub fn execute(&self, req: Request<Outgoing>) -> crate::Result<Response<Incoming>> {
        self.new_call(req).execute()
    }

    /// 跟踪本客户端正在进行的调用的调度器。
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// 读超时。`None` 表示不限时。
    pub fn read_timeout(&self) -> Option<Duration> {
        self.inner.config.read_timeout
    }

    /// 写超时。`None` 表示不限时。
    pub fn write_timeout(&self) -> Option<Duration> {
        self.inner.config.write_timeout
    }

    /// 调用级超时。`None` 表示不限时。
    pub fn call_timeout(&self) -> Option<Duration> {
        self.inner.config.call_timeout
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("interceptors", &self.inner.interceptors.len())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

// ===== impl Builder =====

impl Builder {
    /// 创建一个使用默认配置的构建器。
    ///
    /// 默认值：读超时和写超时 10 秒，没有调用级超时，
    /// 跟随至多 16 次重定向，使用 [`ThreadExecutor`]，没有拦截器。
    pub fn new() -> Builder {
        Builder {
            config: Config {
                read_timeout: Some(DEFAULT_IO_TIMEOUT),
                write_timeout: Some(DEFAULT_IO_TIMEOUT),
                call_timeout: None,
                follow_redirects: true,
                max_redirects: DEFAULT_MAX_REDIRECTS,
            },
            executor: None,
            interceptors: Vec::new(),
        }
    }

    /// 设置读超时：等待响应头以及每次读取响应体时，等待引擎事件的最长时间。
    ///
    /// 超时后引擎请求被取消，读取返回 `is_read_timeout()` 错误。
    /// 传入 `Duration::ZERO` 表示不限时。
    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Builder {
        self.config.read_timeout = nonzero(timeout);
        self
    }

    /// 设置写超时：流式上传时，写入函数等待引擎拉取数据的最长时间。
    ///
    /// 传入 `Duration::ZERO` 表示不限时。
    pub fn write_timeout(&mut self, timeout: Duration) -> &mut Builder {
        self.config.write_timeout = nonzero(timeout);
        self
    }

    /// 设置调用级超时：从开始执行到响应体读完（或关闭）的总时长。
    ///
    /// 超时后调用被取消，错误同时满足 `is_canceled()` 与 `is_timeout()`。
    /// 传入 `Duration::ZERO` 表示不限时（默认）。
    pub fn call_timeout(&mut self, timeout: Duration) -> &mut Builder {
        self.config.call_timeout = nonzero(timeout);
        self
    }

    /// 设置是否跟随重定向。默认跟随。
    ///
    /// 不跟随时，重定向响应本身作为调用的响应返回，响应体为空。
    pub fn follow_redirects(&mut self, enabled: bool) -> &mut Builder {
        self.config.follow_redirects = enabled;
        self
    }

    /// 设置最多跟随的重定向次数，超过时调用失败。默认 16。
    pub fn max_redirects(&mut self, max: usize) -> &mut Builder {
        self.config.max_redirects = max;
        self
    }

    /// 设置运行 `enqueue` 调用、流式上传和超时看门狗的执行器。
    pub fn executor<E>(&mut self, executor: E) -> &mut Builder
    where
        E: Executor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// 在拦截器链末尾追加一个拦截器。先追加的拦截器先运行。
    pub fn interceptor<I>(&mut self, interceptor: I) -> &mut Builder
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// 使用当前配置和 `engine` 创建客户端。
    pub fn build<E>(&self, engine: E) -> Client
    where
        E: Engine + 'static,
    {
        let executor = self
            .executor
            .clone()
            .unwrap_or_else(|| Arc::new(ThreadExecutor::new()));
        Client {
            inner: Arc::new(Shared {
                engine: Arc::new(engine),
                config: self.config.clone(),
                interceptors: self.interceptors.clone(),
                executor,
                dispatcher: Dispatcher::new(),
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

fn nonzero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}
