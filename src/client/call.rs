//! 调用的生命周期。
//!
//! 一次 [`Call`] 的状态迁移：`Idle → Executing → {Finished, Canceled, Failed}`。
//!
//! - `execute` / `enqueue` 至多运行一次，第二次得到 `AlreadyExecuted`；
//! - 执行开始时加入调度器并启动调用级超时看门狗；
//! - 拦截器链的末端（[`EngineExchange`]）创建 [`Transfer`]、提交引擎请求并等待响应头；
//! - 响应体读完、失败、被取消或被关闭时调用结束，从调度器移除，看门狗解除。
//!
//! 取消可以发生在任何时刻。引擎请求创建之前，`attach` 会发现取消并放弃提交；
//! 之后取消被转发给 `Transfer`，唤醒所有阻塞的读取。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use http::{Method, Request, Response, Uri, Version};

use super::Client;
use crate::body::{End, Incoming, Outgoing};
use crate::common::watchdog::Watchdog;
use crate::engine::SubmitParams;
use crate::ext::{DisableCache, Priority, TransportInfo};
use crate::proto::{upload, Head, RedirectPolicy, Transfer};
use crate::service::{Chain, Exchange};
use crate::Error;

const IDLE: u8 = 0;
const EXECUTING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELED: u8 = 3;
const FAILED: u8 = 4;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 一次 HTTP 调用。
///
/// `Call` 是一个可以廉价克隆的句柄：在一个线程上 `execute`，
/// 在另一个线程上 `cancel`。
///
/// # 示例
///
/// ```no_run
/// # fn run(client: callbridge::client::Client) -> Result<(), Box<dyn std::error::Error>> {
/// use callbridge::body::Outgoing;
///
/// let call = client.new_call(http::Request::get("https://example.com/").body(Outgoing::empty())?);
/// let canceller = call.clone();
/// std::thread::spawn(move || canceller.cancel());
///
/// match call.execute() {
///     Ok(res) => println!("status: {}", res.status()),
///     Err(err) if err.is_canceled() => println!("canceled"),
///     Err(err) => return Err(err.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Call {
    inner: Arc<Inner>,
}

/// 调用所处的生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// 尚未执行。
    Idle,
    /// 正在执行：等待响应头，或者响应体尚未读完。
    Executing,
    /// 响应已完整交付，或者响应体被消费方关闭。
    Finished,
    /// 调用被取消（包括调用级超时）。
    Canceled,
    /// 调用失败。
    Failed,
}

struct Inner {
    id: u64,
    client: Client,
    method: Method,
    uri: Uri,
    request: Mutex<Option<Request<Outgoing>>>,
    executed: AtomicBool,
    canceled: AtomicBool,
    timed_out: AtomicBool,
    state: AtomicU8,
    transfer: Mutex<Option<Arc<Transfer>>>,
    watchdog: Mutex<Option<Watchdog>>,
}

/// 拦截器链的末端：把请求交给引擎。
struct EngineExchange<'a> {
    call: &'a Arc<Inner>,
}

// ===== impl Call =====

impl Call {
    pub(super) fn new(client: Client, req: Request<Outgoing>) -> Call {
        Call {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                client,
                method: req.method().clone(),
                uri: req.uri().clone(),
                request: Mutex::new(Some(req)),
                executed: AtomicBool::new(false),
                canceled: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                state: AtomicU8::new(IDLE),
                transfer: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// 在当前线程上执行调用，阻塞直到响应头到达。
    ///
    /// 返回的响应体是一个阻塞流，调用在它读完或被关闭之前仍处于执行中，
    /// 调用级超时同样覆盖响应体的读取。
    ///
    /// # Errors
    ///
    /// - 第二次执行：`is_already_executed()`；
    /// - 调用被取消：`is_canceled()`，调用级超时时 `is_timeout()` 也为真；
    /// - 等待响应头超过读超时：`is_read_timeout()`；
    /// - 引擎失败：`is_transport()`；
    /// - 协议违规（请求体长度不符、重定向过多等）：`is_protocol()`。
    pub fn execute(&self) -> crate::Result<Response<Incoming>> {
        if self.inner.executed.swap(true, Ordering::AcqRel) {
            debug!("call #{} executed twice", self.inner.id);
            return Err(Error::new_user_already_executed());
        }
        self.inner.run()
    }

    /// 在客户端的执行器上执行调用，结果交给 `callback`。
    ///
    /// `callback` 恰好被调用一次，并且总是在执行器的线程上，
    /// 包括调用已经执行过的情况。
    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce(crate::Result<Response<Incoming>>) + Send + 'static,
    {
        let executed = self.inner.executed.swap(true, Ordering::AcqRel);
        let inner = self.inner.clone();
        let executor = self.inner.client.inner.executor.clone();
        executor.execute(Box::new(move || {
            let result = if executed {
                debug!("call #{} enqueued twice", inner.id);
                Err(Error::new_user_already_executed())
            } else {
                inner.run()
            };
            callback(result);
        }));
    }

    /// 取消调用。可以在任何时刻、从任何线程调用，重复调用没有效果。
    ///
    /// 阻塞在响应头或响应体读取上的线程会立即得到取消错误。
    pub fn cancel(&self) {
        self.inner.cancel_with(false);
    }

    /// 是否已经调用过 `execute` 或 `enqueue`。
    pub fn is_executed(&self) -> bool {
        self.inner.executed.load(Ordering::Acquire)
    }

    /// 是否已经被取消（包括调用级超时）。
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// 当前的生命周期阶段。
    pub fn state(&self) -> CallState {
        match self.inner.state.load(Ordering::Acquire) {
            IDLE => CallState::Idle,
            EXECUTING => CallState::Executing,
            FINISHED => CallState::Finished,
            CANCELED => CallState::Canceled,
            _ => CallState::Failed,
        }
    }

    /// 调用级超时。`None` 表示不限时。
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.client.call_timeout()
    }

    /// 请求方法。
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// 请求 URL。
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub(super) fn id(&self) -> u64 {
        self.inner.id
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("state", &self.state())
            .finish()
    }
}

// ===== impl Inner =====

impl Inner {
    fn run(self: &Arc<Inner>) -> crate::Result<Response<Incoming>> {
        let req = match lock(&self.request).take() {
            Some(req) => req,
            None => return Err(Error::new_user_already_executed()),
        };
        let _span = debug_span!("call", id = self.id, method = %self.method, uri = %self.uri);

        if self
            .state
            .compare_exchange(IDLE, EXECUTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("call canceled before execution");
            return Err(self.canceled_error());
        }

        let shared = &self.client.inner;
        shared.dispatcher.add(Call {
            inner: self.clone(),
        });
        if let Some(timeout) = shared.config.call_timeout {
            let call = Arc::downgrade(self);
            let watchdog = Watchdog::arm(&*shared.executor, timeout, move || fire(&call));
            *lock(&self.watchdog) = Some(watchdog);
        }

        let exchange = EngineExchange { call: self };
        let result = Chain::new(&shared.interceptors, &exchange, req).proceed();

        match result {
            Ok(mut res) => {
                let call = self.clone();
                res.body_mut()
                    .on_end(Box::new(move |end| call.finish(end)));
                Ok(res)
            }
            Err(err) => {
                let err = if err.is_canceled() && !err.is_timeout() {
                    self.canceled_error()
                } else {
                    err
                };
                debug!("call failed: {}", err);
                if err.is_canceled() {
                    self.finish(End::Canceled);
                } else {
                    self.finish(End::Failed);
                }
                Err(err)
            }
        }
    }

    fn cancel_with(&self, timed_out: bool) {
        if timed_out {
            self.timed_out.store(true, Ordering::Release);
        }
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("call #{} canceled", self.id);

        if self
            .state
            .compare_exchange(IDLE, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
        let transfer = lock(&self.transfer).take();
        if let Some(transfer) = transfer {
            if timed_out {
                transfer.mark_timed_out();
            }
            transfer.cancel();
        }
        // 响应体可能还在消费方手里，调用此刻就算结束
        self.finish(End::Canceled);
    }

    /// 登记本次调用的传输。调用已被取消时立即取消传输并返回 `false`。
    fn attach(&self, transfer: &Arc<Transfer>) -> bool {
        let mut slot = lock(&self.transfer);
        if self.canceled.load(Ordering::Acquire) {
            drop(slot);
            if self.timed_out.load(Ordering::Acquire) {
                transfer.mark_timed_out();
            }
            transfer.cancel();
            return false;
        }
        *slot = Some(transfer.clone());
        true
    }

    fn finish(&self, end: End) {
        let to = match end {
            End::Succeeded => FINISHED,
            End::Closed if self.canceled.load(Ordering::Acquire) => CANCELED,
            End::Closed => FINISHED,
            End::Canceled => CANCELED,
            End::Failed => FAILED,
        };
        if self
            .state
            .compare_exchange(EXECUTING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!("call #{} ended: {:?}", self.id, end);

        drop(lock(&self.watchdog).take());
        drop(lock(&self.transfer).take());
        self.client.inner.dispatcher.finished(self.id);
    }

    fn canceled_error(&self) -> Error {
        if self.timed_out.load(Ordering::Acquire) {
            Error::new_call_timeout()
        } else {
            Error::new_canceled()
        }
    }
}

/// 看门狗到期：以超时原因取消调用。调用已经被释放时什么也不做。
fn fire(call: &Weak<Inner>) {
    if let Some(call) = call.upgrade() {
        call.cancel_with(true);
    }
}

// ===== impl EngineExchange =====

impl Exchange for EngineExchange<'_> {
    fn exchange(&self, req: Request<Outgoing>) -> crate::Result<Response<Incoming>> {
        let shared = &self.call.client.inner;
        let config = &shared.config;
        let (transfer, events) = Transfer::new(RedirectPolicy {
            follow: config.follow_redirects,
            max: config.max_redirects,
        });
        if !self.call.attach(&transfer) {
            return Err(transfer.canceled_error());
        }

        let priority = Priority::of(&req);
        let disable_cache = DisableCache::is_set(&req);
        let (parts, body) = req.into_parts();
        let upload = match upload::provider(body, &transfer, &shared.executor, config.write_timeout) {
            Ok(upload) => upload,
            Err(err) => {
                transfer.close();
                return Err(err);
            }
        };

        trace!("submitting {} {}", parts.method, parts.uri);
        let request = match shared.engine.submit(SubmitParams {
            uri: parts.uri,
            method: parts.method,
            headers: parts.headers,
            priority,
            disable_cache,
            upload,
            callback: transfer.clone(),
        }) {
            Ok(request) => request,
            Err(cause) => {
                debug!("engine rejected the request: {}", cause);
                transfer.close();
                return Err(Error::new_transport(cause));
            }
        };
        if !transfer.set_request(request.clone()) {
            return Err(transfer.canceled_error());
        }
        request.start();

        let Head { info, redirect } = transfer.wait_head(config.read_timeout)?;
        trace!("response head: {}", info.status);

        let body = if redirect {
            Incoming::empty()
        } else {
            Incoming::bridge(transfer, events, config.read_timeout)
        };
        let mut res = Response::new(body);
        *res.status_mut() = info.status;
        *res.version_mut() = version(&info.negotiated_protocol);
        res.extensions_mut().insert(TransportInfo::new(&info));
        *res.headers_mut() = info.headers;
        Ok(res)
    }
}

/// 由协商得到的协议（ALPN 标识）推断 HTTP 版本。
fn version(protocol: &str) -> Version {
    match protocol {
        "h2" | "h2c" => Version::HTTP_2,
        "http/1.0" => Version::HTTP_10,
        p if p == "h3" || p.starts_with("h3-") || p.starts_with("quic") => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
