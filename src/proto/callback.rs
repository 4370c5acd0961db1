//! 引擎回调适配。
//!
//! [`Transfer`] 是一次引擎请求在本 crate 中的全部共享状态，它实现
//! [`RequestCallback`]，把引擎线程上的推送事件转换为：
//!
//! - 响应头单槽（`SingleSlot<Head>`），由等待响应的调用线程读取；
//! - 容量为 2 的事件通道（一个数据槽加一个取消槽），由 [`Incoming`] 消费。
//!
//! 引擎线程永远不会阻塞：所有事件都通过 `try_send` 投递。
//! 终止状态通过对 `state` 的一次 CAS 决定，之后到达的任何事件都被丢弃，
//! 因此消费方看到的事件序列总是"零个或多个数据块，然后恰好一个终止事件"。
//!
//! [`Incoming`]: crate::body::Incoming

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use http::{StatusCode, Uri};

use super::upload;
use crate::body::{DeclaredLength, TransferEvent};
use crate::common::slot::SingleSlot;
use crate::engine::{EngineError, EngineRequest, RequestCallback, ResponseInfo};
use crate::Error;

const ACTIVE: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;
const CANCELED: u8 = 3;
/// 消费方主动关闭，或者未跟随的重定向已经作为最终响应交出。
const CLOSED: u8 = 4;

/// 事件通道容量：一个数据槽加一个取消槽。
const EVENT_CAPACITY: usize = 2;

/// 响应头到达时交给调用线程的内容。
#[derive(Clone, Debug)]
pub(crate) struct Head {
    pub(crate) info: ResponseInfo,
    /// 这是一个未跟随的重定向响应：引擎请求已取消，响应没有消息体。
    pub(crate) redirect: bool,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RedirectPolicy {
    pub(crate) follow: bool,
    pub(crate) max: usize,
}

pub(crate) struct Transfer {
    head: SingleSlot<Head>,
    events: Sender<TransferEvent>,
    state: AtomicU8,
    engine: Mutex<EngineSlot>,
    engine_canceled: AtomicBool,
    timed_out: AtomicBool,
    redirects: AtomicUsize,
    policy: RedirectPolicy,
    upload: Mutex<Option<upload::Abort>>,
    progress: Mutex<Progress>,
}

/// 引擎请求句柄在提交之后才存在，取消可能发生在它之前。
///
/// 传输终止后句柄被释放：持有回调的引擎请求与 `Transfer` 互相引用。
struct EngineSlot {
    request: Option<Arc<dyn EngineRequest>>,
    cancel_requested: bool,
}

/// 上传进度。响应头的读超时从最近一次上传活动开始计时，
/// 写入函数持有引擎的拉取期间不计时。
#[derive(Default)]
struct Progress {
    last: Option<Instant>,
    busy: bool,
}

impl Transfer {
    pub(crate) fn new(policy: RedirectPolicy) -> (Arc<Transfer>, Receiver<TransferEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let transfer = Arc::new(Transfer {
            head: SingleSlot::new(),
            events: tx,
            state: AtomicU8::new(ACTIVE),
            engine: Mutex::new(EngineSlot {
                request: None,
                cancel_requested: false,
            }),
            engine_canceled: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            redirects: AtomicUsize::new(0),
            policy,
            upload: Mutex::new(None),
            progress: Mutex::new(Progress::default()),
        });
        (transfer, rx)
    }

    /// 登记提交得到的引擎请求。
    ///
    /// 如果在此之前已经请求过取消，引擎请求会被立即取消，返回 `false`，
    /// 调用方不得再 `start` 它。
    pub(crate) fn set_request(&self, request: Arc<dyn EngineRequest>) -> bool {
        let cancel = {
            let mut slot = self.lock_engine();
            if !slot.cancel_requested && self.is_active() {
                slot.request = Some(request.clone());
            }
            slot.cancel_requested
        };
        if cancel {
            debug!("transfer canceled before start");
            if !self.engine_canceled.swap(true, Ordering::AcqRel) {
                request.cancel();
            }
            return false;
        }
        self.is_active()
    }

    pub(crate) fn set_upload(&self, abort: upload::Abort) {
        *self.upload.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort);
    }

    /// 等待响应头。
    ///
    /// 最近一次上传活动之后 `timeout` 内没有到达则判定为读超时：
    /// 取消引擎请求并返回 `ReadTimeout`。上传仍在进行时不会超时，
    /// 那一段由写超时和调用级超时约束。
    pub(crate) fn wait_head(&self, timeout: Option<Duration>) -> crate::Result<Head> {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => return self.head.get().map_err(|err| self.head_error(err)),
        };
        let mut wait = timeout;
        loop {
            match self.head.get_timeout(wait) {
                Ok(Some(head)) => return Ok(head),
                Ok(None) => match self.head_time_left(timeout) {
                    Some(left) => {
                        trace!("upload in progress, head wait extended by {:?}", left);
                        wait = left;
                    }
                    None => {
                        debug!("no response head within {:?}", timeout);
                        self.abort(Error::new_read_timeout());
                        return Err(Error::new_read_timeout());
                    }
                },
                Err(err) => return Err(self.head_error(err)),
            }
        }
    }

    fn head_error(&self, err: Error) -> Error {
        if err.is_canceled() {
            self.canceled_error()
        } else {
            err
        }
    }

    /// 响应头读超时还剩多久。`None` 表示已经超时。
    fn head_time_left(&self, timeout: Duration) -> Option<Duration> {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        if progress.busy {
            return Some(timeout);
        }
        let elapsed = progress.last?.elapsed();
        timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    /// 引擎拉取了一块请求体，写入函数开始填充它。
    pub(crate) fn upload_pulled(&self) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.last = Some(Instant::now());
        progress.busy = true;
    }

    /// 一块请求体已经交给引擎。
    pub(crate) fn upload_sent(&self) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.last = Some(Instant::now());
        progress.busy = false;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// 请求引擎读取下一块响应体。终止之后不再发出读取。
    pub(crate) fn read(&self, buf: BytesMut) {
        if !self.is_active() {
            return;
        }
        let request = self.lock_engine().request.clone();
        match request {
            Some(request) => request.read(buf),
            None => {
                warn!("body read before the engine request exists");
            }
        }
    }

    /// 标记本次传输因调用级超时而取消，必须在 `cancel` 之前调用。
    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }

    /// 取消导致的错误：调用级超时时带有超时标记。
    pub(crate) fn canceled_error(&self) -> Error {
        if self.timed_out.load(Ordering::Acquire) {
            Error::new_call_timeout()
        } else {
            Error::new_canceled()
        }
    }

    /// 取消传输：唤醒所有等待方，并把取消转发给引擎请求。
    pub(crate) fn cancel(&self) {
        if self.settle(CANCELED) {
            debug!("transfer canceled");
            self.stop_upload();
            self.cancel_engine();
            self.head.cancel();
            self.send(TransferEvent::Canceled);
        }
    }

    /// 以 `err` 终止传输并取消引擎请求。
    ///
    /// 响应头尚未交出时 `err` 交给等待响应头的一方，否则投递给消息体。
    pub(crate) fn abort(&self, err: Error) {
        if self.settle(FAILED) {
            debug!("transfer aborted: {}", err);
            self.stop_upload();
            self.cancel_engine();
            self.deliver(err);
        }
    }

    /// 消费方不再需要响应体。
    pub(crate) fn close(&self) {
        if self.settle(CLOSED) {
            trace!("transfer closed by consumer");
            self.stop_upload();
            self.head.cancel();
            self.cancel_engine();
        }
    }

    fn settle(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn deliver(&self, err: Error) {
        let err = Arc::new(err);
        if self.head.fail_shared(err.clone()) {
            return;
        }
        let err = Arc::try_unwrap(err).unwrap_or_else(|shared| Error::new_shared(&shared));
        self.send(TransferEvent::Failed(err));
    }

    fn send(&self, event: TransferEvent) {
        match self.events.try_send(event) {
            Ok(()) => (),
            Err(TrySendError::Full(_event)) => {
                warn!("transfer event dropped, channel full: {:?}", _event);
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("transfer event dropped, body is gone");
            }
        }
    }

    fn cancel_engine(&self) {
        let request = {
            let mut slot = self.lock_engine();
            slot.cancel_requested = true;
            slot.request.take()
        };
        if let Some(request) = request {
            if !self.engine_canceled.swap(true, Ordering::AcqRel) {
                request.cancel();
            }
        }
    }

    /// 引擎已经报告终止，不再需要它的请求句柄。
    fn release_engine(&self) {
        drop(self.lock_engine().request.take());
    }

    fn stop_upload(&self) {
        // 丢弃 Abort 即通知上传工作线程退出
        drop(self.upload.lock().unwrap_or_else(|e| e.into_inner()).take());
    }

    fn lock_engine(&self) -> MutexGuard<'_, EngineSlot> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 204 和 205 响应不能携带消息体。
fn check_no_content(info: &ResponseInfo) -> Option<Error> {
    if info.status != StatusCode::NO_CONTENT && info.status != StatusCode::RESET_CONTENT {
        return None;
    }
    match DeclaredLength::from_headers(&info.headers).and_then(DeclaredLength::into_opt) {
        Some(len) if len > 0 => {
            warn!("{} response with content-length {}", info.status, len);
            Some(Error::new_body_on_no_content(info.status, len))
        }
        _ => None,
    }
}

impl RequestCallback for Transfer {
    fn on_redirect_received(&self, info: &ResponseInfo, _location: &Uri) {
        if !self.is_active() {
            return;
        }
        if !self.policy.follow {
            debug!("not following redirect to {}", _location);
            if self.settle(CLOSED) {
                self.stop_upload();
                self.head.complete(Head {
                    info: info.clone(),
                    redirect: true,
                });
                self.cancel_engine();
            }
            return;
        }

        let followed = self.redirects.fetch_add(1, Ordering::AcqRel) + 1;
        if followed > self.policy.max {
            self.abort(Error::new_too_many_redirects(self.policy.max));
            return;
        }
        trace!("following redirect #{} to {}", followed, _location);
        let request = self.lock_engine().request.clone();
        if let Some(request) = request {
            request.follow_redirect();
        }
    }

    fn on_response_started(&self, info: &ResponseInfo) {
        trace!("response started: {}", info.status);
        if let Some(err) = check_no_content(info) {
            self.abort(err);
            return;
        }
        if !self.head.complete(Head {
            info: info.clone(),
            redirect: false,
        }) {
            trace!("response head arrived after the transfer settled");
        }
    }

    fn on_read_completed(&self, _info: &ResponseInfo, buf: BytesMut) {
        if self.is_active() {
            trace!("read completed: {} bytes", buf.len());
            self.send(TransferEvent::ChunkReady(buf.freeze()));
        } else {
            trace!("dropping {} bytes read after the transfer settled", buf.len());
        }
    }

    fn on_succeeded(&self, _info: &ResponseInfo) {
        if !self.settle(SUCCEEDED) {
            return;
        }
        trace!("transfer succeeded");
        self.stop_upload();
        self.release_engine();
        if self.head.is_done() {
            self.send(TransferEvent::Completed);
        } else {
            self.head.fail(Error::new_transport(
                "engine succeeded without starting a response".into(),
            ));
        }
    }

    fn on_failed(&self, _info: Option<&ResponseInfo>, cause: EngineError) {
        if !self.settle(FAILED) {
            trace!("engine failure after the transfer settled: {}", cause);
            return;
        }
        debug!("transfer failed: {}", cause);
        self.stop_upload();
        self.release_engine();
        self.deliver(Error::new_transport(cause));
    }

    fn on_canceled(&self, _info: Option<&ResponseInfo>) {
        if self.settle(CANCELED) {
            debug!("transfer canceled by the engine");
            self.stop_upload();
            self.release_engine();
            self.head.cancel();
            self.send(TransferEvent::Canceled);
        }
    }
}
