//! 单元测试用的引擎替身。
//!
//! - [`RecordingRequest`]：只记录调用次数的引擎请求，由测试直接驱动回调；
//! - [`RecordingSink`]：记录上传拉取结果的 `UploadDataSink`；
//! - [`MockEngine`]：按脚本在调用线程上同步回调的引擎，供客户端测试使用。

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::engine::{
    Engine, EngineError, EngineRequest, RequestCallback, ResponseInfo, SubmitParams,
    UploadDataProvider, UploadDataSink,
};
use crate::ext::Priority;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn info(status: u16) -> ResponseInfo {
    ResponseInfo {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        negotiated_protocol: "h2".to_owned(),
        was_cached: false,
        url_chain: vec![Uri::from_static("http://mock.test/")],
    }
}

// ===== RecordingRequest =====

#[derive(Default)]
pub(crate) struct RecordingRequest {
    starts: AtomicUsize,
    reads: AtomicUsize,
    follows: AtomicUsize,
    cancels: AtomicUsize,
}

impl RecordingRequest {
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn redirects_followed(&self) -> usize {
        self.follows.load(Ordering::SeqCst)
    }
}

impl EngineRequest for RecordingRequest {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self, _buf: BytesMut) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn follow_redirect(&self) {
        self.follows.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== RecordingSink =====

/// 一次上传拉取（或回绕）的结果。
pub(crate) enum PullResult {
    Data(Vec<u8>, bool),
    Rewound,
    Error(crate::Error),
    RewindError(crate::Error),
}

impl PartialEq for PullResult {
    fn eq(&self, other: &PullResult) -> bool {
        match (self, other) {
            (PullResult::Data(a, fa), PullResult::Data(b, fb)) => a == b && fa == fb,
            (PullResult::Rewound, PullResult::Rewound) => true,
            // 错误只用 matches! 比较
            _ => false,
        }
    }
}

impl fmt::Debug for PullResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullResult::Data(data, last) => f
                .debug_tuple("Data")
                .field(&String::from_utf8_lossy(data))
                .field(last)
                .finish(),
            PullResult::Rewound => f.write_str("Rewound"),
            PullResult::Error(err) => f.debug_tuple("Error").field(err).finish(),
            PullResult::RewindError(err) => f.debug_tuple("RewindError").field(err).finish(),
        }
    }
}

pub(crate) struct RecordingSink {
    tx: Sender<PullResult>,
    rx: Receiver<PullResult>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<RecordingSink> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(RecordingSink { tx, rx })
    }

    pub(crate) fn next(&self, wait: Duration) -> PullResult {
        self.rx
            .recv_timeout(wait)
            .expect("upload provider never answered")
    }
}

impl UploadDataSink for RecordingSink {
    fn on_read_succeeded(&self, buf: BytesMut, final_chunk: bool) {
        let _ = self.tx.send(PullResult::Data(buf.to_vec(), final_chunk));
    }

    fn on_read_error(&self, cause: EngineError) {
        let _ = self.tx.send(PullResult::Error(crate::Error::new_transport(cause)));
    }

    fn on_rewind_succeeded(&self) {
        let _ = self.tx.send(PullResult::Rewound);
    }

    fn on_rewind_error(&self, cause: EngineError) {
        let _ = self
            .tx
            .send(PullResult::RewindError(crate::Error::new_transport(cause)));
    }
}

// ===== MockEngine =====

/// 脚本中的一步。
///
/// `start` 和 `follow_redirect` 执行到下一个响应头事件为止，
/// 每次 `read` 执行一个消息体事件。
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// 拉取整个请求体，拉取失败时以 `on_failed` 结束。
    DrainUpload,
    Redirect(u16, &'static str),
    Start(u16),
    StartWith(ResponseInfo),
    Chunk(&'static [u8]),
    Succeed,
    Fail(&'static str),
    /// 什么也不做：响应头或数据永远不会到达。
    Hang,
}

#[derive(Default)]
pub(crate) struct MockEngine {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    submitted: Mutex<Vec<Arc<MockRequest>>>,
}

impl MockEngine {
    pub(crate) fn new() -> Arc<MockEngine> {
        Arc::new(MockEngine::default())
    }

    /// 为下一次提交准备脚本。没有脚本的提交被拒绝。
    pub(crate) fn script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub(crate) fn submitted(&self) -> Vec<Arc<MockRequest>> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn last(&self) -> Arc<MockRequest> {
        self.submitted
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing submitted")
    }
}

impl Engine for MockEngine {
    fn submit(&self, params: SubmitParams) -> Result<Arc<dyn EngineRequest>, EngineError> {
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or("mock engine has no script")?;
        let request = Arc::new(MockRequest {
            uri: params.uri,
            method: params.method,
            headers: params.headers,
            priority: params.priority,
            disable_cache: params.disable_cache,
            upload: params.upload,
            callback: params.callback,
            steps: Mutex::new(steps.into()),
            info: Mutex::new(info(200)),
            done: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
        });
        self.submitted.lock().unwrap().push(request.clone());
        Ok(request)
    }
}

pub(crate) struct MockRequest {
    pub(crate) uri: Uri,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) priority: Priority,
    pub(crate) disable_cache: bool,
    upload: Option<Arc<dyn UploadDataProvider>>,
    callback: Arc<dyn RequestCallback>,
    steps: Mutex<VecDeque<Step>>,
    info: Mutex<ResponseInfo>,
    done: AtomicBool,
    starts: AtomicUsize,
    reads: AtomicUsize,
    cancels: AtomicUsize,
    uploaded: Mutex<Vec<u8>>,
}

impl MockRequest {
    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn uploaded(&self) -> Vec<u8> {
        self.uploaded.lock().unwrap().clone()
    }

    fn pop(&self) -> Option<Step> {
        self.steps.lock().unwrap().pop_front()
    }

    fn info(&self) -> ResponseInfo {
        self.info.lock().unwrap().clone()
    }

    fn terminate(&self) -> bool {
        !self.done.swap(true, Ordering::SeqCst)
    }

    /// 执行到下一个响应头事件。
    fn advance_head(&self) {
        while let Some(step) = self.pop() {
            if self.done.load(Ordering::SeqCst) {
                return;
            }
            match step {
                Step::DrainUpload => {
                    if !self.drain_upload() {
                        return;
                    }
                }
                Step::Redirect(status, location) => {
                    let location = Uri::from_static(location);
                    let redirect = {
                        let mut info = self.info.lock().unwrap();
                        let mut redirect = info.clone();
                        redirect.status = StatusCode::from_u16(status).unwrap();
                        info.url_chain.push(location.clone());
                        redirect
                    };
                    self.callback.on_redirect_received(&redirect, &location);
                    return;
                }
                Step::Start(status) => {
                    let info = {
                        let mut info = self.info.lock().unwrap();
                        info.status = StatusCode::from_u16(status).unwrap();
                        info.clone()
                    };
                    self.callback.on_response_started(&info);
                    return;
                }
                Step::StartWith(start) => {
                    let mut start = start;
                    {
                        let mut info = self.info.lock().unwrap();
                        start.url_chain = info.url_chain.clone();
                        *info = start.clone();
                    }
                    self.callback.on_response_started(&start);
                    return;
                }
                Step::Fail(msg) => {
                    if self.terminate() {
                        self.callback.on_failed(None, msg.into());
                    }
                    return;
                }
                Step::Hang => return,
                other => panic!("{:?} before the response started", other),
            }
        }
    }

    fn drain_upload(&self) -> bool {
        let upload = match self.upload {
            Some(ref upload) => upload.clone(),
            None => return true,
        };
        let sink = RecordingSink::new();
        let mut total = 0;
        loop {
            upload.read(sink.clone(), BytesMut::with_capacity(8));
            match sink.next(WAIT) {
                PullResult::Data(data, last) => {
                    total += data.len() as u64;
                    self.uploaded.lock().unwrap().extend_from_slice(&data);
                    if last || upload.length() == Some(total) {
                        return true;
                    }
                }
                PullResult::Error(err) => {
                    if self.terminate() {
                        self.callback.on_failed(None, Box::new(err));
                    }
                    return false;
                }
                other => panic!("unexpected upload result {:?}", other),
            }
        }
    }
}

impl EngineRequest for MockRequest {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.advance_head();
    }

    fn read(&self, mut buf: BytesMut) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        let info = self.info();
        match self.pop() {
            Some(Step::Chunk(data)) => {
                buf.extend_from_slice(data);
                self.callback.on_read_completed(&info, buf);
            }
            Some(Step::Succeed) => {
                if self.terminate() {
                    self.callback.on_succeeded(&info);
                }
            }
            Some(Step::Fail(msg)) => {
                if self.terminate() {
                    self.callback.on_failed(Some(&info), msg.into());
                }
            }
            Some(Step::Hang) | None => (),
            Some(other) => panic!("{:?} while reading the body", other),
        }
    }

    fn follow_redirect(&self) {
        self.advance_head();
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.terminate() {
            let info = self.info();
            self.callback.on_canceled(Some(&info));
        }
    }
}
