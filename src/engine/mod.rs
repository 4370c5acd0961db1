//! 外部传输引擎接口。
//!
//! 真正的网络传输（协议协商、连接池、缓存、DNS/TLS）由外部的原生引擎完成，
//! 本 crate 只消费下面这组 trait：
//!
//! - [`Engine::submit`] 创建一个尚未启动的引擎请求，返回 [`EngineRequest`] 句柄；
//! - 引擎在自己的线程上回调 [`RequestCallback`] 报告响应事件；
//! - 有请求体时，引擎通过 [`UploadDataProvider::read`] 逐块拉取数据，
//!   并通过 [`UploadDataSink`] 接收每次拉取的结果。
//!
//! 回调线程属于引擎，回调实现必须立即返回，不能阻塞。
//! 每个引擎请求都以且仅以一个终止回调结束：`on_succeeded`、`on_failed`
//! 或 `on_canceled`，之后不再有任何回调。

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::ext::Priority;

/// 引擎上报的失败原因。
pub type EngineError = Box<dyn StdError + Send + Sync>;

/// 原生传输引擎。
pub trait Engine: Send + Sync {
    /// 创建一个引擎请求。返回的请求在调用 [`EngineRequest::start`] 之前不会发送。
    fn submit(&self, params: SubmitParams) -> Result<Arc<dyn EngineRequest>, EngineError>;
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
    fn submit(&self, params: SubmitParams) -> Result<Arc<dyn EngineRequest>, EngineError> {
        (**self).submit(params)
    }
}

/// 提交给引擎的请求参数。
pub struct SubmitParams {
    /// 请求 URL。
    pub uri: Uri,
    /// 请求方法。
    pub method: Method,
    /// 请求头。
    pub headers: HeaderMap,
    /// 调度优先级提示。
    pub priority: Priority,
    /// 是否绕过引擎的缓存。
    pub disable_cache: bool,
    /// 请求体数据源，没有请求体时为 `None`。
    pub upload: Option<Arc<dyn UploadDataProvider>>,
    /// 接收该请求全部事件的回调。
    pub callback: Arc<dyn RequestCallback>,
}

impl fmt::Debug for SubmitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitParams")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("disable_cache", &self.disable_cache)
            .field("upload", &self.upload.as_ref().map(|u| u.length()))
            .finish()
    }
}

/// 一个进行中的引擎请求句柄。
///
/// 这是桥接层回调引擎的全部操作。
pub trait EngineRequest: Send + Sync {
    /// 开始发送请求。
    fn start(&self);

    /// 请求引擎读取下一块响应体数据到 `buf`（最多 `buf.capacity()` 字节）。
    ///
    /// 结果通过 [`RequestCallback::on_read_completed`] 或一个终止回调返回。
    /// 同一时刻至多有一个未完成的读取。
    fn read(&self, buf: BytesMut);

    /// 跟随最近一次 [`RequestCallback::on_redirect_received`] 报告的重定向。
    fn follow_redirect(&self);

    /// 取消请求。引擎随后以 [`RequestCallback::on_canceled`] 结束该请求。
    fn cancel(&self);
}

/// 引擎在自己的线程上调用的响应事件回调。
pub trait RequestCallback: Send + Sync {
    /// 收到一个重定向响应。必须调用 `follow_redirect` 或 `cancel` 之一。
    fn on_redirect_received(&self, info: &ResponseInfo, location: &Uri);

    /// 响应头已到达。
    fn on_response_started(&self, info: &ResponseInfo);

    /// 一次 `read` 完成；`buf` 中是读到的数据。
    fn on_read_completed(&self, info: &ResponseInfo, buf: BytesMut);

    /// 请求成功完成，响应体已全部读完。
    fn on_succeeded(&self, info: &ResponseInfo);

    /// 请求失败。响应头可能尚未到达。
    fn on_failed(&self, info: Option<&ResponseInfo>, cause: EngineError);

    /// 请求已被取消。
    fn on_canceled(&self, info: Option<&ResponseInfo>);
}

/// 引擎给出的响应元数据。
#[derive(Clone, Debug)]
pub struct ResponseInfo {
    /// 状态码。
    pub status: StatusCode,
    /// 响应头。
    pub headers: HeaderMap,
    /// 协商得到的协议，例如 `"h2"`、`"h3"`、`"http/1.1"`。
    pub negotiated_protocol: String,
    /// 响应是否来自引擎缓存。
    pub was_cached: bool,
    /// 请求经过的 URL 链，第一个是原始 URL，最后一个是当前 URL。
    pub url_chain: Vec<Uri>,
}

/// 请求体数据源，由引擎按需拉取。
pub trait UploadDataProvider: Send + Sync {
    /// 请求体长度；`None` 表示长度未知（分块上传）。
    fn length(&self) -> Option<u64>;

    /// 引擎请求下一块数据。实现者把数据写入 `buf`，
    /// 然后调用 `sink.on_read_succeeded` 或 `sink.on_read_error` 恰好一次。
    fn read(&self, sink: Arc<dyn UploadDataSink>, buf: BytesMut);

    /// 引擎请求从头重放请求体（例如重定向之后）。
    fn rewind(&self, sink: Arc<dyn UploadDataSink>);
}

/// 引擎提供的上传结果接收端。
pub trait UploadDataSink: Send + Sync {
    /// 一次读取成功。`final_chunk` 只在长度未知时有意义，表示请求体结束。
    fn on_read_succeeded(&self, buf: BytesMut, final_chunk: bool);

    /// 一次读取失败，引擎将以 `on_failed` 结束请求。
    fn on_read_error(&self, cause: EngineError);

    /// 回绕成功。
    fn on_rewind_succeeded(&self);

    /// 回绕失败，引擎将以 `on_failed` 结束请求。
    fn on_rewind_error(&self, cause: EngineError);
}
