//! HTTP 消息扩展模块。
//!
//! 标准头部和消息体之外的元数据通过 [`http::Extensions`] 附加在请求和响应上：
//!
//! - 请求侧：[`Priority`]（调度优先级提示）与 [`DisableCache`]（绕过引擎缓存），
//!   由最终环节在提交给引擎时读取；
//! - 响应侧：[`TransportInfo`]，记录协商协议、是否命中缓存以及经过的 URL 链。
//!
//! 请求扩展映射表同时充当调用方的不透明标签表：任何 `Clone + Send + Sync + 'static`
//! 的值都可以放进去，拦截器可以读取。
//!
//! ```rust
//! use callbridge::ext::{DisableCache, Priority};
//!
//! let mut req = http::Request::new(callbridge::body::Outgoing::empty());
//! req.extensions_mut().insert(Priority::Highest);
//! req.extensions_mut().insert(DisableCache);
//! ```

use http::Uri;

/// 请求的调度优先级提示。默认为 [`Priority::Medium`]。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// 空闲时才处理。
    Idle,
    /// 最低。
    Lowest,
    /// 低。
    Low,
    /// 中（默认）。
    #[default]
    Medium,
    /// 最高。
    Highest,
}

impl Priority {
    pub(crate) fn of<B>(req: &http::Request<B>) -> Priority {
        req.extensions().get::<Priority>().copied().unwrap_or_default()
    }
}

/// 请求扩展：要求引擎不使用缓存。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisableCache;

impl DisableCache {
    pub(crate) fn is_set<B>(req: &http::Request<B>) -> bool {
        req.extensions().get::<DisableCache>().is_some()
    }
}

/// 响应扩展：引擎报告的传输元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportInfo {
    negotiated_protocol: String,
    was_cached: bool,
    url_chain: Vec<Uri>,
}

impl TransportInfo {
    pub(crate) fn new(info: &crate::engine::ResponseInfo) -> TransportInfo {
        TransportInfo {
            negotiated_protocol: info.negotiated_protocol.clone(),
            was_cached: info.was_cached,
            url_chain: info.url_chain.clone(),
        }
    }

    /// 协商得到的协议，例如 `"h2"`。
    pub fn negotiated_protocol(&self) -> &str {
        &self.negotiated_protocol
    }

    /// 响应是否来自引擎缓存。
    pub fn was_cached(&self) -> bool {
        self.was_cached
    }

    /// 请求经过的 URL 链，第一个是原始 URL。
    pub fn url_chain(&self) -> &[Uri] {
        &self.url_chain
    }
}
