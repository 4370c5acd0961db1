//! 桥接层与引擎之间的协议适配。
//!
//! - `callback`：实现引擎的请求回调，维护一次传输的共享状态与重定向策略；
//! - `upload`：把应用的请求体写入函数接到引擎的上传拉取接口上。

pub(crate) mod callback;
pub(crate) mod upload;

pub(crate) use self::callback::{Head, RedirectPolicy, Transfer};
