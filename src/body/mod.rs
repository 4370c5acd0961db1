//! HTTP 请求和响应的消息体模块
//!
//! 两个方向各有一个具体类型：
//!
//! - **[`Outgoing`]**：请求体。可以为空、是一段完整的字节，或者是一个写入函数，
//!   在引擎拉取时把数据写入 [`Sink`]。
//! - **[`Incoming`]**：响应体。一个阻塞的拉取流，数据在被读取时才向引擎请求，
//!   从而对传输施加背压。
//!
//! 两者都不要求一次性缓冲整个消息体。

pub use bytes::Bytes;

pub use self::incoming::Incoming;
pub use self::outgoing::Outgoing;
pub use crate::proto::upload::Sink;

pub(crate) use self::incoming::{End, TransferEvent};
pub(crate) use self::length::DeclaredLength;
pub(crate) use self::outgoing::Writer;

mod incoming;
mod length;
mod outgoing;

fn _assert_send_sync() {
    fn _assert_send<T: Send>() {}
    fn _assert_sync<T: Sync>() {}

    _assert_send::<Incoming>();
    _assert_sync::<Incoming>();
    _assert_send::<Outgoing>();
}
