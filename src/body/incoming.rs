//! `Incoming` 响应体的实现模块
//!
//! `Incoming` 把引擎线程推送的事件（数据块、完成、失败、取消）转换为
//! 调用线程上的阻塞拉取流。
//!
//! 每次拉取的过程：
//!
//! 1. 如果流已终止，直接返回结束或对应的错误；
//! 2. 否则向引擎发出一次读取（`EngineRequest::read`），
//!    然后在事件通道上至多阻塞读超时那么久；
//! 3. 超时则取消引擎请求并返回 `ReadTimeout`，之后流不可恢复；
//!    收到事件则按事件类型返回数据、结束或错误。
//!
//! `Incoming` 内部通过 `Kind` 枚举区分数据来源：
//! - 空 body（`Empty`）
//! - 内存中的完整数据（`Full`），供拦截器合成响应使用
//! - 引擎桥接（`Bridge`）
//! - 已关闭（`Closed`）

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::proto::Transfer;
use crate::Error;

/// `bytes()` 每次拉取的大小。
const READ_CHUNK: usize = 32 * 1024;

/// 从引擎接收到的响应体，一个阻塞的 `Bytes` 流。
///
/// 用户通常不直接构造它：`Call::execute` 返回的响应中带有它。
/// 拦截器合成响应时可以使用 [`Incoming::empty`] 或 [`Incoming::from_bytes`]。
///
/// 实现了 [`io::Read`]。丢弃或 [`close`](Incoming::close) 一个尚未读完的
/// `Incoming` 会取消对应的引擎请求。
///
/// # 示例
///
/// ```
/// use std::io::Read;
/// use callbridge::body::Incoming;
///
/// let mut body = Incoming::from_bytes("hello");
/// let mut text = String::new();
/// body.read_to_string(&mut text).unwrap();
/// assert_eq!(text, "hello");
/// ```
#[must_use = "streams do nothing unless read"]
pub struct Incoming {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Bytes),
    Bridge(Bridge),
    Closed,
}

/// 引擎线程投递给响应体的事件。
///
/// 零个或多个 `ChunkReady` 之后恰好一个终止事件，终止之后没有任何事件。
#[derive(Debug)]
pub(crate) enum TransferEvent {
    ChunkReady(Bytes),
    Completed,
    Failed(Error),
    Canceled,
}

/// 响应体如何结束，交给调用的生命周期处理。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum End {
    Succeeded,
    Failed,
    Canceled,
    /// 消费方在读完之前关闭或丢弃了响应体。
    Closed,
}

pub(crate) type OnEnd = Box<dyn FnOnce(End) + Send + Sync>;

struct Bridge {
    transfer: Arc<Transfer>,
    events: Receiver<TransferEvent>,
    read_timeout: Option<Duration>,
    /// 引擎返回的数据块多于本次请求的字节数时，多出的部分留到下一次读取。
    leftover: Bytes,
    state: State,
    on_end: Option<OnEnd>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Eof,
    Failed,
    Canceled,
}

impl Incoming {
    fn new(kind: Kind) -> Incoming {
        Incoming { kind }
    }

    /// 创建一个空的响应体。
    pub fn empty() -> Incoming {
        Incoming::new(Kind::Empty)
    }

    /// 用内存中的数据创建响应体。
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Incoming {
        Incoming::new(Kind::Full(bytes.into()))
    }

    pub(crate) fn bridge(
        transfer: Arc<Transfer>,
        events: Receiver<TransferEvent>,
        read_timeout: Option<Duration>,
    ) -> Incoming {
        Incoming::new(Kind::Bridge(Bridge {
            transfer,
            events,
            read_timeout,
            leftover: Bytes::new(),
            state: State::Open,
            on_end: None,
        }))
    }

    /// 读取下一块数据，至多 `max` 字节。
    ///
    /// 流结束时返回 `Ok(None)`。每次调用至多向引擎发出一次读取，
    /// 并至多阻塞读超时那么久。`max` 为 0 时不读取：
    /// 流尚未结束则立即返回一个空数据块。
    ///
    /// # Errors
    ///
    /// - 引擎上报失败：传输错误，source 中是引擎给出的原因；
    /// - 调用被取消：取消错误（调用级超时时 `is_timeout()` 也为真）；
    /// - 读超时：`is_read_timeout()`，引擎请求随之被取消；
    /// - 流已关闭或已经因为失败终止：`is_closed()`。
    pub fn chunk(&mut self, max: usize) -> crate::Result<Option<Bytes>> {
        if max == 0 {
            return match self.kind {
                Kind::Closed => Err(Error::new_closed()),
                _ if self.is_end_stream() => Ok(None),
                _ => Ok(Some(Bytes::new())),
            };
        }
        match self.kind {
            Kind::Empty => Ok(None),
            Kind::Full(ref mut bytes) => {
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    let n = max.min(bytes.len());
                    Ok(Some(bytes.split_to(n)))
                }
            }
            Kind::Bridge(ref mut bridge) => bridge.chunk(max),
            Kind::Closed => Err(Error::new_closed()),
        }
    }

    /// 读取剩余的全部数据。
    pub fn bytes(&mut self) -> crate::Result<Bytes> {
        if let Kind::Full(ref mut bytes) = self.kind {
            return Ok(std::mem::take(bytes));
        }
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk(READ_CHUNK)? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    /// 关闭响应体。尚未读完时取消引擎请求。可以重复调用。
    ///
    /// 关闭之后的读取返回 `is_closed()` 错误。
    pub fn close(&mut self) {
        // 丢弃 Bridge 时由它的 Drop 负责取消
        self.kind = Kind::Closed;
    }

    /// 如果已经没有更多数据可读，返回 `true`。
    pub fn is_end_stream(&self) -> bool {
        match self.kind {
            Kind::Empty | Kind::Closed => true,
            Kind::Full(ref bytes) => bytes.is_empty(),
            Kind::Bridge(ref bridge) => bridge.state != State::Open && bridge.leftover.is_empty(),
        }
    }

    /// 登记响应体结束时的回调。已经结束的响应体立即回调。
    pub(crate) fn on_end(&mut self, f: OnEnd) {
        match self.kind {
            Kind::Bridge(ref mut bridge) if bridge.state == State::Open => {
                bridge.on_end = Some(f);
            }
            Kind::Bridge(ref bridge) => f(bridge.state.into()),
            Kind::Empty | Kind::Full(_) => f(End::Succeeded),
            Kind::Closed => f(End::Closed),
        }
    }
}

impl Default for Incoming {
    fn default() -> Incoming {
        Incoming::empty()
    }
}

impl io::Read for Incoming {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.chunk(buf.len()) {
            Ok(Some(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Ok(None) => Ok(0),
            Err(err) => {
                let kind = if err.is_timeout() {
                    io::ErrorKind::TimedOut
                } else if err.is_canceled() {
                    io::ErrorKind::ConnectionAborted
                } else {
                    io::ErrorKind::Other
                };
                Err(io::Error::new(kind, err))
            }
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Streaming;
        #[derive(Debug)]
        struct Empty;
        #[derive(Debug)]
        struct Closed;

        let mut builder = f.debug_tuple("Incoming");
        match self.kind {
            Kind::Empty => builder.field(&Empty),
            Kind::Full(ref bytes) => builder.field(bytes),
            Kind::Bridge(_) => builder.field(&Streaming),
            Kind::Closed => builder.field(&Closed),
        };

        builder.finish()
    }
}

// ===== impl Bridge =====

impl Bridge {
    fn chunk(&mut self, max: usize) -> crate::Result<Option<Bytes>> {
        if !self.leftover.is_empty() {
            let n = max.min(self.leftover.len());
            return Ok(Some(self.leftover.split_to(n)));
        }
        match self.state {
            State::Open => (),
            State::Eof => return Ok(None),
            State::Failed => return Err(Error::new_closed()),
            State::Canceled => return Err(self.transfer.canceled_error()),
        }

        loop {
            self.transfer.read(BytesMut::with_capacity(max));
            let event = match self.read_timeout {
                Some(timeout) => match self.events.recv_timeout(timeout) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("no body data within {:?}", timeout);
                        self.transfer.abort(Error::new_read_timeout());
                        self.end(State::Failed);
                        return Err(Error::new_read_timeout());
                    }
                    Err(RecvTimeoutError::Disconnected) => TransferEvent::Canceled,
                },
                None => self.events.recv().unwrap_or(TransferEvent::Canceled),
            };

            match event {
                TransferEvent::ChunkReady(mut chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if chunk.len() > max {
                        self.leftover = chunk.split_off(max);
                    }
                    return Ok(Some(chunk));
                }
                TransferEvent::Completed => {
                    self.end(State::Eof);
                    return Ok(None);
                }
                TransferEvent::Failed(err) => {
                    self.end(State::Failed);
                    return Err(err);
                }
                TransferEvent::Canceled => {
                    self.end(State::Canceled);
                    return Err(self.transfer.canceled_error());
                }
            }
        }
    }

    fn end(&mut self, state: State) {
        self.state = state;
        if let Some(on_end) = self.on_end.take() {
            on_end(state.into());
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.state == State::Open {
            trace!("body dropped before the end of the stream");
            self.transfer.close();
            self.state = State::Failed;
            if let Some(on_end) = self.on_end.take() {
                on_end(End::Closed);
            }
        }
    }
}

impl From<State> for End {
    fn from(state: State) -> End {
        match state {
            State::Open | State::Eof => End::Succeeded,
            State::Failed => End::Failed,
            State::Canceled => End::Canceled,
        }
    }
}
