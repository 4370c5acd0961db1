//! 错误与结果类型模块
//!
//! 本模块定义了 crate 的核心错误类型 [`Error`]。调用层可能遇到的所有错误——
//! 引擎上报的传输失败、显式取消、读写超时、请求体长度违规、调用方的编程错误——
//! 都被统一封装在 `Error` 中，调用方通过 `is_*` 方法判断错误类别。
//!
//! - `Error` 使用 `Box<ErrorImpl>` 包装内部实现，栈上仅占一个指针宽度。
//! - 通过 `std::error::Error::source()` 暴露错误链，引擎给出的原始原因保留在链中。
//! - 调用级超时通过错误链中的 [`TimedOut`] 哨兵识别，与显式取消区分。

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// 本 crate 方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误原因。
type Cause = Box<dyn StdError + Send + Sync>;

/// 表示执行一次 HTTP 调用时可能发生的错误。
///
/// # 格式化
///
/// `Display` 实现只打印当前层级的错误描述，不包含 source 链。
/// 要打印全部信息，请遍历 `Error::source()`。
///
/// 错误消息的具体措辞是未指定的，**不能依赖它**。
///
/// # Source
///
/// 引擎上报的失败原因会作为 source 保留。source 的具体类型来自引擎实现，
/// 不属于本 crate 的稳定 API。
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类枚举，仅供 crate 内部使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Kind {
    /// 调用或传输被取消（显式取消，或由调用级超时触发）。
    Canceled,
    /// 引擎上报的传输失败。
    Transport,
    /// 读取响应体时，在读超时窗口内没有收到任何引擎事件。
    ReadTimeout,
    /// 流式上传时，在写超时窗口内引擎没有拉取数据。
    WriteTimeout,
    /// 消息违反了 HTTP 语义。
    Protocol(Protocol),
    /// 调用方代码引起的错误。
    User(User),
    /// 上传请求体时，应用的写入函数返回了错误。
    BodyWrite,
    /// 响应体已经关闭或已因失败而终止。
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Protocol {
    /// 写入的字节数超过了声明的 content-length。
    BodyTooLong,
    /// 写入函数在达到声明的 content-length 之前就结束了。
    BodyTooShort,
    /// 204/205 响应携带了非零的 content-length。
    BodyOnNoContent,
    /// 重定向次数超过上限。
    TooManyRedirects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum User {
    /// 同一个 `Call` 被执行了第二次。
    AlreadyExecuted,
    /// 拦截器在一次调用中多次调用了 `Chain::proceed`。
    ProceedTwice,
    /// 引擎要求回绕一个流式请求体。
    RewindUnsupported,
    /// 流式请求体的写入函数 panic 了。
    BodyWriterPanicked,
}

/// 哨兵类型，标识错误由调用级超时引起。
#[derive(Debug)]
pub(super) struct TimedOut;

/// 多个读取方共享同一个失败结果时使用的包装。
///
/// `Error` 不可 `Clone`，`SingleSlot` 在 `get` 时用它把存储的错误
/// 包装成一个新的 `Error` 返回给每一个读取方。
struct Shared(Arc<Error>);

impl Error {
    /// 如果这是一个取消错误（包括由调用级超时引起的取消），返回 `true`。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 如果这是引擎上报的传输失败，返回 `true`。
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }

    /// 如果错误由超时引起，返回 `true`。
    ///
    /// 读超时、写超时以及调用级超时都算在内。
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::ReadTimeout | Kind::WriteTimeout) {
            return true;
        }
        self.find_source::<TimedOut>().is_some()
    }

    /// 如果这是响应体的读超时，返回 `true`。
    pub fn is_read_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ReadTimeout)
    }

    /// 如果消息违反了 HTTP 语义（长度不符、重定向过多等），返回 `true`。
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol(_))
    }

    /// 如果请求体写入的字节多于声明长度，返回 `true`。
    pub fn is_body_too_long(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol(Protocol::BodyTooLong))
    }

    /// 如果请求体写入的字节少于声明长度，返回 `true`。
    pub fn is_body_too_short(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol(Protocol::BodyTooShort))
    }

    /// 如果此错误由调用方代码引起，返回 `true`。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 如果这是对同一个 `Call` 的重复执行，返回 `true`。
    pub fn is_already_executed(&self) -> bool {
        matches!(self.inner.kind, Kind::User(User::AlreadyExecuted))
    }

    /// 如果响应体已关闭，返回 `true`。
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    /// 如果请求体的写入函数失败，返回 `true`。
    pub fn is_body_write(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyWrite)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    #[cfg(test)]
    pub(super) fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// 在错误的 source 链中查找特定类型的错误。
    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // else
        None
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    /// 调用级超时：仍是取消，但错误链中带有 `TimedOut`。
    pub(super) fn new_call_timeout() -> Error {
        Error::new_canceled().with(TimedOut)
    }

    /// 把引擎上报的失败原因转换为 `Error`。
    ///
    /// 引擎可能原样回传本 crate 交给它的错误（例如上传端的长度违规），
    /// 此时直接还原，不再包一层 `Transport`。
    pub(super) fn new_transport(cause: Cause) -> Error {
        match cause.downcast::<Error>() {
            Ok(own) => *own,
            Err(cause) => Error::new(Kind::Transport).with(cause),
        }
    }

    pub(super) fn new_read_timeout() -> Error {
        Error::new(Kind::ReadTimeout)
    }

    pub(super) fn new_write_timeout() -> Error {
        Error::new(Kind::WriteTimeout)
    }

    pub(super) fn new_body_too_long(declared: u64) -> Error {
        Error::new(Kind::Protocol(Protocol::BodyTooLong))
            .with(format!("declared content-length was {}", declared))
    }

    pub(super) fn new_body_too_short(declared: u64, written: u64) -> Error {
        Error::new(Kind::Protocol(Protocol::BodyTooShort)).with(format!(
            "expected {} bytes but the body writer produced {}",
            declared, written
        ))
    }

    pub(super) fn new_body_on_no_content(status: http::StatusCode, len: u64) -> Error {
        Error::new(Kind::Protocol(Protocol::BodyOnNoContent)).with(format!(
            "HTTP {} had non-zero content-length: {}",
            status.as_u16(),
            len
        ))
    }

    pub(super) fn new_too_many_redirects(max: usize) -> Error {
        Error::new(Kind::Protocol(Protocol::TooManyRedirects))
            .with(format!("followed {} redirects", max))
    }

    pub(super) fn new_body_write<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    pub(super) fn new_closed() -> Error {
        Error::new(Kind::Closed)
    }

    fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(super) fn new_user_already_executed() -> Error {
        Error::new_user(User::AlreadyExecuted)
    }

    pub(super) fn new_user_proceed_twice() -> Error {
        Error::new_user(User::ProceedTwice)
    }

    pub(super) fn new_user_rewind_unsupported() -> Error {
        Error::new_user(User::RewindUnsupported)
    }

    pub(super) fn new_user_body_writer_panicked() -> Error {
        Error::new_user(User::BodyWriterPanicked)
    }

    /// 为共享的失败结果构造一个新的 `Error`，保留原始的分类。
    pub(super) fn new_shared(shared: &Arc<Error>) -> Error {
        Error::new(shared.inner.kind).with(Shared(shared.clone()))
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Canceled => "operation was canceled",
            Kind::Transport => "transport engine reported a failure",
            Kind::ReadTimeout => "timed out reading the response body",
            Kind::WriteTimeout => "timed out waiting for the engine to pull the request body",
            Kind::Protocol(Protocol::BodyTooLong) => "request body longer than declared length",
            Kind::Protocol(Protocol::BodyTooShort) => "request body shorter than declared length",
            Kind::Protocol(Protocol::BodyOnNoContent) => {
                "response with a no-content status carried a body"
            }
            Kind::Protocol(Protocol::TooManyRedirects) => "too many redirects",
            Kind::User(User::AlreadyExecuted) => "call was already executed",
            Kind::User(User::ProceedTwice) => "interceptor called proceed more than once",
            Kind::User(User::RewindUnsupported) => "streaming request body cannot be rewound",
            Kind::User(User::BodyWriterPanicked) => "request body writer panicked",
            Kind::BodyWrite => "error from user's request body writer",
            Kind::Closed => "response body closed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("callbridge::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

// ===== impl TimedOut ====

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("call timed out")
    }
}

impl StdError for TimedOut {}

// ===== impl Shared ====

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Shared {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}
