use std::borrow::Cow;
use std::fmt;
use std::io;

use bytes::Bytes;

use super::DeclaredLength;
use crate::proto::upload::{Parts, Sink};

/// 流式请求体的写入函数。
pub(crate) type Writer = Box<dyn FnOnce(&mut Sink<'_>) -> io::Result<()> + Send>;

/// 请求体。
///
/// 三种形态：
///
/// - 空：没有请求体；
/// - 完整：一段已在内存中的字节，支持引擎回绕（例如 307 重定向后重发）；
/// - 流式：一个写入函数，在需要时向 [`Sink`] 写出请求体。
///
/// # 示例
///
/// ```
/// use std::io::Write;
/// use callbridge::body::Outgoing;
///
/// let small = Outgoing::from("name=value");
/// let large = Outgoing::streaming(None, |sink| {
///     for _ in 0..4 {
///         sink.write_all(b"chunk")?;
///     }
///     Ok(())
/// });
/// # drop((small, large));
/// ```
#[must_use = "bodies do nothing unless sent"]
pub struct Outgoing {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Bytes),
    Streaming { length: DeclaredLength, writer: Writer },
}

impl Outgoing {
    /// 创建一个空的请求体。
    #[inline]
    pub fn empty() -> Outgoing {
        Outgoing { kind: Kind::Empty }
    }

    /// 用一段完整的字节创建请求体。
    pub fn full(bytes: impl Into<Bytes>) -> Outgoing {
        Outgoing {
            kind: Kind::Full(bytes.into()),
        }
    }

    /// 创建一个流式请求体。
    ///
    /// `length` 是声明的长度，`None` 表示未知（分块上传）。
    /// 声明了长度时，写入函数必须恰好写出这么多字节：
    /// 多写一个字节，`write` 返回错误，调用以"请求体过长"失败；
    /// 少写则调用以"请求体过短"失败。
    ///
    /// 声明长度不超过 1 MiB 的请求体会在提交前被完整缓存，其余情况下
    /// 写入函数运行在客户端执行器的工作线程上，`write` 会阻塞到引擎拉取数据。
    pub fn streaming<F>(length: Option<u64>, writer: F) -> Outgoing
    where
        F: FnOnce(&mut Sink<'_>) -> io::Result<()> + Send + 'static,
    {
        Outgoing {
            kind: Kind::Streaming {
                length: DeclaredLength::from(length),
                writer: Box::new(writer),
            },
        }
    }

    /// 声明的长度。流式且长度未知时返回 `None`。
    pub fn length(&self) -> Option<u64> {
        match self.kind {
            Kind::Empty => Some(0),
            Kind::Full(ref bytes) => Some(bytes.len() as u64),
            Kind::Streaming { length, .. } => length.into_opt(),
        }
    }

    /// 是否为空请求体。
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    pub(crate) fn into_parts(self) -> Parts {
        match self.kind {
            Kind::Empty => Parts::Empty,
            Kind::Full(bytes) => Parts::Full(bytes),
            Kind::Streaming { length, writer } => Parts::Streaming(length, writer),
        }
    }
}

impl Default for Outgoing {
    fn default() -> Outgoing {
        Outgoing::empty()
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Empty => f.debug_tuple("Outgoing").field(&"empty").finish(),
            Kind::Full(ref bytes) => f.debug_tuple("Outgoing").field(bytes).finish(),
            Kind::Streaming { length, .. } => f
                .debug_struct("Outgoing")
                .field("streaming", &length)
                .finish(),
        }
    }
}

impl From<Bytes> for Outgoing {
    fn from(bytes: Bytes) -> Outgoing {
        Outgoing::full(bytes)
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(vec: Vec<u8>) -> Outgoing {
        Outgoing::full(vec)
    }
}

impl From<&'static [u8]> for Outgoing {
    fn from(slice: &'static [u8]) -> Outgoing {
        Outgoing::full(slice)
    }
}

impl From<&'static str> for Outgoing {
    fn from(s: &'static str) -> Outgoing {
        Outgoing::full(s)
    }
}

impl From<String> for Outgoing {
    fn from(s: String) -> Outgoing {
        Outgoing::full(s)
    }
}

impl From<Cow<'static, str>> for Outgoing {
    fn from(cow: Cow<'static, str>) -> Outgoing {
        match cow {
            Cow::Borrowed(s) => Outgoing::from(s),
            Cow::Owned(s) => Outgoing::from(s),
        }
    }
}
