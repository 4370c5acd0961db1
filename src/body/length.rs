//! 消息体声明长度模块
//!
//! `DeclaredLength` 统一表示请求体的两种长度状态：
//!
//! - **精确已知的**：调用方声明了长度，引擎会发送 `Content-Length`；
//! - **未知的**：长度在发送前未知，引擎使用分块传输。
//!
//! 与 `Option<u64>` 相比，它用一个哨兵值编码"未知"，仅占 8 字节，
//! 并且提供上传桥接计数时需要的 `sub_if` 操作。

use std::fmt;

use http::header::{HeaderMap, CONTENT_LENGTH};

/// 声明的消息体长度。
///
/// - `0..=MAX_LEN`：精确的字节长度
/// - `u64::MAX`：长度未知（UNKNOWN）
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeclaredLength(u64);

/// 允许声明的最大精确长度，`u64::MAX` 被用作哨兵值。
const MAX_LEN: u64 = u64::MAX - 1;

impl From<Option<u64>> for DeclaredLength {
    fn from(len: Option<u64>) -> Self {
        len.and_then(|len| Self::checked_new(len))
            .unwrap_or(DeclaredLength::UNKNOWN)
    }
}

impl DeclaredLength {
    /// 长度未知。
    pub(crate) const UNKNOWN: DeclaredLength = DeclaredLength(u64::MAX);
    /// 零长度。
    pub(crate) const ZERO: DeclaredLength = DeclaredLength(0);

    #[cfg(test)]
    pub(crate) fn new(len: u64) -> Self {
        debug_assert!(len <= MAX_LEN);
        DeclaredLength(len)
    }

    /// 检查 `u64` 值是否在允许的范围内。
    pub(crate) fn checked_new(len: u64) -> Option<Self> {
        if len <= MAX_LEN {
            Some(DeclaredLength(len))
        } else {
            warn!("declared length bigger than maximum: {} > {}", len, MAX_LEN);
            None
        }
    }

    /// 从 `content-length` 头部读取长度。
    ///
    /// 头部不存在、无法解析或多个值互相矛盾时返回 `None`。
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<DeclaredLength> {
        let mut found = None;
        for value in headers.get_all(CONTENT_LENGTH) {
            let len = value.to_str().ok()?.trim().parse::<u64>().ok()?;
            match found {
                Some(prev) if prev != len => return None,
                _ => found = Some(len),
            }
        }
        found.and_then(DeclaredLength::checked_new)
    }

    pub(crate) fn into_opt(self) -> Option<u64> {
        match self {
            DeclaredLength::UNKNOWN => None,
            DeclaredLength(known) => Some(known),
        }
    }

    /// 从剩余长度中减去已发送的字节数；长度未知时不做任何操作。
    ///
    /// 调用方保证 `amt` 不超过剩余长度。
    pub(crate) fn sub_if(&mut self, amt: u64) {
        match *self {
            DeclaredLength::UNKNOWN => (),
            DeclaredLength(ref mut known) => {
                debug_assert!(amt <= *known);
                *known -= amt;
            }
        }
    }
}

impl fmt::Debug for DeclaredLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DeclaredLength::UNKNOWN => f.write_str("UNKNOWN"),
            DeclaredLength(n) => f.debug_tuple("DeclaredLength").field(&n).finish(),
        }
    }
}
