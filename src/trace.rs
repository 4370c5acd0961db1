//! 日志追踪（tracing）宏模块
//!
//! 本模块对 `tracing` crate 的日志宏和 span 宏做了一层条件包装：
//!
//! 1. 当 `tracing` feature 启用时（默认启用），宏展开为实际的 `tracing::*` 调用
//! 2. 当 `tracing` feature 未启用时，宏展开为空操作
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中紧接着 `cfg` 模块之后被引入，
//! 整个 crate 内的代码都可以直接使用 `trace!`、`debug!`、`warn!` 等宏。
//!
//! 约定的日志级别：
//! - `trace`：引擎回调事件的到达、每一次 body 拉取
//! - `debug`：取消、超时、调用生命周期的状态迁移
//! - `warn`：被丢弃的事件、协议违规

// 为了完整性，提供了一组封装，部分宏当前可能未被使用。
#![allow(unused_macros)]

/// `debug!` —— 调试级别日志宏
///
/// 当 `tracing` feature 启用时，转发到 `tracing::debug!`；否则为空操作。
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

/// `debug_span!` —— 调试级别 span 创建宏
///
/// 创建一个调试级别的 span 并立即进入，返回的 guard 被 drop 时退出 span。
/// 宏体包裹在块中，tracing 未启用时展开为 `()`。
macro_rules! debug_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::debug_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

/// `error!` —— 错误级别日志宏
macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    }
}

/// `trace!` —— 追踪级别日志宏
///
/// 最细粒度的日志级别。桥接层的每一个引擎事件都在这一级别记录。
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

/// `warn!` —— 警告级别日志宏
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
