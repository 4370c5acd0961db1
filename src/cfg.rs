//! 条件编译配置宏模块
//!
//! 本模块定义了基于 Cargo feature flag 的条件编译宏。本 crate 的可选功能
//! 目前只有 `tokio`（Tokio 执行器）与 `tracing`（日志），因此只保留最基础的
//! `cfg_feature!`。
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中最先被引入，其中定义的宏在整个 crate 内
//! 均可使用。

/// `cfg_feature!` —— 基础条件编译宏
///
/// 接受一个 `#![meta]` 形式的属性和一组 item，为每个 item 同时添加：
/// - `#[cfg($meta)]`：实际的条件编译控制
/// - `#[cfg_attr(docsrs, doc(cfg($meta)))]`：docs.rs 构建时的文档标记
macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}
