//! 公共工具模块（common）。
//!
//! - 单槽 Future（`slot`）：响应头在引擎线程上到达，调用线程阻塞等待；
//! - 调用级超时看门狗（`watchdog`）。
//!
//! 所有子模块均为 `pub(crate)` 可见性，仅供 crate 内部使用。

pub(crate) mod slot;
pub(crate) mod watchdog;
