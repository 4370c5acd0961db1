//! 拦截器（Interceptors）模块。
//!
//! 一次调用的请求在交给引擎之前，依次经过客户端上注册的拦截器。
//! 每个拦截器拿到一个 [`Chain`]：它可以查看或修改当前请求，
//! 调用 [`Chain::proceed`] 把请求交给下一环，并查看或替换返回的响应；
//! 也可以不调用 `proceed`，直接合成一个响应。
//!
//! 链的最后一环由客户端提供：它把请求提交给引擎，并等待响应头。
//!
//! 对于大多数场景，辅助函数 [`interceptor_fn`] 已经足够使用。

mod chain;
mod service;
mod util;

pub use self::chain::Chain;
pub use self::service::Interceptor;
pub use self::util::{interceptor_fn, InterceptorFn};

pub(crate) use self::chain::Exchange;
