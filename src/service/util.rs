//! 拦截器工具函数模块。
//!
//! [`interceptor_fn`] 从一个闭包创建拦截器，无需手动定义结构体并实现 trait。

use std::fmt;

use http::Response;

use super::{Chain, Interceptor};
use crate::body::Incoming;

/// 从函数或闭包创建一个 [`Interceptor`]。
///
/// # 示例
///
/// ```
/// use callbridge::service::{interceptor_fn, Chain};
///
/// let logging = interceptor_fn(|chain: &mut Chain<'_>| {
///     let uri = chain.request().uri().clone();
///     let res = chain.proceed()?;
///     println!("{} -> {}", uri, res.status());
///     Ok(res)
/// });
/// # drop(logging);
/// ```
pub fn interceptor_fn<F>(f: F) -> InterceptorFn<F>
where
    F: Fn(&mut Chain<'_>) -> crate::Result<Response<Incoming>> + Send + Sync,
{
    InterceptorFn { f }
}

/// [`interceptor_fn`] 返回的拦截器类型。
#[derive(Clone, Copy)]
pub struct InterceptorFn<F> {
    f: F,
}

impl<F> Interceptor for InterceptorFn<F>
where
    F: Fn(&mut Chain<'_>) -> crate::Result<Response<Incoming>> + Send + Sync,
{
    fn intercept(&self, chain: &mut Chain<'_>) -> crate::Result<Response<Incoming>> {
        (self.f)(chain)
    }
}

impl<F> fmt::Debug for InterceptorFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("impl Interceptor").finish()
    }
}
