use http::Response;

use super::Chain;
use crate::body::Incoming;

/// 拦截一次调用的请求和响应。
///
/// 拦截器在调用线程上同步运行，可以阻塞。
/// 同一个拦截器会被多个调用并发使用，因此要求 `Send + Sync`。
///
/// # 示例
///
/// ```
/// use callbridge::service::{Chain, Interceptor};
/// use callbridge::body::Incoming;
/// use http::{HeaderValue, Response};
///
/// struct UserAgent(HeaderValue);
///
/// impl Interceptor for UserAgent {
///     fn intercept(&self, chain: &mut Chain<'_>) -> callbridge::Result<Response<Incoming>> {
///         chain
///             .request_mut()
///             .headers_mut()
///             .insert(http::header::USER_AGENT, self.0.clone());
///         chain.proceed()
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync {
    /// 处理一次调用。
    ///
    /// 在一次 `intercept` 中，`chain.proceed` 至多调用一次；
    /// 第二次调用返回错误，不会再次发送请求。
    fn intercept(&self, chain: &mut Chain<'_>) -> crate::Result<Response<Incoming>>;
}

impl<I: Interceptor + ?Sized> Interceptor for &'_ I {
    #[inline]
    fn intercept(&self, chain: &mut Chain<'_>) -> crate::Result<Response<Incoming>> {
        (**self).intercept(chain)
    }
}

impl<I: Interceptor + ?Sized> Interceptor for Box<I> {
    #[inline]
    fn intercept(&self, chain: &mut Chain<'_>) -> crate::Result<Response<Incoming>> {
        (**self).intercept(chain)
    }
}

impl<I: Interceptor + ?Sized> Interceptor for std::sync::Arc<I> {
    #[inline]
    fn intercept(&self, chain: &mut Chain<'_>) -> crate::Result<Response<Incoming>> {
        (**self).intercept(chain)
    }
}
