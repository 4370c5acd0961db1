use std::fmt;
use std::mem;
use std::sync::Arc;

use http::{Request, Response};

use super::Interceptor;
use crate::body::{Incoming, Outgoing};

/// 链的最后一环：把请求交给引擎并等待响应头。
pub(crate) trait Exchange {
    fn exchange(&self, req: Request<Outgoing>) -> crate::Result<Response<Incoming>>;
}

/// 拦截器链上的一个位置。
///
/// 持有当前环节的请求；[`proceed`](Chain::proceed) 把它交给下一个拦截器，
/// 或者在链尾交给引擎。
pub struct Chain<'a> {
    links: &'a [Arc<dyn Interceptor>],
    exchange: &'a dyn Exchange,
    request: Request<Outgoing>,
    proceeded: bool,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(
        links: &'a [Arc<dyn Interceptor>],
        exchange: &'a dyn Exchange,
        request: Request<Outgoing>,
    ) -> Chain<'a> {
        Chain {
            links,
            exchange,
            request,
            proceeded: false,
        }
    }

    /// 当前请求。
    ///
    /// `proceed` 之后请求体已经交出，这里只剩请求头部分和一个空的请求体。
    pub fn request(&self) -> &Request<Outgoing> {
        &self.request
    }

    /// 当前请求的可变引用，在 `proceed` 之前修改它。
    pub fn request_mut(&mut self) -> &mut Request<Outgoing> {
        &mut self.request
    }

    /// 把当前请求交给链的下一环，返回它的响应。
    ///
    /// # Errors
    ///
    /// 同一环节第二次调用时返回 `is_user()` 错误，请求不会再次发送。
    /// 其余错误来自后续的拦截器或引擎。
    pub fn proceed(&mut self) -> crate::Result<Response<Incoming>> {
        if self.proceeded {
            warn!("interceptor called proceed twice");
            return Err(crate::Error::new_user_proceed_twice());
        }
        self.proceeded = true;

        let request = self.take_request();
        match self.links.split_first() {
            Some((link, rest)) => {
                let mut next = Chain::new(rest, self.exchange, request);
                link.intercept(&mut next)
            }
            None => self.exchange.exchange(request),
        }
    }

    /// 用 `request` 替换当前请求，然后 [`proceed`](Chain::proceed)。
    pub fn proceed_with(&mut self, request: Request<Outgoing>) -> crate::Result<Response<Incoming>> {
        if !self.proceeded {
            self.request = request;
        }
        self.proceed()
    }

    /// 取出请求，原处留下请求头的副本和空的请求体。
    fn take_request(&mut self) -> Request<Outgoing> {
        let (parts, body) = mem::take(&mut self.request).into_parts();
        self.request = Request::from_parts(parts.clone(), Outgoing::empty());
        Request::from_parts(parts, body)
    }
}

impl fmt::Debug for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("remaining", &self.links.len())
            .field("request", &self.request)
            .field("proceeded", &self.proceeded)
            .finish()
    }
}
