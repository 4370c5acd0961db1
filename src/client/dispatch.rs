//! 进行中调用的登记表。
//!
//! 调用在开始执行时加入，在结束（完成、失败、取消）时移除。
//! 整个表由一把粗粒度的锁保护；批量取消时先复制列表，在锁外逐个取消，
//! 因为取消会同步回调引擎。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::call::Call;

/// 跟踪一个 [`Client`](super::Client) 正在进行的调用。
#[derive(Clone, Default)]
pub struct Dispatcher {
    running: Arc<Mutex<HashMap<u64, Call>>>,
}

impl Dispatcher {
    pub(super) fn new() -> Dispatcher {
        Dispatcher::default()
    }

    pub(super) fn add(&self, call: Call) {
        trace!("call #{} running", call.id());
        self.lock().insert(call.id(), call);
    }

    pub(super) fn finished(&self, id: u64) {
        let removed = self.lock().remove(&id);
        if removed.is_none() {
            trace!("call #{} was not running", id);
        }
    }

    /// 正在进行的调用数量。
    pub fn running_calls_count(&self) -> usize {
        self.lock().len()
    }

    /// 正在进行的调用的快照。
    pub fn running_calls(&self) -> Vec<Call> {
        self.lock().values().cloned().collect()
    }

    /// 取消所有正在进行的调用。
    pub fn cancel_all(&self) {
        let calls = self.running_calls();
        debug!("canceling {} running calls", calls.len());
        for call in calls {
            call.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Call>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.running_calls_count())
            .finish()
    }
}
