//! 调用级超时看门狗。
//!
//! 看门狗在执行器上占用一个任务，等待"解除"信号至多 `timeout`。
//! 超时未解除则运行回调（取消调用）。丢弃 [`Watchdog`] 即解除。

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::rt::Executor;

pub(crate) struct Watchdog {
    _disarm: Sender<()>,
}

impl Watchdog {
    pub(crate) fn arm<F>(executor: &dyn Executor, timeout: Duration, on_fire: F) -> Watchdog
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        executor.execute(Box::new(move || match rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                debug!("call deadline of {:?} reached", timeout);
                on_fire();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                trace!("watchdog disarmed");
            }
        }));
        Watchdog { _disarm: tx }
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog").finish()
    }
}
