//! 单槽 Future（single-slot future）。
//!
//! `SingleSlot<T>` 至多被完成一次：以一个值、一个错误，或者取消。
//! 第一个写入者胜出，之后的所有完成尝试都是返回 `false` 的空操作；
//! 所有读取者看到的都是同一个最终结果。
//!
//! 完成方通过原子 CAS 抢占 `PENDING -> COMPLETING`，只有胜出者会去拿锁写入结果，
//! 然后唤醒所有在条件变量上等待的读取者。读取方在 `Mutex` + `Condvar` 上阻塞，
//! 等待期间不持有任何其他锁。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// 尚未完成。
const PENDING: u8 = 0;
/// 某个完成方已赢得 CAS，正在写入结果。
const COMPLETING: u8 = 1;
/// 结果已写入，可以读取。
const DONE: u8 = 2;

/// 槽中存放的最终结果。
enum Outcome<T> {
    Value(T),
    Failed(Arc<crate::Error>),
    Canceled,
}

/// 至多完成一次的阻塞 Future。
pub(crate) struct SingleSlot<T> {
    state: AtomicU8,
    outcome: Mutex<Option<Outcome<T>>>,
    ready: Condvar,
}

impl<T: Clone> SingleSlot<T> {
    pub(crate) fn new() -> SingleSlot<T> {
        SingleSlot {
            state: AtomicU8::new(PENDING),
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// 以一个值完成。只有第一个完成者返回 `true`。
    pub(crate) fn complete(&self, value: T) -> bool {
        self.settle(Outcome::Value(value))
    }

    /// 以一个错误完成。只有第一个完成者返回 `true`。
    pub(crate) fn fail(&self, err: crate::Error) -> bool {
        self.fail_shared(Arc::new(err))
    }

    /// 以一个已共享的错误完成。完成失败时调用方仍持有 `err`。
    pub(crate) fn fail_shared(&self, err: Arc<crate::Error>) -> bool {
        self.settle(Outcome::Failed(err))
    }

    /// 以取消完成。只有第一个完成者返回 `true`。
    pub(crate) fn cancel(&self) -> bool {
        self.settle(Outcome::Canceled)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// 阻塞直到结果可用。
    pub(crate) fn get(&self) -> crate::Result<T> {
        let mut guard = self.lock();
        loop {
            if let Some(ref outcome) = *guard {
                return read(outcome);
            }
            guard = self
                .ready
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// 阻塞直到结果可用，最多等待 `timeout`。
    ///
    /// 超时返回 `Ok(None)`。每次被（可能是虚假地）唤醒后，
    /// 剩余时间都根据截止时刻重新计算。
    pub(crate) fn get_timeout(&self, timeout: Duration) -> crate::Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(ref outcome) = *guard {
                return read(outcome).map(Some);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            guard = self
                .ready
                .wait_timeout(guard, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut guard = self.lock();
        *guard = Some(outcome);
        self.state.store(DONE, Ordering::Release);
        drop(guard);
        self.ready.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        // 锁内只做赋值和读取，不会在持锁期间 panic
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read<T: Clone>(outcome: &Outcome<T>) -> crate::Result<T> {
    match outcome {
        Outcome::Value(value) => Ok(value.clone()),
        Outcome::Failed(err) => Err(crate::Error::new_shared(err)),
        Outcome::Canceled => Err(crate::Error::new_canceled()),
    }
}

impl<T> fmt::Debug for SingleSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            PENDING => "pending",
            COMPLETING => "completing",
            _ => "done",
        };
        f.debug_tuple("SingleSlot").field(&state).finish()
    }
}
