//! 请求体上传桥接。
//!
//! 引擎以"拉"的方式获取请求体：每次调用 [`UploadDataProvider::read`]
//! 给出一个目标缓冲区，并期待恰好一次 `on_read_succeeded` / `on_read_error`。
//! 应用则以"推"的方式产生请求体：写入函数向 [`Sink`] 调用 `write`。
//!
//! 两种实现：
//!
//! - **内存**：`Full` 请求体，以及声明长度不超过 1 MiB 的流式请求体
//!   （在提交前于调用线程上运行写入函数并缓存全部数据），支持回绕；
//! - **流式**：其余情况。写入函数在执行器上的工作线程中运行，
//!   每次 `write` 阻塞到引擎给出下一个缓冲区，复制能放下的部分后立即交付。
//!   同一时刻至多一个未完成的拉取。流式请求体不支持回绕。
//!
//! 声明了长度时，恰好写满声明长度的那一块会被扣留到写入函数返回之后才交付，
//! 这样写入函数多写的字节可以在引擎认为上传完成之前报告为"请求体过长"。

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::callback::Transfer;
use crate::body::{DeclaredLength, Outgoing, Writer};
use crate::engine::{UploadDataProvider, UploadDataSink};
use crate::rt::Executor;
use crate::Error;

/// 声明长度不超过此值的流式请求体在内存中缓存。
const IN_MEMORY_LIMIT: u64 = 1024 * 1024;

/// 把请求体转换为交给引擎的数据源。没有请求体时返回 `None`。
///
/// 需要在内存中缓存的流式请求体会在这里同步运行写入函数，
/// 写入函数的失败在提交之前就会返回。
pub(crate) fn provider(
    body: Outgoing,
    transfer: &Arc<Transfer>,
    executor: &Arc<dyn Executor>,
    write_timeout: Option<Duration>,
) -> crate::Result<Option<Arc<dyn UploadDataProvider>>> {
    provide(body, transfer, executor, write_timeout, IN_MEMORY_LIMIT)
}

fn provide(
    body: Outgoing,
    transfer: &Arc<Transfer>,
    executor: &Arc<dyn Executor>,
    write_timeout: Option<Duration>,
    in_memory_limit: u64,
) -> crate::Result<Option<Arc<dyn UploadDataProvider>>> {
    let (length, writer) = match body.into_parts() {
        Parts::Empty => return Ok(None),
        Parts::Full(bytes) => {
            return Ok(Some(Arc::new(InMemory::new(bytes, Arc::downgrade(transfer)))))
        }
        Parts::Streaming(length, writer) => (length, writer),
    };

    match length.into_opt() {
        Some(len) if len <= in_memory_limit => {
            let bytes = buffer(len, writer)?;
            Ok(Some(Arc::new(InMemory::new(bytes, Arc::downgrade(transfer)))))
        }
        _ => {
            let (abort_tx, abort_rx) = crossbeam_channel::bounded(0);
            transfer.set_upload(Abort { _tx: abort_tx });
            Ok(Some(Arc::new(Streaming::new(
                length,
                writer,
                Arc::downgrade(transfer),
                abort_rx,
                executor.clone(),
                write_timeout,
            ))))
        }
    }
}

/// `Outgoing` 拆开后的形态。
pub(crate) enum Parts {
    Empty,
    Full(Bytes),
    Streaming(DeclaredLength, Writer),
}

/// 丢弃即通知流式上传的工作线程退出。
pub(crate) struct Abort {
    _tx: Sender<()>,
}

/// 请求体写入端，交给 [`Outgoing::streaming`] 的写入函数使用。
///
/// 实现了 [`io::Write`]。`write` 可能阻塞：流式上传时它要等待引擎拉取数据。
/// 如果引擎在写超时内没有拉取，或者调用已被取消，`write` 返回错误。
pub struct Sink<'a> {
    kind: SinkKind<'a>,
}

enum SinkKind<'a> {
    Buffer(&'a mut Buffered),
    Stream(&'a mut Pump),
}

/// 在内存中收集一个长度已知的请求体。
struct Buffered {
    declared: u64,
    buf: Vec<u8>,
    failure: Option<Error>,
}

/// 流式上传的工作线程一侧。
struct Pump {
    pulls: Receiver<Pull>,
    abort: Receiver<()>,
    transfer: Weak<Transfer>,
    write_timeout: Option<Duration>,
    declared: DeclaredLength,
    remaining: DeclaredLength,
    written: u64,
    held: Option<Pull>,
    failure: Option<Error>,
}

/// 引擎的一次拉取：目标缓冲区和单次使用的结果回调。
struct Pull {
    sink: Arc<dyn UploadDataSink>,
    buf: BytesMut,
}

fn buffer(declared: u64, writer: Writer) -> crate::Result<Bytes> {
    let mut buffered = Buffered {
        declared,
        buf: Vec::with_capacity(declared as usize),
        failure: None,
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        writer(&mut Sink {
            kind: SinkKind::Buffer(&mut buffered),
        })
    }));
    check_outcome(result, buffered.failure.take())?;

    let written = buffered.buf.len() as u64;
    if written < declared {
        return Err(Error::new_body_too_short(declared, written));
    }
    Ok(Bytes::from(buffered.buf))
}

/// 合并写入函数的返回值与写入端记录的失败。写入端的失败优先。
fn check_outcome(
    result: std::thread::Result<io::Result<()>>,
    failure: Option<Error>,
) -> crate::Result<()> {
    match (result, failure) {
        (Err(_panic), _) => Err(Error::new_user_body_writer_panicked()),
        (Ok(_), Some(failure)) => Err(failure),
        (Ok(Err(err)), None) => Err(Error::new_body_write(err)),
        (Ok(Ok(())), None) => Ok(()),
    }
}

fn io_error(err: &Error) -> io::Error {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_canceled() {
        io::ErrorKind::ConnectionAborted
    } else {
        io::ErrorKind::InvalidInput
    };
    io::Error::new(kind, err.to_string())
}

/// 记录写入端的失败，并返回交给写入函数的 `io::Error`。
fn record(failure: &mut Option<Error>, err: Error) -> io::Error {
    let io = io_error(&err);
    failure.get_or_insert(err);
    io
}

// ===== impl Sink =====

impl io::Write for Sink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.kind {
            SinkKind::Buffer(ref mut buffered) => buffered.write(data),
            SinkKind::Stream(ref mut pump) => pump.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Sink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Sink");
        match self.kind {
            SinkKind::Buffer(ref buffered) => builder
                .field("declared", &buffered.declared)
                .field("written", &buffered.buf.len()),
            SinkKind::Stream(ref pump) => builder
                .field("declared", &pump.declared)
                .field("written", &pump.written),
        };
        builder.finish()
    }
}

impl Buffered {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(ref err) = self.failure {
            return Err(io_error(err));
        }
        let room = (self.declared as usize).saturating_sub(self.buf.len());
        if room == 0 {
            return Err(record(
                &mut self.failure,
                Error::new_body_too_long(self.declared),
            ));
        }
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        Ok(n)
    }
}

// ===== impl Pump =====

impl Pump {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(ref err) = self.failure {
            return Err(io_error(err));
        }
        if self.remaining == DeclaredLength::ZERO {
            let declared = self.written;
            return Err(record(&mut self.failure, Error::new_body_too_long(declared)));
        }

        let mut pull = match self.next_pull() {
            Ok(pull) => pull,
            Err(err) => return Err(record(&mut self.failure, err)),
        };
        let room = pull.buf.capacity() - pull.buf.len();
        let mut n = room.min(data.len());
        if let Some(left) = self.remaining.into_opt() {
            n = n.min(usize::try_from(left).unwrap_or(usize::MAX));
        }
        pull.buf.extend_from_slice(&data[..n]);
        self.remaining.sub_if(n as u64);
        self.written += n as u64;

        if self.remaining == DeclaredLength::ZERO {
            trace!("holding back the final {} upload bytes", n);
            self.held = Some(pull);
        } else {
            trace!("upload chunk: {} bytes", n);
            self.sent();
            pull.sink.on_read_succeeded(pull.buf, false);
        }
        Ok(n)
    }

    /// 等待引擎的下一次拉取。调用被取消或写超时时返回错误。
    fn next_pull(&self) -> crate::Result<Pull> {
        let deadline = match self.write_timeout {
            Some(timeout) => crossbeam_channel::after(timeout),
            None => crossbeam_channel::never(),
        };
        crossbeam_channel::select! {
            recv(self.pulls) -> pull => pull.map_err(|_| Error::new_canceled()),
            recv(self.abort) -> _ => Err(Error::new_canceled()),
            recv(deadline) -> _ => Err(Error::new_write_timeout()),
        }
    }

    fn finish(mut self, result: std::thread::Result<io::Result<()>>) {
        let failure = self.failure.take();
        match check_outcome(result, failure) {
            Ok(()) => self.complete(),
            Err(err) => self.surface(err),
        }
    }

    fn complete(&mut self) {
        match self.declared.into_opt() {
            Some(declared) if self.written == declared => {
                if let Some(pull) = self.held.take() {
                    trace!("upload complete, releasing final chunk");
                    self.sent();
                    pull.sink.on_read_succeeded(pull.buf, false);
                }
            }
            Some(declared) => {
                let err = Error::new_body_too_short(declared, self.written);
                self.surface(err);
            }
            None => match self.next_pull() {
                Ok(pull) => {
                    trace!("upload complete, sending final empty chunk");
                    self.sent();
                    pull.sink.on_read_succeeded(pull.buf, true);
                }
                Err(wait) => self.stall(Error::new_write_timeout(), wait),
            },
        }
    }

    /// 把失败交给当前扣留的拉取，或者下一次拉取。
    fn surface(&mut self, err: Error) {
        debug!("upload failed: {}", err);
        let pull = match self.held.take() {
            Some(pull) => Ok(pull),
            // 写超时已经等过一次，不再等待
            None if err.is_timeout() => Err(Error::new_write_timeout()),
            None => self.next_pull(),
        };
        match pull {
            Ok(pull) => {
                self.sent();
                pull.sink.on_read_error(Box::new(err));
            }
            Err(wait) => self.stall(err, wait),
        }
    }

    /// 一块数据交给了引擎，响应头的读超时从此刻重新计时。
    fn sent(&self) {
        if let Some(transfer) = self.transfer.upgrade() {
            transfer.upload_sent();
        }
    }

    /// 引擎不再拉取。已取消则什么也不做，否则以 `err` 终止整个传输。
    fn stall(&self, err: Error, wait: Error) {
        if !wait.is_timeout() {
            trace!("upload worker stopped: {}", wait);
            return;
        }
        if let Some(transfer) = self.transfer.upgrade() {
            transfer.abort(err);
        }
    }
}

// ===== impl Streaming =====

/// 流式数据源。工作线程在第一次拉取时才启动。
struct Streaming {
    length: Option<u64>,
    transfer: Weak<Transfer>,
    pulls: Sender<Pull>,
    worker: Mutex<Option<Worker>>,
    executor: Arc<dyn Executor>,
}

struct Worker {
    pump: Pump,
    writer: Writer,
}

impl Streaming {
    fn new(
        length: DeclaredLength,
        writer: Writer,
        transfer: Weak<Transfer>,
        abort: Receiver<()>,
        executor: Arc<dyn Executor>,
        write_timeout: Option<Duration>,
    ) -> Streaming {
        // 至多一个未完成的拉取
        let (tx, rx) = crossbeam_channel::bounded(1);
        Streaming {
            length: length.into_opt(),
            transfer: transfer.clone(),
            pulls: tx,
            worker: Mutex::new(Some(Worker {
                pump: Pump {
                    pulls: rx,
                    abort,
                    transfer,
                    write_timeout,
                    declared: length,
                    remaining: length,
                    written: 0,
                    held: None,
                    failure: None,
                },
                writer,
            })),
            executor,
        }
    }
}

impl UploadDataProvider for Streaming {
    fn length(&self) -> Option<u64> {
        self.length
    }

    fn read(&self, sink: Arc<dyn UploadDataSink>, buf: BytesMut) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            trace!("starting upload worker");
            self.executor.execute(Box::new(move || worker.run()));
        }

        if let Some(transfer) = self.transfer.upgrade() {
            transfer.upload_pulled();
        }
        match self.pulls.try_send(Pull { sink, buf }) {
            Ok(()) => (),
            Err(TrySendError::Full(pull)) => {
                warn!("upload read while another read is outstanding");
                pull.sink
                    .on_read_error("upload read while another read is outstanding".into());
            }
            Err(TrySendError::Disconnected(pull)) => {
                warn!("upload read after the body writer finished");
                pull.sink.on_read_error(Box::new(Error::new_closed()));
            }
        }
    }

    fn rewind(&self, sink: Arc<dyn UploadDataSink>) {
        debug!("engine requested rewind of a streaming body");
        sink.on_rewind_error(Box::new(Error::new_user_rewind_unsupported()));
    }
}

impl Worker {
    fn run(self) {
        let Worker { mut pump, writer } = self;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            writer(&mut Sink {
                kind: SinkKind::Stream(&mut pump),
            })
        }));
        pump.finish(result);
    }
}

// ===== impl InMemory =====

/// 内存数据源，支持回绕。
struct InMemory {
    data: Bytes,
    pos: Mutex<usize>,
    transfer: Weak<Transfer>,
}

impl InMemory {
    fn new(data: Bytes, transfer: Weak<Transfer>) -> InMemory {
        InMemory {
            data,
            pos: Mutex::new(0),
            transfer,
        }
    }
}

impl UploadDataProvider for InMemory {
    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read(&self, sink: Arc<dyn UploadDataSink>, mut buf: BytesMut) {
        {
            let mut pos = self.pos.lock().unwrap_or_else(|e| e.into_inner());
            let room = buf.capacity() - buf.len();
            let n = room.min(self.data.len() - *pos);
            buf.extend_from_slice(&self.data[*pos..*pos + n]);
            *pos += n;
        }
        if let Some(transfer) = self.transfer.upgrade() {
            transfer.upload_sent();
        }
        sink.on_read_succeeded(buf, false);
    }

    fn rewind(&self, sink: Arc<dyn UploadDataSink>) {
        *self.pos.lock().unwrap_or_else(|e| e.into_inner()) = 0;
        sink.on_rewind_succeeded();
    }
}
