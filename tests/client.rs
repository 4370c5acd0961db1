#![warn(rust_2018_idioms)]

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use callbridge::body::Outgoing;
use callbridge::engine::{
    Engine, EngineError, EngineRequest, RequestCallback, ResponseInfo, SubmitParams,
    UploadDataProvider, UploadDataSink,
};
use callbridge::rt::{Executor, Task};
use callbridge::service::{interceptor_fn, Chain};
use callbridge::{CallState, Client, HeaderMap, Request, StatusCode, Uri};
use crossbeam_channel::{Receiver, Sender};

const WAIT: Duration = Duration::from_secs(5);

/// 服务端的应答方式。
#[derive(Clone)]
struct Reply {
    status: u16,
    chunks: Vec<&'static [u8]>,
    /// 送完所有数据块之后以失败结束。
    fail: Option<&'static str>,
    /// 响应头到达之前的延迟。
    delay: Duration,
    /// 把上传的请求体原样作为响应体返回。
    echo: bool,
    /// 每次拉取请求体之前的等待。
    pull_delay: Duration,
}

impl Reply {
    fn ok(chunks: &[&'static str]) -> Reply {
        Reply {
            status: 200,
            chunks: chunks.iter().map(|c| c.as_bytes()).collect(),
            fail: None,
            delay: Duration::ZERO,
            echo: false,
            pull_delay: Duration::ZERO,
        }
    }
}

/// 在自己的线程上回调的引擎替身，每个请求一个线程。
struct ThreadEngine {
    reply: Reply,
    submitted: AtomicUsize,
    cancels: Arc<AtomicUsize>,
}

impl ThreadEngine {
    fn new(reply: Reply) -> Arc<ThreadEngine> {
        Arc::new(ThreadEngine {
            reply,
            submitted: AtomicUsize::new(0),
            cancels: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

enum Cmd {
    Start,
    Read(BytesMut),
    Cancel,
}

struct ThreadRequest {
    tx: Sender<Cmd>,
    cancels: Arc<AtomicUsize>,
}

impl Engine for ThreadEngine {
    fn submit(&self, params: SubmitParams) -> Result<Arc<dyn EngineRequest>, EngineError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::unbounded();
        let reply = self.reply.clone();
        thread::Builder::new()
            .name("engine".into())
            .spawn(move || serve(params, reply, rx))?;
        Ok(Arc::new(ThreadRequest {
            tx,
            cancels: self.cancels.clone(),
        }))
    }
}

impl EngineRequest for ThreadRequest {
    fn start(&self) {
        let _ = self.tx.send(Cmd::Start);
    }

    fn read(&self, buf: BytesMut) {
        let _ = self.tx.send(Cmd::Read(buf));
    }

    fn follow_redirect(&self) {}

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Cmd::Cancel);
    }
}

fn serve(params: SubmitParams, reply: Reply, rx: Receiver<Cmd>) {
    let callback = params.callback;
    let mut info = ResponseInfo {
        status: StatusCode::from_u16(reply.status).unwrap(),
        headers: HeaderMap::new(),
        negotiated_protocol: "http/1.1".to_owned(),
        was_cached: false,
        url_chain: vec![params.uri.clone()],
    };
    info.headers.insert("server", "thread-engine".parse().unwrap());

    match rx.recv() {
        Ok(Cmd::Start) => (),
        Ok(Cmd::Cancel) => return callback.on_canceled(None),
        _ => return,
    }

    let mut chunks: Vec<Vec<u8>> = reply.chunks.iter().map(|c| c.to_vec()).collect();
    if let Some(upload) = params.upload {
        match drain(&*upload, reply.pull_delay) {
            Ok(body) if reply.echo => chunks = vec![body],
            Ok(_) => (),
            Err(cause) => return callback.on_failed(None, cause),
        }
    }

    match rx.recv_timeout(reply.delay) {
        Ok(Cmd::Cancel) => return callback.on_canceled(None),
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => (),
        _ => return,
    }
    callback.on_response_started(&info);

    let mut chunks = chunks.into_iter();
    loop {
        match rx.recv() {
            Ok(Cmd::Read(mut buf)) => match chunks.next() {
                Some(chunk) => {
                    buf.extend_from_slice(&chunk);
                    callback.on_read_completed(&info, buf);
                }
                None => {
                    match reply.fail {
                        Some(msg) => callback.on_failed(Some(&info), msg.into()),
                        None => callback.on_succeeded(&info),
                    }
                    return;
                }
            },
            Ok(Cmd::Cancel) => return callback.on_canceled(Some(&info)),
            Ok(Cmd::Start) | Err(_) => return,
        }
    }
}

struct Collect {
    tx: Sender<Result<(BytesMut, bool), EngineError>>,
}

impl UploadDataSink for Collect {
    fn on_read_succeeded(&self, buf: BytesMut, final_chunk: bool) {
        let _ = self.tx.send(Ok((buf, final_chunk)));
    }

    fn on_read_error(&self, cause: EngineError) {
        let _ = self.tx.send(Err(cause));
    }

    fn on_rewind_succeeded(&self) {}

    fn on_rewind_error(&self, cause: EngineError) {
        let _ = self.tx.send(Err(cause));
    }
}

fn drain(upload: &dyn UploadDataProvider, delay: Duration) -> Result<Vec<u8>, EngineError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = Arc::new(Collect { tx });
    let mut body = Vec::new();
    loop {
        thread::sleep(delay);
        upload.read(sink.clone(), BytesMut::with_capacity(8));
        let (buf, last) = rx.recv_timeout(WAIT)??;
        body.extend_from_slice(&buf);
        if last || upload.length() == Some(body.len() as u64) {
            return Ok(body);
        }
    }
}

fn get(uri: &'static str) -> Request<Outgoing> {
    Request::get(uri).body(Outgoing::empty()).unwrap()
}

#[test]
fn blocking_get_reads_the_whole_body() {
    let _ = pretty_env_logger::try_init();
    let engine = ThreadEngine::new(Reply::ok(&["hello", " ", "world"]));
    let client = Client::new(engine.clone());
    let call = client.new_call(get("http://engine.test/greeting"));

    let mut res = call.execute().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["server"], "thread-engine");
    assert_eq!(res.version(), callbridge::Version::HTTP_11);

    let mut text = String::new();
    res.body_mut().read_to_string(&mut text).unwrap();
    assert_eq!(text, "hello world");
    assert_eq!(call.state(), CallState::Finished);
    assert_eq!(engine.cancels(), 0);
}

#[test]
fn transport_failure_after_the_head_is_raised_by_read() {
    let mut reply = Reply::ok(&["partial"]);
    reply.fail = Some("connection reset");
    let client = Client::new(ThreadEngine::new(reply));

    let mut res = client.execute(get("http://engine.test/")).unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.body_mut();
    assert_eq!(body.chunk(1024).unwrap().unwrap(), "partial");
    let err = body.chunk(1024).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(
        std::error::Error::source(&err).unwrap().to_string(),
        "connection reset"
    );
}

#[test]
fn streaming_upload_is_echoed() {
    let mut reply = Reply::ok(&[]);
    reply.echo = true;
    let engine = ThreadEngine::new(reply);
    let client = Client::new(engine.clone());

    let req = Request::post("http://engine.test/echo")
        .body(Outgoing::streaming(None, |sink| {
            for i in 0..100 {
                write!(sink, "line {}\n", i)?;
            }
            sink.flush()
        }))
        .unwrap();
    let mut res = client.execute(req).unwrap();
    let body = res.body_mut().bytes().unwrap();
    let text = std::str::from_utf8(&body).unwrap();
    assert_eq!(text.lines().count(), 100);
    assert!(text.ends_with("line 99\n"));
}

#[test]
fn slow_upload_is_not_a_read_timeout() {
    let mut reply = Reply::ok(&[]);
    reply.echo = true;
    reply.pull_delay = Duration::from_millis(40);
    let client = Client::builder()
        .read_timeout(Duration::from_millis(100))
        .write_timeout(WAIT)
        .build(ThreadEngine::new(reply));

    let req = Request::put("http://engine.test/slow-upload")
        .body(Outgoing::streaming(None, |sink| {
            for _ in 0..8 {
                sink.write_all(b"8 bytes!")?;
            }
            Ok(())
        }))
        .unwrap();
    let mut res = client.execute(req).unwrap();
    assert_eq!(res.body_mut().bytes().unwrap().len(), 64);
}

#[test]
fn failing_body_writer_fails_the_call() {
    let mut reply = Reply::ok(&[]);
    reply.echo = true;
    let client = Client::new(ThreadEngine::new(reply));

    let req = Request::post("http://engine.test/echo")
        .body(Outgoing::streaming(None, |sink| {
            sink.write_all(b"some")?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "source gone"))
        }))
        .unwrap();
    let err = client.execute(req).unwrap_err();
    assert!(err.is_body_write(), "{:?}", err);
}

#[test]
fn cancel_from_another_thread() {
    let mut reply = Reply::ok(&["late"]);
    reply.delay = Duration::from_secs(30);
    let engine = ThreadEngine::new(reply);
    let client = Client::new(engine.clone());
    let call = client.new_call(get("http://engine.test/slow"));

    let canceller = call.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });

    let err = call.execute().unwrap_err();
    handle.join().unwrap();
    assert!(err.is_canceled());
    assert!(!err.is_timeout());
    assert!(call.is_canceled());
    assert_eq!(engine.cancels(), 1);
}

#[test]
fn call_timeout_cancels_a_slow_call() {
    let mut reply = Reply::ok(&["late"]);
    reply.delay = Duration::from_secs(30);
    let engine = ThreadEngine::new(reply);
    let client = Client::builder()
        .read_timeout(Duration::ZERO)
        .call_timeout(Duration::from_millis(50))
        .build(engine.clone());

    let err = client.execute(get("http://engine.test/slow")).unwrap_err();
    assert!(err.is_canceled());
    assert!(err.is_timeout());
    assert_eq!(engine.cancels(), 1);
}

#[test]
fn read_timeout_while_waiting_for_the_head() {
    let mut reply = Reply::ok(&[]);
    reply.delay = Duration::from_secs(30);
    let engine = ThreadEngine::new(reply);
    let client = Client::builder()
        .read_timeout(Duration::from_millis(50))
        .build(engine.clone());

    let err = client.execute(get("http://engine.test/slow")).unwrap_err();
    assert!(err.is_read_timeout());
    assert_eq!(engine.cancels(), 1);
}

#[test]
fn cancel_before_execute_never_reaches_the_engine() {
    let engine = ThreadEngine::new(Reply::ok(&[]));
    let client = Client::new(engine.clone());
    let call = client.new_call(get("http://engine.test/"));

    call.cancel();
    assert!(call.execute().unwrap_err().is_canceled());
    assert_eq!(engine.submitted(), 0);
}

#[test]
fn execute_twice_fails_without_affecting_the_first() {
    let engine = ThreadEngine::new(Reply::ok(&["once"]));
    let client = Client::new(engine.clone());
    let call = client.new_call(get("http://engine.test/"));

    let mut res = call.execute().unwrap();
    assert!(call.execute().unwrap_err().is_already_executed());
    assert_eq!(res.body_mut().bytes().unwrap(), "once");
    assert_eq!(engine.submitted(), 1);
}

#[derive(Clone, Default)]
struct CountingExecutor {
    tasks: Arc<AtomicUsize>,
}

impl Executor for CountingExecutor {
    fn execute(&self, task: Task) {
        self.tasks.fetch_add(1, Ordering::SeqCst);
        thread::spawn(task);
    }
}

#[test]
fn enqueue_runs_on_the_injected_executor() {
    let executor = CountingExecutor::default();
    let tasks = executor.tasks.clone();
    let client = Client::builder()
        .executor(executor)
        .build(ThreadEngine::new(Reply::ok(&["queued"])));

    let (tx, rx) = crossbeam_channel::bounded(1);
    client
        .new_call(get("http://engine.test/"))
        .enqueue(move |res| {
            let body = res.and_then(|mut res| res.body_mut().bytes());
            let _ = tx.send(body.map(|b| b.to_vec()));
        });

    let body = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(body, b"queued");
    assert!(tasks.load(Ordering::SeqCst) >= 1);
}

#[test]
fn interceptors_wrap_every_call() {
    let seen = Arc::new(Mutex::new(Vec::<(Uri, StatusCode)>::new()));
    let log = seen.clone();
    let client = Client::builder()
        .interceptor(interceptor_fn(move |chain: &mut Chain<'_>| {
            let uri = chain.request().uri().clone();
            let res = chain.proceed()?;
            log.lock().unwrap().push((uri, res.status()));
            Ok(res)
        }))
        .build(ThreadEngine::new(Reply::ok(&[])));

    client.execute(get("http://engine.test/a")).unwrap();
    client.execute(get("http://engine.test/b")).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "http://engine.test/a");
    assert_eq!(seen[1].1, StatusCode::OK);
}

#[cfg(feature = "tokio")]
#[test]
fn tokio_executor_runs_enqueued_calls() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let client = Client::builder()
        .executor(callbridge::rt::TokioExecutor::new(rt.handle().clone()))
        .build(ThreadEngine::new(Reply::ok(&["tokio"])));

    let (tx, rx) = crossbeam_channel::bounded(1);
    client
        .new_call(get("http://engine.test/"))
        .enqueue(move |res| {
            let _ = tx.send(res.map(|r| r.status()));
        });
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), StatusCode::OK);
}
