use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use xlang_dap::events::RuntimeEvent;
use xlang_dap::registries::AccessType;
use xlang_dap::runtime::{RuntimeState, StopReason};
use xlang_dap::source::normalize_path;
use xlang_dap::{CallOutcome, RemoteChannel, Result, XlangAdapterError, XlangRuntime};

/// In-memory engine: records every script and answers from a queue.
/// With `hold` set, each reply waits for a permit so a test can keep a call
/// in flight.
struct ScriptedEngine {
    sent: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<String>>,
    permits: Option<Semaphore>,
    connects: Mutex<usize>,
}

impl ScriptedEngine {
    fn new(replies: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            permits: None,
            connects: Mutex::new(0),
        }
    }

    fn held(replies: &[&str]) -> Self {
        Self {
            permits: Some(Semaphore::new(0)),
            ..Self::new(replies)
        }
    }

    fn release(&self) {
        if let Some(permits) = &self.permits {
            permits.add_permits(1);
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.sent().iter().filter(|s| s.starts_with(prefix)).count()
    }
}

#[async_trait]
impl RemoteChannel for ScriptedEngine {
    async fn connect(&self) -> Result<()> {
        *self.connects.lock().unwrap() += 1;
        Ok(())
    }

    async fn send(&self, request: String) -> Result<String> {
        self.sent.lock().unwrap().push(request);
        if let Some(permits) = &self.permits {
            permits
                .acquire()
                .await
                .map_err(|e| XlangAdapterError::RemoteCall(e.to_string()))?
                .forget();
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| XlangAdapterError::RemoteCall("no scripted reply".to_string()))
    }
}

fn program(content: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.x");
    std::fs::write(&path, content).unwrap();
    let path = normalize_path(&path.to_string_lossy());
    (dir, path)
}

#[tokio::test]
async fn start_stops_on_entry_exactly_once() {
    let (_dir, path) = program("import os\nprint('hi')\n");
    let (runtime, events) = XlangRuntime::new(ScriptedEngine::new(&["7", "1"]));

    runtime.start(&path, true, true).await.unwrap();

    assert_eq!(runtime.position().line, 0);
    assert_eq!(runtime.state(), RuntimeState::Stopped(StopReason::Entry));
    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        vec![RuntimeEvent::StopOnEntry]
    );

    let engine = runtime.gateway().channel();
    assert_eq!(engine.sent()[1], "import xdb\nreturn xdb.get_startline(7)");
    assert_eq!(*engine.connects.lock().unwrap(), 1);
}

#[tokio::test]
async fn loading_the_same_file_twice_hits_the_engine_once() {
    let (_dir, path) = program("x = 1\n");
    let (runtime, _events) = XlangRuntime::new(ScriptedEngine::new(&["7", "1", "1"]));

    runtime.start(&path, true, true).await.unwrap();
    runtime.set_breakpoint(&path, 0).await;
    runtime.start(&path, true, true).await.unwrap();

    assert_eq!(runtime.gateway().channel().count("m = load("), 1);
}

#[tokio::test]
async fn step_follows_engine_line_and_reports_after_reply() {
    let (_dir, path) = program("a\nb\nc\nd\ne\n");
    let (runtime, events) = XlangRuntime::new(ScriptedEngine::held(&["7", "5"]));
    let engine = runtime.gateway().channel();

    engine.release();
    runtime.start(&path, false, false).await.unwrap();

    let mut step = Box::pin(runtime.step(false, false));
    assert!(futures::poll!(&mut step).is_pending());
    assert!(events.is_empty());

    engine.release();
    assert_eq!(step.await.unwrap(), CallOutcome::Completed(4));
    assert_eq!(runtime.position().line, 4);
    assert_eq!(runtime.position().instruction, 4);
    assert_eq!(events.try_recv(), Ok(RuntimeEvent::StopOnStep));
}

#[tokio::test]
async fn second_call_is_refused_while_first_is_outstanding() {
    let (_dir, path) = program("a\nb\nc\n");
    let (runtime, events) = XlangRuntime::new(ScriptedEngine::held(&["7", "3"]));
    let engine = runtime.gateway().channel();

    engine.release();
    runtime.start(&path, false, false).await.unwrap();

    let mut first = Box::pin(runtime.step(false, false));
    assert!(futures::poll!(&mut first).is_pending());
    assert!(runtime.gateway().is_busy());

    assert!(runtime.step(false, false).await.unwrap().is_busy());
    assert!(runtime.stack().await.unwrap().is_busy());
    assert_eq!(engine.count("import xdb\nreturn xdb.command"), 1);

    engine.release();
    assert_eq!(first.await.unwrap(), CallOutcome::Completed(2));
    assert!(!runtime.gateway().is_busy());
    assert_eq!(events.try_iter().count(), 1);
}

#[tokio::test]
async fn failed_call_leaves_gateway_usable() {
    let (_dir, path) = program("a\nb\n");
    let (runtime, _events) = XlangRuntime::new(ScriptedEngine::new(&["7", "oops", "2"]));

    runtime.start(&path, false, false).await.unwrap();
    assert!(matches!(
        runtime.step(false, false).await,
        Err(XlangAdapterError::MalformedResponse { .. })
    ));
    assert_eq!(runtime.position().line, 0);

    assert_eq!(
        runtime.step(false, false).await.unwrap(),
        CallOutcome::Completed(1)
    );
}

#[tokio::test]
async fn breakpoints_shift_and_keep_increasing_ids() {
    let (_dir, path) = program("first\n\n+ added\nthird\n- removed\nlazy value\n");
    let (runtime, events) = XlangRuntime::new(ScriptedEngine::new(&["7"]));

    let on_empty = runtime.set_breakpoint(&path, 1).await;
    let on_plus = runtime.set_breakpoint(&path, 2).await;
    let on_minus = runtime.set_breakpoint(&path, 4).await;
    let on_lazy = runtime.set_breakpoint(&path, 5).await;
    let past_end = runtime.set_breakpoint(&path, 40).await;

    assert_eq!((on_empty.line, on_empty.verified), (2, true));
    assert_eq!((on_plus.line, on_plus.verified), (3, true));
    assert_eq!((on_minus.line, on_minus.verified), (3, true));
    assert_eq!((on_lazy.line, on_lazy.verified), (5, false));
    assert_eq!((past_end.line, past_end.verified), (40, false));

    let ids = [on_empty.id, on_plus.id, on_minus.id, on_lazy.id, past_end.id];
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let validated: Vec<_> = events
        .try_iter()
        .map(|e| match e {
            RuntimeEvent::BreakpointValidated(bp) => bp.id,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(validated, vec![on_empty.id, on_plus.id, on_minus.id]);

    runtime.clear_breakpoints(&path);
    let fresh = runtime.set_breakpoint(&path, 0).await;
    assert!(fresh.id > past_end.id);
}

#[tokio::test]
async fn data_breakpoints_only_widen() {
    let (runtime, _events) = XlangRuntime::new(ScriptedEngine::new(&[]));

    assert!(runtime.set_data_breakpoint("counter", AccessType::Read));
    assert!(runtime.set_data_breakpoint("counter", AccessType::Write));
    assert_eq!(runtime.data_breakpoint("counter"), Some(AccessType::ReadWrite));

    assert!(runtime.set_data_breakpoint("counter", AccessType::Read));
    assert_eq!(runtime.data_breakpoint("counter"), Some(AccessType::ReadWrite));
    assert!(runtime.gateway().channel().sent().is_empty());
}

#[tokio::test]
async fn disassembly_walks_the_token_table() {
    let (_dir, path) = program("ab cd\nef");
    let (runtime, _events) = XlangRuntime::new(ScriptedEngine::new(&["7"]));
    runtime.start(&path, false, false).await.unwrap();

    let listing = |address, count| {
        runtime
            .disassemble(address, count)
            .into_iter()
            .map(|i| i.instruction)
            .collect::<Vec<_>>()
    };

    assert_eq!(listing(0, 3), vec!["ab", "cd", "ef"]);
    assert_eq!(listing(2, 2), vec!["ef", "nop"]);
    assert_eq!(runtime.disassemble(1, 1)[0].line, Some(0));
}

#[tokio::test]
async fn switching_files_replaces_source_and_module() {
    let (_a_dir, a) = program("alpha\n");
    let (_b_dir, b) = program("beta\ngamma\n");
    let (runtime, _events) = XlangRuntime::new(ScriptedEngine::new(&["1", "2", "3"]));

    runtime.start(&a, false, false).await.unwrap();
    runtime.start(&b, false, false).await.unwrap();
    assert_eq!(runtime.source_file().as_deref(), Some(b.as_str()));
    assert_eq!(runtime.source_lines(), vec!["beta", "gamma", ""]);

    runtime.step(false, false).await.unwrap();
    assert_eq!(
        runtime.gateway().channel().sent()[2],
        "import xdb\nreturn xdb.command(2,cmd='Step')"
    );
}

#[tokio::test]
async fn unreachable_engine_is_retried_on_the_next_call() {
    struct FlakyEngine {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl RemoteChannel for FlakyEngine {
        async fn connect(&self) -> Result<()> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts == 1 {
                Err(XlangAdapterError::ConnectionFailed("refused".to_string()))
            } else {
                Ok(())
            }
        }

        async fn send(&self, _request: String) -> Result<String> {
            Ok("7".to_string())
        }
    }

    let (runtime, _events) = XlangRuntime::new(FlakyEngine {
        attempts: Mutex::new(0),
    });

    runtime.start("/tmp/missing.x", false, false).await.unwrap();
    assert!(runtime.gateway().is_connected());
    assert_eq!(*runtime.gateway().channel().attempts.lock().unwrap(), 2);
}
