//! Tests for the work queue and its worker thread

use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docserve::engine::{
    ConvertRequest, DocumentEngine, EchoLoader, EngineError, EngineLoader, EngineSettings, OutputFormat,
    PatternEngine, ProcessDocumentRequest, SourceKind,
};
use docserve::queue::tasks::{ConvertTask, ProcessDocumentTask};
use docserve::queue::{EngineHandle, EngineKind, QueueError, QueueState, Responder, Task, TaskReply, WorkQueue};

enum Outcome {
    Succeed,
    Fail,
    Panic,
}

/// Task that optionally waits on a gate before finishing the way it was
/// told to.
struct ScriptedTask {
    gate: Option<mpsc::Receiver<()>>,
    outcome: Outcome,
    responder: Responder,
}

impl ScriptedTask {
    fn new(outcome: Outcome) -> (Box<dyn Task>, tokio::sync::oneshot::Receiver<TaskReply>) {
        let (responder, rx) = Responder::channel();
        let task = ScriptedTask {
            gate: None,
            outcome,
            responder,
        };
        (Box::new(task), rx)
    }

    fn gated(gate: mpsc::Receiver<()>) -> (Box<dyn Task>, tokio::sync::oneshot::Receiver<TaskReply>) {
        let (responder, rx) = Responder::channel();
        let task = ScriptedTask {
            gate: Some(gate),
            outcome: Outcome::Succeed,
            responder,
        };
        (Box::new(task), rx)
    }
}

impl Task for ScriptedTask {
    fn kind(&self) -> EngineKind {
        EngineKind::Document
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn run(&mut self, engine: EngineHandle<'_>) -> bool {
        assert!(matches!(engine, EngineHandle::Document(_)));
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        match self.outcome {
            Outcome::Succeed => {
                self.responder.send_response("<done/>".to_string());
                true
            }
            Outcome::Fail => false,
            Outcome::Panic => panic!("engine blew up"),
        }
    }

    fn responder(&mut self) -> &mut Responder {
        &mut self.responder
    }
}

struct FailingLoader;

impl EngineLoader for FailingLoader {
    fn load_engine(&mut self, _settings: &EngineSettings) -> Result<Box<dyn DocumentEngine>, EngineError> {
        Err(EngineError::Load("model file missing".to_string()))
    }

    fn load_pattern_sets(&mut self, _path: &Path) -> Result<Box<dyn PatternEngine>, EngineError> {
        Err(EngineError::Load("unused".to_string()))
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        language: "English".to_string(),
        ..Default::default()
    }
}

fn wait_for_state(queue: &WorkQueue, pred: impl Fn(&QueueState) -> bool) -> QueueState {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let state = queue.state();
        if pred(&state) {
            return state;
        }
        assert!(Instant::now() < deadline, "queue stuck in {:?}", state);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_until_running(queue: &WorkQueue) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !queue.status().starts_with("Performing a task") {
        assert!(Instant::now() < deadline, "worker never picked up the task");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn ready_queue() -> Arc<WorkQueue> {
    let queue = WorkQueue::start(Box::new(EchoLoader)).unwrap();
    queue.initialize(settings()).unwrap();
    wait_for_state(&queue, |s| *s == QueueState::Ready);
    queue
}

#[test]
fn test_worker_waits_for_initialize() {
    let queue = WorkQueue::start(Box::new(EchoLoader)).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(queue.state(), QueueState::Starting);
    assert_eq!(queue.status(), "Initializing");

    queue.initialize(settings()).unwrap();
    wait_for_state(&queue, |s| *s == QueueState::Ready);
    assert_eq!(queue.status(), "Waiting for a task");
    assert_eq!(queue.initialize(settings()), Err(QueueError::AlreadyInitialized));
    queue.shutdown(true);
}

#[test]
fn test_tasks_run_and_are_counted() {
    let queue = ready_queue();

    let (ok, ok_rx) = ScriptedTask::new(Outcome::Succeed);
    let (fail, fail_rx) = ScriptedTask::new(Outcome::Fail);
    assert!(queue.add_task(ok));
    assert!(queue.add_task(fail));

    assert_eq!(ok_rx.blocking_recv().unwrap(), TaskReply::Response("<done/>".to_string()));
    // A task that fails without replying still gets an answer.
    assert_eq!(
        fail_rx.blocking_recv().unwrap(),
        TaskReply::Error {
            code: 500,
            explanation: "Task failed".to_string()
        }
    );

    queue.shutdown(true);
    assert_eq!(queue.tasks_processed(), 1);
    assert_eq!(queue.tasks_failed(), 1);
    assert!(queue.throughput(true).is_some());
}

#[test]
fn test_panicking_task_is_reported_and_worker_survives() {
    let queue = ready_queue();

    let (boom, boom_rx) = ScriptedTask::new(Outcome::Panic);
    let (after, after_rx) = ScriptedTask::new(Outcome::Succeed);
    queue.add_task(boom);
    queue.add_task(after);

    let Ok(TaskReply::Error { code, .. }) = boom_rx.blocking_recv() else {
        panic!("expected an error reply");
    };
    assert_eq!(code, 500);
    assert!(matches!(after_rx.blocking_recv(), Ok(TaskReply::Response(_))));

    queue.shutdown(true);
    assert_eq!(queue.tasks_failed(), 1);
    assert_eq!(queue.tasks_processed(), 1);
}

#[test]
fn test_remaining_counts_the_executing_task() {
    let queue = ready_queue();
    let (open, gate) = mpsc::channel();

    let (blocker, blocker_rx) = ScriptedTask::gated(gate);
    queue.add_task(blocker);
    wait_until_running(&queue);

    let (a, a_rx) = ScriptedTask::new(Outcome::Succeed);
    let (b, b_rx) = ScriptedTask::new(Outcome::Succeed);
    queue.add_task(a);
    queue.add_task(b);
    assert_eq!(queue.num_tasks_remaining(), 3);

    open.send(()).unwrap();
    for rx in [blocker_rx, a_rx, b_rx] {
        assert!(matches!(rx.blocking_recv(), Ok(TaskReply::Response(_))));
    }
    queue.shutdown(true);
    assert_eq!(queue.num_tasks_remaining(), 0);
    assert_eq!(queue.tasks_processed(), 3);
}

#[test]
fn test_shutdown_waits_and_drops_queued_tasks() {
    let queue = ready_queue();
    let (open, gate) = mpsc::channel();
    let (blocker, blocker_rx) = ScriptedTask::gated(gate);
    queue.add_task(blocker);
    wait_until_running(&queue);
    let (queued, queued_rx) = ScriptedTask::new(Outcome::Succeed);
    queue.add_task(queued);

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        open.send(()).unwrap();
    });
    let started = Instant::now();
    queue.shutdown(true);
    assert!(started.elapsed() >= Duration::from_millis(40), "shutdown returned before the worker exited");
    releaser.join().unwrap();

    // The running task finishes; the queued one never runs.
    assert!(matches!(blocker_rx.blocking_recv(), Ok(TaskReply::Response(_))));
    assert!(queued_rx.blocking_recv().is_err());
    assert_eq!(queue.state(), QueueState::ShutDown);
    assert_eq!(queue.status(), "Shut down");
}

#[test]
fn test_add_task_after_shutdown_is_ignored() {
    let queue = ready_queue();
    queue.shutdown(true);

    let (task, rx) = ScriptedTask::new(Outcome::Succeed);
    assert!(!queue.add_task(task));
    assert!(rx.blocking_recv().is_err());
    assert_eq!(queue.num_tasks_remaining(), 0);
    assert_eq!(queue.tasks_processed(), 0);
    assert!(queue.is_shut_down());
}

#[test]
fn test_load_failure_fires_fatal_callback() {
    let queue = WorkQueue::start(Box::new(FailingLoader)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    queue.set_fatal_error_callback(Box::new(move |message| sink.lock().unwrap().push(message.to_string())));
    queue.initialize(settings()).unwrap();

    let state = wait_for_state(&queue, |s| matches!(s, QueueState::Failed(_)));
    let QueueState::Failed(message) = state else {
        unreachable!();
    };
    assert!(message.contains("model file missing"));
    assert!(queue.status().starts_with("Failed: "));
    assert_eq!(seen.lock().unwrap().len(), 1);

    // Nothing ever runs on a failed queue.
    let (task, rx) = ScriptedTask::new(Outcome::Succeed);
    queue.add_task(task);
    queue.shutdown(true);
    assert!(rx.blocking_recv().is_err());
}

#[test]
fn test_missing_pattern_sets_fail_startup() {
    let queue = WorkQueue::start(Box::new(EchoLoader)).unwrap();
    queue
        .initialize(EngineSettings {
            language: "English".to_string(),
            pattern_sets: Some("/definitely/missing/patterns.list".into()),
            ..Default::default()
        })
        .unwrap();
    let state = wait_for_state(&queue, |s| *s != QueueState::Starting);
    assert!(matches!(state, QueueState::Failed(_)));
    queue.shutdown(true);
}

#[test]
fn test_builtin_tasks_against_echo_engine() {
    let queue = ready_queue();

    let (process, process_rx) = ProcessDocumentTask::new(ProcessDocumentRequest {
        session_id: "s1".to_string(),
        end_stage: Some("no-such-stage".to_string()),
        document: "<Document/>".to_string(),
        ..Default::default()
    });
    queue.add_task(Box::new(process));
    let Ok(TaskReply::Error { code, explanation }) = process_rx.blocking_recv() else {
        panic!("unknown stage should fail");
    };
    assert_eq!(code, 400);
    assert!(explanation.contains("no-such-stage"));

    let (convert, convert_rx) = ConvertTask::new(ConvertRequest {
        session_id: "s2".to_string(),
        source: SourceKind::RawText,
        format: OutputFormat::Apf,
        content: "hello".to_string(),
    });
    queue.add_task(Box::new(convert));
    let Ok(TaskReply::Response(apf)) = convert_rx.blocking_recv() else {
        panic!("conversion should succeed");
    };
    assert!(apf.contains("hello"));
    queue.shutdown(true);
}
