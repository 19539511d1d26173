//! Concrete task kinds.

use crate::engine::{ConvertRequest, PatternMatchRequest, ProcessDocumentRequest};
use crate::envelope::Command;
use crate::queue::task::{EngineHandle, EngineKind, Responder, Task, TaskReply};

use tokio::sync::oneshot;

/// Builds the task for one envelope command.
pub fn task_for_command(command: Command) -> (Box<dyn Task>, oneshot::Receiver<TaskReply>) {
    match command {
        Command::ProcessDocument(request) => {
            let (task, rx) = ProcessDocumentTask::new(request);
            (Box::new(task), rx)
        }
        Command::PatternMatch(request) => {
            let (task, rx) = PatternMatchTask::new(request);
            (Box::new(task), rx)
        }
    }
}

fn wrong_engine(responder: &mut Responder, task: &str) -> bool {
    responder.report_error(500, format!("{} was handed the wrong engine", task));
    false
}

pub struct ProcessDocumentTask {
    request: ProcessDocumentRequest,
    responder: Responder,
}

impl ProcessDocumentTask {
    pub fn new(request: ProcessDocumentRequest) -> (Self, oneshot::Receiver<TaskReply>) {
        let (responder, rx) = Responder::channel();
        (Self { request, responder }, rx)
    }
}

impl Task for ProcessDocumentTask {
    fn kind(&self) -> EngineKind {
        EngineKind::Document
    }

    fn describe(&self) -> String {
        format!("ProcessDocument for session {}", self.request.session_id)
    }

    fn run(&mut self, engine: EngineHandle<'_>) -> bool {
        let EngineHandle::Document(engine) = engine else {
            return wrong_engine(&mut self.responder, "ProcessDocument");
        };
        let request = &self.request;

        if let Some(language) = &request.language {
            if !language.eq_ignore_ascii_case(engine.language()) {
                self.responder.report_error(
                    400,
                    format!(
                        "This server processes {} documents; the request is for {}",
                        engine.language(),
                        language
                    ),
                );
                return false;
            }
        }

        let mut positions = [None, None];
        for (slot, stage) in positions.iter_mut().zip([&request.start_stage, &request.end_stage]) {
            if let Some(stage) = stage {
                match engine.stage_position(stage) {
                    Some(p) => *slot = Some(p),
                    None => {
                        self.responder.report_error(400, format!("Unknown stage: {}", stage));
                        return false;
                    }
                }
            }
        }
        if let [Some(start), Some(end)] = positions {
            if start > end {
                self.responder
                    .report_error(400, "start_stage must not come after end_stage");
                return false;
            }
        }

        match engine.process(request) {
            Ok(output) => {
                self.responder.send_response(output);
                true
            }
            Err(e) => {
                self.responder.report_error(e.status_code(), e.to_string());
                false
            }
        }
    }

    fn responder(&mut self) -> &mut Responder {
        &mut self.responder
    }
}

pub struct PatternMatchTask {
    request: PatternMatchRequest,
    responder: Responder,
}

impl PatternMatchTask {
    pub fn new(request: PatternMatchRequest) -> (Self, oneshot::Receiver<TaskReply>) {
        let (responder, rx) = Responder::channel();
        (Self { request, responder }, rx)
    }
}

impl Task for PatternMatchTask {
    fn kind(&self) -> EngineKind {
        EngineKind::PatternSets
    }

    fn describe(&self) -> String {
        format!(
            "PatternMatch ({} slots) for session {}",
            self.request.slots.len(),
            self.request.session_id
        )
    }

    fn run(&mut self, engine: EngineHandle<'_>) -> bool {
        let EngineHandle::PatternSets(engine) = engine else {
            return wrong_engine(&mut self.responder, "PatternMatch");
        };
        let Some(engine) = engine else {
            self.responder.report_error(400, "No pattern sets are loaded");
            return false;
        };

        match engine.match_document(&self.request) {
            Ok(output) => {
                self.responder.send_response(output);
                true
            }
            Err(e) => {
                self.responder.report_error(e.status_code(), e.to_string());
                false
            }
        }
    }

    fn responder(&mut self) -> &mut Responder {
        &mut self.responder
    }
}

/// `sgm2apf`, `rawtext2xml` and friends.
pub struct ConvertTask {
    request: ConvertRequest,
    responder: Responder,
}

impl ConvertTask {
    pub fn new(request: ConvertRequest) -> (Self, oneshot::Receiver<TaskReply>) {
        let (responder, rx) = Responder::channel();
        (Self { request, responder }, rx)
    }
}

impl Task for ConvertTask {
    fn kind(&self) -> EngineKind {
        EngineKind::Document
    }

    fn describe(&self) -> String {
        format!(
            "{:?} to {} for session {}",
            self.request.source,
            self.request.format.as_str(),
            self.request.session_id
        )
    }

    fn run(&mut self, engine: EngineHandle<'_>) -> bool {
        let EngineHandle::Document(engine) = engine else {
            return wrong_engine(&mut self.responder, "Convert");
        };
        match engine.convert(&self.request) {
            Ok(output) => {
                self.responder.send_response(output);
                true
            }
            Err(e) => {
                self.responder.report_error(e.status_code(), e.to_string());
                false
            }
        }
    }

    fn responder(&mut self) -> &mut Responder {
        &mut self.responder
    }
}
