//! Annotation runs on dedicated threads.
//!
//! The interpreter is single-threaded, so each request gets its own thread
//! and talks back to the async side through channels.

use crate::protocol::Request;
use howl::{AnnotationLog, AnnotationRecord, Annotator, AnnotatorConfig, HowlResult, WORKER_STACK_SIZE};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Name programs submitted as raw source run under.
const RAW_SOURCE_NAME: &str = "<source>";

pub struct Job {
    /// Records in the order the engine produced them.
    pub records: mpsc::UnboundedReceiver<AnnotationRecord>,
    /// Resolves once the run ends; an error means the worker died.
    pub done: oneshot::Receiver<HowlResult<AnnotationLog>>,
    pub cancel: Arc<AtomicBool>,
}

pub fn spawn(request: Request) -> std::io::Result<Job> {
    let (record_sender, records) = mpsc::unbounded_channel();
    let (done_sender, done) = oneshot::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    std::thread::Builder::new()
        .name("howl-worker".into())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let mut annotator = Annotator::new(AnnotatorConfig {
                capture_output: true,
                ..AnnotatorConfig::default()
            });
            annotator.set_cancel_flag(flag);
            annotator.on_record(move |record| {
                let _ = record_sender.send(record.clone());
            });
            let result = match request {
                Request::Source(text) => annotator.run_source(RAW_SOURCE_NAME, &text),
                Request::File(path) => annotator.run_file(&path),
            };
            let _ = done_sender.send(result);
        })?;

    Ok(Job {
        records,
        done,
        cancel,
    })
}
