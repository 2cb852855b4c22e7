use crate::helper::{program, values, write_program};
use howl::{AnnotationRecord, Annotator, AnnotatorConfig, HowlError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[test]
fn missing_targets_are_errors_not_logs() {
    let mut annotator = Annotator::default();
    let err = annotator
        .run_file(Path::new("/definitely/not/here.py"))
        .unwrap_err();
    assert!(matches!(err, HowlError::MissingTarget(_)));
    assert_eq!(err.to_string(), "/definitely/not/here.py doesn't exist");
}

#[test]
fn files_can_import_their_siblings() {
    let dir = tempfile::tempdir().unwrap();
    write_program(
        dir.path(),
        "helpers.py",
        r#"
def triple(n):
    return n * 3

triple
"#,
    );
    let target = write_program(
        dir.path(),
        "main.py",
        r#"
import helpers
v = helpers.triple(2)  # ?
"#,
    );

    let mut annotator = Annotator::new(AnnotatorConfig {
        capture_output: true,
        ..AnnotatorConfig::default()
    });
    let log = annotator.run_file(&target).unwrap();
    assert_eq!(values(&log), vec![(2, "6".to_string())]);
}

#[test]
fn embedded_mode_returns_json_and_captures_output() {
    let mut annotator = Annotator::default();
    let output = annotator.test(program(
        r#"
print("hello")
greeting = "hi"  # ?
"#,
    ));
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(
        parsed,
        json!([
            { "line_number": 1, "source": "print(\"hello\")", "value": "hello", "error": false },
            { "line_number": 2, "source": "greeting", "value": "'hi'", "error": false },
        ])
    );
    assert_eq!(annotator.captured_output(), "hello\n");
    assert!(!annotator.config().capture_output);
}

#[test]
fn runs_are_independent() {
    let mut annotator = Annotator::default();
    let first = annotator.test("a = 1\na\n");
    let second = annotator.test("b = 2\nb\n");
    assert_eq!(first, r#"[{"line_number":2,"source":"a","value":1,"error":false}]"#);
    assert_eq!(second, r#"[{"line_number":2,"source":"b","value":2,"error":false}]"#);
}

#[test]
fn captured_output_belongs_to_the_latest_run() {
    let mut annotator = Annotator::default();
    annotator.test("print('first')\n");
    assert_eq!(annotator.captured_output(), "first\n");
    annotator.test("print('second')\n");
    assert_eq!(annotator.captured_output(), "second\n");
    annotator.test("x = 1\n");
    assert_eq!(annotator.take_captured_output(), "");
}

#[test]
fn direct_invocation_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let annotated = write_program(dir.path(), "annotated.py", "x = 3\nx\n");
    let quiet = write_program(dir.path(), "quiet.py", "x = 3\n");
    let config = AnnotatorConfig {
        capture_output: true,
        ..AnnotatorConfig::default()
    };

    assert_eq!(Annotator::new(config.clone()).main(&annotated), 0);
    assert_eq!(Annotator::new(config.clone()).main(&quiet), 1);
    assert_eq!(Annotator::new(config).main(&dir.path().join("absent.py")), 1);
}

#[test]
fn listeners_stream_every_record() {
    let seen: Rc<RefCell<Vec<AnnotationRecord>>> = Rc::default();
    let mut annotator = Annotator::new(AnnotatorConfig {
        capture_output: true,
        ..AnnotatorConfig::default()
    });
    let sink = seen.clone();
    annotator.on_record(move |record| sink.borrow_mut().push(record.clone()));

    let log = annotator
        .run_source("stream", "x = 1\nx\nx / 0  # ?\nx\n")
        .unwrap();
    assert_eq!(seen.borrow().as_slice(), log.records());
    assert_eq!(log.len(), 2);
    assert!(log.has_error());
}

#[test]
fn cancelled_runs_report_an_error() {
    let mut annotator = Annotator::default();
    annotator.cancel_flag().store(true, Ordering::SeqCst);
    let err = annotator.run_source("spin", "while True:\n    pass\n").unwrap_err();
    assert!(matches!(err, HowlError::Message(_)));
}

#[test]
fn cancellation_reaches_into_long_builtin_calls() {
    let mut annotator = Annotator::default();
    let flag = annotator.cancel_flag();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
    });
    let started = Instant::now();
    let err = annotator
        .run_source("long_sum", "x = sum(range(3 * 10 ** 7))\n")
        .unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, HowlError::Message(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn runaway_recursion_is_a_recursion_error() {
    let mut annotator = Annotator::new(AnnotatorConfig {
        capture_output: true,
        recursion_limit: 50,
        ..AnnotatorConfig::default()
    });
    let log = annotator
        .run_source(
            "recurse",
            "def down(n):\n    return down(n + 1)\n\ndown(0)\n",
        )
        .unwrap();
    let last = log.last().unwrap();
    assert!(last.error);
    assert!(last
        .error_detail
        .as_deref()
        .is_some_and(|detail| detail.starts_with("RecursionError")));
}
