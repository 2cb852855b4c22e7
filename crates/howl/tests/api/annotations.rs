use crate::helper::{annotate, annotate_with, as_json, values};
use howl::{AnnotationLog, AnnotatorConfig, MacroResolution};
use pretty_assertions::assert_eq;
use serde_json::json;

fn expected(rows: &[(u32, &str)]) -> Vec<(u32, String)> {
    rows.iter()
        .map(|(line, value)| (*line, value.to_string()))
        .collect()
}

#[test]
fn programs_without_annotations_produce_an_empty_log() {
    let log = annotate(
        r#"
a = 1
b = a + 1
if b > 1:
    pass
"#,
    );
    assert!(log.is_empty());
    assert_eq!(log.to_json(), "[]");
}

#[test]
fn bare_variables_are_echoed() {
    let log = annotate(
        r#"
x = 1
x
"#,
    );
    assert_eq!(
        as_json(&log),
        json!([{ "line_number": 2, "source": "x", "value": 1, "error": false }])
    );
}

#[test]
fn annotated_expressions_keep_their_side_effects() {
    let log = annotate(
        r#"
b = [1, 3, 4]
b.pop()  # ?
b
"#,
    );
    assert_eq!(
        as_json(&log),
        json!([
            { "line_number": 2, "source": "b.pop()  # ?", "value": 4, "error": false },
            { "line_number": 3, "source": "b", "value": "[1, 3]", "error": false },
        ])
    );
}

#[test]
fn observing_a_macro_does_not_mutate_the_program() {
    let log = annotate(
        r#"
a = [1, 2, 3]
total = len(a) + a.pop()  # ?
a
total
"#,
    );
    assert_eq!(
        values(&log),
        expected(&[(2, "6"), (3, "[1, 2]"), (4, "6")])
    );
    assert_eq!(log.records()[0].source, "total");
}

#[test]
fn the_first_failure_ends_the_log() {
    let log = annotate(
        r#"
x = 1
y = 0/0  # ?
x
z = 2  # ?
"#,
    );
    assert_eq!(log.len(), 1);
    let last = log.last().unwrap();
    assert!(last.error);
    assert_eq!(last.line_number, 2);
    assert_eq!(
        last.error_detail.as_deref(),
        Some("ZeroDivisionError: division by zero")
    );
    assert!(log.has_error());
}

#[test]
fn logs_survive_a_json_round_trip() {
    let log = annotate(
        r#"
flag = True
flag
nothing = None
nothing
nested = ["a", {"k": (1, "b")}]
nested
big = 2 ** 70
big
boom = {}["missing"]  # ?
"#,
    );
    let restored: AnnotationLog = serde_json::from_str(&log.to_json()).unwrap();
    assert_eq!(restored, log);
    assert_eq!(
        as_json(&restored),
        json!([
            { "line_number": 2, "source": "flag", "value": "True", "error": false },
            { "line_number": 4, "source": "nothing", "value": "None", "error": false },
            { "line_number": 6, "source": "nested", "value": "['a', {'k': (1, 'b')}]", "error": false },
            { "line_number": 8, "source": "big", "value": "1180591620717411303424", "error": false },
            {
                "line_number": 9,
                "source": "boom = {}[\"missing\"]  # ?",
                "error": true,
                "error_detail": "KeyError: 'missing'"
            },
        ])
    );
}

#[test]
fn loops_revisit_lines_in_execution_order() {
    let log = annotate(
        r#"
for t in range(3):
    t
"#,
    );
    assert_eq!(values(&log), expected(&[(2, "0"), (2, "1"), (2, "2")]));
}

#[test]
fn while_loops_interleave_prints_and_variables() {
    let log = annotate(
        r#"
a = 1
while a < 3:
    a
    print('Tick', a)
    a += 1
"#,
    );
    assert_eq!(
        values(&log),
        expected(&[(3, "1"), (4, "Tick 1"), (3, "2"), (4, "Tick 2")])
    );
}

#[test]
fn function_bodies_are_annotated_when_they_run() {
    let log = annotate(
        r#"
def double(n):
    n
    return n * 2

double(4)  # ?
"#,
    );
    assert_eq!(values(&log), expected(&[(5, "8"), (2, "4")]));
}

#[test]
fn augmented_macros_report_the_updated_target() {
    let log = annotate(
        r#"
count = 10
count -= 4  # ?
count
"#,
    );
    assert_eq!(values(&log), expected(&[(2, "6"), (3, "6")]));
    assert_eq!(log.records()[0].source, "count");
}

#[test]
fn comprehension_macros() {
    let log = annotate(
        r#"
inputs = [[6.4, 2.8, 2], [5.0, 2.3, 1], [4.9, 2.5, 2]]
labels = [x[-1] for x in inputs]  # ?
hat = labels  # ?
"#,
    );
    assert_eq!(values(&log), expected(&[(2, "[2, 1, 2]"), (3, "[2, 1, 2]")]));
}

#[test]
fn instances_use_their_repr() {
    let log = annotate(
        r#"
class Point:
    def __init__(self, x):
        self.x = x

    def __repr__(self):
        return "Point(" + str(self.x) + ")"

p = Point(3)
p
"#,
    );
    assert_eq!(values(&log), expected(&[(9, "Point(3)")]));
}

#[test]
fn callables_are_described_not_called() {
    let log = annotate(
        r#"
def shout():
    print("called")
shout
"#,
    );
    assert_eq!(values(&log), expected(&[(3, "<function shout>")]));
}

#[test]
fn uncaught_exceptions_become_the_final_record() {
    let log = annotate(
        r#"
x = 1
x
raise ValueError("boom")
x
"#,
    );
    assert_eq!(
        as_json(&log),
        json!([
            { "line_number": 2, "source": "x", "value": 1, "error": false },
            {
                "line_number": 3,
                "source": "raise ValueError(\"boom\")",
                "error": true,
                "error_detail": "ValueError: boom"
            },
        ])
    );
}

#[test]
fn uncaught_exceptions_point_at_the_innermost_line() {
    let log = annotate(
        r#"
def divide(a):
    return a / 0

divide(1)
"#,
    );
    let last = log.last().unwrap();
    assert_eq!(last.line_number, 2);
    assert_eq!(last.source, "return a / 0");
    assert_eq!(
        last.error_detail.as_deref(),
        Some("ZeroDivisionError: division by zero")
    );
}

#[test]
fn handled_exceptions_do_not_end_the_log() {
    let log = annotate(
        r#"
try:
    int("nope")
except ValueError as err:
    err
done = True
done
"#,
    );
    assert_eq!(
        values(&log),
        expected(&[
            (4, "ValueError(\"invalid literal for int() with base 10: 'nope'\")"),
            (6, "True"),
        ])
    );
}

#[test]
fn syntax_errors_yield_a_single_record() {
    let log = annotate(
        r#"
x = 1
x
y = = 2
"#,
    );
    assert_eq!(log.len(), 1);
    let record = log.last().unwrap();
    assert!(record.error);
    assert_eq!(record.line_number, 3);
    assert_eq!(record.source, "y = = 2");
    assert!(record
        .error_detail
        .as_deref()
        .is_some_and(|detail| detail.starts_with("SyntaxError: ")));
}

#[test]
fn deferred_resolution_reads_targets_after_the_call() {
    let config = AnnotatorConfig {
        resolution: MacroResolution::Deferred,
        ..AnnotatorConfig::default()
    };
    let log = annotate_with(
        r#"
def step(n):
    n
    return n + 1

y = step(1)  # ?
y
"#,
        config,
    );
    assert_eq!(values(&log), expected(&[(2, "1"), (5, "2"), (6, "2")]));
}

#[test]
fn custom_markers() {
    let config = AnnotatorConfig {
        marker: "=>".to_string(),
        ..AnnotatorConfig::default()
    };
    let log = annotate_with(
        r#"
a = 2 * 21  # =>
b = 1  # ?
"#,
        config,
    );
    assert_eq!(values(&log), expected(&[(1, "42")]));
}

#[test]
fn macros_do_not_mutate_instances_held_in_sets_or_dict_keys() {
    let log = annotate(
        r#"
class Counter:
    def __init__(self):
        self.n = 0

    def bump(self):
        self.n += 1
        return self.n

members = {Counter()}
keyed = {Counter(): "k"}
[c.bump() for c in members]  # ?
[c.bump() for c in keyed]  # ?
[c.n for c in members]  # ?
[c.n for c in keyed]  # ?
"#,
    );
    assert_eq!(
        values(&log),
        expected(&[(11, "[1]"), (12, "[1]"), (13, "[1]"), (14, "[1]")])
    );
}
