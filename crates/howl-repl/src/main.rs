use anyhow::Result;
use howl::{AnnotationRecord, Annotator};
use rustyline::{error::ReadlineError, DefaultEditor};

const HELP: &str = "Commands:\n  :quit/:exit  leave the REPL\n  :help        show this message\n\nType a snippet; an empty line runs it. Mark lines with `# ?` to see their values.";

fn main() -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut annotator = Annotator::default();
    println!("Howl {} annotation REPL. Type :help for help", howl::VERSION);

    let mut snippet = String::new();
    loop {
        let prompt = if snippet.is_empty() { "howl> " } else { "....> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if snippet.is_empty() {
                    match trimmed {
                        ":quit" | ":exit" => break,
                        ":help" => {
                            println!("{HELP}");
                            continue;
                        }
                        "" => continue,
                        _ => {}
                    }
                }
                if !trimmed.is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                    snippet.push_str(&line);
                    snippet.push('\n');
                    continue;
                }
                run(&mut annotator, &std::mem::take(&mut snippet));
            }
            Err(ReadlineError::Interrupted) => snippet.clear(),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("repl error: {err}");
                break;
            }
        }
    }
    Ok(())
}

fn run(annotator: &mut Annotator, snippet: &str) {
    let json = annotator.test(snippet);
    let output = annotator.take_captured_output();
    if !output.is_empty() {
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }
    match serde_json::from_str::<Vec<AnnotationRecord>>(&json) {
        Ok(records) if records.is_empty() => println!("(no annotations)"),
        Ok(records) => {
            for record in records {
                print_record(&record);
            }
        }
        Err(err) => eprintln!("error: unreadable annotation log: {err}"),
    }
}

fn print_record(record: &AnnotationRecord) {
    match (&record.value, &record.error_detail) {
        (Some(value), _) => println!("line {}: {value}", record.line_number),
        (None, Some(detail)) => eprintln!("line {}: error: {detail}", record.line_number),
        (None, None) => println!("line {}: {}", record.line_number, record.source),
    }
}
