use howl::{Annotator, AnnotatorConfig};
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/tour.py")));

    let mut annotator = Annotator::new(AnnotatorConfig::default());
    let log = annotator.run_file(&path)?;
    for record in &log {
        match (&record.value, &record.error_detail) {
            (Some(value), _) => println!("{:>4} | {:<30} => {value}", record.line_number, record.source),
            (None, Some(detail)) => println!("{:>4} | {:<30} !! {detail}", record.line_number, record.source),
            (None, None) => {}
        }
    }
    Ok(())
}
