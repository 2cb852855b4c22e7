use crate::ast::Program;
use crate::diagnostics::{HowlError, HowlResult};
use crate::parser;
use crate::position::FileId;
use crate::source::SourceFile;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions tried, in order, when resolving `import name`.
pub const MODULE_EXTENSIONS: &[&str] = &["howl", "py"];

/// A parsed program together with the text it came from.
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub file: SourceFile,
    pub program: Program,
}

/// Reads and parses program files and resolves sibling modules.
#[derive(Debug, Clone, Default)]
pub struct Loader {
    search_paths: Vec<PathBuf>,
    next_id: u32,
}

impl Loader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            next_id: 0,
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn set_search_paths(&mut self, paths: Vec<PathBuf>) {
        self.search_paths = paths;
    }

    /// Reads a file from disk. A missing file is reported as
    /// [`HowlError::MissingTarget`].
    pub fn read(&mut self, path: &Path) -> HowlResult<SourceFile> {
        if !path.is_file() {
            return Err(HowlError::MissingTarget(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(self.source(path.display().to_string(), text))
    }

    /// Registers in-memory text under a file name.
    pub fn source(&mut self, name: impl Into<String>, text: impl Into<String>) -> SourceFile {
        let id = FileId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let text: String = text.into();
        SourceFile::new(id, name.into(), text)
    }

    pub fn parse(&self, file: SourceFile) -> HowlResult<LoadedProgram> {
        let program = parser::parse_program(&file)?;
        debug!(file = %file.name, statements = program.body.statements.len(), "parsed program");
        Ok(LoadedProgram { file, program })
    }

    pub fn load(&mut self, path: &Path) -> HowlResult<LoadedProgram> {
        let file = self.read(path)?;
        self.parse(file)
    }

    /// Finds `name.howl` or `name.py` in the search paths.
    pub fn find_module(&self, name: &str) -> Option<PathBuf> {
        self.search_paths.iter().find_map(|dir| {
            MODULE_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{name}.{ext}")))
                .find(|candidate| candidate.is_file())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported_as_missing_targets() {
        let mut loader = Loader::default();
        let err = loader.load(Path::new("/definitely/not/here.howl")).unwrap_err();
        assert!(matches!(err, HowlError::MissingTarget(_)));
    }

    #[test]
    fn finds_sibling_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("helpers.py"), "x = 1\n").unwrap();
        let loader = Loader::new(vec![dir.path().to_path_buf()]);
        assert!(loader.find_module("helpers").is_some());
        assert!(loader.find_module("other").is_none());
    }
}
