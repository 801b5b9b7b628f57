//! Import resolution.
//!
//! Flattens a parsed file and everything it imports into one list of
//! function definitions. Each file is read at most once per load; an import
//! of a file that has already been visited is skipped, which is also what
//! breaks import cycles.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace};
use thiserror::Error;

use crate::error::Error;
use crate::frontend::parser;
use crate::frontend::position::Range;
use crate::lang::ast::{FunDef, Import, Source};

/// Where source text comes from.
pub trait SourceReader {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn exists(&self, path: &Path) -> bool;
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Reads from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl SourceReader for FsReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

/// Serves files from memory. Paths are compared after lexical
/// normalization, so `lib/../a.sbl` and `a.sbl` are the same file.
#[derive(Debug, Clone, Default)]
pub struct MemReader {
    files: HashMap<PathBuf, String>,
}

impl MemReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.files.insert(normalize(path.as_ref()), text.into());
        self
    }
}

impl SourceReader for MemReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let path = normalize(path);
        if self.files.contains_key(&path) {
            Ok(path)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }
}

/// Drops `.` components and folds `..` into its parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// An import that names no existing file.
#[derive(Debug, Clone, Error)]
pub struct ImportError {
    pub literal: String,
    /// Every candidate path, in the order tried.
    pub tried: Vec<PathBuf>,
    pub file: Arc<Path>,
    pub range: Range,
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: cannot find import {:?}",
            self.file.display(),
            self.range,
            self.literal
        )?;
        write!(f, "\n  tried:")?;
        for path in &self.tried {
            write!(f, "\n    {}", path.display())?;
        }
        Ok(())
    }
}

pub struct Preprocessor<'r> {
    search_dirs: Vec<PathBuf>,
    reader: &'r dyn SourceReader,
}

impl<'r> Preprocessor<'r> {
    pub fn new(reader: &'r dyn SourceReader) -> Self {
        Preprocessor {
            search_dirs: Vec::new(),
            reader,
        }
    }

    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_dirs.extend(dirs);
        self
    }

    /// Reads and parses `path`, then flattens its imports.
    pub fn load(&self, path: &Path) -> Result<Vec<FunDef>, Error> {
        let canonical = self
            .reader
            .canonicalize(path)
            .map_err(|e| Error::io(path, e))?;
        let source = self.parse_file(path)?;

        let mut visited = HashSet::from([canonical]);
        let defs = self.preprocess(&source, &mut visited)?;
        debug!(
            "{}: {} functions from {} files",
            path.display(),
            defs.len(),
            visited.len()
        );
        Ok(defs)
    }

    /// The root file's own definitions followed by what its imports
    /// contribute, in import order.
    ///
    /// `visited` holds the canonical paths already loaded and should
    /// contain the root file itself.
    pub fn preprocess(
        &self,
        source: &Source,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Vec<FunDef>, Error> {
        let mut merged: Vec<FunDef> = source.fun_defs().cloned().collect();
        merged.extend(self.contributions(source, visited)?);
        Ok(merged)
    }

    /// Definitions pulled in by the imports of `source`. Each imported file
    /// contributes its own imports first, then its definitions.
    fn contributions(
        &self,
        source: &Source,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Vec<FunDef>, Error> {
        let mut out = Vec::new();

        for import in source.imports() {
            let resolved = self.resolve(import, &source.file)?;
            let canonical = self
                .reader
                .canonicalize(&resolved)
                .map_err(|e| Error::io(&resolved, e))?;

            if !visited.insert(canonical) {
                trace!("{}: already loaded, skipping", resolved.display());
                continue;
            }
            trace!("import {:?} -> {}", import.path, resolved.display());

            let chain = |e: Error| Error::Chained {
                path: source.file.to_path_buf(),
                range: import.range,
                source: Box::new(e),
            };
            let imported = self.parse_file(&resolved).map_err(chain)?;
            out.extend(self.contributions(&imported, visited).map_err(chain)?);
            out.extend(imported.fun_defs().cloned());
        }

        Ok(out)
    }

    /// Finds the file an import names.
    ///
    /// An absolute path is taken as is. A relative one is tried against the
    /// importing file's directory, then against each search directory.
    fn resolve(&self, import: &Import, importer: &Path) -> Result<PathBuf, Error> {
        let literal = Path::new(&import.path);

        let candidates: Vec<PathBuf> = if literal.is_absolute() {
            vec![literal.to_path_buf()]
        } else {
            let base = importer.parent().unwrap_or(Path::new(""));
            std::iter::once(base.join(literal))
                .chain(self.search_dirs.iter().map(|dir| dir.join(literal)))
                .collect()
        };

        match candidates.iter().find(|c| self.reader.exists(c)) {
            Some(found) => Ok(found.clone()),
            None => Err(Error::Import(ImportError {
                literal: import.path.clone(),
                tried: candidates,
                file: Arc::from(importer),
                range: import.range,
            })),
        }
    }

    fn parse_file(&self, path: &Path) -> Result<Source, Error> {
        let text = self.reader.read(path).map_err(|e| Error::io(path, e))?;
        Ok(parser::parse(&text, Arc::from(path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn names(defs: &[FunDef]) -> Vec<&str> {
        defs.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_no_imports() {
        let reader = MemReader::new().with_file("m.sbl", "main { } f { }");
        let defs = Preprocessor::new(&reader).load(Path::new("m.sbl")).unwrap();
        assert_eq!(names(&defs), vec!["main", "f"]);
    }

    #[test]
    fn test_merge_order() {
        let reader = MemReader::new()
            .with_file("m.sbl", "import \"a.sbl\"; main { } import \"b.sbl\";")
            .with_file("a.sbl", "import \"c.sbl\"; a { }")
            .with_file("b.sbl", "b { }")
            .with_file("c.sbl", "c { }");
        let defs = Preprocessor::new(&reader).load(Path::new("m.sbl")).unwrap();
        assert_eq!(names(&defs), vec!["main", "c", "a", "b"]);
        assert_eq!(defs[1].file.as_ref(), Path::new("c.sbl"));
    }

    #[test]
    fn test_self_and_cyclic_imports_are_skipped() {
        let reader = MemReader::new()
            .with_file("m.sbl", "import \"m.sbl\"; import \"a.sbl\"; main { }")
            .with_file("a.sbl", "import \"./m.sbl\"; import \"a.sbl\"; a { }");
        let defs = Preprocessor::new(&reader).load(Path::new("m.sbl")).unwrap();
        assert_eq!(names(&defs), vec!["main", "a"]);
    }

    #[test]
    fn test_diamond_loads_shared_file_once() {
        let reader = MemReader::new()
            .with_file("m.sbl", "import \"a.sbl\"; import \"b.sbl\"; main { }")
            .with_file("a.sbl", "import \"s.sbl\"; a { }")
            .with_file("b.sbl", "import \"s.sbl\"; b { }")
            .with_file("s.sbl", "shared { }");
        let defs = Preprocessor::new(&reader).load(Path::new("m.sbl")).unwrap();
        assert_eq!(names(&defs), vec!["main", "shared", "a", "b"]);
    }

    #[test]
    fn test_relative_to_importer_then_search_dirs() {
        let reader = MemReader::new()
            .with_file("src/m.sbl", "import \"util/u.sbl\"; import \"std.sbl\"; main { }")
            .with_file("src/util/u.sbl", "import \"helper.sbl\"; u { }")
            .with_file("src/util/helper.sbl", "helper { }")
            .with_file("lib/std.sbl", "std { }");
        let defs = Preprocessor::new(&reader)
            .with_search_dirs([PathBuf::from("lib")])
            .load(Path::new("src/m.sbl"))
            .unwrap();
        assert_eq!(names(&defs), vec!["main", "helper", "u", "std"]);
    }

    #[test]
    fn test_missing_import_lists_candidates() {
        let reader = MemReader::new().with_file("src/m.sbl", "import \"nope.sbl\";");
        let err = Preprocessor::new(&reader)
            .with_search_dirs([PathBuf::from("lib1"), PathBuf::from("lib2")])
            .load(Path::new("src/m.sbl"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImportResolution);
        let Error::Import(import) = &err else {
            panic!("expected import error, got {:?}", err);
        };
        assert_eq!(
            import.tried,
            vec![
                PathBuf::from("src/nope.sbl"),
                PathBuf::from("lib1/nope.sbl"),
                PathBuf::from("lib2/nope.sbl"),
            ]
        );
        let msg = err.to_string();
        assert!(msg.starts_with("src/m.sbl:1:1-18: cannot find import"), "msg was: {}", msg);
    }

    #[test]
    fn test_error_in_nested_import_is_chained() {
        let reader = MemReader::new()
            .with_file("m.sbl", "import \"a.sbl\"; main { }")
            .with_file("a.sbl", "import \"b.sbl\";")
            .with_file("b.sbl", "b { 1 }");
        let err = Preprocessor::new(&reader)
            .load(Path::new("m.sbl"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Chained);
        assert_eq!(err.root_cause().kind(), ErrorKind::Parse);
        assert_eq!(
            err.import_chain(),
            vec![Path::new("m.sbl"), Path::new("a.sbl")]
        );
        let msg = err.to_string();
        assert!(msg.starts_with("b.sbl:1:7:"), "msg was: {}", msg);
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let reader = MemReader::new();
        let err = Preprocessor::new(&reader)
            .load(Path::new("gone.sbl"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/./b/../c.sbl")), PathBuf::from("a/c.sbl"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }
}
