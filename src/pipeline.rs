//! Source file to runnable program: tokenize, parse, resolve imports,
//! compile.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::bytecode::{Compiler, FunTable};
use crate::error::Error;
use crate::frontend::lexer::Lexer;
use crate::frontend::preprocess::{Preprocessor, SourceReader};
use crate::frontend::token::Spanned;
use crate::runtime::{Builtins, Fault, OutputSink, RuntimeError, Snapshot, Vm, VmConfig};

/// Environment variable holding extra import directories.
pub const SEARCH_PATH_VAR: &str = "SBL_PATH";

#[derive(Debug, Clone, Default)]
pub struct LoadConfig {
    /// Directories tried, in order, for imports not found next to the
    /// importing file.
    pub search_dirs: Vec<PathBuf>,
    /// Checked between files by [`load_programs`].
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl LoadConfig {
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Appends the `:`-separated directories of `SBL_PATH`, if set.
    pub fn with_env(mut self) -> Self {
        if let Some(value) = env::var_os(SEARCH_PATH_VAR) {
            self.search_dirs.extend(split_search_path(&value.to_string_lossy()));
        }
        self
    }
}

fn split_search_path(value: &str) -> impl Iterator<Item = PathBuf> + '_ {
    value
        .split(':')
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
}

/// Loads one file and everything it imports into a function table.
pub fn load_program(
    path: &Path,
    config: &LoadConfig,
    builtins: &Builtins,
    reader: &dyn SourceReader,
) -> Result<FunTable, Error> {
    let defs = Preprocessor::new(reader)
        .with_search_dirs(config.search_dirs.iter().cloned())
        .load(path)?;
    let table = Compiler::new(builtins).compile(&defs)?;
    debug!("{}: loaded {} functions", path.display(), table.len());
    Ok(table)
}

/// Loads several files independently and merges their tables.
///
/// Every file is attempted; the errors of all failing files are returned
/// together. A name defined by two files is a compile error. When the
/// interrupt flag is raised, loading stops before the next file and after
/// the last one with an [`Fault::Interrupted`] error.
pub fn load_programs(
    paths: &[PathBuf],
    config: &LoadConfig,
    builtins: &Builtins,
    reader: &dyn SourceReader,
) -> Result<FunTable, Vec<Error>> {
    let mut merged = FunTable::new();
    let mut errors = Vec::new();

    for path in paths {
        if config.interrupted() {
            break;
        }
        match load_program(path, config, builtins, reader) {
            Ok(table) => {
                if errors.is_empty() {
                    if let Err(e) = merged.merge(table) {
                        errors.push(Error::from(e));
                    }
                }
            }
            Err(e) => errors.push(e),
        }
    }

    if config.interrupted() {
        debug!("interrupted while loading");
        errors.push(Error::from(RuntimeError::new(Fault::Interrupted)));
    }

    if errors.is_empty() {
        Ok(merged)
    } else {
        Err(errors)
    }
}

/// Every token of a file, comments included.
pub fn tokenize_file(path: &Path, reader: &dyn SourceReader) -> Result<Vec<Spanned>, Error> {
    let text = reader.read(path).map_err(|e| Error::io(path, e))?;
    let tokens = Lexer::new(&text, Arc::from(path))
        .tokenize()
        .map_err(|e| Error::Syntax(e.into()))?;
    Ok(tokens)
}

/// Runs `main`. On failure the VM state at the failing instruction is
/// returned alongside the error.
pub fn run_program<O: OutputSink>(
    table: &FunTable,
    builtins: &Builtins,
    config: VmConfig,
    out: O,
) -> Result<(), (Error, Snapshot)> {
    let mut vm = Vm::new(table, builtins, config, out);
    vm.run().map_err(|e| (Error::from(e), vm.snapshot()))
}
