//! Multi-module archive assembly.
//!
//! The execution engine takes a single input stream: a serialised mapping of
//! compiled file paths and module names. This module compiles an entry file,
//! reads its header back to discover imports, resolves those against the
//! search paths and recurses until the import closure is compiled.

use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::compiler::{CompileOptions, compile};
use crate::serialization::{self, DecodeError, Value};

pub const SOURCE_EXTENSION: &str = "elk";
pub const COMPILED_EXTENSION: &str = "elkc";

#[derive(Debug)]
pub enum LinkError {
    ModuleNotFound(String),
    Compile(crate::compiler::error::CompileError),
    Decode(PathBuf, DecodeError),
    Io(io::Error),
}

impl From<crate::compiler::error::CompileError> for LinkError {
    fn from(error: crate::compiler::error::CompileError) -> Self {
        LinkError::Compile(error)
    }
}

impl From<io::Error> for LinkError {
    fn from(error: io::Error) -> Self {
        LinkError::Io(error)
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::ModuleNotFound(module) => {
                write!(f, "could not find module {module}")
            }
            LinkError::Compile(error) => write!(f, "{error}"),
            LinkError::Decode(path, error) => {
                write!(f, "bad compiled module {}: {error}", path.display())
            }
            LinkError::Io(error) => write!(f, "{error}"),
        }
    }
}

/// Compiles `entry` and its import closure, returning the serialised
/// archive. With no search paths given, the entry's directory is used.
pub fn runspec(
    entry: &Path,
    search_paths: &[PathBuf],
) -> Result<Vec<u8>, LinkError> {
    let paths = if search_paths.is_empty() {
        vec![entry.parent().unwrap_or(Path::new(".")).to_path_buf()]
    } else {
        search_paths.to_vec()
    };
    let mut runspec = Runspec::new(paths);
    runspec.add_file(entry)?;
    Ok(runspec.to_bytes())
}

pub struct Runspec {
    search_paths: Vec<PathBuf>,
    options: CompileOptions,
    files: Vec<PathBuf>,
    compiled_files: Vec<PathBuf>,
    modules: Vec<String>,
    conclusion: Option<Vec<u8>>,
}

impl Runspec {
    pub fn new(search_paths: Vec<PathBuf>) -> Runspec {
        Runspec::with_options(search_paths, CompileOptions::default())
    }

    pub fn with_options(
        search_paths: Vec<PathBuf>,
        options: CompileOptions,
    ) -> Runspec {
        Runspec {
            search_paths,
            options,
            files: Vec::new(),
            compiled_files: Vec::new(),
            modules: Vec::new(),
            conclusion: None,
        }
    }

    /// Compiles `fname` (unless already seen), then its imports, depth
    /// first. Imported modules end up before their importers in the archive.
    pub fn add_file(&mut self, fname: &Path) -> Result<(), LinkError> {
        let fname = fname.to_path_buf();
        if self.files.contains(&fname) {
            return Ok(());
        }
        self.files.push(fname.clone());
        let (compiled, modname) = self.compile_file(&fname)?;
        let header = read_compiled_header(&compiled)?;
        for import in header_imports(&header) {
            let found = self.find_module(&import)?;
            self.add_file(&found)?;
        }
        self.compiled_files.push(compiled);
        self.modules.push(modname);
        Ok(())
    }

    fn compile_file(
        &self,
        fname: &Path,
    ) -> Result<(PathBuf, String), LinkError> {
        let source = fs::read_to_string(fname)?;
        let modname = self.module_name(fname);
        let absolute = fname
            .canonicalize()
            .unwrap_or_else(|_| fname.to_path_buf());
        debug!("compiling {} as module {modname}", absolute.display());
        let bytes = compile(
            &source,
            &absolute.display().to_string(),
            &modname,
            &self.options,
        )?;
        let compiled = fname.with_extension(COMPILED_EXTENSION);
        // truncate-write-close; the handle is released on every path
        fs::write(&compiled, &bytes)?;
        Ok((compiled, modname))
    }

    /// Module name: the shortest path relative to any search root, dots for
    /// separators, with a trailing `__main__` component dropped.
    fn module_name(&self, fname: &Path) -> String {
        let resolved = fname
            .canonicalize()
            .unwrap_or_else(|_| fname.to_path_buf());
        let mut best: Option<Vec<String>> = None;
        for root in &self.search_paths {
            let root = root
                .canonicalize()
                .unwrap_or_else(|_| root.to_path_buf());
            if let Ok(rel) = resolved.strip_prefix(&root) {
                let mut parts: Vec<String> = rel
                    .with_extension("")
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => {
                            Some(part.to_string_lossy().into_owned())
                        }
                        _ => None,
                    })
                    .collect();
                if parts.last().map(String::as_str) == Some("__main__") {
                    parts.pop();
                }
                if best.as_ref().is_none_or(|b| parts.len() < b.len()) {
                    best = Some(parts);
                }
            }
        }
        match best {
            Some(parts) if !parts.is_empty() => parts.join("."),
            _ => resolved
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Searches each path for `<mod/with/slashes>.elk`, then for
    /// `<mod>/__main__.elk`.
    fn find_module(&self, modname: &str) -> Result<PathBuf, LinkError> {
        for path in &self.search_paths {
            let base = path.join(modname.replace('.', "/"));
            let file = base.with_extension(SOURCE_EXTENSION);
            if file.is_file() {
                return Ok(file);
            }
            let main = base.join(format!("__main__.{SOURCE_EXTENSION}"));
            if main.is_file() {
                return Ok(main);
            }
        }
        Err(LinkError::ModuleNotFound(modname.to_owned()))
    }

    /// Compiles a conclusion snippet to run after the modules; an empty
    /// source clears it.
    pub fn set_conclusion(&mut self, source: &str) -> Result<(), LinkError> {
        if source.is_empty() {
            self.conclusion = None;
            return Ok(());
        }
        let bytes =
            compile(source, "<conclusion>", "conclusion", &self.options)?;
        self.conclusion = Some(bytes);
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let archive = Value::Dict(vec![
            (
                Value::from("files"),
                Value::List(
                    self.compiled_files
                        .iter()
                        .map(|f| Value::Str(f.display().to_string()))
                        .collect(),
                ),
            ),
            (
                Value::from("modules"),
                Value::List(
                    self.modules
                        .iter()
                        .map(|m| Value::Str(m.clone()))
                        .collect(),
                ),
            ),
            (
                Value::from("conclusion"),
                match &self.conclusion {
                    Some(bytes) => Value::Bytes(bytes.clone()),
                    None => Value::None,
                },
            ),
        ]);
        serialization::serialise(&archive)
    }
}

/// Reads the header record (the first serialised value) of a compiled
/// module.
pub fn read_compiled_header(path: &Path) -> Result<Value, LinkError> {
    let bytes = fs::read(path)?;
    let (header, _) = serialization::deserialise(&bytes)
        .map_err(|e| LinkError::Decode(path.to_path_buf(), e))?;
    Ok(header)
}

fn header_imports(header: &Value) -> Vec<String> {
    let Value::Dict(entries) = header else {
        return Vec::new();
    };
    for (key, value) in entries {
        if key == &Value::from("imports")
            && let Value::List(items) = value
        {
            return items
                .iter()
                .filter_map(|item| match item {
                    Value::Str(name) => Some(name.clone()),
                    _ => None,
                })
                .collect();
        }
    }
    Vec::new()
}
