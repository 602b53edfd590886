//! The expansion capability: turning a source file into its serialized,
//! fully expanded tree.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
    rc::Rc,
};

use serde_json::Value as Json;

use crate::runtime::error::ExpansionError;

pub trait Expander {
    /// Expands `source`, reusing a cached expansion when it is fresh.
    fn expand(&self, source: &Path) -> Result<Json, ExpansionError>;

    /// Expands `source` without reading or writing any cache.
    fn expand_uncached(&self, source: &Path) -> Result<Json, ExpansionError>;
}

impl<E: Expander + ?Sized> Expander for Rc<E> {
    fn expand(&self, source: &Path) -> Result<Json, ExpansionError> {
        (**self).expand(source)
    }

    fn expand_uncached(&self, source: &Path) -> Result<Json, ExpansionError> {
        (**self).expand_uncached(source)
    }
}

/// Runs the Racket expander as an external process.
pub struct RacketExpander {
    racket: String,
    lib: String,
    use_cache: bool,
}

impl RacketExpander {
    pub fn new(racket: impl Into<String>, lib: impl Into<String>) -> Self {
        Self {
            racket: racket.into(),
            lib: lib.into(),
            use_cache: true,
        }
    }

    /// Reads `CAPY_RACKET` and `CAPY_EXPANDER_LIB`.
    pub fn from_env() -> Self {
        let racket = std::env::var("CAPY_RACKET").unwrap_or_else(|_| "racket".to_owned());
        let lib = std::env::var("CAPY_EXPANDER_LIB").unwrap_or_else(|_| "pycket/expand".to_owned());
        Self::new(racket, lib)
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.racket);
        cmd.arg("-l").arg(&self.lib).arg("--");
        cmd
    }

    fn run(&self, mut cmd: Command, source: &Path) -> Result<Vec<u8>, ExpansionError> {
        log::debug!(target: "expand", "running {:?}", cmd);
        let output = cmd.output().map_err(|err| match err.kind() {
            ErrorKind::NotFound => ExpansionError::NoOutput {
                path: source.to_path_buf(),
            },
            _ => ExpansionError::Io {
                path: source.to_path_buf(),
                source: err,
            },
        })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ExpansionError::Failed {
                path: source.to_path_buf(),
                status: output.status,
                output: text,
            });
        }
        Ok(output.stdout)
    }

    /// Runs the tool with `--output tmp` and parses what it wrote.
    fn expand_to(&self, source: &Path, tmp: &Path) -> Result<Json, ExpansionError> {
        let mut cmd = self.command();
        cmd.arg("--output").arg(tmp).arg(source);
        self.run(cmd, source)?;
        let data = fs::read(tmp).map_err(|err| ExpansionError::Io {
            path: tmp.to_path_buf(),
            source: err,
        })?;
        parse_json(&data, source)
    }
}

impl Expander for RacketExpander {
    fn expand(&self, source: &Path) -> Result<Json, ExpansionError> {
        if !self.use_cache {
            return self.expand_uncached(source);
        }

        let json = json_path(source);
        if !needs_update(source, &json) {
            log::debug!(target: "expand", "using cached expansion {}", json.display());
            return read_json(&json);
        }

        let metadata = fs::metadata(source).map_err(|err| ExpansionError::Io {
            path: source.to_path_buf(),
            source: err,
        })?;
        // a read-only source usually means its directory is not ours either
        if metadata.permissions().readonly() {
            return Err(ExpansionError::PermissionDenied { path: json });
        }

        let tmp = PathBuf::from(format!("{}.{}.tmp", json.display(), std::process::id()));
        if let Err(err) = fs::File::create(&tmp) {
            return Err(match err.kind() {
                ErrorKind::PermissionDenied => ExpansionError::PermissionDenied { path: json },
                _ => ExpansionError::Io {
                    path: tmp,
                    source: err,
                },
            });
        }

        log::debug!(target: "expand", "expanding {} to {}", source.display(), json.display());
        // only a parsed expansion replaces the cache
        let tree = match self.expand_to(source, &tmp) {
            Ok(tree) => tree,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(err);
            }
        };

        fs::rename(&tmp, &json).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            match err.kind() {
                ErrorKind::PermissionDenied => ExpansionError::PermissionDenied { path: json.clone() },
                _ => ExpansionError::Io {
                    path: json.clone(),
                    source: err,
                },
            }
        })?;
        Ok(tree)
    }

    fn expand_uncached(&self, source: &Path) -> Result<Json, ExpansionError> {
        log::debug!(target: "expand", "expanding {} to stdout", source.display());
        let mut cmd = self.command();
        cmd.arg("--stdout").arg(source);
        let output = self.run(cmd, source)?;
        parse_json(&output, source)
    }
}

/// Where the cached expansion of `source` lives.
pub fn json_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// True unless `json` exists and is newer than `source`.
pub fn needs_update(source: &Path, json: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified());
    match (modified(source), modified(json)) {
        (Ok(source), Ok(json)) => source >= json,
        _ => true,
    }
}

fn read_json(path: &Path) -> Result<Json, ExpansionError> {
    let data = fs::read(path).map_err(|err| ExpansionError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    parse_json(&data, path)
}

fn parse_json(data: &[u8], path: &Path) -> Result<Json, ExpansionError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(ExpansionError::NoOutput {
            path: path.to_path_buf(),
        });
    }
    serde_json::from_slice(data).map_err(|err| ExpansionError::Json {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Serves expansions from memory. Counts how often each strategy runs.
#[derive(Default)]
pub struct MemoryExpander {
    trees: HashMap<PathBuf, Json>,
    /// Sources whose cached expansion cannot be written.
    read_only: HashSet<PathBuf>,
    expansions: Cell<usize>,
    uncached: Cell<usize>,
}

impl MemoryExpander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<PathBuf>, tree: Json) {
        self.trees.insert(source.into(), tree);
    }

    pub fn set_read_only(&mut self, source: impl Into<PathBuf>) {
        self.read_only.insert(source.into());
    }

    /// Number of successful expansions, cached or not.
    pub fn expansions(&self) -> usize {
        self.expansions.get()
    }

    pub fn uncached_expansions(&self) -> usize {
        self.uncached.get()
    }

    fn lookup(&self, source: &Path) -> Result<Json, ExpansionError> {
        let tree = self
            .trees
            .get(source)
            .cloned()
            .ok_or_else(|| ExpansionError::NoOutput {
                path: source.to_path_buf(),
            })?;
        self.expansions.set(self.expansions.get() + 1);
        Ok(tree)
    }
}

impl Expander for MemoryExpander {
    fn expand(&self, source: &Path) -> Result<Json, ExpansionError> {
        if self.read_only.contains(source) {
            return Err(ExpansionError::PermissionDenied {
                path: json_path(source),
            });
        }
        self.lookup(source)
    }

    fn expand_uncached(&self, source: &Path) -> Result<Json, ExpansionError> {
        self.uncached.set(self.uncached.get() + 1);
        self.lookup(source)
    }
}
