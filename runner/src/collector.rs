use crate::config::ConfigErrors;
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Data files matched by an import pattern, in sorted order.
///
/// Patterns may contain wildcards and `{a,b,c}` alternatives, e.g.
/// `/data/trips_xa{a,b,c}.csv.gz`.
#[derive(Debug)]
pub struct Collector {
    paths: std::vec::IntoIter<PathBuf>,
}

const GLOB_CHARS: [char; 4] = ['*', '?', '[', '{'];

fn is_literal(component: &Component) -> bool {
    !component
        .as_os_str()
        .to_string_lossy()
        .contains(&GLOB_CHARS[..])
}

/// the deepest directory of `pattern` that contains no glob syntax
fn walk_root(pattern: &Path) -> PathBuf {
    pattern.components().take_while(is_literal).collect()
}

impl Collector {
    pub fn load(pattern: &str) -> Result<Self, ConfigErrors> {
        Self::load_from(pattern, Path::new("."))
    }

    /// Resolve `pattern` with relative patterns taken relative to `cwd`. Paths of a
    /// relative pattern are returned relative as well.
    pub fn load_from(pattern: &str, cwd: &Path) -> Result<Self, ConfigErrors> {
        let pattern = pattern.trim_start_matches("./");

        if !pattern.contains(&GLOB_CHARS[..]) {
            let path = PathBuf::from(pattern);
            let paths = if cwd.join(&path).is_file() { vec![path] } else { Vec::new() };

            return Ok(Self {
                paths: paths.into_iter(),
            });
        }

        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        let relative = Path::new(pattern).is_relative();
        let root = cwd.join(walk_root(Path::new(pattern)));

        debug!("Filtering {root:?} with glob: {glob:?}");

        let paths = WalkBuilder::new(&root)
            .standard_filters(false)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
            .map(DirEntry::into_path)
            .map(|path| match path.strip_prefix(cwd) {
                Ok(stripped) if relative => stripped.to_path_buf(),
                _ => path,
            })
            .filter(|path| glob.is_match(path))
            .sorted()
            .collect_vec();

        Ok(Self {
            paths: paths.into_iter(),
        })
    }
}

impl Iterator for Collector {
    type Item = PathBuf;

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }

    fn next(&mut self) -> Option<Self::Item> {
        self.paths.next()
    }
}
