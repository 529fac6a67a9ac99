use crate::pe::PeReader;
use log::debug;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Shared handle to one walked binary.
pub type BinaryRef = Rc<RefCell<PeBinary>>;

/// Cache of walked binaries keyed by lower-cased DLL name.
pub type BinaryMap = BTreeMap<String, BinaryRef>;

/// Describes a PE binary and its import dependencies.
pub struct PeBinary {
    /// Where the binary was found.
    pub path: PathBuf,
    /// True when the file opened as a valid PE.
    pub found: bool,
    /// True when every direct import resolved.
    pub resolved: bool,
    /// True when the binary embeds a manifest resource.
    pub manifest: bool,
    /// Direct imports in import-table order.
    pub dependencies: Vec<Import>,
}

/// Describes an entry in an import table.
pub struct Import {
    /// DLL name exactly as imported.
    pub name: String,
    /// True for delay-loaded imports.
    pub delay_load: bool,
    /// The resolved binary, `None` when the DLL was not found.
    pub target: Option<BinaryRef>,
}

/// Directories a DLL name is resolved against, after the importing
/// binary's own directory.
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Extra directories first, then every entry of `PATH`.
    pub fn new(extra: Vec<PathBuf>) -> Self {
        let mut dirs = extra;
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        Self { dirs }
    }

    /// Only the given directories; the environment is not consulted.
    pub fn fixed(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Finds `name` in `origin` or the search directories,
    /// case-insensitively.
    pub fn resolve(&self, name: &str, origin: &Path) -> Option<PathBuf> {
        std::iter::once(origin)
            .chain(self.dirs.iter().map(PathBuf::as_path))
            .find_map(|dir| find_in_dir(dir, name))
    }
}

// Case-insensitive lookup so Windows import names match on
// case-sensitive file systems.
fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let direct = dir.join(name);
    if direct.is_file() {
        return Some(direct);
    }

    let lower = name.to_lowercase();
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().to_lowercase() == lower {
            let path = entry.path();
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}

/// Returns a recursive dependency tree for `path`; `cache` ends up
/// holding one entry per encountered binary.
pub fn collect_dependencies(path: &Path, cache: &mut BinaryMap, search: &SearchPath) -> BinaryRef {
    let key = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if let Some(existing) = cache.get(&key) {
        return Rc::clone(existing);
    }

    let node = Rc::new(RefCell::new(PeBinary {
        path: path.to_path_buf(),
        found: false,
        resolved: false,
        manifest: false,
        dependencies: Vec::new(),
    }));
    // insert before recursing so import cycles terminate
    cache.insert(key, Rc::clone(&node));

    let reader = match PeReader::open(path, false) {
        Ok(reader) if reader.is_valid_pe() => reader,
        Ok(_) => {
            debug!("{}: not a valid PE", path.display());
            return node;
        }
        Err(err) => {
            debug!("{}: {err}", path.display());
            return node;
        }
    };

    node.borrow_mut().found = true;
    node.borrow_mut().manifest = reader.has_manifest();

    let origin = path.parent().unwrap_or_else(|| Path::new("."));
    let imports: Vec<(String, bool)> = reader
        .dll_imports()
        .iter()
        .map(|name| (name.clone(), false))
        .chain(
            reader
                .delayed_dll_imports()
                .iter()
                .map(|name| (name.clone(), true)),
        )
        .collect();
    drop(reader);

    let mut all_resolved = true;
    for (name, delay_load) in imports {
        let target = search.resolve(&name, origin).map(|found| {
            collect_dependencies(&found, cache, search)
        });
        if target.is_none() {
            all_resolved = false;
        }
        node.borrow_mut().dependencies.push(Import {
            name,
            delay_load,
            target,
        });
    }
    node.borrow_mut().resolved = all_resolved;

    node
}

/// True when every binary reachable from `root` resolved all of its
/// direct imports.
pub fn subtree_resolved(root: &BinaryRef) -> bool {
    fn walk(node: &BinaryRef, visited: &mut HashSet<usize>) -> bool {
        if !visited.insert(Rc::as_ptr(node) as usize) {
            return true;
        }
        let node = node.borrow();
        if !node.resolved {
            return false;
        }
        node.dependencies
            .iter()
            .filter_map(|import| import.target.as_ref())
            .all(|target| walk(target, visited))
    }

    let mut visited = HashSet::new();
    walk(root, &mut visited)
}

/// Writes the plain-text dependency tree of `root`.
///
/// Each line is `[X][D][M] <name> -> <path>`: `!` for unresolved,
/// `D` for delay-loaded imports, `M` when the binary embeds a
/// manifest. With `missing_only`, subtrees whose imports all resolve
/// are dropped.
pub fn write_dependency_tree<W: Write + ?Sized>(
    out: &mut W,
    root: &BinaryRef,
    missing_only: bool,
) -> io::Result<()> {
    let borrowed = root.borrow();
    if missing_only && subtree_resolved(root) {
        return Ok(());
    }

    let name = borrowed
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| borrowed.path.display().to_string());
    let marker = if borrowed.found { ' ' } else { '!' };
    let manifest = if borrowed.manifest { 'M' } else { ' ' };
    writeln!(
        out,
        "[{marker}][ ][{manifest}] {name} -> {}",
        borrowed.path.display()
    )?;

    let mut chain = HashSet::new();
    chain.insert(Rc::as_ptr(root) as usize);
    write_imports(out, &borrowed, 1, &mut chain, missing_only)
}

fn write_imports<W: Write + ?Sized>(
    out: &mut W,
    node: &PeBinary,
    depth: usize,
    chain: &mut HashSet<usize>,
    missing_only: bool,
) -> io::Result<()> {
    for import in &node.dependencies {
        let resolved = import.target.is_some();
        if missing_only {
            let interesting = match &import.target {
                Some(target) => !subtree_resolved(target),
                None => true,
            };
            if !interesting {
                continue;
            }
        }

        let marker = if resolved { ' ' } else { '!' };
        let delay = if import.delay_load { 'D' } else { ' ' };
        let manifest = match &import.target {
            Some(target) if target.borrow().manifest => 'M',
            _ => ' ',
        };
        let location = match &import.target {
            Some(target) => target.borrow().path.display().to_string(),
            None => "not found".to_string(),
        };

        writeln!(
            out,
            "{:indent$}[{marker}][{delay}][{manifest}] {} -> {location}",
            "",
            import.name,
            indent = depth * 2
        )?;

        if let Some(target) = &import.target {
            let id = Rc::as_ptr(target) as usize;
            if chain.insert(id) {
                write_imports(out, &target.borrow(), depth + 1, chain, missing_only)?;
                chain.remove(&id);
            }
        }
    }
    Ok(())
}

/// Flat list of likely PE files under `path`; a plain file is
/// returned as-is.
pub fn list_pe_files(path: &Path) -> Vec<PathBuf> {
    const EXTENSIONS: [&str; 6] = ["dll", "exe", "sys", "cpl", "ocx", "drv"];

    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|entry| entry.is_file())
        .filter(|entry| {
            entry
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
