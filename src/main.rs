use anyhow::Context;
use clap::{Parser, Subcommand};
use pekit::block::BlockList;
use pekit::compare::{compare, CompareOptions, CompareResult};
use pekit::depends::{self, BinaryMap, SearchPath};
use pekit::pe::PeReader;
use pekit::resource::ResourceEntry;
use pekit::version::VersionString;
use pekit::versioninfo::{StringField, VersionField, VsVersionInfo};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Inspect, compare and patch Windows PE binaries.
#[derive(Parser)]
#[command(name = "pekit", version, about)]
struct Cli {
    /// Output file path, if omitted uses standard out.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Print dynamically ignored ranges and other info.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Print full file information. Returns 0 if all files are valid
    /// PE binaries.
    Info {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print pdb path and guid for files that have debug information.
    Pdb {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the file version from the version resource.
    VersionInfo {
        /// Input file.
        file: PathBuf,
    },
    /// Print a list of imported dlls.
    Imports {
        /// Input file.
        file: PathBuf,
    },
    /// Check if binaries have a digital signature section (does not
    /// validate the signature). Returns 0 if all files have one.
    Signature {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Dump contents of a named PE section.
    DumpSection {
        /// Section name, e.g. `.rsrc`.
        name: String,
        /// Input file.
        file: PathBuf,
    },
    /// Extract a resource by path, e.g. `16/1/1033`.
    DumpResource {
        /// Resource path (`type/name/language`).
        path: String,
        /// Input file.
        file: PathBuf,
    },
    /// Compare 2 files disregarding linker timestamps, debug info,
    /// digital signatures, version resources and, unless disabled,
    /// `__FILE__`, `__DATE__` and `__TIME__` literals. Returns 0 if
    /// the files are functionally equivalent.
    Compare {
        /// First file.
        first: PathBuf,
        /// Second file.
        second: PathBuf,
        /// Use faster comparison. Only static diffs are ignored, no
        /// difference percentage.
        #[arg(long)]
        fast: bool,
        /// Return 0 only if files are byte-for-byte identical.
        #[arg(long)]
        identical: bool,
        /// Do not try to interpret differences at unknown offsets.
        #[arg(long)]
        no_heuristics: bool,
        /// Experimental workaround for the TLB timestamp (tested on
        /// MIDL version 7.00.0555).
        #[arg(long)]
        tlb_timestamp: bool,
        /// Ranges to ignore in both files:
        /// `{comment1:offset1:size1|comment2:offset2:size2|...}`.
        #[arg(long, default_value = "{}")]
        r: String,
        /// Ranges to ignore in the first file.
        #[arg(long, default_value = "{}")]
        r1: String,
        /// Ranges to ignore in the second file.
        #[arg(long, default_value = "{}")]
        r2: String,
    },
    /// Modify VS_VERSIONINFO. The binary must already contain a
    /// version resource. Without --no-resource-rebuild the rebuilt
    /// resource blob is written to the output instead of the file.
    Edit {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Set new version (both file and product).
        #[arg(long)]
        set_version: Option<String>,
        /// Set new file version.
        #[arg(long)]
        set_file_version: Option<String>,
        /// Set new product version.
        #[arg(long)]
        set_product_version: Option<String>,
        /// Set the file description field (rebuild only).
        #[arg(long)]
        set_file_description: Option<String>,
        /// Set the internal name field (rebuild only).
        #[arg(long)]
        set_internal_name: Option<String>,
        /// Set the copyright field (rebuild only).
        #[arg(long)]
        set_copyright: Option<String>,
        /// Set the original name field (rebuild only).
        #[arg(long)]
        set_original_name: Option<String>,
        /// Set the product name field (rebuild only).
        #[arg(long)]
        set_product_name: Option<String>,
        /// Avoid rebuilding resources; writes the version in place
        /// and only works if the new version string fits the
        /// existing slot.
        #[arg(long)]
        no_resource_rebuild: bool,
        /// Zero the security data-directory entry after an external
        /// tool stripped the signature blob.
        #[arg(long)]
        erase_signature: bool,
    },
    /// Check dependencies of PE binaries and everything they link
    /// to. Returns 2 if a dependency is missing, 1 on any other
    /// error and 0 on success.
    CheckDependencies {
        /// Input files or directories.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Extra directory to resolve DLL names in; repeatable.
        #[arg(long)]
        search: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to open output file {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut out = open_output(cli.output.as_deref())?;
    let verbose = cli.verbose;

    match cli.action {
        Action::Info { files } => info(&mut out, &files, verbose),
        Action::Pdb { files } => pdb(&mut out, &files),
        Action::VersionInfo { file } => version_info(&mut out, &file),
        Action::Imports { file } => imports(&mut out, &file),
        Action::Signature { files } => signature(&mut out, &files),
        Action::DumpSection { name, file } => dump_section(&mut out, &name, &file),
        Action::DumpResource { path, file } => dump_resource(&mut out, &path, &file),
        Action::Compare {
            first,
            second,
            fast,
            identical,
            no_heuristics,
            tlb_timestamp,
            r,
            r1,
            r2,
        } => {
            let options = CompareOptions {
                fast,
                no_heuristics,
                verbose,
                tlb_timestamp,
            };
            run_compare(&mut out, &first, &second, options, identical, &r, &r1, &r2)
        }
        Action::Edit {
            files,
            set_version,
            set_file_version,
            set_product_version,
            set_file_description,
            set_internal_name,
            set_copyright,
            set_original_name,
            set_product_name,
            no_resource_rebuild,
            erase_signature,
        } => {
            let edits = Edits {
                version: pick_version(&set_version, &set_file_version, &set_product_version)?,
                file_description: set_file_description,
                internal_name: set_internal_name,
                copyright: set_copyright,
                original_name: set_original_name,
                product_name: set_product_name,
                no_resource_rebuild,
                erase_signature,
            };
            edit(&mut out, &files, &edits)
        }
        Action::CheckDependencies { inputs, search } => {
            check_dependencies(&mut out, &inputs, search, verbose)
        }
    }
}

fn info(out: &mut dyn Write, files: &[PathBuf], verbose: bool) -> anyhow::Result<u8> {
    let mut code = 0;

    for file in files {
        writeln!(out, "{}:", file.display())?;
        match PeReader::open(file, false) {
            Ok(reader) => {
                reader.write_info(&mut *out, verbose)?;
                if !reader.is_valid_pe() {
                    code = 1;
                }
            }
            Err(err) => {
                eprintln!("{}: {err}", file.display());
                code = 1;
            }
        }
        writeln!(out)?;
    }

    Ok(code)
}

fn pdb(out: &mut dyn Write, files: &[PathBuf]) -> anyhow::Result<u8> {
    for file in files {
        let Ok(reader) = PeReader::open(file, false) else {
            continue;
        };
        if !reader.is_valid_pe() || reader.pdb_path().is_empty() {
            continue;
        }
        writeln!(out, "{} {}", reader.pdb_guid(), reader.pdb_path())?;
    }

    Ok(0)
}

fn version_info(out: &mut dyn Write, file: &Path) -> anyhow::Result<u8> {
    let reader = PeReader::open(file, false)?;
    if !reader.is_valid_pe() {
        eprintln!("Invalid PE format.");
        return Ok(1);
    }
    writeln!(out, "{}", reader.file_version())?;
    Ok(0)
}

fn imports(out: &mut dyn Write, file: &Path) -> anyhow::Result<u8> {
    let reader = PeReader::open(file, false)?;
    if !reader.is_valid_pe() {
        eprintln!("Invalid PE format.");
        return Ok(1);
    }
    for import in reader.all_dll_imports() {
        writeln!(out, "{import}")?;
    }
    Ok(0)
}

fn signature(out: &mut dyn Write, files: &[PathBuf]) -> anyhow::Result<u8> {
    let mut code = 0;

    for file in files {
        let signed = match PeReader::open(file, false) {
            Ok(reader) => reader.is_signed(),
            Err(err) => {
                eprintln!("{}: {err}", file.display());
                false
            }
        };
        if !signed {
            code = 1;
        }
        writeln!(
            out,
            "{} : {}",
            if signed { "signed" } else { "unsigned" },
            file.display()
        )?;
    }

    Ok(code)
}

fn dump_section(out: &mut dyn Write, name: &str, file: &Path) -> anyhow::Result<u8> {
    let reader = PeReader::open(file, false)?;
    if !reader.is_valid_pe() {
        eprintln!("Invalid PE format.");
        return Ok(1);
    }
    match reader.section_data(name) {
        Ok(data) => {
            out.write_all(data)?;
            Ok(0)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(1)
        }
    }
}

fn dump_resource(out: &mut dyn Write, path: &str, file: &Path) -> anyhow::Result<u8> {
    let reader = PeReader::open(file, false)?;
    if !reader.is_valid_pe() {
        eprintln!("Invalid PE format.");
        return Ok(1);
    }
    if reader.resource_directory().is_none() {
        eprintln!("No resource section found.");
        return Ok(1);
    }
    match reader.resource_data(path) {
        Ok(data) => {
            out.write_all(data)?;
            Ok(0)
        }
        Err(_) => {
            eprintln!("Resource not found.");
            Ok(1)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_compare(
    out: &mut dyn Write,
    first: &Path,
    second: &Path,
    options: CompareOptions,
    identical_required: bool,
    shared_ranges: &str,
    first_ranges: &str,
    second_ranges: &str,
) -> anyhow::Result<u8> {
    let shared: BlockList = shared_ranges
        .parse()
        .context("error parsing --r, expected {desc:offset:size|...}")?;
    let only_first: BlockList = first_ranges
        .parse()
        .context("error parsing --r1, expected {desc:offset:size|...}")?;
    let only_second: BlockList = second_ranges
        .parse()
        .context("error parsing --r2, expected {desc:offset:size|...}")?;

    let readers = (
        PeReader::open(first, false),
        PeReader::open(second, false),
    );
    let (mut reader1, mut reader2) = match readers {
        (Ok(reader1), Ok(reader2)) => (reader1, reader2),
        (first_result, second_result) => {
            if let Err(err) = first_result {
                eprintln!("{}: {err}", first.display());
            }
            if let Err(err) = second_result {
                eprintln!("{}: {err}", second.display());
            }
            CompareResult::error_result().write_report(&mut *out)?;
            return Ok(1);
        }
    };

    reader1.add_ignored_ranges(&only_first);
    reader1.add_ignored_ranges(&shared);
    reader2.add_ignored_ranges(&only_second);
    reader2.add_ignored_ranges(&shared);

    if options.verbose {
        writeln!(out, "{}:", first.display())?;
        reader1.write_info(&mut *out, false)?;
        writeln!(out)?;
        writeln!(out, "{}:", second.display())?;
        reader2.write_info(&mut *out, false)?;
        writeln!(out)?;
    }

    let result = compare(&reader1, &reader2, options);
    result.write_report(&mut *out)?;

    let success = if identical_required {
        result.is_identical()
    } else {
        result.is_equivalent()
    };
    Ok(if success { 0 } else { 1 })
}

struct Edits {
    version: Option<(VersionString, VersionField)>,
    file_description: Option<String>,
    internal_name: Option<String>,
    copyright: Option<String>,
    original_name: Option<String>,
    product_name: Option<String>,
    no_resource_rebuild: bool,
    erase_signature: bool,
}

fn pick_version(
    both: &Option<String>,
    file_only: &Option<String>,
    product_only: &Option<String>,
) -> anyhow::Result<Option<(VersionString, VersionField)>> {
    let picked = if let Some(value) = both {
        Some((value, VersionField::Both))
    } else if let Some(value) = file_only {
        Some((value, VersionField::FileOnly))
    } else if let Some(value) = product_only {
        Some((value, VersionField::ProductOnly))
    } else {
        None
    };

    match picked {
        Some((value, field)) => {
            let version = VersionString::from(value.as_str());
            anyhow::ensure!(
                version.is_valid(),
                "invalid version {value:?}, expected Major.Minor.Build.Patch"
            );
            Ok(Some((version, field)))
        }
        None => Ok(None),
    }
}

fn edit(out: &mut dyn Write, files: &[PathBuf], edits: &Edits) -> anyhow::Result<u8> {
    let mut code = 0;

    for file in files {
        if edits.no_resource_rebuild {
            if edit_in_place(file, edits).is_err() {
                code = 1;
            }
        } else if edit_rebuild(&mut *out, file, edits).is_err() {
            code = 1;
        }
    }

    Ok(code)
}

fn edit_in_place(file: &Path, edits: &Edits) -> anyhow::Result<()> {
    let mut reader = PeReader::open(file, true)?;
    if !reader.is_valid_pe() {
        eprintln!("{}: can't open file or invalid format.", file.display());
        anyhow::bail!("invalid PE");
    }

    if let Some((version, field)) = &edits.version {
        if let Err(err) = reader.set_version(version, *field) {
            eprintln!("{}: {err}", file.display());
            return Err(err.into());
        }
    }
    if edits.erase_signature {
        reader.erase_signature_directory()?;
    }

    Ok(())
}

fn edit_rebuild(out: &mut dyn Write, file: &Path, edits: &Edits) -> anyhow::Result<()> {
    let reader = PeReader::open(file, false)?;
    if !reader.is_valid_pe() {
        eprintln!("{}: can't open file or invalid format.", file.display());
        anyhow::bail!("invalid PE");
    }

    let Some(root) = reader.resource_directory() else {
        eprintln!("{}: no resource section found.", file.display());
        anyhow::bail!("no resources");
    };
    let Some(node) = root.at("16/1") else {
        eprintln!("{}: no version resource found.", file.display());
        anyhow::bail!("no version resource");
    };

    let leaves: Vec<&ResourceEntry> = if node.is_data() {
        vec![node]
    } else {
        node.entries()
            .map(|entries| entries.values().collect())
            .unwrap_or_default()
    };

    for leaf in leaves {
        let Some(data) = leaf.data(reader.bytes()) else {
            continue;
        };
        let mut info = VsVersionInfo::parse(data);

        if let Some((version, field)) = &edits.version {
            info.set_version(*field, version);
        }
        if let Some(value) = &edits.file_description {
            info.set_field(StringField::FileDescription, value);
        }
        if let Some(value) = &edits.internal_name {
            info.set_field(StringField::InternalName, value);
        }
        if let Some(value) = &edits.copyright {
            info.set_field(StringField::LegalCopyright, value);
        }
        if let Some(value) = &edits.original_name {
            info.set_field(StringField::OriginalFilename, value);
        }
        if let Some(value) = &edits.product_name {
            info.set_field(StringField::ProductName, value);
        }

        // the host resource updater reinjects this under
        // RT_VERSION / 1 / <language>
        out.write_all(&info.to_bytes())?;
    }

    Ok(())
}

fn check_dependencies(
    out: &mut dyn Write,
    inputs: &[PathBuf],
    search_dirs: Vec<PathBuf>,
    verbose: bool,
) -> anyhow::Result<u8> {
    let search = SearchPath::new(search_dirs);
    let mut code = 0;

    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            eprintln!("{}: no such file or directory", input.display());
            return Ok(1);
        }
        files.extend(depends::list_pe_files(input));
    }

    let mut cache = BinaryMap::new();
    for file in files {
        let root = depends::collect_dependencies(&file, &mut cache, &search);
        if !depends::subtree_resolved(&root) {
            code = 2;
        }
        depends::write_dependency_tree(&mut *out, &root, !verbose)?;
    }

    Ok(code)
}
