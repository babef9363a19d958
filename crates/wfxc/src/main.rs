//! WFX effect compiler command line front end.
//!
//! Globs input repositories, drives the library builder over each (or over
//! all of them when merging), reads and writes compressed cache files, and
//! emits binary libraries or C++ headers.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wfx_effects::builder::ShaderLibBuilder;
use wfx_effects::error::EffectError;
use wfx_effects::serialize::{read_cache_archive, write_cache_archive, DEFAULT_COMPRESSION_LEVEL};
use wfx_effects::ShaderBackend;

mod fxc;
mod header;
mod include;

use include::FileIncludeHandler;

const LOG_FILE: &str = "wfxc.log";

// Exit codes: 0 success, 1 unknown error, 2 classified failure, 3 filesystem
// error, 4 internal error, 5 effect parse/compile error, 10 critical init
// error.
const EXIT_UNKNOWN: i32 = 1;
const EXIT_FAILURE: i32 = 2;
const EXIT_FILESYSTEM: i32 = 3;
const EXIT_INTERNAL: i32 = 4;
const EXIT_EFFECT: i32 = 5;
const EXIT_INIT: i32 = 10;

#[derive(Parser, Debug)]
#[command(
    name = "wfxc",
    version,
    about = "WFX shader effect compiler",
    disable_help_flag = true
)]
struct Cli {
    /// Input source file or wildcard pattern (e.g. `shaders/*.wfx`); may
    /// repeat.
    #[arg(long, value_name = "FILE", required = true)]
    input: Vec<String>,

    /// Output directory, or output file when merging.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Shader model feature level.
    #[arg(long = "feature-level", value_name = "LEVEL", default_value = "5_0")]
    feature_level: String,

    /// Directory for cache files.
    #[arg(long, value_name = "DIR", default_value = "./wfxc")]
    cache: PathBuf,

    /// Merge all inputs into a single output library.
    #[arg(short = 'm', long)]
    merge: bool,

    /// Emit a C++ header instead of a binary library.
    #[arg(short = 'h', long)]
    header: bool,

    /// Compile shaders with debug information.
    #[arg(short = 'd', long)]
    debug: bool,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

fn main() {
    let cli = Cli::parse();

    if init_logging().is_err() {
        eprintln!("error: failed to initialize logging");
        std::process::exit(EXIT_INIT);
    }

    let outcome = std::panic::catch_unwind(|| run(&cli));

    let code = match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            error!("{err:#}");
            classify_error(&err)
        }
        Err(_) => {
            error!("internal error: compiler panicked");
            EXIT_INTERNAL
        }
    };

    std::process::exit(code);
}

fn init_logging() -> anyhow::Result<()> {
    let file = fs::File::create(LOG_FILE)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        )
        .try_init()?;
    Ok(())
}

fn classify_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EffectError>() {
        Some(EffectError::Parse(_)) | Some(EffectError::Syntax { .. })
        | Some(EffectError::Backend(_)) => EXIT_EFFECT,
        Some(EffectError::Io(_)) => EXIT_FILESYSTEM,
        Some(EffectError::Cache(_)) => EXIT_FAILURE,
        None => {
            if err.downcast_ref::<std::io::Error>().is_some() {
                EXIT_FILESYSTEM
            } else if err.downcast_ref::<glob::PatternError>().is_some() {
                EXIT_FAILURE
            } else {
                EXIT_UNKNOWN
            }
        }
    }
}

#[cfg(target_os = "windows")]
fn create_backend() -> Box<dyn ShaderBackend> {
    Box::new(fxc::FxcBackend::new())
}

#[cfg(not(target_os = "windows"))]
fn create_backend() -> Box<dyn ShaderBackend> {
    /// Placeholder backend for platforms without an HLSL toolchain.
    struct UnsupportedBackend;

    impl ShaderBackend for UnsupportedBackend {
        fn version(&self) -> String {
            "unavailable".to_string()
        }

        fn compile(
            &mut self,
            _input: &wfx_effects::CompileInput<'_>,
        ) -> wfx_effects::Result<wfx_effects::CompiledShader> {
            Err(EffectError::backend(
                "no shader backend is available on this platform",
            ))
        }
    }

    Box::new(UnsupportedBackend)
}

/// Expands input arguments, resolving `*` patterns through glob.
fn expand_inputs(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    // BTreeSet deduplicates and keeps deterministic ordering
    let mut files = BTreeSet::new();

    for pattern in patterns {
        if pattern.contains(['*', '?', '[']) {
            let mut matched = false;
            for entry in glob::glob(pattern).context("invalid input pattern")? {
                files.insert(entry.context("failed to read glob entry")?);
                matched = true;
            }
            if !matched {
                warn!(pattern = %pattern, "input pattern matched no files");
            }
        } else {
            files.insert(PathBuf::from(pattern));
        }
    }

    if files.is_empty() {
        bail!("no input files");
    }

    Ok(files.into_iter().collect())
}

fn lib_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shaders".to_string())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let inputs = expand_inputs(&cli.input)?;

    if cli.merge {
        let output = cli
            .output
            .clone()
            .ok_or_else(|| anyhow!("--output is required when merging"))?;
        let name = lib_name(&output);
        build_library(cli, &name, &inputs, &output)?;
    } else {
        for input in &inputs {
            let name = lib_name(input);
            let extension = if cli.header { "hpp" } else { "bin" };
            let file_name = format!("{name}.{extension}");
            let output = match &cli.output {
                Some(dir) => dir.join(file_name),
                None => PathBuf::from(file_name),
            };
            build_library(cli, &name, std::slice::from_ref(input), &output)?;
        }
    }

    Ok(())
}

fn build_library(
    cli: &Cli,
    name: &str,
    inputs: &[PathBuf],
    output: &Path,
) -> anyhow::Result<()> {
    let started = std::time::Instant::now();

    let mut builder = ShaderLibBuilder::new(create_backend());
    builder.set_name(name);
    builder.set_feature_level(&cli.feature_level);
    builder.set_debug(cli.debug);

    let cache_path = cli.cache.join(format!("{name}.cache"));
    match fs::read(&cache_path) {
        Ok(bytes) => match read_cache_archive(&bytes) {
            Ok(def) => builder.set_cache(def),
            // cache errors are never fatal
            Err(err) => warn!(path = %cache_path.display(), "ignoring cache: {err}"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %cache_path.display(), "ignoring cache: {err}"),
    }

    for input in inputs {
        info!(path = %input.display(), "processing repository");
        let source = fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        let repo_path = input.to_string_lossy().replace('\\', "/");
        let mut includes = FileIncludeHandler::for_repo(input);
        builder.add_repo(&repo_path, &source, Some(&mut includes))?;
    }

    let definition = builder.get_definition()?;
    let archive = write_cache_archive(&definition, DEFAULT_COMPRESSION_LEVEL);

    fs::create_dir_all(&cli.cache)
        .with_context(|| format!("failed to create cache dir {}", cli.cache.display()))?;
    fs::write(&cache_path, &archive)
        .with_context(|| format!("failed to write {}", cache_path.display()))?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    if cli.header {
        let symbol = header::header_symbol(name);
        let text = header::write_header(&symbol, &archive);
        fs::write(output, text)
            .with_context(|| format!("failed to write {}", output.display()))?;
    } else {
        fs::write(output, &archive)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    let stats = builder.cache_stats();
    info!(
        library = name,
        output = %output.display(),
        cached_repos = stats.cached_repo_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "library written"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_names_derive_from_stems() {
        assert_eq!(lib_name(Path::new("shaders/post_fx.wfx")), "post_fx");
        assert_eq!(lib_name(Path::new("bloom.bin")), "bloom");
    }

    #[test]
    fn plain_inputs_pass_through() {
        let files = expand_inputs(&["a.wfx".to_string(), "b.wfx".to_string()]).unwrap();
        assert_eq!(files, vec![PathBuf::from("a.wfx"), PathBuf::from("b.wfx")]);
    }

    #[test]
    fn globs_expand() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.wfx"), "x").unwrap();
        fs::write(dir.path().join("two.wfx"), "x").unwrap();
        fs::write(dir.path().join("other.txt"), "x").unwrap();

        let pattern = format!("{}/*.wfx", dir.path().display());
        let files = expand_inputs(&[pattern]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "wfx"));
    }
}
