//! wasm-embed CLI entry point.
//!
//! Loads WebAssembly modules, lists their exports, calls exported functions,
//! precompiles modules ahead of time and runs WASI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_embed_common::{ConfigFile, LogConfig, LogFormat, RuntimeError, WasiError};
use wasm_embed_core::{Module, Runtime, Value};

#[derive(Parser)]
#[command(name = "wasm-embed", version, about = "Embed and invoke WebAssembly modules")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true, env = "WASM_EMBED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a module's exports in index order.
    Exports {
        /// Path to a .wasm, .wat or precompiled module.
        module: PathBuf,

        /// Treat the module as a precompiled artifact.
        #[arg(long)]
        precompiled: bool,
    },

    /// Call an exported function and print its results.
    Call {
        /// Path to a .wasm, .wat or precompiled module.
        module: PathBuf,

        /// Name of the exported function.
        function: String,

        /// Arguments, parsed according to the function's signature.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,

        /// Treat the module as a precompiled artifact.
        #[arg(long)]
        precompiled: bool,
    },

    /// Compile a module into an artifact loadable with --precompiled.
    Precompile {
        /// Path to a .wasm or .wat module.
        input: PathBuf,

        /// Where to write the artifact.
        output: PathBuf,
    },

    /// Run a WASI command module's `_start` export.
    Wasi {
        /// Path to a .wasm, .wat or precompiled module.
        module: PathBuf,

        /// Treat the module as a precompiled artifact.
        #[arg(long)]
        precompiled: bool,

        /// Arguments passed to the program after its name.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };

    init_tracing(&config.log);

    match cli.command {
        Command::Exports {
            module,
            precompiled,
        } => exports(&config, &module, precompiled),
        Command::Call {
            module,
            function,
            args,
            precompiled,
        } => call(&config, &module, &function, &args, precompiled),
        Command::Precompile { input, output } => precompile(&config, &input, &output),
        Command::Wasi {
            module,
            precompiled,
            args,
        } => wasi(config, &module, precompiled, args),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured filter.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Load a module file. `.wat` files are parsed as text unless `precompiled`.
fn load(runtime: &Runtime, path: &Path, precompiled: bool) -> anyhow::Result<Module> {
    let is_wat = path.extension().is_some_and(|ext| ext == "wat");

    let module = if is_wat && !precompiled {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Module::from_wat(runtime.engine(), &text)?
    } else {
        runtime
            .engine()
            .load_module_file(path, precompiled)
            .with_context(|| format!("Failed to load {}", path.display()))?
    };

    info!(
        path = %path.display(),
        content_hash = module.content_hash(),
        num_exports = module.num_exports(),
        "Module loaded"
    );
    Ok(module)
}

fn exports(config: &ConfigFile, path: &Path, precompiled: bool) -> anyhow::Result<()> {
    let runtime = Runtime::new(&config.runtime)?;
    let module = load(&runtime, path, precompiled)?;

    for (index, export) in module.exports().iter().enumerate() {
        println!("{index}\t{}\t{}", export.kind, export.name);
    }
    if module.num_imports() > 0 {
        println!("({} import(s))", module.num_imports());
    }
    Ok(())
}

fn call(
    config: &ConfigFile,
    path: &Path,
    function: &str,
    args: &[String],
    precompiled: bool,
) -> anyhow::Result<()> {
    let mut runtime = Runtime::new(&config.runtime)?;
    let module = load(&runtime, path, precompiled)?;
    let instance = runtime.new_instance(&module)?;
    let func = runtime.resolve_function(&module, &instance, function)?;

    let signature = func.signature(runtime.store())?;
    if args.len() != signature.params.len() {
        bail!(
            "'{function}' {signature} takes {} argument(s), got {}",
            signature.params.len(),
            args.len()
        );
    }

    let values = signature
        .params
        .iter()
        .zip(args)
        .map(|(ty, text)| Value::parse(*ty, text))
        .collect::<Result<Vec<_>, _>>()?;

    let results = runtime.call(&func, &values)?;
    let rendered: Vec<String> = results.iter().map(ToString::to_string).collect();
    println!("{}", rendered.join(" "));

    instance.destroy()?;
    module.destroy()?;
    runtime.destroy()?;
    Ok(())
}

fn precompile(config: &ConfigFile, input: &Path, output: &Path) -> anyhow::Result<()> {
    let runtime = Runtime::new(&config.runtime)?;

    let bytes = if input.extension().is_some_and(|ext| ext == "wat") {
        load(&runtime, input, false)?.serialize()?
    } else {
        let bytes =
            std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        runtime.precompile(&bytes)?
    };

    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(output = %output.display(), artifact_len = bytes.len(), "Artifact written");
    Ok(())
}

fn wasi(
    mut config: ConfigFile,
    path: &Path,
    precompiled: bool,
    args: Vec<String>,
) -> anyhow::Result<()> {
    config.runtime.engine.wasi_enabled = true;
    config.runtime.wasi.args = std::iter::once(path.display().to_string())
        .chain(args)
        .collect();

    let mut runtime = Runtime::new(&config.runtime)?;
    let module = load(&runtime, path, precompiled)?;

    match runtime.run_wasi(&module) {
        Ok(instance) => {
            instance.destroy()?;
            module.destroy()?;
            runtime.destroy()?;
            Ok(())
        }
        Err(RuntimeError::Wasi(WasiError::Exit { code })) => {
            info!(code, "WASI program exited");
            std::process::exit(code);
        }
        Err(e) => Err(e.into()),
    }
}
