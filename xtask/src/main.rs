//! Developer tasks for the rust-dbc workspace: `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Crates that make up the library; `xtask` itself is not linted as strictly.
const LIBRARY_CRATES: &[&str] = &["dbc-core", "dbc-pool", "dbc-testing"];

#[derive(Parser)]
#[command(name = "xtask", about = "Developer tasks for rust-dbc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Formatting, lints, tests and docs, stopping at the first failure
    Ci {
        /// Cases per property test
        #[arg(long, default_value_t = 256)]
        proptest_cases: u32,
    },
    /// Check formatting
    Fmt {
        /// Rewrite files instead of checking them
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy with warnings denied
    Clippy,
    /// Run tests
    Test {
        /// Only test this crate, e.g. `dbc-pool`
        #[arg(short, long)]
        package: Option<String>,
        /// Cases per property test
        #[arg(long)]
        proptest_cases: Option<u32>,
    },
    /// Build docs for the library crates
    Doc {
        /// Open the docs in a browser
        #[arg(long)]
        open: bool,
    },
    /// Run the pool benchmarks
    Bench {
        /// Only run benchmarks matching this name
        filter: Option<String>,
        /// Save results under this criterion baseline
        #[arg(long)]
        save_baseline: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci { proptest_cases } => {
            fmt(&sh, false)?;
            clippy(&sh)?;
            test(&sh, None, Some(proptest_cases))?;
            doc(&sh, false)?;
            println!("ci: ok");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test {
            package,
            proptest_cases,
        } => test(&sh, package.as_deref(), proptest_cases)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench {
            filter,
            save_baseline,
        } => bench(&sh, filter.as_deref(), save_baseline.as_deref())?,
    }
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .context("xtask is not inside the workspace")
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        cmd!(sh, "cargo fmt --all").run()?;
    } else {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    }
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    for krate in LIBRARY_CRATES {
        cmd!(sh, "cargo clippy -p {krate} --all-targets -- -D warnings").run()?;
    }
    cmd!(sh, "cargo clippy -p xtask").run()?;
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, proptest_cases: Option<u32>) -> Result<()> {
    let _cases = proptest_cases.map(|cases| sh.push_env("PROPTEST_CASES", cases.to_string()));
    match package {
        Some(package) if !LIBRARY_CRATES.contains(&package) => {
            bail!("unknown package `{package}`; expected one of {LIBRARY_CRATES:?}")
        }
        Some(package) => cmd!(sh, "cargo test -p {package}").run()?,
        None => cmd!(sh, "cargo test --workspace").run()?,
    }
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let _deny = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    let packages: Vec<String> = LIBRARY_CRATES
        .iter()
        .flat_map(|krate| ["-p".to_string(), (*krate).to_string()])
        .collect();
    let open = open.then_some("--open");
    cmd!(sh, "cargo doc --no-deps {packages...} {open...}").run()?;
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>, save_baseline: Option<&str>) -> Result<()> {
    let mut args: Vec<String> = filter.map(str::to_string).into_iter().collect();
    if let Some(name) = save_baseline {
        args.push("--save-baseline".to_string());
        args.push(name.to_string());
    }
    cmd!(sh, "cargo bench -p dbc-pool --bench pool -- {args...}").run()?;
    Ok(())
}
