use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::process::{Command, Stdio};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "x")]
#[command(about = "Development automation for machina")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks (fmt, clippy, build, test)
    Ci {
        #[arg(long)]
        verbose: bool,
    },
    /// Quick checks before commit (fmt, clippy)
    Check {
        #[arg(long)]
        verbose: bool,
    },
    /// Format code
    Fmt {
        #[arg(long)]
        check: bool,
    },
    /// Run clippy
    Clippy {
        #[arg(long)]
        fix: bool,
    },
    /// Build the project
    Build {
        #[arg(long)]
        release: bool,
        /// Enable the cpal audio backend
        #[arg(long)]
        audio: bool,
    },
    /// Run tests
    Test {
        #[arg(long)]
        doc: bool,
        #[arg(long)]
        ignored: bool,
        /// Only the property tests under tests/
        #[arg(long)]
        props: bool,
        /// Library modules to test (time, timing, scheduler, devices, save_state, ...)
        modules: Vec<String>,
    },
    /// Run benchmarks
    Bench {
        /// Only benchmarks whose name contains this filter
        filter: Option<String>,
    },
    /// Run the demo machine
    Demo {
        /// Number of frames to run
        #[arg(short = 'f', long, default_value = "600")]
        frames: u64,
        /// Write the final snapshot as JSON to this path
        #[arg(long)]
        dump_state: Option<String>,
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Pre-commit hook (fmt, clippy, test)
    PreCommit,
    /// Install git hooks
    InstallHooks,
}

/// A named step of a pipeline
type Step = (&'static str, fn() -> Result<()>);

const CI: &[Step] = &[
    ("Format Check", || fmt(true)),
    ("Clippy", || clippy(false)),
    ("Build", || build(false, false)),
    ("Test", || test(false, false, false, &[])),
];

const QUICK: &[Step] = &[("Format Check", || fmt(true)), ("Clippy", || clippy(false))];

const PRE_COMMIT: &[Step] = &[
    ("Format Check", || fmt(true)),
    ("Clippy", || clippy(false)),
    ("Test", || test(false, false, false, &[])),
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { verbose } => pipeline("CI Pipeline", "CI passed in", CI, verbose),
        Commands::Check { verbose } => pipeline("Quick Checks", "Checks passed in", QUICK, verbose),
        Commands::Fmt { check } => fmt(check),
        Commands::Clippy { fix } => clippy(fix),
        Commands::Build { release, audio } => build(release, audio),
        Commands::Test {
            doc,
            ignored,
            props,
            modules,
        } => test(doc, ignored, props, &modules),
        Commands::Bench { filter } => bench(filter.as_deref()),
        Commands::Demo {
            frames,
            dump_state,
            release,
        } => demo(frames, dump_state.as_deref(), release),
        Commands::PreCommit => pipeline(
            "Pre-commit Checks",
            "Pre-commit checks passed in",
            PRE_COMMIT,
            false,
        ),
        Commands::InstallHooks => install_hooks(),
    }
}

fn cargo(args: &[&str]) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(args);
    cmd
}

fn pipeline(title: &str, done: &str, steps: &[Step], verbose: bool) -> Result<()> {
    println!("{}", format!("=== Running {} ===", title).bold().blue());

    let start = Instant::now();
    for (name, step) in steps {
        run_task(name, *step, verbose)?;
    }

    println!(
        "\n{} {}",
        format!("✓ {}", done).green().bold(),
        format!("{:.2}s", start.elapsed().as_secs_f64()).bold()
    );
    Ok(())
}

fn fmt(check: bool) -> Result<()> {
    let mut cmd = cargo(&["fmt", "--all"]);
    if check {
        cmd.args(["--", "--check"]);
    }
    execute_command(&mut cmd)
}

fn clippy(fix: bool) -> Result<()> {
    let mut cmd = cargo(&["clippy", "--workspace", "--all-targets"]);
    if fix {
        cmd.arg("--fix");
    } else {
        cmd.args(["--", "-D", "warnings"]);
    }
    execute_command(&mut cmd)
}

fn build(release: bool, audio: bool) -> Result<()> {
    let mut cmd = cargo(&["build"]);
    if release {
        cmd.arg("--release");
    }
    if audio {
        cmd.args(["--features", "audio"]);
    }
    execute_command(&mut cmd)
}

fn test(doc: bool, ignored: bool, props: bool, modules: &[String]) -> Result<()> {
    let with_ignored = |cmd: &mut Command| {
        if ignored {
            cmd.args(["--", "--ignored"]);
        }
    };

    if doc {
        let mut cmd = cargo(&["test", "--doc"]);
        with_ignored(&mut cmd);
        return execute_command(&mut cmd);
    }
    if props {
        let mut cmd = cargo(&["test", "--test", "scheduling_properties"]);
        with_ignored(&mut cmd);
        return execute_command(&mut cmd);
    }
    if modules.is_empty() {
        let mut cmd = cargo(&["test", "--workspace"]);
        with_ignored(&mut cmd);
        return execute_command(&mut cmd);
    }

    // One library run per requested module
    let mut failed = Vec::new();
    for module in modules {
        println!("{} Running {} tests...", "→".blue(), module.bold());

        let filter = format!("core::{}", module);
        let mut cmd = cargo(&["test", "--lib", &filter]);
        with_ignored(&mut cmd);

        match execute_command(&mut cmd) {
            Ok(_) => println!("{} {} tests passed\n", "✓".green(), module),
            Err(e) => {
                println!("{} {} tests failed\n", "✗".red(), module);
                if modules.len() == 1 {
                    return Err(e);
                }
                failed.push(module.as_str());
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Module tests failed: {}", failed.join(", "))
    }
}

fn bench(filter: Option<&str>) -> Result<()> {
    let mut cmd = cargo(&["bench", "--bench", "scheduler_bench"]);
    if let Some(filter) = filter {
        cmd.args(["--", filter]);
    }
    execute_command(&mut cmd)
}

fn demo(frames: u64, dump_state: Option<&str>, release: bool) -> Result<()> {
    println!("{}", "=== Demo Machine ===".bold().blue());
    println!("{} Frames: {}", "→".blue(), frames.to_string().bold());
    println!(
        "{} Build mode: {}",
        "→".blue(),
        if release {
            "release".green().bold()
        } else {
            "debug".yellow().bold()
        }
    );
    println!();

    let start = Instant::now();

    let mut cmd = cargo(&["run", "--bin", "machina"]);
    if release {
        cmd.arg("--release");
    }
    cmd.args(["--", "-f", &frames.to_string()]);
    if let Some(path) = dump_state {
        cmd.args(["--dump-state", path]);
    }

    if let Err(e) = execute_command(&mut cmd) {
        println!("\n{} Demo run failed", "✗".red().bold());
        return Err(e);
    }

    println!(
        "\n{} Demo completed in {}",
        "✓".green().bold(),
        format!("{:.2}s", start.elapsed().as_secs_f64()).bold()
    );
    Ok(())
}

fn install_hooks() -> Result<()> {
    use std::fs;

    println!("{}", "Installing git hooks...".bold());

    let hook_content = r#"#!/bin/sh
# Auto-generated by cargo x install-hooks
set -e

echo "Running pre-commit checks..."
cargo x pre-commit
"#;

    let hook_path = ".git/hooks/pre-commit";
    fs::write(hook_path, hook_content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(hook_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(hook_path, perms)?;
    }

    println!("{}", "✓ Git hooks installed".green());
    println!("  Pre-commit hook will run: fmt, clippy, test");

    Ok(())
}

fn run_task(name: &str, task: fn() -> Result<()>, verbose: bool) -> Result<()> {
    print!("{} {} ... ", "→".blue(), name);

    let start = Instant::now();
    match task() {
        Ok(_) => {
            let timing = if verbose {
                format!("({:.2}s)", start.elapsed().as_secs_f64())
            } else {
                String::new()
            };
            println!("{} {}", "✓".green().bold(), timing);
            Ok(())
        }
        Err(e) => {
            println!("{}", "✗".red().bold());
            Err(e)
        }
    }
}

fn execute_command(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;

    if !status.success() {
        anyhow::bail!("Command failed with exit code: {}", status);
    }

    Ok(())
}
