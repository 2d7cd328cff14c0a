// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        builder::{BundleBuilder, InterpreterTooling},
        config::{BuildType, Py2appConfiguration},
        environment::{libpython_path, runtime_prefix, PlatformDefaults, PY2APP_VERSION},
        launcher::LauncherCache,
        progress::{LogProgress, Progress},
    },
    anyhow::{anyhow, Context, Result},
    clap::{Arg, ArgAction, ArgMatches, Command},
    log::{info, LevelFilter},
    python_packaging::interpreter::PythonInterpreterInfo,
    std::path::PathBuf,
};

const ABOUT: &str = "\
Build macOS application and plug-in bundles for Python programs.

Bundles are described in the [tool.py2app] table of a pyproject.toml file.
Every bundle declared there is built into the dist directory next to that
file. Intermediate files are written to the build directory.
";

fn command() -> Command {
    Command::new("py2app")
        .version(PY2APP_VERSION)
        .about("Build macOS bundles for Python programs")
        .long_about(ABOUT)
        .arg(
            Arg::new("pyproject_toml")
                .long("pyproject-toml")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("pyproject.toml")
                .help("Configuration file to read"),
        )
        .arg(
            Arg::new("semi_standalone")
                .long("semi-standalone")
                .action(ArgAction::SetTrue)
                .conflicts_with("alias")
                .help("Build bundles that use the installed Python library"),
        )
        .arg(
            Arg::new("alias")
                .long("alias")
                .action(ArgAction::SetTrue)
                .help("Build bundles that refer to sources instead of copying them"),
        )
        .arg(
            Arg::new("python")
                .long("python")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Python interpreter to build with (default: python3 on PATH)"),
        )
        .arg(
            Arg::new("launcher_dir")
                .long("launcher-dir")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Directory with prebuilt launchers"),
        )
        .arg(
            Arg::new("debug_skip_macho")
                .long("debug-skip-macho")
                .action(ArgAction::SetTrue)
                .hide(true)
                .help("Don't process Mach-O files"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Increase logging verbosity. Can be specified multiple times"),
        )
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    builder.format_timestamp(None).format_target(false);

    if log_level < LevelFilter::Debug {
        builder.format_level(false);
    }

    builder.init();
}

fn python_executable(args: &ArgMatches) -> Result<PathBuf> {
    match args.get_one::<PathBuf>("python") {
        Some(path) => Ok(path.clone()),
        None => which::which("python3").context("locating python3"),
    }
}

fn build(args: &ArgMatches) -> Result<()> {
    let pyproject = args
        .get_one::<PathBuf>("pyproject_toml")
        .ok_or_else(|| anyhow!("missing --pyproject-toml"))?;

    let mut config = Py2appConfiguration::load(pyproject, &PlatformDefaults::host())?;
    if args.get_flag("alias") {
        config.override_build_type(BuildType::Alias);
    } else if args.get_flag("semi_standalone") {
        config.override_build_type(BuildType::SemiStandalone);
    }

    let python = python_executable(args)?;
    info!("introspecting {}", python.display());
    let interpreter = PythonInterpreterInfo::introspect(&python)?;

    let prefix = runtime_prefix(&interpreter)?;
    let mut launchers = LauncherCache::new(
        &interpreter,
        libpython_path(&interpreter, &prefix),
        &config.config_root.join("build").join("launchers"),
    );
    if let Some(dirs) = args.get_many::<PathBuf>("launcher_dir") {
        for dir in dirs {
            launchers.add_prebuilt_dir(dir);
        }
    }

    let tooling = InterpreterTooling::new(&python, &interpreter);
    let builder = BundleBuilder::new(&config, &interpreter, &tooling, &launchers)
        .skip_macho(args.get_flag("debug_skip_macho"));

    let mut progress = LogProgress::default();
    let reports = builder.build_all(&mut progress);

    if progress.have_error() {
        return Err(anyhow!(
            "{} of {} bundles failed to build",
            config.bundles.len() - reports.len(),
            config.bundles.len()
        ));
    }

    Ok(())
}

pub fn run_cli() -> Result<()> {
    let matches = command().get_matches();

    init_logging(matches.get_count("verbose"));

    build(&matches)
}
