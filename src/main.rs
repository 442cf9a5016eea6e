use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{
    arg, crate_description, crate_name, crate_version, value_parser, ArgAction, ArgMatches, Command,
};
use tracing::error;

use git_archive::config::Config;
use git_archive::health::{resolve_repo_root, HealthCheck};
use git_archive::logger;
use git_archive::runner::GitCli;
use git_archive::settings::RepositorySettings;
use git_archive::staleness::{StalenessCache, SystemClock};
use git_archive::walk;

fn cli() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .subcommand_required(true)
        .arg(arg!(-v --verbose "Log debug output").global(true))
        .subcommand(
            Command::new("check")
                .about("Check one repository and bring its archives up to date")
                .arg(
                    arg!([PATH] "Repository directory")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("."),
                ),
        )
        .subcommand(
            Command::new("walk")
                .about("Check every repository under the watched folders")
                .arg(arg!(-s --silent "Don't write the report file")),
        )
        .subcommand(
            Command::new("settings")
                .about("Edit the git_archive.json of the repository in the current directory")
                .subcommand_required(true)
                .subcommand(
                    Command::new("create")
                        .about("Create settings with an archive folder and tracked branches")
                        .arg(arg!(<FOLDER> "Archive folder, or - to disable archiving"))
                        .arg(
                            arg!(-b --branch <BRANCH> "Branch to archive (default: master)")
                                .action(ArgAction::Append),
                        ),
                )
                .subcommand(
                    Command::new("archive")
                        .about("Set the archive folder")
                        .arg(arg!(<FOLDER> "Archive folder, or - to disable archiving")),
                )
                .subcommand(
                    Command::new("add")
                        .about("Track another branch")
                        .arg(arg!(<BRANCH> "Branch name")),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Add a folder to walk")
                .arg(
                    arg!(<FOLDER> "Folder to search for repositories")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("unwatch")
                .about("Stop walking a folder")
                .arg(arg!(<FOLDER> "Folder to forget").value_parser(value_parser!(PathBuf))),
        )
}

fn main() {
    let matches = cli().get_matches();
    logger::init(matches.get_flag("verbose"));

    match run(&matches) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    }
}

fn run(matches: &ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        Some(("check", arg_matches)) => {
            let path = arg_matches
                .get_one::<PathBuf>("PATH")
                .context("missing path")?;
            check(path)
        }
        Some(("walk", arg_matches)) => walk_all(arg_matches.get_flag("silent")),
        Some(("settings", arg_matches)) => settings(arg_matches).map(|_| 0),
        Some(("watch", arg_matches)) => {
            let folder = arg_matches
                .get_one::<PathBuf>("FOLDER")
                .context("missing folder")?;
            Config::update(|config| config.set_watch(folder))?;
            Ok(0)
        }
        Some(("unwatch", arg_matches)) => {
            let folder = arg_matches
                .get_one::<PathBuf>("FOLDER")
                .context("missing folder")?;
            Config::update(|config| config.set_unwatch(folder))?;
            Ok(0)
        }
        _ => unreachable!(),
    }
}

fn check(path: &Path) -> Result<i32> {
    let config = Config::load();
    let dir = path
        .canonicalize()
        .with_context(|| format!("{} is not a directory", path.display()))?;
    let mut cache = StalenessCache::load(Config::staleness_cache_path()?)?;

    let runner = GitCli::new();
    let report = HealthCheck::new(&runner, &SystemClock, &mut cache, config.policy).check(&dir)?;

    for line in report.lines() {
        println!("{line}");
    }
    Ok(if report.is_healthy() { 0 } else { 1 })
}

fn walk_all(silent: bool) -> Result<i32> {
    let config = Config::load();
    let mut cache = StalenessCache::load(Config::staleness_cache_path()?)?;

    let outcome = walk::walk(&config, &GitCli::new(), &SystemClock, &mut cache, silent)?;
    if let Some(path) = &outcome.notification {
        if outcome.has_findings() {
            println!("{}", path.display());
        }
    }
    Ok(if outcome.has_findings() { 1 } else { 0 })
}

fn settings(matches: &ArgMatches) -> Result<()> {
    let location = Config::load().policy.settings_location;
    let cwd = std::env::current_dir().context("reading the current directory")?;
    let root = resolve_repo_root(&cwd);

    let path = match matches.subcommand() {
        Some(("create", arg_matches)) => {
            let folder = arg_matches
                .get_one::<String>("FOLDER")
                .context("missing folder")?;
            let branches = arg_matches
                .get_many::<String>("branch")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            RepositorySettings::new(folder.clone(), branches).save(&root, location)?
        }
        Some(("archive", arg_matches)) => {
            let folder = arg_matches
                .get_one::<String>("FOLDER")
                .context("missing folder")?;
            let mut settings = RepositorySettings::load(&root, location)?;
            settings.set_archive_folder(folder.clone());
            settings.save(&root, location)?
        }
        Some(("add", arg_matches)) => {
            let branch = arg_matches
                .get_one::<String>("BRANCH")
                .context("missing branch")?;
            let mut settings = RepositorySettings::load(&root, location)?;
            if !settings.add_branch(branch.clone()) {
                println!("{branch} is already tracked");
            }
            settings.save(&root, location)?
        }
        _ => unreachable!(),
    };
    println!("{}", path.display());
    Ok(())
}
