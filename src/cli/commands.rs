//! Command dispatch

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::generate;
use tracing::{debug, info, instrument};

use crate::application::TreeModel;
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::{EntityKey, PathTreeBuilder};
use crate::infrastructure::{read_path_list, FsGenerator, InfraError};
use crate::tree_traits::TreeNodeConvert;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Some(Commands::Browse {
            dir,
            depth,
            sort,
            all,
        }) => browse(cli, dir.as_deref(), *depth, *sort, *all),
        Some(Commands::Paths { file, no_collapse }) => paths(cli, file.as_deref(), *no_collapse),
        Some(Commands::Config { command }) => config(cli, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        None => Err(CliError::Usage(
            "no command given, try `lazytree --help`".into(),
        )),
    }
}

fn current_dir() -> CliResult<PathBuf> {
    env::current_dir().map_err(|e| InfraError::io("current directory", e).into())
}

fn load_settings(cli: &Cli, fallback: &Path) -> CliResult<Settings> {
    let dir = cli.config_dir.as_deref().unwrap_or(fallback);
    Ok(Settings::load(Some(dir))?)
}

/// `-L 0` would leave nothing but the root.
fn levels(depth: Option<usize>) -> CliResult<Option<usize>> {
    match depth {
        Some(0) => Err(CliError::InvalidArgs("--depth must be at least 1".into())),
        depth => Ok(depth),
    }
}

#[instrument(skip(cli))]
fn browse(
    cli: &Cli,
    dir: Option<&Path>,
    depth: Option<usize>,
    sort: bool,
    all: bool,
) -> CliResult<()> {
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => current_dir()?,
    };
    let settings = load_settings(cli, &dir)?;

    let mut generator = FsGenerator::from_settings(&dir, &settings)?.with_dirs_first(sort);
    if all {
        generator = generator.with_hidden(true);
    }
    if let Some(depth) = levels(depth)? {
        generator = generator.with_initial_depth(depth);
    }
    debug!(base = %generator.base().display(), "browsing");

    let model = TreeModel::new(settings.population_options())?;
    model.install(Arc::new(generator));
    if !model.wait_until_idle(settings.wait_timeout()) {
        output::warning(&format!(
            "population still running after {}s, showing partial tree",
            settings.wait_timeout_secs
        ));
        model.cancel_running_request();
    }

    if let Some(title) = model.title().filter(|t| !t.is_empty()) {
        output::header(&title);
    }
    let (tree, nodes, duplicates) = model.with_table(|table| {
        (
            table.to_tree_with(output::node_label),
            table.len() - 1,
            table.duplicate_count(),
        )
    });
    output::info(&tree);
    output::detail(&format!("{} entries, {} duplicates", nodes, duplicates));
    info!(nodes, duplicates, "browse finished");
    Ok(())
}

#[instrument(skip(cli))]
fn paths(cli: &Cli, file: Option<&Path>, no_collapse: bool) -> CliResult<()> {
    let cwd = current_dir()?;
    let settings = load_settings(cli, &cwd)?;
    let entries = read_path_list(file)?;

    let mut builder = PathTreeBuilder::new(settings.collapse_folders && !no_collapse);
    builder
        .import_all(
            entries
                .iter()
                .map(|p| (p.as_str(), EntityKey::from(p.as_str()))),
        )
        .map_err(InfraError::from)?;
    debug!(nodes = builder.node_count(), "built path tree");

    let model = TreeModel::new(settings.population_options())?;
    model.install_table(builder.into_table());
    let tree = model.with_table(|table| table.to_tree_with(output::node_label));
    output::info(&tree);
    Ok(())
}

fn config(cli: &Cli, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let cwd = current_dir()?;
            let settings = load_settings(cli, &cwd)?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Path => {
            let cwd = current_dir()?;
            let local = local_config_path(cli.config_dir.as_deref().unwrap_or(&cwd));
            match global_config_path() {
                Some(global) => output::info(&format!(
                    "global: {}{}",
                    global.display(),
                    if global.exists() { "" } else { " (missing)" }
                )),
                None => output::warning("no home directory, global config disabled"),
            }
            output::info(&format!(
                "local:  {}{}",
                local.display(),
                if local.exists() { "" } else { " (missing)" }
            ));
        }
        ConfigCommands::Template => output::info(&Settings::template()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::error::exitcode;

    #[test]
    fn given_zero_levels_when_browsing_then_invalid_args() {
        let err = levels(Some(0)).unwrap_err();

        assert!(matches!(err, CliError::InvalidArgs(_)));
        assert_eq!(err.exit_code(), exitcode::USAGE);
        assert_eq!(levels(Some(2)).unwrap(), Some(2));
        assert_eq!(levels(None).unwrap(), None);
    }
}
