//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mapistore.
//
// Mapistore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mapistore is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mapistore. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Create a new, empty message store.
    Init(InitSubcommand),
    /// List the folders and messages in a store snapshot.
    Inspect(InspectSubcommand),
    /// Parse a configuration file and print the result.
    ///
    /// Every option is printed, including those left at their default.
    CheckConfig(CheckConfigSubcommand),
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The system configuration file
    /// [default: /etc/mapistore/mapistore.toml or
    /// /usr/local/etc/mapistore/mapistore.toml, if present]
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,

    /// The snapshot file to operate on
    /// [default: `storage.snapshot` from the configuration]
    #[structopt(long, parse(from_os_str))]
    pub(super) snapshot: Option<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct InitSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Create a folder with this name. May be given more than once.
    #[structopt(long = "folder")]
    pub(super) folders: Vec<String>,

    /// Grant this user owner rights on every created folder.
    #[structopt(long)]
    pub(super) owner: Option<String>,

    /// Overwrite the snapshot if it already exists.
    #[structopt(long)]
    pub(super) force: bool,
}

#[derive(StructOpt)]
pub(super) struct InspectSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Also list soft-deleted messages.
    #[structopt(long)]
    pub(super) soft_deleted: bool,
}

#[derive(StructOpt)]
struct CheckConfigSubcommand {
    /// The configuration file to check.
    #[structopt(parse(from_os_str))]
    file: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::Init(cmd) => {
            let (config, config_path) =
                load_config(cmd.common.config.clone());
            init_log(config_path.as_deref());
            super::store_admin::init(config, cmd);
        },
        Command::Inspect(cmd) => {
            let (config, config_path) =
                load_config(cmd.common.config.clone());
            init_log(config_path.as_deref());
            super::store_admin::inspect(config, cmd);
        },
        Command::CheckConfig(cmd) => {
            let config = read_config(&cmd.file);
            match toml::to_string_pretty(&config) {
                Ok(s) => print!("{}", s),
                Err(e) => die!(EX_SOFTWARE, "Unable to format config: {}", e),
            }
        },
    }
}

/// Locate and load the system configuration.
///
/// Returns the path it was loaded from, if any. With no explicit path and no
/// file in the usual places, the defaults are used.
fn load_config(
    explicit: Option<PathBuf>,
) -> (SystemConfig, Option<PathBuf>) {
    let path = explicit.or_else(|| {
        [
            "/etc/mapistore/mapistore.toml",
            "/usr/local/etc/mapistore/mapistore.toml",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
    });

    match path {
        Some(path) => (read_config(&path), Some(path)),
        None => (SystemConfig::default(), None),
    }
}

fn read_config(path: &Path) -> SystemConfig {
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        die!(EX_CONFIG, "Error reading '{}': {}", path.display(), e);
    }

    match toml::from_slice(&system_config_toml) {
        Ok(config) => config,
        Err(e) => die!(
            EX_CONFIG,
            "Error in config file at '{}': {}",
            path.display(),
            e
        ),
    }
}

fn init_log(config_path: Option<&Path>) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    let log_config_file = config_path
        .and_then(Path::parent)
        .map(|dir| dir.join("logging.toml"))
        .filter(|f| f.is_file());
    if let Some(log_config_file) = log_config_file {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let result = syslog::unix(formatter)
            .map_err(|e| e.to_string())
            .and_then(|logger| {
                log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
                    logger,
                )))
                .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => log::set_max_level(log::LevelFilter::Info),
            Err(e) => die!(EX_SOFTWARE, "Failed to connect to syslog: {}", e),
        }
    }
}
