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

#![allow(dead_code)]

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat $(if $guard:expr)?, $actual:expr) => {
        match $actual {
            $expected $(if $guard)? => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

mod cli;
mod store;
mod support;

fn main() {
    cli::main::main();
}

fn console_log_config(
    level: log::LevelFilter,
) -> Result<log4rs::config::Config, String> {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();

    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| e.to_string())
}

fn init_simple_log() {
    let result = console_log_config(log::LevelFilter::Info).and_then(|c| {
        log4rs::init_config(c).map(|_| ()).map_err(|e| e.to_string())
    });
    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
        support::sysexits::EX_SOFTWARE.exit();
    }
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let _ = log4rs::init_config(
            console_log_config(log::LevelFilter::Debug).unwrap(),
        );
    })
}
