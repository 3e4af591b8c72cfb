// snapback is a rotating hard-link snapshot backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use snapback::{
    config::{self, Config},
    context::{RunContext, RunOpts},
    exec::SystemRunner,
    launcher,
    report::RunReport,
    ui,
};

fn run(args: &launcher::LoopArgs) -> Result<()> {
    let config_path = config::find_config_file(args.config.as_deref(), None)?;
    let cfg = Config::load(&config_path)?;

    let opts = RunOpts {
        debug: args.debug,
        ..RunOpts::default()
    };

    let ctx = RunContext::new(
        cfg,
        config_path,
        opts,
        Arc::new(SystemRunner),
        RunReport::temporary()?,
    )?;

    launcher::run_loop(&ctx)
}

fn main() {
    let args = launcher::LoopArgs::parse();

    if let Err(e) = run(&args) {
        ui::cli::log_error(&format!("{e:#}"));
        println!("Finished with {}", "Error".bold().red());

        std::process::exit(1);
    }
}
