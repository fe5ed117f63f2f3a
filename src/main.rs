// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2025 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Entry point: parses arguments, then dispatches to the one subcommand.

use bpaf::Bpaf;

mod admin;
mod cmds;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version(env!("VERSION")))]
enum Args {
    /// Runs the ingester: loads configuration, starts the flush controller
    /// and admin HTTP server, and serves until a shutdown signal arrives.
    #[bpaf(command)]
    Run(#[bpaf(external(cmds::run::args))] cmds::run::Args),
}

fn main() {
    let args = args().run();
    if let Err(e) = real_main(args) {
        eprintln!("FATAL: {}", e.chain());
        std::process::exit(1);
    }
}

fn real_main(args: Args) -> Result<(), base::Error> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| base::err!(Internal, msg("failed to start tokio runtime"), source(e)))?;
    match args {
        Args::Run(a) => rt.block_on(cmds::run::run(a)),
    }
}
