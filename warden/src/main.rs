//! `warden`: spawns a target under a seccomp strict-mode filesystem sandbox.
//!
//! Resolves the CLI, locates and spawns the shim-preloaded target, then
//! serves its filesystem requests until it exits.

#![allow(unsafe_code)]

mod child_dir;
mod child_fd;
mod cli;
mod dispatch;
mod error;
mod policy;
mod spawn;

use std::os::unix::io::AsRawFd;
use std::os::unix::process::ExitStatusExt;

use cli::Cli;
use error::Result;

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mode = cli.mode();
    let shim_path = spawn::find_shim_path()?;
    let (mut child, pipes) = spawn::spawn(&shim_path, &cli.command)?;

    let mut handlers = dispatch::Handlers::new(mode, cli.command.clone(), cli.quiet);
    handlers.serve(pipes.request_read.as_raw_fd(), pipes.reply_write.as_raw_fd());

    let status = child.wait()?;
    Ok(status.code().unwrap_or_else(|| {
        status
            .signal()
            .map_or(1, |signum| 128 + signum)
    }))
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("warden: {e}");
            std::process::exit(1);
        }
    }
}
