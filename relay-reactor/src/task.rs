//! Runs a child process, capturing its stdout, without blocking the
//! reactor: the spawn + read + wait sequence happens on a worker thread
//! (`smol::unblock`), and the caller just awaits the resulting future.
//! Used by exec-type filters (the spam-client/exec filter shape).

use std::{
    io::Read,
    process::{Command, ExitStatus, Stdio},
};

#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
}

/// Spawns `command`, waits for it to exit, and returns its stdout and exit
/// status. Dropping the returned future before it completes leaves the
/// worker thread to finish in the background; it holds no reference back
/// into the caller's state.
pub async fn run(mut command: Command) -> std::io::Result<Output> {
    command.stdout(Stdio::piped());
    smol::unblock(move || {
        let mut child = command.spawn()?;
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf)?;
        drop(stdout);
        let status = child.wait()?;
        Ok(Output { status, stdout: buf })
    })
    .await
}

/// Maps an exec-type filter's exit code to the pass/fail/abandon/special
/// outcome it signals, per the filter exit-code convention. The 102-104
/// "special" codes mean different things depending on which side of the
/// pipeline is running the filter (server-side rescan vs. client-side
/// stop-scanning); callers that care about the distinction match on the
/// wrapped code themselves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitOutcome {
    Ok,
    Fail,
    Abandon,
    Special(i32),
}

pub fn classify_exit_code(code: i32) -> ExitOutcome {
    match code {
        0 => ExitOutcome::Ok,
        1..=99 => ExitOutcome::Fail,
        100 => ExitOutcome::Abandon,
        101 => ExitOutcome::Ok,
        102..=104 => ExitOutcome::Special(code),
        _ => ExitOutcome::Fail,
    }
}
