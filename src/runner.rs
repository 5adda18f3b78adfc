//! Terraform process runner.
//!
//! Every invocation goes through [`Terraform::run`], which streams combined
//! output line by line to an [`OutputSink`] while the child runs, then
//! classifies the exit status. The automation marker and the per-call plugin
//! cache are passed as explicit child environment, never set on this process.
use crate::error::TfError;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

pub const TERRAFORM_BIN: &str = "terraform";
pub const AUTOMATION_ENV_VAR: &str = "TF_IN_AUTOMATION";
pub const PLUGIN_CACHE_ENV_VAR: &str = "TF_PLUGIN_CACHE_DIR";
pub const DETAILED_EXITCODE_FLAG: &str = "-detailed-exitcode";
pub const MASKED_ARGS: &str = "<masked>";

/// Successful result of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Detailed-exit-code mode, exit 0, strict mode off.
    NoChanges,
    /// Detailed-exit-code mode, exit 2.
    ChangesPresent,
}

/// Receives tool output lines as they arrive.
pub trait OutputSink {
    fn line(&mut self, line: &str);
}

/// Default sink: forwards each line to the `terraform` tracing target.
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn line(&mut self, line: &str) {
        tracing::info!(target: "terraform", "{line}");
    }
}

/// Sink that keeps every line; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl CaptureSink {
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for CaptureSink {
    fn line(&mut self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

/// One tool call: verb, flags, trailing positional arguments and process
/// placement.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    verb: String,
    flags: Vec<String>,
    positional: Vec<String>,
    working_dir: Option<PathBuf>,
    chdir: Option<PathBuf>,
    stdin: Option<PathBuf>,
    redirect: Option<PathBuf>,
    plugin_cache_dir: Option<PathBuf>,
    detailed_exitcode: bool,
    error_on_no_changes: bool,
}

impl Invocation {
    pub fn new(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            error_on_no_changes: true,
            ..Self::default()
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Positional arguments always follow every flag.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.positional.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    /// Passed as the global `-chdir=` option ahead of the verb.
    pub fn chdir(mut self, dir: Option<&Path>) -> Self {
        self.chdir = dir.map(Path::to_path_buf);
        self
    }

    pub fn stdin_from(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    /// Write stdout lines to `path` instead of the sink.
    pub fn redirect_to(mut self, path: &Path) -> Self {
        self.redirect = Some(path.to_path_buf());
        self
    }

    pub fn plugin_cache_dir(mut self, dir: Option<&Path>) -> Self {
        self.plugin_cache_dir = dir.map(Path::to_path_buf);
        self
    }

    pub fn detailed_exitcode(mut self) -> Self {
        self.detailed_exitcode = true;
        self
    }

    pub fn error_on_no_changes(mut self, strict: bool) -> Self {
        self.error_on_no_changes = strict;
        self
    }

    /// Full argument vector after the binary name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.flags.len() + self.positional.len() + 3);
        if let Some(chdir) = &self.chdir {
            argv.push(format!("-chdir={}", chdir.display()));
        }
        argv.push(self.verb.clone());
        argv.extend(self.flags.iter().cloned());
        if self.detailed_exitcode && !self.has_detailed_exitcode_flag() {
            argv.push(DETAILED_EXITCODE_FLAG.to_string());
        }
        argv.extend(self.positional.iter().cloned());
        argv
    }

    fn has_detailed_exitcode_flag(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| flag.eq_ignore_ascii_case(DETAILED_EXITCODE_FLAG))
    }

    fn uses_detailed_exitcode(&self) -> bool {
        self.detailed_exitcode || self.has_detailed_exitcode_flag()
    }
}

/// Invocation context: which binary to run, the child environment, and
/// whether full arguments may be logged.
#[derive(Debug, Clone)]
pub struct Terraform {
    binary: PathBuf,
    env: BTreeMap<String, String>,
    debug: bool,
}

impl Terraform {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let mut env = BTreeMap::new();
        env.insert(AUTOMATION_ENV_VAR.to_string(), "1".to_string());
        Self {
            binary: binary.into(),
            env,
            debug: false,
        }
    }

    /// Resolve `name` on `PATH` (or accept it as a path) before any call.
    pub fn locate(name: &str) -> Result<Self> {
        let binary =
            which::which(name).with_context(|| format!("locate terraform binary {name:?}"))?;
        Ok(Self::new(binary))
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Arguments reported on failure: full in debug mode, otherwise only the
    /// binary, the verb and a fixed placeholder.
    pub fn reported_args(&self, invocation: &Invocation) -> Vec<String> {
        let binary = self.binary.display().to_string();
        if self.debug {
            let mut args = vec![binary];
            args.extend(invocation.argv());
            return args;
        }
        vec![binary, invocation.verb.clone(), MASKED_ARGS.to_string()]
    }

    /// Run the invocation to completion, streaming its output into `sink`.
    pub fn run(&self, invocation: &Invocation, sink: &mut dyn OutputSink) -> Result<Outcome> {
        let argv = invocation.argv();
        if self.debug {
            let mut words = vec![self.binary.display().to_string()];
            words.extend(argv.iter().cloned());
            tracing::debug!(command = %shell_words::join(&words), "running terraform");
        } else {
            tracing::info!(verb = %invocation.verb, "running terraform");
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(&argv);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cache) = &invocation.plugin_cache_dir {
            cmd.env(PLUGIN_CACHE_ENV_VAR, cache);
        }
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        match &invocation.stdin {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("open stdin file {}", path.display()))?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut redirect = match &invocation.redirect {
            Some(path) => Some(
                File::create(path).with_context(|| format!("create {}", path.display()))?,
            ),
            None => None,
        };

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {} {}", self.binary.display(), invocation.verb))?;

        let (tx, rx) = mpsc::channel();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("child stderr was not captured"))?;
        let stdout_tx = tx.clone();
        let stdout_handle =
            thread::spawn(move || forward_lines(stdout, Stream::Stdout, &stdout_tx));
        let stderr_handle = thread::spawn(move || forward_lines(stderr, Stream::Stderr, &tx));

        let mut write_error = None;
        for (stream, line) in rx {
            match (&mut redirect, stream) {
                (Some(file), Stream::Stdout) => {
                    if write_error.is_none() {
                        if let Err(err) = writeln!(file, "{line}") {
                            write_error = Some(err);
                        }
                    }
                    if self.debug {
                        sink.line(&line);
                    }
                }
                _ => sink.line(&line),
            }
        }
        let status = finish_child(
            &mut child,
            vec![(stdout_handle, "stdout"), (stderr_handle, "stderr")],
            &invocation.verb,
        )?;
        tracing::debug!(
            verb = %invocation.verb,
            elapsed_ms = start.elapsed().as_millis(),
            code = ?status.code(),
            "terraform exited"
        );
        if let Some(err) = write_error {
            let path = invocation.redirect.as_deref().unwrap_or(Path::new(""));
            return Err(err).with_context(|| format!("write {}", path.display()));
        }
        if let Some(file) = redirect.as_mut() {
            file.flush().context("flush redirected output")?;
        }

        classify(
            status.code(),
            invocation.uses_detailed_exitcode(),
            invocation.error_on_no_changes,
        )
        .map_err(|failure| match failure {
            Failure::NoChanges => TfError::NoChanges {
                verb: invocation.verb.clone(),
            }
            .into(),
            Failure::Exit(code) => TfError::CommandFailed {
                code,
                args: self.reported_args(invocation),
            }
            .into(),
        })
    }
}

/// Why an exit status is not an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NoChanges,
    Exit(Option<i32>),
}

/// Map an exit code to an outcome.
///
/// With detailed exit codes, 0 means no changes and 2 means changes present;
/// without them only 0 succeeds.
pub fn classify(
    code: Option<i32>,
    detailed_exitcode: bool,
    error_on_no_changes: bool,
) -> std::result::Result<Outcome, Failure> {
    match (detailed_exitcode, code) {
        (false, Some(0)) => Ok(Outcome::Success),
        (true, Some(0)) if error_on_no_changes => Err(Failure::NoChanges),
        (true, Some(0)) => Ok(Outcome::NoChanges),
        (true, Some(2)) => Ok(Outcome::ChangesPresent),
        (_, code) => Err(Failure::Exit(code)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn forward_lines<R: Read>(
    pipe: R,
    stream: Stream,
    tx: &mpsc::Sender<(Stream, String)>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        // Receiver only goes away on an early return; keep draining the pipe.
        let _ = tx.send((stream, line));
    }
}

type Reader = thread::JoinHandle<std::io::Result<()>>;

/// Join every reader and reap the child before reporting any reader error.
fn finish_child(
    child: &mut Child,
    readers: Vec<(Reader, &str)>,
    verb: &str,
) -> Result<ExitStatus> {
    let joined: Vec<Result<()>> = readers
        .into_iter()
        .map(|(handle, label)| join_reader(handle, label))
        .collect();
    let status = child.wait().with_context(|| format!("wait for terraform {verb}"))?;
    joined.into_iter().collect::<Result<()>>()?;
    Ok(status)
}

fn join_reader(handle: Reader, label: &str) -> Result<()> {
    match handle.join() {
        Ok(result) => result.with_context(|| format!("read terraform {label}")),
        Err(_) => Err(anyhow!("terraform {label} reader panicked")),
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
