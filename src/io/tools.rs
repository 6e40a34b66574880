//! External program invocation.
//!
//! Every external program is described by a [`ToolTemplate`] whose arguments
//! may contain `{name}` placeholders. Rendering a template against a set of
//! [`Bindings`] yields a concrete [`CommandSpec`].

use crate::error::{Result, VarcallError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

/// An external program plus an argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTemplate {
    /// Executable name or path
    pub program: String,

    /// Arguments; an argument that is exactly `{name}` expands to every value
    /// bound to `name`, otherwise values are substituted inline
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Render the template into a concrete command.
    pub fn render(&self, bindings: &Bindings) -> CommandSpec {
        let mut args = Vec::with_capacity(self.args.len());

        for arg in &self.args {
            if let Some(values) = bindings.whole_arg(arg) {
                args.extend(values.iter().cloned());
                continue;
            }

            let mut rendered = arg.clone();
            for (name, values) in &bindings.values {
                let placeholder = format!("{{{}}}", name);
                if rendered.contains(&placeholder) {
                    rendered = rendered.replace(&placeholder, &values.join(" "));
                }
            }
            args.push(rendered);
        }

        CommandSpec {
            program: self.program.clone(),
            args,
        }
    }
}

/// Placeholder values used when rendering a [`ToolTemplate`].
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<String, Vec<String>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single value.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), vec![value.into()]);
        self
    }

    /// Bind a path value.
    pub fn set_path(self, name: &str, path: &Path) -> Self {
        self.set(name, path.to_string_lossy().into_owned())
    }

    /// Bind a list of values.
    pub fn set_list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    fn whole_arg(&self, arg: &str) -> Option<&Vec<String>> {
        let name = arg.strip_prefix('{')?.strip_suffix('}')?;
        self.values.get(name)
    }
}

/// A fully rendered command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build a `std::process::Command` for this command line.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_arg(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_arg(arg))?;
        }
        Ok(())
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Where the standard output of a one-shot tool invocation goes.
#[derive(Debug, Clone, Copy)]
pub enum StdoutTarget<'a> {
    /// Collect it and return it to the caller
    Capture,
    /// Write it to a (truncated) file
    File(&'a Path),
    /// Pass it through to our own standard output
    Inherit,
}

/// Run a command to completion.
///
/// Standard error is always captured. A non-zero exit status becomes an
/// [`VarcallError::ExternalTool`] carrying `failure_message`, the command line
/// and the captured standard error. Returns the captured standard output
/// (empty unless `stdout` is [`StdoutTarget::Capture`]).
pub fn run_tool(spec: &CommandSpec, stdout: StdoutTarget<'_>, failure_message: &str) -> Result<Vec<u8>> {
    let mut cmd = spec.command();
    cmd.stdin(Stdio::null()).stderr(Stdio::piped());

    match stdout {
        StdoutTarget::Capture => {
            cmd.stdout(Stdio::piped());
        }
        StdoutTarget::File(path) => {
            cmd.stdout(Stdio::from(File::create(path)?));
        }
        StdoutTarget::Inherit => {
            cmd.stdout(Stdio::inherit());
        }
    }

    tracing::debug!("Running: {}", spec);

    let output = cmd.output().map_err(|e| spawn_error(spec, failure_message, &e))?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(VarcallError::tool(
            format!("{} ({})", failure_message, output.status),
            spec.to_string(),
            stderr,
        ));
    }

    if !stderr.trim().is_empty() {
        tracing::debug!("{} stderr:\n{}", spec.program, stderr.trim_end());
    }

    Ok(output.stdout)
}

/// Error for a program that could not be started at all.
pub fn spawn_error(spec: &CommandSpec, message: &str, err: &std::io::Error) -> VarcallError {
    VarcallError::tool(
        format!("{}: could not start '{}': {}", message, spec.program, err),
        spec.to_string(),
        String::new(),
    )
}
