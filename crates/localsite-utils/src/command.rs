use crate::identity::Identity;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Whose rights an external command runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAs {
    /// The (elevated) localsite process itself.
    Elevated,
    /// The user who invoked localsite. On Unix, an elevated process drops to
    /// this user's uid/gid before exec.
    User(Identity),
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: RunAs,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as: RunAs::Elevated,
            current_dir: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path arguments are passed through lossily; document roots are
    /// validated to plain characters before they get here.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    #[must_use]
    pub fn as_user(mut self, identity: &Identity) -> Self {
        self.run_as = RunAs::User(identity.clone());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering used in logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Stdout and stderr together, for matching tolerated messages.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {}", exit_label(.status), .output.stderr.trim())]
    Failed {
        command: String,
        status: Option<i32>,
        output: CommandOutput,
    },

    /// A command meant for the invoking user would otherwise run as root.
    #[error("refusing to run `{command}` as root: uid/gid of {user} are unknown")]
    UnknownUser { command: String, user: String },
}

fn exit_label(status: &Option<i32>) -> String {
    status.map_or_else(|| "a signal".to_string(), |code| format!("status {code}"))
}

/// Runs external commands. Every host mutation localsite performs outside of
/// plain file writes goes through this trait.
pub trait CommandRunner {
    /// Run to completion and capture output, whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] when the program cannot be started.
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Path of `program` on `PATH`, if any.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run and require a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] on a non-zero exit status.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let output = self.output(spec)?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                command: spec.display(),
                status: output.status,
                output,
            })
        }
    }

    /// Does the command start and exit 0?
    fn succeeds(&self, spec: &CommandSpec) -> bool {
        match self.output(spec) {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("availability check failed: {e}");
                false
            }
        }
    }
}

/// A command run as part of a larger plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub description: String,
    pub command: CommandSpec,
    /// Output fragment that marks a failure as "already done".
    pub tolerate: Option<&'static str>,
}

impl CommandStep {
    pub fn new(description: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            description: description.into(),
            command,
            tolerate: None,
        }
    }

    #[must_use]
    pub const fn tolerating(mut self, fragment: &'static str) -> Self {
        self.tolerate = Some(fragment);
        self
    }

    /// # Errors
    ///
    /// Returns the command's error unless its output contains the tolerated
    /// fragment.
    pub fn execute(&self, runner: &dyn CommandRunner) -> Result<(), CommandError> {
        debug!("{}: {}", self.description, self.command);
        match runner.run(&self.command) {
            Ok(_) => Ok(()),
            Err(CommandError::Failed { ref output, .. })
                if self
                    .tolerate
                    .is_some_and(|fragment| output.combined().contains(fragment)) =>
            {
                warn!("{} reported \"{}\", continuing", self.command, output.combined().trim());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Runs commands on the host with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        if let RunAs::User(identity) = &spec.run_as {
            drop_to_user(&mut command, spec, identity)?;
        }

        debug!("running {}", spec.display());
        let output = command.output().map_err(|source| CommandError::Spawn {
            command: spec.display(),
            source,
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

#[cfg(unix)]
fn drop_to_user(
    command: &mut Command,
    spec: &CommandSpec,
    identity: &Identity,
) -> Result<(), CommandError> {
    use std::os::unix::process::CommandExt;

    if !nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    let (uid, gid) = user_ids(spec, identity)?;
    command
        .gid(gid)
        .uid(uid)
        .env("HOME", &identity.home)
        .env("USER", &identity.name)
        .env("LOGNAME", &identity.name);
    Ok(())
}

#[cfg(not(unix))]
fn drop_to_user(
    command: &mut Command,
    _spec: &CommandSpec,
    identity: &Identity,
) -> Result<(), CommandError> {
    command.env("USERPROFILE", &identity.home);
    Ok(())
}

/// The ids a root process must switch to before running `spec` for `identity`.
#[cfg_attr(not(unix), allow(dead_code))]
fn user_ids(spec: &CommandSpec, identity: &Identity) -> Result<(u32, u32), CommandError> {
    match (identity.uid, identity.gid) {
        (Some(uid), Some(gid)) => Ok((uid, gid)),
        _ => Err(CommandError::UnknownUser {
            command: spec.display(),
            user: identity.name.clone(),
        }),
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::RecordingRunner;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{CommandError, CommandOutput, CommandRunner, CommandSpec};
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    type Hook = Box<dyn Fn(&CommandSpec)>;

    /// Scripted [`CommandRunner`] that records every command instead of
    /// running it.
    ///
    /// Rules match on a substring of [`CommandSpec::display`]. Unmatched
    /// commands succeed with empty output.
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: RefCell<Vec<CommandSpec>>,
        failures: Vec<(String, String)>,
        responses: Vec<(String, String)>,
        hooks: Vec<(String, Hook)>,
        installs: Vec<(String, String)>,
        installed: RefCell<BTreeSet<String>>,
    }

    impl RecordingRunner {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `program` visible to [`CommandRunner::locate`].
        #[must_use]
        pub fn with_program(self, program: &str) -> Self {
            self.installed.borrow_mut().insert(program.to_string());
            self
        }

        /// Commands containing `needle` exit 1 with `stderr`.
        #[must_use]
        pub fn failing(mut self, needle: &str, stderr: &str) -> Self {
            self.failures.push((needle.to_string(), stderr.to_string()));
            self
        }

        /// Commands containing `needle` print `stdout`.
        #[must_use]
        pub fn responding(mut self, needle: &str, stdout: &str) -> Self {
            self.responses.push((needle.to_string(), stdout.to_string()));
            self
        }

        /// Run `hook` whenever a command containing `needle` is executed.
        #[must_use]
        pub fn on(mut self, needle: &str, hook: impl Fn(&CommandSpec) + 'static) -> Self {
            self.hooks.push((needle.to_string(), Box::new(hook)));
            self
        }

        /// A successful command containing `needle` makes `program` locatable.
        #[must_use]
        pub fn installing(mut self, needle: &str, program: &str) -> Self {
            self.installs.push((needle.to_string(), program.to_string()));
            self
        }

        /// Every executed command, rendered with [`CommandSpec::display`].
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().iter().map(CommandSpec::display).collect()
        }

        #[must_use]
        pub fn specs(&self) -> Vec<CommandSpec> {
            self.calls.borrow().clone()
        }

        /// Index of the first call containing `needle`.
        #[must_use]
        pub fn position(&self, needle: &str) -> Option<usize> {
            self.calls().iter().position(|call| call.contains(needle))
        }
    }

    impl CommandRunner for RecordingRunner {
        fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            let rendered = spec.display();
            self.calls.borrow_mut().push(spec.clone());

            if let Some((_, stderr)) = self.failures.iter().find(|(n, _)| rendered.contains(n)) {
                return Ok(CommandOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                });
            }

            for (needle, hook) in &self.hooks {
                if rendered.contains(needle) {
                    hook(spec);
                }
            }
            for (needle, program) in &self.installs {
                if rendered.contains(needle) {
                    self.installed.borrow_mut().insert(program.clone());
                }
            }

            let stdout = self
                .responses
                .iter()
                .find(|(n, _)| rendered.contains(n))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();
            Ok(CommandOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            })
        }

        fn locate(&self, program: &str) -> Option<PathBuf> {
            self.installed
                .borrow()
                .contains(program)
                .then(|| PathBuf::from(format!("/usr/bin/{program}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_whitespace() {
        let spec = CommandSpec::new("setfacl")
            .args(["-R", "-m", "u::rwx"])
            .arg("/srv/my site");
        assert_eq!(spec.display(), "setfacl -R -m u::rwx \"/srv/my site\"");
    }

    #[test]
    fn run_reports_stderr() {
        let runner = RecordingRunner::new().failing("nginx -t", "unknown directive \"sevrer\"");
        let err = runner.run(&CommandSpec::new("nginx").arg("-t")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`nginx -t` exited with status 1"));
        assert!(message.contains("unknown directive"));
    }

    #[test]
    fn step_tolerates_fragment() {
        let runner = RecordingRunner::new().failing("a2enmod", "Module ssl already enabled");
        let step = CommandStep::new("enable mod_ssl", CommandSpec::new("a2enmod").arg("ssl"))
            .tolerating("already enabled");
        assert!(step.execute(&runner).is_ok());

        let strict = CommandStep::new("enable mod_ssl", CommandSpec::new("a2enmod").arg("ssl"));
        assert!(strict.execute(&runner).is_err());
    }

    #[test]
    fn installing_makes_program_locatable() {
        let runner = RecordingRunner::new().installing("choco install mkcert", "mkcert");
        assert!(runner.locate("mkcert").is_none());
        runner
            .run(&CommandSpec::new("choco").args(["install", "mkcert", "-y"]))
            .unwrap();
        assert_eq!(runner.locate("mkcert"), Some(PathBuf::from("/usr/bin/mkcert")));
    }

    #[test]
    fn user_commands_need_known_ids() {
        let spec = CommandSpec::new("mkcert").arg("-install");
        let mut identity = Identity {
            name: "dev".into(),
            uid: Some(1000),
            gid: Some(1000),
            home: PathBuf::from("/home/dev"),
        };
        assert_eq!(user_ids(&spec, &identity).unwrap(), (1000, 1000));

        identity.gid = None;
        let err = user_ids(&spec, &identity).unwrap_err();
        assert!(matches!(err, CommandError::UnknownUser { .. }));
        assert_eq!(
            err.to_string(),
            "refusing to run `mkcert -install` as root: uid/gid of dev are unknown"
        );
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output() {
        let runner = SystemRunner;
        let output = runner
            .output(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!runner.succeeds(&CommandSpec::new("localsite-no-such-program")));
    }
}
