//! The device callback keeps the physical device in sync with the config tree.  The store calls
//! it with every candidate configuration during a set, and again with the last committed
//! configuration if the device rejects a candidate.

use datastore::TypedConfig;
use log::{debug, trace};
use snafu::{ensure, OptionExt, ResultExt};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Applies a configuration to the device.
pub trait DeviceCallback: Send + Sync {
    fn apply(&self, config: &TypedConfig) -> Result<()>;
}

impl<F> DeviceCallback for F
where
    F: Fn(&TypedConfig) -> Result<()> + Send + Sync,
{
    fn apply(&self, config: &TypedConfig) -> Result<()> {
        self(config)
    }
}

/// Runs a program with the candidate configuration as JSON on its stdin.  A non-zero exit is a
/// rejection of the configuration.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandApplier {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeviceCallback for CommandApplier {
    fn apply(&self, config: &TypedConfig) -> Result<()> {
        let input = serde_json::to_vec(&config.data).context(error::SerializeSnafu)?;

        debug!("Launching {} to apply config", self.program.display());
        let mut cmd = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context(error::StartSnafu {
                program: &self.program,
            })?;

        trace!("Sending config");
        // Taking stdin closes it once written, so the program sees EOF.
        cmd.stdin
            .take()
            .context(error::StdinSnafu)?
            .write_all(&input)
            .context(error::WriteSnafu)?;

        let output = cmd.wait_with_output().context(error::WaitSnafu)?;
        ensure!(
            output.status.success(),
            error::ExitSnafu {
                code: output
                    .status
                    .code()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
        );
        Ok(())
    }
}

pub mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to serialize config for device: {}", source))]
        Serialize { source: serde_json::Error },

        #[snafu(display("Unable to start {}: {}", program.display(), source))]
        Start { program: PathBuf, source: io::Error },

        #[snafu(display("Unable to use stdin of config applier"))]
        Stdin,

        #[snafu(display("Unable to send config to config applier: {}", source))]
        Write { source: io::Error },

        #[snafu(display("Failed waiting on config applier: {}", source))]
        Wait { source: io::Error },

        #[snafu(display("Config applier exited with code {}: {}", code, stderr))]
        Exit { code: String, stderr: String },

        #[snafu(display("Device rejected config: {}", msg))]
        Rejected { msg: String },
    }
}

pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn config() -> TypedConfig {
        TypedConfig::root(json!({"system": {"config": {"hostname": "switch_a"}}}))
    }

    #[test]
    fn closures_are_callbacks() {
        let reject = |_: &TypedConfig| -> Result<()> {
            error::RejectedSnafu { msg: "no thanks" }.fail()
        };
        assert!(reject.apply(&config()).is_err());

        let accept = |c: &TypedConfig| -> Result<()> {
            assert!(c.is_root());
            Ok(())
        };
        accept.apply(&config()).unwrap();
    }

    #[test]
    fn command_gets_config_on_stdin() {
        // Succeeds only if the hostname made it through stdin.
        let applier = CommandApplier::new("sh", vec!["-c", "grep -q switch_a"]);
        applier.apply(&config()).unwrap();
    }

    #[test]
    fn command_failure() {
        let applier = CommandApplier::new("sh", vec!["-c", "cat >/dev/null; echo nope >&2; exit 3"]);
        match applier.apply(&config()) {
            Err(Error::Exit { code, stderr }) => {
                assert_eq!(code, "3");
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn command_missing() {
        let applier = CommandApplier::new("/nonexistent/applier", Vec::<String>::new());
        assert!(matches!(applier.apply(&config()), Err(Error::Start { .. })));
    }
}
