//! Local SSH key discovery and generation.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::exec::CommandRunner;
use crate::local_fs;

use super::{BootstrapError, Stage};

/// Candidate private keys, in order of preference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPaths {
    /// Key generated and maintained by this tool.
    pub managed: Utf8PathBuf,
    /// Pre-existing default key.
    pub fallback: Utf8PathBuf,
}

impl KeyPaths {
    /// First key that exists on disk.
    #[must_use]
    pub fn existing(&self) -> Option<&Utf8Path> {
        [self.managed.as_path(), self.fallback.as_path()]
            .into_iter()
            .find(|path| path.is_file())
    }
}

/// Generates RSA key pairs with `ssh-keygen`.
#[derive(Clone, Debug)]
pub struct KeyGenerator<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> KeyGenerator<R> {
    /// Creates a generator invoking `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Writes a passphrase-less PEM RSA key pair at `private_key`, replacing
    /// any existing pair, and returns the public key text.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::KeyGeneration`] when `ssh-keygen` fails or
    /// leaves no public key behind.
    pub fn generate(&self, private_key: &Utf8Path) -> Result<String, BootstrapError> {
        let failure = |message: String| BootstrapError::KeyGeneration {
            path: private_key.to_owned(),
            message,
        };
        let args: Vec<OsString> = [
            "-t",
            "rsa",
            "-b",
            "4096",
            "-C",
            "",
            "-N",
            "",
            "-m",
            "PEM",
            "-f",
            private_key.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        info!(stage = %Stage::GenerateKey, path = %private_key, "generating ssh key pair");
        // Answers the overwrite question when a previous pair exists.
        let output = self
            .runner
            .run_with_input(&self.program, &args, b"y\n")
            .map_err(|err| failure(err.to_string()))?;
        if !output.is_success() {
            return Err(failure(format!(
                "{} exited with status {}: {}",
                self.program,
                output.status_text(),
                output.stderr.trim()
            )));
        }

        let public_key = public_key_path(private_key);
        let text = local_fs::read_to_string(&public_key)
            .map_err(|message| failure(format!("no public key at {public_key}: {message}")))?;
        debug!(path = %public_key, "public key written");
        Ok(text.trim().to_owned())
    }
}

/// Public half of a key pair at `private_key`.
#[must_use]
pub fn public_key_path(private_key: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{private_key}.pub"))
}
