//! Interactive operator choices.
//!
//! The workflows never read the terminal directly; they ask a [`Prompt`]
//! for a resolved value. [`InquirePrompt`] renders the questions with
//! `inquire`, and tests substitute a scripted implementation.

use std::fmt;

use camino::Utf8PathBuf;
use inquire::{Confirm, CustomType, InquireError, Select, Text};
use thiserror::Error;

use crate::cloud::{Instance, Volume};
use crate::local_fs::expand_tilde;

/// Errors raised while asking the operator a question.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PromptError {
    /// The operator cancelled or interrupted the prompt.
    #[error("prompt cancelled by the operator")]
    Cancelled,
    /// The prompt could not be rendered or read.
    #[error("prompt failed: {0}")]
    Failed(String),
}

impl From<InquireError> for PromptError {
    fn from(err: InquireError) -> Self {
        match err {
            InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                Self::Cancelled
            }
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Answer to a volume selection that may offer an explicit way out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeChoice {
    /// The operator picked this volume.
    Volume(Volume),
    /// The operator chose to stop without changes.
    Quit,
}

impl fmt::Display for VolumeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume(volume) => volume.fmt(f),
            Self::Quit => f.write_str("Quit"),
        }
    }
}

/// Questions the workflows may put to the operator.
pub trait Prompt {
    /// Picks one instance from a non-empty list.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the prompt is cancelled or fails.
    fn select_instance(&self, instances: &[Instance]) -> Result<Instance, PromptError>;

    /// Picks one volume, optionally offering a Quit entry.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the prompt is cancelled or fails.
    fn select_volume(
        &self,
        message: &str,
        volumes: &[Volume],
        allow_quit: bool,
    ) -> Result<VolumeChoice, PromptError>;

    /// Asks for the size a volume should grow to.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the prompt is cancelled or fails.
    fn target_size_gb(&self, current_gb: u32, suggested_gb: u32) -> Result<u32, PromptError>;

    /// Asks for a private key path; `None` means generate a new key.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the prompt is cancelled or fails.
    fn key_path(&self) -> Result<Option<Utf8PathBuf>, PromptError>;

    /// Asks a yes/no question; the default answer is no.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when the prompt is cancelled or fails.
    fn confirm(&self, message: &str) -> Result<bool, PromptError>;
}

/// Terminal prompts rendered with `inquire`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InquirePrompt;

impl Prompt for InquirePrompt {
    fn select_instance(&self, instances: &[Instance]) -> Result<Instance, PromptError> {
        Ok(Select::new("Select Instance", instances.to_vec()).prompt()?)
    }

    fn select_volume(
        &self,
        message: &str,
        volumes: &[Volume],
        allow_quit: bool,
    ) -> Result<VolumeChoice, PromptError> {
        let mut choices: Vec<VolumeChoice> =
            volumes.iter().cloned().map(VolumeChoice::Volume).collect();
        if allow_quit {
            choices.push(VolumeChoice::Quit);
        }
        Ok(Select::new(message, choices).prompt()?)
    }

    fn target_size_gb(&self, current_gb: u32, suggested_gb: u32) -> Result<u32, PromptError> {
        let message = format!("New size in GB (currently {current_gb}GB)");
        Ok(CustomType::<u32>::new(&message)
            .with_default(suggested_gb)
            .with_error_message("Please type a whole number of gigabytes")
            .prompt()?)
    }

    fn key_path(&self) -> Result<Option<Utf8PathBuf>, PromptError> {
        let answer = Text::new(
            "Enter the path to the ssh key, or leave empty to generate a new ssh key \
             (only do this if the current key cannot be retrieved)",
        )
        .prompt()?;
        let trimmed = answer.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(expand_tilde(trimmed)))
    }

    fn confirm(&self, message: &str) -> Result<bool, PromptError> {
        Ok(Confirm::new(message).with_default(false).prompt()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_maps_to_cancelled() {
        assert_eq!(
            PromptError::from(InquireError::OperationCanceled),
            PromptError::Cancelled
        );
        assert_eq!(
            PromptError::from(InquireError::OperationInterrupted),
            PromptError::Cancelled
        );
    }

    #[test]
    fn quit_choice_renders_label() {
        assert_eq!(VolumeChoice::Quit.to_string(), "Quit");
        let volume = Volume {
            id: String::from("vol-1"),
            size_gb: 8,
            volume_type: String::from("gp2"),
        };
        assert_eq!(
            VolumeChoice::Volume(volume).to_string(),
            "vol-1 (type:gp2, size:8GB)"
        );
    }
}
