use crate::error::NotifyError;
use aldrive_core::config::NotifyConfig;
use std::io::Write;
use std::process::{Command, Stdio};

pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, subject: &str, _body: &str) -> Result<(), NotifyError> {
        tracing::trace!("notification suppressed: {}", subject);
        Ok(())
    }
}

/// Pipes the body to `<command> -s <subject> <email>`.
pub struct MailNotifier {
    command: String,
    email: String,
}

impl MailNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            command: config.command.clone(),
            email: config.email.clone(),
        }
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-s")
            .arg(subject)
            .arg(&self.email)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        aldrive_core::logging::log_command(&cmd);

        let spawn_err = |source| NotifyError::Spawn {
            command: self.command.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes()).map_err(spawn_err)?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(NotifyError::Failed {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

pub fn notifier_for(config: Option<&NotifyConfig>) -> Box<dyn Notifier> {
    match config {
        Some(c) => Box::new(MailNotifier::new(c)),
        None => Box::new(NullNotifier),
    }
}
