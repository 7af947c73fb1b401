//! Identity worker
//!
//! Runs identity operations on a tokio task so a UI loop only sends
//! commands and polls events. Commands are handled one at a time in the
//! order they were sent.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::api::Connector;
use crate::error::{ClientError, Result};
use crate::identity::IdentityManager;
use crate::models::ServerVersion;

pub enum IdentityCommand {
    Login,
    LoginWithCredentialFiles {
        cert_path: PathBuf,
        key_path: PathBuf,
        key_password: Option<Zeroizing<String>>,
    },
    Register {
        key_path: PathBuf,
        key_password: Option<Zeroizing<String>>,
    },
    Logout,
    ServerVersion,
}

impl IdentityCommand {
    pub fn name(&self) -> &'static str {
        match self {
            IdentityCommand::Login => "login",
            IdentityCommand::LoginWithCredentialFiles { .. } => "login-with-files",
            IdentityCommand::Register { .. } => "register",
            IdentityCommand::Logout => "logout",
            IdentityCommand::ServerVersion => "server-version",
        }
    }
}

impl fmt::Debug for IdentityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum IdentityEvent {
    LoggedIn {
        fingerprint: String,
        display_name: String,
    },
    LoggedOut {
        had_session: bool,
    },
    ServerVersion(ServerVersion),
    Failed {
        command: &'static str,
        error: ClientError,
    },
}

/// Sending side of a running worker
#[derive(Debug, Clone)]
pub struct IdentityHandle {
    commands: mpsc::Sender<IdentityCommand>,
}

impl IdentityHandle {
    pub async fn send(&self, command: IdentityCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|e| {
            ClientError::Configuration(format!("identity worker stopped, {:?} dropped", e.0))
        })
    }
}

pub struct IdentityWorker;

impl IdentityWorker {
    /// Start the worker. It stops once every [`IdentityHandle`] is dropped.
    pub fn spawn<C: Connector>(
        manager: Arc<IdentityManager<C>>,
        buffer: usize,
    ) -> (IdentityHandle, mpsc::Receiver<IdentityEvent>, JoinHandle<()>) {
        let (command_tx, mut command_rx) = mpsc::channel::<IdentityCommand>(buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel::<IdentityEvent>(buffer.max(1));

        let task = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let name = command.name();
                log::debug!("identity worker handling {name}");
                let event = match Self::handle(&manager, command).await {
                    Ok(event) => event,
                    Err(error) => IdentityEvent::Failed {
                        command: name,
                        error,
                    },
                };
                if event_tx.send(event).await.is_err() {
                    log::debug!("identity event receiver dropped");
                }
            }
            log::debug!("identity worker stopped");
        });

        (
            IdentityHandle {
                commands: command_tx,
            },
            event_rx,
            task,
        )
    }

    async fn handle<C: Connector>(
        manager: &IdentityManager<C>,
        command: IdentityCommand,
    ) -> Result<IdentityEvent> {
        let session = match command {
            IdentityCommand::Login => manager.login().await?,
            IdentityCommand::LoginWithCredentialFiles {
                cert_path,
                key_path,
                key_password,
            } => {
                manager
                    .login_with_credential_files(
                        &cert_path,
                        &key_path,
                        key_password.as_ref().map(|p| p.as_str()),
                    )
                    .await?
            }
            IdentityCommand::Register {
                key_path,
                key_password,
            } => {
                manager
                    .register_with_key_file(&key_path, key_password.as_ref().map(|p| p.as_str()))
                    .await?
            }
            IdentityCommand::Logout => {
                return Ok(IdentityEvent::LoggedOut {
                    had_session: manager.logout().await,
                })
            }
            IdentityCommand::ServerVersion => {
                return Ok(IdentityEvent::ServerVersion(manager.server_version().await?))
            }
        };

        Ok(IdentityEvent::LoggedIn {
            fingerprint: session.fingerprint(),
            display_name: session.user().label().to_string(),
        })
    }
}
