//! SSH transport implementation using russh.
//!
//! Each opened shell or exec channel is bridged onto plain mpsc byte
//! channels by background tasks, so the engine above never touches russh
//! types. The bridge tasks end when either side goes away.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, warn};
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{ChannelMsg, Sig};
use secrecy::ExposeSecret;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::{ExecChannel, ExecControl, ExecEvent, ShellChannel};
use crate::error::{Result, TransportError};

/// Depth of the mpsc channels bridging a russh channel.
const BRIDGE_DEPTH: usize = 64;

/// SSH transport wrapping a russh client session.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<ClientHandler>,

    /// Configuration used for this connection.
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(config.timeout),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = ClientHandler {
            host: config.host.clone(),
            port: config.port,
            verification: config.host_key_verification.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host-key error stored by check_server_key
            // over the generic russh::Error::UnknownKey.
            match host_key_error.lock().unwrap().take() {
                Some(hk_err) => hk_err,
                None => TransportError::Ssh(e),
            }
        })?;

        Self::authenticate(&mut session, &config).await?;

        Ok(Self { session, config })
    }

    /// Open an interactive shell with a PTY and bridge it to a raw duplex
    /// byte channel.
    pub async fn open_shell(&self) -> Result<ShellChannel> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        let (inbound_tx, inbound_rx) = mpsc::channel(BRIDGE_DEPTH);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(BRIDGE_DEPTH);

        let stream = channel.into_stream();
        let (mut reader, mut writer) = tokio::io::split(stream);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if inbound_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("shell channel reader finished");
        });

        tokio::spawn(async move {
            while let Some(data) = outbound_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
            debug!("shell channel writer finished");
        });

        Ok(ShellChannel::new(outbound_tx, inbound_rx))
    }

    /// Start `command` on the remote side and bridge its output, exit
    /// status, and cancellation onto an exec channel.
    pub async fn open_exec(&self, command: &str) -> Result<ExecChannel> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .exec(true, command)
            .await
            .map_err(TransportError::Ssh)?;

        let (event_tx, event_rx) = mpsc::channel(BRIDGE_DEPTH);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut control_open = true;
            loop {
                let mut cancel = false;
                tokio::select! {
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) => {
                            if event_tx
                                .send(ExecEvent::Stdout(Bytes::copy_from_slice(&data)))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                            if event_tx
                                .send(ExecEvent::Stderr(Bytes::copy_from_slice(&data)))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            let _ = event_tx.send(ExecEvent::Exit(exit_status)).await;
                        }
                        Some(ChannelMsg::Eof) => {}
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    },
                    ctl = control_rx.recv(), if control_open => match ctl {
                        Some(ExecControl::Cancel) => cancel = true,
                        None => control_open = false,
                    },
                }
                if cancel {
                    debug!("cancel requested, signaling remote command");
                    let _ = channel.signal(Sig::KILL).await;
                    let _ = channel.close().await;
                }
            }
            debug!("exec channel bridge finished");
        });

        Ok(ExecChannel::new(event_rx, control_tx))
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<ClientHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;
                Self::authenticate_key(session, &config.username, Arc::new(key)).await?
            }
            AuthMethod::PrivateKeyData(key) => {
                Self::authenticate_key(session, &config.username, Arc::new((**key).clone())).await?
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    async fn authenticate_key(
        session: &mut Handle<ClientHandler>,
        username: &str,
        key: Arc<russh::keys::PrivateKey>,
    ) -> Result<bool> {
        // Pick the best RSA hash algorithm the server supports.
        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(TransportError::Ssh)?
            .flatten();

        Ok(session
            .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(TransportError::Ssh)?
            .success())
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// SSH client handler for russh.
struct ClientHandler {
    host: String,
    port: u16,
    verification: HostKeyVerification,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let known = || {
            russh::keys::check_known_hosts(&self.host, self.port, server_public_key)
                .map_err(|e| TransportError::Key(e.to_string()))
        };

        match self.verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match known() {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = russh::keys::known_hosts::learn_known_hosts(
                        &self.host,
                        self.port,
                        server_public_key,
                    ) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => {
                    *self.host_key_error.lock().unwrap() = Some(e);
                    Ok(false)
                }
            },

            HostKeyVerification::Strict => match known() {
                Ok(true) => Ok(true),
                Ok(false) => {
                    *self.host_key_error.lock().unwrap() = Some(TransportError::Key(format!(
                        "unknown host key for {}:{}",
                        self.host, self.port
                    )));
                    Ok(false)
                }
                Err(e) => {
                    *self.host_key_error.lock().unwrap() = Some(e);
                    Ok(false)
                }
            },
        }
    }
}
