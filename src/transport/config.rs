//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    /// This is the default and matches common SSH client behavior.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Terminal width for the shell PTY.
    pub terminal_width: u32,

    /// Terminal height for the shell PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,
}

impl SshConfig {
    /// Minimal config for `username@host` with password auth.
    pub fn password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth: AuthMethod::Password(SecretString::from(password.into())),
            ..Self::new(host, username)
        }
    }

    /// Minimal config for `username@host` with no authentication.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth: AuthMethod::None,
            timeout: Duration::from_secs(30),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication method for SSH connections.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication (for testing only).
    None,

    /// Password authentication. The password is kept out of debug output.
    Password(SecretString),

    /// Private key authentication from a key file.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },

    /// Private key authentication from an already-loaded key.
    PrivateKeyData(Box<russh::keys::PrivateKey>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_config_defaults() {
        let config = SshConfig::password("10.0.0.1", "admin", "secret");
        assert_eq!(config.port, 22);
        assert_eq!(config.socket_addr(), "10.0.0.1:22");
        assert!(matches!(config.auth, AuthMethod::Password(_)));
    }

    #[test]
    fn password_is_not_leaked_in_debug() {
        let config = SshConfig::password("10.0.0.1", "admin", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
    }
}
