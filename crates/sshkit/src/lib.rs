//! Remote commands and file copies over the system OpenSSH client, plus
//! a small store of locally generated key pairs.
//!
//! Shells out to `ssh` and `ssh-keygen` instead of linking an SSH
//! library, so host keys and `~/.ssh/config` behave as they do
//! on the command line.

pub mod error;
pub mod keys;
pub mod ssh;

pub use error::{Error, ErrorCategory, Result};
pub use keys::{DEFAULT_RSA_BITS, KeyPair, KeyStore};
pub use ssh::{Output, SshClient, SshOptions, SshTarget, shell_quote};
