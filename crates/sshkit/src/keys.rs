//! Local key pairs, generated with `ssh-keygen` and kept on disk.
//!
//! A key pair is stored as `<dir>/<name>` (private, mode 0600) and
//! `<dir>/<name>.pub`. Once generated, the same pair is returned on every
//! later run so hosts provisioned with it stay reachable.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// RSA modulus size for generated keys.
pub const DEFAULT_RSA_BITS: u32 = 4096;

/// A key pair on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub name: String,
    pub private_key: PathBuf,
    /// OpenSSH public key line
    pub public_key: String,
}

/// Directory of named key pairs.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
    bits: u32,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            bits: DEFAULT_RSA_BITS,
        }
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the private key for `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Load an existing key pair.
    pub fn load(&self, name: &str) -> Result<Option<KeyPair>> {
        let private_key = self.path_for(name)?;
        let public_path = public_path(&private_key);
        if !private_key.exists() || !public_path.exists() {
            return Ok(None);
        }

        let public_key = fs::read_to_string(&public_path)
            .map_err(|e| Error::io(&public_path, e))?
            .trim()
            .to_string();
        log::debug!("Loaded key pair {}", private_key.display());
        Ok(Some(KeyPair {
            name: name.to_string(),
            private_key,
            public_key,
        }))
    }

    /// Generate a new RSA key pair, replacing nothing.
    ///
    /// Fails if a private key with this name already exists.
    pub fn generate(&self, name: &str) -> Result<KeyPair> {
        let private_key = self.path_for(name)?;
        if private_key.exists() {
            return Err(Error::KeyGen(format!(
                "{} already exists",
                private_key.display()
            )));
        }
        create_private_dir(&self.dir)?;

        log::info!("Generating {}-bit RSA key {}", self.bits, private_key.display());
        let output = Command::new("ssh-keygen")
            .args(["-q", "-t", "rsa", "-b", &self.bits.to_string(), "-N", "", "-C", name, "-f"])
            .arg(&private_key)
            .output()
            .map_err(|source| Error::Spawn {
                program: "ssh-keygen".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::KeyGen(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        self.load(name)?
            .ok_or_else(|| Error::KeyGen(format!("ssh-keygen did not write {}", private_key.display())))
    }

    /// Load the key pair, generating it on first use.
    pub fn ensure(&self, name: &str) -> Result<KeyPair> {
        match self.load(name)? {
            Some(pair) => Ok(pair),
            None => self.generate(name),
        }
    }
}

fn public_path(private_key: &Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKeyName(name.to_string()))
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io(dir, e))?;
    }
    Ok(())
}
