//! Installation-bound root key derivation.
//!
//! The root key is PBKDF2-HMAC-SHA256 over a machine identifier, salted with
//! a per-installation random salt that is generated once and persisted with
//! owner-only permissions. Two installations on the same machine therefore
//! never share a key.

use std::path::{Path, PathBuf};

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use super::encryption::{CryptoError, KEY_SIZE};
use super::secret::SecretMaterial;

/// Floor on PBKDF2 iterations accepted by [`derive_root_key`].
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Minimum salt size (16 bytes = 128 bits)
pub const MIN_SALT_SIZE: usize = 16;

const SALT_FILE_NAME: &str = ".gg-trust-salt";

/// Derive the 32-byte root key. The output is written straight into a
/// zeroizing buffer.
pub fn derive_root_key(
    machine_id: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<SecretMaterial, CryptoError> {
    if iterations < MIN_KDF_ITERATIONS {
        return Err(CryptoError::KdfFailure("iteration count below minimum"));
    }
    if salt.len() < MIN_SALT_SIZE {
        return Err(CryptoError::KdfFailure("salt shorter than 16 bytes"));
    }
    if machine_id.is_empty() {
        return Err(CryptoError::KdfFailure("empty machine identifier"));
    }

    let mut key = SecretMaterial::zeroed(KEY_SIZE);
    pbkdf2_hmac::<Sha256>(machine_id, salt, iterations, key.expose_mut());
    Ok(key)
}

/// Random per-installation salt.
#[derive(Clone)]
pub struct InstallationSalt {
    bytes: SecretMaterial,
}

impl InstallationSalt {
    /// Fresh salt from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            bytes: SecretMaterial::random(MIN_SALT_SIZE),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_SALT_SIZE {
            return Err(CryptoError::KdfFailure("salt shorter than 16 bytes"));
        }
        Ok(Self {
            bytes: SecretMaterial::from_slice(bytes),
        })
    }

    /// Read the salt at `path`, creating it on first run. A file holding
    /// fewer than 16 bytes is replaced with a fresh salt.
    ///
    /// Concurrent first runs agree on one salt: each writes a private temp
    /// file and links it into place without overwriting, and every loser
    /// reads the winner's file.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        match std::fs::read(path) {
            Ok(existing) => {
                let existing = zeroize::Zeroizing::new(existing);
                if existing.len() >= MIN_SALT_SIZE {
                    return Self::from_bytes(&existing);
                }
                tracing::warn!(path = %path.display(), "Installation salt too short; regenerating");
                persist_salt(path, Self::generate().as_bytes(), true)?;
                return Self::read_persisted(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let salt = Self::generate();
        if persist_salt(path, salt.as_bytes(), false)? {
            tracing::info!(path = %path.display(), "Created installation salt");
            Ok(salt)
        } else {
            tracing::debug!(path = %path.display(), "Installation salt created concurrently; reusing it");
            Self::read_persisted(path)
        }
    }

    fn read_persisted(path: &Path) -> Result<Self, CryptoError> {
        let bytes = zeroize::Zeroizing::new(std::fs::read(path)?);
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.expose()
    }
}

impl std::fmt::Debug for InstallationSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InstallationSalt([REDACTED; {}])", self.bytes.len())
    }
}

/// Write `salt` to a temp file beside `path`, then move it into place.
/// Without `replace` an existing file wins and `Ok(false)` is returned.
fn persist_salt(path: &Path, salt: &[u8], replace: bool) -> Result<bool, CryptoError> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // Temp files are created owner-only (0600) on Unix.
    let mut tmp = tempfile::Builder::new()
        .prefix(".gg-trust-salt.")
        .tempfile_in(dir)?;
    tmp.write_all(salt)?;
    tmp.as_file().sync_all()?;

    if replace {
        tmp.persist(path).map_err(|e| CryptoError::Io(e.error))?;
        return Ok(true);
    }
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(CryptoError::Io(e.error)),
    }
}

/// Platform location of the salt file.
pub fn default_salt_path() -> Result<PathBuf, CryptoError> {
    #[cfg(target_os = "windows")]
    {
        let app_data = std::env::var("LOCALAPPDATA")
            .or_else(|_| std::env::var("APPDATA"))
            .map_err(|_| CryptoError::KdfFailure("application data directory not found"))?;
        Ok(PathBuf::from(app_data).join("gg-trust").join(SALT_FILE_NAME))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var_os("HOME")
                    .ok_or(CryptoError::KdfFailure("home directory not found"))?;
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("gg-trust").join(SALT_FILE_NAME))
    }
}

/// Machine-bound identifier fed to the KDF: hostname and user on Unix,
/// the registry MachineGuid on Windows.
#[cfg(not(target_os = "windows"))]
pub fn machine_identifier() -> Result<SecretMaterial, CryptoError> {
    let hostname = hostname::get()
        .map_err(|_| CryptoError::KdfFailure("hostname unavailable"))?
        .to_string_lossy()
        .into_owned();
    let user = ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .or_else(process_uid)
        .ok_or(CryptoError::KdfFailure("user name unavailable"))?;

    Ok(SecretMaterial::new(
        format!("{}-{}", hostname, user).into_bytes(),
    ))
}

/// Owner uid of this process, for environments without a user name.
#[cfg(not(target_os = "windows"))]
fn process_uid() -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self")
        .ok()
        .map(|meta| format!("uid{}", meta.uid()))
}

#[cfg(target_os = "windows")]
pub fn machine_identifier() -> Result<SecretMaterial, CryptoError> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            "HKLM\\SOFTWARE\\Microsoft\\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let guid = parse_machine_guid(&stdout)
        .ok_or(CryptoError::KdfFailure("MachineGuid not found"))?;
    Ok(SecretMaterial::from_slice(guid.as_bytes()))
}

#[cfg(any(target_os = "windows", test))]
fn parse_machine_guid(stdout: &str) -> Option<&str> {
    let rest = &stdout[stdout.find("MachineGuid")?..];
    let value = rest[rest.find("REG_SZ")? + "REG_SZ".len()..].trim();
    let value = value.lines().next().unwrap_or("").trim();
    (!value.is_empty()).then_some(value)
}

/// Convenience: load or create the salt at `salt_path`, read the machine
/// identifier and derive the root key.
pub fn installation_root_key(
    salt_path: &Path,
    iterations: u32,
) -> Result<SecretMaterial, CryptoError> {
    let salt = InstallationSalt::load_or_create(salt_path)?;
    let machine_id = machine_identifier()?;
    derive_root_key(machine_id.expose(), salt.as_bytes(), iterations)
}
