use sha2::{Digest, Sha256};

use crate::environment::EnvConfig;

/// Computes the provisioning identity of an environment.
///
/// A matching recorded fingerprint means the environment directory can be
/// reused without re-running the installer; any change to the installer,
/// the dependency set, the extras, or the install mode produces a new
/// fingerprint and forces re-provisioning.
pub fn provision_fingerprint(installer: &str, config: &EnvConfig) -> String {
    let mut hasher = Sha256::new();

    hasher.update(installer.as_bytes());
    hasher.update(b"\0");
    hasher.update(if config.skip_install {
        b"skip".as_slice()
    } else {
        b"install".as_slice()
    });
    hasher.update(b"\0");

    for dep in &config.deps {
        hasher.update(dep.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"--\0");
    for extra in &config.extras {
        hasher.update(extra.as_bytes());
        hasher.update(b"\0");
    }

    hex::encode(hasher.finalize())
}
