//! Constants used across the Gauntlet workspace.

/// The default filename for Gauntlet's configuration.
pub const CONFIG_FILE: &str = "tox.ini";

/// Manifest consulted for embedded configuration when the ini file is absent.
pub const PYPROJECT_FILE: &str = "pyproject.toml";

/// The default work directory holding per-environment dirs.
pub const WORKDIR_DEFAULT: &str = ".tox";

/// The default installer program for provisioning.
pub const INSTALLER_DEFAULT: &str = "pip";

/// Combined coverage data file, and the prefix of parallel data files.
pub const DATA_FILE: &str = ".coverage";
pub const DATA_FILE_PREFIX: &str = ".coverage.";

/// Marker recording an environment's provisioning fingerprint.
pub const FINGERPRINT_FILE: &str = ".fingerprint";

/// Subdirectory of an environment dir holding provisioned executables.
pub const BIN_DIR: &str = "bin";
