//! Payload extraction from a Magisk package (APK/ZIP).
//!
//! Native payloads live at `lib/<abi>/lib<name>.so`; the logical name is the
//! file name with the `lib` prefix and `.so` suffix stripped. The stub APK is
//! architecture independent. Packages older than [`COMPAT_VERSION_THRESHOLD`]
//! only ship `magisk32` in the matching 32-bit ABI folder, so for the 64-bit
//! ABIs it is picked up from there.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use zip::ZipArchive;

use crate::arch::Arch;
use crate::log::LogSink;

/// Script inside the package that declares the version.
pub const VERSION_SCRIPT: &str = "assets/util_functions.sh";

/// Packages below this version code get the 32-bit compatibility rule.
pub const COMPAT_VERSION_THRESHOLD: u32 = 28000;

/// Libraries that ship in the package but are never embedded in a ramdisk.
pub const EXCLUDED_LIBS: [&str; 3] = ["libmagiskboot.so", "libbusybox.so", "libmagiskpolicy.so"];

/// Logical names a payload set must contain.
pub const REQUIRED_FILES: [&str; 1] = ["magiskinit"];

pub const STUB_APK: &str = "stub.apk";

const COMPAT_LIB: &str = "libmagisk32.so";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a valid package archive: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{}", missing_message(.missing, .arch, .available))]
    MissingRequired {
        missing: Vec<String>,
        arch: Arch,
        /// Architecture folders found under `lib/`.
        available: Vec<String>,
    },
}

impl ExtractError {
    /// False when the failure was caused by the requested ABI not being
    /// present in the package at all.
    pub fn arch_available(&self) -> bool {
        match self {
            ExtractError::MissingRequired {
                arch, available, ..
            } => available.iter().any(|a| a == arch.as_str()),
            _ => true,
        }
    }
}

fn missing_message(missing: &[String], arch: &Arch, available: &[String]) -> String {
    let mut msg = format!("Missing required files: {}", missing.join(", "));
    if !available.iter().any(|a| a == arch.as_str()) {
        msg.push_str(&format!(
            "; architecture {} not available in this package (found: {})",
            arch,
            if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            }
        ));
    }
    msg
}

/// Version declared by the package's install script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageVersion {
    /// `MAGISK_VER_CODE`, 0 when undeclared.
    pub code: u32,
    /// `MAGISK_VER`, if declared.
    pub name: Option<String>,
}

impl PackageVersion {
    pub fn needs_32bit_compat(&self) -> bool {
        self.code < COMPAT_VERSION_THRESHOLD
    }
}

fn version_code_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"MAGISK_VER_CODE=(\d+)").ok())
        .as_ref()
}

fn version_name_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"MAGISK_VER="([^"]+)""#).ok())
        .as_ref()
}

/// Pull the version assignments out of the install script.
pub fn parse_version(script: &str) -> PackageVersion {
    let code = version_code_re()
        .and_then(|re| re.captures(script))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let name = version_name_re()
        .and_then(|re| re.captures(script))
        .map(|c| c[1].to_string());
    PackageVersion { code, name }
}

/// Logical name → extracted file. Populated once per run.
#[derive(Debug, Clone, Default)]
pub struct PayloadSet {
    files: BTreeMap<String, PathBuf>,
}

impl PayloadSet {
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    fn insert(&mut self, name: String, path: PathBuf) {
        self.files.insert(name, path);
    }
}

/// What a package contains, without extracting anything.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub version: Option<PackageVersion>,
    pub architectures: BTreeSet<String>,
    pub has_stub: bool,
}

/// How an archive entry maps into the payload set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub logical: String,
    /// Taken from the 32-bit compatibility folder.
    pub compat: bool,
}

/// Architecture folder of a `lib/<abi>/<file>.so` entry.
fn lib_arch(entry: &str) -> Option<&str> {
    let parts: Vec<&str> = entry.split('/').collect();
    match parts.as_slice() {
        ["lib", arch, file] if file.ends_with(".so") && !arch.is_empty() => Some(*arch),
        _ => None,
    }
}

/// Decide whether `entry` belongs in the payload set for `arch`.
pub fn classify(entry: &str, arch: Arch, version: &PackageVersion) -> Option<Selection> {
    let file_name = entry.rsplit('/').next()?;

    if file_name == STUB_APK {
        return Some(Selection {
            logical: STUB_APK.to_string(),
            compat: false,
        });
    }

    let parent = lib_arch(entry)?;
    let stem = file_name.strip_prefix("lib")?.strip_suffix(".so")?;
    if stem.is_empty() || EXCLUDED_LIBS.contains(&file_name) {
        return None;
    }

    if parent == arch.as_str() {
        return Some(Selection {
            logical: stem.to_string(),
            compat: false,
        });
    }

    let compat_arch = arch.compat_32bit()?;
    if version.needs_32bit_compat() && file_name == COMPAT_LIB && parent == compat_arch.as_str() {
        return Some(Selection {
            logical: "magisk32".to_string(),
            compat: true,
        });
    }

    None
}

fn open_archive(package: &Path) -> Result<ZipArchive<File>, ExtractError> {
    let file = File::open(package).map_err(|source| ExtractError::Io {
        path: package.to_path_buf(),
        source,
    })?;
    ZipArchive::new(file).map_err(|source| ExtractError::Archive {
        path: package.to_path_buf(),
        source,
    })
}

fn read_version(archive: &mut ZipArchive<File>) -> Option<PackageVersion> {
    let mut script = archive.by_name(VERSION_SCRIPT).ok()?;
    let mut content = String::new();
    script.read_to_string(&mut content).ok()?;
    Some(parse_version(&content))
}

fn entry_names(archive: &ZipArchive<File>) -> Vec<String> {
    archive.file_names().map(str::to_string).collect()
}

/// Inspect a package: declared version and available architectures.
pub fn inspect(package: &Path) -> Result<PackageInfo, ExtractError> {
    let mut archive = open_archive(package)?;
    let version = read_version(&mut archive);
    let names = entry_names(&archive);
    let architectures = names
        .iter()
        .filter_map(|n| lib_arch(n))
        .map(str::to_string)
        .collect();
    let has_stub = names
        .iter()
        .any(|n| n.rsplit('/').next() == Some(STUB_APK));

    Ok(PackageInfo {
        version,
        architectures,
        has_stub,
    })
}

/// Extract the payload for `arch` from `package` into `dest`.
///
/// Fails if any of [`REQUIRED_FILES`] is absent after scanning.
pub fn extract_payload(
    package: &Path,
    arch: Arch,
    dest: &Path,
    log: &dyn LogSink,
) -> Result<PayloadSet, ExtractError> {
    log.info("Extracting files from APK...");

    let mut archive = open_archive(package)?;

    let version = match read_version(&mut archive) {
        Some(version) => {
            log.info(&format!(
                "Magisk version: {} ({})",
                version.name.as_deref().unwrap_or("unknown"),
                version.code
            ));
            version
        }
        None => {
            log.warn("Could not determine Magisk version");
            PackageVersion::default()
        }
    };

    let mut available = BTreeSet::new();
    let mut payload = PayloadSet::default();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| ExtractError::Archive {
                path: package.to_path_buf(),
                source,
            })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if let Some(found) = lib_arch(&name) {
            available.insert(found.to_string());
        }

        let Some(selection) = classify(&name, arch, &version) else {
            continue;
        };

        let output = dest.join(&selection.logical);
        let mut file = File::create(&output).map_err(|source| ExtractError::Io {
            path: output.clone(),
            source,
        })?;
        io::copy(&mut entry, &mut file).map_err(|source| ExtractError::Io {
            path: output.clone(),
            source,
        })?;

        if selection.compat {
            log.success(&format!("Extracted: {} (32-bit compat)", selection.logical));
        } else {
            log.success(&format!("Extracted: {}", selection.logical));
        }
        payload.insert(selection.logical, output);
    }

    let available: Vec<String> = available.into_iter().collect();
    log.info(&format!("Available architectures: {}", available.join(", ")));

    let missing: Vec<String> = REQUIRED_FILES
        .iter()
        .filter(|f| !payload.contains(f))
        .map(|f| f.to_string())
        .collect();

    if !missing.is_empty() {
        // Leave nothing half-extracted behind for the caller to pick up.
        for name in payload.names() {
            let _ = fs::remove_file(dest.join(name));
        }
        return Err(ExtractError::MissingRequired {
            missing,
            arch,
            available,
        });
    }

    Ok(payload)
}
