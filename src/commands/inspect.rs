//! Inspect command - shows the version and architectures of a package.

use anyhow::Result;
use std::path::Path;

use bootpatch::apk;
use bootpatch::arch::Arch;

/// Execute the inspect command.
pub fn cmd_inspect(package: &Path) -> Result<()> {
    let info = apk::inspect(package)?;

    println!("Package: {}", package.display());
    match &info.version {
        Some(version) => {
            println!(
                "  Version:       {}",
                version.name.as_deref().unwrap_or("unknown")
            );
            println!("  Version code:  {}", version.code);
            if version.needs_32bit_compat() {
                println!("  32-bit compat: yes (code < {})", apk::COMPAT_VERSION_THRESHOLD);
            }
        }
        None => println!("  Version:       unknown ({} missing)", apk::VERSION_SCRIPT),
    }

    println!("  Architectures:");
    if info.architectures.is_empty() {
        println!("    (none)");
    }
    for name in &info.architectures {
        match name.parse::<Arch>() {
            Ok(arch) => println!("    {:<12} {}", name, arch.description()),
            Err(_) => println!("    {}", name),
        }
    }
    println!(
        "  Stub APK:      {}",
        if info.has_stub { "present" } else { "absent" }
    );
    Ok(())
}
