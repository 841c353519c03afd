//! End-to-end patch runs against an in-process toolkit.
//!
//! The fake toolkit creates the artifacts the real one would, so these tests
//! exercise the full stage sequence and working-directory lifecycle.

mod helpers;

use helpers::{FakeBehaviour, FakeToolkit, PackageBuilder, TestEnv, RESTORED_RAMDISK};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use bootpatch::arch::Arch;
use bootpatch::log::{Level, MemoryLog};
use bootpatch::patch::{PatchOptions, RunContext};

fn modern_package(env: &TestEnv) -> std::path::PathBuf {
    env.package("Magisk-v28.0.apk", PackageBuilder::magisk(28000, &["arm64-v8a", "armeabi-v7a"]))
}

// =============================================================================
// Full runs
// =============================================================================

#[test]
fn test_stock_image_full_sequence() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    let outcome = env
        .patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert_eq!(outcome.output, env.output);
    assert_eq!(fs::read(&env.output).unwrap(), b"ANDROID!fake-boot-image+magisk");
    assert_eq!(outcome.size, fs::metadata(&env.output).unwrap().len());
    assert_eq!(outcome.sha256.len(), 64);
    assert_ne!(outcome.sha256, outcome.original_sha256);

    let calls = toolkit.calls();
    assert_eq!(calls[0], "unpack boot.img");
    assert_eq!(calls[1], "cpio ramdisk.cpio test");
    assert_eq!(calls[2], "sha1 boot.img");
    assert_eq!(calls.last().unwrap(), "repack boot.img");

    // Stage order: compress before ramdisk patch, kernel before dtb, dtb before repack.
    let pos = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
    assert!(pos("compress") < pos("cpio ramdisk.cpio add"));
    assert!(pos("cpio ramdisk.cpio add") < pos("hexpatch"));
    assert!(pos("hexpatch") < pos("dtb dtb test"));
    assert!(pos("dtb dtb patch") < pos("repack"));

    // The untouched ramdisk is backed up before the payload goes in.
    assert_eq!(toolkit.recorded().orig_at_patch.as_deref(), Some("ramdisk.cpio"));

    assert!(log.contains(Level::Success, "Patching completed successfully!"));
    assert!(env.leftover_run_dirs().is_empty());
}

#[test]
fn test_every_call_shares_one_directory_and_flags() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());
    let options = PatchOptions {
        recovery_mode: true,
        ..PatchOptions::default()
    };

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, options))
        .unwrap();

    let recorded = toolkit.recorded();
    assert_eq!(recorded.dirs.len(), 1);
    let dir = recorded.dirs.iter().next().unwrap();
    assert!(dir.starts_with(&env.run_root));
    assert!(!dir.exists());
    assert!(recorded
        .env
        .contains(&("RECOVERYMODE".to_string(), "true".to_string())));
    assert!(recorded
        .env
        .contains(&("KEEPVERITY".to_string(), "true".to_string())));
}

#[test]
fn test_config_written_before_ramdisk_patch() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let config = toolkit.recorded().config_at_patch.unwrap();
    assert!(config.starts_with("KEEPVERITY=true\nKEEPFORCEENCRYPT=true\n"));
    assert!(config.ends_with("SHA1=0123456789abcdef0123456789abcdef01234567\n"));
}

#[test]
fn test_missing_digest_omits_sha1_line() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        digest: None,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let config = toolkit.recorded().config_at_patch.unwrap();
    assert!(!config.contains("SHA1="));
    assert!(log.contains(Level::Warning, "SHA1"));
}

#[test]
fn test_ramdisk_ops_add_only_compressed_payloads() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        failing_compress: ["stub.apk"].into_iter().collect(),
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let ops = toolkit.recorded().cpio_ops;
    assert_eq!(ops.len(), 1);
    let ops = &ops[0];
    assert_eq!(ops[0], "add 0750 init magiskinit");
    assert!(ops.contains(&"add 0644 overlay.d/sbin/magisk.xz magisk.xz".to_string()));
    assert!(ops.contains(&"add 0644 overlay.d/sbin/init-ld.xz init-ld.xz".to_string()));
    assert!(!ops.iter().any(|op| op.contains("stub.xz")));
    assert!(!ops.iter().any(|op| op.contains("magisk32.xz")));
    assert!(log.contains(Level::Warning, "Failed to compress stub.apk"));
}

// =============================================================================
// Kernel patching
// =============================================================================

#[test]
fn test_legacy_sar_adds_exactly_one_hexpatch() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let log = Arc::new(MemoryLog::new());

    let plain = FakeToolkit::new(FakeBehaviour::default());
    env.patcher(&plain, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let sar = FakeToolkit::new(FakeBehaviour::default());
    let options = PatchOptions {
        legacy_sar: true,
        ..PatchOptions::default()
    };
    env.patcher(&sar, &log)
        .run(&env.request(&package, options))
        .unwrap();

    let plain_calls = plain.calls_starting("hexpatch");
    let sar_calls = sar.calls_starting("hexpatch");
    assert_eq!(plain_calls.len(), 3);
    assert_eq!(sar_calls.len(), 4);
    assert_eq!(&sar_calls[..3], plain_calls.as_slice());
    assert!(sar_calls[3].contains("736B69705F696E697472616D667300"));
}

#[test]
fn test_kernel_dropped_when_no_patch_applies() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        kernel_matches: BTreeSet::new(),
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert_eq!(toolkit.recorded().kernel_at_repack, Some(false));
}

#[test]
fn test_kernel_kept_when_one_patch_applies() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert_eq!(toolkit.recorded().kernel_at_repack, Some(true));
    assert!(log.contains(Level::Success, "Samsung defex"));
}

#[test]
fn test_no_kernel_no_hexpatch() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        unpacked: vec!["ramdisk.cpio"],
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert!(toolkit.calls_starting("hexpatch").is_empty());
    assert!(toolkit.calls_starting("dtb").is_empty());
}

// =============================================================================
// Ramdisk classification
// =============================================================================

#[test]
fn test_no_ramdisk_skips_ramdisk_stages() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        unpacked: vec!["kernel"],
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert!(toolkit.calls_starting("cpio").is_empty());
    assert_eq!(toolkit.calls_starting("repack").len(), 1);
    assert!(log.contains(Level::Warning, "No ramdisk found"));
}

#[test]
fn test_patched_ramdisk_restored_then_patched() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        ramdisk_test_code: 1,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let recorded = toolkit.recorded();
    let ops = recorded.cpio_ops;
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0], vec!["extract .backup/.magisk config.orig", "restore"]);
    assert_eq!(ops[1][0], "add 0750 init magiskinit");
    // The backup is taken from the restored ramdisk, not the patched one.
    assert_eq!(recorded.orig_at_patch.as_deref(), Some(RESTORED_RAMDISK));
    assert!(log.contains(Level::Warning, "Magisk patched boot image detected"));
}

#[test]
fn test_failed_restore_is_only_a_warning() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        ramdisk_test_code: 1,
        restore_code: 1,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert!(log.contains(Level::Warning, "Failed to restore ramdisk backup"));
    assert_eq!(toolkit.recorded().orig_at_patch.as_deref(), Some("ramdisk.cpio"));
    assert!(env.output.exists());
}

#[test]
fn test_unsupported_ramdisk_aborts() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        ramdisk_test_code: 2,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    let err = env
        .patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap_err();

    assert!(err.to_string().contains("unsupported programs"));
    assert!(toolkit.calls_starting("repack").is_empty());
    assert!(toolkit.calls_starting("compress").is_empty());
    assert!(!env.output.exists());
    assert!(env.leftover_run_dirs().is_empty());
    assert!(log.contains(Level::Error, "unsupported programs"));
    let errors = log.entries().into_iter().filter(|(level, _)| *level == Level::Error);
    assert_eq!(errors.count(), 1);
}

// =============================================================================
// Failures and cleanup
// =============================================================================

#[test]
fn test_unpack_failure_aborts_and_cleans_up() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        unpack_code: 1,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());
    let patcher = env.patcher(&toolkit, &log);

    let err = patcher
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap_err();

    assert!(err.to_string().contains("Failed to unpack boot image"));
    assert_eq!(toolkit.calls(), vec!["unpack boot.img"]);
    assert!(env.leftover_run_dirs().is_empty());
    assert!(!patcher.gate().is_busy());
}

#[test]
fn test_repack_without_output_fails() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        repack_writes_output: false,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    let err = env
        .patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap_err();

    assert!(err.to_string().contains("Output boot image not found"));
    assert!(env.leftover_run_dirs().is_empty());
}

#[test]
fn test_device_tree_failures_do_not_abort() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour {
        unpacked: vec!["ramdisk.cpio", "kernel", "dtb", "extra"],
        device_tree_test_code: 1,
        device_tree_patch_code: 1,
        ..FakeBehaviour::default()
    });
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert_eq!(toolkit.calls_starting("dtb").len(), 4);
    assert!(log.contains(Level::Warning, "Could not patch extra"));
    assert!(env.output.exists());
}

#[test]
fn test_missing_inputs_never_start_a_run() {
    let env = TestEnv::new();
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    let err = env
        .patcher(&toolkit, &log)
        .run(&env.request(&env.base_dir.join("missing.apk"), PatchOptions::default()))
        .unwrap_err();

    assert!(err.to_string().contains("Magisk APK not found"));
    assert!(log.contains(Level::Error, "Magisk APK not found"));
    assert!(toolkit.calls().is_empty());
    assert!(env.leftover_run_dirs().is_empty());
}

#[test]
fn test_sequential_runs_leave_nothing_behind() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let log = Arc::new(MemoryLog::new());

    let first = FakeToolkit::new(FakeBehaviour::default());
    let second = FakeToolkit::new(FakeBehaviour::default());
    let patcher_a = env.patcher(&first, &log);
    let patcher_b = env.patcher(&second, &log);

    patcher_a
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();
    patcher_b
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    let dir_a = first.recorded().dirs.into_iter().next().unwrap();
    let dir_b = second.recorded().dirs.into_iter().next().unwrap();
    assert_ne!(dir_a, dir_b);
    assert!(env.leftover_run_dirs().is_empty());
}

#[test]
fn test_concurrent_run_rejected() {
    let env = TestEnv::new();
    let package = modern_package(&env);
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());
    let patcher = env.patcher(&toolkit, &log);

    let held = RunContext::begin(patcher.gate(), &env.run_root, PatchOptions::default()).unwrap();
    let err = patcher
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap_err();
    assert!(err.to_string().contains("already in progress"));
    assert!(log.contains(Level::Error, "already in progress"));
    assert!(toolkit.calls().is_empty());

    held.finish().unwrap();
    patcher
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();
}

// =============================================================================
// Payload selection through a run
// =============================================================================

#[test]
fn test_old_package_pulls_32bit_compat_binary() {
    let env = TestEnv::new();
    let package = env.package(
        "Magisk-v27.0.apk",
        PackageBuilder::magisk(27000, &["arm64-v8a"])
            .file("lib/armeabi-v7a/libmagisk32.so", b"magisk32"),
    );
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert!(toolkit
        .calls()
        .contains(&"compress magisk32 magisk32.xz".to_string()));
    let ops = &toolkit.recorded().cpio_ops[0];
    assert!(ops.contains(&"add 0644 overlay.d/sbin/magisk32.xz magisk32.xz".to_string()));
    assert!(log.contains(Level::Success, "Extracted: magisk32 (32-bit compat)"));
}

#[test]
fn test_new_package_ignores_32bit_compat_binary() {
    let env = TestEnv::new();
    let package = env.package(
        "Magisk-v28.0.apk",
        PackageBuilder::magisk(28000, &["arm64-v8a"])
            .file("lib/armeabi-v7a/libmagisk32.so", b"magisk32"),
    );
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    env.patcher(&toolkit, &log)
        .run(&env.request(&package, PatchOptions::default()))
        .unwrap();

    assert!(toolkit.calls_starting("compress magisk32").is_empty());
}

#[test]
fn test_missing_architecture_aborts_before_toolkit() {
    let env = TestEnv::new();
    let package = env.package("Magisk-x86.apk", PackageBuilder::magisk(28000, &["x86", "x86_64"]));
    let toolkit = FakeToolkit::new(FakeBehaviour::default());
    let log = Arc::new(MemoryLog::new());

    let mut request = env.request(&package, PatchOptions::default());
    request.arch = Arch::ArmeabiV7a;
    let err = env.patcher(&toolkit, &log).run(&request).unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("Failed to extract necessary files from APK"));
    assert!(message.contains("magiskinit"));
    assert!(message.contains("x86, x86_64"));
    assert!(toolkit.calls().is_empty());
    assert!(env.leftover_run_dirs().is_empty());
}
