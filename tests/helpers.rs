//! Shared test utilities for bootpatch tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use bootpatch::log::MemoryLog;
use bootpatch::patch::{PatchOptions, PatchRequest, Patcher, RunGate};
use bootpatch::toolkit::{BootImageToolkit, CpioOp, Invocation};

/// Test environment with a scratch tree for inputs, outputs and run directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Where run working directories are created
    pub run_root: PathBuf,
    pub boot_image: PathBuf,
    pub output: PathBuf,
    pub base_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();

        let run_root = base.join("runs");
        fs::create_dir_all(&run_root).expect("Failed to create run root");

        let boot_image = base.join("boot.img");
        fs::write(&boot_image, b"ANDROID!fake-boot-image").expect("Failed to write boot image");

        Self {
            _temp_dir: temp_dir,
            run_root,
            boot_image,
            output: base.join("out/magisk_patched.img"),
            base_dir: base,
        }
    }

    /// Write a package into the environment and return its path.
    pub fn package(&self, name: &str, builder: PackageBuilder) -> PathBuf {
        let path = self.base_dir.join(name);
        builder.write(&path);
        path
    }

    pub fn request(&self, package: &Path, options: PatchOptions) -> PatchRequest {
        PatchRequest {
            boot_image: self.boot_image.clone(),
            package: package.to_path_buf(),
            arch: bootpatch::arch::Arch::Arm64V8a,
            options,
            output: self.output.clone(),
        }
    }

    pub fn patcher(&self, toolkit: &Arc<FakeToolkit>, log: &Arc<MemoryLog>) -> Patcher {
        Patcher::new(toolkit.clone(), log.clone(), RunGate::new()).with_temp_root(&self.run_root)
    }

    /// Entries left in the run root.
    pub fn leftover_run_dirs(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.run_root)
            .expect("Failed to read run root")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect()
    }
}

/// Builds a Magisk-style APK (zip) in memory.
pub struct PackageBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A package declaring `code` that carries the given ABIs, each with
    /// the usual native libraries.
    pub fn magisk(code: u32, abis: &[&str]) -> Self {
        let mut builder = Self::empty().version(code);
        for abi in abis {
            for lib in [
                "libmagisk.so",
                "libmagiskinit.so",
                "libinit-ld.so",
                "libmagiskboot.so",
                "libbusybox.so",
                "libmagiskpolicy.so",
            ] {
                builder = builder.file(&format!("lib/{}/{}", abi, lib), lib.as_bytes());
            }
        }
        builder.file("assets/stub.apk", b"stub")
    }

    pub fn version(self, code: u32) -> Self {
        let script = format!(
            "#!/system/bin/sh\nMAGISK_VER=\"{}.{}\"\nMAGISK_VER_CODE={}\n",
            code / 1000,
            code % 1000 / 100,
            code
        );
        self.file("assets/util_functions.sh", script.as_bytes())
    }

    pub fn file(mut self, name: &str, content: &[u8]) -> Self {
        self.entries.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn write(&self, path: &Path) {
        let file = fs::File::create(path).expect("Failed to create package");
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default();
        for (name, content) in &self.entries {
            zip.start_file(name.as_str(), options)
                .expect("Failed to start zip entry");
            zip.write_all(content).expect("Failed to write zip entry");
        }
        zip.finish().expect("Failed to finish package");
    }
}

/// Behaviour knobs for [`FakeToolkit`].
#[derive(Debug, Clone)]
pub struct FakeBehaviour {
    /// Files `unpack` creates in the working directory.
    pub unpacked: Vec<&'static str>,
    pub unpack_code: i32,
    pub ramdisk_test_code: i32,
    /// Exit code of the restore command list.
    pub restore_code: i32,
    pub patch_ramdisk_code: i32,
    /// `from` patterns that are found in the kernel.
    pub kernel_matches: BTreeSet<&'static str>,
    pub device_tree_test_code: i32,
    pub device_tree_patch_code: i32,
    pub repack_code: i32,
    /// Whether repack actually writes `new-boot.img`.
    pub repack_writes_output: bool,
    pub digest: Option<String>,
    /// Logical sources whose compression fails.
    pub failing_compress: BTreeSet<&'static str>,
}

impl Default for FakeBehaviour {
    fn default() -> Self {
        Self {
            unpacked: vec!["ramdisk.cpio", "kernel", "dtb"],
            unpack_code: 0,
            ramdisk_test_code: 0,
            restore_code: 0,
            patch_ramdisk_code: 0,
            kernel_matches: ["821B8012"].into_iter().collect(),
            device_tree_test_code: 0,
            device_tree_patch_code: 0,
            repack_code: 0,
            repack_writes_output: true,
            digest: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
            failing_compress: BTreeSet::new(),
        }
    }
}

/// What the fake saw during a run.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    /// One line per toolkit call, e.g. `hexpatch kernel 821B8012 E2FF8F12`.
    pub calls: Vec<String>,
    /// Working directory of every call.
    pub dirs: BTreeSet<PathBuf>,
    /// Environment of the first call.
    pub env: Vec<(String, String)>,
    /// Each cpio command list, rendered.
    pub cpio_ops: Vec<Vec<String>>,
    /// `config` as it was when the ramdisk was patched.
    pub config_at_patch: Option<String>,
    /// `ramdisk.cpio.orig` as it was when the ramdisk was patched.
    pub orig_at_patch: Option<String>,
    /// Whether `kernel` existed when repack ran.
    pub kernel_at_repack: Option<bool>,
}

/// Content a successful restore leaves in the ramdisk.
pub const RESTORED_RAMDISK: &str = "restored-ramdisk";

/// In-process toolkit that simulates artifacts in the working directory.
pub struct FakeToolkit {
    pub behaviour: FakeBehaviour,
    recorded: Mutex<Recorded>,
}

impl FakeToolkit {
    pub fn new(behaviour: FakeBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    pub fn recorded(&self) -> Recorded {
        self.recorded.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded().calls
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, at: &Invocation<'_>, call: String) {
        let mut rec = self.recorded.lock().unwrap();
        if rec.calls.is_empty() {
            rec.env = at.env.to_vec();
        }
        rec.calls.push(call);
        rec.dirs.insert(at.dir.to_path_buf());
    }
}

impl BootImageToolkit for FakeToolkit {
    fn unpack(&self, at: &Invocation<'_>, image: &str) -> i32 {
        self.record(at, format!("unpack {}", image));
        if self.behaviour.unpack_code != 0 {
            return self.behaviour.unpack_code;
        }
        for name in &self.behaviour.unpacked {
            fs::write(at.dir.join(name), name.as_bytes()).unwrap();
        }
        0
    }

    fn test_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str) -> i32 {
        self.record(at, format!("cpio {} test", ramdisk));
        self.behaviour.ramdisk_test_code
    }

    fn patch_ramdisk(&self, at: &Invocation<'_>, ramdisk: &str, ops: &[CpioOp]) -> i32 {
        let rendered: Vec<String> = ops.iter().map(ToString::to_string).collect();
        self.record(at, format!("cpio {} {}", ramdisk, rendered.join(" | ")));
        let restoring = ops.contains(&CpioOp::Restore);
        {
            let mut rec = self.recorded.lock().unwrap();
            rec.cpio_ops.push(rendered);
            if !restoring {
                rec.config_at_patch = fs::read_to_string(at.dir.join("config")).ok();
                rec.orig_at_patch = fs::read_to_string(at.dir.join("ramdisk.cpio.orig")).ok();
            }
        }
        if restoring {
            if self.behaviour.restore_code == 0 {
                fs::write(at.dir.join(ramdisk), RESTORED_RAMDISK).unwrap();
            }
            self.behaviour.restore_code
        } else {
            self.behaviour.patch_ramdisk_code
        }
    }

    fn compress(&self, at: &Invocation<'_>, src: &Path, dst: &Path) -> i32 {
        let src_name = src.file_name().unwrap().to_string_lossy().to_string();
        let dst_name = dst.file_name().unwrap().to_string_lossy().to_string();
        self.record(at, format!("compress {} {}", src_name, dst_name));
        if self.behaviour.failing_compress.contains(src_name.as_str()) {
            return 1;
        }
        fs::copy(src, dst).map(|_| 0).unwrap_or(1)
    }

    fn hex_patch(&self, at: &Invocation<'_>, file: &str, from: &str, to: &str) -> i32 {
        self.record(at, format!("hexpatch {} {} {}", file, from, to));
        if self.behaviour.kernel_matches.contains(from) {
            0
        } else {
            1
        }
    }

    fn test_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32 {
        self.record(at, format!("dtb {} test", file));
        self.behaviour.device_tree_test_code
    }

    fn patch_device_tree(&self, at: &Invocation<'_>, file: &str) -> i32 {
        self.record(at, format!("dtb {} patch", file));
        self.behaviour.device_tree_patch_code
    }

    fn repack(&self, at: &Invocation<'_>, image: &str) -> i32 {
        self.record(at, format!("repack {}", image));
        self.recorded.lock().unwrap().kernel_at_repack = Some(at.dir.join("kernel").exists());
        if self.behaviour.repack_code != 0 {
            return self.behaviour.repack_code;
        }
        if self.behaviour.repack_writes_output {
            let mut content = fs::read(at.dir.join(image)).unwrap();
            content.extend_from_slice(b"+magisk");
            fs::write(at.dir.join("new-boot.img"), content).unwrap();
        }
        0
    }

    fn digest(&self, at: &Invocation<'_>, file: &str) -> Option<String> {
        self.record(at, format!("sha1 {}", file));
        self.behaviour.digest.clone()
    }
}
