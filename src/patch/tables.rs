//! Fixed data driving the patch sequence.

/// File names the toolkit reads and writes inside the working directory.
pub const BOOT_IMAGE: &str = "boot.img";
pub const RAMDISK: &str = "ramdisk.cpio";
pub const RAMDISK_ORIG: &str = "ramdisk.cpio.orig";
pub const KERNEL: &str = "kernel";
pub const CONFIG: &str = "config";
pub const NEW_BOOT_IMAGE: &str = "new-boot.img";

/// Where the ramdisk keeps its backup of the patch configuration.
pub const BACKUP_DIR: &str = ".backup";
pub const BACKUP_CONFIG: &str = ".backup/.magisk";
pub const RESTORED_CONFIG: &str = "config.orig";

/// Ramdisk overlay directory payloads are placed in.
pub const OVERLAY_DIR: &str = "overlay.d";
pub const OVERLAY_SBIN: &str = "overlay.d/sbin";

/// Init binary inserted as the ramdisk's `/init`.
pub const INIT_BINARY: &str = "magiskinit";

/// A literal find/replace pair, both hex encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexPatch {
    pub name: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

/// Kernel patches applied to every image, in order.
pub const KERNEL_PATCHES: &[HexPatch] = &[
    HexPatch {
        name: "Samsung RKP",
        from: "49010054011440B93FA00F71E9000054010840B93FA00F7189000054001840B91FA00F7188010054",
        to: "A1020054011440B93FA00F7140020054010840B93FA00F71E0010054001840B91FA00F7181010054",
    },
    HexPatch {
        name: "Samsung defex",
        from: "821B8012",
        to: "E2FF8F12",
    },
    HexPatch {
        name: "/proc/config.gz rename",
        from: "70726F63615F636F6E66696700",
        to: "70726F63615F6D616769736B00",
    },
];

/// Extra kernel patch for legacy System-as-Root: `skip_initramfs` → `want_initramfs`.
pub const LEGACY_SAR_PATCH: HexPatch = HexPatch {
    name: "legacy SAR",
    from: "736B69705F696E697472616D667300",
    to: "77616E745F696E697472616D667300",
};

/// Kernel patches for a run, legacy SAR last when enabled.
pub fn kernel_patches(legacy_sar: bool) -> Vec<HexPatch> {
    let mut patches = KERNEL_PATCHES.to_vec();
    if legacy_sar {
        patches.push(LEGACY_SAR_PATCH);
    }
    patches
}

/// Device-tree artifacts `unpack` may produce.
pub const DEVICE_TREE_CANDIDATES: &[&str] = &["dtb", "kernel_dtb", "extra"];

/// A payload compressed before it goes into the ramdisk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedPayload {
    /// Logical name in the payload set.
    pub logical: &'static str,
    /// Compressed file in the working directory, also its name under `overlay.d/sbin`.
    pub compressed: &'static str,
}

pub const COMPRESSED_PAYLOADS: &[CompressedPayload] = &[
    CompressedPayload {
        logical: "magisk",
        compressed: "magisk.xz",
    },
    CompressedPayload {
        logical: "magisk32",
        compressed: "magisk32.xz",
    },
    CompressedPayload {
        logical: "magisk64",
        compressed: "magisk64.xz",
    },
    CompressedPayload {
        logical: "init-ld",
        compressed: "init-ld.xz",
    },
    CompressedPayload {
        logical: "stub.apk",
        compressed: "stub.xz",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_sar_adds_exactly_one() {
        let base = kernel_patches(false);
        let sar = kernel_patches(true);
        assert_eq!(base.len(), KERNEL_PATCHES.len());
        assert_eq!(sar.len(), base.len() + 1);
        assert_eq!(sar.last(), Some(&LEGACY_SAR_PATCH));
        assert_eq!(&sar[..base.len()], base.as_slice());
    }

    #[test]
    fn test_hex_patches_are_even_length_hex() {
        for patch in kernel_patches(true) {
            for s in [patch.from, patch.to] {
                assert_eq!(s.len() % 2, 0, "{}", patch.name);
                assert!(s.chars().all(|c| c.is_ascii_hexdigit()), "{}", patch.name);
            }
            assert_eq!(patch.from.len(), patch.to.len(), "{}", patch.name);
        }
    }
}
