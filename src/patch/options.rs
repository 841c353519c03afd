//! Patch flags and the `config` file embedded in the patched ramdisk.

/// Boolean options chosen before a run. Never changed while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Keep AVB 2.0 / dm-verity.
    pub keep_verity: bool,
    pub keep_force_encrypt: bool,
    /// Target is the recovery partition.
    pub recovery_mode: bool,
    pub patch_vbmeta_flag: bool,
    /// Old System-as-Root devices need an extra kernel patch.
    pub legacy_sar: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            keep_verity: true,
            keep_force_encrypt: true,
            recovery_mode: false,
            patch_vbmeta_flag: false,
            legacy_sar: false,
        }
    }
}

impl PatchOptions {
    /// Flags as `(KEY, "true"|"false")`, in config-file order.
    pub fn pairs(&self) -> [(&'static str, &'static str); 5] {
        let b = |v: bool| if v { "true" } else { "false" };
        [
            ("KEEPVERITY", b(self.keep_verity)),
            ("KEEPFORCEENCRYPT", b(self.keep_force_encrypt)),
            ("RECOVERYMODE", b(self.recovery_mode)),
            ("PATCHVBMETAFLAG", b(self.patch_vbmeta_flag)),
            ("LEGACYSAR", b(self.legacy_sar)),
        ]
    }

    /// Environment handed to every toolkit call of a run.
    pub fn env(&self) -> Vec<(String, String)> {
        self.pairs()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Contents of the `config` file: one `KEY=value` per line, with the
    /// original image's SHA-1 last when known.
    pub fn render_config(&self, sha1: Option<&str>) -> String {
        let mut out = String::new();
        for (key, value) in self.pairs() {
            out.push_str(&format!("{}={}\n", key, value));
        }
        if let Some(sha1) = sha1 {
            out.push_str(&format!("SHA1={}\n", sha1));
        }
        out
    }
}
