//! Android ABI identifiers.

use std::fmt;
use std::str::FromStr;

/// Target ABI, named the way packages lay out `lib/<abi>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arch {
    #[default]
    Arm64V8a,
    ArmeabiV7a,
    X86_64,
    X86,
}

impl Arch {
    pub const ALL: [Arch; 4] = [Arch::Arm64V8a, Arch::ArmeabiV7a, Arch::X86_64, Arch::X86];

    /// Folder name under `lib/`.
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Arm64V8a => "arm64-v8a",
            Arch::ArmeabiV7a => "armeabi-v7a",
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Arch::Arm64V8a => "64-bit ARM",
            Arch::ArmeabiV7a => "32-bit ARM",
            Arch::X86_64 => "64-bit Intel",
            Arch::X86 => "32-bit Intel",
        }
    }

    /// The 32-bit ABI older packages ship `magisk32` under for this ABI.
    ///
    /// Only the two 64-bit ABIs have one.
    pub fn compat_32bit(self) -> Option<Arch> {
        match self {
            Arch::Arm64V8a => Some(Arch::ArmeabiV7a),
            Arch::X86_64 => Some(Arch::X86),
            Arch::ArmeabiV7a | Arch::X86 => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Arch::ALL.iter().map(|a| a.as_str()).collect();
                format!("unknown architecture '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}
