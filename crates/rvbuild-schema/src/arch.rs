/// Android ABI selector.
///
/// Mirrors publish one package per ABI (or a single universal package).
/// The selector decides which variant page is requested and, downstream,
/// which native-library directories survive in the final APK.
///
/// # Example
///
/// ```
/// use rvbuild_schema::Arch;
///
/// let arch: Arch = "aarch64".parse().unwrap();
/// assert_eq!(arch, Arch::Arm64V8a);
/// assert_eq!(Arch::parse_or_universal("mips"), Arch::Universal);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
pub enum Arch {
    /// All ABIs in one package.
    #[default]
    #[serde(rename = "universal")]
    Universal,
    /// 64-bit ARM.
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    /// 32-bit ARM.
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
    /// 32-bit Intel.
    #[serde(rename = "x86")]
    X86,
    /// 64-bit Intel.
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    /// Every selector, universal first.
    pub const ALL: [Arch; 5] = [
        Self::Universal,
        Self::Arm64V8a,
        Self::ArmeabiV7a,
        Self::X86,
        Self::X86_64,
    ];

    /// Canonical ABI name, as used by the mirrors and in output filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Universal => "universal",
            Self::Arm64V8a => "arm64-v8a",
            Self::ArmeabiV7a => "armeabi-v7a",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
        }
    }

    /// Parse a selector, mapping anything outside the closed set to
    /// [`Arch::Universal`].
    pub fn parse_or_universal(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Strings that name this architecture in visible page text.
    pub fn page_aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Universal => &["universal", "noarch"],
            Self::Arm64V8a => &["arm64-v8a", "arm64"],
            Self::ArmeabiV7a => &["armeabi-v7a", "armeabi"],
            Self::X86 => &["x86"],
            Self::X86_64 => &["x86_64", "x86-64"],
        }
    }

    /// Best-effort variant-page suffix on sites that number their
    /// per-ABI uploads.
    ///
    /// The numbering follows upload order on the site and is not stable;
    /// callers use it only when scanning the release page for an
    /// architecture-named link found nothing.
    pub fn suffix_hint(&self) -> Option<u8> {
        match self {
            Self::Universal => None,
            Self::Arm64V8a => Some(3),
            Self::ArmeabiV7a => Some(4),
            Self::X86 => Some(5),
            Self::X86_64 => Some(6),
        }
    }

    /// True when `text` names this architecture.
    ///
    /// `x86` does not match inside `x86_64`.
    pub fn named_in(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.page_aliases().iter().any(|alias| {
            lower.match_indices(alias).any(|(at, _)| {
                let rest = &lower[at + alias.len()..];
                !(matches!(self, Self::X86) && (rest.starts_with("_64") || rest.starts_with("-64")))
            })
        })
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "universal" | "noarch" | "all" => Ok(Self::Universal),
            "arm64-v8a" | "arm64" | "aarch64" => Ok(Self::Arm64V8a),
            "armeabi-v7a" | "armv7" | "arm" => Ok(Self::ArmeabiV7a),
            "x86" | "i686" => Ok(Self::X86),
            "x86_64" | "x86-64" | "amd64" | "x64" => Ok(Self::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
