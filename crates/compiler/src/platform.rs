use std::fmt;
use std::str::FromStr;

/// A target automation platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Browser automation (chained/indexable locator APIs available).
    Web,
    /// Mobile-style automation. No raw-mode expression dialect: the
    /// block processor always downgrades this platform to structured
    /// emission.
    Mobile,
}

impl Platform {
    /// Lowercase key used in config maps, unit `platforms` lists, and
    /// the discovery index.
    pub fn key(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Mobile => "mobile",
        }
    }

    /// Capitalized suffix used in generated file names.
    pub fn suffix(&self) -> &'static str {
        match self {
            Platform::Web => "Web",
            Platform::Mobile => "Mobile",
        }
    }

    pub fn is_browser(&self) -> bool {
        matches!(self, Platform::Web)
    }

    /// Whether a platforms list (empty = all) includes this platform.
    pub fn matches(&self, platforms: &[String]) -> bool {
        platforms.is_empty() || platforms.iter().any(|p| p == self.key())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Ok(Platform::Web),
            "mobile" => Ok(Platform::Mobile),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}
