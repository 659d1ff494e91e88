use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache directory.
pub const CACHE_DIR_ENV: &str = "METRICORE_CACHE_DIR";

const APP_DIR: &str = "metricore";

/// Where the cache directory came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Path given explicitly by configuration or the command line
    Custom(PathBuf),
    /// Path taken from `METRICORE_CACHE_DIR`
    Environment(PathBuf),
    /// XDG-compliant shared cache directory (default)
    Shared,
    /// No user cache directory could be determined
    Temporary,
}

/// Resolved cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub strategy: CacheStrategy,
    pub base_path: PathBuf,
}

impl CacheLocation {
    /// Resolve the cache location from an explicit path and the environment.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        Self::resolve_from(
            explicit,
            std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from),
            std::env::var_os("XDG_CACHE_HOME").map(PathBuf::from),
            dirs::cache_dir(),
        )
    }

    /// Pure resolution: explicit path, then env override, then XDG, then
    /// the platform cache dir, then the temp dir.
    pub fn resolve_from(
        explicit: Option<&Path>,
        env_dir: Option<PathBuf>,
        xdg_cache_home: Option<PathBuf>,
        platform_cache_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(path) = explicit {
            return Self {
                strategy: CacheStrategy::Custom(path.to_path_buf()),
                base_path: path.to_path_buf(),
            };
        }

        if let Some(path) = env_dir.filter(|p| !p.as_os_str().is_empty()) {
            return Self {
                strategy: CacheStrategy::Environment(path.clone()),
                base_path: path,
            };
        }

        let shared = xdg_cache_home
            .filter(|p| p.is_absolute())
            .or(platform_cache_dir);
        match shared {
            Some(dir) => Self {
                strategy: CacheStrategy::Shared,
                base_path: dir.join(APP_DIR),
            },
            None => Self {
                strategy: CacheStrategy::Temporary,
                base_path: std::env::temp_dir().join(format!("{}_cache", APP_DIR)),
            },
        }
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Create the cache directory if needed.
    pub fn ensure_directory(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_path)
    }

    /// Check if we can write to the cache location
    pub fn can_write(&self) -> bool {
        if self.ensure_directory().is_err() {
            return false;
        }
        let marker = self.base_path.join(".metricore_write_test");
        let writable = std::fs::write(&marker, b"test").is_ok();
        let _ = std::fs::remove_file(marker);
        writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_wins() {
        let location = CacheLocation::resolve_from(
            Some(Path::new("/explicit")),
            Some(PathBuf::from("/from-env")),
            Some(PathBuf::from("/xdg")),
            None,
        );
        assert_eq!(location.strategy, CacheStrategy::Custom(PathBuf::from("/explicit")));
        assert_eq!(location.path(), Path::new("/explicit"));
    }

    #[test]
    fn test_env_override_before_shared() {
        let location = CacheLocation::resolve_from(
            None,
            Some(PathBuf::from("/from-env")),
            Some(PathBuf::from("/xdg")),
            None,
        );
        assert!(matches!(location.strategy, CacheStrategy::Environment(_)));
        assert_eq!(location.path(), Path::new("/from-env"));
    }

    #[test]
    fn test_xdg_cache_home() {
        let location =
            CacheLocation::resolve_from(None, None, Some(PathBuf::from("/xdg")), None);
        assert_eq!(location.strategy, CacheStrategy::Shared);
        assert_eq!(location.path(), Path::new("/xdg/metricore"));
    }

    #[test]
    fn test_relative_xdg_is_ignored() {
        let location = CacheLocation::resolve_from(
            None,
            None,
            Some(PathBuf::from("relative")),
            Some(PathBuf::from("/platform")),
        );
        assert_eq!(location.path(), Path::new("/platform/metricore"));
    }

    #[test]
    fn test_temp_fallback() {
        let location = CacheLocation::resolve_from(None, Some(PathBuf::new()), None, None);
        assert_eq!(location.strategy, CacheStrategy::Temporary);
        assert!(location.path().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_can_write_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let location = CacheLocation::resolve_from(Some(&nested), None, None, None);
        assert!(location.can_write());
        assert!(nested.exists());
    }
}
