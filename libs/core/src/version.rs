use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Kubernetes version line the translation layer mimics. Advertised on
/// `/version` and in the OpenAPI document so clients negotiate the matching
/// feature set.
pub const KUBERNETES_VERSION: &str = "1.27.0";

/// Version document served on `/version`, shaped like the one returned by a
/// real API server so `kubectl version` renders it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub git_commit: String,
    pub git_tree_state: String,
    pub build_date: String,
    pub go_version: String,
    pub compiler: String,
    pub platform: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        let mut parts = KUBERNETES_VERSION.split('.');
        let major = parts.next().unwrap_or("1").to_string();
        let minor = parts.next().unwrap_or("27").to_string();
        VersionInfo {
            major,
            minor,
            git_version: format!("v{KUBERNETES_VERSION}+k2d-{VERSION}"),
            git_commit: String::new(),
            git_tree_state: "clean".to_string(),
            build_date: String::new(),
            go_version: String::new(),
            compiler: "rustc".to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = VersionInfo::current();
        assert_eq!(info.major, "1");
        assert_eq!(info.minor, "27");
        assert!(info.git_version.starts_with("v1.27.0+k2d-"));
    }
}
