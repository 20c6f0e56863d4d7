//! Module specifier resolution
//!
//! Maps whatever a guest wrote after `from` to a URL the fetcher can retrieve.
//! Both engines go through [`SpecifierResolver::resolve`]; keeping a single
//! implementation is what keeps their import behavior identical.

use jsbox_core::{ModuleSettings, DEFAULT_CDN_ROOT};
use url::Url;

/// Resolves specifiers against a CDN root such as `https://esm.sh`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierResolver {
    root: String,
}

impl SpecifierResolver {
    pub fn new(cdn_root: impl Into<String>) -> Self {
        let root = cdn_root.into().trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn from_settings(settings: &ModuleSettings) -> Self {
        Self::new(settings.cdn_root.as_str())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Rewrite a specifier to a retrievable URL.
    ///
    /// - `https://x/y.js` → unchanged
    /// - `/react@18/index.js`, `/@scope/pkg` → `<root>` + path
    /// - `react`, `react@18/jsx-runtime`, anything else → `<root>/<specifier>`
    /// - `""` → `<root>/`
    pub fn resolve(&self, specifier: &str) -> String {
        if is_absolute_url(specifier) {
            return specifier.to_string();
        }
        if is_root_package_path(specifier) {
            return format!("{}{}", self.root, specifier);
        }
        format!("{}/{}", self.root, specifier)
    }

    /// Resolve `specifier` as written inside the module at `base`.
    ///
    /// Relative specifiers are joined onto an absolute base URL; everything
    /// else goes through [`resolve`](Self::resolve).
    pub fn resolve_from(&self, base: &str, specifier: &str) -> String {
        if is_relative(specifier) && is_absolute_url(base) {
            if let Some(joined) = join(base, specifier) {
                return joined;
            }
        }
        self.resolve(specifier)
    }
}

impl Default for SpecifierResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CDN_ROOT)
    }
}

/// Resolve against the default CDN root.
pub fn resolve(specifier: &str) -> String {
    SpecifierResolver::default().resolve(specifier)
}

pub fn is_absolute_url(specifier: &str) -> bool {
    specifier.starts_with("https://") || specifier.starts_with("http://")
}

/// `./x`, `../x` and `/x`
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// A package specifier: neither relative nor an absolute URL.
pub fn is_bare(specifier: &str) -> bool {
    !specifier.is_empty() && !is_relative(specifier) && !is_absolute_url(specifier)
}

/// Package part of a bare specifier, version included.
///
/// `lodash/fp` → `lodash`, `@scope/pkg@2/sub` → `@scope/pkg@2`.
pub fn package_base(specifier: &str) -> Option<&str> {
    if !is_bare(specifier) {
        return None;
    }
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let end = specifier
        .match_indices('/')
        .nth(segments - 1)
        .map(|(index, _)| index)
        .unwrap_or(specifier.len());
    let base = &specifier[..end];
    if segments == 2 && !base.contains('/') {
        return None;
    }
    if base.ends_with('/') || base.is_empty() {
        return None;
    }
    Some(base)
}

/// Join a relative specifier onto an absolute base URL.
pub fn join(base: &str, specifier: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(specifier).ok().map(String::from)
}

/// `/name...` or `/@scope/name...`
fn is_root_package_path(specifier: &str) -> bool {
    let Some(path) = specifier.strip_prefix('/') else {
        return false;
    };
    match path.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, name)) => !scope.is_empty() && !name.is_empty() && !name.starts_with('/'),
            None => false,
        },
        None => path.chars().next().is_some_and(|c| c != '/'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "https://esm.sh";

    #[test]
    fn bare_names_go_under_the_root() {
        assert_eq!(resolve("react"), format!("{ROOT}/react"));
        assert_eq!(resolve("react@18"), format!("{ROOT}/react@18"));
        assert_eq!(resolve("react@18.2.0"), format!("{ROOT}/react@18.2.0"));
        assert_eq!(resolve("react-dom/client"), format!("{ROOT}/react-dom/client"));
        assert_eq!(resolve("lodash@4/fp/map"), format!("{ROOT}/lodash@4/fp/map"));
        assert_eq!(resolve("lodash.debounce"), format!("{ROOT}/lodash.debounce"));
    }

    #[test]
    fn scoped_names_go_under_the_root() {
        assert_eq!(resolve("@scope/pkg"), format!("{ROOT}/@scope/pkg"));
        assert_eq!(resolve("@scope/pkg@1.2.3"), format!("{ROOT}/@scope/pkg@1.2.3"));
        assert_eq!(resolve("@scope/pkg/sub/path.js"), format!("{ROOT}/@scope/pkg/sub/path.js"));
    }

    #[test]
    fn root_paths_keep_their_path() {
        assert_eq!(resolve("/@scope/pkg"), format!("{ROOT}/@scope/pkg"));
        assert_eq!(resolve("/react"), format!("{ROOT}/react"));
        assert_eq!(
            resolve("/react@18.2.0/es2022/react.mjs"),
            format!("{ROOT}/react@18.2.0/es2022/react.mjs")
        );
        assert_eq!(resolve("/@scope/pkg@1/x.mjs"), format!("{ROOT}/@scope/pkg@1/x.mjs"));
    }

    #[test]
    fn slash_paths_without_a_package_fall_through() {
        assert_eq!(resolve("/"), format!("{ROOT}//"));
        assert_eq!(resolve("//cdn"), format!("{ROOT}///cdn"));
        assert_eq!(resolve("/@scope"), format!("{ROOT}//@scope"));
    }

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(resolve("https://x/y.js"), "https://x/y.js");
        assert_eq!(resolve("http://localhost:8080/m.js"), "http://localhost:8080/m.js");
        assert_eq!(
            resolve("https://esm.sh/react?bundle"),
            "https://esm.sh/react?bundle"
        );
    }

    #[test]
    fn empty_specifier_is_the_root() {
        assert_eq!(resolve(""), format!("{ROOT}/"));
    }

    #[test]
    fn relative_specifiers_are_not_special_without_a_base() {
        assert_eq!(resolve("./util.js"), format!("{ROOT}/./util.js"));
        assert_eq!(resolve("../util.js"), format!("{ROOT}/../util.js"));
    }

    #[test]
    fn custom_root_is_trimmed() {
        let resolver = SpecifierResolver::new("https://cdn.example/");
        assert_eq!(resolver.root(), "https://cdn.example");
        assert_eq!(resolver.resolve("react"), "https://cdn.example/react");
        assert_eq!(resolver.resolve("/react"), "https://cdn.example/react");
        assert_eq!(resolver.resolve(""), "https://cdn.example/");
    }

    #[test]
    fn settings_root_is_used() {
        let settings = ModuleSettings {
            cdn_root: "https://mirror.test".into(),
            ..ModuleSettings::default()
        };
        let resolver = SpecifierResolver::from_settings(&settings);
        assert_eq!(resolver.resolve("preact"), "https://mirror.test/preact");
    }

    #[test]
    fn resolve_from_joins_relative_paths() {
        let resolver = SpecifierResolver::default();
        let base = "https://esm.sh/react@18/es2022/react.mjs";
        assert_eq!(
            resolver.resolve_from(base, "./jsx.mjs"),
            "https://esm.sh/react@18/es2022/jsx.mjs"
        );
        assert_eq!(
            resolver.resolve_from(base, "../index.mjs"),
            "https://esm.sh/react@18/index.mjs"
        );
        assert_eq!(
            resolver.resolve_from(base, "/v135/scheduler.mjs"),
            "https://esm.sh/v135/scheduler.mjs"
        );
        assert_eq!(resolver.resolve_from(base, "preact"), "https://esm.sh/preact");
        assert_eq!(resolver.resolve_from("main", "./x.js"), "https://esm.sh/./x.js");
    }

    #[test]
    fn classifies_specifiers() {
        assert!(is_bare("react"));
        assert!(is_bare("@scope/pkg"));
        assert!(!is_bare(""));
        assert!(!is_bare("./a"));
        assert!(!is_bare("../a"));
        assert!(!is_bare("/a"));
        assert!(!is_bare("https://x/a.js"));
        assert!(is_absolute_url("http://x"));
        assert!(!is_absolute_url("ftp://x"));
        assert!(is_relative("."));
    }

    #[test]
    fn extracts_package_base() {
        assert_eq!(package_base("react"), Some("react"));
        assert_eq!(package_base("react@18/jsx-runtime"), Some("react@18"));
        assert_eq!(package_base("lodash/fp/map"), Some("lodash"));
        assert_eq!(package_base("@scope/pkg"), Some("@scope/pkg"));
        assert_eq!(package_base("@scope/pkg@2/sub"), Some("@scope/pkg@2"));
        assert_eq!(package_base("@scope"), None);
        assert_eq!(package_base("@scope/"), None);
        assert_eq!(package_base("./local"), None);
        assert_eq!(package_base("https://x/y.js"), None);
    }
}
