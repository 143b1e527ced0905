//! Packaged form registry.
//!
//! Forms shipped with the application are catalogued as
//! `registry[package][namespace][version] -> schema JSON`. This module looks forms up in that
//! catalogue, picks a version, and inlines sub-forms that point at other registry entries.
//!
//! ## Version selection
//!
//! - Each stored version key is *coerced* to a semantic version (`"1.1"` -> `1.1.0`,
//!   `"2.0-rc"` -> `2.0.0-rc`); keys that contain no number have no semantic version and can
//!   never be selected by range.
//! - A requested version is a semver range. A bare partial version (`"1"`, `"1.0"`) means "that
//!   release line" (`~1`, `~1.0`), a bare full version means exactly that version.
//! - Without a match, strict lookups fail; non-strict lookups fall back to the latest version.
//!
//! ## On-disk layout
//!
//! [`FormRegistry::load_dir`] reads `<root>/<package>/<namespace>/<version>.json`.

use crate::constants::FORM_FILE_EXTENSION;
use crate::{FormError, FormResult};
use openmrs::FormSchema;
use semver::{Prerelease, Version, VersionReq};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

/// One stored version of a form.
#[derive(Clone, Debug, PartialEq)]
pub struct FormJsonFile {
    pub version: String,
    pub semantic_version: Option<Version>,
    pub json: Value,
}

/// Version-keyed catalogue of packaged forms.
#[derive(Clone, Debug, Default)]
pub struct FormRegistry {
    packages: BTreeMap<String, Namespaces>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one version of a form.
    pub fn insert(
        &mut self,
        package: impl Into<String>,
        namespace: impl Into<String>,
        version: impl Into<String>,
        json: Value,
    ) {
        self.packages
            .entry(package.into())
            .or_default()
            .entry(namespace.into())
            .or_default()
            .insert(version.into(), json);
    }

    /// Build a registry from a nested `{package: {namespace: {version: json}}}` value.
    pub fn from_value(value: Value) -> FormResult<Self> {
        let Value::Object(packages) = value else {
            return Err(FormError::InvalidInput(
                "form registry must be a JSON object".into(),
            ));
        };

        let mut registry = Self::new();
        for (package, namespaces) in packages {
            let Value::Object(namespaces) = namespaces else {
                return Err(FormError::InvalidInput(format!(
                    "package '{package}' must map namespaces to versions"
                )));
            };
            for (namespace, versions) in namespaces {
                let Value::Object(versions) = versions else {
                    return Err(FormError::InvalidInput(format!(
                        "namespace '{package}/{namespace}' must map versions to forms"
                    )));
                };
                for (version, json) in versions {
                    registry.insert(package.clone(), namespace.clone(), version, json);
                }
            }
        }
        Ok(registry)
    }

    /// Load `<root>/<package>/<namespace>/<version>.json` files.
    ///
    /// Entries that are not directories at the package/namespace levels, and files without the
    /// form extension, are skipped.
    pub fn load_dir(root: &Path) -> FormResult<Self> {
        let mut registry = Self::new();

        for package in fs::read_dir(root).map_err(FormError::FileRead)? {
            let package = package.map_err(FormError::FileRead)?;
            if !package.file_type().map_err(FormError::FileRead)?.is_dir() {
                continue;
            }
            let package_name = package.file_name().to_string_lossy().into_owned();

            for namespace in fs::read_dir(package.path()).map_err(FormError::FileRead)? {
                let namespace = namespace.map_err(FormError::FileRead)?;
                if !namespace.file_type().map_err(FormError::FileRead)?.is_dir() {
                    continue;
                }
                let namespace_name = namespace.file_name().to_string_lossy().into_owned();

                for file in fs::read_dir(namespace.path()).map_err(FormError::FileRead)? {
                    let path = file.map_err(FormError::FileRead)?.path();
                    if path.extension().and_then(|ext| ext.to_str()) != Some(FORM_FILE_EXTENSION) {
                        continue;
                    }
                    let Some(version) = path.file_stem().and_then(|stem| stem.to_str()) else {
                        continue;
                    };

                    let contents = fs::read_to_string(&path).map_err(FormError::FileRead)?;
                    let json = serde_json::from_str(&contents).map_err(|source| {
                        FormError::FileParse {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    registry.insert(package_name.clone(), namespace_name.clone(), version, json);
                }
            }
        }

        tracing::debug!(
            "loaded form registry from {} ({} packages)",
            root.display(),
            registry.packages.len()
        );
        Ok(registry)
    }

    /// All stored versions of `package/namespace`.
    ///
    /// # Errors
    ///
    /// Fails when the package or the namespace is absent; never returns an empty list for a
    /// missing key.
    pub fn lookup_forms(&self, package: &str, namespace: &str) -> FormResult<Vec<FormJsonFile>> {
        let namespaces = self
            .packages
            .get(package)
            .ok_or_else(|| FormError::PackageNotFound(package.to_string()))?;
        let versions = namespaces
            .get(namespace)
            .ok_or_else(|| FormError::NamespaceNotFound {
                package: package.to_string(),
                namespace: namespace.to_string(),
            })?;

        Ok(versions
            .iter()
            .map(|(version, json)| FormJsonFile {
                version: version.clone(),
                semantic_version: coerce_version(version),
                json: json.clone(),
            })
            .collect())
    }

    /// Resolve a form, pick its version and inline registry sub-forms.
    ///
    /// A non-strict version miss (or no requested version) selects the latest version.
    pub fn get_form(
        &self,
        package: &str,
        namespace: &str,
        version: Option<&str>,
        is_strict: bool,
    ) -> FormResult<FormSchema> {
        let mut chain = Vec::new();
        self.get_form_inner(package, namespace, version, is_strict, &mut chain)
    }

    fn get_form_inner(
        &self,
        package: &str,
        namespace: &str,
        version: Option<&str>,
        is_strict: bool,
        chain: &mut Vec<String>,
    ) -> FormResult<FormSchema> {
        let key = format!("{package}/{namespace}");
        if chain.contains(&key) {
            chain.push(key);
            return Err(FormError::CyclicReference(chain.join(" -> ")));
        }

        let forms = self.lookup_forms(package, namespace)?;

        let requested = match version {
            Some(required) => get_form_by_version(&forms, required, is_strict)?,
            None => None,
        };
        let selected = match requested {
            Some(form) => form,
            None => get_latest_form_version(&forms).ok_or_else(|| {
                FormError::NoVersionsAvailable {
                    package: package.to_string(),
                    namespace: namespace.to_string(),
                }
            })?,
        };
        tracing::debug!("selected {key} version {}", selected.version);

        let mut schema = FormSchema::from_value(selected.json.clone())?;
        chain.push(key);
        let loaded = self.load_subforms(&mut schema, package, chain);
        chain.pop();
        loaded?;
        Ok(schema)
    }

    /// Attach registry sub-forms to every sub-form page of `schema`, recursively.
    ///
    /// `subform.package` defaults to the parent's package and `subform.name` is the namespace.
    /// A sub-form missing from the registry is logged and left unresolved.
    fn load_subforms(
        &self,
        schema: &mut FormSchema,
        package: &str,
        chain: &mut Vec<String>,
    ) -> FormResult<()> {
        for page in schema.pages.iter_mut().filter(|page| page.is_subform) {
            let Some(subform) = page.subform.as_mut() else {
                continue;
            };
            let Some(name) = subform.name.clone() else {
                continue;
            };
            let subform_package = subform.package.clone().unwrap_or_else(|| package.to_string());

            match self.get_form_inner(&subform_package, &name, None, false, chain) {
                Ok(form) => subform.form = Some(Box::new(form)),
                Err(
                    err @ (FormError::PackageNotFound(_)
                    | FormError::NamespaceNotFound { .. }
                    | FormError::NoVersionsAvailable { .. }),
                ) => {
                    tracing::warn!(
                        "sub-form '{name}' referenced by page '{}' is not in the registry: {err}",
                        page.label
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// First form whose semantic version satisfies `required_version`.
///
/// # Errors
///
/// With `is_strict`, a miss fails with `Couldn't find form with version: X`. Without it a miss
/// is `Ok(None)` and the caller falls back to the latest version.
pub fn get_form_by_version<'a>(
    forms: &'a [FormJsonFile],
    required_version: &str,
    is_strict: bool,
) -> FormResult<Option<&'a FormJsonFile>> {
    let found = version_requirement(required_version).and_then(|requirement| {
        forms.iter().find(|form| {
            form.semantic_version
                .as_ref()
                .is_some_and(|version| requirement.matches(version))
        })
    });

    match found {
        Some(form) => Ok(Some(form)),
        None if is_strict => Err(FormError::VersionNotFound(required_version.to_string())),
        None => Ok(None),
    }
}

/// The form with the highest released semantic version.
///
/// A single stored form is returned as-is, whatever its version key. Otherwise pre-releases
/// never satisfy `*`, so they are only chosen in that single-form case.
pub fn get_latest_form_version(forms: &[FormJsonFile]) -> Option<&FormJsonFile> {
    if let [only] = forms {
        return Some(only);
    }

    forms
        .iter()
        .filter_map(|form| {
            let version = form.semantic_version.as_ref()?;
            VersionReq::STAR.matches(version).then_some((version, form))
        })
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, form)| form)
}

/// Coerce a loose version string into a semantic version.
///
/// Takes the first run of up to three dot-separated numbers anywhere in the string, plus a
/// `-tag` directly after it as the pre-release: `"1.1"` -> `1.1.0`, `"v2"` -> `2.0.0`,
/// `"1.2-beta"` -> `1.2.0-beta`. A tag that is not a valid pre-release is ignored.
pub fn coerce_version(raw: &str) -> Option<Version> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let rest = &raw[start..];
    let mut parts = [0u64; 3];
    let mut filled = 0;
    let mut consumed = 0;

    while filled < parts.len() {
        let digits = rest[consumed..]
            .chars()
            .take_while(char::is_ascii_digit)
            .count();
        if digits == 0 {
            break;
        }
        parts[filled] = rest[consumed..consumed + digits].parse().ok()?;
        filled += 1;
        consumed += digits;

        let tail = &rest[consumed..];
        let continues = tail.len() > 1
            && tail.starts_with('.')
            && tail[1..].starts_with(|c: char| c.is_ascii_digit());
        if filled == parts.len() || !continues {
            break;
        }
        consumed += 1;
    }

    let mut version = Version::new(parts[0], parts[1], parts[2]);
    if let Some(tag) = rest[consumed..].strip_prefix('-') {
        let tag: String = tag
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
            .collect();
        if let Ok(pre) = Prerelease::new(tag.trim_end_matches('.')) {
            version.pre = pre;
        }
    }
    Some(version)
}

/// Interpret a requested version as a semver requirement.
fn version_requirement(raw: &str) -> Option<VersionReq> {
    let trimmed = raw.trim();
    let is_bare = !trimmed.is_empty()
        && trimmed
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

    let requirement = if is_bare {
        match trimmed.split('.').count() {
            1 | 2 => format!("~{trimmed}"),
            _ => format!("={trimmed}"),
        }
    } else {
        trimmed.to_string()
    };

    match VersionReq::parse(&requirement) {
        Ok(requirement) => Some(requirement),
        Err(err) => {
            tracing::debug!("ignoring unparseable version range '{raw}': {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn hts_registry() -> FormRegistry {
        let mut registry = FormRegistry::new();
        registry.insert("hiv", "hts_poc", "1.0", json!({"name": "HTS POC", "version": "1.0", "pages": []}));
        registry.insert("hiv", "hts_poc", "1.1", json!({"name": "HTS POC", "version": "1.1", "pages": []}));
        registry
    }

    fn file(version: &str) -> FormJsonFile {
        FormJsonFile {
            version: version.to_string(),
            semantic_version: coerce_version(version),
            json: json!({"version": version}),
        }
    }

    #[test]
    fn coerces_loose_versions() {
        assert_eq!(coerce_version("1.1"), Some(Version::new(1, 1, 0)));
        assert_eq!(coerce_version("v2"), Some(Version::new(2, 0, 0)));
        assert_eq!(coerce_version("1.2.3-beta"), Version::parse("1.2.3-beta").ok());
        assert_eq!(coerce_version("10.0-rc.1"), Version::parse("10.0.0-rc.1").ok());
        assert_eq!(coerce_version("3.1-"), Some(Version::new(3, 1, 0)));
        assert_eq!(coerce_version("release-4.5"), Some(Version::new(4, 5, 0)));
        assert_eq!(coerce_version("latest"), None);
    }

    #[test]
    fn lookup_fails_for_missing_package_or_namespace() {
        let registry = hts_registry();

        let err = registry.lookup_forms("tb", "hts_poc").expect_err("missing package");
        assert!(matches!(err, FormError::PackageNotFound(p) if p == "tb"));

        let err = registry.lookup_forms("hiv", "nope").expect_err("missing namespace");
        assert!(matches!(err, FormError::NamespaceNotFound { namespace, .. } if namespace == "nope"));
    }

    #[test]
    fn latest_of_single_form_is_that_form() {
        let forms = vec![file("not-a-version")];
        assert_eq!(get_latest_form_version(&forms), Some(&forms[0]));
    }

    #[test]
    fn latest_of_many_is_semver_maximum() {
        let forms = vec![file("1.1"), file("2.0"), file("1.0"), file("10.0-rc")];
        let latest = get_latest_form_version(&forms).expect("latest");
        assert_eq!(latest.version, "2.0");
    }

    #[test]
    fn pre_release_sorts_before_its_release() {
        let candidate = coerce_version("2.0-rc").expect("coerced");
        let release = coerce_version("2.0").expect("coerced");
        assert!(candidate < release);

        let forms = vec![file("2.0-rc"), file("2.0"), file("1.9")];
        let latest = get_latest_form_version(&forms).expect("latest");
        assert_eq!(latest.version, "2.0");

        let only = vec![file("3.0-beta")];
        assert_eq!(get_latest_form_version(&only).expect("single").version, "3.0-beta");
    }

    #[test]
    fn strict_version_miss_fails_with_message() {
        let forms = vec![file("1.0"), file("1.1")];
        let err = get_form_by_version(&forms, "9.1", true).expect_err("strict miss");
        assert_eq!(err.to_string(), "Couldn't find form with version: 9.1");
    }

    #[test]
    fn non_strict_version_miss_is_none() {
        let forms = vec![file("1.0"), file("1.1")];
        assert_eq!(get_form_by_version(&forms, "9.1", false).expect("non strict"), None);
    }

    #[test]
    fn partial_version_matches_its_release_line_only() {
        let forms = vec![file("1.1"), file("1.0")];
        let found = get_form_by_version(&forms, "1.0", true).expect("found");
        assert_eq!(found.map(|f| f.version.as_str()), Some("1.0"));

        let ranged = get_form_by_version(&forms, ">=1.1.0", true).expect("range");
        assert_eq!(ranged.map(|f| f.version.as_str()), Some("1.1"));
    }

    #[test]
    fn get_form_without_version_returns_latest() {
        let form = hts_registry().get_form("hiv", "hts_poc", None, false).expect("form");
        assert_eq!(form.extra.get("version"), Some(&json!("1.1")));
    }

    #[test]
    fn get_form_non_strict_miss_falls_back_to_latest() {
        let form = hts_registry()
            .get_form("hiv", "hts_poc", Some("9.1"), false)
            .expect("fallback");
        assert_eq!(form.extra.get("version"), Some(&json!("1.1")));
    }

    #[test]
    fn get_form_inlines_registry_subforms_and_tolerates_missing_ones() {
        let mut registry = hts_registry();
        registry.insert(
            "hiv",
            "parent",
            "1.0",
            json!({
                "name": "Parent",
                "pages": [
                    {"label": "Embedded", "isSubform": true, "subform": {"name": "hts_poc"}},
                    {"label": "Missing", "isSubform": true, "subform": {"name": "absent"}}
                ]
            }),
        );

        let parent = registry.get_form("hiv", "parent", None, false).expect("parent");
        let embedded = parent.pages[0].subform_schema().expect("embedded form");
        assert_eq!(embedded.name, "HTS POC");
        assert!(parent.pages[1].subform_schema().is_none());
    }

    #[test]
    fn get_form_detects_self_referencing_subforms() {
        let mut registry = FormRegistry::new();
        registry.insert(
            "pkg",
            "loop",
            "1.0",
            json!({"name": "Loop", "pages": [{"label": "again", "isSubform": true, "subform": {"name": "loop"}}]}),
        );

        let err = registry.get_form("pkg", "loop", None, false).expect_err("cycle");
        assert!(matches!(err, FormError::CyclicReference(chain) if chain == "pkg/loop -> pkg/loop"));
    }

    #[test]
    fn from_value_builds_nested_registry() {
        let registry = FormRegistry::from_value(json!({
            "hiv": {"hts_poc": {"1.0": {"name": "HTS"}}}
        }))
        .expect("registry");
        assert_eq!(registry.lookup_forms("hiv", "hts_poc").expect("forms").len(), 1);
        assert!(FormRegistry::from_value(json!([])).is_err());
    }

    #[test]
    fn load_dir_reads_version_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let namespace_dir = temp_dir.path().join("hiv").join("hts_poc");
        fs::create_dir_all(&namespace_dir).expect("create dirs");
        fs::write(namespace_dir.join("1.0.json"), r#"{"name": "HTS", "pages": []}"#)
            .expect("write 1.0");
        fs::write(namespace_dir.join("1.1.json"), r#"{"name": "HTS", "pages": []}"#)
            .expect("write 1.1");
        fs::write(namespace_dir.join("notes.txt"), "ignored").expect("write notes");

        let registry = FormRegistry::load_dir(temp_dir.path()).expect("load registry");
        let versions: Vec<String> = registry
            .lookup_forms("hiv", "hts_poc")
            .expect("forms")
            .into_iter()
            .map(|f| f.version)
            .collect();
        assert_eq!(versions, vec!["1.0".to_string(), "1.1".to_string()]);
    }

    #[test]
    fn load_dir_reports_unparseable_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let namespace_dir = temp_dir.path().join("hiv").join("broken");
        fs::create_dir_all(&namespace_dir).expect("create dirs");
        fs::write(namespace_dir.join("1.0.json"), "{not json").expect("write");

        let err = FormRegistry::load_dir(temp_dir.path()).expect_err("parse failure");
        assert!(matches!(err, FormError::FileParse { .. }));
    }
}
