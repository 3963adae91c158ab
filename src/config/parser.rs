//! Config file parsing and model building.
//!
//! The on-disk format is JSON or YAML, selected by file extension. Raw serde
//! structures are validated into the immutable model: identifier charset,
//! uniqueness, reference resolution, pattern compilation, and directory
//! checks all happen here, before any runtime state exists.

use super::{
    Config, GroupConfig, Rgb, ServiceConfig, StopSpec, DEFAULT_MAX_DEPTH, DEFAULT_STOP_TIMEOUT,
};
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    services: Vec<RawService>,
    groups: Vec<RawGroup>,
    #[serde(rename = "maxDepth")]
    max_depth: Option<usize>,
    #[serde(rename = "ignoreErrors")]
    ignore_errors: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    name: String,
    start: String,
    stop: Option<String>,
    #[serde(rename = "stopTimeout")]
    stop_timeout: Option<u64>,
    #[serde(default)]
    aliases: Vec<String>,
    color: Option<RawColor>,
    #[serde(rename = "workDir")]
    work_dir: Option<PathBuf>,
    #[serde(rename = "startedPatterns", default)]
    started_patterns: Vec<String>,
    #[serde(rename = "errorPatterns", default)]
    error_patterns: Vec<String>,
    stdin: Option<PathBuf>,
    #[serde(rename = "stopStdin")]
    stop_stdin: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    name: String,
    services: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Colors come in as a raw integer or a string to decode.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawColor {
    Int(i64),
    Text(String),
}

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Load a config file, picking the format from the file extension.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigInvalid(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.parse_json(&content),
            Some("yaml") | Some("yml") => self.parse_yaml(&content),
            other => Err(Error::ConfigInvalid(format!(
                "Unsupported config extension {:?} for '{}': expected .json, .yaml or .yml",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    pub fn parse_json(&self, content: &str) -> Result<Config> {
        let raw: RawConfig = serde_json::from_str(content)
            .map_err(|e| Error::ConfigInvalid(format!("Failed to parse JSON config: {}", e)))?;
        build(raw)
    }

    pub fn parse_yaml(&self, content: &str) -> Result<Config> {
        let raw: RawConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigInvalid(format!("Failed to parse YAML config: {}", e)))?;
        build(raw)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn identifier_pattern() -> Regex {
    Regex::new(r"^[A-Za-z0-9 _.-]+$").expect("identifier pattern is valid")
}

fn build(raw: RawConfig) -> Result<Config> {
    let ident = identifier_pattern();

    let max_depth = raw.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    if max_depth < 1 {
        return Err(Error::ConfigInvalid(
            "maxDepth must be at least 1".to_string(),
        ));
    }

    let mut service_idents = HashSet::new();
    let mut services = Vec::with_capacity(raw.services.len());
    for raw_service in raw.services {
        let service = build_service(raw_service, &ident)?;
        for id in std::iter::once(&service.name).chain(service.aliases.iter()) {
            if !service_idents.insert(id.clone()) {
                return Err(Error::ConfigInvalid(format!(
                    "Duplicate service identifier '{}'",
                    id
                )));
            }
        }
        services.push(Arc::new(service));
    }

    let mut group_idents = HashSet::new();
    let mut groups = Vec::with_capacity(raw.groups.len());
    for raw_group in raw.groups {
        let group = build_group(raw_group, &ident)?;
        for id in std::iter::once(&group.name).chain(group.aliases.iter()) {
            if !group_idents.insert(id.clone()) {
                return Err(Error::ConfigInvalid(format!(
                    "Duplicate group identifier '{}'",
                    id
                )));
            }
        }
        groups.push(Arc::new(group));
    }

    // Reference resolution: every service ref maps to a declared service,
    // every dependency ref to a declared group.
    for group in &groups {
        for service_ref in &group.services {
            if !services
                .iter()
                .any(|s| s.name == *service_ref || s.aliases.iter().any(|a| a == service_ref))
            {
                return Err(Error::ServiceNotFound(format!(
                    "'{}' referenced by group '{}'",
                    service_ref, group.name
                )));
            }
        }
        for dep_ref in &group.dependencies {
            if !groups.iter().any(|g| g.answers_to(dep_ref)) {
                return Err(Error::GroupNotFound(format!(
                    "'{}' referenced by group '{}'",
                    dep_ref, group.name
                )));
            }
        }
    }

    Ok(Config::new(
        services,
        groups,
        max_depth,
        raw.ignore_errors.unwrap_or(false),
    ))
}

fn build_service(raw: RawService, ident: &Regex) -> Result<ServiceConfig> {
    check_identifier(&raw.name, ident)?;
    for alias in &raw.aliases {
        check_identifier(alias, ident)?;
    }

    let stop_timeout = match raw.stop_timeout {
        Some(secs) if secs >= 1 => Duration::from_secs(secs),
        Some(_) => {
            return Err(Error::ConfigInvalid(format!(
                "Service '{}': stopTimeout must be at least 1 second",
                raw.name
            )))
        }
        None => DEFAULT_STOP_TIMEOUT,
    };

    let work_dir = match raw.work_dir {
        Some(dir) => {
            let readable = dir.is_dir() && fs::read_dir(&dir).is_ok();
            if !readable {
                return Err(Error::ConfigInvalid(format!(
                    "Service '{}': workDir '{}' either doesn't exist, isn't a directory, or you can't read from it",
                    raw.name,
                    dir.display()
                )));
            }
            dir
        }
        None => PathBuf::from("."),
    };

    let color = match raw.color {
        Some(RawColor::Int(value)) => Rgb::from_u32(value as u32),
        Some(RawColor::Text(text)) => Rgb::decode(&text)?,
        None => Rgb::WHITE,
    };

    let started_patterns = compile_patterns(&raw.name, "startedPatterns", &raw.started_patterns)?;
    let error_patterns = compile_patterns(&raw.name, "errorPatterns", &raw.error_patterns)?;

    if started_patterns.is_empty() {
        tracing::warn!(
            "Service '{}' has no startedPatterns; a group waiting on it will hang forever",
            raw.name
        );
    }
    if error_patterns.is_empty() {
        tracing::warn!(
            "Service '{}' has no errorPatterns; startup errors will go unnoticed",
            raw.name
        );
    }

    Ok(ServiceConfig {
        name: raw.name,
        aliases: raw.aliases,
        start: raw.start,
        work_dir,
        stdin: raw.stdin,
        stop: raw.stop.as_deref().map(StopSpec::parse).unwrap_or_default(),
        stop_timeout,
        stop_stdin: raw.stop_stdin,
        started_patterns,
        error_patterns,
        color,
    })
}

fn build_group(raw: RawGroup, ident: &Regex) -> Result<GroupConfig> {
    check_identifier(&raw.name, ident)?;
    for alias in &raw.aliases {
        check_identifier(alias, ident)?;
    }
    if raw.services.is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Group '{}' must reference at least one service",
            raw.name
        )));
    }
    Ok(GroupConfig {
        name: raw.name,
        aliases: raw.aliases,
        services: raw.services,
        dependencies: raw.dependencies,
    })
}

fn check_identifier(name: &str, ident: &Regex) -> Result<()> {
    if ident.is_match(name) {
        Ok(())
    } else {
        Err(Error::ConfigInvalid(format!(
            "Identifier '{}' contains characters outside [A-Za-z0-9 _.-]",
            name
        )))
    }
}

fn compile_patterns(service: &str, field: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    Error::ConfigInvalid(format!(
                        "Service '{}': invalid regex in {}: {}",
                        service, field, e
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopSignal;

    fn minimal_json(extra_service_fields: &str) -> String {
        format!(
            r#"{{
              "services": [{{ "name": "web", "start": "echo hi"{} }}],
              "groups": [{{ "name": "all", "services": ["web"] }}]
            }}"#,
            extra_service_fields
        )
    }

    #[test]
    fn parses_minimal_json() {
        let config = Parser::new().parse_json(&minimal_json("")).unwrap();
        assert_eq!(config.services().len(), 1);
        assert_eq!(config.groups().len(), 1);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!config.ignore_errors);

        let web = config.service("web").unwrap();
        assert_eq!(web.start, "echo hi");
        assert_eq!(web.stop_timeout, DEFAULT_STOP_TIMEOUT);
        assert!(matches!(web.stop, StopSpec::Signal(StopSignal::Term)));
        assert_eq!(web.color, Rgb::WHITE);
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
services:
  - name: db
    start: postgres
    aliases: [database]
    startedPatterns: ["ready to accept connections"]
groups:
  - name: backend
    services: [database]
ignoreErrors: true
"#;
        let config = Parser::new().parse_yaml(yaml).unwrap();
        assert!(config.ignore_errors);
        assert!(config.service("database").is_some());
        assert!(config.group("backend").is_some());
    }

    #[test]
    fn resolves_lookup_by_alias() {
        let yaml = r#"
services:
  - name: api server
    start: ./run
    aliases: [api]
groups:
  - name: apis
    aliases: [a]
    services: [api]
"#;
        let config = Parser::new().parse_yaml(yaml).unwrap();
        assert_eq!(config.service("api").unwrap().name, "api server");
        assert_eq!(config.group("a").unwrap().name, "apis");
    }

    #[test]
    fn rejects_duplicate_service_identifiers() {
        let json = r#"{
          "services": [
            { "name": "web", "start": "a" },
            { "name": "other", "start": "b", "aliases": ["web"] }
          ],
          "groups": [{ "name": "all", "services": ["web"] }]
        }"#;
        let err = Parser::new().parse_json(json).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)), "got {err:?}");
    }

    #[test]
    fn rejects_duplicate_group_identifiers() {
        let json = r#"{
          "services": [{ "name": "web", "start": "a" }],
          "groups": [
            { "name": "all", "services": ["web"] },
            { "name": "all", "services": ["web"] }
          ]
        }"#;
        assert!(Parser::new().parse_json(json).is_err());
    }

    #[test]
    fn service_and_group_namespaces_are_separate() {
        let json = r#"{
          "services": [{ "name": "db", "start": "a" }],
          "groups": [{ "name": "db", "services": ["db"] }]
        }"#;
        let config = Parser::new().parse_json(json).unwrap();
        assert!(config.service("db").is_some());
        assert!(config.group("db").is_some());
    }

    #[test]
    fn rejects_bad_identifier() {
        let json = minimal_json("").replace("web", "we/b");
        assert!(Parser::new().parse_json(&json).is_err());
    }

    #[test]
    fn rejects_zero_stop_timeout() {
        let json = minimal_json(r#", "stopTimeout": 0"#);
        assert!(Parser::new().parse_json(&json).is_err());
    }

    #[test]
    fn rejects_zero_max_depth() {
        let json = r#"{
          "services": [{ "name": "web", "start": "a" }],
          "groups": [{ "name": "all", "services": ["web"] }],
          "maxDepth": 0
        }"#;
        assert!(Parser::new().parse_json(json).is_err());
    }

    #[test]
    fn rejects_unresolved_service_reference() {
        let json = r#"{
          "services": [{ "name": "web", "start": "a" }],
          "groups": [{ "name": "all", "services": ["nope"] }]
        }"#;
        let err = Parser::new().parse_json(json).unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)), "got {err:?}");
    }

    #[test]
    fn rejects_unresolved_dependency_reference() {
        let json = r#"{
          "services": [{ "name": "web", "start": "a" }],
          "groups": [{ "name": "all", "services": ["web"], "dependencies": ["ghost"] }]
        }"#;
        let err = Parser::new().parse_json(json).unwrap_err();
        assert!(matches!(err, Error::GroupNotFound(_)), "got {err:?}");
    }

    #[test]
    fn rejects_empty_group() {
        let json = r#"{
          "services": [{ "name": "web", "start": "a" }],
          "groups": [{ "name": "all", "services": [] }]
        }"#;
        assert!(Parser::new().parse_json(json).is_err());
    }

    #[test]
    fn decodes_color_forms() {
        let as_int = minimal_json(r#", "color": 16711680"#);
        let config = Parser::new().parse_json(&as_int).unwrap();
        assert_eq!(
            config.service("web").unwrap().color,
            Rgb {
                r: 255,
                g: 0,
                b: 0
            }
        );

        let as_hex = minimal_json(r#", "color": "0x00ff00""#);
        let config = Parser::new().parse_json(&as_hex).unwrap();
        assert_eq!(
            config.service("web").unwrap().color,
            Rgb {
                r: 0,
                g: 255,
                b: 0
            }
        );
    }

    #[test]
    fn rejects_invalid_pattern() {
        let json = minimal_json(r#", "startedPatterns": ["("]"#);
        assert!(Parser::new().parse_json(&json).is_err());
    }

    #[test]
    fn patterns_compile_case_insensitive() {
        let json = minimal_json(r#", "startedPatterns": ["done"]"#);
        let config = Parser::new().parse_json(&json).unwrap();
        let web = config.service("web").unwrap();
        assert!(web.started_patterns[0].is_match("All DONE."));
    }

    #[test]
    fn load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "services = []").unwrap();
        assert!(Parser::new().load(&path).is_err());
    }

    #[test]
    fn load_selects_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.json");
        std::fs::write(&path, minimal_json("")).unwrap();
        assert!(Parser::new().load(&path).is_ok());
    }

    #[test]
    fn rejects_missing_work_dir() {
        let json = minimal_json(r#", "workDir": "/definitely/not/a/real/dir""#);
        assert!(Parser::new().parse_json(&json).is_err());
    }
}
