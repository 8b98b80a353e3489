//! Rule-based destination folders
//!
//! When neither the traversal nor "keep original structure" mode provides a
//! destination, the folder is derived from the document's own metadata by an
//! ordered list of rules. The first rule producing a non-empty path wins.
//!
//! Rules are read from JSON:
//!
//! ```json
//! [
//!   {"kind": "property", "properties": ["cm:title", "{http://www.alfresco.org/model/content/1.0}name"],
//!    "levels": 2, "include_last_level": true},
//!   {"kind": "date", "levels": 3}
//! ]
//! ```

use crate::error::{DocumentError, DocumentResult};
use crate::repository::{join_path, Metadata};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use std::sync::LazyLock;

/// Characters the target rejects in folder names
static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[:."*?<>|]+"#).expect("Invalid folder name regex"));

/// Layout of date-time property values
const SOURCE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Date rule level formats: year, month, day, hour, minute, second
const DATE_LEVELS: [&str; 6] = ["%Y", "%m", "%d", "%H", "%M", "%S"];

/// One folder structure rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FolderStructureRule {
    /// Slice the value of the first non-empty property into levels
    Property {
        properties: Vec<String>,

        /// Number of single-character levels
        #[serde(default)]
        levels: usize,

        /// Append the full value as the last level
        #[serde(default)]
        include_last_level: bool,

        /// Re-render a date-time value before slicing
        #[serde(default)]
        date_format: Option<String>,
    },

    /// Levels taken from the current date and time
    Date { levels: usize },
}

impl FolderStructureRule {
    /// Evaluate the rule; an empty string means "no opinion"
    pub fn evaluate(&self, metadata: &Metadata, now: NaiveDateTime) -> DocumentResult<String> {
        match self {
            FolderStructureRule::Property {
                properties,
                levels,
                include_last_level,
                date_format,
            } => {
                let Some((property, raw)) = properties.iter().find_map(|name| {
                    metadata
                        .properties
                        .get(name)
                        .and_then(value_as_text)
                        .filter(|text| !text.is_empty())
                        .map(|text| (name, text))
                }) else {
                    return Ok(String::new());
                };

                let value = match date_format {
                    Some(format) => reformat_date(property, &raw, format)?,
                    None => raw,
                };
                Ok(property_path(&value, *levels, *include_last_level))
            }
            FolderStructureRule::Date { levels } => {
                let mut path = String::new();
                for format in DATE_LEVELS.iter().take(*levels) {
                    path.push('/');
                    path.push_str(&now.format(format).to_string());
                }
                Ok(path)
            }
        }
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(value_as_text),
        other => Some(other.to_string()),
    }
}

fn reformat_date(property: &str, value: &str, format: &str) -> DocumentResult<String> {
    let head = value.get(..19).unwrap_or(value);
    let parsed = NaiveDateTime::parse_from_str(head, SOURCE_DATE_FORMAT).map_err(|e| {
        DocumentError::DateValue {
            property: property.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    let mut rendered = String::new();
    write!(rendered, "{}", parsed.format(format)).map_err(|_| DocumentError::DateValue {
        property: property.to_string(),
        value: value.to_string(),
        reason: format!("invalid format '{}'", format),
    })?;
    Ok(rendered)
}

/// Build "/a/b/full value" from a property value
fn property_path(value: &str, levels: usize, include_last_level: bool) -> String {
    let value = value.strip_prefix('/').unwrap_or(value);
    let mut path = String::new();

    for c in value.chars().take(levels) {
        path.push('/');
        path.push_str(&sanitize_level(&c.to_string()));
    }
    if include_last_level {
        path.push('/');
        path.push_str(&sanitize_last_level(value));
    }
    path
}

fn sanitize_level(segment: &str) -> String {
    let segment = segment.replace(' ', "_");
    INVALID_NAME_CHARS
        .replace_all(segment.trim(), "_")
        .into_owned()
}

fn sanitize_last_level(segment: &str) -> String {
    INVALID_NAME_CHARS
        .replace_all(segment.trim(), "_")
        .into_owned()
}

/// Resolves destinations from rules, default folder and path replacements
#[derive(Debug, Clone, Default)]
pub struct DestinationResolver {
    root: String,
    rules: Vec<FolderStructureRule>,
    default_folder: Option<String>,
    replacements: Vec<(String, String)>,
}

impl DestinationResolver {
    pub fn new(
        root: &str,
        rules: Vec<FolderStructureRule>,
        default_folder: Option<String>,
        replacements: Vec<(String, String)>,
    ) -> Self {
        Self {
            root: root.to_string(),
            rules,
            default_folder,
            replacements,
        }
    }

    /// Resolve against the current local time
    pub fn resolve(&self, metadata: &Metadata) -> DocumentResult<String> {
        self.resolve_at(metadata, chrono::Local::now().naive_local())
    }

    pub fn resolve_at(&self, metadata: &Metadata, now: NaiveDateTime) -> DocumentResult<String> {
        if self.rules.is_empty() {
            return Ok(join_path(&self.root, ""));
        }

        let mut resolved = None;
        for rule in &self.rules {
            let path = rule.evaluate(metadata, now)?;
            if !path.is_empty() {
                resolved = Some(join_path(&self.root, &path));
                break;
            }
        }

        let path = match (resolved, &self.default_folder) {
            (Some(path), _) => path,
            (None, Some(default)) => join_path(&self.root, default),
            (None, None) => return Err(DocumentError::NoDestination),
        };

        Ok(self
            .replacements
            .iter()
            .fold(path, |path, (from, to)| path.replace(from.as_str(), to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn metadata(properties: Value) -> Metadata {
        Metadata {
            id: "doc".into(),
            type_id: "cm:content".into(),
            aspects: vec![],
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(9, 8, 7)
            .unwrap()
    }

    fn property_rule(levels: usize, include_last_level: bool) -> FolderStructureRule {
        FolderStructureRule::Property {
            properties: vec!["cm:code".into(), "cm:title".into()],
            levels,
            include_last_level,
            date_format: None,
        }
    }

    #[test]
    fn test_property_rule_levels() {
        let md = metadata(json!({"cm:code": null, "cm:title": "/Ab c.d"}));

        let path = property_rule(3, true).evaluate(&md, now()).unwrap();
        assert_eq!(path, "/A/b/_/Ab c_d");

        let path = property_rule(2, false).evaluate(&md, now()).unwrap();
        assert_eq!(path, "/A/b");
    }

    #[test]
    fn test_property_rule_short_value() {
        let md = metadata(json!({"cm:code": "X"}));
        let path = property_rule(3, false).evaluate(&md, now()).unwrap();
        assert_eq!(path, "/X");
    }

    #[test]
    fn test_property_rule_without_value() {
        let md = metadata(json!({"cm:code": ""}));
        assert_eq!(property_rule(2, true).evaluate(&md, now()).unwrap(), "");
    }

    #[test]
    fn test_property_rule_date_format() {
        let rule = FolderStructureRule::Property {
            properties: vec!["cm:created".into()],
            levels: 0,
            include_last_level: true,
            date_format: Some("%Y/%m".into()),
        };
        let md = metadata(json!({"cm:created": "2021-03-04T10:11:12.000Z"}));
        assert_eq!(rule.evaluate(&md, now()).unwrap(), "/2021/03");

        let bad = metadata(json!({"cm:created": "yesterday"}));
        assert!(matches!(
            rule.evaluate(&bad, now()),
            Err(DocumentError::DateValue { .. })
        ));
    }

    #[test]
    fn test_date_rule() {
        let rule = FolderStructureRule::Date { levels: 4 };
        let path = rule.evaluate(&metadata(json!({})), now()).unwrap();
        assert_eq!(path, "/2024/05/17/09");
    }

    #[test]
    fn test_resolver_first_non_empty_wins() {
        let resolver = DestinationResolver::new(
            "/Migrated",
            vec![property_rule(1, false), FolderStructureRule::Date { levels: 1 }],
            None,
            vec![],
        );

        let with_code = metadata(json!({"cm:code": "Q"}));
        assert_eq!(resolver.resolve_at(&with_code, now()).unwrap(), "/Migrated/Q");

        let without = metadata(json!({}));
        assert_eq!(resolver.resolve_at(&without, now()).unwrap(), "/Migrated/2024");
    }

    #[test]
    fn test_resolver_default_and_failure() {
        let md = metadata(json!({}));

        let with_default = DestinationResolver::new(
            "/Migrated",
            vec![property_rule(1, false)],
            Some("/Unsorted".into()),
            vec![("Unsorted".into(), "Inbox".into())],
        );
        assert_eq!(with_default.resolve_at(&md, now()).unwrap(), "/Migrated/Inbox");

        let without_default =
            DestinationResolver::new("/Migrated", vec![property_rule(1, false)], None, vec![]);
        let err = without_default.resolve_at(&md, now()).unwrap_err();
        assert!(matches!(err, DocumentError::NoDestination));
    }

    #[test]
    fn test_resolver_without_rules_uses_root() {
        let resolver = DestinationResolver::new("", vec![], None, vec![]);
        assert_eq!(resolver.resolve_at(&metadata(json!({})), now()).unwrap(), "/");
    }

    #[test]
    fn test_rules_from_json() {
        let rules: Vec<FolderStructureRule> = serde_json::from_str(
            r#"[{"kind":"property","properties":["cm:title"],"levels":2},{"kind":"date","levels":3}]"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1], FolderStructureRule::Date { levels: 3 });
    }
}
