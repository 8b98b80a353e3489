//! Configuration types for doc-migrator
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Folder structure rule loading

use crate::error::ConfigError;
use crate::writer::destination::FolderStructureRule;
use crate::writer::properties::default_namespace_prefixes;
use chrono::format::{Item, StrftimeItems};
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum reasonable thread count
const MAX_THREADS: usize = 512;

/// Chunk and page size limits
const MAX_CHUNK_SIZE: usize = 10_000;
const MAX_PAGE_SIZE: usize = 10_000;

/// Migrate documents between content repositories
#[derive(Parser, Debug, Clone)]
#[command(
    name = "doc-migrator",
    version,
    about = "Migrate documents, versions and relationships between content repositories",
    long_about = "Copies documents with their metadata, version history and relationships from a \
                  source repository to a target repository.\n\n\
                  Documents are read by a folder walk, a query, or a list of previously failed ids, \
                  and written in parallel chunks. Partially written documents are rolled back.",
    after_help = "EXAMPLES:\n    \
        doc-migrator ./export ./import --source-folder /Sites -t 8 -c 20\n    \
        doc-migrator ./export ./import --all-versions --associations --skip-existing\n    \
        doc-migrator ./export ./import --profile query --query '\\.pdf$' --rules rules.json\n    \
        doc-migrator ./export ./import --profile failed --failed-list failed.txt"
)]
pub struct CliArgs {
    /// Source repository root directory
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Target repository root directory
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// How documents are selected
    #[arg(long, value_enum, default_value_t = Profile::Folder)]
    pub profile: Profile,

    /// Folder to walk in the source repository
    #[arg(long, default_value = "/", value_name = "PATH")]
    pub source_folder: String,

    /// Document query (query profile)
    #[arg(long, value_name = "QUERY")]
    pub query: Option<String>,

    /// File with source ids to retry, one per line (failed profile)
    #[arg(long, value_name = "FILE")]
    pub failed_list: Option<PathBuf>,

    /// Write the source ids of failed documents to this file
    #[arg(long, value_name = "FILE")]
    pub failed_out: Option<PathBuf>,

    /// Children fetched per folder page
    #[arg(long, default_value = "100", value_name = "NUM")]
    pub page_size: usize,

    /// Documents per chunk
    #[arg(short = 'c', long, default_value = "10", value_name = "NUM")]
    pub chunk_size: usize,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = default_threads(), value_name = "NUM")]
    pub threads: usize,

    /// Leave documents already present in the target untouched
    #[arg(long, conflicts_with = "replace_existing")]
    pub skip_existing: bool,

    /// Delete and re-upload documents already present in the target
    #[arg(long)]
    pub replace_existing: bool,

    /// Copy the full version history instead of the current version
    #[arg(long)]
    pub all_versions: bool,

    /// Replicate relationships between migrated documents
    #[arg(long)]
    pub associations: bool,

    /// Copy folder ACLs (direct entries only)
    #[arg(long)]
    pub permissions: bool,

    /// Only mirror the folder structure
    #[arg(long)]
    pub folders_only: bool,

    /// Root path in the target repository
    #[arg(long, default_value = "", value_name = "PATH")]
    pub target_root: String,

    /// Place documents in the same folders they have in the source
    #[arg(long)]
    pub keep_structure: bool,

    /// JSON file with folder structure rules
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Folder used when no rule yields a destination
    #[arg(long, value_name = "PATH")]
    pub default_folder: Option<String>,

    /// Replace text in computed destination paths (can be repeated)
    #[arg(long = "path-replace", value_name = "OLD=NEW", action = clap::ArgAction::Append)]
    pub path_replace: Vec<String>,

    /// Property never copied to the target (can be repeated)
    #[arg(long = "property-filter", value_name = "NAME", action = clap::ArgAction::Append)]
    pub property_filter: Vec<String>,

    /// Content type for migrated documents (prefix:name)
    #[arg(long, value_name = "TYPE")]
    pub new_content_type: Option<String>,

    /// Target property receiving the source document id
    #[arg(long, value_name = "NAME")]
    pub source_id_property: Option<String>,

    /// Aspect added to every migrated document (can be repeated)
    #[arg(long = "aspect", value_name = "ASPECT", action = clap::ArgAction::Append)]
    pub aspects: Vec<String>,

    /// Namespace prefix for collection property names (can be repeated)
    #[arg(long = "namespace-prefix", value_name = "URI=PREFIX", action = clap::ArgAction::Append)]
    pub namespace_prefix: Vec<String>,

    /// Folder name never traversed, case-insensitive (can be repeated)
    #[arg(long = "exclude-folder", value_name = "NAME", action = clap::ArgAction::Append)]
    pub exclude_folders: Vec<String>,

    /// What to do with source documents that migrated
    #[arg(long, value_enum, default_value_t = ActionKind::Keep)]
    pub on_success: ActionKind,

    /// Destination folder for --on-success move
    #[arg(long, value_name = "PATH")]
    pub success_folder: Option<String>,

    /// What to do with source documents that failed
    #[arg(long, value_enum, default_value_t = ActionKind::Keep)]
    pub on_error: ActionKind,

    /// Destination folder for --on-error move
    #[arg(long, value_name = "PATH")]
    pub error_folder: Option<String>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_threads() -> usize {
    num_cpus::get()
}

/// Producer strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Walk the source folder tree
    #[value(alias = "run", alias = "rerun", alias = "default")]
    Folder,

    /// Page through a document query
    #[value(alias = "delta")]
    Query,

    /// Retry documents listed in a failed-id file
    Failed,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::Folder => "folder",
            Profile::Query => "query",
            Profile::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Source action selector on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionKind {
    Keep,
    Move,
    Delete,
}

/// What happens to a source document after it was processed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceAction {
    #[default]
    Keep,
    Move(String),
    Delete,
}

impl SourceAction {
    fn from_args(kind: ActionKind, folder: Option<String>, outcome: &str) -> Result<Self, ConfigError> {
        match kind {
            ActionKind::Keep => Ok(SourceAction::Keep),
            ActionKind::Delete => {
                warn!(outcome, "Source documents will be deleted after processing");
                Ok(SourceAction::Delete)
            }
            ActionKind::Move => folder
                .filter(|f| !f.trim().is_empty())
                .map(SourceAction::Move)
                .ok_or_else(|| ConfigError::MissingActionFolder {
                    outcome: outcome.to_string(),
                }),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Source repository root directory
    pub source_dir: PathBuf,

    /// Target repository root directory
    pub target_dir: PathBuf,

    pub profile: Profile,

    /// Start folder of the folder profile
    pub source_folder: String,

    pub query: Option<String>,
    pub failed_list: Option<PathBuf>,
    pub failed_out: Option<PathBuf>,

    pub page_size: usize,
    pub chunk_size: usize,
    pub thread_count: usize,

    pub skip_existing: bool,
    pub replace_existing: bool,
    pub all_versions: bool,
    pub copy_associations: bool,
    pub copy_permissions: bool,
    pub folders_only: bool,

    /// Root path in the target, empty for the repository root
    pub target_root: String,
    pub keep_original_structure: bool,
    pub rules: Vec<FolderStructureRule>,
    pub default_folder: Option<String>,
    pub path_replacements: Vec<(String, String)>,

    pub property_filter: Vec<String>,
    pub new_content_type: Option<String>,
    pub source_id_property: Option<String>,
    pub extra_aspects: Vec<String>,
    pub namespace_prefixes: BTreeMap<String, String>,

    pub excluded_folders: Vec<String>,

    pub on_success: SourceAction,
    pub on_error: SourceAction,

    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            target_dir: PathBuf::new(),
            profile: Profile::Folder,
            source_folder: "/".to_string(),
            query: None,
            failed_list: None,
            failed_out: None,
            page_size: 100,
            chunk_size: 10,
            thread_count: 4,
            skip_existing: false,
            replace_existing: false,
            all_versions: false,
            copy_associations: false,
            copy_permissions: false,
            folders_only: false,
            target_root: String::new(),
            keep_original_structure: false,
            rules: Vec::new(),
            default_folder: None,
            path_replacements: Vec::new(),
            property_filter: Vec::new(),
            new_content_type: None,
            source_id_property: None,
            extra_aspects: Vec::new(),
            namespace_prefixes: default_namespace_prefixes(),
            excluded_folders: Vec::new(),
            on_success: SourceAction::Keep,
            on_error: SourceAction::Keep,
            show_progress: false,
            verbose: false,
        }
    }
}

impl MigrationConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.threads == 0 || args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }

        if args.chunk_size == 0 || args.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: args.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }

        if args.page_size == 0 || args.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidPageSize {
                size: args.page_size,
                max: MAX_PAGE_SIZE,
            });
        }

        validate_root_path(&args.target_root)?;

        match args.profile {
            Profile::Query => {
                let query = args.query.as_deref().ok_or_else(|| ConfigError::MissingParameter {
                    name: "query".into(),
                    profile: args.profile.to_string(),
                })?;
                Regex::new(query).map_err(|e| ConfigError::InvalidQuery {
                    query: query.to_string(),
                    reason: e.to_string(),
                })?;
            }
            Profile::Failed if args.failed_list.is_none() => {
                return Err(ConfigError::MissingParameter {
                    name: "failed-list".into(),
                    profile: args.profile.to_string(),
                });
            }
            _ => {}
        }

        let rules = match &args.rules {
            Some(path) => load_rules(path)?,
            None => Vec::new(),
        };

        let path_replacements = args
            .path_replace
            .iter()
            .map(|pair| parse_pair("path-replace", pair))
            .collect::<Result<Vec<_>, _>>()?;

        let mut namespace_prefixes = default_namespace_prefixes();
        for pair in &args.namespace_prefix {
            let (uri, prefix) = parse_pair("namespace-prefix", pair)?;
            namespace_prefixes.insert(uri, prefix);
        }

        let on_success = SourceAction::from_args(args.on_success, args.success_folder, "success")?;
        let on_error = SourceAction::from_args(args.on_error, args.error_folder, "error")?;

        Ok(Self {
            source_dir: args.source,
            target_dir: args.target,
            profile: args.profile,
            source_folder: args.source_folder,
            query: args.query,
            failed_list: args.failed_list,
            failed_out: args.failed_out,
            page_size: args.page_size,
            chunk_size: args.chunk_size,
            thread_count: args.threads,
            skip_existing: args.skip_existing,
            replace_existing: args.replace_existing,
            all_versions: args.all_versions,
            copy_associations: args.associations,
            copy_permissions: args.permissions,
            folders_only: args.folders_only,
            target_root: args.target_root,
            keep_original_structure: args.keep_structure,
            rules,
            default_folder: args.default_folder,
            path_replacements,
            property_filter: args.property_filter,
            new_content_type: args.new_content_type,
            source_id_property: args.source_id_property,
            extra_aspects: args.aspects,
            namespace_prefixes,
            excluded_folders: args.exclude_folders,
            on_success,
            on_error,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

fn validate_root_path(path: &str) -> Result<(), ConfigError> {
    if path.ends_with('/') {
        return Err(ConfigError::InvalidRootPath {
            path: path.to_string(),
            reason: "must not end with '/'".into(),
        });
    }
    if !path.is_empty() && !path.starts_with('/') {
        return Err(ConfigError::InvalidRootPath {
            path: path.to_string(),
            reason: "must start with '/'".into(),
        });
    }
    Ok(())
}

fn parse_pair(flag: &str, value: &str) -> Result<(String, String), ConfigError> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(ConfigError::InvalidPair {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Load and validate folder structure rules from a JSON file
pub fn load_rules(path: &Path) -> Result<Vec<FolderStructureRule>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRules {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let rules: Vec<FolderStructureRule> =
        serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;

    for rule in &rules {
        if let FolderStructureRule::Property {
            properties,
            date_format,
            ..
        } = rule
        {
            if properties.is_empty() {
                return Err(invalid("property rule without properties".into()));
            }
            if let Some(format) = date_format {
                validate_date_format(format)?;
            }
        }
    }
    Ok(rules)
}

fn validate_date_format(format: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidDateFormat {
            format: format.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["doc-migrator", "/src", "/dst"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::from_args(args(&["-t", "4"])).unwrap();
        assert_eq!(config.profile, Profile::Folder);
        assert_eq!(config.source_folder, "/");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.on_success, SourceAction::Keep);
        assert_eq!(config.namespace_prefixes.get("http://www.alfresco.org/model/content/1.0").map(String::as_str), Some("cm"));
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(matches!(
            MigrationConfig::from_args(args(&["-t", "0"])),
            Err(ConfigError::InvalidThreadCount { .. })
        ));
        assert!(matches!(
            MigrationConfig::from_args(args(&["-c", "0"])),
            Err(ConfigError::InvalidChunkSize { .. })
        ));
        assert!(matches!(
            MigrationConfig::from_args(args(&["--page-size", "0"])),
            Err(ConfigError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_root_path_must_not_end_with_slash() {
        let err = MigrationConfig::from_args(args(&["--target-root", "/Migrated/"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRootPath { .. }));

        let config = MigrationConfig::from_args(args(&["--target-root", "/Migrated"])).unwrap();
        assert_eq!(config.target_root, "/Migrated");
    }

    #[test]
    fn test_profile_requirements() {
        let err = MigrationConfig::from_args(args(&["--profile", "query"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { .. }));

        let err = MigrationConfig::from_args(args(&["--profile", "delta", "--query", "("])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidQuery { .. }));

        let err = MigrationConfig::from_args(args(&["--profile", "failed"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { .. }));

        let config = MigrationConfig::from_args(args(&["--profile", "rerun"])).unwrap();
        assert_eq!(config.profile, Profile::Folder);
    }

    #[test]
    fn test_move_requires_folder() {
        let err = MigrationConfig::from_args(args(&["--on-error", "move"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingActionFolder { .. }));

        let config =
            MigrationConfig::from_args(args(&["--on-success", "move", "--success-folder", "/Done"]))
                .unwrap();
        assert_eq!(config.on_success, SourceAction::Move("/Done".into()));
    }

    #[test]
    fn test_pairs() {
        let config = MigrationConfig::from_args(args(&[
            "--path-replace",
            "/Old=/New",
            "--namespace-prefix",
            "http://acme.com/model/1.0=acme",
        ]))
        .unwrap();
        assert_eq!(config.path_replacements, vec![("/Old".to_string(), "/New".to_string())]);
        assert_eq!(
            config.namespace_prefixes.get("http://acme.com/model/1.0").map(String::as_str),
            Some("acme")
        );

        let err = MigrationConfig::from_args(args(&["--path-replace", "nothing"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPair { .. }));
    }

    #[test]
    fn test_skip_and_replace_conflict() {
        let result = CliArgs::try_parse_from(["doc-migrator", "/s", "/d", "--skip-existing", "--replace-existing"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rules() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"kind":"property","properties":["cm:created"],"levels":0,"include_last_level":true,"date_format":"%Y/%m"}}]"#
        )
        .unwrap();
        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 1);

        let mut bad = NamedTempFile::new().unwrap();
        write!(
            bad,
            r#"[{{"kind":"property","properties":["cm:created"],"date_format":"%Q"}}]"#
        )
        .unwrap();
        assert!(matches!(load_rules(bad.path()), Err(ConfigError::InvalidDateFormat { .. })));
    }
}
