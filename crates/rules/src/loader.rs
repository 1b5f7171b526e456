//! Filesystem loader for rule declarations.
//!
//! A declaration file is YAML with the instance `id`, the rule `kind` and
//! the kind's configuration keys:
//!
//! ```yaml
//! id: customer_invoices_count
//! kind: count_link
//! parent_collection: customer
//! parent_id_field: id
//! count_field: invoice_count
//! child_collection: invoice
//! foreign_key_field: customer_id
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

use crate::definition::RuleDeclaration;
use crate::error::{LoadResult, LoadStatus, Result, RuleError};

pub struct DeclarationLoader {
    rules_dir: PathBuf,
    declarations: RwLock<BTreeMap<String, RuleDeclaration>>,
}

impl DeclarationLoader {
    /// Create a loader for `rules_dir`, creating the directory if needed.
    pub fn new(rules_dir: PathBuf) -> Self {
        if !rules_dir.exists() {
            if let Err(e) = fs::create_dir_all(&rules_dir) {
                warn!(path = %rules_dir.display(), error = %e, "failed to create rules directory");
            }
        }
        Self {
            rules_dir,
            declarations: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Recursively scan the rules directory.
    ///
    /// Dotfiles and non-YAML files are skipped. A file that fails to parse
    /// is reported and the scan continues.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir(&self.rules_dir, &mut results)?;
        Ok(results)
    }

    fn scan_dir(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        let mut paths = entries
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        paths.sort();

        for path in paths {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                if path.is_file() {
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "dotfile".to_string(),
                        },
                    });
                }
                continue;
            }

            if path.is_dir() {
                self.scan_dir(&path, results)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yml" || e == "yaml");
            if !is_yaml {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok(declaration) => {
                    let rule_id = declaration.id.clone();
                    info!(rule_id = %rule_id, kind = %declaration.kind(), path = %path.display(), "loaded declaration");
                    self.declarations
                        .write()
                        .expect("declarations lock poisoned")
                        .insert(rule_id.clone(), declaration);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { rule_id },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load declaration");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }
        Ok(())
    }

    pub fn load_file(&self, path: &Path) -> Result<RuleDeclaration> {
        let contents = fs::read_to_string(path)?;
        let declaration: RuleDeclaration = serde_yaml::from_str(&contents)?;
        if declaration.id.trim().is_empty() {
            return Err(RuleError::InvalidDeclaration("id must not be empty".to_string()));
        }
        Ok(declaration)
    }

    /// Loaded declarations, ordered by id.
    pub fn declarations(&self) -> Vec<RuleDeclaration> {
        self.declarations
            .read()
            .expect("declarations lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Atomically write a declaration to `<id>.yml`.
    ///
    /// Writes a `.tmp` file first, then renames it over the final path.
    pub fn write_declaration(&self, declaration: &RuleDeclaration) -> Result<PathBuf> {
        let final_path = self.rules_dir.join(format!("{}.yml", declaration.id));
        let tmp_path = self.rules_dir.join(format!(".{}.tmp", declaration.id));

        let yaml = serde_yaml::to_string(declaration)?;
        fs::write(&tmp_path, yaml)?;
        fs::rename(&tmp_path, &final_path)?;

        info!(rule_id = %declaration.id, kind = %declaration.kind(), path = %final_path.display(), "wrote declaration");
        self.declarations
            .write()
            .expect("declarations lock poisoned")
            .insert(declaration.id.clone(), declaration.clone());
        Ok(final_path)
    }

    /// Delete the declaration file for `id` and forget it.
    pub fn delete_declaration(&self, id: &str) -> Result<()> {
        let candidates = [
            self.rules_dir.join(format!("{}.yml", id)),
            self.rules_dir.join(format!("{}.yaml", id)),
        ];
        let Some(path) = candidates.iter().find(|p| p.exists()) else {
            return Err(RuleError::InvalidDeclaration(format!(
                "no declaration file found for id '{}'",
                id
            )));
        };
        fs::remove_file(path)?;
        self.declarations
            .write()
            .expect("declarations lock poisoned")
            .remove(id);
        info!(rule_id = %id, "deleted declaration");
        Ok(())
    }
}
