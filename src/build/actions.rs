//! Build-instructions document
//!
//! The installer runtime consumes a JSON document shaped as a tree of
//! actions: a hidden root group with one child per selected package, each
//! child carrying the literal package-manager install command.

use crate::error::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};

/// One package the visitor selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSelection {
    /// Package identifier passed to the package manager
    pub id: String,

    /// Human-readable display name
    pub name: String,
}

impl PackageSelection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One node of the instructions tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupAction {
    pub title: String,
    pub runner: String,
    pub error_action: String,
    pub execute_children_in_parallel: bool,
    pub hidden: bool,
    pub arguments: Vec<String>,
    pub scripts: Vec<SetupAction>,
}

/// Translate the selected packages into the root action document.
///
/// Rejects an empty selection before any I/O happens.
pub fn plan_install_actions(selections: &[PackageSelection]) -> ForgeResult<SetupAction> {
    if selections.is_empty() {
        return Err(ForgeError::EmptySelection);
    }

    Ok(SetupAction {
        title: "Selected applications".to_string(),
        runner: "group".to_string(),
        error_action: "Continue".to_string(),
        execute_children_in_parallel: false,
        hidden: true,
        arguments: vec![],
        scripts: selections
            .iter()
            .map(|selection| SetupAction {
                title: selection.name.clone(),
                runner: "winget".to_string(),
                error_action: "Continue".to_string(),
                execute_children_in_parallel: true,
                hidden: false,
                arguments: vec![install_command(&selection.id)],
                scripts: vec![],
            })
            .collect(),
    })
}

/// The literal install command for one package. The flag set is a
/// contract with the installer runtime; do not reorder.
fn install_command(id: &str) -> String {
    format!(
        "winget install --exact --id {id} --silent --accept-source-agreements \
         --accept-package-agreements --disable-interactivity --verbose-logs --include-unknown"
    )
}
