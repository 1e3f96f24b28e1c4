//! Rules file exchanged with the migration tool.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, io::Write, path::Path};
use tempfile::NamedTempFile;

use crate::error::Result;

/// Syntax node a rule applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    /// Any other selector keys, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TargetNode {
    /// Value of a selector key, looking at both the named fields and the
    /// pass-through map.
    pub fn selector(&self, key: &str) -> Option<&str> {
        match key {
            "method_name" => self.method_name.as_deref(),
            "containing_namespace" => self.containing_namespace.as_deref(),
            "containing_type" => self.containing_type.as_deref(),
            _ => self.extra.get(key).and_then(Value::as_str),
        }
    }
}

/// Transformation applied to matched nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRule {
    pub name: String,
    #[serde(default)]
    pub target_nodes: Vec<TargetNode>,
    pub action: RuleAction,
}

/// `{"rules": [...]}` document handed to the tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesFile {
    pub rules: Vec<MigrationRule>,
}

impl RulesFile {
    pub fn new(rules: Vec<MigrationRule>) -> Self {
        Self { rules }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the rules to a temporary file that is removed on drop.
    pub fn write_temp(&self) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("fleetbump-rules-")
            .suffix(".json")
            .tempfile()?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
        "rules": [
            {
                "name": "rename-serialize",
                "target_nodes": [
                    {
                        "type": "InvocationExpression",
                        "method_name": "SerializeObject",
                        "containing_type": "JsonConvert",
                        "argument_count": 2
                    }
                ],
                "action": { "type": "rename_method", "new_name": "Serialize" }
            }
        ]
    }"#;

    #[test]
    fn keeps_unknown_selector_keys() {
        let rules: RulesFile = serde_json::from_str(RULES).unwrap();
        let node = &rules.rules[0].target_nodes[0];

        assert_eq!(node.selector("method_name"), Some("SerializeObject"));
        assert_eq!(node.selector("containing_type"), Some("JsonConvert"));
        assert_eq!(node.extra.get("argument_count"), Some(&Value::from(2)));
        assert_eq!(node.selector("argument_count"), None);
        assert_eq!(
            rules.rules[0].action.extra.get("new_name"),
            Some(&Value::from("Serialize"))
        );
    }

    #[test]
    fn writes_and_loads_temp_file() {
        let rules: RulesFile = serde_json::from_str(RULES).unwrap();
        let file = rules.write_temp().unwrap();

        let loaded = RulesFile::load(file.path()).unwrap();
        assert_eq!(loaded, rules);

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap())
                .unwrap();
        assert_eq!(raw["rules"][0]["target_nodes"][0]["type"], "InvocationExpression");
        assert!(raw["rules"][0]["target_nodes"][0].get("containing_namespace").is_none());
    }
}
