//! Service manifest: the YAML document declaring agents and tasks.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level service description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub description: String,
    pub service_name: String,
    pub version: String,
    #[serde(default)]
    pub input_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One declared agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub remote_plugins: Vec<String>,
}

/// One pipeline step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub task_no: i64,
    #[serde(default)]
    pub description: String,
    pub instructions: String,
    pub agent: String,
}

impl ServiceManifest {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read, parse and validate a manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let manifest = Self::from_yaml_str(&text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// `(group, version)` parts of `apiVersion`
    pub fn api_version_parts(&self) -> Result<(&str, &str)> {
        match self.api_version.split_once('/') {
            Some((group, version))
                if !group.is_empty() && !version.is_empty() && !version.contains('/') =>
            {
                Ok((group, version))
            }
            _ => Err(Error::Configuration(format!(
                "invalid apiVersion format: {}",
                self.api_version
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("apiVersion", &self.api_version),
            ("kind", &self.kind),
            ("service_name", &self.service_name),
            ("version", &self.version),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(invalid(format!("{field} is required")));
        }
        self.api_version_parts()?;

        if self.spec.agents.is_empty() {
            return Err(invalid("at least one agent must be defined in spec.agents"));
        }
        if self.spec.tasks.is_empty() {
            return Err(invalid("at least one task must be defined in spec.tasks"));
        }

        let mut agent_names = HashSet::new();
        for (i, agent) in self.spec.agents.iter().enumerate() {
            if agent.name.is_empty() {
                return Err(invalid(format!("agent[{i}].name is required")));
            }
            if !agent_names.insert(agent.name.as_str()) {
                return Err(invalid(format!("duplicate agent name: {}", agent.name)));
            }
            if agent.model.is_empty() {
                return Err(invalid(format!("agent[{i}].model is required")));
            }
            if agent.system_prompt.is_empty() {
                return Err(invalid(format!("agent[{i}].system_prompt is required")));
            }
            if let Some(t) = agent.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(invalid(format!(
                        "agent[{i}].temperature must be between 0 and 2"
                    )));
                }
            }
        }

        let mut task_names = HashSet::new();
        let mut task_numbers = HashSet::new();
        for (i, task) in self.spec.tasks.iter().enumerate() {
            if task.name.is_empty() {
                return Err(invalid(format!("task[{i}].name is required")));
            }
            if !task_names.insert(task.name.as_str()) {
                return Err(invalid(format!("duplicate task name: {}", task.name)));
            }
            if task.task_no <= 0 {
                return Err(invalid(format!("task[{i}].task_no must be positive")));
            }
            if !task_numbers.insert(task.task_no) {
                return Err(invalid(format!("duplicate task number: {}", task.task_no)));
            }
            if task.agent.is_empty() {
                return Err(invalid(format!("task[{i}].agent is required")));
            }
            if !agent_names.contains(task.agent.as_str()) {
                return Err(invalid(format!(
                    "task[{i}].agent references unknown agent: {}",
                    task.agent
                )));
            }
            if task.instructions.trim().is_empty() {
                return Err(invalid(format!("task[{i}].instructions is required")));
            }
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::Configuration(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: agents.example.com/v1
kind: Sequential
description: Summarize then translate
service_name: summarizer
version: "0.1"
input_type: BaseInput
spec:
  agents:
    - name: writer
      role: Writer
      model: gpt-4o-mini
      temperature: 0.2
      system_prompt: You write concise text.
      plugins: [math]
  tasks:
    - name: summarize
      task_no: 1
      description: Summarize the input
      instructions: Summarize {{ text }}
      agent: writer
    - name: translate
      task_no: 2
      instructions: Translate the summary to French
      agent: writer
"#;

    fn manifest() -> ServiceManifest {
        ServiceManifest::from_yaml_str(MANIFEST).unwrap()
    }

    #[test]
    fn parses_and_validates() {
        let m = manifest();
        m.validate().unwrap();
        assert_eq!(m.service_name, "summarizer");
        assert_eq!(m.api_version_parts().unwrap(), ("agents.example.com", "v1"));
        assert_eq!(m.spec.agents[0].plugins, vec!["math"]);
        assert!(m.spec.agents[0].remote_plugins.is_empty());
        assert_eq!(m.spec.tasks[1].task_no, 2);
    }

    #[test]
    fn rejects_bad_api_version() {
        let mut m = manifest();
        m.api_version = "v1".into();
        assert!(matches!(m.validate(), Err(Error::Configuration(_))));
        m.api_version = "a/b/c".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_unknown_agent_reference() {
        let mut m = manifest();
        m.spec.tasks[1].agent = "B".into();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("unknown agent: B"));
    }

    #[test]
    fn rejects_duplicate_task_numbers_and_names() {
        let mut m = manifest();
        m.spec.tasks[1].task_no = 1;
        assert!(m.validate().unwrap_err().to_string().contains("duplicate task number"));

        let mut m = manifest();
        m.spec.tasks[1].name = "summarize".into();
        assert!(m.validate().unwrap_err().to_string().contains("duplicate task name"));

        let mut m = manifest();
        m.spec.tasks[0].task_no = 0;
        assert!(m.validate().unwrap_err().to_string().contains("must be positive"));
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        let mut m = manifest();
        m.spec.agents[0].temperature = Some(2.5);
        assert!(m.validate().unwrap_err().to_string().contains("temperature"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.yaml");
        std::fs::write(&path, MANIFEST).unwrap();
        let m = ServiceManifest::load(&path).unwrap();
        assert_eq!(m.spec.tasks.len(), 2);
    }
}
