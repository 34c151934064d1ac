//! # Actor Identity
//!
//! An actor is addressed by its full name `group.project.generation.instanceId`.
//! The group is the routing unit ("send to any Merchant"), the full name is unique
//! per process instance.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROJECT: &str = "default";
pub const DEFAULT_GENERATION: &str = "1.0.0";

/// Wildcard target delivered to every listening actor.
pub const ALL_PARTICIPANTS: &str = "all";

/// Monitoring group that receives error reports.
pub const VICINITY_MONITOR: &str = "VicinityMonitor";

/// Identity of one running actor instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorIdentity {
    group: String,
    project: String,
    generation: String,
    instance_id: String,
}

impl ActorIdentity {
    /// Creates an identity with a fresh random instance id.
    pub fn generate(
        group: impl Into<String>,
        project: impl Into<String>,
        generation: impl Into<String>,
    ) -> Self {
        Self::with_instance(group, project, generation, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_instance(
        group: impl Into<String>,
        project: impl Into<String>,
        generation: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            project: project.into(),
            generation: generation.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Parses a full name back into its parts.
    ///
    /// The generation may itself contain dots (`1.0.2`), so the group and project are
    /// taken from the front and the instance id from the back.
    pub fn parse(name: &str) -> Option<Self> {
        let (group, rest) = name.split_once('.')?;
        let (project, rest) = rest.split_once('.')?;
        let (generation, instance_id) = rest.rsplit_once('.')?;
        if [group, project, generation, instance_id]
            .iter()
            .any(|part| part.is_empty())
        {
            return None;
        }
        Some(Self::with_instance(group, project, generation, instance_id))
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The full routable name.
    pub fn name(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.group, self.project, self.generation, self.instance_id
        )
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Group part of a target: `Merchant.default.1.0.2.abc` and `Merchant` both yield `Merchant`.
pub fn group_of(target: &str) -> &str {
    target.split('.').next().unwrap_or(target)
}

/// A target naming a role rather than an instance.
pub fn is_bare_group(target: &str) -> bool {
    !target.contains('.') && !target.eq_ignore_ascii_case(ALL_PARTICIPANTS)
}

/// Project segment of a full name, if the name is qualified.
pub fn project_of(name: &str) -> Option<&str> {
    let mut parts = name.split('.');
    parts.next()?;
    parts.next()
}
