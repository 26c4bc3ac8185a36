//! Topic layout of the protocol and MQTT-style filter matching.
//!
//! Every topic lives below a shared prefix (default `lab/cnp`):
//!
//! | Purpose   | Topic                          |
//! |-----------|--------------------------------|
//! | CfP       | `<prefix>/cfp/<job_type>`      |
//! | Proposals | `<prefix>/proposals`           |
//! | Accept    | `<prefix>/accept/<machine_id>` |
//! | Done      | `<prefix>/done`                |
//!
//! Accept topics carry the addressing: a machine subscribes only to its own.

use crate::error::{CnpError, Result};

/// Which protocol channel a concrete topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    CallForProposal(&'a str),
    Proposals,
    Accept(&'a str),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn cfp(&self, job_type: &str) -> String {
        format!("{}/cfp/{}", self.prefix, job_type)
    }

    /// Filter matching the CfP topic of every job type.
    pub fn cfp_all(&self) -> String {
        format!("{}/cfp/+", self.prefix)
    }

    pub fn proposals(&self) -> String {
        format!("{}/proposals", self.prefix)
    }

    pub fn accept(&self, machine_id: &str) -> String {
        format!("{}/accept/{}", self.prefix, machine_id)
    }

    pub fn accept_all(&self) -> String {
        format!("{}/accept/+", self.prefix)
    }

    pub fn done(&self) -> String {
        format!("{}/done", self.prefix)
    }

    /// Filter matching every protocol topic.
    pub fn all(&self) -> String {
        format!("{}/#", self.prefix)
    }

    pub fn classify<'a>(&self, topic: &'a str) -> Option<TopicKind<'a>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        match rest.split_once('/') {
            Some(("cfp", job_type)) if is_segment(job_type) => {
                Some(TopicKind::CallForProposal(job_type))
            }
            Some(("accept", machine_id)) if is_segment(machine_id) => {
                Some(TopicKind::Accept(machine_id))
            }
            None if rest == "proposals" => Some(TopicKind::Proposals),
            None if rest == "done" => Some(TopicKind::Done),
            _ => None,
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PREFIX)
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '+', '#'])
}

/// Job types and machine ids become a single topic level, so they must not
/// contain separators or wildcards.
pub fn validate_segment(s: &str) -> Result<()> {
    if is_segment(s) {
        Ok(())
    } else {
        Err(CnpError::Config(format!(
            "'{}' is not a valid topic segment (empty or contains '/', '+', '#')",
            s
        )))
    }
}

/// MQTT filter semantics: `+` matches exactly one level, a trailing `#`
/// matches the remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
