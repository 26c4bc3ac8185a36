//! Contract Net wire protocol.
//!
//! Four message kinds travel over the bus, each on its own topic family:
//!
//! - [`CallForProposal`]: supervisor → machines, per job type
//! - [`Proposal`]: machines → supervisor
//! - [`Accept`]: supervisor → one machine, addressed by topic
//! - [`Done`]: machine → supervisor and observers
//!
//! [`Inbound::decode`] turns a raw [`BusMessage`] into a typed message using
//! the topic to pick the schema.

pub mod messages;
pub mod topics;

pub use messages::{
    new_job_id, now_s, Accept, CallForProposal, Done, Job, JobId, Proposal, WireMessage,
};
pub use topics::{topic_matches, TopicKind, Topics};

use crate::bus::BusMessage;
use crate::error::{CnpError, Result};

/// A decoded protocol message together with its routing information.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    CallForProposal(CallForProposal),
    Proposal(Proposal),
    Accept { machine_id: String, accept: Accept },
    Done(Done),
}

impl Inbound {
    pub fn decode(topics: &Topics, msg: &BusMessage) -> Result<Self> {
        let topic = msg.topic.as_str();
        match topics.classify(topic) {
            Some(TopicKind::CallForProposal(_)) => Ok(Inbound::CallForProposal(
                CallForProposal::decode(topic, &msg.payload)?,
            )),
            Some(TopicKind::Proposals) => {
                Ok(Inbound::Proposal(Proposal::decode(topic, &msg.payload)?))
            }
            Some(TopicKind::Accept(machine_id)) => Ok(Inbound::Accept {
                machine_id: machine_id.to_string(),
                accept: Accept::decode(topic, &msg.payload)?,
            }),
            Some(TopicKind::Done) => Ok(Inbound::Done(Done::decode(topic, &msg.payload)?)),
            None => Err(CnpError::decode(topic, "not a protocol topic")),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Inbound::CallForProposal(cfp) => &cfp.job_id,
            Inbound::Proposal(p) => &p.job_id,
            Inbound::Accept { accept, .. } => &accept.job_id,
            Inbound::Done(d) => &d.job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> BusMessage {
        BusMessage::new(topic, payload.as_bytes().to_vec())
    }

    #[test]
    fn decode_by_topic() {
        let topics = Topics::default();

        let inbound = Inbound::decode(
            &topics,
            &msg("lab/cnp/accept/M1", r#"{"job_id":"abc","job_type":"cut"}"#),
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Accept {
                machine_id: "M1".to_string(),
                accept: Accept {
                    job_id: "abc".to_string(),
                    job_type: "cut".to_string()
                }
            }
        );
        assert_eq!(inbound.job_id(), "abc");

        let inbound = Inbound::decode(
            &topics,
            &msg(
                "lab/cnp/cfp/cut",
                r#"{"job_id":"abc","job_type":"cut","deadline_s":1.0,"issued_at":2.0}"#,
            ),
        )
        .unwrap();
        assert!(matches!(inbound, Inbound::CallForProposal(ref c) if c.deadline_s == 1.0));
    }

    #[test]
    fn schema_follows_topic() {
        let topics = Topics::default();
        // An Accept payload published on the proposals topic is missing fields.
        let err = Inbound::decode(
            &topics,
            &msg("lab/cnp/proposals", r#"{"job_id":"abc","job_type":"cut"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, CnpError::Decode { .. }));
    }

    #[test]
    fn unknown_topic_is_a_decode_error() {
        let topics = Topics::default();
        let err = Inbound::decode(&topics, &msg("sensors/temp", "21.5")).unwrap_err();
        assert!(matches!(err, CnpError::Decode { ref topic, .. } if topic == "sensors/temp"));
    }
}
