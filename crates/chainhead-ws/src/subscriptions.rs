//! `eth_subscribe` wire format: request builders, log filters and
//! notification routing.

use serde_json::{json, Value};

use chainhead_core::job::Job;
use chainhead_core::types::BlockMarker;

/// A subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a connection is subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionKind {
    NewHeads,
    /// Logs matching a filter object.
    Logs(Value),
}

impl SubscriptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::Logs(_) => "logs",
        }
    }

    /// The `params` array for `eth_subscribe`.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Self::NewHeads => vec![json!("newHeads")],
            Self::Logs(filter) => vec![json!("logs"), filter.clone()],
        }
    }
}

pub(crate) fn subscribe_request(id: u64, kind: &SubscriptionKind) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_subscribe",
        "params": kind.params(),
    })
}

pub(crate) fn unsubscribe_request(id: u64, sub: &SubscriptionId) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "eth_unsubscribe",
        "params": [sub.0],
    })
}

/// Build the `logs` filter for a job's log initiators.
///
/// Addresses and topic[0] values of every log initiator are OR-ed together.
/// `fromBlock` is set from `from` for nodes that honour it on subscriptions.
pub fn log_filter(job: &Job, from: Option<&BlockMarker>) -> Value {
    let mut addresses = vec![];
    let mut topics = vec![];
    for initiator in job.log_initiators() {
        if let Some(address) = &initiator.address {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }
        for topic in &initiator.topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
    }

    let mut filter = json!({});
    if !addresses.is_empty() {
        filter["address"] = json!(addresses);
    }
    if !topics.is_empty() {
        filter["topics"] = json!([topics]);
    }
    if let Some(marker) = from {
        filter["fromBlock"] = json!(format!("0x{}", marker.number.to_str_radix(16)));
    }
    filter
}

/// A parsed inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    /// Response to the request with this id.
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    /// `eth_subscription` push for `subscription`.
    Notification {
        subscription: SubscriptionId,
        result: Value,
    },
}

pub(crate) fn parse_inbound(text: &str) -> Option<Inbound> {
    let val: Value = serde_json::from_str(text).ok()?;

    if val.get("method").and_then(Value::as_str) == Some("eth_subscription") {
        let params = val.get("params")?;
        let subscription = params.get("subscription")?.as_str()?.to_string();
        return Some(Inbound::Notification {
            subscription: SubscriptionId(subscription),
            result: params.get("result").cloned().unwrap_or(Value::Null),
        });
    }

    let id = val.get("id")?.as_u64()?;
    let result = match val.get("error") {
        Some(err) => Err(err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string())),
        None => Ok(val.get("result").cloned().unwrap_or(Value::Null)),
    };
    Some(Inbound::Response { id, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhead_core::job::{Initiator, InitiatorKind};

    #[test]
    fn new_heads_request_shape() {
        let req = subscribe_request(1, &SubscriptionKind::NewHeads);
        assert_eq!(req["method"], "eth_subscribe");
        assert_eq!(req["params"], json!(["newHeads"]));
        assert_eq!(req["id"], 1);
    }

    #[test]
    fn log_filter_merges_initiators() {
        let mut with_topic = Initiator::log(InitiatorKind::RunLog, "0xaaa");
        with_topic.topics = vec!["0xt1".into()];
        let job = Job::new(
            "job",
            vec![
                with_topic,
                Initiator::log(InitiatorKind::EthLog, "0xbbb"),
                Initiator::log(InitiatorKind::EthLog, "0xaaa"),
                Initiator::new(InitiatorKind::Web),
            ],
        );

        let filter = log_filter(&job, Some(&BlockMarker::new(255u32, "0xh")));
        assert_eq!(filter["address"], json!(["0xaaa", "0xbbb"]));
        assert_eq!(filter["topics"], json!([["0xt1"]]));
        assert_eq!(filter["fromBlock"], "0xff");
    }

    #[test]
    fn log_filter_without_marker_omits_from_block() {
        let job = Job::new("job", vec![Initiator::log(InitiatorKind::EthLog, "0xaaa")]);
        let filter = log_filter(&job, None);
        assert!(filter.get("fromBlock").is_none());
        assert!(filter.get("topics").is_none());
    }

    #[test]
    fn parses_subscription_notification() {
        let text = r#"{"jsonrpc":"2.0","method":"eth_subscription",
            "params":{"subscription":"0xcd0c","result":{"number":"0x1b4","hash":"0xab"}}}"#;
        match parse_inbound(text) {
            Some(Inbound::Notification {
                subscription,
                result,
            }) => {
                assert_eq!(subscription, SubscriptionId("0xcd0c".into()));
                assert_eq!(result["number"], "0x1b4");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_responses_and_errors() {
        assert_eq!(
            parse_inbound(r#"{"jsonrpc":"2.0","id":1,"result":"0x9ce5"}"#),
            Some(Inbound::Response {
                id: 1,
                result: Ok(json!("0x9ce5"))
            })
        );
        assert_eq!(
            parse_inbound(
                r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"notifications not supported"}}"#
            ),
            Some(Inbound::Response {
                id: 2,
                result: Err("notifications not supported".into())
            })
        );
        assert_eq!(parse_inbound("not json"), None);
    }
}
