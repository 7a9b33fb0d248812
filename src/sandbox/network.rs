//! Network policy and container bootstrap command.

use serde::{Deserialize, Serialize};

/// Network access policy for the sandbox container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    /// Outbound web ports only, with POST/PUT-shaped connections dropped
    #[default]
    WebOnly,
    /// No filtering
    AllowAll,
    /// No network at all
    Deny,
}

impl NetworkPolicy {
    /// Docker network mode override for this policy.
    pub(crate) fn network_mode(self) -> Option<String> {
        match self {
            Self::Deny => Some("none".to_string()),
            Self::WebOnly | Self::AllowAll => None,
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebOnly => write!(f, "web-only"),
            Self::AllowAll => write!(f, "allow-all"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// iptables rule dropping new outbound connections to `ports` that do not
/// open with a SYN. Best effort: it does not inspect HTTP methods.
pub(crate) fn egress_rule(ports: &[u16]) -> String {
    let ports = ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "iptables -A OUTPUT -p tcp -m multiport --dports {ports} -m conntrack --ctstate NEW \
         -m multiport --dports {ports} ! --syn -m comment --comment \"Block POST and PUT requests\" -j DROP"
    )
}

/// Shell script run as the container's main process: install the filter,
/// start the detached screen session, then keep the container alive.
pub(crate) fn bootstrap_script(policy: NetworkPolicy, ports: &[u16], session: &str) -> String {
    let session = shell_words::quote(session);
    let start_session = format!("screen -S {session} -dm && sleep infinity");

    match policy {
        NetworkPolicy::WebOnly if !ports.is_empty() => {
            format!("{} && {start_session}", egress_rule(ports))
        }
        _ => start_session,
    }
}

/// Argv for the container's command.
pub(crate) fn bootstrap_command(policy: NetworkPolicy, ports: &[u16], session: &str) -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        bootstrap_script(policy, ports, session),
    ]
}
