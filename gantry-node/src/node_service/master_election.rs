use crate::node_metrics::MASTER_ELECTION_STATE;
use async_trait::async_trait;
use gantry_core::envelope::{NodeId, NodeResponse};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Interval;
use tracing::{debug, info, warn};

/// A coordination invocation broadcast to the other nodes of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CoordinationRequest {
    /// Ask every peer to vote a master candidate for the group.
    ElectMaster { group: String },
    /// Ask every peer to stop routing sessions for the given route while
    /// it drains. The reply is a bare acknowledgement (void outcome).
    DrainSessions { route: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CoordinationReply {
    MasterVote { candidate: NodeId },
    Ack,
}

/// Transport seam to the other nodes. Replies come back as response
/// envelopes: a peer that failed the invocation is a recorded fault inside
/// its envelope, never an error raised here.
#[async_trait]
pub(crate) trait ClusterRpc: Send + Sync {
    async fn broadcast(
        &self,
        request: CoordinationRequest,
    ) -> Vec<NodeResponse<CoordinationReply>>;
}

/// Standalone transport for single-node deployments: no peers, so every
/// broadcast collects nothing and the local node elects itself.
pub(crate) struct LoopbackRpc;

#[async_trait]
impl ClusterRpc for LoopbackRpc {
    async fn broadcast(
        &self,
        _request: CoordinationRequest,
    ) -> Vec<NodeResponse<CoordinationReply>> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MasterElectionState {
    NoMaster,
    Master,
    Member,
}

// One node per group acts as master for cluster-wide decisions. Each round
// collects the peers' votes as response envelopes; the lowest healthy node
// id (self included) wins. Envelopes carrying faults are logged and
// skipped, so a failing peer can never abort the round.
#[derive(Clone)]
pub(crate) struct MasterElection {
    node_id: NodeId,
    group: String,
    rpc: Arc<dyn ClusterRpc>,
    state: Arc<Mutex<MasterElectionState>>,
}

impl std::fmt::Debug for MasterElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterElection")
            .field("node_id", &self.node_id)
            .field("group", &self.group)
            .finish()
    }
}

impl MasterElection {
    pub(crate) fn new(node_id: NodeId, group: impl Into<String>, rpc: Arc<dyn ClusterRpc>) -> Self {
        MasterElection {
            node_id,
            group: group.into(),
            rpc,
            state: Arc::new(Mutex::new(MasterElectionState::NoMaster)),
        }
    }

    pub(crate) async fn start(&self, mut check_interval: Interval) {
        loop {
            self.run_round().await;
            check_interval.tick().await;
        }
    }

    pub(crate) async fn state(&self) -> MasterElectionState {
        let state = self.state.lock().await;
        state.clone()
    }

    async fn set_state(&self, new_state: MasterElectionState) {
        let mut state = self.state.lock().await;
        if *state != new_state {
            info!(node_id = %self.node_id, group = %self.group, ?new_state, "master election state changed");
            *state = new_state;
            // 0 = Member/NoMaster, 1 = Master
            let value = match *state {
                MasterElectionState::Master => 1.0,
                _ => 0.0,
            };
            gauge!(MASTER_ELECTION_STATE.name).set(value);
        }
    }

    /// One election round. Inspects each envelope explicitly; a peer whose
    /// envelope records a fault is simply not a candidate this round.
    pub(crate) async fn run_round(&self) {
        let responses = self
            .rpc
            .broadcast(CoordinationRequest::ElectMaster {
                group: self.group.clone(),
            })
            .await;

        let mut master = self.node_id.clone();
        for response in &responses {
            match response.result() {
                Some(CoordinationReply::MasterVote { candidate }) => {
                    if *candidate < master {
                        master = candidate.clone();
                    }
                }
                Some(CoordinationReply::Ack) => {
                    debug!(sender = %response.sender(), "unexpected ack in election round");
                }
                None => {
                    if let Some(fault) = response.fault() {
                        warn!(
                            sender = %response.sender(),
                            fault = %fault,
                            "peer failed the election round"
                        );
                    } else {
                        debug!(sender = %response.sender(), "peer returned no outcome");
                    }
                }
            }
        }

        if master == self.node_id {
            self.set_state(MasterElectionState::Master).await;
        } else {
            self.set_state(MasterElectionState::Member).await;
        }
    }

    /// Ask every peer to stop routing sessions for `route`. Returns how
    /// many peers acknowledged; peers whose envelopes carry faults are
    /// logged and counted out, never raised.
    /// Called by the management layer when a route is taken out of rotation.
    #[allow(dead_code)]
    pub(crate) async fn drain_sessions(&self, route: &str) -> usize {
        let responses = self
            .rpc
            .broadcast(CoordinationRequest::DrainSessions {
                route: route.to_string(),
            })
            .await;

        let mut acknowledged = 0;
        for response in &responses {
            match response.result() {
                Some(CoordinationReply::Ack) => acknowledged += 1,
                Some(CoordinationReply::MasterVote { .. }) => {
                    debug!(sender = %response.sender(), "unexpected vote in drain round");
                }
                None => {
                    if let Some(fault) = response.fault() {
                        warn!(
                            sender = %response.sender(),
                            route,
                            fault = %fault,
                            "peer failed to drain sessions"
                        );
                    }
                }
            }
        }
        acknowledged
    }
}
