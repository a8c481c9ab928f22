// SPDX-License-Identifier: Apache-2.0
//!
//! The in-memory half of the agent registry (§4.9, §5): which agents are
//! currently connected, how many live workers each one carries, and the
//! round-robin assignment policy. The orchestrator owns one of these and
//! is the only task that ever touches it, so no internal locking is
//! needed (§5's "owned by a single orchestrator task" shared-resource
//! note).

use std::collections::HashMap;

use aihub_model::{Agent, AiTool};
use aihub_protocol::HubCommand;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One connected agent: its cached record (for the assignment policy)
/// and the channel that forwards `HubCommand`s down its WebSocket link.
pub struct ConnectedAgent {
    pub agent: Agent,
    pub cmd_tx: mpsc::UnboundedSender<HubCommand>,
    pub live_workers: u32,
}

/// Tracks connected agents and picks one for a new or resumed session.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<Uuid, ConnectedAgent>,
    order: Vec<Uuid>,
    cursor: usize,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, agent: Agent, cmd_tx: mpsc::UnboundedSender<HubCommand>) {
        let id = agent.id;
        if !self.agents.contains_key(&id) {
            self.order.push(id);
        }
        self.agents.insert(
            id,
            ConnectedAgent {
                agent,
                cmd_tx,
                live_workers: 0,
            },
        );
    }

    pub fn disconnect(&mut self, agent_id: Uuid) -> Option<ConnectedAgent> {
        self.order.retain(|id| *id != agent_id);
        if self.cursor > self.order.len() {
            self.cursor = 0;
        }
        self.agents.remove(&agent_id)
    }

    pub fn get(&self, agent_id: Uuid) -> Option<&ConnectedAgent> {
        self.agents.get(&agent_id)
    }

    pub fn is_connected(&self, agent_id: Uuid) -> bool {
        self.agents.contains_key(&agent_id)
    }

    pub fn cmd_tx(&self, agent_id: Uuid) -> Option<mpsc::UnboundedSender<HubCommand>> {
        self.agents.get(&agent_id).map(|a| a.cmd_tx.clone())
    }

    pub fn mark_worker_started(&mut self, agent_id: Uuid) {
        if let Some(a) = self.agents.get_mut(&agent_id) {
            a.live_workers += 1;
        }
    }

    pub fn mark_worker_stopped(&mut self, agent_id: Uuid) {
        if let Some(a) = self.agents.get_mut(&agent_id) {
            a.live_workers = a.live_workers.saturating_sub(1);
        }
    }

    /// Round-robin within the eligible set (§4.9 assignment policy).
    /// Advances the cursor past whichever agent is picked so the next
    /// call starts after it, regardless of which candidate won this time.
    pub fn pick_agent(&mut self, tool: AiTool) -> Option<Uuid> {
        let n = self.order.len();
        if n == 0 {
            return None;
        }
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let agent_id = self.order[idx];
            if let Some(c) = self.agents.get(&agent_id) {
                if c.agent.can_accept(tool, c.live_workers) {
                    self.cursor = (idx + 1) % n;
                    return Some(agent_id);
                }
            }
        }
        None
    }

    pub fn snapshot(&self) -> Vec<Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id)).map(|c| c.agent.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aihub_model::AgentStatus;

    fn connected_agent(name: &str, max_workers: u32, tool: AiTool) -> Agent {
        let mut a = Agent::new(name, "secret", max_workers);
        a.status = AgentStatus::Connected;
        a.allowed_tools.push(tool);
        a
    }

    fn chan() -> mpsc::UnboundedSender<HubCommand> {
        mpsc::unbounded_channel().0
    }

    // ── Assignment policy ────────────────────────────────────────────────────

    #[test]
    fn picks_none_when_registry_is_empty() {
        let mut reg = AgentRegistry::new();
        assert!(reg.pick_agent(AiTool::Claude).is_none());
    }

    #[test]
    fn picks_agent_with_matching_tool_and_capacity() {
        let mut reg = AgentRegistry::new();
        let a = connected_agent("box-1", 2, AiTool::Claude);
        let id = a.id;
        reg.connect(a, chan());
        assert_eq!(reg.pick_agent(AiTool::Claude), Some(id));
    }

    #[test]
    fn skips_agent_without_the_requested_tool() {
        let mut reg = AgentRegistry::new();
        reg.connect(connected_agent("box-1", 2, AiTool::Cursor), chan());
        assert!(reg.pick_agent(AiTool::Claude).is_none());
    }

    #[test]
    fn skips_agent_at_capacity() {
        let mut reg = AgentRegistry::new();
        let a = connected_agent("box-1", 1, AiTool::Claude);
        let id = a.id;
        reg.connect(a, chan());
        reg.mark_worker_started(id);
        assert!(reg.pick_agent(AiTool::Claude).is_none());
    }

    #[test]
    fn round_robins_across_eligible_agents() {
        let mut reg = AgentRegistry::new();
        let a1 = connected_agent("box-1", 5, AiTool::Claude);
        let a2 = connected_agent("box-2", 5, AiTool::Claude);
        let (id1, id2) = (a1.id, a2.id);
        reg.connect(a1, chan());
        reg.connect(a2, chan());

        let first = reg.pick_agent(AiTool::Claude).unwrap();
        let second = reg.pick_agent(AiTool::Claude).unwrap();
        assert_ne!(first, second);
        assert!([id1, id2].contains(&first));
        assert!([id1, id2].contains(&second));
    }

    #[test]
    fn disconnect_removes_agent_from_rotation() {
        let mut reg = AgentRegistry::new();
        let a = connected_agent("box-1", 2, AiTool::Claude);
        let id = a.id;
        reg.connect(a, chan());
        assert!(reg.disconnect(id).is_some());
        assert!(reg.pick_agent(AiTool::Claude).is_none());
    }

    #[test]
    fn mark_worker_stopped_never_underflows() {
        let mut reg = AgentRegistry::new();
        let a = connected_agent("box-1", 2, AiTool::Claude);
        let id = a.id;
        reg.connect(a, chan());
        reg.mark_worker_stopped(id);
        assert_eq!(reg.get(id).unwrap().live_workers, 0);
    }
}
