//! Built-in agent behaviours and the registry that maps descriptor types to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use cmap_core::{AclMessage, AgentDescriptor, LogTopic, Result};

use crate::agent::{AgentBehavior, AgentContext, AgentFactory};

/// Behaviours keyed by the descriptor's `type` field.
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn AgentBehavior>>,
    default: String,
}

impl BehaviorRegistry {
    /// Registry holding `echo`, `pingpong` and `idle`.
    pub fn builtin() -> Self {
        let mut registry = Self {
            behaviors: HashMap::new(),
            default: "idle".into(),
        };
        registry.register("echo", Arc::new(EchoBehavior));
        registry.register("pingpong", Arc::new(PingPongBehavior));
        registry.register("idle", Arc::new(IdleBehavior));
        registry
    }

    /// Behaviour used for unknown or empty types. Empty keeps the current one.
    pub fn with_default(mut self, name: &str) -> Self {
        if !name.is_empty() {
            self.default = name.to_string();
        }
        self
    }

    pub fn register(&mut self, name: impl Into<String>, behavior: Arc<dyn AgentBehavior>) {
        self.behaviors.insert(name.into(), behavior);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl AgentFactory for BehaviorRegistry {
    fn create(&self, descriptor: &AgentDescriptor) -> Arc<dyn AgentBehavior> {
        if let Some(b) = self.behaviors.get(&descriptor.agent_type) {
            return b.clone();
        }
        debug!(
            agent_id = descriptor.id,
            agent_type = %descriptor.agent_type,
            default = %self.default,
            "unknown agent type, using default behaviour"
        );
        self.behaviors
            .get(&self.default)
            .cloned()
            .unwrap_or_else(|| Arc::new(IdleBehavior))
    }
}

// ── Echo ───────────────────────────────────────────────────────

/// Replies to every message with the same content.
pub struct EchoBehavior;

#[async_trait]
impl AgentBehavior for EchoBehavior {
    async fn run(&self, mut ctx: AgentContext) -> Result<()> {
        while let Some(msg) = ctx.recv().await {
            if msg.is_custom() {
                ctx.log(LogTopic::App, "custom update", msg.content);
                continue;
            }
            ctx.send(msg.reply(msg.content.clone())).await?;
        }
        Ok(())
    }
}

// ── Ping-pong ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PingPongSettings {
    delay_ms: u64,
    rounds: u32,
}

impl Default for PingPongSettings {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            rounds: 10,
        }
    }
}

/// Benchmark pair: agent `n` opens towards agent `(n + 1) % 2` and both
/// answer until they have replied `rounds` times.
///
/// The descriptor's custom blob may set `delay_ms` and `rounds`.
pub struct PingPongBehavior;

#[async_trait]
impl AgentBehavior for PingPongBehavior {
    async fn run(&self, mut ctx: AgentContext) -> Result<()> {
        let settings: PingPongSettings =
            serde_json::from_str(&ctx.descriptor().custom).unwrap_or_default();
        if settings.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(settings.delay_ms)).await;
        }

        let id = ctx.id();
        let partner = (id + 1) % 2;
        ctx.send(AclMessage::new(id, partner, format!("msg from {id}")))
            .await?;
        ctx.log(LogTopic::App, format!("agent{id}"), "");

        let mut answered = 0;
        while let Some(msg) = ctx.recv().await {
            if msg.is_custom() {
                continue;
            }
            ctx.record("received", 1.0);
            ctx.log(LogTopic::App, "received", msg.content.clone());
            if answered < settings.rounds {
                answered += 1;
                ctx.send(msg.reply(format!("msg from {id}"))).await?;
            }
        }
        Ok(())
    }
}

// ── Idle ───────────────────────────────────────────────────────

/// Consumes its inbox and does nothing else.
pub struct IdleBehavior;

#[async_trait]
impl AgentBehavior for IdleBehavior {
    async fn run(&self, mut ctx: AgentContext) -> Result<()> {
        while let Some(msg) = ctx.recv().await {
            ctx.log(LogTopic::Debug, "message ignored", msg.content);
        }
        Ok(())
    }
}
