//! Session controller (C11): binds a host instance to C4, constructs C7
//! with C8's toolset, routes user turns, and tears down in a deterministic
//! order.
//!
//! Grounded on `omega_agent_napari.py`'s construction of the napari
//! `initialize_omega_agent`/`OmegaAgent` wiring: one bridge, one toolset,
//! one agent per session, system prompt templated from personality/didactic
//! switches that are passed in programmatically rather than read from a CLI
//! (spec §6 "The core has no CLI").

use crate::agent::Agent;
use crate::bridge::HostBridge;
use crate::hooks::Hooks;
use crate::host::{ChatEvent, HostHandle};
use crate::llm::Llm;
use crate::peer::discovery::{self, PeerDirectory};
use crate::peer::transfer::{AcceptCallback, CodeMessage, TransferServer};
use crate::registry::ToolRegistry;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle as TokioJoinHandle;

/// Session-level switches passed in programmatically (spec §6): personality
/// and didactic mode shape the system prompt; the rest gate optional tools
/// and code-repair behaviour elsewhere in the toolset construction.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub personality: String,
    pub didactic_mode: bool,
    pub main_model: String,
    pub tool_model: String,
    pub main_temperature: f32,
    pub tool_temperature: f32,
    pub max_tool_iterations: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            personality: "a helpful, precise scientific imaging assistant".to_string(),
            didactic_mode: false,
            main_model: "default".to_string(),
            tool_model: "default".to_string(),
            main_temperature: 0.0,
            tool_temperature: 0.0,
            max_tool_iterations: 10,
        }
    }
}

/// Builds the C7 system prompt from personality and didactic-mode switches.
fn build_system_prompt(options: &SessionOptions) -> String {
    let mut prompt = format!(
        "You are Omega, {}. You help the user drive a scientific image viewer \
         by converting their requests into actions, using the tools available to you.",
        options.personality
    );
    if options.didactic_mode {
        prompt.push_str(
            " Explain your reasoning step by step before acting, so the user can follow \
             and learn from what you do.",
        );
    }
    prompt
}

/// Handles to the background workers a session owns, so teardown can join
/// them in a defined order.
struct PeerServices {
    directory: PeerDirectory,
    beacon_running: Arc<AtomicBool>,
    listener_running: Arc<AtomicBool>,
    beacon: TokioJoinHandle<()>,
    listener: TokioJoinHandle<()>,
    transfer_server: Option<TcpServerHandle>,
}

struct TcpServerHandle {
    port: u16,
    running: Arc<AtomicBool>,
    task: TokioJoinHandle<()>,
}

/// Owns one session's C4 bridge, C7 agent, and C9/C10 peer services, and
/// tears them all down in order: agent → toolset → bridge → peer services
/// (spec §4.11).
pub struct Session {
    agent: Agent,
    bridge: HostBridge,
    bridge_worker: Option<JoinHandle<()>>,
    peer: Option<PeerServices>,
}

impl Session {
    /// Constructs a session bound to `host`, with `tools` already assembled
    /// by the caller via [`ToolRegistry`].
    pub fn new<H>(host: H, options: &SessionOptions, tools: ToolRegistry, llm: Arc<Llm>) -> Self
    where
        H: HostHandle + 'static,
    {
        let (bridge, bridge_worker) = HostBridge::spawn(host);
        let system_prompt = build_system_prompt(options);
        let agent = Agent::with_activity_callback(
            llm,
            options.main_model.clone(),
            system_prompt,
            options.main_temperature,
            tools.toolset(),
            Hooks::new(),
            options.max_tool_iterations,
            tools.activity_callback(),
        );

        Self {
            agent,
            bridge,
            bridge_worker: Some(bridge_worker),
            peer: None,
        }
    }

    /// Starts C9 (discovery) and C10 (transfer), so peers on the local
    /// network can see and drop code into this session.
    pub async fn start_peer_services(
        &mut self,
        username: String,
        hostname: String,
        accept: AcceptCallback,
        on_message: impl Fn(CodeMessage) + Send + 'static,
    ) -> Result<()> {
        let transfer_server = TransferServer::bind().await?;
        let tcp_port = transfer_server.port();
        let server_running = Arc::new(AtomicBool::new(true));
        let server_running_task = server_running.clone();
        let transfer_task = tokio::spawn(async move {
            let _ = transfer_server.serve(accept, on_message).await;
            server_running_task.store(false, Ordering::SeqCst);
        });

        let groups = discovery::default_groups();
        let directory = PeerDirectory::new();

        let beacon_running = Arc::new(AtomicBool::new(true));
        let beacon_task = tokio::spawn(discovery::run_beacon(
            username,
            hostname,
            tcp_port,
            groups.clone(),
            Duration::from_secs(crate::config::DEFAULT_BEACON_INTERVAL_SECS),
            beacon_running.clone(),
        ));
        let beacon = tokio::spawn(async move {
            let _ = beacon_task.await;
        });

        let listener_running = Arc::new(AtomicBool::new(true));
        let listener_directory = directory.clone();
        let listener_running_task = listener_running.clone();
        let listener_task = tokio::spawn(discovery::run_listener(
            groups,
            listener_directory,
            listener_running_task,
        ));
        let listener = tokio::spawn(async move {
            let _ = listener_task.await;
        });

        self.peer = Some(PeerServices {
            directory,
            beacon_running,
            listener_running,
            beacon,
            listener,
            transfer_server: Some(TcpServerHandle {
                port: tcp_port,
                running: server_running,
                task: transfer_task,
            }),
        });
        Ok(())
    }

    /// The directory of peers discovered so far, if C9 is running.
    pub fn peer_directory(&self) -> Option<PeerDirectory> {
        self.peer.as_ref().map(|p| p.directory.clone())
    }

    /// Routes one user turn through C7, streaming events to `events`.
    pub async fn handle_turn(
        &mut self,
        user_text: &str,
        events: &UnboundedSender<ChatEvent>,
    ) -> Result<String> {
        self.agent.run_turn(user_text, events).await
    }

    /// Cancellation handle for the in-progress turn, shared with C7.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.agent.cancellation_handle()
    }

    /// Tears the session down in order: agent (cancel in-flight turn) →
    /// toolset (dropped with `self`) → bridge (sentinel + join) → peer
    /// services (stop flags + task abort), per spec §4.11.
    pub async fn shutdown(mut self) {
        self.agent.cancellation_handle().store(true, Ordering::SeqCst);

        self.bridge.shutdown();
        if let Some(worker) = self.bridge_worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }

        if let Some(peer) = self.peer.take() {
            peer.beacon_running.store(false, Ordering::SeqCst);
            peer.listener_running.store(false, Ordering::SeqCst);
            peer.beacon.abort();
            peer.listener.abort();
            if let Some(server) = peer.transfer_server {
                server.running.store(false, Ordering::SeqCst);
                server.task.abort();
                log::debug!("stopped peer transfer server on port {}", server.port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Llm;

    struct TestHost;
    impl HostHandle for TestHost {
        fn describe(&self) -> String {
            "test-host".to_string()
        }
    }

    #[test]
    fn default_system_prompt_omits_didactic_clause() {
        let options = SessionOptions::default();
        let prompt = build_system_prompt(&options);
        assert!(!prompt.contains("step by step"));
    }

    #[test]
    fn didactic_mode_appends_explanatory_clause() {
        let options = SessionOptions {
            didactic_mode: true,
            ..Default::default()
        };
        let prompt = build_system_prompt(&options);
        assert!(prompt.contains("step by step"));
    }

    #[tokio::test]
    async fn session_tears_down_bridge_worker_on_shutdown() {
        let llm = Arc::new(Llm::new("http://localhost:1234/v1", "key").unwrap());
        let options = SessionOptions::default();
        let session = Session::new(TestHost, &options, ToolRegistry::new(), llm);
        session.shutdown().await;
    }
}
