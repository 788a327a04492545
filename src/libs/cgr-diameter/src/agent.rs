//! Diameter charging agent
//!
//! Accepts peer connections, answers the base protocol and runs every
//! application request through the configured request processors:
//!
//! ```text
//! TCP accept -> DiameterPeer (CER/DWR/DPR)
//!            -> handle_message (one task per request)
//!               -> DiameterDataProvider (*req)
//!               -> process_request per processor -> SessionService
//!               -> update_message_from_tree (*rep) -> answer
//!            -> writer task (one per connection)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cgr_agent::{
    compile_templates, process_request, AgentRequest, AgentResult, DataMap, FcTemplate, FilterS,
    RequestProcessor, SessionService,
};
use tokio::sync::{mpsc, Semaphore};

use crate::config::{CgrConfig, GeneralConfig, ERR_TEMPLATE};
use crate::dict::Dictionary;
use crate::error::{DiameterError, DiameterResult, ResultCode};
use crate::message::{DiameterMessage, BASE_APPLICATION_ID};
use crate::peer::{DiameterPeer, LocalPeer, PeerAction};
use crate::reader::DiameterDataProvider;
use crate::transport::{is_closed, DiameterListener, DiameterTransport};
use crate::writer::update_message_from_tree;

/// Answers queued per connection before request tasks wait on the writer
const ANSWER_QUEUE: usize = 256;
/// How often the accept loop checks the running flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Request variables seeded into `*vars`
pub mod var_names {
    pub const ORIGIN_HOST: &str = "OriginHost";
    pub const ORIGIN_REALM: &str = "OriginRealm";
    pub const PRODUCT_NAME: &str = "ProductName";
    pub const APP: &str = "*app";
    pub const APP_ID: &str = "*appid";
    pub const CMD: &str = "*cmd";
    pub const REMOTE_HOST: &str = "RemoteHost";
}

/// Diameter agent shared by every connection task
pub struct DiameterAgent {
    general: GeneralConfig,
    dict: Arc<Dictionary>,
    processors: Vec<RequestProcessor>,
    err_template: Vec<FcTemplate>,
    filter_s: Arc<dyn FilterS>,
    sessions: Arc<dyn SessionService>,
    limiter: Option<Semaphore>,
    local: LocalPeer,
}

impl DiameterAgent {
    /// Compile the configuration into a ready agent
    pub fn new(
        cfg: &CgrConfig,
        dict: Arc<Dictionary>,
        sessions: Arc<dyn SessionService>,
    ) -> DiameterResult<Self> {
        let agent_cfg = &cfg.diameter_agent;
        let sets = agent_cfg.template_sets();
        let err_template = match sets.get(ERR_TEMPLATE) {
            Some(tpl) => compile_templates(tpl, &sets)?,
            None => Vec::new(),
        };

        let mut local = LocalPeer::new(&agent_cfg.origin_host, &agent_cfg.origin_realm);
        local.vendor_id = agent_cfg.vendor_id;
        local.product_name = agent_cfg.product_name.clone();
        local.host_ip = agent_cfg
            .listen_addr()
            .ok()
            .map(|a| a.ip())
            .filter(|ip| !ip.is_unspecified());
        local.auth_application_ids = dict
            .application_ids()
            .filter(|id| *id != BASE_APPLICATION_ID)
            .collect();

        Ok(Self {
            general: cfg.general.clone(),
            processors: agent_cfg.compile_processors()?,
            err_template,
            filter_s: Arc::new(cfg.filter_s()?),
            sessions,
            limiter: usize::try_from(agent_cfg.concurrent_requests)
                .ok()
                .filter(|n| *n > 0)
                .map(Semaphore::new),
            local,
            dict,
        })
    }

    pub fn local_peer(&self) -> &LocalPeer {
        &self.local
    }

    /// Accept connections until `running` turns false
    pub async fn serve(self: Arc<Self>, listener: DiameterListener, running: Arc<AtomicBool>) -> DiameterResult<()> {
        log::info!("Diameter agent listening on {}", listener.local_addr()?);
        let mut poll = tokio::time::interval(SHUTDOWN_POLL);
        while running.load(Ordering::SeqCst) {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(transport) => {
                        let agent = Arc::clone(&self);
                        tokio::spawn(async move { agent.handle_connection(transport).await });
                    }
                    Err(e) => log::warn!("Failed to accept Diameter connection: {e}"),
                },
                _ = poll.tick() => {}
            }
        }
        log::info!("Diameter agent stopped accepting connections");
        Ok(())
    }

    /// Serve one peer connection until it closes
    pub async fn handle_connection(self: Arc<Self>, transport: DiameterTransport) {
        let remote = transport.peer_addr();
        log::debug!("Accepted Diameter connection from {remote}");
        let (mut reader, mut writer) = transport.into_split();
        let (tx, mut rx) = mpsc::channel::<DiameterMessage>(ANSWER_QUEUE);

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = writer.send(&msg).await {
                    log::warn!("Failed to write answer to {remote}: {e}");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut peer = DiameterPeer::new_responder(self.local.clone());
        loop {
            let msg = match reader.recv().await {
                Ok(msg) => msg,
                Err(e) if is_closed(&e) => {
                    log::debug!("Peer {remote} closed the connection");
                    break;
                }
                Err(e) => {
                    log::warn!("Dropping connection from {remote}: {e}");
                    break;
                }
            };
            match peer.handle(msg) {
                Ok(PeerAction::Answer(answer)) => {
                    if tx.send(answer).await.is_err() {
                        break;
                    }
                }
                Ok(PeerAction::AnswerAndClose(answer)) => {
                    let _ = tx.send(answer).await;
                    break;
                }
                Ok(PeerAction::Dispatch(request)) => {
                    let agent = Arc::clone(&self);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let answer = agent.handle_message(request, Some(remote)).await;
                        if tx.send(answer).await.is_err() {
                            log::warn!("Connection to {remote} closed before the answer was sent");
                        }
                    });
                }
                Ok(PeerAction::Ignore) => {}
                Err(e) => {
                    log::warn!("Peer {remote}: {e}");
                    break;
                }
            }
        }

        drop(tx);
        let _ = writer_task.await;
    }

    /// Build the answer for one application request
    ///
    /// Always yields exactly one answer; failures turn into error answers.
    pub async fn handle_message(&self, msg: DiameterMessage, remote: Option<SocketAddr>) -> DiameterMessage {
        let app_id = msg.header.application_id;
        let Some(app) = self.dict.app(app_id) else {
            log::warn!("No dictionary for application {app_id}, message: {msg:?}");
            return self.bare_error(&msg, ResultCode::NoCommonApplication);
        };
        let cmd = match self.dict.find_command(app_id, msg.header.command_code) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("Application {app_id}: {e}");
                return self.bare_error(&msg, ResultCode::CommandUnsupported);
            }
        };

        let mut vars = DataMap::new();
        let seeded = [
            (var_names::ORIGIN_HOST, self.local.origin_host.clone()),
            (var_names::ORIGIN_REALM, self.local.origin_realm.clone()),
            (var_names::PRODUCT_NAME, self.local.product_name.clone()),
            (var_names::APP, app.name.clone()),
            (var_names::CMD, format!("{}R", cmd.short)),
            (var_names::REMOTE_HOST, remote.map(|r| r.to_string()).unwrap_or_default()),
        ];
        for (name, value) in seeded {
            if let Err(e) = vars.set_field(name, value) {
                log::error!("Cannot seed request variable {name}: {e}");
            }
        }
        if let Err(e) = vars.set_field(var_names::APP_ID, u64::from(app_id)) {
            log::error!("Cannot seed request variable {}: {e}", var_names::APP_ID);
        }

        let dp = Arc::new(DiameterDataProvider::new(msg.clone(), Arc::clone(&self.dict), remote));

        let _permit = match &self.limiter {
            Some(limiter) => match limiter.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    log::error!("Denying request, maximum active requests reached, message: {msg:?}");
                    return self.error_answer(&msg, &dp, vars, ResultCode::TooBusy);
                }
            },
            None => None,
        };

        match self.run_processors(&dp, &mut vars).await {
            Ok(Some(reply)) => {
                let mut answer = DiameterMessage::new_answer(&msg);
                match update_message_from_tree(&mut answer, &self.dict, &reply, &self.general.default_timezone) {
                    Ok(()) => answer,
                    Err(e) => {
                        log::error!("Cannot encode reply {}: {e}", reply_summary(&reply));
                        self.error_answer(&msg, &dp, vars, ResultCode::UnableToComply)
                    }
                }
            }
            Ok(None) => {
                log::warn!("No request processor enabled, ignoring message: {:?}", dp.message());
                self.error_answer(&msg, &dp, vars, ResultCode::UnableToComply)
            }
            Err(e) => {
                log::error!("Error processing message: {e}");
                self.error_answer(&msg, &dp, vars, ResultCode::UnableToComply)
            }
        }
    }

    /// Run the processors in order; `None` when none handled the request
    async fn run_processors(
        &self,
        dp: &Arc<DiameterDataProvider>,
        vars: &mut DataMap,
    ) -> AgentResult<Option<DataMap>> {
        let mut reply = DataMap::new();
        let mut processed = false;
        for processor in &self.processors {
            let mut ar = AgentRequest::new(
                Box::new(Arc::clone(dp)),
                std::mem::take(vars),
                reply,
                self.general.default_tenant.as_str(),
                processor.timezone(&self.general.default_timezone),
                Arc::clone(&self.filter_s),
            );
            let result = match processor.tenant(&ar, &self.general.default_tenant) {
                Ok(tenant) => {
                    ar.tenant = tenant;
                    process_request(processor, &mut ar, self.sessions.as_ref()).await
                }
                Err(e) => Err(e),
            };
            *vars = std::mem::take(&mut ar.vars);
            reply = ar.into_reply();

            if result? {
                processed = true;
                if !processor.continues() {
                    break;
                }
            }
        }
        Ok(processed.then_some(reply))
    }

    /// Error answer built from the `*err` template, falling back to a bare
    /// answer when the template cannot be applied
    fn error_answer(
        &self,
        msg: &DiameterMessage,
        dp: &Arc<DiameterDataProvider>,
        vars: DataMap,
        code: ResultCode,
    ) -> DiameterMessage {
        let mut ar = AgentRequest::new(
            Box::new(Arc::clone(dp)),
            vars,
            DataMap::new(),
            self.general.default_tenant.as_str(),
            self.general.default_timezone.as_str(),
            Arc::clone(&self.filter_s),
        );
        let built = ar
            .set_fields(&self.err_template)
            .map_err(DiameterError::from)
            .and_then(|()| {
                let mut answer = DiameterMessage::answer_with_result(msg, code as u32);
                update_message_from_tree(&mut answer, &self.dict, &ar.reply, &self.general.default_timezone)
                    .map(|()| answer)
            });
        match built {
            Ok(mut answer) => {
                answer.header.set_error();
                answer
            }
            Err(e) => {
                log::error!("Cannot build {ERR_TEMPLATE} answer: {e}");
                self.bare_error(msg, code)
            }
        }
    }

    /// Answer with only Result-Code, Origin-Host and Origin-Realm
    fn bare_error(&self, msg: &DiameterMessage, code: ResultCode) -> DiameterMessage {
        let mut answer = self.local.answer(msg, code);
        answer.header.set_error();
        answer
    }
}

fn reply_summary(reply: &DataMap) -> String {
    reply
        .leaves()
        .iter()
        .map(|l| format!("{}={}", l.path.join("."), l.item.value))
        .collect::<Vec<_>>()
        .join(", ")
}
