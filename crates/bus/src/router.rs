use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::actions::{ActionContext, ActionTable, Origin};
use crate::correlation::CorrelationTable;
use crate::native::NativeChannel;
use crate::tabs::TabRegistry;
use tabwire_core::{Address, AddressBook, Config, Error, Message, Result};

/// Central dispatch: every inbound message, whatever transport it arrived
/// on, goes through `route_inbound`. Routing errors are logged here and
/// never escape to the calling loop.
pub struct Router {
    book: AddressBook,
    auto_open_tabs: bool,
    tab_url_template: String,
    request_timeout: Duration,
    tabs: Arc<TabRegistry>,
    correlations: Arc<CorrelationTable>,
    native: Arc<NativeChannel>,
    actions: ActionTable,
}

impl Router {
    pub fn new(
        config: &Config,
        tabs: Arc<TabRegistry>,
        correlations: Arc<CorrelationTable>,
        native: Arc<NativeChannel>,
        actions: ActionTable,
    ) -> Self {
        Self {
            book: AddressBook::from_config(&config.addresses),
            auto_open_tabs: config.bus.auto_open_tabs,
            tab_url_template: config.bus.tab_url_template.clone(),
            request_timeout: Duration::from_millis(config.bus.request_timeout_ms),
            tabs,
            correlations,
            native,
            actions,
        }
    }

    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.correlations
    }

    pub fn tabs(&self) -> &Arc<TabRegistry> {
        &self.tabs
    }

    /// Dispatches one inbound message. Replies are matched against the
    /// correlation table first; everything else is forwarded by receiver
    /// classification.
    pub async fn route_inbound(&self, message: Message, origin: Origin) {
        if message.is_empty() {
            trace!("Ignoring empty message");
            return;
        }
        debug!(
            sender = %message.sender,
            receiver = %message.receiver,
            tag = message.tag().unwrap_or("-"),
            "Routing inbound message"
        );

        if let (Some(id), true) = (message.correlation_id.clone(), message.response.is_some()) {
            if self.correlations.resolve(&id, message.clone()) {
                return;
            }
            // Replies in transit to another context are forwarded below;
            // a reply addressed to the coordinator itself with no pending
            // request is stale and dropped.
            if self.book.classify(&message.receiver) == Address::Coordinator {
                debug!(correlation_id = %id, "Stale reply, dropping");
                return;
            }
        }

        self.forward(message, origin).await;
    }

    /// Issues a correlation id, stamps it into `message`, forwards it and
    /// awaits the reply. On expiry the id is cancelled and `Timeout`
    /// returned; each request terminates exactly once.
    pub async fn send_request(&self, message: Message) -> Result<Message> {
        self.send_request_with_timeout(message, self.request_timeout)
            .await
    }

    pub async fn send_request_with_timeout(
        &self,
        mut message: Message,
        deadline: Duration,
    ) -> Result<Message> {
        if !message.is_request() {
            return Err(Error::InvalidMessage(
                "send_request needs a message with a request tag".to_string(),
            ));
        }
        let (id, reply) = self.correlations.register();
        message.correlation_id = Some(id.clone());
        self.forward(message, Origin::Local).await;

        match tokio::time::timeout(deadline, reply).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                // The pending entry vanished without a reply (cancelled
                // elsewhere or the table dropped); surface as closed.
                self.correlations.cancel(&id);
                Err(Error::ChannelClosed("pending request dropped".to_string()))
            }
            Err(_) => {
                self.correlations.cancel(&id);
                debug!(correlation_id = %id, "Request timed out");
                Err(Error::Timeout(id))
            }
        }
    }

    /// Fire-and-forget send along the same routing rules.
    pub async fn send_action(&self, message: Message) {
        self.forward(message, Origin::Local).await;
    }

    async fn forward(&self, message: Message, origin: Origin) {
        match self.book.classify(&message.receiver) {
            Address::ExternalHost => self.forward_to_host(message),
            Address::Tab(_) => {
                if let Err(e) = self.deliver_to_tab(message).await {
                    error!(error = %e, "Failed to deliver message to tab");
                }
            }
            Address::Coordinator => self.dispatch_local(message, origin).await,
            Address::Unroutable => {
                warn!(receiver = %message.receiver, "Unroutable message dropped");
            }
        }
    }

    fn forward_to_host(&self, message: Message) {
        // Round-trip completion is observed by the channel loop; the
        // receiver here is only needed by callers that must block on it.
        match self.native.send_override(message) {
            Ok(_completion) => {}
            Err(Error::ChannelBusy) => {
                warn!("Native channel busy with another override, message dropped");
            }
            Err(e) => error!(error = %e, "Failed to queue message for native host"),
        }
    }

    async fn deliver_to_tab(&self, message: Message) -> Result<()> {
        let name = message.receiver.clone();
        if self.tabs.resolve(&name).is_none() {
            if !self.auto_open_tabs {
                warn!(name = %name, "Tab not registered, dropping message");
                return Ok(());
            }
            // Lazy provisioning: unknown tab targets are opened at a
            // receiver-derived URL before delivery.
            let url = self.tab_url_template.replace("{name}", &name);
            info!(name = %name, url = %url, "Tab not registered, provisioning");
            self.tabs.open_tab(&url, &name).await?;
        }
        self.tabs.send(&name, message).await
    }

    async fn dispatch_local(&self, message: Message, origin: Origin) {
        let Some(tag) = message.tag() else {
            warn!(sender = %message.sender, "Local message with no action or request");
            return;
        };
        let Some(handler) = self.actions.get(tag) else {
            warn!(action = %tag, "Unknown local action");
            return;
        };
        let ctx = ActionContext {
            origin,
            tabs: self.tabs.clone(),
        };
        match handler.handle(&message.input, &ctx).await {
            Ok(result) => {
                if !message.is_request() {
                    return;
                }
                match &message.correlation_id {
                    Some(id) => {
                        let response = result
                            .unwrap_or_else(|| Value::String(format!("{} completed", id)));
                        self.send_reply(Message::reply_to(&message, response)).await;
                    }
                    None => {
                        debug!(request = %tag, "Request carries no correlation id, reply suppressed");
                    }
                }
            }
            Err(e) => error!(error = %e, action = %tag, "Local handler failed"),
        }
    }

    /// Replies from local handlers go back out to tabs or the host; this
    /// never re-enters local dispatch, so the routing depth is bounded.
    async fn send_reply(&self, reply: Message) {
        match self.book.classify(&reply.receiver) {
            Address::ExternalHost => self.forward_to_host(reply),
            Address::Tab(_) => {
                if let Err(e) = self.deliver_to_tab(reply).await {
                    error!(error = %e, "Failed to deliver reply to tab");
                }
            }
            other => {
                debug!(receiver = %reply.receiver, ?other, "Reply target not forwardable, dropping");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::native::testing::FakeTransport;
    use crate::tabs::testing::FakeBrowser;

    pub(crate) struct Harness {
        pub browser: Arc<FakeBrowser>,
        pub transport: Arc<FakeTransport>,
        pub tabs: Arc<TabRegistry>,
        pub correlations: Arc<CorrelationTable>,
        pub native: Arc<NativeChannel>,
        pub router: Arc<Router>,
    }

    pub(crate) fn harness() -> Harness {
        harness_with(|_| {})
    }

    pub(crate) fn harness_with(customize: impl FnOnce(&mut Config)) -> Harness {
        let mut config = Config::default();
        config.bus.keep_alive_interval_ms = 20;
        config.bus.tab_load_timeout_ms = 200;
        customize(&mut config);

        let browser = Arc::new(FakeBrowser::new());
        let transport = Arc::new(FakeTransport::new());
        let tabs = Arc::new(TabRegistry::new(
            browser.clone(),
            Duration::from_millis(config.bus.tab_load_timeout_ms),
        ));
        let correlations = Arc::new(CorrelationTable::new());
        let native = Arc::new(NativeChannel::new(
            transport.clone(),
            Duration::from_millis(config.bus.keep_alive_interval_ms),
            &config.addresses.self_id,
            &config.addresses.host_id,
        ));
        let router = Arc::new(Router::new(
            &config,
            tabs.clone(),
            correlations.clone(),
            native.clone(),
            ActionTable::with_defaults(),
        ));
        Harness {
            browser,
            transport,
            tabs,
            correlations,
            native,
            router,
        }
    }
}
