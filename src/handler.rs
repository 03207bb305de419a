//! §4.E Channel dispatcher, §4.F Auth resolver wiring, and §4.G Connection
//! worker: the `russh::server::Server`/`Handler` impls that glue the rest of
//! the crate onto the wire protocol. `Gateway` is the long-lived, shared
//! part (one per listening socket); `ConnectionHandler` is spawned fresh by
//! `new_client` for every accepted connection and owns that connection's
//! credentials and session FSMs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::PublicKeyBase64;
use tracing::{debug, info, warn};

use crate::auth::AuthResolver;
use crate::exec::RusshChannelSink;
use crate::kv::KvStore;
use crate::model::Credentials;
use crate::runtime::ContainerRuntime;
use crate::session::{ChannelReply, SessionState};

/// Shared, per-listener state. Cloned cheaply (everything behind an `Arc`)
/// for every accepted connection.
#[derive(Clone)]
pub struct Gateway {
    auth: Arc<AuthResolver>,
    kv: Arc<dyn KvStore>,
    runtime: Arc<dyn ContainerRuntime>,
    default_shell_env_var: Arc<str>,
}

impl Gateway {
    pub fn new(
        auth: Arc<AuthResolver>,
        kv: Arc<dyn KvStore>,
        runtime: Arc<dyn ContainerRuntime>,
        default_shell_env_var: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            auth,
            kv,
            runtime,
            default_shell_env_var: default_shell_env_var.into(),
        }
    }
}

impl server::Server for Gateway {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> ConnectionHandler {
        debug!(?addr, "accepted tcp connection");
        ConnectionHandler {
            auth: Arc::clone(&self.auth),
            kv: Arc::clone(&self.kv),
            runtime: Arc::clone(&self.runtime),
            default_shell_env_var: Arc::clone(&self.default_shell_env_var),
            peer_addr: addr,
            credentials: None,
            sessions: HashMap::new(),
        }
    }
}

pub struct ConnectionHandler {
    auth: Arc<AuthResolver>,
    kv: Arc<dyn KvStore>,
    runtime: Arc<dyn ContainerRuntime>,
    default_shell_env_var: Arc<str>,
    peer_addr: Option<SocketAddr>,
    credentials: Option<Credentials>,
    sessions: HashMap<ChannelId, SessionState>,
}

impl ConnectionHandler {
    fn credentials(&self) -> anyhow::Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("channel request before successful authentication"))
    }

    fn session_mut(&mut self, id: ChannelId) -> anyhow::Result<&mut SessionState> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("request on unknown channel {id:?}"))
    }

    /// Turns a [`ChannelReply`] the FSM decided on into the actual wire
    /// replies. The only place `session.rs`'s decisions touch a live
    /// `Session`.
    fn apply_reply(&self, channel_id: ChannelId, session: &mut Session, reply: ChannelReply) {
        match reply {
            ChannelReply::Success => session.channel_success(channel_id),
            ChannelReply::Failure => session.channel_failure(channel_id),
            ChannelReply::CloseWithMessage(message) => {
                session.data(channel_id, russh::CryptoVec::from_slice(message.as_bytes()));
                session.close(channel_id);
            }
            ChannelReply::RejectAndClose(message) => {
                session.data(channel_id, russh::CryptoVec::from_slice(message.as_bytes()));
                session.channel_failure(channel_id);
                session.close(channel_id);
            }
        }
    }

    /// §4.G's precedence chain: the value stamped at authentication, then
    /// the KV store, then a process-environment fallback, then `"sh"`.
    /// First non-empty wins.
    async fn resolve_default_shell(&self, stamped: &str, owner_id: i64) -> String {
        if !stamped.is_empty() {
            return stamped.to_string();
        }
        match self.kv.default_shell(owner_id).await {
            Ok(Some(shell)) if !shell.is_empty() => return shell,
            Ok(_) => {}
            Err(err) => warn!(%err, "kv store lookup for default shell failed, falling through"),
        }
        if let Ok(shell) = std::env::var(self.default_shell_env_var.as_ref()) {
            if !shell.is_empty() {
                return shell;
            }
        }
        "sh".to_string()
    }
}

#[async_trait]
impl server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey_offered(
        &mut self,
        _user: &str,
        _public_key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        // The real decision happens in `auth_publickey`, once the client has
        // proven possession of the key; offering it never touches the
        // registry.
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        // `russh`'s own key type, not `ssh_key`'s; `auth.rs` compares wire
        // bytes, not key objects, so both sides just need a matching byte
        // form. `PublicKeyBase64::public_key_bytes` is the SSH wire blob,
        // the same form `ssh_key::PublicKey::to_bytes()` produces for the
        // parsed authorized-keys lines.
        let wire_form = public_key.public_key_bytes();
        match self.auth.authenticate(user, &wire_form).await {
            Ok(credentials) => {
                self.credentials = Some(credentials);
                Ok(Auth::Accept)
            }
            Err(err) => {
                warn!(user, %err, "public-key authentication rejected");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    /// Runs once per connection, after the SSH layer has accepted some
    /// auth method. This is where the default-shell precedence chain is
    /// resolved, since it may need a KV round trip best kept off the
    /// latency-sensitive per-offered-key path.
    async fn auth_succeeded(&mut self, _session: &mut Session) -> Result<(), Self::Error> {
        let Some(credentials) = self.credentials.clone() else {
            return Err(anyhow::anyhow!("auth_succeeded fired without credentials"));
        };
        let default_shell = self
            .resolve_default_shell(&credentials.default_shell, credentials.owner_id)
            .await;
        info!(
            peer = ?self.peer_addr,
            container_id = %credentials.container_id,
            "handshake succeeded"
        );
        self.credentials = Some(Credentials {
            default_shell,
            ..credentials
        });
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let credentials = self.credentials()?.clone();
        let sink = Arc::new(RusshChannelSink::new(channel.id(), session.handle()));
        self.sessions.insert(
            channel.id(),
            SessionState::new(credentials, Arc::clone(&self.runtime), sink),
        );
        Ok(true)
    }

    // §4.E: anything other than a `session` channel is rejected with the
    // protocol's standard "unknown channel type" reason. `direct-tcpip`
    // (port forwarding, a non-goal) and `x11`/`forwarded-tcpip` are left
    // unoverridden here rather than hand-rejected: the `Handler` trait's
    // default implementation for every channel-open hook besides
    // `channel_open_session` already declines with that same reason, and a
    // hand-written override that calls `channel_failure` would instead send
    // a channel-*request* reply against a channel that was never opened.

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.session_mut(channel)?.on_env(variable_name, variable_value);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let reply = self.session_mut(channel)?.on_pty_req(col_width, row_height).await;
        self.apply_reply(channel, session, reply);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let reply = self
            .session_mut(channel)?
            .on_window_change(col_width, row_height)
            .await;
        self.apply_reply(channel, session, reply);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let reply = self.session_mut(channel)?.on_shell().await;
        self.apply_reply(channel, session, reply);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        let reply = self.session_mut(channel)?.on_exec(&command).await;
        self.apply_reply(channel, session, reply);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(subsystem = name, "rejecting subsystem request");
        let reply = self.session_mut(channel)?.on_subsystem();
        self.apply_reply(channel, session, reply);
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        _signal_name: russh::Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.session_mut(channel)?.on_signal();
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Ok(session) = self.session_mut(channel) {
            session.on_data(data).await;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.sessions.remove(&channel);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.close(channel);
        Ok(())
    }
}
